//! Keyword-rubric task-type detection and the capability set it implies.
//!
//! Deliberately simple: a real deployment would swap this for a trained
//! classifier without touching the strategies downstream, since both only
//! see the resulting [`TaskType`]/capability set.

use crate::types::{ModelCapability, TaskType};

const LONG_PROMPT_TOKENS: u32 = 4000;

/// Estimates token count at roughly 4 characters per token.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() / 4) as u32
}

/// Classifies a prompt by keyword match, falling through to `Chat`.
pub fn detect_task_type(query: &str) -> TaskType {
    let q = query.to_lowercase();
    let any = |keywords: &[&str]| keywords.iter().any(|kw| q.contains(kw));

    if any(&["code", "function", "class", "debug", "fix"]) {
        TaskType::CodeGeneration
    } else if any(&["review", "improve", "optimize"]) {
        TaskType::CodeReview
    } else if any(&["story", "poem", "creative", "write"]) {
        TaskType::CreativeWriting
    } else if any(&["analyze", "explain", "compare"]) {
        TaskType::Analysis
    } else if any(&["translate", "translation"]) {
        TaskType::Translation
    } else if any(&["summarize", "summary", "brief"]) {
        TaskType::Summarization
    } else if any(&["why", "what", "how", "when", "where"]) {
        TaskType::QuestionAnswering
    } else if any(&["reason", "logic", "deduce", "infer"]) {
        TaskType::Reasoning
    } else if any(&["image", "picture", "photo", "visual"]) {
        TaskType::Vision
    } else {
        TaskType::Chat
    }
}

/// Translates a task type (plus prompt length) into the capabilities a
/// model must have to serve it.
pub fn required_capabilities(query: &str, task_type: TaskType) -> Vec<ModelCapability> {
    let mut capabilities = vec![ModelCapability::TextGeneration];

    if matches!(task_type, TaskType::CodeGeneration | TaskType::CodeReview) {
        capabilities.push(ModelCapability::Code);
    }

    if task_type == TaskType::Vision {
        capabilities.push(ModelCapability::Vision);
    }

    if estimate_tokens(query) > LONG_PROMPT_TOKENS {
        capabilities.push(ModelCapability::LongContext);
    }

    capabilities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_code_generation_from_keyword() {
        assert_eq!(detect_task_type("please fix this function"), TaskType::CodeGeneration);
    }

    #[test]
    fn detects_vision_from_keyword() {
        assert_eq!(detect_task_type("describe this image"), TaskType::Vision);
    }

    #[test]
    fn falls_back_to_chat() {
        assert_eq!(detect_task_type("hello there"), TaskType::Chat);
    }

    #[test]
    fn long_prompt_requires_long_context() {
        let long_query = "a".repeat(20_000);
        let caps = required_capabilities(&long_query, TaskType::Chat);
        assert!(caps.contains(&ModelCapability::LongContext));
    }

    #[test]
    fn code_task_requires_code_capability() {
        let caps = required_capabilities("fix this class", TaskType::CodeGeneration);
        assert!(caps.contains(&ModelCapability::Code));
    }
}
