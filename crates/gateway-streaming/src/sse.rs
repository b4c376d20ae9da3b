//! Stream utilities exposed to the pipeline coordinator: SSE framing,
//! byte-size chunking, compression, rate pacing and per-stream metering.
//! Pure helpers and small stateful structs, not `Service` wrappers — the
//! coordinator calls these directly around its own chunk loop.

use crate::types::Message;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::io::Write;
use std::time::{Duration, Instant};

/// Frames a message as `data: <json>\n\n`, the SSE wire format.
pub fn encode_event(message: &Message) -> serde_json::Result<String> {
    let body = serde_json::to_string(message)?;
    Ok(format!("data: {body}\n\n"))
}

/// Frames a raw error string the same way, for transport-level failures
/// that never made it into a [`Message`].
pub fn encode_error_event(detail: &str) -> String {
    let body = serde_json::json!({ "error": detail });
    format!("data: {body}\n\n")
}

/// Splits `data` into chunks of at most `chunk_size` bytes.
pub fn chunk_bytes(data: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    if chunk_size == 0 {
        return vec![data.to_vec()];
    }
    data.chunks(chunk_size).map(|c| c.to_vec()).collect()
}

/// Incremental zlib compressor for a chunk stream. Each `push` returns
/// whatever output the encoder is ready to flush; `finish` drains the rest.
pub struct StreamCompressor {
    encoder: ZlibEncoder<Vec<u8>>,
}

impl StreamCompressor {
    pub fn new() -> Self {
        Self {
            encoder: ZlibEncoder::new(Vec::new(), Compression::default()),
        }
    }

    pub fn push(&mut self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        self.encoder.write_all(data)?;
        self.encoder.flush()?;
        Ok(std::mem::take(self.encoder.get_mut()))
    }

    pub fn finish(mut self) -> std::io::Result<Vec<u8>> {
        self.encoder.try_finish()?;
        Ok(self.encoder.finish()?)
    }
}

impl Default for StreamCompressor {
    fn default() -> Self {
        Self::new()
    }
}

/// Paces emission to at most `rate` items per second, for fair bandwidth
/// sharing across concurrent streams. Callers `await wait()` before each
/// send.
pub struct RateLimiter {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl RateLimiter {
    pub fn new(rate_per_second: f64) -> Self {
        let interval = if rate_per_second <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / rate_per_second)
        };
        Self { interval, last_emit: None }
    }

    pub async fn wait(&mut self) {
        if self.interval.is_zero() {
            return;
        }
        if let Some(last) = self.last_emit {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                tokio::time::sleep(self.interval - elapsed).await;
            }
        }
        self.last_emit = Some(Instant::now());
    }
}

/// Tracks chunk count, byte count and wall-clock duration for one stream,
/// surfaced to metrics/tracing at stream end.
pub struct StreamMeter {
    chunks_sent: u64,
    bytes_sent: u64,
    started_at: Instant,
}

impl StreamMeter {
    pub fn start() -> Self {
        Self { chunks_sent: 0, bytes_sent: 0, started_at: Instant::now() }
    }

    pub fn record(&mut self, bytes: usize) {
        self.chunks_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn summary(&self) -> (u64, u64, Duration) {
        (self.chunks_sent, self.bytes_sent, self.started_at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageType;

    #[test]
    fn encode_event_has_sse_framing() {
        let message = Message::new(MessageType::Text, "hello", "node-a");
        let framed = encode_event(&message).unwrap();
        assert!(framed.starts_with("data: "));
        assert!(framed.ends_with("\n\n"));
    }

    #[test]
    fn chunk_bytes_splits_evenly() {
        let chunks = chunk_bytes(b"abcdefgh", 3);
        assert_eq!(chunks, vec![b"abc".to_vec(), b"def".to_vec(), b"gh".to_vec()]);
    }

    #[test]
    fn chunk_bytes_zero_size_returns_whole_input() {
        let chunks = chunk_bytes(b"abc", 0);
        assert_eq!(chunks, vec![b"abc".to_vec()]);
    }

    #[test]
    fn compressor_round_trips_via_decoder() {
        let mut compressor = StreamCompressor::new();
        let mut out = compressor.push(b"hello ").unwrap();
        out.extend(compressor.push(b"world").unwrap());
        out.extend(compressor.finish().unwrap());

        let mut decoder = flate2::read::ZlibDecoder::new(&out[..]);
        let mut decoded = String::new();
        std::io::Read::read_to_string(&mut decoder, &mut decoded).unwrap();
        assert_eq!(decoded, "hello world");
    }

    #[test]
    fn meter_accumulates_chunks_and_bytes() {
        let mut meter = StreamMeter::start();
        meter.record(10);
        meter.record(20);
        let (chunks, bytes, _elapsed) = meter.summary();
        assert_eq!(chunks, 2);
        assert_eq!(bytes, 30);
    }
}
