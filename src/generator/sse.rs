//! Event-stream decoding for generator responses.

use tracing::debug;

use super::types::{BackendFrame, ChunkFrame};

/// Which frame shape a response stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `{"type": "text-delta", "delta": "..."}` frames from the backend proxy.
    Backend,
    /// `choices[0].delta.content` chunks from an OpenAI-compatible endpoint.
    OpenAi,
}

/// Incremental decoder for newline-delimited `data: <json>` frames.
///
/// Transport chunks can split a frame anywhere, including inside a multi-byte
/// character, so bytes are buffered until a full line is available. Malformed
/// frames and unknown frame types are skipped, never fatal. The
/// `data: [DONE]` sentinel carries no text; the response ends when the
/// transport closes.
pub struct StreamDecoder {
    dialect: Dialect,
    buffer: Vec<u8>,
    text: String,
}

impl StreamDecoder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            buffer: Vec::new(),
            text: String::new(),
        }
    }

    /// Feed one transport chunk, emitting the full text so far after every
    /// appended delta.
    pub fn push(&mut self, chunk: &[u8], emit: &mut dyn FnMut(&str)) {
        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            if let Some(delta) = self.decode_line(&line) {
                self.text.push_str(&delta);
                emit(&self.text);
            }
        }
    }

    /// Flush a trailing unterminated line and return the accumulated text.
    pub fn finish(mut self) -> String {
        if !self.buffer.is_empty() {
            let line = String::from_utf8_lossy(&self.buffer).into_owned();
            if let Some(delta) = self.decode_line(&line) {
                self.text.push_str(&delta);
            }
        }
        self.text
    }

    fn decode_line(&self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() || line == "data: [DONE]" {
            return None;
        }
        let payload = line.strip_prefix("data: ")?;
        match self.dialect {
            Dialect::Backend => match serde_json::from_str::<BackendFrame>(payload) {
                Ok(frame) if frame.kind == "text-delta" => Some(frame.delta),
                Ok(_) => None,
                Err(err) => {
                    debug!(%err, "skipping malformed stream frame");
                    None
                }
            },
            Dialect::OpenAi => match serde_json::from_str::<ChunkFrame>(payload) {
                Ok(frame) => frame
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                    .filter(|content| !content.is_empty()),
                Err(err) => {
                    debug!(%err, "skipping malformed stream frame");
                    None
                }
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn decode_all(dialect: Dialect, chunks: &[&str]) -> (String, Vec<String>) {
        let mut decoder = StreamDecoder::new(dialect);
        let mut seen = Vec::new();
        for chunk in chunks {
            decoder.push(chunk.as_bytes(), &mut |text| seen.push(text.to_string()));
        }
        (decoder.finish(), seen)
    }

    #[test]
    fn backend_deltas_accumulate_into_snapshots() {
        let (text, seen) = decode_all(
            Dialect::Backend,
            &[
                "data: {\"type\":\"text-delta\",\"delta\":\"Click \"}\n",
                "data: {\"type\":\"text-delta\",\"delta\":\"Save\"}\n\ndata: [DONE]\n",
            ],
        );
        assert_eq!(text, "Click Save");
        // Each emission is the full answer so far, not a delta.
        assert_eq!(seen, vec!["Click ", "Click Save"]);
    }

    #[test]
    fn openai_chunks_accumulate() {
        let (text, seen) = decode_all(
            Dialect::OpenAi,
            &[
                "data: {\"choices\":[{\"delta\":{\"content\":\"На\"}}]}\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"жмите\"}}]}\n",
                "data: {\"choices\":[{\"delta\":{}}]}\n",
                "data: [DONE]\n",
            ],
        );
        assert_eq!(text, "Нажмите");
        assert_eq!(seen, vec!["На", "Нажмите"]);
    }

    #[test]
    fn frames_split_across_chunks_reassemble() {
        let (text, _) = decode_all(
            Dialect::Backend,
            &["data: {\"type\":\"te", "xt-delta\",\"delta\":\"Про\"}"],
        );
        // No newline ever arrived; the trailing line is flushed at finish.
        assert_eq!(text, "Про");

        let (text, seen) = decode_all(
            Dialect::Backend,
            &[
                "data: {\"type\":\"text-delta\",\"del",
                "ta\":\"Про\"}\ndata: {\"type\":\"text-delta\",\"delta\":\"крутите\"}\n",
            ],
        );
        assert_eq!(text, "Прокрутите");
        assert_eq!(seen, vec!["Про", "Прокрутите"]);
    }

    #[test]
    fn multibyte_character_split_mid_chunk_survives() {
        let frame = "data: {\"type\":\"text-delta\",\"delta\":\"Ж\"}\n".as_bytes();
        let mut decoder = StreamDecoder::new(Dialect::Backend);
        let mut seen = Vec::new();
        // Split inside the two-byte "Ж".
        let split = frame.len() - 4;
        decoder.push(&frame[..split], &mut |t| seen.push(t.to_string()));
        decoder.push(&frame[split..], &mut |t| seen.push(t.to_string()));
        assert_eq!(decoder.finish(), "Ж");
        assert_eq!(seen, vec!["Ж"]);
    }

    #[test]
    fn malformed_and_unknown_frames_are_skipped() {
        let (text, seen) = decode_all(
            Dialect::Backend,
            &[
                "data: {not json}\n",
                "event: ping\n",
                "data: {\"type\":\"usage\",\"tokens\":7}\n",
                "data: {\"type\":\"text-delta\",\"delta\":\"ok\"}\n",
            ],
        );
        assert_eq!(text, "ok");
        assert_eq!(seen, vec!["ok"]);
    }

    #[test]
    fn trailing_flush_appends_without_emitting() {
        let mut decoder = StreamDecoder::new(Dialect::Backend);
        let mut seen = Vec::new();
        decoder.push(
            "data: {\"type\":\"text-delta\",\"delta\":\"a\"}\ndata: {\"type\":\"text-delta\",\"delta\":\"b\"}".as_bytes(),
            &mut |t| seen.push(t.to_string()),
        );
        assert_eq!(seen, vec!["a"]);
        assert_eq!(decoder.finish(), "ab");
    }

    #[test]
    fn done_sentinel_alone_yields_empty() {
        let (text, seen) = decode_all(Dialect::OpenAi, &["data: [DONE]\n"]);
        assert!(text.is_empty());
        assert!(seen.is_empty());
    }
}
