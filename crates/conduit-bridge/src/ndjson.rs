//! NDJSON framing — a stateful parser and a stateless serializer.
//!
//! Each line of the stream is one complete JSON value terminated by `\n`.
//! The parser is insensitive to byte-chunk boundaries: a value split across
//! any number of `feed` calls produces exactly one callback once its
//! terminating newline arrives.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Serialize one value as an NDJSON line (UTF-8 JSON + `\n`).
pub fn to_ndjson<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}

/// Stateful NDJSON parser.
///
/// `feed` buffers partial lines; complete lines are decoded and handed to
/// the callback. Whitespace-only lines are skipped; malformed lines are
/// logged at warn and dropped — a garbled frame never terminates a session.
#[derive(Debug, Default)]
pub struct NdjsonParser {
    buffer: String,
}

impl NdjsonParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and emit every complete line.
    pub fn feed(&mut self, chunk: &str, mut on_value: impl FnMut(Value)) {
        self.buffer.push_str(chunk);
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            Self::emit_line(line.trim_end_matches('\n'), &mut on_value);
        }
    }

    /// Attempt one last parse of whatever remains in the buffer.
    ///
    /// Called when the connection closes, to surface a final message that
    /// arrived without a trailing newline. Whitespace-only remainders are
    /// discarded silently.
    pub fn flush(&mut self, mut on_value: impl FnMut(Value)) {
        let remainder = std::mem::take(&mut self.buffer);
        Self::emit_line(&remainder, &mut on_value);
    }

    /// Bytes currently buffered awaiting a newline.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn emit_line(line: &str, on_value: &mut impl FnMut(Value)) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => on_value(value),
            Err(error) => {
                warn!(%error, length = trimmed.len(), "dropping malformed NDJSON line");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn collect(parser: &mut NdjsonParser, chunk: &str) -> Vec<Value> {
        let mut values = Vec::new();
        parser.feed(chunk, |v| values.push(v));
        values
    }

    #[test]
    fn serializer_appends_newline() {
        let line = to_ndjson(&json!({"a": 1})).unwrap();
        assert_eq!(line, "{\"a\":1}\n");
    }

    #[test]
    fn single_complete_line() {
        let mut parser = NdjsonParser::new();
        let values = collect(&mut parser, "{\"a\":1}\n");
        assert_eq!(values, vec![json!({"a": 1})]);
        assert_eq!(parser.pending_len(), 0);
    }

    #[test]
    fn multiple_lines_in_one_chunk() {
        let mut parser = NdjsonParser::new();
        let values = collect(&mut parser, "{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[test]
    fn partial_line_is_buffered() {
        let mut parser = NdjsonParser::new();
        assert!(collect(&mut parser, "{\"a\"").is_empty());
        assert!(parser.pending_len() > 0);
        let values = collect(&mut parser, ":1}\n");
        assert_eq!(values, vec![json!({"a": 1})]);
    }

    #[test]
    fn split_at_every_byte_boundary() {
        // Invariant: framing is insensitive to chunk boundaries.
        let input = "{\"a\":1}\n{\"b\":2}\n";
        for split in 0..=input.len() {
            let mut parser = NdjsonParser::new();
            let mut values = Vec::new();
            parser.feed(&input[..split], |v| values.push(v));
            parser.feed(&input[split..], |v| values.push(v));
            assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2})], "split at {split}");
        }
    }

    #[test]
    fn single_byte_chunks() {
        let input = "{\"a\":1}\n{\"b\":2}\n";
        let mut parser = NdjsonParser::new();
        let mut values = Vec::new();
        for i in 0..input.len() {
            parser.feed(&input[i..=i], |v| values.push(v));
        }
        assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[test]
    fn whitespace_only_lines_skipped() {
        let mut parser = NdjsonParser::new();
        let values = collect(&mut parser, "\n   \n\t\n{\"a\":1}\n");
        assert_eq!(values, vec![json!({"a": 1})]);
    }

    #[test]
    fn malformed_lines_dropped() {
        let mut parser = NdjsonParser::new();
        let values = collect(&mut parser, "{not json}\n{\"ok\":true}\n");
        assert_eq!(values, vec![json!({"ok": true})]);
    }

    #[test]
    fn flush_surfaces_unterminated_value() {
        let mut parser = NdjsonParser::new();
        assert!(collect(&mut parser, "{\"last\":true}").is_empty());
        let mut values = Vec::new();
        parser.flush(|v| values.push(v));
        assert_eq!(values, vec![json!({"last": true})]);
        assert_eq!(parser.pending_len(), 0);
    }

    #[test]
    fn flush_of_whitespace_is_noop() {
        let mut parser = NdjsonParser::new();
        assert!(collect(&mut parser, "   ").is_empty());
        let mut values = Vec::new();
        parser.flush(|v| values.push(v));
        assert!(values.is_empty());
    }

    #[test]
    fn flush_of_empty_parser_is_noop() {
        let mut parser = NdjsonParser::new();
        let mut count = 0;
        parser.flush(|_| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn crlf_payload_survives() {
        // A trailing \r before the newline is trimmed by the whitespace trim.
        let mut parser = NdjsonParser::new();
        let values = collect(&mut parser, "{\"a\":1}\r\n");
        assert_eq!(values, vec![json!({"a": 1})]);
    }

    proptest! {
        #[test]
        fn round_trip_is_chunk_boundary_insensitive(
            values in prop::collection::vec(
                prop_oneof![
                    Just(json!({"type": "assistant", "n": 1})),
                    Just(json!({"type": "result", "total_cost_usd": 0.25})),
                    Just(json!([1, 2, 3])),
                    Just(json!("text with \n escape")),
                    Just(json!(null)),
                ],
                1..6,
            ),
            chunk_size in 1usize..9,
        ) {
            let stream: String = values
                .iter()
                .map(|v| to_ndjson(v).unwrap())
                .collect();

            let mut parser = NdjsonParser::new();
            let mut decoded = Vec::new();
            let bytes = stream.as_bytes();
            let mut start = 0;
            while start < bytes.len() {
                let mut end = (start + chunk_size).min(bytes.len());
                // Keep chunks on UTF-8 boundaries.
                while end < bytes.len() && !stream.is_char_boundary(end) {
                    end += 1;
                }
                parser.feed(&stream[start..end], |v| decoded.push(v));
                start = end;
            }
            parser.flush(|v| decoded.push(v));
            prop_assert_eq!(decoded, values);
        }
    }
}
