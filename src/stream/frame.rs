//! Blank-line delimited frame decoding over arbitrary byte chunks.

/// Incremental splitter that turns response body chunks into frames.
///
/// Bytes are buffered rather than strings so a multi-byte UTF-8 sequence cut
/// by a chunk boundary is reassembled before decoding.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Offset below which `buffer` holds no delimiter start.
    scanned: usize,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every frame it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut consumed = 0usize;
        let mut from = self.scanned;
        while let Some((end, next)) = find_frame_end(&self.buffer[consumed..], from) {
            let raw = &self.buffer[consumed..consumed + end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let frame = String::from_utf8_lossy(raw);
            if !frame.trim().is_empty() {
                frames.push(frame.into_owned());
            }
            consumed += next;
            from = 0;
        }
        if consumed > 0 {
            self.buffer.drain(..consumed);
        }
        // The longest delimiter is three bytes, so one may start in the last two.
        self.scanned = self.buffer.len().saturating_sub(2);
        frames
    }

    /// Bytes waiting for a terminating blank line.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop an incomplete trailing frame at end of stream.
    ///
    /// Returns how many bytes were discarded.
    pub fn discard_partial(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        self.scanned = 0;
        dropped
    }
}

/// Locate the first blank-line delimiter starting at or after `from`.
///
/// Returns `(frame_end, next_frame_start)` relative to `buf`.
fn find_frame_end(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    for (idx, byte) in buf.iter().enumerate().skip(from) {
        if *byte != b'\n' {
            continue;
        }
        let rest = &buf[idx + 1..];
        if rest.starts_with(b"\n") {
            return Some((idx, idx + 2));
        }
        if rest.starts_with(b"\r\n") {
            return Some((idx, idx + 3));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_frames_on_blank_lines() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"data: one\n\ndata: two\n\n");
        assert_eq!(frames, vec!["data: one", "data: two"]);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn buffers_frame_split_across_chunks() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"type\":").is_empty());
        assert!(decoder.push(b"\"text\"}\n").is_empty());
        let frames = decoder.push(b"\ndata: next");
        assert_eq!(frames, vec!["data: {\"type\":\"text\"}"]);
        assert_eq!(decoder.pending_len(), "data: next".len());
    }

    #[test]
    fn reassembles_utf8_split_mid_character() {
        let text = "data: caf\u{e9}\n\n".as_bytes();
        let split = text.iter().position(|b| *b == 0xc3).unwrap() + 1;
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&text[..split]).is_empty());
        assert_eq!(decoder.push(&text[split..]), vec!["data: caf\u{e9}"]);
    }

    #[test]
    fn accepts_crlf_delimiters_and_skips_empty_frames() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"\n\ndata: a\r\n\r\ndata: b\n\n\n\n");
        assert_eq!(frames, vec!["data: a", "data: b"]);
    }

    #[test]
    fn byte_at_a_time_feed_finds_split_delimiters() {
        let stream = b"data: first\r\n\r\ndata: second\n\ndata: tail";
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in stream {
            frames.extend(decoder.push(std::slice::from_ref(byte)));
            assert!(decoder.scanned <= decoder.pending_len());
        }
        assert_eq!(frames, vec!["data: first", "data: second"]);
        assert_eq!(decoder.pending_len(), "data: tail".len());
        assert_eq!(decoder.scanned, "data: tail".len() - 2);
    }

    #[test]
    fn long_frame_is_not_rescanned_from_the_start() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: ").is_empty());
        for _ in 0..1000 {
            assert!(decoder.push(b"xy").is_empty());
        }
        assert_eq!(decoder.scanned, decoder.pending_len() - 2);
        assert_eq!(decoder.push(b"\n"), Vec::<String>::new());
        let frames = decoder.push(b"\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), "data: ".len() + 2000);
        assert_eq!(decoder.scanned, 0);
    }

    #[test]
    fn discard_partial_drops_unterminated_tail() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"done\"}").is_empty());
        assert_eq!(decoder.discard_partial(), "data: {\"type\":\"done\"}".len());
        assert_eq!(decoder.pending_len(), 0);
        assert_eq!(decoder.scanned, 0);
    }

    #[cfg(feature = "fuzz-tests")]
    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn chunk_boundaries_do_not_change_frames(
                payloads in proptest::collection::vec(
                    proptest::string::string_regex("[a-z{}\":, ]{1,24}").expect("regex"),
                    0..8
                ),
                cut in 1usize..16
            ) {
                let stream: String = payloads
                    .iter()
                    .map(|payload| format!("data: {payload}\n\n"))
                    .collect();
                let expected: Vec<String> = payloads
                    .iter()
                    .map(|payload| format!("data: {payload}"))
                    .collect();

                let mut decoder = FrameDecoder::new();
                let mut frames = Vec::new();
                for chunk in stream.as_bytes().chunks(cut) {
                    frames.extend(decoder.push(chunk));
                }
                prop_assert_eq!(frames, expected);
                prop_assert_eq!(decoder.pending_len(), 0);
            }
        }
    }
}
