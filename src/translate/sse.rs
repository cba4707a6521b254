//! SSE line framer for the upstream byte stream.
//!
//! The upstream body arrives as arbitrary byte chunks that can split lines,
//! `data:` prefixes, and even multi-byte UTF-8 sequences anywhere. The
//! [`SseFramer`] buffers raw bytes, reassembles complete lines, and decodes
//! `data: {json}` payloads into typed [`ChatCompletionChunk`]s. Feeding the
//! same byte stream in different partitions yields the same frames.

use tracing::debug;

use super::openai_types::ChatCompletionChunk;

/// One decoded upstream SSE event.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A `data: {json}` payload parsed as a chat-completion chunk.
    Chunk(Box<ChatCompletionChunk>),
    /// The `data: [DONE]` end-of-stream marker.
    Done,
}

/// Reassembles `data:` events from an unbounded upstream byte stream.
#[derive(Debug, Default)]
pub struct SseFramer {
    buffer: Vec<u8>,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk; returns every frame completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let rest = self.buffer.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.buffer, rest);
            line.pop(); // LF
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(frame) = parse_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a residual unterminated line at end of stream.
    pub fn finish(&mut self) -> Vec<Frame> {
        let line = std::mem::take(&mut self.buffer);
        if line.is_empty() {
            return Vec::new();
        }
        parse_line(&line).into_iter().collect()
    }
}

/// Decode one complete line. Non-`data:` lines (comments, `event:` headers,
/// blanks) are ignored; unparseable JSON payloads are logged and skipped so
/// one bad frame does not abort the stream.
fn parse_line(line: &[u8]) -> Option<Frame> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let payload = line
        .strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))?
        .trim();

    if payload == "[DONE]" {
        return Some(Frame::Done);
    }

    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => Some(Frame::Chunk(Box::new(chunk))),
        Err(e) => {
            debug!(error = %e, "Skipping unparseable SSE payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_line(id: &str, content: &str) -> String {
        format!(
            "data: {{\"id\":\"{id}\",\"model\":\"m\",\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"{content}\"}},\"finish_reason\":null}}]}}\n"
        )
    }

    fn frame_ids(frames: &[Frame]) -> Vec<String> {
        frames
            .iter()
            .map(|f| match f {
                Frame::Chunk(c) => c.id.clone(),
                Frame::Done => "[DONE]".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_whole_frames() {
        let mut framer = SseFramer::new();
        let mut frames = framer.push(chunk_line("a", "hi").as_bytes());
        frames.extend(framer.push(b"data: [DONE]\n"));

        assert_eq!(frame_ids(&frames), vec!["a", "[DONE]"]);
    }

    #[test]
    fn test_line_split_across_pushes() {
        let mut framer = SseFramer::new();
        let line = chunk_line("a", "hi");
        let (head, tail) = line.as_bytes().split_at(15);

        assert!(framer.push(head).is_empty());
        let frames = framer.push(tail);
        assert_eq!(frame_ids(&frames), vec!["a"]);
    }

    #[test]
    fn test_any_partition_yields_identical_frames() {
        let bytes = format!(
            "{}{}data: not json\n\ndata: [DONE]\n",
            chunk_line("a", "héllo"),
            chunk_line("b", "wörld")
        );
        let bytes = bytes.as_bytes();

        let mut whole = SseFramer::new();
        let mut expected = whole.push(bytes);
        expected.extend(whole.finish());
        let expected = frame_ids(&expected);

        // Split at every byte offset, including inside multi-byte chars.
        for split in 0..=bytes.len() {
            let mut framer = SseFramer::new();
            let mut frames = framer.push(&bytes[..split]);
            frames.extend(framer.push(&bytes[split..]));
            frames.extend(framer.finish());
            assert_eq!(frame_ids(&frames), expected, "split at byte {split}");
        }
    }

    #[test]
    fn test_crlf_lines() {
        let mut framer = SseFramer::new();
        let line = chunk_line("a", "hi").replace('\n', "\r\n");
        let frames = framer.push(line.as_bytes());
        assert_eq!(frame_ids(&frames), vec!["a"]);
    }

    #[test]
    fn test_non_data_lines_ignored() {
        let mut framer = SseFramer::new();
        let frames = framer.push(b": comment\nevent: ping\nid: 7\n\n");
        assert!(frames.is_empty());
    }

    #[test]
    fn test_bad_json_skipped_without_aborting() {
        let mut framer = SseFramer::new();
        let input = format!("data: {{broken\n{}", chunk_line("ok", "x"));
        let frames = framer.push(input.as_bytes());
        assert_eq!(frame_ids(&frames), vec!["ok"]);
    }

    #[test]
    fn test_residual_line_flushed_on_finish() {
        let mut framer = SseFramer::new();
        let line = chunk_line("tail", "x");
        let unterminated = &line.as_bytes()[..line.len() - 1];

        assert!(framer.push(unterminated).is_empty());
        let frames = framer.finish();
        assert_eq!(frame_ids(&frames), vec!["tail"]);
        assert!(framer.finish().is_empty());
    }
}
