/// Reassembles newline-delimited records from a byte stream. A record can be
/// split across arbitrary network chunk boundaries, so the partial tail is
/// carried until its newline arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every complete line it finished.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut lines = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }

        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdfchat_core::models::StreamRecord;

    #[test]
    fn complete_lines_come_out_as_fed() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"{\"type\":\"done\"}\n");
        assert_eq!(lines, vec![r#"{"type":"done"}"#]);
    }

    #[test]
    fn records_split_across_chunks_are_reassembled() {
        let mut buffer = LineBuffer::new();

        assert!(buffer.push(b"{\"type\":\"token\",").is_empty());
        let lines = buffer.push(b"\"text\":\"hi\"}\n{\"type\":");
        assert_eq!(lines.len(), 1);

        let record: StreamRecord = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(
            record,
            StreamRecord::Token {
                text: "hi".to_string()
            }
        );

        let lines = buffer.push(b"\"done\"}\n");
        assert_eq!(lines, vec![r#"{"type":"done"}"#]);
    }

    #[test]
    fn multiple_records_in_one_chunk_all_come_out() {
        let mut buffer = LineBuffer::new();
        let chunk = b"{\"type\":\"token\",\"text\":\"a\"}\n{\"type\":\"token\",\"text\":\"b\"}\n";
        let lines = buffer.push(chunk);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"\n\n{\"type\":\"done\"}\n\n");
        assert_eq!(lines.len(), 1);
    }
}
