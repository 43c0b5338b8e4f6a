//! Component output forwarding
//!
//! Attach streams deliver arbitrary chunks; lines must be reassembled
//! before they can be prefixed with the component name.

/// Buffers attach chunks and yields complete, prefixed lines
pub(crate) struct LinePrefixer {
    prefix: String,
    buffer: Vec<u8>,
}

impl LinePrefixer {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            prefix: format!("{} | ", name),
            buffer: Vec::new(),
        }
    }

    /// Feed one chunk; returns every line completed by it
    pub(crate) fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(data);

        let mut lines = Vec::new();
        while let Some(idx) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=idx).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(format!("{}{}", self.prefix, String::from_utf8_lossy(&line)));
        }
        lines
    }

    /// Drain any trailing partial line
    pub(crate) fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(format!("{}{}", self.prefix, String::from_utf8_lossy(&rest)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_complete_lines() {
        let mut prefixer = LinePrefixer::new("app");
        assert_eq!(
            prefixer.push(b"hello\nworld\n"),
            vec!["app | hello", "app | world"]
        );
    }

    #[test]
    fn buffers_partial_lines_across_chunks() {
        let mut prefixer = LinePrefixer::new("app");
        assert!(prefixer.push(b"hel").is_empty());
        assert_eq!(prefixer.push(b"lo\nwo"), vec!["app | hello"]);
        assert_eq!(prefixer.push(b"rld\n"), vec!["app | world"]);
        assert_eq!(prefixer.flush(), None);
    }

    #[test]
    fn strips_carriage_returns() {
        let mut prefixer = LinePrefixer::new("app");
        assert_eq!(prefixer.push(b"tty output\r\n"), vec!["app | tty output"]);
    }

    #[test]
    fn flush_emits_trailing_fragment() {
        let mut prefixer = LinePrefixer::new("app");
        prefixer.push(b"no newline");
        assert_eq!(prefixer.flush(), Some("app | no newline".to_string()));
        assert_eq!(prefixer.flush(), None);
    }
}
