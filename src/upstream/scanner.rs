use serde::Deserialize;

const COMPLETION_MARKER: &str = "process_completed";
const DATA_PREFIX: &str = "data: ";

/// Terminal outcome extracted from the event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub media_url: String,
    pub duration: f64,
}

#[derive(Debug, Deserialize)]
struct EventMessage {
    msg: String,
    #[serde(default)]
    success: bool,
    output: Option<EventOutput>,
}

#[derive(Debug, Deserialize)]
struct EventOutput {
    #[serde(default)]
    data: Vec<OutputEntry>,
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OutputEntry {
    url: Option<String>,
}

/// Incremental scanner over a Gradio queue event stream.
///
/// The upstream delivers newline-delimited `data: <json>` records with no
/// guarantee that record boundaries line up with network chunks, so the
/// scanner accumulates everything it has seen and re-parses lazily. Lines
/// that fail to decode are expected (partial records mid-chunk) and skipped.
#[derive(Debug, Default)]
pub struct StreamScanner {
    buffer: Vec<u8>,
}

impl StreamScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one network chunk and scans for a terminal record.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Completion> {
        self.buffer.extend_from_slice(chunk);
        self.scan()
    }

    /// Final scan over the residual buffer, for when the connection closes.
    /// Catches a terminal record delivered in the same chunk as stream end.
    pub fn finish(&self) -> Option<Completion> {
        self.scan()
    }

    fn scan(&self) -> Option<Completion> {
        let text = String::from_utf8_lossy(&self.buffer);
        // Cheap short-circuit: don't re-parse every chunk
        if !text.contains(COMPLETION_MARKER) {
            return None;
        }

        for line in text.split('\n') {
            let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
                continue;
            };
            let Ok(event) = serde_json::from_str::<EventMessage>(payload) else {
                continue;
            };
            if event.msg != COMPLETION_MARKER || !event.success {
                continue;
            }
            let Some(output) = event.output else {
                continue;
            };
            if let Some(media_url) = output.data.first().and_then(|entry| entry.url.clone()) {
                return Some(Completion {
                    media_url,
                    duration: output.duration.unwrap_or(0.0),
                });
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn completed_line(url: &str, duration: f64) -> String {
        format!(
            "data: {{\"msg\":\"process_completed\",\"success\":true,\"output\":{{\"data\":[{{\"url\":\"{url}\"}}],\"duration\":{duration}}}}}\n"
        )
    }

    #[test]
    fn test_detects_terminal_record_in_single_chunk() {
        let mut scanner = StreamScanner::new();
        let chunk = format!(
            "data: {{\"msg\":\"process_starts\"}}\n\n{}",
            completed_line("https://host/file.png", 2.5)
        );

        let completion = scanner.push(chunk.as_bytes()).unwrap();
        assert_eq!(completion.media_url, "https://host/file.png");
        assert_eq!(completion.duration, 2.5);
    }

    #[test]
    fn test_record_split_across_chunks() {
        let mut scanner = StreamScanner::new();
        let line = completed_line("https://host/split.png", 1.0);
        let (head, tail) = line.split_at(line.len() / 2);

        assert_eq!(scanner.push(head.as_bytes()), None);
        let completion = scanner.push(tail.as_bytes()).unwrap();
        assert_eq!(completion.media_url, "https://host/split.png");
    }

    #[test]
    fn test_final_scan_on_close() {
        let mut scanner = StreamScanner::new();
        let line = completed_line("https://host/late.png", 0.5);
        let (head, tail) = line.split_at(line.len() - 4);

        scanner.push(head.as_bytes());
        scanner.push(tail.as_bytes());

        // The caller's end-of-stream path re-scans whatever is buffered
        let completion = scanner.finish().unwrap();
        assert_eq!(completion.media_url, "https://host/late.png");
    }

    #[test]
    fn test_first_terminal_record_wins() {
        let mut scanner = StreamScanner::new();
        let chunk = format!(
            "{}{}",
            completed_line("https://host/first.png", 1.0),
            completed_line("https://host/second.png", 2.0)
        );

        let completion = scanner.push(chunk.as_bytes()).unwrap();
        assert_eq!(completion.media_url, "https://host/first.png");
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let mut scanner = StreamScanner::new();
        let chunk = format!(
            "data: {{not json process_completed\ndata: \n{}",
            completed_line("https://host/ok.png", 3.0)
        );

        let completion = scanner.push(chunk.as_bytes()).unwrap();
        assert_eq!(completion.media_url, "https://host/ok.png");
    }

    #[test]
    fn test_unsuccessful_completion_is_ignored() {
        let mut scanner = StreamScanner::new();
        let chunk = "data: {\"msg\":\"process_completed\",\"success\":false,\"output\":{\"data\":[{\"url\":\"https://host/fail.png\"}]}}\n";

        assert_eq!(scanner.push(chunk.as_bytes()), None);
        assert_eq!(scanner.finish(), None);
    }

    #[test]
    fn test_intermediate_records_are_ignored() {
        let mut scanner = StreamScanner::new();
        let chunk = "data: {\"msg\":\"process_starts\"}\n\ndata: {\"msg\":\"estimation\",\"rank\":0}\n\n";

        assert_eq!(scanner.push(chunk.as_bytes()), None);
    }

    #[test]
    fn test_missing_duration_defaults_to_zero() {
        let mut scanner = StreamScanner::new();
        let chunk = "data: {\"msg\":\"process_completed\",\"success\":true,\"output\":{\"data\":[{\"url\":\"https://host/x.png\"}]}}\n";

        let completion = scanner.push(chunk.as_bytes()).unwrap();
        assert_eq!(completion.duration, 0.0);
    }
}
