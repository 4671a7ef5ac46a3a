//! HTML rendering of log lines with severity classes.

use std::fmt;
use std::sync::OnceLock;

use chrono::Local;
use regex::Regex;

/// Severity derived from a line's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    const ERROR_WORDS: [&'static str; 4] = ["error", "exception", "fail", "critical"];
    const WARNING_WORDS: [&'static str; 2] = ["warn", "caution"];

    /// Case-insensitive keyword match; error words win over warning words.
    pub fn classify(content: &str) -> Self {
        let lower = content.to_lowercase();
        if Self::ERROR_WORDS.iter().any(|w| lower.contains(w)) {
            Severity::Error
        } else if Self::WARNING_WORDS.iter().any(|w| lower.contains(w)) {
            Severity::Warning
        } else {
            Severity::Info
        }
    }

    pub fn css_class(self) -> &'static str {
        match self {
            Severity::Info => "log-info",
            Severity::Warning => "log-warning",
            Severity::Error => "log-error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.css_class())
    }
}

fn timestamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\[([\d\-\s:]+)\]").expect("timestamp pattern is valid"))
}

/// Current local time with millisecond precision.
pub fn now_stamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Split a leading `[YYYY-MM-DD HH:MM:SS]` stamp from the rest of the line.
pub fn split_timestamp(line: &str) -> (Option<&str>, &str) {
    match timestamp_pattern().captures(line) {
        Some(caps) => {
            let whole = caps.get(0).map_or(0, |m| m.end());
            (caps.get(1).map(|m| m.as_str()), line[whole..].trim())
        }
        None => (None, line),
    }
}

/// Render one log line as a `log-line` div.
pub fn format_line(line: &str) -> String {
    let (stamp, content) = split_timestamp(line);
    let stamp = stamp.map(ToString::to_string).unwrap_or_else(now_stamp);
    let severity = Severity::classify(content);
    format!(
        "<div class='log-line'><span class='log-timestamp'>{}</span><span class='{}'>{}</span></div>",
        stamp,
        severity,
        escape_html(content)
    )
}

/// Render a buffer snapshot with a header line.
pub fn render_snapshot(lines: &[String]) -> String {
    let header = format!(
        "<div class='log-line'><span class='log-timestamp'>{}</span><span class='log-info'>Log Viewer - Last {} lines</span></div>\n",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        lines.len()
    );
    if lines.is_empty() {
        return header + "<div class='log-line'><span class='log-info'>No logs yet.</span></div>";
    }

    let mut rendered = Vec::with_capacity(lines.len());
    let mut prev: Option<&str> = None;
    for line in lines {
        if prev != Some(line.as_str()) {
            rendered.push(format_line(line));
        }
        prev = Some(line.as_str());
    }
    header + &rendered.join("\n")
}

/// Escape `& < > " '` for embedding in HTML text or attributes.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(Severity::classify("Got an ERROR here"), Severity::Error);
        assert_eq!(Severity::classify("Traceback: Exception raised"), Severity::Error);
        assert_eq!(Severity::classify("download FAILED"), Severity::Error);
        assert_eq!(Severity::classify("Warning: low vram"), Severity::Warning);
        assert_eq!(Severity::classify("proceed with Caution"), Severity::Warning);
        assert_eq!(Severity::classify("warn then error"), Severity::Error);
        assert_eq!(Severity::classify("model loaded"), Severity::Info);
    }

    #[test]
    fn test_bracketed_timestamp_kept() {
        let out = format_line("[2024-01-01 10:00:00]   Prompt executed");
        assert!(out.contains("<span class='log-timestamp'>2024-01-01 10:00:00</span>"));
        assert!(out.contains("<span class='log-info'>Prompt executed</span>"));
    }

    #[test]
    fn test_generated_timestamp_when_missing() {
        let before = Local::now().format("%Y-%m-%d").to_string();
        let out = format_line("plain line");
        let (_, rest) = out.split_once("<span class='log-timestamp'>").unwrap();
        let (stamp, _) = rest.split_once("</span>").unwrap();
        assert_eq!(stamp.len(), "2024-01-01 10:00:00.123".len());
        assert!(stamp.starts_with(&before[..4]));
        assert!(out.contains("<span class='log-info'>plain line</span>"));
    }

    #[test]
    fn test_non_timestamp_brackets_untouched() {
        let (stamp, content) = split_timestamp("[INFO] starting");
        assert!(stamp.is_none());
        assert_eq!(content, "[INFO] starting");
    }

    #[test]
    fn test_content_escaped() {
        let out = format_line("[2024-01-01 10:00:00] <script>alert('x') & \"y\"</script>");
        assert!(out.contains("&lt;script&gt;alert(&#x27;x&#x27;) &amp; &quot;y&quot;&lt;/script&gt;"));
        assert!(!out.contains("<script>"));
    }

    #[test]
    fn test_error_line_class() {
        let out = format_line("[2024-01-01 10:00:00] CUDA error: out of memory");
        assert!(out.contains("class='log-error'"));
    }

    #[test]
    fn test_render_snapshot() {
        let empty = render_snapshot(&[]);
        assert!(empty.contains("Last 0 lines"));
        assert!(empty.contains("No logs yet."));

        let lines = vec!["a".to_string(), "a".to_string(), "b".to_string()];
        let out = render_snapshot(&lines);
        assert!(out.contains("Last 3 lines"));
        assert_eq!(out.matches("<div class='log-line'>").count(), 3);
    }
}
