use chrono::Duration;

/// Format a remaining duration as `m:ss` for the session countdown.
/// Negative durations clamp to `0:00`.
pub fn format_countdown(remaining: Duration) -> String {
    let total_secs = remaining.num_seconds().max(0);
    format!("{}:{:02}", total_secs / 60, total_secs % 60)
}

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_countdown() {
        assert_eq!(format_countdown(Duration::seconds(90)), "1:30");
        assert_eq!(format_countdown(Duration::seconds(120)), "2:00");
        assert_eq!(format_countdown(Duration::seconds(5)), "0:05");
        assert_eq!(format_countdown(Duration::seconds(-10)), "0:00"); // Clamped
        assert_eq!(format_countdown(Duration::milliseconds(59_999)), "0:59");
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("Hello", 10), "Hello");
        assert_eq!(truncate_string("Hello World", 8), "Hello...");
        assert_eq!(truncate_string("Hi", 2), "Hi");
    }
}
