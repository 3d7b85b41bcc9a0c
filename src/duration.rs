use std::time::Duration;

/// Formats a duration as `<h>h <m>m <s>s`, omitting zero components.
pub fn human_readable(d: Duration) -> String {
    let total = d.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    let chunks = [(hours, "h"), (minutes, "m"), (seconds, "s")];

    let parts: Vec<String> = chunks
        .iter()
        .filter(|(amount, _)| *amount != 0)
        .map(|(amount, suffix)| format!("{}{}", amount, suffix))
        .collect();

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_only() {
        assert_eq!(human_readable(Duration::from_secs(42)), "42s");
    }

    #[test]
    fn test_minutes_and_seconds() {
        assert_eq!(human_readable(Duration::from_secs(62)), "1m 2s");
    }

    #[test]
    fn test_hours_minutes_seconds() {
        assert_eq!(human_readable(Duration::from_secs(3723)), "1h 2m 3s");
    }

    #[test]
    fn test_omits_zero_components() {
        assert_eq!(human_readable(Duration::from_secs(3600)), "1h");
        assert_eq!(human_readable(Duration::from_secs(3605)), "1h 5s");
        assert_eq!(human_readable(Duration::from_secs(120)), "2m");
    }

    #[test]
    fn test_zero_duration() {
        assert_eq!(human_readable(Duration::from_secs(0)), "");
    }
}
