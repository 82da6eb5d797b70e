pub fn format_duration(seconds: i64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if mins > 0 {
        parts.push(format!("{}m", mins));
    }
    if secs > 0 || (days == 0 && hours == 0 && mins == 0) {
        parts.push(format!("{}s", secs));
    }

    parts.join(" ")
}

/// Countdown display, `M:SS`.
pub fn format_clock(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Completed-lane total, e.g. "1 hour and 20 minutes" or "40 minutes".
pub fn format_total(seconds: u64) -> String {
    let total_minutes = seconds as f64 / 60.0;
    let hours = (total_minutes / 60.0).floor() as u64;
    let minutes = (total_minutes % 60.0).round() as u64;

    let plural = |n: u64, unit: &str| {
        if n == 1 {
            format!("{} {}", n, unit)
        } else {
            format!("{} {}s", n, unit)
        }
    };

    if hours > 0 {
        format!("{} and {}", plural(hours, "hour"), plural(minutes, "minute"))
    } else {
        plural(minutes, "minute")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(1), "1s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(60), "1m");
        assert_eq!(format_duration(61), "1m 1s");
        assert_eq!(format_duration(3600), "1h");
        assert_eq!(format_duration(3661), "1h 1m 1s");
        assert_eq!(format_duration(86400), "1d");
        assert_eq!(format_duration(86400 + 3600 + 60 + 1), "1d 1h 1m 1s");
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0), "0:00");
        assert_eq!(format_clock(9), "0:09");
        assert_eq!(format_clock(600), "10:00");
        assert_eq!(format_clock(3725), "62:05");
    }

    #[test]
    fn test_format_total() {
        assert_eq!(format_total(0), "0 minutes");
        assert_eq!(format_total(60), "1 minute");
        assert_eq!(format_total(2400), "40 minutes");
        assert_eq!(format_total(3600), "1 hour and 0 minutes");
        assert_eq!(format_total(4800), "1 hour and 20 minutes");
        assert_eq!(format_total(7260), "2 hours and 1 minute");
    }
}
