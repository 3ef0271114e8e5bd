//! Duration formatting for log lines

/// Format a number of seconds as `H:MM:SS` (or `M:SS` under an hour)
///
/// Negative and non-finite inputs render as `0:00`.
pub fn format_hms(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hms_under_hour() {
        assert_eq!(format_hms(0.0), "0:00");
        assert_eq!(format_hms(59.9), "0:59");
        assert_eq!(format_hms(300.0), "5:00");
    }

    #[test]
    fn test_format_hms_over_hour() {
        assert_eq!(format_hms(3600.0), "1:00:00");
        assert_eq!(format_hms(5025.0), "1:23:45");
    }

    #[test]
    fn test_format_hms_invalid_input() {
        assert_eq!(format_hms(-5.0), "0:00");
        assert_eq!(format_hms(f64::NAN), "0:00");
    }
}
