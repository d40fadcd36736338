//! Utility functions

/// Format seconds as `m:ss`
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}

/// Format the time left in a track as `m:ss`
pub fn format_remaining(position: f64, duration: f64) -> String {
    format_time((duration - position).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(59.9), "0:59");
        assert_eq!(format_time(61.0), "1:01");
        assert_eq!(format_time(3600.0), "60:00");
        assert_eq!(format_time(-3.0), "0:00");
        assert_eq!(format_time(f64::NAN), "0:00");
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(15.0, 30.0), "0:15");
        assert_eq!(format_remaining(40.0, 30.0), "0:00");
    }
}
