const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{value:.2} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.2} PB")
}

pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let mins = (seconds % 3600) / 60;
    format!("{}d {}h {}m", days, hours, mins)
}

pub fn percent(used: f64, total: f64) -> f64 {
    if total <= 0.0 {
        0.0
    } else {
        (used / total) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_unit_boundaries() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1_048_576), "1.00 MB");
        assert_eq!(format_bytes(1_073_741_824), "1.00 GB");
        assert_eq!(format_bytes(1_099_511_627_776), "1.00 TB");
        assert_eq!(format_bytes(1_125_899_906_842_624), "1.00 PB");
    }

    #[test]
    fn bytes_formatting_is_monotonic_within_a_unit() {
        let a = format_bytes(2 * 1024 * 1024);
        let b = format_bytes(3 * 1024 * 1024);
        assert!(a.ends_with(" MB") && b.ends_with(" MB"));
        let parse = |s: &str| s.split(' ').next().unwrap().parse::<f64>().unwrap();
        assert!(parse(&a) < parse(&b));
    }

    #[test]
    fn uptime_days_hours_minutes() {
        assert_eq!(format_uptime(90_000), "1d 1h 0m");
        assert_eq!(format_uptime(0), "0d 0h 0m");
        assert_eq!(format_uptime(3_661), "0d 1h 1m");
    }

    #[test]
    fn percent_of_empty_total_is_zero() {
        assert_eq!(percent(5.0, 0.0), 0.0);
        assert_eq!(percent(1.0, 4.0), 25.0);
    }
}
