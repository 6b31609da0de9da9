//! Parse Kubernetes resource Quantity strings into the cache's resource
//! units: CPU to fractional cores, memory and storage to whole MB, device
//! counts to floats.

/// Parse a CPU quantity (e.g. "500m", "1", "2.5") to cores.
pub fn parse_cpu_cores(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(m) = s.strip_suffix('m') {
        if let Ok(n) = m.parse::<f64>() {
            return Some(n / 1000.0);
        }
        return None;
    }
    s.parse::<f64>().ok()
}

/// Parse a memory/storage quantity (e.g. "256Mi", "1Gi", "2G") to MB.
/// Binary suffixes (Ki/Mi/Gi/...) and decimal ones (K/M/G/...) both map
/// onto 1024-based MB, which is how the backends advertise them.
pub fn parse_quantity_mb(s: &str) -> Option<u64> {
    let bytes = parse_quantity_bytes(s)?;
    Some(bytes / (1024 * 1024))
}

fn parse_quantity_bytes(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let s = s.replace('i', "");
    let (num_str, unit) = if s.ends_with('K') {
        (s.trim_end_matches('K'), 1024_u64)
    } else if s.ends_with('M') {
        (s.trim_end_matches('M'), 1024 * 1024)
    } else if s.ends_with('G') {
        (s.trim_end_matches('G'), 1024 * 1024 * 1024)
    } else if s.ends_with('T') {
        (s.trim_end_matches('T'), 1024_u64 * 1024 * 1024 * 1024)
    } else if s.ends_with('P') {
        (s.trim_end_matches('P'), 1024_u64 * 1024 * 1024 * 1024 * 1024)
    } else if let Ok(n) = s.parse::<u64>() {
        return Some(n);
    } else {
        return None;
    };
    let n: u64 = num_str.parse().ok()?;
    Some(n * unit)
}

/// Parse a device-count quantity (e.g. "1", "2") such as nvidia.com/gpu.
pub fn parse_quantity_count(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_cores() {
        assert_eq!(parse_cpu_cores("500m"), Some(0.5));
        assert_eq!(parse_cpu_cores("1"), Some(1.0));
        assert_eq!(parse_cpu_cores("2.5"), Some(2.5));
        assert_eq!(parse_cpu_cores(""), None);
        assert_eq!(parse_cpu_cores("abc"), None);
    }

    #[test]
    fn test_parse_quantity_mb() {
        assert_eq!(parse_quantity_mb("256Mi"), Some(256));
        assert_eq!(parse_quantity_mb("1Gi"), Some(1024));
        assert_eq!(parse_quantity_mb("2G"), Some(2048));
        assert_eq!(parse_quantity_mb("1048576"), Some(1));
        assert_eq!(parse_quantity_mb("512Ki"), Some(0));
    }
}
