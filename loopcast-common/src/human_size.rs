//! Byte-size constants and human readable formatting

/// Bytes per gibibyte
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Format a byte count with a binary unit suffix (`1.5 GB`)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.1} {}", value, UNITS[unit])
}

/// Convert bytes to fractional gibibytes
pub fn bytes_to_gib(bytes: u64) -> f64 {
    bytes as f64 / GIB as f64
}
