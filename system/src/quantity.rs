use crate::{Result, SystemError};

const UNITS: &[(&str, i64)] = &[
    ("", 1),
    ("b", 1),
    ("B", 1),
    ("k", 1000),
    ("K", 1 << 10),
    ("KB", 1 << 10),
    ("Ki", 1 << 10),
    ("m", 1000 * 1000),
    ("M", 1 << 20),
    ("MB", 1 << 20),
    ("Mi", 1 << 20),
    ("g", 1000 * 1000 * 1000),
    ("G", 1 << 30),
    ("GB", 1 << 30),
    ("Gi", 1 << 30),
    ("t", 1000 * 1000 * 1000 * 1000),
    ("T", 1 << 40),
    ("TB", 1 << 40),
    ("Ti", 1 << 40),
];

/// Parses a byte quantity such as `512Mi`, `10G` or `4096`.
pub fn parse_bytes(raw: &str) -> Result<i64> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);

    if number.is_empty() {
        return Err(SystemError::Quantity(format!("no number in {:?}", raw)));
    }
    let value: i64 = number
        .parse()
        .map_err(|e| SystemError::Quantity(format!("{:?}: {}", raw, e)))?;
    let multiple = UNITS
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, m)| *m)
        .ok_or_else(|| SystemError::Quantity(format!("unknown unit {:?} in {:?}", unit, raw)))?;

    value
        .checked_mul(multiple)
        .ok_or_else(|| SystemError::Quantity(format!("{:?} overflows", raw)))
}

/// Renders bytes in the largest binary unit that divides them evenly.
pub fn format_bytes(bytes: i64) -> String {
    const NAMES: [&str; 5] = ["", "Ki", "Mi", "Gi", "Ti"];
    let mut value = bytes;
    let mut index = 0;
    while value != 0 && value % 1024 == 0 && index < NAMES.len() - 1 {
        value /= 1024;
        index += 1;
    }
    format!("{}{}", value, NAMES[index])
}
