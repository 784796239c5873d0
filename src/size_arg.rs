//! Purpose: Parse `--size` values such as `4096`, `64k`, or `400M`.
//! Exports: `parse_size`.
//! Role: clap value parser for the CLI; units are powers of 1024.
//! Invariants: Zero, negative, overflowing, or unknown-unit sizes are rejected.

pub(crate) fn parse_size(value: &str) -> Result<u64, String> {
    let split = value
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let base: u64 = digits.parse().map_err(|_| "invalid size".to_string())?;
    let multiplier: u64 = match unit {
        "" | "b" | "B" => 1,
        "k" | "K" => 1024,
        "m" | "M" => 1024 * 1024,
        "g" | "G" => 1024 * 1024 * 1024,
        _ => return Err("invalid size".to_string()),
    };
    match base.checked_mul(multiplier) {
        Some(size) if size > 0 => Ok(size),
        _ => Err("invalid size".to_string()),
    }
}
