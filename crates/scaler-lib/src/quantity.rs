//! Kubernetes resource quantity parsing
//!
//! The inventory reports quantities as strings ("4", "500m", "16Gi",
//! "129M", "128974848"). Conversion to CPU milli-units and memory bytes
//! uses exact integer arithmetic; truncation only happens at the final
//! division, matching how deltas are rounded elsewhere.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid resource quantity {0:?}")]
pub struct QuantityParseError(pub String);

/// Binary (power-of-two) suffixes
const BINARY_SUFFIXES: [(&str, i128); 6] = [
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("Pi", 1 << 50),
    ("Ei", 1 << 60),
];

/// Decimal (power-of-ten) suffixes
const DECIMAL_SUFFIXES: [(&str, i128); 6] = [
    ("k", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("E", 1_000_000_000_000_000_000),
];

/// Parse a CPU quantity into milli-units: "4" -> 4000, "500m" -> 500,
/// "2.5" -> 2500.
pub fn parse_cpu_millis(s: &str) -> Result<i64, QuantityParseError> {
    let (number, suffix) = split_suffix(s.trim());
    let (numerator, denominator) = match suffix {
        // The metrics API reports CPU in nanocores.
        "n" => (1, 1_000_000),
        "u" => (1, 1_000),
        "m" => (1, 1),
        "" => (1_000, 1),
        other => {
            let factor =
                decimal_factor(other).ok_or_else(|| QuantityParseError(s.to_string()))?;
            (1_000 * factor, 1)
        }
    };
    convert(s, number, numerator, denominator)
}

/// Parse a memory/storage/count quantity into base units (bytes for
/// memory): "16Gi" -> 17179869184, "129M" -> 129000000, "110" -> 110.
pub fn parse_bytes(s: &str) -> Result<i64, QuantityParseError> {
    let (number, suffix) = split_suffix(s.trim());
    let (numerator, denominator) = match suffix {
        "" => (1, 1),
        // Fractional units show up in metrics payloads; truncate to whole bytes.
        "n" => (1, 1_000_000_000),
        "u" => (1, 1_000_000),
        "m" => (1, 1_000),
        other => {
            let factor = binary_factor(other)
                .or_else(|| decimal_factor(other))
                .ok_or_else(|| QuantityParseError(s.to_string()))?;
            (factor, 1)
        }
    };
    convert(s, number, numerator, denominator)
}

fn binary_factor(suffix: &str) -> Option<i128> {
    BINARY_SUFFIXES
        .iter()
        .find(|(name, _)| *name == suffix)
        .map(|(_, factor)| *factor)
}

fn decimal_factor(suffix: &str) -> Option<i128> {
    DECIMAL_SUFFIXES
        .iter()
        .find(|(name, _)| *name == suffix)
        .map(|(_, factor)| *factor)
}

/// Split "1.5Gi" into ("1.5", "Gi")
fn split_suffix(s: &str) -> (&str, &str) {
    let boundary = s
        .find(|c: char| !c.is_ascii_digit() && c != '.' && c != '+' && c != '-')
        .unwrap_or(s.len());
    s.split_at(boundary)
}

/// number * numerator / denominator, truncating toward zero
fn convert(
    original: &str,
    number: &str,
    numerator: i128,
    denominator: i128,
) -> Result<i64, QuantityParseError> {
    let (mantissa, scale) =
        parse_number(number).ok_or_else(|| QuantityParseError(original.to_string()))?;
    let value = mantissa * numerator / (scale * denominator);
    i64::try_from(value).map_err(|_| QuantityParseError(original.to_string()))
}

/// Parse a decimal literal into (mantissa, scale) with value = mantissa/scale
fn parse_number(number: &str) -> Option<(i128, i128)> {
    let (sign, unsigned) = match number.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, number.strip_prefix('+').unwrap_or(number)),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (unsigned, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    // Bound the digit count so the i128 arithmetic cannot overflow.
    if int_part.len() > 20 || frac_part.len() > 18 {
        return None;
    }

    let mut mantissa: i128 = 0;
    for c in int_part.chars().chain(frac_part.chars()) {
        mantissa = mantissa * 10 + c.to_digit(10)? as i128;
    }
    let scale = 10_i128.pow(frac_part.len() as u32);
    Some((sign * mantissa, scale))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_whole_cores() {
        assert_eq!(parse_cpu_millis("4").unwrap(), 4000);
        assert_eq!(parse_cpu_millis("96").unwrap(), 96000);
    }

    #[test]
    fn test_cpu_millicores() {
        assert_eq!(parse_cpu_millis("500m").unwrap(), 500);
        assert_eq!(parse_cpu_millis("100m").unwrap(), 100);
    }

    #[test]
    fn test_cpu_fractional_cores() {
        assert_eq!(parse_cpu_millis("2.5").unwrap(), 2500);
        assert_eq!(parse_cpu_millis("0.1").unwrap(), 100);
    }

    #[test]
    fn test_cpu_nanocores_from_metrics_api() {
        // 137310448n cores = 137.310448m -> 137
        assert_eq!(parse_cpu_millis("137310448n").unwrap(), 137);
        assert_eq!(parse_cpu_millis("2500u").unwrap(), 2);
    }

    #[test]
    fn test_cpu_decimal_suffix() {
        // 4k cores = 4000 cores
        assert_eq!(parse_cpu_millis("4k").unwrap(), 4_000_000);
    }

    #[test]
    fn test_memory_binary_suffixes() {
        assert_eq!(parse_bytes("16Gi").unwrap(), 16 * (1 << 30));
        assert_eq!(parse_bytes("16384Mi").unwrap(), 16384 * (1 << 20));
        assert_eq!(parse_bytes("1.5Gi").unwrap(), 1_610_612_736);
    }

    #[test]
    fn test_memory_decimal_suffixes() {
        assert_eq!(parse_bytes("129M").unwrap(), 129_000_000);
        assert_eq!(parse_bytes("1G").unwrap(), 1_000_000_000);
    }

    #[test]
    fn test_plain_integers() {
        assert_eq!(parse_bytes("128974848").unwrap(), 128974848);
        // pods capacity is a bare count
        assert_eq!(parse_bytes("110").unwrap(), 110);
    }

    #[test]
    fn test_millibytes_truncate() {
        // 1500m bytes = 1.5 bytes -> 1
        assert_eq!(parse_bytes("1500m").unwrap(), 1);
    }

    #[test]
    fn test_negative_values_keep_sign() {
        assert_eq!(parse_cpu_millis("-1").unwrap(), -1000);
        assert_eq!(parse_bytes("-5Ki").unwrap(), -5120);
    }

    #[test]
    fn test_garbage_is_rejected() {
        for input in ["", "Gi", "1.2.3", "12X", "12E3", "four", "1..", "."] {
            assert!(parse_bytes(input).is_err(), "expected error for {input:?}");
        }
        assert!(parse_cpu_millis("1Ki").is_err());
    }
}
