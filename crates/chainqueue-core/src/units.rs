//! Unit conversion for transaction values.
//!
//! Values arrive in the chain's smallest unit (wei) and are stored as a
//! decimal string in display units (ether). All arithmetic is done on
//! [`U256`] so the result never depends on floating point.

use alloy_primitives::U256;

/// Maximum number of fractional digits kept in a stored value.
pub const MAX_FRACTION_DIGITS: u32 = 9;

/// Decimals of the native unit on EVM chains (1 ether = 10^18 wei).
pub const ETHER_DECIMALS: u32 = 18;

/// Largest `decimals` whose unit (10^decimals) still fits in a [`U256`].
pub const MAX_DECIMALS: u32 = 77;

/// Convert `raw` (smallest unit) into a display-unit decimal string.
///
/// A fraction of at most nine significant digits is rendered exactly, with
/// trailing zeros trimmed. A longer fraction is rounded half-up to exactly
/// nine digits, carrying into the integer part when it overflows.
///
/// ```
/// use alloy_primitives::U256;
/// use chainqueue_core::units::normalize_value;
///
/// let two_ether = U256::from(2_000_000_000_000_000_000u128);
/// assert_eq!(normalize_value(two_ether, 18), "2");
/// ```
pub fn normalize_value(raw: U256, decimals: u32) -> String {
    let unit = pow10(decimals);
    let whole = raw / unit;
    let fraction = raw % unit;

    if fraction.is_zero() {
        return whole.to_string();
    }

    if decimals <= MAX_FRACTION_DIGITS {
        return format!("{whole}.{}", trimmed_fraction(fraction, decimals));
    }

    let scale = pow10(decimals - MAX_FRACTION_DIGITS);
    if (fraction % scale).is_zero() {
        return format!(
            "{whole}.{}",
            trimmed_fraction(fraction / scale, MAX_FRACTION_DIGITS)
        );
    }

    let half = scale / U256::from(2u8);
    let mut rounded = (fraction + half) / scale;
    let mut whole = whole;
    if rounded >= pow10(MAX_FRACTION_DIGITS) {
        whole += U256::from(1u8);
        rounded = U256::ZERO;
    }
    // rounded < 10^9, always fits
    let digits = rounded.to::<u64>();
    format!("{whole}.{digits:0width$}", width = MAX_FRACTION_DIGITS as usize)
}

/// Parse a display-unit decimal string back into the smallest unit.
///
/// Used by readers that need to sum or compare stored values. Returns `None`
/// on malformed input or when the string carries more fractional digits
/// than `decimals`.
pub fn parse_display_value(value: &str, decimals: u32) -> Option<U256> {
    let (whole, fraction) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    if whole.is_empty() || fraction.len() > decimals as usize {
        return None;
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let whole = U256::from_str_radix(whole, 10).ok()?;
    let fraction_value = if fraction.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(fraction, 10).ok()? * pow10(decimals - fraction.len() as u32)
    };
    whole.checked_mul(pow10(decimals))?.checked_add(fraction_value)
}

fn pow10(exp: u32) -> U256 {
    U256::from(10u8).pow(U256::from(exp))
}

/// Zero-pad `fraction` to `width` digits and strip trailing zeros.
fn trimmed_fraction(fraction: U256, width: u32) -> String {
    let padded = format!("{:0>width$}", fraction.to_string(), width = width as usize);
    padded.trim_end_matches('0').to_string()
}
