//! Display helpers for hex strings and token amounts.

use alloy_primitives::U256;

/// Ensures a hex string carries a `0x` prefix.
pub fn with_0x_prefix(s: &str) -> String {
	if s.starts_with("0x") {
		s.to_string()
	} else {
		format!("0x{}", s)
	}
}

/// Strips a `0x` prefix if present.
pub fn without_0x_prefix(s: &str) -> &str {
	s.strip_prefix("0x").unwrap_or(s)
}

/// Renders a raw token amount as a decimal string for log lines.
///
/// `1234500` at 6 decimals becomes `1.2345`; trailing zeros in the
/// fraction are trimmed.
pub fn format_token_amount(amount: U256, decimals: u8) -> String {
	if decimals == 0 {
		return amount.to_string();
	}
	let scale = U256::from(10u64).pow(U256::from(decimals));
	let integer = amount / scale;
	let fraction = amount % scale;
	if fraction.is_zero() {
		return integer.to_string();
	}
	let fraction = format!("{:0width$}", fraction, width = decimals as usize);
	let fraction = fraction.trim_end_matches('0');
	format!("{}.{}", integer, fraction)
}
