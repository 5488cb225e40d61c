//! ABI payload encoding and fixed-point formatting for ERC-20 reads.
//!
//! Pure helpers shared by the chain reader and the balance pipeline:
//! build `balanceOf` / `decimals` calldata, decode hex-encoded integers
//! of arbitrary width, and render raw token amounts as decimal strings.

use anyhow::{anyhow, Result};
use num_bigint::{BigInt, BigUint, Sign};

/// 4-byte selector for `balanceOf(address)`.
pub const BALANCE_OF_SELECTOR: &str = "70a08231";

/// 4-byte selector for `decimals()`.
pub const DECIMALS_SELECTOR: &str = "313ce567";

/// `0x`-prefixed, 40 hex chars.
pub fn is_hex_address(s: &str) -> bool {
    s.len() == 42 && s.starts_with("0x") && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

/// Build `balanceOf(address)` calldata: selector + 32-byte padded address.
///
/// Inputs are not pre-validated anywhere in the system, so a malformed
/// address yields a malformed (but non-panicking) payload the RPC node
/// will reject on its own.
pub fn encode_balance_call(address: &str) -> String {
    let bare = strip_0x(address).to_lowercase();
    let padded = match hex::decode(&bare) {
        Ok(bytes) if bytes.len() <= 32 => {
            let mut word = [0u8; 32];
            word[32 - bytes.len()..].copy_from_slice(&bytes);
            hex::encode(word)
        }
        _ => format!("{bare:0>64}"),
    };
    format!("0x{BALANCE_OF_SELECTOR}{padded}")
}

/// Build `decimals()` calldata. No arguments, just the selector.
pub fn encode_decimals_call() -> String {
    format!("0x{DECIMALS_SELECTOR}")
}

/// Parse a hex-encoded unsigned integer of arbitrary width.
///
/// Empty input and a bare `"0x"` both decode to zero; anything that is not
/// valid hex is an error the caller is expected to swallow.
pub fn decode_big_integer(hex_str: &str) -> Result<BigUint> {
    let bare = strip_0x(hex_str.trim());
    if bare.is_empty() {
        return Ok(BigUint::from(0u32));
    }
    BigUint::parse_bytes(bare.as_bytes(), 16)
        .ok_or_else(|| anyhow!("invalid hex integer: {hex_str}"))
}

/// Render an integer as a decimal string with `decimals` fractional digits.
///
/// Sign is preserved, the integer string is zero-padded when shorter than
/// `decimals`, and trailing fractional zeros (plus a bare point) are
/// stripped. Negative `decimals` is treated as zero.
pub fn format_fixed_point(value: &BigInt, decimals: i64) -> String {
    let places = decimals.max(0) as usize;
    let sign = if value.sign() == Sign::Minus { "-" } else { "" };
    let mut digits = value.magnitude().to_string();
    if places == 0 {
        return format!("{sign}{digits}");
    }
    if digits.len() <= places {
        digits = format!("{digits:0>width$}", width = places + 1);
    }
    let split = digits.len() - places;
    let whole = &digits[..split];
    let frac = digits[split..].trim_end_matches('0');
    if frac.is_empty() {
        format!("{sign}{whole}")
    } else {
        format!("{sign}{whole}.{frac}")
    }
}
