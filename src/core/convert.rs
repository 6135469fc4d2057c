//! Currency conversion through the base currency pivot

use super::error::RateError;
use super::rates::RateTable;
use rust_decimal::{Decimal, RoundingStrategy};

pub const DEFAULT_DECIMAL_PLACES: u32 = 4;

/// Converts `amount` of `src` into `dst` using `table`.
///
/// Computes `amount * rates[dst] / rates[src]` at full precision; callers
/// quantize the result for display with [`quantize`].
pub fn convert(
    amount: Decimal,
    src: &str,
    dst: &str,
    table: &RateTable,
) -> Result<Decimal, RateError> {
    let src_rate = table
        .rate(src)
        .ok_or_else(|| RateError::UnknownCurrency(src.to_string()))?;
    let dst_rate = table
        .rate(dst)
        .ok_or_else(|| RateError::UnknownCurrency(dst.to_string()))?;

    if src == dst {
        return Ok(amount);
    }

    amount
        .checked_mul(dst_rate)
        .and_then(|scaled| scaled.checked_div(src_rate))
        .ok_or_else(|| RateError::ConversionOverflow {
            amount: amount.to_string(),
            from: src.to_string(),
            to: dst.to_string(),
        })
}

/// Rounds half-up to `places` fractional digits, padding with zeros so the
/// value always displays with exactly that many digits.
pub fn quantize(value: Decimal, places: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(places);
    rounded
}
