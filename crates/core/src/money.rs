use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Default VAT rate in percent, applied when a stored rate is absent or
/// unparseable.
pub fn default_vat_rate() -> Decimal {
    Decimal::new(7, 0)
}

/// Parses a stored VAT rate text into a percentage.
///
/// Absent or unparseable input falls back to [`default_vat_rate`]. A value
/// that parses but is negative is returned as-is so the caller surfaces it
/// as an input error instead of silently substituting the default.
pub fn parse_vat_rate(text: Option<&str>) -> Decimal {
    match text {
        Some(raw) => Decimal::from_str(raw.trim()).unwrap_or_else(|_| default_vat_rate()),
        None => default_vat_rate(),
    }
}

/// Derives the pre-tax price from a VAT-inclusive subtotal.
///
/// `subtotal / (1 + rate/100)`, rounded to exactly two decimal places with
/// round-half-up semantics. A rate of zero yields the subtotal unchanged
/// (modulo rounding).
pub fn price_before_vat(
    subtotal: Decimal,
    vat_rate_percent: Decimal,
) -> Result<Decimal, MoneyError> {
    if subtotal.is_sign_negative() {
        return Err(MoneyError::NegativeSubtotal(subtotal));
    }
    if vat_rate_percent.is_sign_negative() {
        return Err(MoneyError::NegativeRate(vat_rate_percent));
    }

    let divisor = Decimal::ONE + vat_rate_percent / Decimal::ONE_HUNDRED;
    Ok(round_money(subtotal / divisor))
}

/// Derives the pre-tax price for a billing note given the vendor's VAT
/// configuration.
///
/// For VAT-inclusive vendors the stored subtotal contains tax and must be
/// divided out; for VAT-exclusive vendors the subtotal already is the
/// pre-tax price and only rounding applies.
pub fn derive_price_before_vat(
    subtotal: Decimal,
    vat_rate_text: Option<&str>,
    vat_inclusive: bool,
) -> Result<Decimal, MoneyError> {
    if vat_inclusive {
        price_before_vat(subtotal, parse_vat_rate(vat_rate_text))
    } else if subtotal.is_sign_negative() {
        Err(MoneyError::NegativeSubtotal(subtotal))
    } else {
        Ok(round_money(subtotal))
    }
}

/// Rounds to two fractional digits, half-up. The result always carries
/// exactly two fractional digits, so exact quotients render as `100.00`
/// rather than `100`.
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// Monetary input errors. Never coerced; always surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("subtotal must not be negative (got {0})")]
    NegativeSubtotal(Decimal),
    #[error("vat rate must not be negative (got {0})")]
    NegativeRate(Decimal),
}
