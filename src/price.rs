//! Payable-money computation.
//!
//! All steps run on [`Decimal`]; rounding to cents happens only in
//! [`format_money`], at the edge where money leaves the engine.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::{DisplayMode, Settings};
use crate::model::Quota;

/// Smallest payable amount accepted from a price computation.
pub const MIN_PAYABLE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Compute the money payable for a requested top-up.
///
/// Steps, in order:
/// - tokens display mode: convert `amount` to currency units
/// - multiply by the base price and the group ratio
/// - apply the preset discount keyed by the requested `amount`
/// - apply the promo discount
pub fn compute_price(
    settings: &Settings,
    amount: i64,
    group: &str,
    promo_discount: Decimal,
) -> Decimal {
    let mut units = Decimal::from(amount);
    if settings.display_mode == DisplayMode::Tokens {
        units = units
            .checked_div(settings.quota_per_unit)
            .unwrap_or(Decimal::ZERO);
    }

    units * settings.price
        * settings.group_ratio(group)
        * settings.amount_discount(amount)
        * promo_discount
}

/// Minimum requested amount, in the units the caller requests in.
pub fn min_topup(settings: &Settings) -> i64 {
    match settings.display_mode {
        DisplayMode::Currency => settings.min_topup,
        DisplayMode::Tokens => to_quota(settings, settings.min_topup),
    }
}

/// Requested amount as stored on the order (currency units, truncated).
pub fn normalize_amount(settings: &Settings, amount: i64) -> i64 {
    match settings.display_mode {
        DisplayMode::Currency => amount,
        DisplayMode::Tokens => Decimal::from(amount)
            .checked_div(settings.quota_per_unit)
            .and_then(|units| i64::try_from(units.trunc()).ok())
            .unwrap_or(0),
    }
}

/// Quota credited for an amount of currency units (truncated).
pub fn to_quota(settings: &Settings, units: i64) -> Quota {
    (Decimal::from(units) * settings.quota_per_unit)
        .trunc()
        .try_into()
        .unwrap_or(Quota::MAX)
}

/// Money as presented to the provider and the user: two decimals.
pub fn format_money(money: Decimal) -> String {
    let rounded = money.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    format!("{rounded:.2}")
}
