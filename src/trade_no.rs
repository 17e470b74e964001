//! Trade number encoding.
//!
//! Format: `USR{payer}PROMO{owner}NO{suffix}` when a promo code was redeemed,
//! `USR{payer}NO{suffix}` otherwise. Already-issued trade numbers use this
//! exact layout, so it must not change.

use std::sync::LazyLock;

use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use regex::Regex;

use crate::model::UserId;

static PROMO_OWNER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^USR\d+PROMO(\d+)NO").expect("static trade number pattern")
});

/// Build a trade number. `promo_owner` of `None` (or 0) omits the promo tag.
pub fn encode(payer: UserId, promo_owner: Option<UserId>, suffix: &str) -> String {
    match promo_owner {
        Some(owner) if owner > 0 => format!("USR{payer}PROMO{owner}NO{suffix}"),
        _ => format!("USR{payer}NO{suffix}"),
    }
}

/// Promo owner embedded in a trade number, `None` when there is none.
pub fn decode(trade_no: &str) -> Option<UserId> {
    PROMO_OWNER
        .captures(trade_no)
        .and_then(|caps| caps.get(1))
        .and_then(|owner| owner.as_str().parse::<UserId>().ok())
        .filter(|owner| *owner > 0)
}

/// Unique suffix: six random alphanumerics followed by the Unix timestamp.
pub fn random_suffix() -> String {
    let random: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("{random}{}", Utc::now().timestamp())
}
