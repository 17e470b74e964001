//! Promo-code validation.
//!
//! A promo code is another user's referral code. Redeeming it discounts the
//! payer's price and, once the order settles, rebates the code's owner.

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::RebatePolicy;
use crate::model::UserId;
use crate::price::MIN_PAYABLE;
use crate::store::UserStore;

/// Outcome of validating a promo code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromoGrant {
    /// Owner of the code, `None` when the code was not accepted.
    pub owner: Option<UserId>,
    /// Price multiplier; 1 means no discount.
    pub discount: Decimal,
}

impl PromoGrant {
    pub const NONE: PromoGrant = PromoGrant {
        owner: None,
        discount: Decimal::ONE,
    };
}

/// Validate `code` for `user` against `policy`.
///
/// Any failed check yields [`PromoGrant::NONE`]; store errors count as a
/// failed check.
pub async fn validate_promo_code(
    users: &dyn UserStore,
    policy: &RebatePolicy,
    code: &str,
    user: UserId,
) -> PromoGrant {
    if code.is_empty() {
        return PromoGrant::NONE;
    }

    let owner = match users.resolve_referral_code(code).await {
        Ok(Some(owner)) if owner > 0 => owner,
        Ok(_) => {
            debug!(user, code, "promo code not found");
            return PromoGrant::NONE;
        }
        Err(e) => {
            debug!(user, code, reason = %e, "promo code lookup failed");
            return PromoGrant::NONE;
        }
    };

    if owner == user {
        debug!(user, "promo code belongs to the payer");
        return PromoGrant::NONE;
    }

    if !policy.is_enabled() {
        debug!(
            percent = policy.percent,
            max_count = policy.max_count,
            "promo rebate disabled"
        );
        return PromoGrant::NONE;
    }

    let topup_count = match users.get_topup_count(user).await {
        Ok(count) => count,
        Err(e) => {
            debug!(user, reason = %e, "failed to read top-up count");
            return PromoGrant::NONE;
        }
    };
    if topup_count >= policy.max_count {
        debug!(
            user,
            topup_count,
            max_count = policy.max_count,
            "promo code cap reached"
        );
        return PromoGrant::NONE;
    }

    let discount = (Decimal::ONE - Decimal::new(policy.percent, 2)).max(MIN_PAYABLE);
    debug!(user, owner, %discount, "promo code accepted");

    PromoGrant {
        owner: Some(owner),
        discount,
    }
}
