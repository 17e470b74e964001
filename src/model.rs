//! Core domain types for the top-up engine.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// User identifier.
pub type UserId = i64;

/// Quota units credited to (or spent from) an account.
pub type Quota = i64;

/// Lifecycle of an order. `Pending -> Success` is the only legal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderStatus {
    /// Created, waiting for the provider to confirm payment.
    #[default]
    Pending,
    /// Payment confirmed. Terminal.
    Success,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Success => "success",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who gets rebated when an order settles. Decided once, when the order is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferralSource {
    /// The payer redeemed another user's promo code.
    PromoCode(UserId),
    /// No promo code; the payer's invitation graph decides.
    #[default]
    Relationship,
}

impl ReferralSource {
    pub fn from_promo_owner(owner: Option<UserId>) -> Self {
        match owner {
            Some(owner) if owner > 0 => ReferralSource::PromoCode(owner),
            _ => ReferralSource::Relationship,
        }
    }

    pub fn promo_owner(&self) -> Option<UserId> {
        match self {
            ReferralSource::PromoCode(owner) => Some(*owner),
            ReferralSource::Relationship => None,
        }
    }
}

/// One top-up attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub trade_no: String,
    pub user_id: UserId,
    /// Requested amount in currency units (already normalized from tokens).
    pub amount: i64,
    /// Payable money, computed once at creation.
    pub money: Decimal,
    pub payment_method: String,
    pub status: OrderStatus,
    pub referral: ReferralSource,
    /// Set once quota has been credited for this order.
    pub credited: bool,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Create a new order in the `Pending` state.
    pub fn pending(
        trade_no: String,
        user_id: UserId,
        amount: i64,
        money: Decimal,
        payment_method: String,
        referral: ReferralSource,
    ) -> Self {
        Self {
            trade_no,
            user_id,
            amount,
            money,
            payment_method,
            status: OrderStatus::Pending,
            referral,
            credited: false,
            created_at: Utc::now(),
        }
    }
}

/// Acknowledgement written back to the payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Success,
    Fail,
}

impl Ack {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ack::Success => "success",
            Ack::Fail => "fail",
        }
    }
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
