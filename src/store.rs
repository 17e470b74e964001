//! Collaborator interfaces the engine persists through.
//!
//! The engine never owns order or account state; it reads and writes through
//! these traits. Implementations must make [`OrderStore::update_status`] and
//! the `increase_*` operations atomic at the storage layer, since the
//! in-process order lock does not cover other processes.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Order, OrderStatus, Quota, UserId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("order {0} already exists")]
    DuplicateOrder(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<(), StoreError>;

    async fn get_by_trade_no(&self, trade_no: &str) -> Result<Option<Order>, StoreError>;

    /// Move an order from `from` to `to`. Returns `false` when the current status is not `from`.
    async fn update_status(
        &self,
        trade_no: &str,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError>;

    /// Claim the right to credit an order by flagging it credited. Returns
    /// `false` when the order was already claimed or does not exist.
    async fn claim_credit(&self, trade_no: &str) -> Result<bool, StoreError>;

    /// Undo a claim whose credit failed, so a repair can credit the order again.
    async fn release_credit(&self, trade_no: &str) -> Result<(), StoreError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_group(&self, user: UserId) -> Result<String, StoreError>;

    /// Number of top-ups the user has completed.
    async fn get_topup_count(&self, user: UserId) -> Result<i64, StoreError>;

    async fn increment_topup_count(&self, user: UserId) -> Result<(), StoreError>;

    /// Credit spendable quota.
    async fn increase_quota(
        &self,
        user: UserId,
        quota: Quota,
        notify: bool,
    ) -> Result<(), StoreError>;

    /// Credit the rebate accumulator (tracked apart from spendable quota).
    /// Implementations raise the user's lifetime rebate total by the same amount.
    async fn increase_rebate_quota(&self, user: UserId, quota: Quota) -> Result<(), StoreError>;

    /// Owner of a referral code, if any.
    async fn resolve_referral_code(&self, code: &str) -> Result<Option<UserId>, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    Topup,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub user: UserId,
    pub kind: AuditKind,
    pub message: String,
}

/// Per-user audit trail.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), StoreError>;
}

/// Rebate driven by who invited the payer. Used when an order carries no promo code.
#[async_trait]
pub trait InvitationRebate: Send + Sync {
    async fn process_topup_rebate(&self, user: UserId, quota: Quota) -> Result<(), StoreError>;
}
