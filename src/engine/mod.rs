//! Top-up engine.
//!
//! Prices and creates orders, then settles them exactly once when the
//! payment provider confirms payment. Settlement of one trade number is
//! serialized by a per-order lock; the store's conditional status update
//! guards against other processes.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::config::{ConfigStore, Settings};
use crate::lock::{LockGuard, OrderLockRegistry};
use crate::memory::MemoryStore;
use crate::model::{Ack, Order, OrderStatus, Quota, ReferralSource, UserId};
use crate::price::{self, MIN_PAYABLE};
use crate::promo::{PromoGrant, validate_promo_code};
use crate::provider::{PaymentProvider, Purchase, PurchaseArgs, TradeStatus};
use crate::store::{AuditEntry, AuditKind, AuditLog, InvitationRebate, OrderStore, UserStore};
use crate::trade_no;

mod error;
pub use error::{ReconcileError, TopupError, ValidationError};

pub mod rebate;

/// Result of settling (or trying to settle) an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Quota credited to the payer, with the promo rebate if one was paid.
    Credited { quota: Quota, rebate: Option<Quota> },
    /// The order had already been settled.
    AlreadySettled,
    /// No order carries this trade number.
    UnknownOrder,
    /// The notification did not report a completed payment.
    NotPaid,
}

/// A freshly created, pending order and where to pay for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedOrder {
    pub trade_no: String,
    pub money: Decimal,
    pub purchase: Purchase,
}

/// The top-up engine.
pub struct TopupEngine {
    config: Arc<ConfigStore>,
    orders: Arc<dyn OrderStore>,
    users: Arc<dyn UserStore>,
    provider: Arc<dyn PaymentProvider>,
    audit: Arc<dyn AuditLog>,
    invitations: Arc<dyn InvitationRebate>,
    locks: OrderLockRegistry,
}

/// Public API
impl TopupEngine {
    pub fn new(
        config: Arc<ConfigStore>,
        orders: Arc<dyn OrderStore>,
        users: Arc<dyn UserStore>,
        provider: Arc<dyn PaymentProvider>,
        audit: Arc<dyn AuditLog>,
        invitations: Arc<dyn InvitationRebate>,
    ) -> Self {
        Self {
            config,
            orders,
            users,
            provider,
            audit,
            invitations,
            locks: OrderLockRegistry::new(),
        }
    }

    /// Engine backed entirely by one [`MemoryStore`].
    pub fn in_memory(
        config: Arc<ConfigStore>,
        store: Arc<MemoryStore>,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        Self::new(
            config,
            store.clone(),
            store.clone(),
            provider,
            store.clone(),
            store,
        )
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Money `user` would pay for `amount`, before any order is created.
    pub async fn quote_price(
        &self,
        user: UserId,
        amount: i64,
        promo_code: &str,
    ) -> Result<Decimal, TopupError> {
        let settings = self.config.snapshot();
        let (_, money) = self.price(&settings, user, amount, promo_code).await?;
        Ok(money)
    }

    /// Price the request, open a purchase with the provider and persist a pending order.
    pub async fn create_order(
        &self,
        user: UserId,
        amount: i64,
        payment_method: &str,
        promo_code: &str,
    ) -> Result<CreatedOrder, TopupError> {
        let settings = self.config.snapshot();
        let (grant, money) = self.price(&settings, user, amount, promo_code).await?;

        if !settings.allows_pay_method(payment_method) {
            return Err(ValidationError::UnknownPaymentMethod(payment_method.to_string()).into());
        }

        let trade_no = trade_no::encode(user, grant.owner, &trade_no::random_suffix());
        let purchase = self
            .provider
            .purchase(PurchaseArgs {
                payment_method: payment_method.to_string(),
                trade_no: trade_no.clone(),
                name: format!("TUC{amount}"),
                money: price::format_money(money),
                notify_url: format!("{}/api/user/epay/notify", settings.callback_address),
                return_url: format!("{}/console/log", settings.server_address),
            })
            .await?;

        let order = Order::pending(
            trade_no.clone(),
            user,
            price::normalize_amount(&settings, amount),
            money,
            payment_method.to_string(),
            ReferralSource::from_promo_owner(grant.owner),
        );
        self.orders.insert(&order).await?;

        info!(
            trade_no = %trade_no,
            user,
            amount,
            money = %price::format_money(money),
            referral = ?order.referral,
            "order created"
        );

        Ok(CreatedOrder {
            trade_no,
            money,
            purchase,
        })
    }

    /// Authenticate a provider notification and settle its order.
    ///
    /// Answers [`Ack::Fail`] when the notification is not genuine or when
    /// redelivery can still complete the order.
    pub async fn handle_notification(&self, params: &HashMap<String, String>) -> Ack {
        let verification = match self.provider.verify(params) {
            Ok(verification) => verification,
            Err(e) => {
                warn!(reason = %e, "notification rejected");
                return Ack::Fail;
            }
        };

        let result = self
            .reconcile(&verification.trade_no, &verification.trade_status)
            .await;
        Self::log_result("notification", &verification.trade_no, &result);

        match result {
            Err(e) if e.is_retryable() => Ack::Fail,
            _ => Ack::Success,
        }
    }

    /// Settle an order, completing it at most once.
    pub async fn reconcile(
        &self,
        trade_no: &str,
        trade_status: &TradeStatus,
    ) -> Result<Settlement, ReconcileError> {
        if !trade_status.is_success() {
            return Ok(Settlement::NotPaid);
        }

        let lock = self.locks.acquire(trade_no).await;
        self.settle(&lock, false).await
    }

    /// Operator repair: settle a pending order, or re-run crediting for an
    /// order that was settled without its quota being credited.
    pub async fn admin_force_complete(&self, trade_no: &str) -> Result<Settlement, TopupError> {
        if trade_no.is_empty() {
            return Err(ValidationError::EmptyTradeNo.into());
        }

        let lock = self.locks.acquire(trade_no).await;
        let result = self.settle(&lock, true).await;
        Self::log_result("force-complete", trade_no, &result);

        match result? {
            Settlement::UnknownOrder => {
                Err(ValidationError::UnknownOrder(trade_no.to_string()).into())
            }
            settlement => Ok(settlement),
        }
    }
}

/// Private API
impl TopupEngine {
    /// Small helper to log settlement results
    fn log_result(source: &str, trade_no: &str, result: &Result<Settlement, ReconcileError>) {
        match result {
            Ok(Settlement::Credited { quota, rebate }) => {
                info!(trade_no, quota, rebate = ?rebate, "{source} settled order");
            }
            Ok(Settlement::AlreadySettled) => {
                info!(trade_no, "{source} skipped: order already settled");
            }
            Ok(Settlement::UnknownOrder) => {
                warn!(trade_no, "{source} skipped: order not found");
            }
            Ok(Settlement::NotPaid) => {
                info!(trade_no, "{source} skipped: payment not completed");
            }
            Err(e) if e.is_retryable() => {
                warn!(trade_no, reason = %e, "{source} failed, order left pending");
            }
            Err(e) => {
                error!(
                    trade_no,
                    reason = %e,
                    "{source} failed after settling: quota not credited, needs force-complete"
                );
            }
        }
    }

    /// Validate the minimum, resolve the promo code and compute the payable money.
    async fn price(
        &self,
        settings: &Settings,
        user: UserId,
        amount: i64,
        promo_code: &str,
    ) -> Result<(PromoGrant, Decimal), TopupError> {
        let min = price::min_topup(settings);
        if amount < min {
            return Err(ValidationError::BelowMinimum { amount, min }.into());
        }

        let group = self.users.get_group(user).await?;
        let grant =
            validate_promo_code(self.users.as_ref(), &settings.rebate, promo_code, user).await;

        let money = price::compute_price(settings, amount, &group, grant.discount);
        // exactly 0.01 is payable, here and in create_order
        if money < MIN_PAYABLE {
            return Err(ValidationError::AmountTooLow(money).into());
        }

        Ok((grant, money))
    }

    /// Settle the order whose lock is held.
    ///
    /// - Pending orders move to success, then get credited
    /// - With `repair`, a settled but uncredited order is credited again
    /// - Anything else is already settled
    async fn settle(
        &self,
        lock: &LockGuard<String>,
        repair: bool,
    ) -> Result<Settlement, ReconcileError> {
        let trade_no = lock.key().as_str();
        let order = self
            .orders
            .get_by_trade_no(trade_no)
            .await
            .map_err(|source| ReconcileError::Lookup {
                trade_no: trade_no.to_string(),
                source,
            })?;

        let Some(order) = order else {
            return Ok(Settlement::UnknownOrder);
        };

        match order.status {
            OrderStatus::Pending => {}
            OrderStatus::Success if repair && !order.credited => {
                warn!(trade_no, user = order.user_id, "re-running credit for settled order");
                return self.credit(&order).await;
            }
            OrderStatus::Success => return Ok(Settlement::AlreadySettled),
        }

        let updated = self
            .orders
            .update_status(trade_no, OrderStatus::Pending, OrderStatus::Success)
            .await
            .map_err(|source| ReconcileError::StatusUpdate {
                trade_no: trade_no.to_string(),
                source,
            })?;

        // another process settled it between our read and the update
        if !updated {
            return Ok(Settlement::AlreadySettled);
        }

        self.credit(&order).await
    }

    /// Claim the order, credit the payer, then pay the rebate. Only the claim
    /// and the payer credit can fail the settlement.
    async fn credit(&self, order: &Order) -> Result<Settlement, ReconcileError> {
        let settings = self.config.snapshot();
        let quota = price::to_quota(&settings, order.amount);

        // the claim is conditional at the store: one claim per order, across processes
        let claimed = self
            .orders
            .claim_credit(&order.trade_no)
            .await
            .map_err(|source| ReconcileError::Credit {
                trade_no: order.trade_no.clone(),
                source,
            })?;
        if !claimed {
            warn!(trade_no = %order.trade_no, "order already credited, skipped");
            return Ok(Settlement::AlreadySettled);
        }

        if let Err(source) = self.users.increase_quota(order.user_id, quota, true).await {
            if let Err(e) = self.orders.release_credit(&order.trade_no).await {
                error!(
                    trade_no = %order.trade_no,
                    reason = %e,
                    "failed to release credit claim, order cannot be repaired"
                );
            }
            return Err(ReconcileError::Credit {
                trade_no: order.trade_no.clone(),
                source,
            });
        }

        if let Err(e) = self.users.increment_topup_count(order.user_id).await {
            warn!(user = order.user_id, reason = %e, "failed to count top-up");
        }

        let entry = AuditEntry {
            user: order.user_id,
            kind: AuditKind::Topup,
            message: format!(
                "online top-up succeeded, credited {quota} quota, paid {}",
                price::format_money(order.money)
            ),
        };
        if let Err(e) = self.audit.record(entry).await {
            warn!(user = order.user_id, reason = %e, "failed to record top-up audit entry");
        }

        let encoded = trade_no::decode(&order.trade_no);
        if encoded != order.referral.promo_owner() {
            warn!(
                trade_no = %order.trade_no,
                encoded = ?encoded,
                stored = ?order.referral,
                "trade number and stored referral disagree, using stored referral"
            );
        }

        let rebate = match order.referral {
            ReferralSource::PromoCode(referrer) => {
                rebate::apply_rebate(
                    self.users.as_ref(),
                    self.audit.as_ref(),
                    &settings.rebate,
                    referrer,
                    quota,
                )
                .await
            }
            ReferralSource::Relationship => {
                if let Err(e) = self
                    .invitations
                    .process_topup_rebate(order.user_id, quota)
                    .await
                {
                    warn!(user = order.user_id, reason = %e, "invitation rebate failed");
                }
                None
            }
        };

        Ok(Settlement::Credited { quota, rebate })
    }
}
