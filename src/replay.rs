//! Offline replay of top-up events against an in-memory engine.
//!
//! Events name orders by a local reference; the replay remembers which trade
//! number each reference was issued, and plays provider notifications through
//! the sandbox provider.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::config::{ConfigStore, Settings};
use crate::engine::{TopupEngine, TopupError};
use crate::memory::{Account, MemoryStore};
use crate::model::{Ack, UserId};
use crate::provider::{SandboxProvider, TRADE_SUCCESS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayEvent {
    /// Register a user account.
    User {
        user: UserId,
        group: String,
        code: String,
    },
    /// Create an order, remembered under `reference`.
    Order {
        reference: String,
        user: UserId,
        amount: i64,
        method: String,
        promo_code: String,
    },
    /// Deliver a provider notification; the status defaults to a completed payment.
    Notify {
        reference: String,
        status: Option<String>,
    },
    /// Operator force-complete.
    Force { reference: String },
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("unknown order reference '{0}'")]
    UnknownReference(String),

    #[error(transparent)]
    Topup(#[from] TopupError),

    #[error("notification for order '{0}' was not acknowledged")]
    NotAcknowledged(String),
}

pub struct Replay {
    engine: TopupEngine,
    store: Arc<MemoryStore>,
    provider: Arc<SandboxProvider>,
    trade_nos: HashMap<String, String>,
}

/// Public API
impl Replay {
    pub fn new(settings: Settings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(SandboxProvider::new(settings.provider.clone()));
        let engine = TopupEngine::in_memory(
            Arc::new(ConfigStore::new(settings)),
            store.clone(),
            provider.clone(),
        );

        Self {
            engine,
            store,
            provider,
            trade_nos: HashMap::new(),
        }
    }

    /// Apply every event of the stream, in order.
    pub async fn run(&mut self, mut stream: impl Stream<Item = ReplayEvent> + Unpin) {
        while let Some(event) = stream.next().await {
            // a failed event never stops the replay
            if let Err(e) = self.apply(event).await {
                warn!("{e}");
            }
        }
    }

    /// Apply a single event
    pub async fn apply(&mut self, event: ReplayEvent) -> Result<(), ReplayError> {
        match event {
            ReplayEvent::User { user, group, code } => {
                self.store.add_account(Account::new(user, group, code));
            }
            ReplayEvent::Order {
                reference,
                user,
                amount,
                method,
                promo_code,
            } => {
                let created = self
                    .engine
                    .create_order(user, amount, &method, &promo_code)
                    .await?;
                info!(reference, trade_no = %created.trade_no, "order issued");
                self.trade_nos.insert(reference, created.trade_no);
            }
            ReplayEvent::Notify { reference, status } => {
                let trade_no = self.trade_no(&reference)?;
                let params = self
                    .provider
                    .notification(trade_no, status.as_deref().unwrap_or(TRADE_SUCCESS));
                if self.engine.handle_notification(&params).await == Ack::Fail {
                    return Err(ReplayError::NotAcknowledged(reference));
                }
            }
            ReplayEvent::Force { reference } => {
                let trade_no = self.trade_no(&reference)?.to_string();
                self.engine.admin_force_complete(&trade_no).await?;
            }
        }
        Ok(())
    }

    /// Final state of every account, ordered by id.
    pub fn accounts(&self) -> Vec<Account> {
        self.store.accounts()
    }
}

/// Private API
impl Replay {
    fn trade_no(&self, reference: &str) -> Result<&str, ReplayError> {
        self.trade_nos
            .get(reference)
            .map(String::as_str)
            .ok_or_else(|| ReplayError::UnknownReference(reference.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderSettings, RebatePolicy};
    use crate::engine::ValidationError;
    use rust_decimal::Decimal;

    // test utils

    fn settings() -> Settings {
        Settings {
            price: Decimal::ONE,
            pay_methods: vec!["alipay".to_string()],
            rebate: RebatePolicy {
                percent: 10,
                max_count: 3,
            },
            provider: ProviderSettings {
                address: "https://pay.example".to_string(),
                partner_id: "1001".to_string(),
                key: "secret".to_string(),
            },
            ..Settings::default()
        }
    }

    fn user(user: UserId, code: &str) -> ReplayEvent {
        ReplayEvent::User {
            user,
            group: "default".to_string(),
            code: code.to_string(),
        }
    }

    fn order(reference: &str, user: UserId, amount: i64, promo_code: &str) -> ReplayEvent {
        ReplayEvent::Order {
            reference: reference.to_string(),
            user,
            amount,
            method: "alipay".to_string(),
            promo_code: promo_code.to_string(),
        }
    }

    fn notify(reference: &str) -> ReplayEvent {
        ReplayEvent::Notify {
            reference: reference.to_string(),
            status: None,
        }
    }

    async fn replay(events: Vec<ReplayEvent>) -> Replay {
        let mut replay = Replay::new(settings());
        replay.run(tokio_stream::iter(events)).await;
        replay
    }

    // tests

    #[tokio::test]
    async fn order_then_notify_credits_payer_and_referrer() {
        let replay = replay(vec![
            user(1, "PAY1"),
            user(7, "REF7"),
            order("a", 1, 10, "REF7"),
            notify("a"),
            notify("a"),
        ])
        .await;

        let accounts = replay.accounts();
        assert_eq!(accounts[0].id, 1);
        assert_eq!(accounts[0].quota, 5_000_000);
        assert_eq!(accounts[0].topup_count, 1);
        assert_eq!(accounts[1].id, 7);
        assert_eq!(accounts[1].rebate_quota, 500_000);
    }

    #[tokio::test]
    async fn unpaid_notification_leaves_order_pending() {
        let replay = replay(vec![
            user(1, "PAY1"),
            order("a", 1, 10, ""),
            ReplayEvent::Notify {
                reference: "a".to_string(),
                status: Some("WAIT_BUYER_PAY".to_string()),
            },
        ])
        .await;

        assert_eq!(replay.accounts()[0].quota, 0);
    }

    #[tokio::test]
    async fn force_completes_pending_order() {
        let replay = replay(vec![
            user(1, "PAY1"),
            order("a", 1, 4, ""),
            ReplayEvent::Force {
                reference: "a".to_string(),
            },
        ])
        .await;

        assert_eq!(replay.accounts()[0].quota, 2_000_000);
    }

    #[tokio::test]
    async fn unknown_reference_is_an_error() {
        let mut replay = Replay::new(settings());
        let result = replay.apply(notify("missing")).await;
        assert!(matches!(result, Err(ReplayError::UnknownReference(r)) if r == "missing"));
    }

    #[tokio::test]
    async fn rejected_order_is_not_remembered() {
        let mut replay = Replay::new(settings());
        replay.apply(user(1, "PAY1")).await.unwrap();

        let result = replay
            .apply(ReplayEvent::Order {
                reference: "a".to_string(),
                user: 1,
                amount: 10,
                method: "paypal".to_string(),
                promo_code: String::new(),
            })
            .await;

        assert!(matches!(
            result,
            Err(ReplayError::Topup(TopupError::Validation(
                ValidationError::UnknownPaymentMethod(_)
            )))
        ));
        assert!(matches!(
            replay.apply(notify("a")).await,
            Err(ReplayError::UnknownReference(_))
        ));
    }
}
