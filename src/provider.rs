//! Payment provider interface.
//!
//! The provider owns its signature scheme and purchase-page protocol; the
//! engine only sees verified notifications and purchase redirects.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ProviderSettings;

/// Trade status value the provider sends for a completed payment.
pub const TRADE_SUCCESS: &str = "TRADE_SUCCESS";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("payment provider is not configured")]
    NotConfigured,

    #[error("notification signature is invalid")]
    SignatureInvalid,

    #[error("notification is missing '{0}'")]
    MissingField(&'static str),

    #[error("failed to create purchase: {0}")]
    Purchase(String),
}

/// Trade status reported by a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeStatus {
    Success,
    Other(String),
}

impl TradeStatus {
    pub fn parse(raw: &str) -> Self {
        if raw == TRADE_SUCCESS {
            TradeStatus::Success
        } else {
            TradeStatus::Other(raw.to_string())
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TradeStatus::Success)
    }
}

/// A notification whose signature has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub trade_no: String,
    pub trade_status: TradeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseArgs {
    pub payment_method: String,
    pub trade_no: String,
    pub name: String,
    /// Money, already formatted to two decimals.
    pub money: String,
    pub notify_url: String,
    pub return_url: String,
}

/// Where to send the payer, and the form to post there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purchase {
    pub uri: String,
    pub params: HashMap<String, String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Authenticate a raw notification.
    fn verify(&self, params: &HashMap<String, String>) -> Result<Verification, ProviderError>;

    async fn purchase(&self, args: PurchaseArgs) -> Result<Purchase, ProviderError>;
}

/// Provider stand-in for replays and tests: a notification is genuine when
/// its `sign` equals the configured key.
pub struct SandboxProvider {
    settings: ProviderSettings,
}

impl SandboxProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }

    /// Parameters of a genuine notification for `trade_no`.
    pub fn notification(&self, trade_no: &str, trade_status: &str) -> HashMap<String, String> {
        HashMap::from([
            ("out_trade_no".to_string(), trade_no.to_string()),
            ("trade_status".to_string(), trade_status.to_string()),
            ("sign".to_string(), self.settings.key.clone()),
        ])
    }
}

#[async_trait]
impl PaymentProvider for SandboxProvider {
    fn verify(&self, params: &HashMap<String, String>) -> Result<Verification, ProviderError> {
        if !self.settings.is_configured() {
            return Err(ProviderError::NotConfigured);
        }

        let sign = params
            .get("sign")
            .ok_or(ProviderError::MissingField("sign"))?;
        if *sign != self.settings.key {
            return Err(ProviderError::SignatureInvalid);
        }

        let trade_no = params
            .get("out_trade_no")
            .ok_or(ProviderError::MissingField("out_trade_no"))?;
        let trade_status = params
            .get("trade_status")
            .ok_or(ProviderError::MissingField("trade_status"))?;

        Ok(Verification {
            trade_no: trade_no.clone(),
            trade_status: TradeStatus::parse(trade_status),
        })
    }

    async fn purchase(&self, args: PurchaseArgs) -> Result<Purchase, ProviderError> {
        if !self.settings.is_configured() {
            return Err(ProviderError::NotConfigured);
        }

        let params = HashMap::from([
            ("pid".to_string(), self.settings.partner_id.clone()),
            ("type".to_string(), args.payment_method),
            ("out_trade_no".to_string(), args.trade_no),
            ("name".to_string(), args.name),
            ("money".to_string(), args.money),
            ("notify_url".to_string(), args.notify_url),
            ("return_url".to_string(), args.return_url),
        ]);

        Ok(Purchase {
            uri: format!("{}/submit.php", self.settings.address.trim_end_matches('/')),
            params,
        })
    }
}
