//! Top-up settings and the process-wide store that hands out snapshots of them.
//!
//! Every operation takes one [`Settings`] snapshot at entry and uses it to the
//! end, so a concurrent [`ConfigStore::replace`] never shows up half-applied.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::info;

/// Errors raised while loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// How user-facing top-up amounts are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Amounts are currency units.
    #[default]
    Currency,
    /// Amounts are token (quota) counts.
    Tokens,
}

/// Promo-code rebate policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct RebatePolicy {
    /// Percentage (0-100) of credited quota paid to the promo owner, and
    /// discount granted to the redeemer.
    pub percent: i64,
    /// How many top-ups a single payer may make with a promo code.
    pub max_count: i64,
}

impl RebatePolicy {
    pub fn is_enabled(&self) -> bool {
        self.percent > 0 && self.max_count > 0
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if !(0..=100).contains(&self.percent) {
            return Err(SettingsError::Invalid(format!(
                "rebate percent {} is outside 0..=100",
                self.percent
            )));
        }
        if self.max_count < 0 {
            return Err(SettingsError::Invalid(format!(
                "rebate max count {} is negative",
                self.max_count
            )));
        }
        Ok(())
    }
}

/// Connection details of the payment provider.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub address: String,
    pub partner_id: String,
    pub key: String,
}

impl ProviderSettings {
    pub fn is_configured(&self) -> bool {
        !self.address.is_empty() && !self.partner_id.is_empty() && !self.key.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Price of one currency unit of quota.
    pub price: Decimal,
    /// Quota units per currency unit.
    pub quota_per_unit: Decimal,
    pub display_mode: DisplayMode,
    /// Minimum requested amount, in currency units.
    pub min_topup: i64,
    /// Per-group price ratios. Missing or zero means 1.
    pub group_ratios: HashMap<String, Decimal>,
    /// Preset discounts keyed by the exact requested amount.
    #[serde(deserialize_with = "amount_keyed")]
    pub amount_discounts: HashMap<i64, Decimal>,
    /// Allowed payment method tags.
    pub pay_methods: Vec<String>,
    pub rebate: RebatePolicy,
    pub provider: ProviderSettings,
    pub server_address: String,
    pub callback_address: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            price: Decimal::new(73, 1),
            quota_per_unit: Decimal::from(500_000),
            display_mode: DisplayMode::Currency,
            min_topup: 1,
            group_ratios: HashMap::new(),
            amount_discounts: HashMap::new(),
            pay_methods: vec!["alipay".to_string(), "wxpay".to_string()],
            rebate: RebatePolicy::default(),
            provider: ProviderSettings::default(),
            server_address: String::new(),
            callback_address: String::new(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, overridden by `TOPUP__*` environment variables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("TOPUP").separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.quota_per_unit <= Decimal::ZERO {
            return Err(SettingsError::Invalid(format!(
                "quota_per_unit must be positive, got {}",
                self.quota_per_unit
            )));
        }
        if self.price < Decimal::ZERO {
            return Err(SettingsError::Invalid(format!(
                "price must not be negative, got {}",
                self.price
            )));
        }
        self.rebate.validate()
    }

    /// Price ratio for a user group, 1 when unset or zero.
    pub fn group_ratio(&self, group: &str) -> Decimal {
        match self.group_ratios.get(group) {
            Some(ratio) if !ratio.is_zero() => *ratio,
            _ => Decimal::ONE,
        }
    }

    /// Preset discount for an exact requested amount, 1 when unset or non-positive.
    pub fn amount_discount(&self, amount: i64) -> Decimal {
        match self.amount_discounts.get(&amount) {
            Some(discount) if *discount > Decimal::ZERO => *discount,
            _ => Decimal::ONE,
        }
    }

    pub fn allows_pay_method(&self, method: &str) -> bool {
        self.pay_methods.iter().any(|m| m == method)
    }
}

/// Map keys arrive as strings from TOML tables; the discount table is keyed by amount.
fn amount_keyed<'de, D>(deserializer: D) -> Result<HashMap<i64, Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = HashMap::<String, Decimal>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, discount)| {
            key.trim()
                .parse::<i64>()
                .map(|amount| (amount, discount))
                .map_err(|_| serde::de::Error::custom(format!("invalid discount amount '{key}'")))
        })
        .collect()
}

/// Process-wide holder of the current [`Settings`] snapshot.
pub struct ConfigStore {
    current: ArcSwap<Settings>,
}

impl ConfigStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: ArcSwap::from_pointee(settings),
        }
    }

    /// Current snapshot. Holding it keeps that version alive across replacements.
    pub fn snapshot(&self) -> Arc<Settings> {
        self.current.load_full()
    }

    /// Swap in a whole new snapshot.
    pub fn replace(&self, settings: Settings) -> Result<(), SettingsError> {
        settings.validate()?;
        self.current.store(Arc::new(settings));
        info!("settings replaced");
        Ok(())
    }

    /// Replace only the rebate policy, leaving the rest of the snapshot as is.
    pub fn update_rebate_policy(&self, policy: RebatePolicy) -> Result<(), SettingsError> {
        policy.validate()?;
        self.current.rcu(|current| {
            let mut next = Settings::clone(current);
            next.rebate = policy;
            next
        });
        info!(
            percent = policy.percent,
            max_count = policy.max_count,
            "rebate policy updated"
        );
        Ok(())
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_reads_toml() {
        let file = write_toml(
            r#"
price = 1.0
quota_per_unit = 500000
display_mode = "tokens"
min_topup = 5
pay_methods = ["alipay"]

[group_ratios]
vip = 0.8

[amount_discounts]
"100" = 0.95

[rebate]
percent = 10
max_count = 3
"#,
        );

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.price, dec!(1));
        assert_eq!(settings.quota_per_unit, dec!(500000));
        assert_eq!(settings.display_mode, DisplayMode::Tokens);
        assert_eq!(settings.min_topup, 5);
        assert_eq!(settings.group_ratio("vip"), dec!(0.8));
        assert_eq!(settings.amount_discount(100), dec!(0.95));
        assert_eq!(settings.rebate, RebatePolicy { percent: 10, max_count: 3 });
        assert!(settings.allows_pay_method("alipay"));
        assert!(!settings.allows_pay_method("wxpay"));
    }

    #[test]
    fn load_rejects_bad_discount_key() {
        let file = write_toml("[amount_discounts]\nabc = 0.9\n");
        assert!(matches!(
            Settings::load(file.path()),
            Err(SettingsError::Load(_))
        ));
    }

    #[test]
    fn load_rejects_zero_quota_per_unit() {
        let file = write_toml("quota_per_unit = 0\n");
        assert!(matches!(
            Settings::load(file.path()),
            Err(SettingsError::Invalid(_))
        ));
    }

    #[test]
    fn group_ratio_defaults_to_one() {
        let mut settings = Settings::default();
        settings.group_ratios.insert("zero".to_string(), Decimal::ZERO);
        assert_eq!(settings.group_ratio("missing"), Decimal::ONE);
        assert_eq!(settings.group_ratio("zero"), Decimal::ONE);
    }

    #[test]
    fn amount_discount_ignores_non_positive() {
        let mut settings = Settings::default();
        settings.amount_discounts.insert(50, dec!(-0.5));
        assert_eq!(settings.amount_discount(50), Decimal::ONE);
        assert_eq!(settings.amount_discount(51), Decimal::ONE);
    }

    #[test]
    fn update_rebate_policy_keeps_other_fields() {
        let store = ConfigStore::new(Settings {
            min_topup: 42,
            ..Settings::default()
        });
        let before = store.snapshot();

        store
            .update_rebate_policy(RebatePolicy { percent: 20, max_count: 1 })
            .unwrap();

        let after = store.snapshot();
        assert_eq!(after.rebate.percent, 20);
        assert_eq!(after.min_topup, 42);
        // old snapshot is untouched
        assert_eq!(before.rebate.percent, 0);
    }

    #[test]
    fn replace_swaps_whole_snapshot() {
        let store = ConfigStore::default();
        let before = store.snapshot();

        store
            .replace(Settings {
                price: dec!(2),
                min_topup: 10,
                ..Settings::default()
            })
            .unwrap();

        let after = store.snapshot();
        assert_eq!(after.price, dec!(2));
        assert_eq!(after.min_topup, 10);
        // old snapshot is untouched
        assert_eq!(before.price, dec!(7.3));
        assert_eq!(before.min_topup, 1);
    }

    #[test]
    fn replace_rejects_invalid_settings() {
        let store = ConfigStore::new(Settings {
            min_topup: 42,
            ..Settings::default()
        });

        let result = store.replace(Settings {
            quota_per_unit: Decimal::ZERO,
            ..Settings::default()
        });

        assert!(matches!(result, Err(SettingsError::Invalid(_))));
        let current = store.snapshot();
        assert_eq!(current.quota_per_unit, dec!(500000));
        assert_eq!(current.min_topup, 42);
    }

    #[test]
    fn update_rebate_policy_rejects_out_of_range() {
        let store = ConfigStore::default();
        let result = store.update_rebate_policy(RebatePolicy { percent: 101, max_count: 1 });
        assert!(matches!(result, Err(SettingsError::Invalid(_))));
        assert_eq!(store.snapshot().rebate.percent, 0);
    }
}
