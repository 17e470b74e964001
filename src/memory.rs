//! In-memory stores, used by the replay binary and by tests.
//!
//! Every operation runs under one mutex, which gives the conditional status
//! update and the quota increments the atomicity the engine expects.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::model::{Order, OrderStatus, Quota, UserId};
use crate::store::{AuditEntry, AuditLog, InvitationRebate, OrderStore, StoreError, UserStore};

/// A user account as the stores see it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub id: UserId,
    pub group: String,
    /// Referral code other users redeem as a promo code.
    pub aff_code: String,
    pub quota: Quota,
    pub rebate_quota: Quota,
    /// Every rebate ever credited, never decreased.
    pub rebate_history: Quota,
    pub topup_count: i64,
}

impl Account {
    pub fn new(id: UserId, group: impl Into<String>, aff_code: impl Into<String>) -> Self {
        Self {
            id,
            group: group.into(),
            aff_code: aff_code.into(),
            ..Self::default()
        }
    }
}

/// Store operations that can be made to fail once, for exercising error paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    InsertOrder,
    GetOrder,
    UpdateStatus,
    ClaimCredit,
    ReleaseCredit,
    IncreaseQuota,
    IncreaseRebateQuota,
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<UserId, Account>,
    orders: HashMap<String, Order>,
    audit: Vec<AuditEntry>,
    invitation_rebates: Vec<(UserId, Quota)>,
    faults: HashSet<Fault>,
}

impl State {
    fn trip(&mut self, fault: Fault) -> Result<(), StoreError> {
        if self.faults.remove(&fault) {
            return Err(StoreError::Unavailable(format!("injected {fault:?} failure")));
        }
        Ok(())
    }

    fn account_mut(&mut self, user: UserId) -> Result<&mut Account, StoreError> {
        self.accounts
            .get_mut(&user)
            .ok_or(StoreError::UserNotFound(user))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&self, account: Account) {
        self.state.lock().accounts.insert(account.id, account);
    }

    pub fn account(&self, user: UserId) -> Option<Account> {
        self.state.lock().accounts.get(&user).cloned()
    }

    /// All accounts, ordered by id.
    pub fn accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<_> = self.state.lock().accounts.values().cloned().collect();
        accounts.sort_by_key(|account| account.id);
        accounts
    }

    pub fn order(&self, trade_no: &str) -> Option<Order> {
        self.state.lock().orders.get(trade_no).cloned()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().orders.values().cloned().collect()
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.lock().audit.clone()
    }

    /// Hand-offs to the invitation rebate path, as `(payer, quota)`.
    pub fn invitation_rebates(&self) -> Vec<(UserId, Quota)> {
        self.state.lock().invitation_rebates.clone()
    }

    /// Make the next call of the given operation fail.
    pub fn fail_next(&self, fault: Fault) {
        self.state.lock().faults.insert(fault);
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.trip(Fault::InsertOrder)?;
        if state.orders.contains_key(&order.trade_no) {
            return Err(StoreError::DuplicateOrder(order.trade_no.clone()));
        }
        state.orders.insert(order.trade_no.clone(), order.clone());
        Ok(())
    }

    async fn get_by_trade_no(&self, trade_no: &str) -> Result<Option<Order>, StoreError> {
        let mut state = self.state.lock();
        state.trip(Fault::GetOrder)?;
        Ok(state.orders.get(trade_no).cloned())
    }

    async fn update_status(
        &self,
        trade_no: &str,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        state.trip(Fault::UpdateStatus)?;
        match state.orders.get_mut(trade_no) {
            Some(order) if order.status == from => {
                order.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_credit(&self, trade_no: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        state.trip(Fault::ClaimCredit)?;
        match state.orders.get_mut(trade_no) {
            Some(order) if !order.credited => {
                order.credited = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_credit(&self, trade_no: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.trip(Fault::ReleaseCredit)?;
        if let Some(order) = state.orders.get_mut(trade_no) {
            order.credited = false;
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_group(&self, user: UserId) -> Result<String, StoreError> {
        Ok(self.state.lock().account_mut(user)?.group.clone())
    }

    async fn get_topup_count(&self, user: UserId) -> Result<i64, StoreError> {
        Ok(self.state.lock().account_mut(user)?.topup_count)
    }

    async fn increment_topup_count(&self, user: UserId) -> Result<(), StoreError> {
        self.state.lock().account_mut(user)?.topup_count += 1;
        Ok(())
    }

    async fn increase_quota(
        &self,
        user: UserId,
        quota: Quota,
        _notify: bool,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.trip(Fault::IncreaseQuota)?;
        state.account_mut(user)?.quota += quota;
        Ok(())
    }

    async fn increase_rebate_quota(&self, user: UserId, quota: Quota) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.trip(Fault::IncreaseRebateQuota)?;
        let account = state.account_mut(user)?;
        account.rebate_quota += quota;
        account.rebate_history += quota;
        Ok(())
    }

    async fn resolve_referral_code(&self, code: &str) -> Result<Option<UserId>, StoreError> {
        Ok(self
            .state
            .lock()
            .accounts
            .values()
            .find(|account| !account.aff_code.is_empty() && account.aff_code == code)
            .map(|account| account.id))
    }
}

#[async_trait]
impl AuditLog for MemoryStore {
    async fn record(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.state.lock().audit.push(entry);
        Ok(())
    }
}

/// The invitation graph is owned elsewhere; this stand-in only records the hand-off.
#[async_trait]
impl InvitationRebate for MemoryStore {
    async fn process_topup_rebate(&self, user: UserId, quota: Quota) -> Result<(), StoreError> {
        self.state.lock().invitation_rebates.push((user, quota));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReferralSource;
    use rust_decimal::Decimal;

    fn order(trade_no: &str) -> Order {
        Order::pending(
            trade_no.to_string(),
            1,
            10,
            Decimal::TEN,
            "alipay".to_string(),
            ReferralSource::Relationship,
        )
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_trade_no() {
        let store = MemoryStore::new();
        store.insert(&order("t1")).await.unwrap();
        assert!(matches!(
            store.insert(&order("t1")).await,
            Err(StoreError::DuplicateOrder(_))
        ));
    }

    #[tokio::test]
    async fn update_status_is_conditional() {
        let store = MemoryStore::new();
        store.insert(&order("t1")).await.unwrap();

        let first = store
            .update_status("t1", OrderStatus::Pending, OrderStatus::Success)
            .await
            .unwrap();
        let second = store
            .update_status("t1", OrderStatus::Pending, OrderStatus::Success)
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(store.order("t1").unwrap().status, OrderStatus::Success);
    }

    #[tokio::test]
    async fn update_status_of_unknown_order_is_false() {
        let store = MemoryStore::new();
        let updated = store
            .update_status("missing", OrderStatus::Pending, OrderStatus::Success)
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn claim_credit_once() {
        let store = MemoryStore::new();
        store.insert(&order("t1")).await.unwrap();
        assert!(store.claim_credit("t1").await.unwrap());
        assert!(!store.claim_credit("t1").await.unwrap());
        assert!(!store.claim_credit("missing").await.unwrap());
    }

    #[tokio::test]
    async fn released_claim_can_be_claimed_again() {
        let store = MemoryStore::new();
        store.insert(&order("t1")).await.unwrap();
        assert!(store.claim_credit("t1").await.unwrap());

        store.release_credit("t1").await.unwrap();
        assert!(!store.order("t1").unwrap().credited);
        assert!(store.claim_credit("t1").await.unwrap());
    }

    #[tokio::test]
    async fn increase_quota_requires_account() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.increase_quota(9, 100, true).await,
            Err(StoreError::UserNotFound(9))
        ));

        store.add_account(Account::new(9, "default", "c9"));
        store.increase_quota(9, 100, true).await.unwrap();
        store.increase_rebate_quota(9, 5).await.unwrap();

        let account = store.account(9).unwrap();
        assert_eq!(account.quota, 100);
        assert_eq!(account.rebate_quota, 5);
        assert_eq!(account.rebate_history, 5);
    }

    #[tokio::test]
    async fn resolve_referral_code_ignores_empty_codes() {
        let store = MemoryStore::new();
        store.add_account(Account::new(1, "default", ""));
        store.add_account(Account::new(2, "default", "ABCD"));

        assert_eq!(store.resolve_referral_code("ABCD").await.unwrap(), Some(2));
        assert_eq!(store.resolve_referral_code("").await.unwrap(), None);
        assert_eq!(store.resolve_referral_code("ZZZZ").await.unwrap(), None);
    }

    #[tokio::test]
    async fn injected_fault_fails_once() {
        let store = MemoryStore::new();
        store.add_account(Account::new(1, "default", "c1"));
        store.fail_next(Fault::IncreaseQuota);

        assert!(store.increase_quota(1, 10, false).await.is_err());
        store.increase_quota(1, 10, false).await.unwrap();
        assert_eq!(store.account(1).unwrap().quota, 10);
    }
}
