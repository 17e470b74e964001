//! Promo-code rebate paid to a referrer when an order settles.

use tracing::{info, warn};

use crate::config::RebatePolicy;
use crate::model::{Quota, UserId};
use crate::store::{AuditEntry, AuditKind, AuditLog, UserStore};

/// Rebate owed for `credited` quota under `policy`.
pub fn rebate_quota(policy: &RebatePolicy, credited: Quota) -> Quota {
    if policy.percent <= 0 {
        return 0;
    }
    credited.saturating_mul(policy.percent) / 100
}

/// Credit the referrer's rebate accumulator. Best effort: failures are
/// logged and reported as `None`, never propagated.
pub async fn apply_rebate(
    users: &dyn UserStore,
    audit: &dyn AuditLog,
    policy: &RebatePolicy,
    referrer: UserId,
    credited: Quota,
) -> Option<Quota> {
    if policy.percent <= 0 {
        info!(referrer, "rebate disabled, skipped");
        return None;
    }

    let rebate = rebate_quota(policy, credited);
    if rebate <= 0 {
        info!(
            referrer,
            credited,
            percent = policy.percent,
            "rebate rounds to zero, skipped"
        );
        return None;
    }

    if let Err(e) = users.increase_rebate_quota(referrer, rebate).await {
        warn!(referrer, rebate, reason = %e, "rebate credit failed");
        return None;
    }

    let entry = AuditEntry {
        user: referrer,
        kind: AuditKind::System,
        message: format!(
            "promo code redeemed, rebate of {rebate} quota ({}%)",
            policy.percent
        ),
    };
    if let Err(e) = audit.record(entry).await {
        warn!(referrer, reason = %e, "failed to record rebate audit entry");
    }

    info!(referrer, rebate, percent = policy.percent, "rebate applied");
    Some(rebate)
}
