//! Per-period spend tracking.
//!
//! One mutex-protected map holds every `(tenant, feature, period)` total, so
//! each update is a single short critical section and totals are
//! linearizable per key. Committed spend only ever grows within a period;
//! in-flight generation calls hold a separate reservation so concurrent
//! requests cannot jointly overrun the ceiling.

use bastion_core::{AppError, AppResult};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// A monthly budget period (`YYYY-MM`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BudgetPeriod(String);

impl BudgetPeriod {
    /// The month containing `at`.
    pub fn monthly(at: DateTime<Utc>) -> Self {
        Self(format!("{:04}-{:02}", at.year(), at.month()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite ledger key. Never collapsed into a single string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BudgetKey {
    pub tenant: String,
    pub feature: String,
    pub period: BudgetPeriod,
}

impl BudgetKey {
    pub fn new(tenant: impl Into<String>, feature: impl Into<String>, period: BudgetPeriod) -> Self {
        Self {
            tenant: tenant.into(),
            feature: feature.into(),
            period,
        }
    }

    fn scope(&self) -> (&str, &str) {
        (&self.tenant, &self.feature)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BudgetState {
    committed: f64,
    reserved: f64,
}

type Totals = HashMap<BudgetKey, BudgetState>;

/// Running cost totals per `(tenant, feature, period)`.
#[derive(Clone, Default)]
pub struct BudgetLedger {
    inner: Arc<Mutex<Totals>>,
}

impl BudgetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Totals> {
        lock_totals(&self.inner)
    }

    /// Committed spend for `key`; zero for a period with no usage yet.
    pub fn spent(&self, key: &BudgetKey) -> f64 {
        self.lock().get(key).map(|s| s.committed).unwrap_or(0.0)
    }

    /// Committed spend plus in-flight reservations.
    pub fn exposure(&self, key: &BudgetKey) -> f64 {
        self.lock()
            .get(key)
            .map(|s| s.committed + s.reserved)
            .unwrap_or(0.0)
    }

    /// Add a settled cost to `key`. Returns the new committed total.
    pub fn record(&self, key: &BudgetKey, amount: f64) -> AppResult<f64> {
        validate_amount(amount)?;
        let mut totals = self.lock();
        rollover(&mut totals, key);
        let state = totals.entry(key.clone()).or_default();
        state.committed += amount;
        Ok(state.committed)
    }

    /// Atomically hold `estimate` against `ceiling`.
    ///
    /// Fails with `BudgetExceededHard` when committed spend, outstanding
    /// reservations and the estimate together would pass the ceiling.
    pub fn reserve(&self, key: &BudgetKey, estimate: f64, ceiling: f64) -> AppResult<Reservation> {
        validate_amount(estimate)?;
        let mut totals = self.lock();
        rollover(&mut totals, key);
        let state = totals.entry(key.clone()).or_default();

        if state.committed + state.reserved + estimate > ceiling {
            return Err(AppError::BudgetExceededHard(format!(
                "{}/{} would exceed its {} budget",
                key.tenant, key.feature, key.period
            )));
        }

        state.reserved += estimate;
        Ok(Reservation {
            ledger: Arc::clone(&self.inner),
            key: key.clone(),
            held: estimate,
            open: true,
        })
    }

    /// Drop totals for periods before `current` across every scope.
    pub fn prune_before(&self, current: &BudgetPeriod) {
        self.lock().retain(|key, _| key.period >= *current);
    }
}

/// An in-flight hold on a budget; released on drop unless settled.
pub struct Reservation {
    ledger: Arc<Mutex<Totals>>,
    key: BudgetKey,
    held: f64,
    open: bool,
}

impl Reservation {
    pub fn key(&self) -> &BudgetKey {
        &self.key
    }

    /// Estimated amount held.
    pub fn held(&self) -> f64 {
        self.held
    }

    /// Replace the hold with the actual cost. Returns the new committed total.
    pub fn settle(mut self, actual: f64) -> AppResult<f64> {
        validate_amount(actual)?;
        let mut totals = lock_totals(&self.ledger);
        let state = totals.entry(self.key.clone()).or_default();
        state.reserved = (state.reserved - self.held).max(0.0);
        state.committed += actual;
        self.open = false;
        Ok(state.committed)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        let mut totals = lock_totals(&self.ledger);
        if let Some(state) = totals.get_mut(&self.key) {
            state.reserved = (state.reserved - self.held).max(0.0);
        }
    }
}

fn lock_totals(inner: &Mutex<Totals>) -> MutexGuard<'_, Totals> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn validate_amount(amount: f64) -> AppResult<()> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(AppError::Other(format!(
            "Budget amounts must be finite and non-negative, got {}",
            amount
        )));
    }
    Ok(())
}

/// A newer period for the same scope retires the older totals.
fn rollover(totals: &mut Totals, key: &BudgetKey) {
    totals.retain(|existing, _| existing.scope() != key.scope() || existing.period >= key.period);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(period: &str) -> BudgetKey {
        BudgetKey::new("t1", "qa", BudgetPeriod(period.to_string()))
    }

    #[test]
    fn test_monthly_period() {
        let at = Utc.with_ymd_and_hms(2026, 3, 31, 23, 59, 59).unwrap();
        assert_eq!(BudgetPeriod::monthly(at).as_str(), "2026-03");
    }

    #[test]
    fn test_record_is_monotonic_and_rejects_negative() {
        let ledger = BudgetLedger::new();
        let k = key("2026-03");

        assert_eq!(ledger.record(&k, 1.5).unwrap(), 1.5);
        assert_eq!(ledger.record(&k, 0.0).unwrap(), 1.5);
        assert!(ledger.record(&k, -0.5).is_err());
        assert!(ledger.record(&k, f64::NAN).is_err());
        assert_eq!(ledger.spent(&k), 1.5);
    }

    #[test]
    fn test_keys_do_not_collide_across_tenants() {
        let ledger = BudgetLedger::new();
        let period = BudgetPeriod("2026-03".to_string());
        // "t1"+"qa:x" and "t1:qa"+"x" would collide as joined strings
        let a = BudgetKey::new("t1", "qa:x", period.clone());
        let b = BudgetKey::new("t1:qa", "x", period);

        ledger.record(&a, 2.0).unwrap();
        assert_eq!(ledger.spent(&b), 0.0);
    }

    #[test]
    fn test_rollover_resets_scope() {
        let ledger = BudgetLedger::new();
        ledger.record(&key("2026-03"), 50.0).unwrap();
        ledger.record(&key("2026-04"), 1.0).unwrap();

        assert_eq!(ledger.spent(&key("2026-03")), 0.0);
        assert_eq!(ledger.spent(&key("2026-04")), 1.0);
    }

    #[test]
    fn test_reservation_blocks_overrun_and_releases_on_drop() {
        let ledger = BudgetLedger::new();
        let k = key("2026-03");
        ledger.record(&k, 9.0).unwrap();

        let held = ledger.reserve(&k, 0.75, 10.0).unwrap();
        assert!(ledger.reserve(&k, 0.5, 10.0).is_err());
        assert_eq!(ledger.spent(&k), 9.0);

        drop(held);
        assert_eq!(ledger.exposure(&k), 9.0);
        assert!(ledger.reserve(&k, 0.5, 10.0).is_ok());
    }

    #[test]
    fn test_settle_commits_actual_cost() {
        let ledger = BudgetLedger::new();
        let k = key("2026-03");

        let held = ledger.reserve(&k, 1.0, 10.0).unwrap();
        assert_eq!(held.settle(0.4).unwrap(), 0.4);
        assert_eq!(ledger.spent(&k), 0.4);
        assert_eq!(ledger.exposure(&k), 0.4);
    }

    #[test]
    fn test_concurrent_records_are_linearizable() {
        let ledger = BudgetLedger::new();
        let k = key("2026-03");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                let k = k.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        ledger.record(&k, 0.01).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!((ledger.spent(&k) - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_concurrent_reservations_never_exceed_ceiling() {
        let ledger = BudgetLedger::new();
        let k = key("2026-03");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                let k = k.clone();
                std::thread::spawn(move || {
                    ledger
                        .reserve(&k, 1.0, 10.0)
                        .and_then(|held| held.settle(1.0))
                        .is_ok()
                })
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(granted, 10);
        assert!(ledger.spent(&k) <= 10.0);
    }

    #[test]
    fn test_prune_before() {
        let ledger = BudgetLedger::new();
        ledger.record(&key("2026-03"), 1.0).unwrap();
        ledger.record(&BudgetKey::new("t2", "qa", BudgetPeriod("2026-04".to_string())), 1.0).unwrap();

        ledger.prune_before(&BudgetPeriod("2026-04".to_string()));
        assert_eq!(ledger.spent(&key("2026-03")), 0.0);
    }
}
