//! Core usage engine
//!
//! Owns every piece of mutable accounting state and is driven from a single
//! task: foreground changes, ticks, grant changes, limit fetch completions and
//! enforcement re-checks all enter through `&mut self` methods that take the
//! current wall-clock and monotonic time explicitly and return the events the
//! service has to act on.

use chrono::{DateTime, Local, NaiveDate};
use curfew_api::{
    API_VERSION, BlockNotice, BlockReason, EngineSnapshot, EnforcementInfo,
    EnforcementStopReason, GrantChange, PackageState, Verdict,
};
use curfew_config::{EnginePolicy, Policy};
use curfew_store::{AuditEvent, AuditEventType, Store, StoreResult};
use curfew_util::{MonotonicInstant, PackageId, calendar_day};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    Attempt, BlockCache, CoreEvent, DailyReset, Decrement, Enforcement, LimitCache, LimitFetch,
    LimitUpdate, Reconciled, SessionTracker, UsageLedger, Wallet, decide,
};

/// How a non-allowing verdict is acted on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Evaluation {
    /// The package was just brought to the foreground: a block triggers
    /// enforcement even without an open session
    Admit,
    /// Periodic or cache-driven re-evaluation: only an open session is
    /// closed and blocked
    Refresh,
}

/// The core usage engine
pub struct CoreEngine {
    policy: EnginePolicy,
    store: Arc<dyn Store>,
    selection: BTreeSet<PackageId>,
    ledger: UsageLedger,
    limits: LimitCache,
    wallet: Wallet,
    blocks: BlockCache,
    tracker: SessionTracker,
    enforcement: Enforcement,
    reset: DailyReset,
    foreground: Option<PackageId>,
    /// Packages already warned today
    warned: HashSet<PackageId>,
}

impl CoreEngine {
    /// Restore engine state from the store and apply a pending daily reset
    pub fn new(policy: &Policy, store: Arc<dyn Store>, now: DateTime<Local>) -> Self {
        let last_reset = loaded(store.get_last_reset_day(), "last reset day");
        let ledger_day = last_reset.unwrap_or_else(|| calendar_day(&now));
        let used = loaded(store.load_usage(ledger_day), "usage");
        let limits = loaded(store.load_limits(), "limits");
        let wallets = loaded(store.load_wallets(), "wallets");
        let selection: BTreeSet<PackageId> =
            loaded(store.load_selection(), "selection").into_iter().collect();

        info!(
            selected = selection.len(),
            wallets = wallets.len(),
            cached_limits = limits.len(),
            day = %ledger_day,
            "Core engine initialized"
        );

        let mut engine = Self {
            policy: policy.engine,
            store,
            selection,
            ledger: UsageLedger::new(ledger_day, used),
            limits: LimitCache::new(policy.engine.default_limit, limits),
            wallet: Wallet::from_records(wallets),
            blocks: BlockCache::new(),
            tracker: SessionTracker::new(),
            enforcement: Enforcement::new(policy.enforcement.max_attempts),
            reset: DailyReset::new(last_reset),
            foreground: None,
            warned: HashSet::new(),
        };

        if let Some(day) = engine.reset.due(&now) {
            engine.roll_day(day);
        }

        engine
    }

    /// Apply a reloaded policy; cached per-package limits are kept
    pub fn reload_policy(&mut self, policy: &Policy) {
        self.policy = policy.engine;
        self.limits.set_default(policy.engine.default_limit);
        self.enforcement
            .set_max_attempts(policy.enforcement.max_attempts);

        info!(
            warning_threshold_secs = self.policy.warning_threshold.as_secs(),
            default_limit_secs = self.policy.default_limit.as_secs(),
            max_attempts = policy.enforcement.max_attempts,
            "Policy reloaded"
        );
    }

    // Queries

    pub fn foreground(&self) -> Option<&PackageId> {
        self.foreground.as_ref()
    }

    pub fn is_selected(&self, package: &PackageId) -> bool {
        self.selection.contains(package)
    }

    pub fn selection(&self) -> impl Iterator<Item = &PackageId> {
        self.selection.iter()
    }

    /// Package with an open session
    pub fn current_session(&self) -> Option<&PackageId> {
        self.tracker.current()
    }

    pub fn enforcement(&self) -> Option<EnforcementInfo> {
        self.enforcement.info()
    }

    pub fn used_today(&self, package: &PackageId) -> Duration {
        self.ledger.used_today(package)
    }

    pub fn daily_limit(&self, package: &PackageId) -> Duration {
        self.limits.get_limit(package)
    }

    pub fn wallet_remaining(&self, package: &PackageId) -> Duration {
        self.wallet.remaining(package)
    }

    pub fn last_reset_day(&self) -> Option<NaiveDate> {
        self.reset.last_reset()
    }

    /// Decision inputs for one package
    pub fn package_state(&self, package: &PackageId, now: DateTime<Local>) -> PackageState {
        PackageState {
            package_id: package.clone(),
            used_today: self.ledger.used_today(package),
            daily_limit: self.limits.get_limit(package),
            wallet_remaining: self.wallet.remaining(package),
            block_marker: self.blocks.marker(package, now),
            is_user_selected: self.selection.contains(package),
        }
    }

    /// Current verdict for a package, without side effects
    pub fn decide_for(&self, package: &PackageId, now: DateTime<Local>) -> Verdict {
        decide(
            &self.package_state(package, now),
            self.policy.warning_threshold,
            now,
        )
    }

    pub fn snapshot(&self, now: DateTime<Local>, now_mono: MonotonicInstant) -> EngineSnapshot {
        EngineSnapshot {
            api_version: API_VERSION,
            day: self.ledger.day(),
            foreground: self.foreground.clone(),
            session: self.tracker.info(now_mono),
            enforcement: self.enforcement.info(),
            packages: self
                .selection
                .iter()
                .map(|p| self.package_state(p, now))
                .collect(),
        }
    }

    // Inputs

    /// Replace the selected-package set
    pub fn set_selection(
        &mut self,
        packages: impl IntoIterator<Item = PackageId>,
        now: DateTime<Local>,
        now_mono: MonotonicInstant,
    ) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        let next: BTreeSet<PackageId> = packages.into_iter().collect();
        if next == self.selection {
            return events;
        }

        let added: Vec<PackageId> = next.difference(&self.selection).cloned().collect();
        let removed: Vec<PackageId> = self.selection.difference(&next).cloned().collect();
        self.selection = next;

        let persisted: Vec<PackageId> = self.selection.iter().cloned().collect();
        log_write(self.store.save_selection(&persisted), "selection");
        let _ = self.store.append_audit(AuditEvent::at(
            AuditEventType::SelectionChanged {
                added: added.clone(),
                removed: removed.clone(),
            },
            now,
        ));

        info!(
            added = added.len(),
            removed = removed.len(),
            selected = self.selection.len(),
            "Selection changed"
        );

        for package in &removed {
            if self.tracker.current() == Some(package) {
                self.close_session(now_mono, &mut events);
            }
            if self.enforcement.is_enforcing(package) {
                self.stop_enforcement(EnforcementStopReason::Deselected, &mut events);
            }
            self.warned.remove(package);
            self.purge(package, now, &mut events);
        }

        let admit = self
            .foreground
            .as_ref()
            .is_some_and(|fg| added.contains(fg));
        if admit {
            self.evaluate_foreground(Evaluation::Admit, now, now_mono, &mut events);
        }

        if !added.is_empty() {
            events.push(CoreEvent::RefreshLimits { packages: added });
        }

        events
    }

    /// The foreground package changed; `None` is the home screen or any
    /// surface that is not tracked
    pub fn on_foreground_change(
        &mut self,
        package: Option<PackageId>,
        now: DateTime<Local>,
        now_mono: MonotonicInstant,
    ) -> Vec<CoreEvent> {
        let mut events = Vec::new();

        if package == self.foreground {
            let settled = match &package {
                None => true,
                Some(p) => {
                    !self.selection.contains(p)
                        || self.tracker.current() == Some(p)
                        || self.enforcement.is_enforcing(p)
                }
            };
            if settled {
                return events;
            }
        }

        self.close_session(now_mono, &mut events);
        if self.enforcement.active().is_some() {
            self.stop_enforcement(EnforcementStopReason::LeftForeground, &mut events);
        }

        debug!(
            package = ?package.as_ref().map(PackageId::as_str),
            "Foreground changed"
        );
        self.foreground = package;

        self.evaluate_foreground(Evaluation::Admit, now, now_mono, &mut events);
        events
    }

    /// Periodic tick: accrue the open session, run the daily reset and
    /// re-evaluate the foreground package
    pub fn on_tick(&mut self, now: DateTime<Local>, now_mono: MonotonicInstant) -> Vec<CoreEvent> {
        let mut events = Vec::new();

        if let Some(slice) = self.tracker.rollover(now_mono) {
            self.account(&slice.package, slice.elapsed, &mut events);
        }

        let mode = match self.reset.due(&now) {
            Some(day) => {
                self.apply_daily_reset(day, &mut events);
                Evaluation::Admit
            }
            None => Evaluation::Refresh,
        };

        self.evaluate_foreground(mode, now, now_mono, &mut events);

        if !self.selection.is_empty() {
            events.push(CoreEvent::RefreshLimits {
                packages: self.selection.iter().cloned().collect(),
            });
        }

        events
    }

    /// One scheduled re-check of enforcement loop `generation`
    pub fn enforcement_recheck(
        &mut self,
        generation: u64,
        now: DateTime<Local>,
        now_mono: MonotonicInstant,
    ) -> Vec<CoreEvent> {
        let mut events = Vec::new();

        let Some(package) = self
            .enforcement
            .active()
            .filter(|l| l.generation == generation)
            .map(|l| l.package.clone())
        else {
            return events;
        };

        if self.foreground.as_ref() != Some(&package) {
            self.stop_enforcement(EnforcementStopReason::LeftForeground, &mut events);
            return events;
        }

        match self.evaluate(&package, now) {
            Verdict::Block { .. } => match self.enforcement.record_attempt(generation) {
                Some(Attempt::Retry { attempt }) => {
                    debug!(package = %package, attempt, "Enforcement retry");
                    events.push(CoreEvent::CorrectiveAction { package });
                }
                Some(Attempt::Exhausted { attempts }) => {
                    events.push(CoreEvent::CorrectiveAction {
                        package: package.clone(),
                    });

                    warn!(package = %package, attempts, "Enforcement attempts exhausted");
                    let _ = self.store.append_audit(AuditEvent::at(
                        AuditEventType::EnforcementExpired {
                            package: package.clone(),
                            attempts,
                        },
                        now,
                    ));

                    events.push(CoreEvent::EnforcementStopped {
                        package,
                        generation,
                        reason: EnforcementStopReason::AttemptsExhausted,
                    });
                }
                None => {}
            },
            _ => {
                self.stop_enforcement(EnforcementStopReason::Unblocked, &mut events);
                self.evaluate_foreground(Evaluation::Admit, now, now_mono, &mut events);
            }
        }

        events
    }

    /// Merge one remote grant change into the wallet
    pub fn on_grant_change(
        &mut self,
        change: &GrantChange,
        now: DateTime<Local>,
        now_mono: MonotonicInstant,
    ) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        let package = &change.package;

        if !self.selection.contains(package) {
            debug!(package = %package, kind = ?change.kind, "Grant for unselected package ignored");
            return events;
        }

        match self.wallet.reconcile(change) {
            Reconciled::Seeded { remaining } => {
                self.persist_wallet(package);
                self.record_grant(change, remaining, now, &mut events);

                if self.blocks.invalidate(package) {
                    self.record_unblock(package, now, &mut events);
                }
                self.evaluate_foreground(Evaluation::Refresh, now, now_mono, &mut events);
            }
            Reconciled::Shrunk { from, to } => {
                self.persist_wallet(package);
                debug!(
                    package = %package,
                    from_ms = from.as_millis() as u64,
                    to_ms = to.as_millis() as u64,
                    "Wallet lowered by remote"
                );
                self.record_grant(change, to, now, &mut events);
            }
            Reconciled::Kept { local, remote } => {
                if remote > local {
                    // Remote is behind our spending
                    events.push(CoreEvent::WalletPush {
                        package: package.clone(),
                        remaining: local,
                    });
                }
            }
            Reconciled::Exhausted => {
                self.persist_wallet(package);
                self.record_grant(change, Duration::ZERO, now, &mut events);
                events.push(CoreEvent::ClearGrant {
                    package: package.clone(),
                });
                self.evaluate_foreground(Evaluation::Refresh, now, now_mono, &mut events);
            }
            Reconciled::Cleared { had_balance } => {
                self.persist_wallet(package);
                info!(package = %package, had_balance, "Grant removed");
                self.evaluate_foreground(Evaluation::Refresh, now, now_mono, &mut events);
            }
            Reconciled::IgnoredTombstone => {
                self.persist_wallet(package);
                debug!(package = %package, remote_ms = change.remaining().as_millis() as u64, "Stale grant value ignored");
            }
            Reconciled::IgnoredZero => {
                debug!(package = %package, "Zero grant ignored");
            }
        }

        events
    }

    /// Apply the result of a remote limit fetch
    pub fn apply_limit(
        &mut self,
        package: &PackageId,
        fetch: LimitFetch,
        now: DateTime<Local>,
        now_mono: MonotonicInstant,
    ) -> Vec<CoreEvent> {
        let mut events = Vec::new();

        let update = self.limits.apply(package, fetch);
        match update {
            LimitUpdate::KeptStale => {
                debug!(package = %package, "Limit fetch failed, keeping cached value");
            }
            LimitUpdate::Unchanged => {}
            LimitUpdate::Stored { previous, limit } => {
                log_write(self.store.save_limit(package, limit), "limit");

                if update.changed() {
                    info!(
                        package = %package,
                        old_mins = previous.as_secs() / 60,
                        new_mins = limit.as_secs() / 60,
                        "Daily limit changed"
                    );
                    let _ = self.store.append_audit(AuditEvent::at(
                        AuditEventType::LimitChanged {
                            package: package.clone(),
                            old: previous,
                            new: limit,
                        },
                        now,
                    ));

                    if self.blocks.invalidate(package) {
                        self.record_unblock(package, now, &mut events);
                    }
                    if self.foreground.as_ref() == Some(package) {
                        self.evaluate_foreground(Evaluation::Refresh, now, now_mono, &mut events);
                    }
                }
            }
        }

        events
    }

    // Internals

    /// Verdict for `package`, purging cached state of unselected packages
    fn evaluate(&mut self, package: &PackageId, now: DateTime<Local>) -> Verdict {
        if !self.selection.contains(package) && self.wallet.purge(package) {
            log_write(self.store.delete_wallet(package), "wallet");
        }
        if !self.selection.contains(package) {
            self.blocks.invalidate(package);
        }
        self.decide_for(package, now)
    }

    fn evaluate_foreground(
        &mut self,
        mode: Evaluation,
        now: DateTime<Local>,
        now_mono: MonotonicInstant,
        events: &mut Vec<CoreEvent>,
    ) {
        let Some(package) = self.foreground.clone() else {
            return;
        };
        if !self.selection.contains(&package) {
            return;
        }

        match self.evaluate(&package, now) {
            Verdict::Block { reason } => {
                let had_session = self.tracker.current() == Some(&package);
                if had_session {
                    self.close_session(now_mono, events);
                }
                if had_session || mode == Evaluation::Admit {
                    self.enter_block(&package, reason, now, events);
                }
            }
            verdict => {
                if self.enforcement.is_enforcing(&package) {
                    self.stop_enforcement(EnforcementStopReason::Unblocked, events);
                }

                if self.tracker.current() != Some(&package) {
                    let (session_id, _) = self.tracker.open(package.clone(), now, now_mono);
                    debug!(package = %package, session_id = %session_id, "Session started");
                    events.push(CoreEvent::SessionStarted {
                        session_id,
                        package: package.clone(),
                    });
                }

                if let Verdict::WarnSoon { remaining } = verdict
                    && self.warned.insert(package.clone())
                {
                    info!(package = %package, remaining_secs = remaining.as_secs(), "Limit warning");
                    events.push(CoreEvent::Warning { package, remaining });
                }
            }
        }
    }

    fn close_session(&mut self, now_mono: MonotonicInstant, events: &mut Vec<CoreEvent>) {
        let Some(closed) = self.tracker.close(now_mono) else {
            return;
        };

        self.account(&closed.package, closed.elapsed, events);
        debug!(
            package = %closed.package,
            duration_secs = closed.duration.as_secs(),
            "Session ended"
        );
        events.push(CoreEvent::SessionEnded {
            session_id: closed.session_id,
            package: closed.package,
            duration: closed.duration,
        });
    }

    /// Add foreground time to the ledger and spend it from the wallet
    fn account(&mut self, package: &PackageId, elapsed: Duration, events: &mut Vec<CoreEvent>) {
        if elapsed.is_zero() {
            return;
        }

        let total = self.ledger.accrue(package, elapsed);
        log_write(
            self.store.set_usage(package, self.ledger.day(), total),
            "usage",
        );
        debug!(
            package = %package,
            elapsed_ms = elapsed.as_millis() as u64,
            used_secs = total.as_secs(),
            "Usage accrued"
        );

        match self.wallet.decrement(package, elapsed) {
            Decrement::Unchanged => {}
            Decrement::Spent { remaining } => {
                self.persist_wallet(package);
                events.push(CoreEvent::WalletPush {
                    package: package.clone(),
                    remaining,
                });
            }
            Decrement::Exhausted => {
                self.persist_wallet(package);
                let _ = self.store.append_audit(AuditEvent::new(
                    AuditEventType::WalletExhausted {
                        package: package.clone(),
                    },
                ));

                info!(package = %package, "Wallet exhausted");
                events.push(CoreEvent::WalletExhausted {
                    package: package.clone(),
                });
                events.push(CoreEvent::ClearGrant {
                    package: package.clone(),
                });
            }
        }
    }

    /// Write the wallet entry of `package` through to the store
    fn persist_wallet(&self, package: &PackageId) {
        let written = match self.wallet.record(package) {
            Some(record) => self.store.save_wallet(package, &record),
            None => self.store.delete_wallet(package),
        };
        log_write(written, "wallet");
    }

    fn enter_block(
        &mut self,
        package: &PackageId,
        reason: BlockReason,
        now: DateTime<Local>,
        events: &mut Vec<CoreEvent>,
    ) {
        if self.blocks.mark(package, now) {
            let used = self.ledger.used_today(package);
            let limit = self.limits.get_limit(package);

            info!(
                package = %package,
                used_secs = used.as_secs(),
                limit_secs = limit.as_secs(),
                ?reason,
                "Package blocked"
            );
            let _ = self.store.append_audit(AuditEvent::at(
                AuditEventType::PackageBlocked {
                    package: package.clone(),
                    reason: reason.clone(),
                },
                now,
            ));

            events.push(CoreEvent::BlockEntered {
                package: package.clone(),
                reason,
            });
            events.push(CoreEvent::NotifyPartner(BlockNotice {
                package: package.clone(),
                used,
                limit,
                blocked_at: now,
            }));
        }

        let (generation, superseded) = self.enforcement.start(package.clone());
        if let Some(old) = superseded {
            events.push(CoreEvent::EnforcementStopped {
                package: old.package,
                generation: old.generation,
                reason: EnforcementStopReason::Superseded,
            });
        }

        debug!(package = %package, generation, "Enforcement started");
        events.push(CoreEvent::EnforcementStarted {
            package: package.clone(),
            generation,
        });
        events.push(CoreEvent::CorrectiveAction {
            package: package.clone(),
        });
    }

    fn stop_enforcement(&mut self, reason: EnforcementStopReason, events: &mut Vec<CoreEvent>) {
        if let Some(stopped) = self.enforcement.stop() {
            debug!(package = %stopped.package, ?reason, attempts = stopped.attempts, "Enforcement stopped");
            events.push(CoreEvent::EnforcementStopped {
                package: stopped.package,
                generation: stopped.generation,
                reason,
            });
        }
    }

    /// Drop wallet and block state of a package that left the selection
    fn purge(&mut self, package: &PackageId, now: DateTime<Local>, events: &mut Vec<CoreEvent>) {
        if self.wallet.purge(package) {
            log_write(self.store.delete_wallet(package), "wallet");
        }
        if self.blocks.invalidate(package) {
            self.record_unblock(package, now, events);
        }
    }

    fn apply_daily_reset(&mut self, day: NaiveDate, events: &mut Vec<CoreEvent>) {
        self.roll_day(day);
        events.push(CoreEvent::DailyReset { day });
        self.stop_enforcement(EnforcementStopReason::DailyReset, events);
    }

    /// Zero usage, drop block markers and warnings, persist the new day
    fn roll_day(&mut self, day: NaiveDate) {
        let previous = self.ledger.day();
        self.ledger.reset(day);
        self.blocks.clear();
        self.warned.clear();
        let spent = self.wallet.prune_exhausted();
        self.reset.commit(day);

        log_write(self.store.commit_reset(day), "daily reset");
        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::DailyReset { day }));

        info!(previous = %previous, day = %day, spent_wallets = spent, "Daily usage reset");
    }

    fn record_grant(
        &mut self,
        change: &GrantChange,
        local: Duration,
        now: DateTime<Local>,
        events: &mut Vec<CoreEvent>,
    ) {
        info!(
            package = %change.package,
            kind = ?change.kind,
            remote_ms = change.remaining_millis,
            local_ms = local.as_millis() as u64,
            "Grant applied"
        );
        let _ = self.store.append_audit(AuditEvent::at(
            AuditEventType::GrantApplied {
                package: change.package.clone(),
                kind: change.kind,
                remote_remaining: change.remaining(),
                local_remaining: local,
            },
            now,
        ));

        events.push(CoreEvent::GrantApplied {
            package: change.package.clone(),
            kind: change.kind,
            remaining: local,
        });
    }

    fn record_unblock(&mut self, package: &PackageId, now: DateTime<Local>, events: &mut Vec<CoreEvent>) {
        info!(package = %package, "Block cleared");
        let _ = self.store.append_audit(AuditEvent::at(
            AuditEventType::PackageUnblocked {
                package: package.clone(),
            },
            now,
        ));
        events.push(CoreEvent::Unblocked {
            package: package.clone(),
        });
    }
}

fn loaded<T: Default>(result: StoreResult<T>, what: &'static str) -> T {
    result.unwrap_or_else(|e| {
        warn!(error = %e, what, "Failed to load persisted state");
        T::default()
    })
}

fn log_write(result: StoreResult<()>, what: &'static str) {
    if let Err(e) = result {
        warn!(error = %e, what, "Store write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use curfew_api::{EnforcementPhase, GrantChangeKind};
    use curfew_store::{SqliteStore, WalletRecord};

    fn game() -> PackageId {
        PackageId::new("com.example.game")
    }

    fn chat() -> PackageId {
        PackageId::new("com.example.chat")
    }

    fn mins(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn at(day: u32, h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, day, h, m, 0).unwrap()
    }

    struct Fixture {
        engine: CoreEngine,
        store: Arc<SqliteStore>,
        now: DateTime<Local>,
        mono: MonotonicInstant,
    }

    impl Fixture {
        /// Engine on 2025-06-02 10:00 with `game` selected and `used` already
        /// spent today
        fn new(used: Duration) -> Self {
            Self::with_policy(Policy::default(), used)
        }

        fn with_policy(policy: Policy, used: Duration) -> Self {
            let now = at(2, 10, 0);
            let store = Arc::new(SqliteStore::in_memory().unwrap());
            store.commit_reset(calendar_day(&now)).unwrap();
            store.set_usage(&game(), calendar_day(&now), used).unwrap();
            store.save_selection(&[game()]).unwrap();

            let engine = CoreEngine::new(&policy, store.clone(), now);
            Self {
                engine,
                store,
                now,
                mono: MonotonicInstant::now(),
            }
        }

        fn advance(&mut self, d: Duration) {
            self.now += chrono::Duration::from_std(d).unwrap();
            self.mono = self.mono + d;
        }

        fn foreground(&mut self, package: Option<PackageId>) -> Vec<CoreEvent> {
            self.engine.on_foreground_change(package, self.now, self.mono)
        }

        fn tick(&mut self, d: Duration) -> Vec<CoreEvent> {
            self.advance(d);
            self.engine.on_tick(self.now, self.mono)
        }

        fn grant(&mut self, change: GrantChange) -> Vec<CoreEvent> {
            self.engine.on_grant_change(&change, self.now, self.mono)
        }

        fn recheck(&mut self, generation: u64) -> Vec<CoreEvent> {
            self.engine.enforcement_recheck(generation, self.now, self.mono)
        }
    }

    fn generation_started(events: &[CoreEvent]) -> Option<u64> {
        events.iter().find_map(|e| match e {
            CoreEvent::EnforcementStarted { generation, .. } => Some(*generation),
            _ => None,
        })
    }

    fn count(events: &[CoreEvent], pred: impl Fn(&CoreEvent) -> bool) -> usize {
        events.iter().filter(|e| pred(e)).count()
    }

    #[test]
    fn test_selected_package_accrues_on_tick() {
        let mut f = Fixture::new(Duration::ZERO);

        let events = f.foreground(Some(game()));
        assert!(matches!(events.as_slice(), [CoreEvent::SessionStarted { .. }]));

        f.tick(secs(5));
        f.tick(secs(5));
        assert_eq!(f.engine.used_today(&game()), secs(10));
        assert_eq!(
            f.store.get_usage(&game(), calendar_day(&f.now)).unwrap(),
            secs(10)
        );

        f.advance(secs(3));
        let events = f.foreground(None);
        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::SessionEnded { duration, .. } if *duration == secs(13)
        )));
        assert_eq!(f.engine.used_today(&game()), secs(13));
    }

    #[test]
    fn test_unselected_package_is_not_tracked() {
        let mut f = Fixture::new(Duration::ZERO);

        let events = f.foreground(Some(chat()));
        assert!(events.is_empty());

        f.tick(secs(5));
        assert_eq!(f.engine.used_today(&chat()), Duration::ZERO);
        assert!(f.engine.current_session().is_none());
    }

    #[test]
    fn test_zero_limit_blocks_on_first_evaluation() {
        let mut f = Fixture::new(Duration::ZERO);
        f.engine
            .apply_limit(&game(), LimitFetch::Configured { minutes: 0 }, f.now, f.mono);

        let events = f.foreground(Some(game()));

        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::BlockEntered { reason: BlockReason::ZeroLimit, .. }
        )));
        assert!(events.contains(&CoreEvent::CorrectiveAction { package: game() }));
        assert!(generation_started(&events).is_some());
        assert!(f.engine.current_session().is_none());
    }

    #[test]
    fn test_limit_exhausted_by_tick_blocks_and_notifies_once() {
        let mut f = Fixture::new(mins(29));

        let events = f.foreground(Some(game()));
        assert!(events.iter().any(|e| matches!(e, CoreEvent::Warning { .. })));

        let events = f.tick(mins(2));
        assert_eq!(f.engine.used_today(&game()), mins(31));
        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::BlockEntered {
                reason: BlockReason::LimitExhausted { used, limit },
                ..
            } if *used == mins(31) && *limit == mins(30)
        )));
        assert_eq!(
            count(&events, |e| matches!(e, CoreEvent::NotifyPartner(_))),
            1
        );
        let generation = generation_started(&events).unwrap();
        assert!(f.engine.current_session().is_none());

        // Re-checks repeat the corrective action without a second notice
        f.advance(secs(1));
        let events = f.recheck(generation);
        assert_eq!(events, vec![CoreEvent::CorrectiveAction { package: game() }]);

        // Leaving and coming back re-blocks from the cache
        let events = f.foreground(None);
        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::EnforcementStopped {
                reason: EnforcementStopReason::LeftForeground,
                ..
            }
        )));

        let events = f.foreground(Some(game()));
        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::CorrectiveAction { .. }
        )));
        assert_eq!(
            count(&events, |e| matches!(e, CoreEvent::NotifyPartner(_))),
            0
        );
        assert!(matches!(
            f.engine.decide_for(&game(), f.now),
            Verdict::Block {
                reason: BlockReason::BlockedToday { .. }
            }
        ));

        // Later ticks do not re-enter the block
        let events = f.tick(secs(5));
        assert_eq!(
            count(&events, |e| matches!(e, CoreEvent::BlockEntered { .. })),
            0
        );
    }

    #[test]
    fn test_grant_unblocks_and_cancels_enforcement() {
        let mut f = Fixture::new(mins(31));
        let events = f.foreground(Some(game()));
        let generation = generation_started(&events).unwrap();

        let events = f.grant(GrantChange::added(game(), Duration::from_millis(300_000)));

        assert!(events.contains(&CoreEvent::GrantApplied {
            package: game(),
            kind: GrantChangeKind::Added,
            remaining: mins(5),
        }));
        assert!(events.contains(&CoreEvent::Unblocked { package: game() }));
        assert!(events.contains(&CoreEvent::EnforcementStopped {
            package: game(),
            generation,
            reason: EnforcementStopReason::Unblocked,
        }));
        assert!(events.iter().any(|e| matches!(e, CoreEvent::SessionStarted { .. })));
        assert_eq!(f.engine.decide_for(&game(), f.now), Verdict::Allow);

        // The old loop's pending re-check is a no-op
        assert!(f.recheck(generation).is_empty());
    }

    #[test]
    fn test_deselecting_blocked_package_allows_and_purges() {
        let mut f = Fixture::new(mins(31));
        f.foreground(Some(game()));
        assert!(f.engine.decide_for(&game(), f.now).is_block());

        let events = f.engine.set_selection([chat()], f.now, f.mono);

        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::EnforcementStopped {
                reason: EnforcementStopReason::Deselected,
                ..
            }
        )));
        assert!(events.contains(&CoreEvent::Unblocked { package: game() }));
        assert!(events.contains(&CoreEvent::RefreshLimits {
            packages: vec![chat()]
        }));
        assert_eq!(f.engine.decide_for(&game(), f.now), Verdict::Allow);
        assert_eq!(f.engine.package_state(&game(), f.now).block_marker, None);
        assert_eq!(f.store.load_selection().unwrap(), vec![chat()]);

        // Usage survives, so reselecting blocks again
        f.engine.set_selection([chat(), game()], f.now, f.mono);
        assert!(f.engine.decide_for(&game(), f.now).is_block());
    }

    #[test]
    fn test_wallet_spends_down_then_blocks_at_zero() {
        let mut f = Fixture::new(mins(31));
        f.grant(GrantChange::added(game(), secs(12)));

        let events = f.foreground(Some(game()));
        assert!(matches!(events.as_slice(), [CoreEvent::SessionStarted { .. }]));

        let events = f.tick(secs(5));
        assert!(events.contains(&CoreEvent::WalletPush {
            package: game(),
            remaining: secs(7)
        }));
        assert!(!events.iter().any(|e| matches!(e, CoreEvent::BlockEntered { .. })));

        let events = f.tick(secs(5));
        assert_eq!(f.engine.wallet_remaining(&game()), secs(2));
        assert!(!events.iter().any(|e| matches!(e, CoreEvent::BlockEntered { .. })));

        let events = f.tick(secs(5));
        assert_eq!(f.engine.wallet_remaining(&game()), Duration::ZERO);
        assert!(events.contains(&CoreEvent::WalletExhausted { package: game() }));
        assert!(events.contains(&CoreEvent::ClearGrant { package: game() }));
        assert!(events.iter().any(|e| matches!(e, CoreEvent::BlockEntered { .. })));
        assert_eq!(f.engine.used_today(&game()), mins(31) + secs(15));
        assert_eq!(
            f.store.load_wallets().unwrap().get(&game()),
            Some(&WalletRecord::Exhausted {
                last_remote: secs(12)
            })
        );
    }

    #[test]
    fn test_wallet_exhaustion_within_limit_keeps_allowing() {
        let mut f = Fixture::new(Duration::ZERO);
        f.grant(GrantChange::added(game(), secs(5)));
        f.foreground(Some(game()));

        let events = f.tick(secs(5));
        assert!(events.contains(&CoreEvent::WalletExhausted { package: game() }));
        assert!(!events.iter().any(|e| matches!(e, CoreEvent::BlockEntered { .. })));
        assert_eq!(f.engine.current_session(), Some(&game()));
    }

    #[test]
    fn test_reconciliation_keeps_running_minimum() {
        let mut f = Fixture::new(Duration::ZERO);
        f.grant(GrantChange::added(game(), secs(600)));

        for r in [540, 900, 420, 480] {
            f.grant(GrantChange::modified(game(), secs(r)));
        }
        assert_eq!(f.engine.wallet_remaining(&game()), secs(420));

        // A lagging remote gets our value pushed back
        let events = f.grant(GrantChange::modified(game(), secs(500)));
        assert_eq!(
            events,
            vec![CoreEvent::WalletPush {
                package: game(),
                remaining: secs(420)
            }]
        );
    }

    #[test]
    fn test_stale_modify_does_not_revive_spent_wallet() {
        let mut f = Fixture::new(mins(31));
        f.grant(GrantChange::added(game(), secs(5)));
        f.foreground(Some(game()));
        f.tick(secs(5));
        assert!(f.engine.decide_for(&game(), f.now).is_block());

        // The remote still shows the grant as it was, or our own clear
        for r in [5, 0] {
            let events = f.grant(GrantChange::modified(game(), secs(r)));
            assert!(events.is_empty());
            assert!(f.engine.decide_for(&game(), f.now).is_block());
        }
    }

    #[test]
    fn test_second_grant_after_spend_down_unblocks() {
        let mut f = Fixture::new(mins(31));
        f.grant(GrantChange::added(game(), secs(5)));
        f.foreground(Some(game()));
        let events = f.tick(secs(5));
        assert!(events.contains(&CoreEvent::ClearGrant { package: game() }));
        assert!(f.engine.decide_for(&game(), f.now).is_block());
        f.grant(GrantChange::modified(game(), Duration::ZERO));

        // Partner approves more time into the same grant document
        f.advance(secs(30));
        let events = f.grant(GrantChange::modified(game(), secs(300)));
        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::GrantApplied {
                kind: GrantChangeKind::Modified,
                ..
            }
        )));
        assert!(events.contains(&CoreEvent::Unblocked { package: game() }));
        assert_eq!(f.engine.wallet_remaining(&game()), secs(300));
        assert_eq!(f.engine.decide_for(&game(), f.now), Verdict::Allow);
        assert_eq!(f.engine.current_session(), Some(&game()));
        assert_eq!(
            f.store.load_wallets().unwrap().get(&game()),
            Some(&WalletRecord::Remaining(secs(300)))
        );
    }

    #[test]
    fn test_restart_on_later_day_then_grant() {
        let mut f = Fixture::new(mins(31));
        f.grant(GrantChange::added(game(), secs(5)));
        f.foreground(Some(game()));
        f.tick(secs(5));

        // Same day: the first poll replays the spent value and is ignored
        let mut engine = CoreEngine::new(&Policy::default(), f.store.clone(), f.now);
        assert!(
            engine
                .on_grant_change(&GrantChange::modified(game(), secs(5)), f.now, f.mono)
                .is_empty()
        );
        assert!(engine.decide_for(&game(), f.now).is_block());

        // Three days later the spent wallet is gone and a grant applies
        let later = at(5, 9, 0);
        let mut engine = CoreEngine::new(&Policy::default(), f.store.clone(), later);
        assert!(f.store.load_wallets().unwrap().is_empty());

        let events =
            engine.on_grant_change(&GrantChange::modified(game(), secs(600)), later, f.mono);
        assert!(events.iter().any(|e| matches!(e, CoreEvent::GrantApplied { .. })));
        assert_eq!(engine.wallet_remaining(&game()), secs(600));
        assert_eq!(engine.decide_for(&game(), later), Verdict::Allow);
    }

    #[test]
    fn test_grant_removed_reblocks_foreground() {
        let mut f = Fixture::new(mins(31));
        f.grant(GrantChange::added(game(), mins(10)));
        f.foreground(Some(game()));
        assert_eq!(f.engine.current_session(), Some(&game()));

        let events = f.grant(GrantChange::removed(game()));
        assert!(events.iter().any(|e| matches!(e, CoreEvent::SessionEnded { .. })));
        assert!(events.iter().any(|e| matches!(e, CoreEvent::BlockEntered { .. })));
        assert!(f.store.load_wallets().unwrap().is_empty());
    }

    #[test]
    fn test_grant_for_unselected_package_is_ignored() {
        let mut f = Fixture::new(Duration::ZERO);
        assert!(f.grant(GrantChange::added(chat(), mins(10))).is_empty());
        assert_eq!(f.engine.wallet_remaining(&chat()), Duration::ZERO);
    }

    #[test]
    fn test_daily_reset_is_idempotent() {
        let mut f = Fixture::new(mins(31));
        f.foreground(Some(game()));
        assert!(f.engine.decide_for(&game(), f.now).is_block());

        let events = f.tick(secs(5));
        assert!(!events.iter().any(|e| matches!(e, CoreEvent::DailyReset { .. })));

        // Midnight
        f.now = at(3, 0, 0);
        let events = f.engine.on_tick(f.now, f.mono);
        assert!(events.contains(&CoreEvent::DailyReset {
            day: calendar_day(&f.now)
        }));
        assert!(events.iter().any(|e| matches!(e, CoreEvent::SessionStarted { .. })));
        assert_eq!(f.engine.used_today(&game()), Duration::ZERO);
        assert_eq!(f.engine.package_state(&game(), f.now).block_marker, None);
        assert_eq!(
            f.store.get_last_reset_day().unwrap(),
            Some(calendar_day(&f.now))
        );

        // Same day again: nothing
        f.now = at(3, 0, 5);
        let events = f.engine.on_tick(f.now, f.mono);
        assert!(!events.iter().any(|e| matches!(e, CoreEvent::DailyReset { .. })));
    }

    #[test]
    fn test_clock_set_back_does_not_reset() {
        let mut f = Fixture::new(mins(31));
        f.now = at(1, 23, 0);

        let events = f.engine.on_tick(f.now, f.mono);
        assert!(!events.iter().any(|e| matches!(e, CoreEvent::DailyReset { .. })));
        assert_eq!(f.engine.used_today(&game()), mins(31));
    }

    #[test]
    fn test_warning_emitted_once_per_day() {
        let mut f = Fixture::new(mins(24));
        f.foreground(Some(game()));

        let events = f.tick(mins(1));
        assert!(events.contains(&CoreEvent::Warning {
            package: game(),
            remaining: mins(5)
        }));

        let events = f.tick(mins(1));
        assert!(!events.iter().any(|e| matches!(e, CoreEvent::Warning { .. })));
    }

    #[test]
    fn test_enforcement_expires_after_attempt_budget() {
        let mut policy = Policy::default();
        policy.enforcement.max_attempts = 3;
        let mut f = Fixture::with_policy(policy, mins(31));

        let events = f.foreground(Some(game()));
        let generation = generation_started(&events).unwrap();

        f.recheck(generation);
        f.recheck(generation);
        let events = f.recheck(generation);
        assert!(events.contains(&CoreEvent::EnforcementStopped {
            package: game(),
            generation,
            reason: EnforcementStopReason::AttemptsExhausted,
        }));
        assert_eq!(
            f.engine.enforcement().unwrap().phase,
            EnforcementPhase::Expired
        );

        // Still blocked, no more re-checks
        assert!(f.recheck(generation).is_empty());
        assert!(f.engine.decide_for(&game(), f.now).is_block());

        let audits = f.store.get_recent_audits(10).unwrap();
        assert!(audits.iter().any(|a| matches!(
            a.event,
            AuditEventType::EnforcementExpired { attempts: 3, .. }
        )));
    }

    #[test]
    fn test_recheck_stops_when_limit_raised() {
        let mut f = Fixture::new(mins(31));
        let events = f.foreground(Some(game()));
        let generation = generation_started(&events).unwrap();

        let events = f
            .engine
            .apply_limit(&game(), LimitFetch::Configured { minutes: 60 }, f.now, f.mono);
        assert!(events.contains(&CoreEvent::Unblocked { package: game() }));
        assert!(events.contains(&CoreEvent::EnforcementStopped {
            package: game(),
            generation,
            reason: EnforcementStopReason::Unblocked,
        }));
        assert_eq!(f.engine.current_session(), Some(&game()));
        assert_eq!(f.engine.daily_limit(&game()), mins(60));
        assert_eq!(f.store.load_limits().unwrap().get(&game()), Some(&mins(60)));
    }

    #[test]
    fn test_failed_limit_fetch_keeps_cached_value() {
        let mut f = Fixture::new(Duration::ZERO);
        f.engine
            .apply_limit(&game(), LimitFetch::Configured { minutes: 10 }, f.now, f.mono);

        let events = f.engine.apply_limit(&game(), LimitFetch::Failed, f.now, f.mono);
        assert!(events.is_empty());
        assert_eq!(f.engine.daily_limit(&game()), mins(10));
    }

    #[test]
    fn test_tick_requests_limit_refresh() {
        let mut f = Fixture::new(Duration::ZERO);
        let events = f.tick(secs(5));
        assert_eq!(
            events,
            vec![CoreEvent::RefreshLimits {
                packages: vec![game()]
            }]
        );
    }

    #[test]
    fn test_state_survives_restart() {
        let mut f = Fixture::new(Duration::ZERO);
        f.grant(GrantChange::added(game(), mins(10)));
        f.engine
            .apply_limit(&game(), LimitFetch::Configured { minutes: 45 }, f.now, f.mono);
        f.foreground(Some(game()));
        f.tick(mins(2));

        let engine = CoreEngine::new(&Policy::default(), f.store.clone(), f.now);
        assert!(engine.is_selected(&game()));
        assert_eq!(engine.used_today(&game()), mins(2));
        assert_eq!(engine.wallet_remaining(&game()), mins(8));
        assert_eq!(engine.daily_limit(&game()), mins(45));

        // A restart on the next day starts from zero
        let engine = CoreEngine::new(&Policy::default(), f.store.clone(), at(3, 8, 0));
        assert_eq!(engine.used_today(&game()), Duration::ZERO);
        assert_eq!(engine.last_reset_day(), Some(calendar_day(&at(3, 8, 0))));
    }

    #[test]
    fn test_snapshot() {
        let mut f = Fixture::new(mins(5));
        f.foreground(Some(game()));
        f.advance(secs(30));

        let snapshot = f.engine.snapshot(f.now, f.mono);
        assert_eq!(snapshot.api_version, API_VERSION);
        assert_eq!(snapshot.foreground, Some(game()));
        assert_eq!(snapshot.session.unwrap().open_for, secs(30));
        assert!(snapshot.enforcement.is_none());
        assert_eq!(snapshot.packages.len(), 1);
        assert_eq!(snapshot.packages[0].used_today, mins(5));
        assert_eq!(snapshot.packages[0].daily_limit, mins(30));
    }

    #[test]
    fn test_reload_policy_changes_default_limit() {
        let mut f = Fixture::new(mins(31));
        assert!(f.engine.decide_for(&game(), f.now).is_block());

        let mut policy = Policy::default();
        policy.engine.default_limit = mins(60);
        f.engine.reload_policy(&policy);

        assert_eq!(f.engine.daily_limit(&game()), mins(60));
        assert!(f.engine.decide_for(&game(), f.now).is_allowed());
    }
}
