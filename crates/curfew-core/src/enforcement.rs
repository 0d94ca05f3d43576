//! Enforcement loop state
//!
//! Idle → Enforcing → (Idle on unblock | Expired when the attempt budget is
//! spent). One loop per device; each loop carries a generation number so a
//! re-check scheduled for a superseded loop is recognised and dropped.

use curfew_api::{EnforcementInfo, EnforcementPhase};
use curfew_util::PackageId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementLoop {
    pub package: PackageId,
    pub generation: u64,
    pub attempts: u32,
    pub phase: EnforcementPhase,
}

/// Outcome of one re-check that found the package still blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Corrective action repeated, loop continues
    Retry { attempt: u32 },
    /// Budget spent; loop is now Expired
    Exhausted { attempts: u32 },
}

#[derive(Debug)]
pub struct Enforcement {
    current: Option<EnforcementLoop>,
    next_generation: u64,
    max_attempts: u32,
}

impl Enforcement {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            current: None,
            next_generation: 1,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn set_max_attempts(&mut self, max_attempts: u32) {
        self.max_attempts = max_attempts;
    }

    /// Loop that is still polling
    pub fn active(&self) -> Option<&EnforcementLoop> {
        self.current
            .as_ref()
            .filter(|l| l.phase == EnforcementPhase::Enforcing)
    }

    pub fn is_enforcing(&self, package: &PackageId) -> bool {
        self.active().is_some_and(|l| &l.package == package)
    }

    /// Start a loop for `package`; returns its generation and the loop it
    /// replaced, if that one was still polling
    pub fn start(&mut self, package: PackageId) -> (u64, Option<EnforcementLoop>) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let superseded = self
            .current
            .replace(EnforcementLoop {
                package,
                generation,
                attempts: 0,
                phase: EnforcementPhase::Enforcing,
            })
            .filter(|l| l.phase == EnforcementPhase::Enforcing);

        (generation, superseded)
    }

    /// Stop polling; returns the loop if it was active
    pub fn stop(&mut self) -> Option<EnforcementLoop> {
        let stopped = self.current.take()?;
        (stopped.phase == EnforcementPhase::Enforcing).then_some(stopped)
    }

    /// Count a re-check for the active loop with `generation`.
    ///
    /// Returns `None` for a stale generation or when nothing is polling.
    pub fn record_attempt(&mut self, generation: u64) -> Option<Attempt> {
        let current = self
            .current
            .as_mut()
            .filter(|l| l.generation == generation && l.phase == EnforcementPhase::Enforcing)?;

        current.attempts += 1;
        if current.attempts >= self.max_attempts {
            current.phase = EnforcementPhase::Expired;
            Some(Attempt::Exhausted {
                attempts: current.attempts,
            })
        } else {
            Some(Attempt::Retry {
                attempt: current.attempts,
            })
        }
    }

    pub fn info(&self) -> Option<EnforcementInfo> {
        self.current.as_ref().map(|l| EnforcementInfo {
            package: l.package.clone(),
            phase: l.phase,
            attempts: l.attempts,
            max_attempts: self.max_attempts,
        })
    }
}
