//! Fault budget and directives.

use std::collections::VecDeque;
use std::time::Duration;

use rpcmesh_settings::SupervisionSettings;
use tokio::time::Instant;

use crate::child::ChildKind;
use crate::errors::ChildFault;

/// What the supervisor tells a faulted child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Directive {
    /// Drop the failed message and keep processing with state intact.
    Resume,
    /// Give up: the whole subsystem goes down.
    Escalate,
}

/// Picks a directive for faults that are still within budget.
pub trait FaultPolicy: Send + Sync + 'static {
    /// Decide what to do about `fault` raised by `child`.
    fn decide(&self, child: ChildKind, fault: &ChildFault) -> Directive;
}

/// Resume every fault, whatever its kind.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResumeAll;

impl FaultPolicy for ResumeAll {
    fn decide(&self, _child: ChildKind, _fault: &ChildFault) -> Directive {
        Directive::Resume
    }
}

/// At most `max_restarts` faults per child inside any `window`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Tolerated faults per window.
    pub max_restarts: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 10,
            window: Duration::from_secs(60),
        }
    }
}

impl From<&SupervisionSettings> for RestartPolicy {
    fn from(settings: &SupervisionSettings) -> Self {
        Self {
            max_restarts: settings.max_restarts,
            window: settings.restart_window(),
        }
    }
}

/// Sliding record of one child's recent faults.
#[derive(Debug)]
pub struct FaultWindow {
    policy: RestartPolicy,
    faults: VecDeque<Instant>,
}

impl FaultWindow {
    /// Empty window for `policy`.
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            faults: VecDeque::new(),
        }
    }

    /// Record a fault at `now`; `false` once the budget is exceeded.
    ///
    /// Faults older than the window are forgotten first, so the fault that
    /// makes the count reach `max_restarts + 1` is the one that fails.
    pub fn record(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.faults.front() {
            if now.saturating_duration_since(oldest) >= self.policy.window {
                let _ = self.faults.pop_front();
            } else {
                break;
            }
        }
        self.faults.push_back(now);
        self.faults.len() <= self.policy.max_restarts as usize
    }

    /// Faults currently inside the window.
    pub fn len(&self) -> usize {
        self.faults.len()
    }

    /// Whether no fault is inside the window.
    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy(max: u32, secs: u64) -> RestartPolicy {
        RestartPolicy {
            max_restarts: max,
            window: Duration::from_secs(secs),
        }
    }

    #[test]
    fn defaults_match_settings_defaults() {
        assert_eq!(
            RestartPolicy::default(),
            RestartPolicy::from(&SupervisionSettings::default())
        );
    }

    #[test]
    fn nth_plus_one_fault_in_window_fails() {
        let mut window = FaultWindow::new(policy(3, 60));
        let start = Instant::now();
        for i in 0..3 {
            assert!(window.record(start + Duration::from_secs(i)));
        }
        assert!(!window.record(start + Duration::from_secs(3)));
        assert_eq!(window.len(), 4);
    }

    #[test]
    fn old_faults_age_out() {
        let mut window = FaultWindow::new(policy(2, 10));
        let start = Instant::now();
        assert!(window.record(start));
        assert!(window.record(start + Duration::from_secs(1)));
        // First two are gone by t=11s.
        assert!(window.record(start + Duration::from_secs(11)));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn zero_budget_escalates_first_fault() {
        let mut window = FaultWindow::new(policy(0, 60));
        assert!(window.is_empty());
        assert!(!window.record(Instant::now()));
    }

    #[test]
    fn resume_all_resumes_panics_too() {
        let p = ResumeAll;
        assert_eq!(
            p.decide(ChildKind::Broker, &ChildFault::Panicked("x".into())),
            Directive::Resume
        );
        assert_eq!(
            p.decide(ChildKind::Registry, &ChildFault::failed("y")),
            Directive::Resume
        );
    }

    proptest! {
        #[test]
        fn spaced_faults_never_exhaust_budget(
            max in 1_u32..20,
            window_secs in 1_u64..120,
            gaps in prop::collection::vec(0_u64..30, 1..200),
        ) {
            let mut window = FaultWindow::new(policy(max, window_secs));
            let mut now = Instant::now();
            for extra in gaps {
                assert!(window.record(now));
                now += Duration::from_secs(window_secs + extra);
            }
        }

        #[test]
        fn burst_fails_exactly_at_budget_plus_one(max in 0_u32..50) {
            let mut window = FaultWindow::new(policy(max, 60));
            let now = Instant::now();
            for _ in 0..max {
                prop_assert!(window.record(now));
            }
            prop_assert!(!window.record(now));
        }
    }
}
