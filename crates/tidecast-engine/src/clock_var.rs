//! Clock variables: unification cells binding sources to clocks.
//!
//! A freshly created source does not know which clock will drive it. Its
//! clock variable starts unknown and is later unified, either with another
//! variable (two sources that must share a clock) or with a known clock
//! (usually the default wallclock, at collection time). Unification uses
//! union-find with path compression; once a class is known it never changes.

use std::sync::{Arc, Mutex};

use crate::clock::{same_clock, SchedulerClock};
use crate::collector;
use crate::error::ClockError;

#[derive(Clone)]
pub struct ClockVar {
    cell: Arc<Mutex<VarState>>,
}

enum VarState {
    Unknown,
    Link(ClockVar),
    Known(Arc<dyn SchedulerClock>),
}

impl ClockVar {
    pub fn unknown() -> Self {
        Self {
            cell: Arc::new(Mutex::new(VarState::Unknown)),
        }
    }

    pub fn known(clock: Arc<dyn SchedulerClock>) -> Self {
        Self {
            cell: Arc::new(Mutex::new(VarState::Known(clock))),
        }
    }

    /// Two variables built from the same cell (not merely unified).
    pub(crate) fn same_cell(&self, other: &ClockVar) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Representative of this variable's equivalence class, compressing
    /// link chains on the way.
    fn root(&self) -> ClockVar {
        let next = {
            let state = self.cell.lock().expect("clock variable poisoned");
            match &*state {
                VarState::Link(next) => next.clone(),
                _ => return self.clone(),
            }
        };
        let root = next.root();
        if !root.same_cell(&next) {
            *self.cell.lock().expect("clock variable poisoned") = VarState::Link(root.clone());
        }
        root
    }

    pub fn is_known(&self) -> bool {
        self.get().is_some()
    }

    /// The clock this variable is bound to, if any.
    pub fn get(&self) -> Option<Arc<dyn SchedulerClock>> {
        let root = self.root();
        let next = {
            let state = root.cell.lock().expect("clock variable poisoned");
            match &*state {
                VarState::Known(clock) => return Some(Arc::clone(clock)),
                VarState::Unknown => return None,
                // A concurrent unification can re-link a root we just
                // resolved; chase the new link.
                VarState::Link(next) => next.clone(),
            }
        };
        next.get()
    }

    /// Merge two equivalence classes. Fails when both sides are bound to
    /// distinct clocks.
    pub fn unify(&self, other: &ClockVar) -> Result<(), ClockError> {
        let _guard = collector::global_guard();
        self.unify_locked(other)
    }

    /// Unification body; the caller holds the global collector lock.
    pub(crate) fn unify_locked(&self, other: &ClockVar) -> Result<(), ClockError> {
        let left = self.root();
        let right = other.root();
        if left.same_cell(&right) {
            return Ok(());
        }

        let mut left_state = left.cell.lock().expect("clock variable poisoned");
        let mut right_state = right.cell.lock().expect("clock variable poisoned");

        enum Merge {
            LeftIntoRight,
            RightIntoLeft,
            Conflict(String, String),
        }

        let merge = match (&*left_state, &*right_state) {
            (VarState::Known(a), VarState::Known(b)) => {
                if same_clock(a, b) {
                    Merge::LeftIntoRight
                } else {
                    Merge::Conflict(a.id().to_string(), b.id().to_string())
                }
            },
            (VarState::Known(_), _) => Merge::RightIntoLeft,
            _ => Merge::LeftIntoRight,
        };

        match merge {
            Merge::LeftIntoRight => {
                *left_state = VarState::Link(right.clone());
                Ok(())
            },
            Merge::RightIntoLeft => {
                *right_state = VarState::Link(left.clone());
                Ok(())
            },
            Merge::Conflict(left, right) => Err(ClockError::Conflict { left, right }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::ClockVar;
    use crate::clock::{Clock, SchedulerClock};
    use crate::error::ClockError;

    fn known_clock(name: &str) -> Arc<dyn SchedulerClock> {
        Clock::new(name) as Arc<dyn SchedulerClock>
    }

    #[test]
    fn unify_with_self_is_a_noop() {
        let v = ClockVar::unknown();
        v.unify(&v).expect("self unification");
        assert!(!v.is_known());
    }

    #[test]
    fn unknown_meets_known_becomes_known() {
        let clock = known_clock("uk-known");
        let unknown = ClockVar::unknown();
        let known = ClockVar::known(Arc::clone(&clock));
        unknown.unify(&known).expect("compatible");
        assert!(unknown.is_known());
        let bound = unknown.get().expect("bound");
        assert_eq!(bound.id(), clock.id());
    }

    #[test]
    fn unification_is_symmetric() {
        let clock = known_clock("uk-sym");
        let a = ClockVar::unknown();
        let b = ClockVar::known(Arc::clone(&clock));
        b.unify(&a).expect("compatible");
        assert!(a.is_known());
    }

    #[test]
    fn chained_unification_propagates_through_the_class() {
        let a = ClockVar::unknown();
        let b = ClockVar::unknown();
        let c = ClockVar::unknown();
        a.unify(&b).expect("compatible");
        b.unify(&c).expect("compatible");
        let clock = known_clock("uk-chain");
        c.unify(&ClockVar::known(clock)).expect("compatible");
        assert!(a.is_known());
        assert!(b.is_known());
    }

    #[test]
    fn distinct_known_clocks_conflict() {
        let a = ClockVar::known(known_clock("uk-one"));
        let b = ClockVar::known(known_clock("uk-two"));
        let err = a.unify(&b).expect_err("incompatible");
        assert!(matches!(err, ClockError::Conflict { .. }));
        // both sides keep their original binding
        assert!(a.get().expect("still bound").id().starts_with("uk-one"));
        assert!(b.get().expect("still bound").id().starts_with("uk-two"));
    }

    #[test]
    fn same_known_clock_unifies() {
        let clock = known_clock("uk-same");
        let a = ClockVar::known(Arc::clone(&clock));
        let b = ClockVar::known(clock);
        a.unify(&b).expect("same clock on both sides");
    }
}
