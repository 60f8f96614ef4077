//! Per-resource lifecycle state machine.
//!
//! Every tiled resource moves through the states below. Transitions are
//! compare-and-set on an atomic cell, which gives a total order of transitions
//! per entry without any lock.
//!
//! ```text
//!   Unknown ──► Requesting ──► Requested ──► ProcessingRequest ──┬──► Ready
//!                                                                └──► Unavailable
//!
//!   Ready ──► Uploading ──► Uploaded ◄──► IsBeingUsed
//!               │
//!               └──► Ready          (upload failed, retried on next sync)
//!
//!   Uploaded ──► UnloadPending ──► Unloading ──► Unloaded
//!
//!   Ready | ProcessingRequest | Requested | Unloaded | Unavailable ──► JustBeforeDeath
//! ```
//!
//! An entry leaves its collection only from `JustBeforeDeath`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a tiled resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ResourceState {
    Unknown = 0,
    Requesting,
    Requested,
    ProcessingRequest,
    Ready,
    Unavailable,
    Uploading,
    Uploaded,
    IsBeingUsed,
    UnloadPending,
    Unloading,
    Unloaded,
    JustBeforeDeath,
}

impl ResourceState {
    /// Number of states.
    pub const COUNT: usize = 13;

    pub const ALL: [ResourceState; Self::COUNT] = [
        ResourceState::Unknown,
        ResourceState::Requesting,
        ResourceState::Requested,
        ResourceState::ProcessingRequest,
        ResourceState::Ready,
        ResourceState::Unavailable,
        ResourceState::Uploading,
        ResourceState::Uploaded,
        ResourceState::IsBeingUsed,
        ResourceState::UnloadPending,
        ResourceState::Unloading,
        ResourceState::Unloaded,
        ResourceState::JustBeforeDeath,
    ];

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: ResourceState) -> bool {
        use ResourceState::*;

        matches!(
            (self, next),
            (Unknown, Requesting)
                | (Requesting, Requested)
                | (Requested, ProcessingRequest)
                | (ProcessingRequest, Ready)
                | (ProcessingRequest, Unavailable)
                | (Ready, Uploading)
                | (Uploading, Uploaded)
                | (Uploading, Ready)
                | (Uploaded, IsBeingUsed)
                | (IsBeingUsed, Uploaded)
                | (Uploaded, UnloadPending)
                | (UnloadPending, Unloading)
                | (Unloading, Unloaded)
                | (Ready, JustBeforeDeath)
                | (ProcessingRequest, JustBeforeDeath)
                | (Requested, JustBeforeDeath)
                | (Unloaded, JustBeforeDeath)
                | (Unavailable, JustBeforeDeath)
        )
    }

    /// True while the entry owns device memory.
    pub fn is_gpu_resident(self) -> bool {
        matches!(
            self,
            ResourceState::Uploading
                | ResourceState::Uploaded
                | ResourceState::IsBeingUsed
                | ResourceState::UnloadPending
                | ResourceState::Unloading
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ResourceState::Unknown => "Unknown",
            ResourceState::Requesting => "Requesting",
            ResourceState::Requested => "Requested",
            ResourceState::ProcessingRequest => "ProcessingRequest",
            ResourceState::Ready => "Ready",
            ResourceState::Unavailable => "Unavailable",
            ResourceState::Uploading => "Uploading",
            ResourceState::Uploaded => "Uploaded",
            ResourceState::IsBeingUsed => "IsBeingUsed",
            ResourceState::UnloadPending => "UnloadPending",
            ResourceState::Unloading => "Unloading",
            ResourceState::Unloaded => "Unloaded",
            ResourceState::JustBeforeDeath => "JustBeforeDeath",
        }
    }

    fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or(ResourceState::JustBeforeDeath)
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Atomic holder of a [`ResourceState`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: ResourceState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> ResourceState {
        ResourceState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `expected` to `next` if the cell currently holds `expected`.
    ///
    /// Returns false when another thread got there first. Asking for an edge
    /// that is not in the lifecycle graph is an invariant violation and never
    /// changes the cell.
    pub fn set_state_if(&self, expected: ResourceState, next: ResourceState) -> bool {
        if !expected.can_transition_to(next) {
            crate::invariant_violation!("illegal resource transition {} -> {}", expected, next);
            return false;
        }

        self.0
            .compare_exchange(
                expected as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Try each of `candidates` in order, returning the one the cell moved from.
    pub fn set_state_if_any(
        &self,
        candidates: &[ResourceState],
        next: ResourceState,
    ) -> Option<ResourceState> {
        candidates
            .iter()
            .copied()
            .find(|&from| self.set_state_if(from, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use ResourceState::*;

    #[test]
    fn test_happy_path() {
        let cell = StateCell::new(Unknown);
        for (from, to) in [
            (Unknown, Requesting),
            (Requesting, Requested),
            (Requested, ProcessingRequest),
            (ProcessingRequest, Ready),
            (Ready, Uploading),
            (Uploading, Uploaded),
            (Uploaded, IsBeingUsed),
            (IsBeingUsed, Uploaded),
            (Uploaded, UnloadPending),
            (UnloadPending, Unloading),
            (Unloading, Unloaded),
            (Unloaded, JustBeforeDeath),
        ] {
            assert!(cell.set_state_if(from, to), "{} -> {}", from, to);
            assert_eq!(cell.get(), to);
        }
    }

    #[test]
    fn test_cas_fails_on_stale_expectation() {
        let cell = StateCell::new(Requested);
        assert!(!cell.set_state_if(Ready, Uploading));
        assert_eq!(cell.get(), Requested);
    }

    #[test]
    fn test_set_state_if_any_reports_source() {
        let cell = StateCell::new(Unavailable);
        let from = cell.set_state_if_any(&[Ready, ProcessingRequest, Unavailable], JustBeforeDeath);
        assert_eq!(from, Some(Unavailable));
        assert_eq!(cell.get(), JustBeforeDeath);

        let cell = StateCell::new(Uploaded);
        assert_eq!(cell.set_state_if_any(&[Ready, Unloaded], JustBeforeDeath), None);
        assert_eq!(cell.get(), Uploaded);
    }

    #[test]
    fn test_gpu_resident_states_never_die() {
        for state in ResourceState::ALL {
            if state.is_gpu_resident() {
                assert!(!state.can_transition_to(JustBeforeDeath), "{}", state);
            }
        }
    }

    #[test]
    fn test_just_before_death_is_terminal() {
        for next in ResourceState::ALL {
            assert!(!JustBeforeDeath.can_transition_to(next));
        }
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "illegal resource transition")]
    fn test_illegal_transition_aborts_in_debug() {
        let cell = StateCell::new(Uploaded);
        cell.set_state_if(Uploaded, JustBeforeDeath);
    }

    fn any_state() -> impl Strategy<Value = ResourceState> {
        (0usize..ResourceState::ALL.len()).prop_map(|i| ResourceState::ALL[i])
    }

    proptest! {
        #[test]
        fn prop_u8_roundtrip(state in any_state()) {
            prop_assert_eq!(ResourceState::from_u8(state as u8), state);
        }

        #[test]
        fn prop_no_self_loops(state in any_state()) {
            prop_assert!(!state.can_transition_to(state));
        }

        #[test]
        fn prop_legal_walk_matches_table(steps in proptest::collection::vec(any_state(), 1..40)) {
            let cell = StateCell::new(Unknown);
            for next in steps {
                let current = cell.get();
                if current.can_transition_to(next) {
                    prop_assert!(cell.set_state_if(current, next));
                    prop_assert_eq!(cell.get(), next);
                }
            }
        }
    }
}
