//! Lifecycle states and transitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a camera node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// No session
    Unconfigured,
    /// Session open, not streaming
    Inactive,
    /// Session open, acquisition loop running
    Active,
    /// A failure occurred; resources are released
    ErrorProcessing,
    /// Shut down for good
    Finalized,
}

impl State {
    /// Whether a session is expected to be open in this state.
    pub const fn holds_session(&self) -> bool {
        matches!(self, State::Inactive | State::Active)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Unconfigured => "unconfigured",
            State::Inactive => "inactive",
            State::Active => "active",
            State::ErrorProcessing => "error_processing",
            State::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Externally or internally triggered state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    Configure,
    Activate,
    Deactivate,
    Cleanup,
    Shutdown,
    /// Raised internally when the acquisition loop fails
    Error,
}

impl Transition {
    /// State reached when the transition succeeds from `from`, or `None` if the
    /// transition is not valid there.
    pub const fn target(&self, from: State) -> Option<State> {
        use State::*;
        match (self, from) {
            (Transition::Configure, Unconfigured | ErrorProcessing) => Some(Inactive),
            (Transition::Activate, Inactive) => Some(Active),
            (Transition::Deactivate, Active) => Some(Inactive),
            (Transition::Cleanup, Inactive | ErrorProcessing) => Some(Unconfigured),
            (Transition::Shutdown, Unconfigured | Inactive | Active | ErrorProcessing) => {
                Some(Finalized)
            }
            (Transition::Error, Unconfigured | Inactive | Active | ErrorProcessing) => {
                Some(ErrorProcessing)
            }
            _ => None,
        }
    }

    /// State reached when a valid transition from `from` fails.
    ///
    /// A failed configure leaves the node where it was; every other failure
    /// ends in `ErrorProcessing`.
    pub const fn failure_target(&self, from: State) -> State {
        match self {
            Transition::Configure => from,
            _ => State::ErrorProcessing,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transition::Configure => "configure",
            Transition::Activate => "activate",
            Transition::Deactivate => "deactivate",
            Transition::Cleanup => "cleanup",
            Transition::Shutdown => "shutdown",
            Transition::Error => "error",
        };
        f.write_str(name)
    }
}
