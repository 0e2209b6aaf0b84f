use thiserror::Error;

/// Lifecycle of a jam view's channel binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePhase {
    /// Nothing bound yet.
    Disconnected,
    /// Channel subscribed and handlers bound; events flow in.
    Subscribed,
    /// Torn down for good.
    Unsubscribed,
}

/// Actions that move a binding between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeAction {
    /// Subscribe and bind handlers.
    Mount,
    /// Deliver one event to the bound handlers.
    Receive,
    /// Unbind and unsubscribe.
    Unmount,
}

/// Error returned when attempting an action the current phase does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {action:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the binding was in when the action was requested.
    pub from: BridgePhase,
    /// The action that cannot be applied from this phase.
    pub action: BridgeAction,
}

/// Phase tracker with a counter of delivered events.
#[derive(Debug, Clone)]
pub struct BridgeStateMachine {
    phase: BridgePhase,
    received: u64,
}

impl Default for BridgeStateMachine {
    fn default() -> Self {
        Self {
            phase: BridgePhase::Disconnected,
            received: 0,
        }
    }
}

impl BridgeStateMachine {
    /// Fresh machine in [`BridgePhase::Disconnected`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub fn phase(&self) -> BridgePhase {
        self.phase
    }

    /// Events delivered while subscribed.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Apply `action`, returning the phase reached.
    pub fn apply(&mut self, action: BridgeAction) -> Result<BridgePhase, InvalidTransition> {
        let next = match (self.phase, action) {
            (BridgePhase::Disconnected, BridgeAction::Mount) => BridgePhase::Subscribed,
            (BridgePhase::Subscribed, BridgeAction::Receive) => {
                self.received += 1;
                BridgePhase::Subscribed
            }
            (BridgePhase::Subscribed, BridgeAction::Unmount) => BridgePhase::Unsubscribed,
            (from, action) => return Err(InvalidTransition { from, action }),
        };
        self.phase = next;
        Ok(next)
    }
}
