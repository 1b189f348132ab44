//! Turn state machine
//!
//! Idle -> Sending -> Streaming -> Committed -> Idle, with Failed reachable
//! from Sending or Streaming. Reset returns any state to Idle.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    /// User node appended, waiting for the provider to accept the request
    Sending,
    /// Assistant node exists and receives deltas
    Streaming { assistant_id: String },
    Committed,
    Failed { reason: String },
}

impl TurnState {
    /// A turn is in flight and a new send must be rejected
    pub fn is_busy(&self) -> bool {
        matches!(self, TurnState::Sending | TurnState::Streaming { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Sending => "sending",
            TurnState::Streaming { .. } => "streaming",
            TurnState::Committed => "committed",
            TurnState::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    Send,
    StreamStarted { assistant_id: String },
    Completed,
    Error { reason: String },
    Reset,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition from {from} on {event:?}")]
    InvalidTransition { from: &'static str, event: TurnEvent },
}

#[derive(Debug, Clone)]
pub struct TurnTransition {
    pub from: TurnState,
    pub to: TurnState,
    pub event: TurnEvent,
}

#[derive(Debug, Clone)]
pub struct TurnMachine {
    current: TurnState,
    history: Vec<TurnTransition>,
    max_history: usize,
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnMachine {
    pub fn new() -> Self {
        Self {
            current: TurnState::Idle,
            history: Vec::new(),
            max_history: 50,
        }
    }

    pub fn state(&self) -> &TurnState {
        &self.current
    }

    pub fn history(&self) -> &[TurnTransition] {
        &self.history
    }

    pub fn handle(&mut self, event: TurnEvent) -> Result<TurnTransition, TransitionError> {
        let next = Self::next_state(&self.current, &event).ok_or_else(|| {
            TransitionError::InvalidTransition {
                from: self.current.name(),
                event: event.clone(),
            }
        })?;

        let transition = TurnTransition {
            from: std::mem::replace(&mut self.current, next.clone()),
            to: next,
            event,
        };

        self.history.push(transition.clone());
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }
        Ok(transition)
    }

    /// Move Idle -> Sending. Returns false when a turn is already in flight.
    pub fn try_begin(&mut self) -> bool {
        self.handle(TurnEvent::Send).is_ok()
    }

    fn next_state(state: &TurnState, event: &TurnEvent) -> Option<TurnState> {
        use TurnEvent as E;
        use TurnState as S;

        match (state, event) {
            (_, E::Reset) => Some(S::Idle),

            (S::Idle, E::Send) => Some(S::Sending),

            (S::Sending, E::StreamStarted { assistant_id }) => Some(S::Streaming {
                assistant_id: assistant_id.clone(),
            }),
            (S::Streaming { .. }, E::Completed) => Some(S::Committed),

            (S::Sending | S::Streaming { .. }, E::Error { reason }) => Some(S::Failed {
                reason: reason.clone(),
            }),

            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut machine = TurnMachine::new();
        assert!(machine.try_begin());
        machine
            .handle(TurnEvent::StreamStarted {
                assistant_id: "msg_b".into(),
            })
            .unwrap();
        assert!(machine.state().is_busy());
        machine.handle(TurnEvent::Completed).unwrap();
        assert_eq!(machine.state(), &TurnState::Committed);
        machine.handle(TurnEvent::Reset).unwrap();
        assert_eq!(machine.state(), &TurnState::Idle);
        assert_eq!(machine.history().len(), 4);
    }

    #[test]
    fn test_second_send_is_rejected_while_busy() {
        let mut machine = TurnMachine::new();
        assert!(machine.try_begin());
        assert!(!machine.try_begin());
        assert_eq!(machine.state(), &TurnState::Sending);
    }

    #[test]
    fn test_error_from_sending_and_streaming() {
        let mut machine = TurnMachine::new();
        machine.try_begin();
        machine
            .handle(TurnEvent::Error {
                reason: "refused".into(),
            })
            .unwrap();
        assert!(matches!(machine.state(), TurnState::Failed { reason } if reason == "refused"));
        assert!(!machine.state().is_busy());

        machine.handle(TurnEvent::Reset).unwrap();
        machine.try_begin();
        machine
            .handle(TurnEvent::StreamStarted {
                assistant_id: "a".into(),
            })
            .unwrap();
        machine
            .handle(TurnEvent::Error {
                reason: "reset".into(),
            })
            .unwrap();
        assert_eq!(machine.state().name(), "failed");
    }

    #[test]
    fn test_invalid_transitions() {
        let mut machine = TurnMachine::new();
        let err = machine.handle(TurnEvent::Completed).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { from: "idle", .. }));

        machine.try_begin();
        assert!(machine.handle(TurnEvent::Completed).is_err());
        assert_eq!(machine.state(), &TurnState::Sending);
    }
}
