use crate::error::AppError;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppState {
    Initializing,
    Running,
    Stopping,
    Stopped,
}

/// Validated application lifecycle state, shared across threads. Observers
/// subscribe to transitions over a channel instead of polling.
pub struct StateManager {
    state: Arc<RwLock<AppState>>,
    state_tx: Sender<AppState>,
    state_rx: Receiver<AppState>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        let (state_tx, state_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(RwLock::new(AppState::Initializing)),
            state_tx,
            state_rx,
        }
    }

    pub fn transition(&self, new_state: AppState) -> Result<(), AppError> {
        let mut current = self.state.write();

        let valid = matches!(
            (&*current, &new_state),
            (AppState::Initializing, AppState::Running)
                | (AppState::Initializing, AppState::Stopping)
                | (AppState::Running, AppState::Stopping)
                | (AppState::Stopping, AppState::Stopped)
        );

        if !valid {
            return Err(AppError::Fatal(format!(
                "Invalid state transition: {:?} -> {:?}",
                *current, new_state
            )));
        }

        tracing::info!("State transition: {:?} -> {:?}", *current, new_state);
        *current = new_state.clone();
        let _ = self.state_tx.send(new_state);
        Ok(())
    }

    pub fn current(&self) -> AppState {
        self.state.read().clone()
    }

    pub fn subscribe(&self) -> Receiver<AppState> {
        self.state_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_lifecycle_is_valid() {
        let sm = StateManager::new();
        sm.transition(AppState::Running).unwrap();
        sm.transition(AppState::Stopping).unwrap();
        sm.transition(AppState::Stopped).unwrap();
        assert_eq!(sm.current(), AppState::Stopped);
    }

    #[test]
    fn skipping_stopping_is_rejected() {
        let sm = StateManager::new();
        sm.transition(AppState::Running).unwrap();
        assert!(sm.transition(AppState::Stopped).is_err());
    }

    #[test]
    fn subscribers_observe_transitions() {
        let sm = StateManager::new();
        let rx = sm.subscribe();
        sm.transition(AppState::Running).unwrap();
        assert_eq!(rx.recv().unwrap(), AppState::Running);
    }
}
