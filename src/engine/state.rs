//! Runner lifecycle states

use std::fmt;

use parking_lot::RwLock;
use serde::Serialize;

use crate::backend::BackendKind;

/// Lifecycle of a runner
///
/// `Uninitialized -> Loading -> Ready <-> Running`; `Failed` is entered when
/// loading fails and left by calling `init` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerState {
    Uninitialized,
    Loading,
    Ready,
    Running,
    Failed,
}

impl RunnerState {
    /// Whether inference may be requested
    pub fn accepts_inference(self) -> bool {
        matches!(self, RunnerState::Ready | RunnerState::Running)
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunnerState::Uninitialized => "uninitialized",
            RunnerState::Loading => "loading",
            RunnerState::Ready => "ready",
            RunnerState::Running => "running",
            RunnerState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Snapshot reported by `Runner::status`
#[derive(Debug, Clone, Serialize)]
pub struct RunnerStatus {
    pub state: RunnerState,
    pub model: Option<String>,
    pub backend: Option<BackendKind>,
    pub artifacts: usize,
}

pub(crate) fn transition(state: &RwLock<RunnerState>, to: RunnerState) {
    let from = std::mem::replace(&mut *state.write(), to);
    if from == to {
        return;
    }
    match (from, to) {
        (RunnerState::Ready, RunnerState::Running) | (RunnerState::Running, RunnerState::Ready) => {
            tracing::debug!("Runner state: {} -> {}", from, to)
        }
        _ => tracing::info!("Runner state: {} -> {}", from, to),
    }
}

/// Enters a state and leaves it for `exit` when dropped
///
/// Dropping happens on success, on error and when the owning future is
/// cancelled, so the runner never stays in a transient state.
pub(crate) struct StateGuard<'a> {
    state: &'a RwLock<RunnerState>,
    exit: RunnerState,
}

impl<'a> StateGuard<'a> {
    pub(crate) fn enter(state: &'a RwLock<RunnerState>, entering: RunnerState, exit: RunnerState) -> Self {
        transition(state, entering);
        Self { state, exit }
    }

    /// Change the state entered on drop
    pub(crate) fn exit_to(&mut self, exit: RunnerState) {
        self.exit = exit;
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        transition(self.state, self.exit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_restores_on_drop() {
        let state = RwLock::new(RunnerState::Ready);
        {
            let _guard = StateGuard::enter(&state, RunnerState::Running, RunnerState::Ready);
            assert_eq!(*state.read(), RunnerState::Running);
        }
        assert_eq!(*state.read(), RunnerState::Ready);
    }

    #[test]
    fn test_guard_exit_can_change() {
        let state = RwLock::new(RunnerState::Uninitialized);
        {
            let mut guard = StateGuard::enter(&state, RunnerState::Loading, RunnerState::Failed);
            assert_eq!(*state.read(), RunnerState::Loading);
            guard.exit_to(RunnerState::Ready);
        }
        assert_eq!(*state.read(), RunnerState::Ready);
    }

    #[test]
    fn test_accepts_inference() {
        assert!(RunnerState::Ready.accepts_inference());
        assert!(RunnerState::Running.accepts_inference());
        assert!(!RunnerState::Loading.accepts_inference());
        assert!(!RunnerState::Failed.accepts_inference());
        assert_eq!(
            serde_json::to_string(&RunnerState::Uninitialized).unwrap(),
            "\"uninitialized\""
        );
    }
}
