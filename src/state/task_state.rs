/// Task state definitions for the crawl frontier
///
/// This module defines every state a task passes through between discovery
/// and its terminal outcome.
use std::fmt;

/// Represents the current state of a task in the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskState {
    // ===== Active States =====
    /// Waiting in the frontier for a worker
    Pending,

    /// Assigned to a worker and proxy until the lease deadline
    Leased,

    /// Failed with a retryable error; waiting for its retry delay
    FailedRetryable,

    // ===== Terminal States =====
    /// Fetched successfully
    Completed,

    /// Dead-lettered: retries exhausted, fatal failure or cancelled
    Dead,
}

impl TaskState {
    /// Returns true if this is a terminal state (no further scheduling)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Dead)
    }

    /// Returns true if moving from `self` to `next` is a legal transition
    ///
    /// `Leased -> Pending` is the no-fault requeue (no proxy available, proxy
    /// banned mid-fetch, snapshot restore) which does not consume a retry.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Leased)
                | (Pending, Dead)
                | (Leased, Completed)
                | (Leased, FailedRetryable)
                | (Leased, Pending)
                | (Leased, Dead)
                | (FailedRetryable, Pending)
                | (FailedRetryable, Dead)
        )
    }

    /// Converts the task state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Leased => "leased",
            Self::FailedRetryable => "failed_retryable",
            Self::Completed => "completed",
            Self::Dead => "dead",
        }
    }

    /// Parses a task state from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "leased" => Some(Self::Leased),
            "failed_retryable" => Some(Self::FailedRetryable),
            "completed" => Some(Self::Completed),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }

    /// Returns all possible task states
    pub fn all_states() -> [Self; 5] {
        [
            Self::Pending,
            Self::Leased,
            Self::FailedRetryable,
            Self::Completed,
            Self::Dead,
        ]
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Leased.is_terminal());
        assert!(!TaskState::FailedRetryable.is_terminal());

        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Dead.is_terminal());
    }

    #[test]
    fn test_terminal_states_have_no_exit() {
        for from in [TaskState::Completed, TaskState::Dead] {
            for to in TaskState::all_states() {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_legal_transitions() {
        assert!(TaskState::Pending.can_transition_to(TaskState::Leased));
        assert!(TaskState::Leased.can_transition_to(TaskState::Completed));
        assert!(TaskState::Leased.can_transition_to(TaskState::FailedRetryable));
        assert!(TaskState::FailedRetryable.can_transition_to(TaskState::Pending));

        assert!(!TaskState::Pending.can_transition_to(TaskState::Completed));
        assert!(!TaskState::Pending.can_transition_to(TaskState::FailedRetryable));
        assert!(!TaskState::FailedRetryable.can_transition_to(TaskState::Leased));
    }

    #[test]
    fn test_db_string() {
        assert_eq!(TaskState::FailedRetryable.to_db_string(), "failed_retryable");
        assert_eq!(TaskState::from_db_string("dead"), Some(TaskState::Dead));
        assert_eq!(TaskState::from_db_string("fetching"), None);

        for state in TaskState::all_states() {
            assert_eq!(TaskState::from_db_string(state.to_db_string()), Some(state));
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", TaskState::Leased), "leased");
    }
}
