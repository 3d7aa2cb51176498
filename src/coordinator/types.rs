//! Public types for the search service.

/// Service lifecycle state.
///
/// Use [`super::SearchService::state()`] to check the current state or
/// [`super::SearchService::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Just created, not yet started
    Created,
    /// Starting the bulk worker and ensuring the root index
    Starting,
    /// Accepting reads and writes
    Running,
    /// Draining the bulk worker
    ShuttingDown,
    /// Stopped; async writes are refused
    Stopped,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_state_display() {
        assert_eq!(ServiceState::Created.to_string(), "Created");
        assert_eq!(ServiceState::ShuttingDown.to_string(), "ShuttingDown");
    }
}
