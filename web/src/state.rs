//! Shared state of the orchestrator routes.

use std::sync::Arc;
use tourism_alerts_client::ResilientAlertClient;
use tourism_alerts_core::environment::{Clock, SystemClock};
use tourism_alerts_runtime::Broadcaster;

/// Orchestrator state shared across all HTTP handlers.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct OrchestratorState {
    /// Resilient client towards the notification service.
    pub client: Arc<ResilientAlertClient>,
    /// Registry of subscriber push connections.
    pub broadcaster: Broadcaster,
    /// Time source for synthetic alerts.
    pub clock: Arc<dyn Clock>,
}

impl OrchestratorState {
    /// Create state using the system clock.
    #[must_use]
    pub fn new(client: Arc<ResilientAlertClient>, broadcaster: Broadcaster) -> Self {
        Self {
            client,
            broadcaster,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
