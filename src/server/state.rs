use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::correlation::ResponseCorrelator;
use crate::orchestrator::NotificationOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub orchestrator: Arc<NotificationOrchestrator>,
    pub correlator: Arc<ResponseCorrelator>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        orchestrator: Arc<NotificationOrchestrator>,
        correlator: Arc<ResponseCorrelator>,
    ) -> Self {
        Self {
            settings,
            orchestrator,
            correlator,
            start_time: Instant::now(),
        }
    }
}
