use std::sync::Arc;

use ragmill_core::service::SchedulerService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SchedulerService>,
}

impl AppState {
    pub fn new(service: Arc<SchedulerService>) -> Self {
        Self { service }
    }
}
