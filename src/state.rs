use std::sync::Arc;

use crate::handler::FormSubmissionHandler;
use crate::init_env::Config;
use crate::view::ViewRenderer;

/// Shared by every request; cloning only bumps reference counts.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<FormSubmissionHandler>,
    pub views: Arc<dyn ViewRenderer>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        handler: Arc<FormSubmissionHandler>,
        views: Arc<dyn ViewRenderer>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            handler,
            views,
            config,
        }
    }
}
