use std::{fmt, sync::Arc};

use vigil_core::RequestCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: RequestCoordinator,
    /// Expected bearer token; `None` leaves the API open.
    pub api_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(coordinator: RequestCoordinator, api_token: Option<String>) -> Self {
        Self {
            coordinator,
            api_token: api_token.map(Arc::from),
        }
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("coordinator", &self.coordinator)
            .field("auth_enabled", &self.api_token.is_some())
            .finish()
    }
}
