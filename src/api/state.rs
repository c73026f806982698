//! Application state for the API server

use crate::{Config, DispatchEngine};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned per request (Arc clones only).
#[derive(Clone)]
pub struct AppState {
    /// The running engine
    pub engine: Arc<DispatchEngine>,

    /// Configuration (read-only)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(engine: Arc<DispatchEngine>, config: Arc<Config>) -> Self {
        Self { engine, config }
    }
}
