//! Shared Application State

use crate::relay::{BroadcastHub, RelayControl};
use std::sync::Arc;

/// Created once at startup and handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub control: Arc<RelayControl>,
    /// The in-process channel hub; subscriber endpoints read from it.
    pub hub: Arc<BroadcastHub>,
}
