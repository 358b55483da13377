use std::sync::Arc;

use crate::pipeline::Pipeline;

/// Shared, immutable per-process state. No conversation is held here.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}
