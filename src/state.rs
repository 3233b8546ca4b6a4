//! Shared application state for request handlers.

use std::sync::Arc;

use crate::middleware::Blacklist;
use crate::planner::ListenerMode;
use crate::reseed::Reseeder;

/// Shared application state, cloneable across handlers via Arc-wrapped fields.
#[derive(Clone)]
pub struct AppState {
    pub reseeder: Arc<Reseeder>,
    pub blacklist: Arc<Blacklist>,
    /// Take the client address from `X-Forwarded-For`
    pub trust_proxy: bool,
    pub mode: ListenerMode,
}

impl AppState {
    pub fn new(
        reseeder: Arc<Reseeder>,
        blacklist: Blacklist,
        trust_proxy: bool,
        mode: ListenerMode,
    ) -> Self {
        Self {
            reseeder,
            blacklist: Arc::new(blacklist),
            trust_proxy,
            mode,
        }
    }
}
