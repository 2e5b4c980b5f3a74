//! LabControl daemon internals.
//!
//! The server crate owns everything with state-machine semantics and process
//! lifetime management: the reservation discipline over boards, the bounded
//! external-command executor, the capture-session lifecycle, and the
//! dispatcher that routes the path-style API to those operations. The HTTP
//! surface is a thin hyper service around the dispatcher; the legacy
//! form-encoded surface lives in its own module.

pub mod auth;
pub mod capture;
pub mod dispatch;
pub mod executor;
pub mod http;
pub mod legacy;
pub mod reservation;

use std::sync::Arc;

use lc_core::config::Settings;
use lc_core::error::LcResult;
use lc_core::store::ObjectStore;

use crate::capture::CaptureManager;

/// Shared server state, constructed once at startup and passed into every
/// request handler. There is no other process-wide state.
pub struct AppContext {
    /// Validated service configuration.
    pub settings: Settings,
    /// Entity record storage.
    pub store: ObjectStore,
    /// Capture-session process bookkeeping.
    pub captures: CaptureManager,
}

impl AppContext {
    /// Build the context from validated settings, creating the data
    /// directories as needed.
    pub fn new(settings: Settings) -> LcResult<Arc<Self>> {
        let store = ObjectStore::open(&settings.data_dir)?;
        let captures = CaptureManager::new(&settings)?;
        Ok(Arc::new(Self {
            settings,
            store,
            captures,
        }))
    }
}
