//! Explicit process-wide context, replacing a singleton dependency
//! container (§9's re-architecture note).
//!
//! Every long-lived dependency a session needs — the registry, the
//! persistence sink, the tunables, the cancellation root, the spawner — is
//! an explicit field here, handed down at process initialisation. Tests
//! build a `BridgeContext` with in-memory fakes (`NoopPersistenceSink`)
//! instead of reaching for global state.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::persistence::PersistenceSink;
use crate::registry::SessionRegistry;
use crate::runtime::TaskSpawner;

/// Shared dependencies every bridge session is wired against.
#[derive(Clone)]
pub struct BridgeContext {
    pub registry: Arc<SessionRegistry>,
    pub persistence: Arc<dyn PersistenceSink>,
    pub config: BridgeConfig,
    pub cancel_token: CancellationToken,
    pub spawner: Arc<dyn TaskSpawner>,
}

impl BridgeContext {
    /// Cancels every live session and their shared root token, the first
    /// step of graceful shutdown (§5's cancellation note).
    pub fn begin_shutdown(&self) {
        self.registry.cancel_all();
        self.cancel_token.cancel();
    }
}
