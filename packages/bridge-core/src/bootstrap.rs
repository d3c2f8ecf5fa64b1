//! Application bootstrap and dependency wiring.
//!
//! This module is the composition root - the single place where all
//! services are instantiated and wired together. Everything downstream
//! (the orchestrator, the HTTP/WS handlers) receives a [`BridgeContext`]
//! rather than reaching for ambient/global state.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::context::BridgeContext;
use crate::error::BridgeResult;
use crate::persistence::{LoggingPersistenceSink, NoopPersistenceSink, PersistenceSink};
use crate::registry::SessionRegistry;
use crate::runtime::TokioSpawner;

/// Bootstraps the bridge's shared services with their dependencies.
///
/// Wiring order:
///
/// 1. Validate configuration (fail fast on missing credentials).
/// 2. Task spawner, sourced from the calling runtime.
/// 3. Persistence sink — `LoggingPersistenceSink` when `persist_events` is
///    set, `NoopPersistenceSink` otherwise (§9's "no event persistence"
///    resolution still allows terminal summaries to log).
/// 4. Session registry, the sole owner of live `CallSession`s.
/// 5. Root cancellation token, parent of every session's child token.
///
/// # Errors
///
/// Returns an error if the configuration fails validation.
pub fn bootstrap_services(config: BridgeConfig) -> BridgeResult<BridgeContext> {
    config.validate()?;

    let spawner = Arc::new(TokioSpawner::current());

    let persistence: Arc<dyn PersistenceSink> = if config.persist_events {
        Arc::new(LoggingPersistenceSink)
    } else {
        Arc::new(NoopPersistenceSink)
    };

    let registry = Arc::new(SessionRegistry::new());
    let cancel_token = CancellationToken::new();

    Ok(BridgeContext {
        registry,
        persistence,
        config,
        cancel_token,
        spawner,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_fails_without_ai_credentials() {
        let config = BridgeConfig::default();
        assert!(bootstrap_services(config).is_err());
    }

    #[tokio::test]
    async fn bootstrap_wires_an_empty_registry_with_configured_credentials() {
        let config = BridgeConfig {
            ai_endpoint_url: "wss://example.test/v1/realtime".to_string(),
            ai_bearer_token: "sk-test".to_string(),
            ..Default::default()
        };
        let context = bootstrap_services(config).expect("bootstrap should succeed");
        assert_eq!(context.registry.session_count(), 0);
        assert!(!context.cancel_token.is_cancelled());
    }
}
