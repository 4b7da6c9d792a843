use std::sync::Arc;

use crate::chat::views::MessageViewSet;
use crate::config::PresenceConfig;
use crate::db::DataAccess;
use crate::error::{CoreError, StoreResult};
use crate::presence::registry::ConnectionRegistry;
use crate::presence::transitions::TransitionLocks;

/// Shared application state passed to all handlers via axum State extractor
/// and to the core operations by reference.
#[derive(Clone)]
pub struct AppState {
    /// Persistence collaborator
    pub store: Arc<dyn DataAccess>,
    /// The single live connection per user
    pub connections: ConnectionRegistry,
    /// Serializes each user's connect / location switch / offline
    pub transitions: TransitionLocks,
    /// Who is currently looking at which message (ephemeral)
    pub viewers: MessageViewSet,
    /// Heartbeat, sweep and queue tuning
    pub presence: PresenceConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn DataAccess>, presence: PresenceConfig) -> Self {
        Self {
            store,
            connections: ConnectionRegistry::new(),
            transitions: TransitionLocks::new(),
            viewers: MessageViewSet::new(),
            presence,
        }
    }

    /// Run a data-access call on the blocking pool.
    pub async fn blocking<T, F>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&dyn DataAccess) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| CoreError::Join(e.to_string()))?
            .map_err(CoreError::from)
    }
}
