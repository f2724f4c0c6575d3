//! Services shared by every actor in one controller instance.

use crate::collaborators::{MediaTransport, SignalingEndpoint};
use crate::config::Config;
use crate::registry::RoomRegistry;

use super::metrics::ActorMetrics;

use std::sync::Arc;

/// Cheaply cloneable bundle of collaborators, configuration and shared state.
#[derive(Clone)]
pub struct SharedServices {
    pub config: Arc<Config>,
    pub registry: Arc<RoomRegistry>,
    pub signaling: Arc<dyn SignalingEndpoint>,
    pub transport: Arc<dyn MediaTransport>,
    pub metrics: Arc<ActorMetrics>,
}

impl SharedServices {
    /// Bundle collaborators with a fresh registry and metrics.
    #[must_use]
    pub fn new(
        config: Config,
        signaling: Arc<dyn SignalingEndpoint>,
        transport: Arc<dyn MediaTransport>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(RoomRegistry::new()),
            signaling,
            transport,
            metrics: ActorMetrics::new(),
        }
    }

    /// Replace the registry, e.g. to let two controllers race for names.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<RoomRegistry>) -> Self {
        self.registry = registry;
        self
    }
}

impl std::fmt::Debug for SharedServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedServices")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
