//! Shared application state for all routes.

use crate::config::{ResolvedModel, Settings};
use crate::resource::ResourceRegistry;
use crate::store::Store;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub model: Arc<ResolvedModel>,
    pub registry: Arc<ResourceRegistry>,
    pub settings: Arc<Settings>,
}

impl AppState {
    /// State with the default resource for every exposed entity.
    pub fn new(store: Arc<dyn Store>, model: ResolvedModel, settings: Settings) -> Self {
        let model = Arc::new(model);
        let registry = ResourceRegistry::new(model.clone(), &settings);
        AppState::with_registry(store, registry, settings)
    }

    /// State around a registry with custom resources or cores.
    pub fn with_registry(store: Arc<dyn Store>, registry: ResourceRegistry, settings: Settings) -> Self {
        let model = Arc::new(registry.model().clone());
        AppState {
            store,
            model,
            registry: Arc::new(registry),
            settings: Arc::new(settings),
        }
    }
}
