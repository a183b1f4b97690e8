use super::{DefaultCore, ModelResource, Resource, ResourceCore};
use crate::config::{ResolvedModel, Settings};
use crate::paginator::PageSettings;
use std::collections::HashMap;
use std::sync::Arc;

/// Resources by table id (relation lookups) and by path segment (routing).
pub struct ResourceRegistry {
    model: Arc<ResolvedModel>,
    by_table: HashMap<String, Arc<dyn Resource>>,
    by_path: HashMap<String, Arc<dyn Resource>>,
    api_prefix: String,
    paging: PageSettings,
}

impl ResourceRegistry {
    /// Registry with a [`ModelResource`] driven by [`DefaultCore`] for every exposed entity.
    pub fn new(model: Arc<ResolvedModel>, settings: &Settings) -> Self {
        let mut registry = ResourceRegistry::empty(model.clone(), settings);
        for entity in model.entities.iter().filter(|e| e.exposed) {
            registry.register_core(Arc::new(DefaultCore::new(entity.clone())));
        }
        registry
    }

    pub fn empty(model: Arc<ResolvedModel>, settings: &Settings) -> Self {
        ResourceRegistry {
            model,
            by_table: HashMap::new(),
            by_path: HashMap::new(),
            api_prefix: settings.api_prefix.clone(),
            paging: PageSettings {
                page_size: u64::from(settings.page_size),
                max_page_size: u64::from(settings.max_page_size),
            },
        }
    }

    /// Replaces any resource already registered for the same entity.
    pub fn register(&mut self, resource: Arc<dyn Resource>) {
        let entity = resource.entity().clone();
        tracing::debug!(table = %entity.table_id, path = %entity.path_segment, "register resource");
        self.by_table.insert(entity.table_id.clone(), resource.clone());
        self.by_path.insert(entity.path_segment.clone(), resource);
    }

    /// Register a [`ModelResource`] around a custom core.
    pub fn register_core(&mut self, core: Arc<dyn ResourceCore>) {
        let entity = core.entity().clone();
        self.register(Arc::new(ModelResource::new(entity, core)));
    }

    pub fn resource_for_table(&self, table_id: &str) -> Option<Arc<dyn Resource>> {
        self.by_table.get(table_id).cloned()
    }

    pub fn resource_for_path(&self, path_segment: &str) -> Option<Arc<dyn Resource>> {
        self.by_path.get(path_segment).cloned()
    }

    pub fn model(&self) -> &ResolvedModel {
        &self.model
    }

    pub fn api_prefix(&self) -> &str {
        &self.api_prefix
    }

    pub fn paging(&self) -> PageSettings {
        self.paging
    }
}
