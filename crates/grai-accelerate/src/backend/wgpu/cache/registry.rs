use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::wgpu::pipelines::Pipeline;

/// Kernel name to compiled pipeline, for one device.
pub struct PipelineRegistry {
    inner: Mutex<HashMap<String, Arc<Pipeline>>>,
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Pipeline>> {
        self.lock().get(name).cloned()
    }

    /// Inserts or replaces; returns the pipeline previously registered under that name.
    pub fn insert(&self, pipeline: Pipeline) -> Option<Arc<Pipeline>> {
        self.lock().insert(pipeline.name().to_string(), Arc::new(pipeline))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Pipeline>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
