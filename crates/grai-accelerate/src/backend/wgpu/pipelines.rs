//! Kernel libraries and their compiled pipelines.
//!
//! WGSL fixes `@workgroup_size` at compile time while dispatch picks group shapes at run
//! time. Library sources may therefore spell the group size with the `@WG_X@`, `@WG_Y@`
//! and `@WG_Z@` placeholders; one shader module and one pipeline are compiled per group
//! shape actually dispatched, and cached. Sources without placeholders compile once.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use pollster::block_on;

use crate::backend::wgpu::geometry::Size3;
use crate::backend::wgpu::metrics::WgpuMetrics;

const PLACEHOLDER_X: &str = "@WG_X@";
const PLACEHOLDER_Y: &str = "@WG_Y@";
const PLACEHOLDER_Z: &str = "@WG_Z@";

/// Key used for every group shape of a source without placeholders.
const FIXED_VARIANT: [u32; 3] = [0, 0, 0];

/// Runs `f` inside a validation error scope and returns the captured error, if any.
pub(crate) fn with_validation<R>(
    device: &wgpu::Device,
    f: impl FnOnce() -> R,
) -> (R, Option<String>) {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let out = f();
    let error = block_on(device.pop_error_scope());
    (out, error.map(|err| err.to_string()))
}

pub fn is_templated(source: &str) -> bool {
    [PLACEHOLDER_X, PLACEHOLDER_Y, PLACEHOLDER_Z]
        .iter()
        .any(|placeholder| source.contains(placeholder))
}

/// Substitutes the group-size placeholders.
pub fn specialize_source(source: &str, group: Size3) -> Cow<'_, str> {
    if !is_templated(source) {
        return Cow::Borrowed(source);
    }
    Cow::Owned(
        source
            .replace(PLACEHOLDER_X, &group.width.to_string())
            .replace(PLACEHOLDER_Y, &group.height.to_string())
            .replace(PLACEHOLDER_Z, &group.depth.to_string()),
    )
}

/// One WGSL source holding any number of kernel entry points.
pub struct KernelLibrary {
    name: String,
    source: String,
    templated: bool,
    modules: Mutex<HashMap<[u32; 3], Arc<wgpu::ShaderModule>>>,
}

impl KernelLibrary {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            name: name.into(),
            templated: is_templated(&source),
            source,
            modules: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_templated(&self) -> bool {
        self.templated
    }

    fn variant_key(&self, group: Size3) -> [u32; 3] {
        if self.templated {
            group.as_array()
        } else {
            FIXED_VARIANT
        }
    }

    /// Shader module for `group`, compiled on first request.
    pub(crate) fn module(
        &self,
        device: &wgpu::Device,
        group: Size3,
    ) -> Result<Arc<wgpu::ShaderModule>, String> {
        let key = self.variant_key(group);
        let mut modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(module) = modules.get(&key) {
            return Ok(module.clone());
        }
        let label = format!("grai-{}-shader", self.name);
        let source = specialize_source(&self.source, group);
        let (module, error) = with_validation(device, || {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&label),
                source: wgpu::ShaderSource::Wgsl(source),
            })
        });
        if let Some(error) = error {
            return Err(error);
        }
        let module = Arc::new(module);
        modules.insert(key, module.clone());
        Ok(module)
    }
}

/// A compiled kernel: one entry point of a [`KernelLibrary`] plus its group-shape variants.
pub struct Pipeline {
    name: String,
    library: Arc<KernelLibrary>,
    optimal_group_size: bool,
    variants: Mutex<HashMap<[u32; 3], Arc<wgpu::ComputePipeline>>>,
}

impl Pipeline {
    /// Compiles the variant for `default_group`; failures carry the compiler message.
    pub(crate) fn build(
        device: &wgpu::Device,
        library: Arc<KernelLibrary>,
        name: &str,
        optimal_group_size: bool,
        default_group: Size3,
    ) -> Result<Self, String> {
        let pipeline = Self {
            name: name.to_string(),
            library,
            optimal_group_size,
            variants: Mutex::new(HashMap::new()),
        };
        let compiled = pipeline.compile(device, default_group)?;
        pipeline
            .variants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pipeline.library.variant_key(default_group), Arc::new(compiled));
        Ok(pipeline)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn library_name(&self) -> &str {
        self.library.name()
    }

    /// Whether dispatch should warn on groups that are not a multiple of the execution width.
    pub fn optimal_group_size(&self) -> bool {
        self.optimal_group_size
    }

    pub fn variant_count(&self) -> usize {
        self.variants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Pipeline compiled for `group`. A group the kernel cannot be built for is fatal.
    pub(crate) fn variant(
        &self,
        device: &wgpu::Device,
        group: Size3,
        metrics: &WgpuMetrics,
    ) -> Arc<wgpu::ComputePipeline> {
        let key = self.library.variant_key(group);
        let mut variants = self.variants.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pipeline) = variants.get(&key) {
            metrics.inc_hit();
            return pipeline.clone();
        }
        metrics.inc_miss();
        let compiled = match self.compile(device, group) {
            Ok(compiled) => Arc::new(compiled),
            Err(message) => panic!(
                "kernel '{}' cannot run with thread group {:?}: {}",
                self.name, group, message
            ),
        };
        metrics.inc_variant();
        debug!(
            "Compiled '{}' for thread group {}x{}x{}",
            self.name, group.width, group.height, group.depth
        );
        variants.insert(key, compiled.clone());
        compiled
    }

    fn compile(
        &self,
        device: &wgpu::Device,
        group: Size3,
    ) -> Result<wgpu::ComputePipeline, String> {
        let module = self.library.module(device, group)?;
        let label = format!("grai-{}-pipeline", self.name);
        let (pipeline, error) = with_validation(device, || {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&label),
                layout: None,
                module: &module,
                entry_point: &self.name,
            })
        });
        match error {
            Some(message) => Err(message),
            None => Ok(pipeline),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATED: &str = "@compute @workgroup_size(@WG_X@, @WG_Y@, @WG_Z@)\nfn main() {}";

    #[test]
    fn placeholders_are_substituted() {
        let source = specialize_source(TEMPLATED, Size3::new(32, 8, 1));
        assert_eq!(source, "@compute @workgroup_size(32, 8, 1)\nfn main() {}");
        assert!(!is_templated(&source));
    }

    #[test]
    fn fixed_sources_are_borrowed() {
        let fixed = "@compute @workgroup_size(64)\nfn main() {}";
        assert!(matches!(
            specialize_source(fixed, Size3::new(1, 1, 1)),
            Cow::Borrowed(_)
        ));
        let library = KernelLibrary::new("fixed", fixed);
        assert!(!library.is_templated());
        assert_eq!(library.variant_key(Size3::new(64, 1, 1)), FIXED_VARIANT);
        assert_eq!(library.variant_key(Size3::new(8, 8, 1)), FIXED_VARIANT);
    }

    #[test]
    fn templated_libraries_key_by_group() {
        let library = KernelLibrary::new("templated", TEMPLATED);
        assert!(library.is_templated());
        assert_eq!(library.variant_key(Size3::new(16, 4, 1)), [16, 4, 1]);
    }
}
