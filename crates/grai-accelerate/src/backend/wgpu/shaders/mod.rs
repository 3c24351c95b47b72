pub mod convert;
pub mod reduction;
pub mod reset;

/// A built-in library and the entry points compiled from it.
pub struct ManifestEntry {
    pub library: &'static str,
    pub source: &'static str,
    pub kernels: &'static [&'static str],
    pub optimal_group_size: bool,
}

/// Libraries built on every device when the context starts.
pub const KERNEL_MANIFEST: &[ManifestEntry] = &[
    ManifestEntry {
        library: "Reduce64",
        source: reduction::REDUCE_HIERARCHICAL_SHADER,
        kernels: &["reduceSum64", "reduceMax64"],
        optimal_group_size: true,
    },
    ManifestEntry {
        library: "Reduce",
        source: reduction::REDUCE_FLAT_SHADER,
        kernels: &["reduceSum", "reduceMax"],
        optimal_group_size: false,
    },
    ManifestEntry {
        library: "Reset",
        source: reset::RESET_SHADER,
        kernels: &["reset"],
        optimal_group_size: false,
    },
    ManifestEntry {
        library: "ConvertFloat2Half",
        source: convert::FLOAT_TO_HALF_SHADER,
        kernels: &["convertFloat2Half"],
        optimal_group_size: false,
    },
    ManifestEntry {
        library: "ConvertHalf2Float",
        source: convert::HALF_TO_FLOAT_SHADER,
        kernels: &["convertHalf2Float"],
        optimal_group_size: false,
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::wgpu::pipelines::is_templated;

    #[test]
    fn manifest_names_are_unique() {
        let mut names: Vec<&str> = KERNEL_MANIFEST
            .iter()
            .flat_map(|entry| entry.kernels.iter().copied())
            .collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn every_kernel_is_declared_in_its_source() {
        for entry in KERNEL_MANIFEST {
            for kernel in entry.kernels {
                assert!(
                    entry.source.contains(&format!("fn {kernel}(")),
                    "{kernel} missing from {}",
                    entry.library
                );
            }
        }
    }

    #[test]
    fn only_hierarchical_reduction_has_a_fixed_group() {
        for entry in KERNEL_MANIFEST {
            assert_eq!(is_templated(entry.source), entry.library != "Reduce64");
        }
    }
}
