//! Tree reductions over the first axis of a `dim1 × dim2` float array.
//!
//! Each of the `dim2` lanes is reduced independently. While more than
//! [`HIERARCHICAL_THRESHOLD`] elements remain, groups of [`REDUCE_GROUP_SIZE`] threads
//! collapse to one partial each; the last few elements are folded by one thread per lane.
//!
//! A dispatch cannot read and write the same buffer, so the passes alternate between the
//! output and one scratch buffer. Destinations are assigned from the last pass backwards
//! so that the final pass always lands in the output. When the input is the output
//! itself, a first pass that would write the output goes to a staging buffer instead.

use log::debug;
use tracing::info_span;

use crate::backend::wgpu::dispatch::common::{ensure_float_capacity, to_u32, FLOAT_BYTES};
use crate::backend::wgpu::geometry::{div_ceil, Size3};
use crate::buffer::StorageKind;
use crate::registry::ComputeContext;

/// Above this many elements per lane, reduce in workgroup memory first.
pub const HIERARCHICAL_THRESHOLD: usize = 100;
/// Threads per group of the hierarchical kernels.
pub const REDUCE_GROUP_SIZE: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
}

impl ReduceOp {
    fn hierarchical_kernel(self) -> &'static str {
        match self {
            ReduceOp::Sum => "reduceSum64",
            ReduceOp::Max => "reduceMax64",
        }
    }

    fn flat_kernel(self) -> &'static str {
        match self {
            ReduceOp::Sum => "reduceSum",
            ReduceOp::Max => "reduceMax",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceStep {
    /// `nb_elems` per lane down to `nb_groups` partials per lane.
    Hierarchical { nb_elems: usize, nb_groups: usize },
    /// `nb_elems` per lane down to one.
    Flat { nb_elems: usize },
}

impl ReduceStep {
    /// Values per lane left after this pass.
    pub fn nb_outputs(&self) -> usize {
        match self {
            ReduceStep::Hierarchical { nb_groups, .. } => *nb_groups,
            ReduceStep::Flat { .. } => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Output,
    Scratch,
    /// Holds the first partials of an in-place reduction.
    Staging,
}

/// Passes needed to bring `dim1` elements per lane down to one.
pub fn plan_reduction(dim1: usize) -> Vec<ReduceStep> {
    let mut steps = Vec::new();
    let mut remaining = dim1;
    while remaining > 1 {
        let step = if remaining > HIERARCHICAL_THRESHOLD {
            ReduceStep::Hierarchical {
                nb_elems: remaining,
                nb_groups: div_ceil(remaining as u32, REDUCE_GROUP_SIZE) as usize,
            }
        } else {
            ReduceStep::Flat {
                nb_elems: remaining,
            }
        };
        remaining = step.nb_outputs();
        steps.push(step);
    }
    steps
}

/// Destination of each pass: the last one writes the output, earlier ones alternate.
///
/// `in_place` means the first pass reads the output. A single pass then still targets the
/// output and the caller stages the input first.
pub fn assign_targets(nb_steps: usize, in_place: bool) -> Vec<Target> {
    let mut targets: Vec<Target> = (0..nb_steps)
        .map(|index| {
            if (nb_steps - 1 - index) % 2 == 0 {
                Target::Output
            } else {
                Target::Scratch
            }
        })
        .collect();
    if in_place && nb_steps > 1 && targets[0] == Target::Output {
        targets[0] = Target::Staging;
    }
    targets
}

/// Floats per lane each target must hold.
fn required_capacity(steps: &[ReduceStep], targets: &[Target], target: Target) -> usize {
    steps
        .iter()
        .zip(targets)
        .filter(|(_, t)| **t == target)
        .map(|(step, _)| step.nb_outputs())
        .max()
        .unwrap_or(0)
}

pub fn reduce_sum(
    ctx: &ComputeContext,
    input: &wgpu::Buffer,
    output: &wgpu::Buffer,
    dim1: usize,
    dim2: usize,
    device_id: usize,
) {
    reduce(ctx, ReduceOp::Sum, input, output, dim1, dim2, device_id);
}

pub fn reduce_max(
    ctx: &ComputeContext,
    input: &wgpu::Buffer,
    output: &wgpu::Buffer,
    dim1: usize,
    dim2: usize,
    device_id: usize,
) {
    reduce(ctx, ReduceOp::Max, input, output, dim1, dim2, device_id);
}

/// Reduces `input` (`dim2` lanes of `dim1` floats, lane-major) into the first `dim2`
/// floats of `output`. The output also holds intermediate partials and must be large
/// enough for them. `input` and `output` may be the same buffer. Work is queued; nothing
/// blocks.
pub fn reduce(
    ctx: &ComputeContext,
    op: ReduceOp,
    input: &wgpu::Buffer,
    output: &wgpu::Buffer,
    dim1: usize,
    dim2: usize,
    device_id: usize,
) {
    assert!(dim1 > 0 && dim2 > 0, "empty reduction ({dim1} x {dim2})");
    let _span = info_span!("gpu.reduce", op = ?op, dim1, dim2, device = device_id).entered();
    let device = ctx.device(device_id);

    let in_place = input.global_id() == output.global_id();
    let steps = plan_reduction(dim1);
    let targets = assign_targets(steps.len(), in_place);
    ensure_float_capacity(input, dim1 * dim2, "reduction input");
    ensure_float_capacity(
        output,
        required_capacity(&steps, &targets, Target::Output).max(1) * dim2,
        "reduction output",
    );

    if steps.is_empty() {
        // A single element per lane is already reduced.
        if !in_place {
            device.blit(input, output, dim2 as u64 * FLOAT_BYTES);
        }
        return;
    }

    let private_buffer = |target: Target, nb_floats: usize| {
        (nb_floats > 0).then(|| {
            debug!("Reduction {:?} buffer of {} floats", target, nb_floats);
            ctx.create_buffer(nb_floats as u64 * FLOAT_BYTES, StorageKind::Private, device_id)
        })
    };
    let scratch = private_buffer(
        Target::Scratch,
        required_capacity(&steps, &targets, Target::Scratch) * dim2,
    );
    // A lone in-place pass reads a copy of the input.
    let copy_input = in_place && targets == [Target::Output];
    let staging_floats = if copy_input {
        dim1 * dim2
    } else {
        required_capacity(&steps, &targets, Target::Staging) * dim2
    };
    let staging = private_buffer(Target::Staging, staging_floats);

    let mut source = input;
    if copy_input {
        if let Some(staging) = staging.as_ref() {
            device.blit(input, staging, staging_floats as u64 * FLOAT_BYTES);
            source = staging;
        }
    }

    let lanes = to_u32(dim2, "dim2");
    for (step, target) in steps.iter().zip(&targets) {
        let destination = match target {
            Target::Output => Some(output),
            Target::Scratch => scratch.as_ref(),
            Target::Staging => staging.as_ref(),
        }
        .unwrap_or_else(|| panic!("reduction pass planned into a missing {target:?} buffer"));
        match *step {
            ReduceStep::Hierarchical {
                nb_elems,
                nb_groups,
            } => {
                // Groups are numbered lane-major over one line of threads.
                let nb_threads = to_u32(nb_groups * dim2 * REDUCE_GROUP_SIZE as usize, "threads");
                let mut command = ctx.create_command(op.hierarchical_kernel(), device_id);
                command
                    .set_buffer(source, 0)
                    .set_bytes(&[to_u32(nb_elems, "dim1"), lanes], 1)
                    .set_bytes(&[to_u32(nb_groups, "nb_groups")], 2)
                    .set_buffer(destination, 3);
                command.dispatch_threads_grid(
                    Size3::new(nb_threads, 1, 1),
                    Size3::new(REDUCE_GROUP_SIZE, 1, 1),
                );
                command.enqueue();
            }
            ReduceStep::Flat { nb_elems } => {
                let mut command = ctx.create_command(op.flat_kernel(), device_id);
                command
                    .set_buffer(source, 0)
                    .set_bytes(&[to_u32(nb_elems, "dim1"), lanes], 1)
                    .set_buffer(destination, 2);
                command.dispatch_threads(lanes);
                command.enqueue();
            }
        }
        source = destination;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_axes_need_one_flat_pass() {
        assert!(plan_reduction(1).is_empty());
        assert_eq!(plan_reduction(2), vec![ReduceStep::Flat { nb_elems: 2 }]);
        assert_eq!(plan_reduction(100), vec![ReduceStep::Flat { nb_elems: 100 }]);
    }

    #[test]
    fn large_axes_go_through_groups_first() {
        assert_eq!(
            plan_reduction(257),
            vec![
                ReduceStep::Hierarchical {
                    nb_elems: 257,
                    nb_groups: 5
                },
                ReduceStep::Flat { nb_elems: 5 },
            ]
        );
        // 10_000 -> 157 -> 3 -> 1
        let steps = plan_reduction(10_000);
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[1].nb_outputs(), 3);
    }

    #[test]
    fn last_pass_always_writes_output() {
        assert_eq!(assign_targets(1, false), vec![Target::Output]);
        assert_eq!(assign_targets(2, false), vec![Target::Scratch, Target::Output]);
        assert_eq!(
            assign_targets(3, false),
            vec![Target::Output, Target::Scratch, Target::Output]
        );
    }

    #[test]
    fn passes_never_read_their_destination() {
        for in_place in [false, true] {
            for nb_steps in 1..6 {
                let targets = assign_targets(nb_steps, in_place);
                assert_eq!(targets.last(), Some(&Target::Output));
                for pair in targets.windows(2) {
                    assert_ne!(pair[0], pair[1]);
                }
            }
        }
    }

    #[test]
    fn capacities_follow_targets() {
        let steps = plan_reduction(10_000);
        let targets = assign_targets(steps.len(), false);
        assert_eq!(required_capacity(&steps, &targets, Target::Output), 157);
        assert_eq!(required_capacity(&steps, &targets, Target::Scratch), 3);

        let steps = plan_reduction(257);
        let targets = assign_targets(steps.len(), false);
        assert_eq!(required_capacity(&steps, &targets, Target::Output), 1);
        assert_eq!(required_capacity(&steps, &targets, Target::Scratch), 5);
    }

    #[test]
    fn in_place_first_pass_avoids_the_output() {
        assert_eq!(assign_targets(1, true), vec![Target::Output]);
        assert_eq!(assign_targets(2, true), vec![Target::Scratch, Target::Output]);
        assert_eq!(
            assign_targets(3, true),
            vec![Target::Staging, Target::Scratch, Target::Output]
        );

        let steps = plan_reduction(10_000);
        let targets = assign_targets(steps.len(), true);
        assert_eq!(required_capacity(&steps, &targets, Target::Staging), 157);
        assert_eq!(required_capacity(&steps, &targets, Target::Output), 1);
    }
}
