/// Hierarchical pass: one partial per 64-thread group, reduced in workgroup memory.
///
/// Bindings: 0 values, 1 `{nb_elems, nb_lanes}`, 2 nb_groups, 3 partials.
/// Element `elem` of lane `lane` lives at `lane * nb_elems + elem`. Groups are numbered
/// lane-major across the whole (possibly wrapped) dispatch, so group `lane * nb_groups + g`
/// reduces block `g` of `lane` and writes its partial at that same index.
pub const REDUCE_HIERARCHICAL_SHADER: &str = r#"
struct Dimensions {
    nb_elems: u32,
    nb_lanes: u32,
};

@group(0) @binding(0) var<storage, read> values: array<f32>;
@group(0) @binding(1) var<uniform> dims: Dimensions;
@group(0) @binding(2) var<uniform> nb_groups: u32;
@group(0) @binding(3) var<storage, read_write> partials: array<f32>;

const GROUP_SIZE: u32 = 64u;
const LOWEST: f32 = -0x1.fffffep+127f;

var<workgroup> scratch: array<f32, 64>;

fn load(elem: u32, lane: u32, identity: f32) -> f32 {
    if (elem < dims.nb_elems && lane < dims.nb_lanes) {
        return values[lane * dims.nb_elems + elem];
    }
    return identity;
}

@compute @workgroup_size(64, 1, 1)
fn reduceSum64(
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let group = (wid.z * nwg.y + wid.y) * nwg.x + wid.x;
    let lane = group / nb_groups;
    scratch[lid.x] = load((group % nb_groups) * GROUP_SIZE + lid.x, lane, 0.0);
    workgroupBarrier();

    var stride = GROUP_SIZE / 2u;
    loop {
        if (stride == 0u) {
            break;
        }
        if (lid.x < stride) {
            scratch[lid.x] = scratch[lid.x] + scratch[lid.x + stride];
        }
        workgroupBarrier();
        stride = stride / 2u;
    }

    if (lid.x == 0u && lane < dims.nb_lanes) {
        partials[group] = scratch[0];
    }
}

@compute @workgroup_size(64, 1, 1)
fn reduceMax64(
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let group = (wid.z * nwg.y + wid.y) * nwg.x + wid.x;
    let lane = group / nb_groups;
    scratch[lid.x] = load((group % nb_groups) * GROUP_SIZE + lid.x, lane, LOWEST);
    workgroupBarrier();

    var stride = GROUP_SIZE / 2u;
    loop {
        if (stride == 0u) {
            break;
        }
        if (lid.x < stride) {
            scratch[lid.x] = max(scratch[lid.x], scratch[lid.x + stride]);
        }
        workgroupBarrier();
        stride = stride / 2u;
    }

    if (lid.x == 0u && lane < dims.nb_lanes) {
        partials[group] = scratch[0];
    }
}
"#;

/// Flat pass: one thread per lane walks every remaining element.
///
/// Bindings: 0 values, 1 `{nb_elems, nb_lanes}`, 2 results (one per lane).
pub const REDUCE_FLAT_SHADER: &str = r#"
struct Dimensions {
    nb_elems: u32,
    nb_lanes: u32,
};

@group(0) @binding(0) var<storage, read> values: array<f32>;
@group(0) @binding(1) var<uniform> dims: Dimensions;
@group(0) @binding(2) var<storage, read_write> results: array<f32>;

@compute @workgroup_size(@WG_X@, @WG_Y@, @WG_Z@)
fn reduceSum(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let lane = (gid.z * nwg.y + gid.y) * nwg.x * @WG_X@u + gid.x;
    if (lane >= dims.nb_lanes) {
        return;
    }
    let base = lane * dims.nb_elems;
    var acc: f32 = 0.0;
    for (var elem = 0u; elem < dims.nb_elems; elem = elem + 1u) {
        acc = acc + values[base + elem];
    }
    results[lane] = acc;
}

@compute @workgroup_size(@WG_X@, @WG_Y@, @WG_Z@)
fn reduceMax(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let lane = (gid.z * nwg.y + gid.y) * nwg.x * @WG_X@u + gid.x;
    if (lane >= dims.nb_lanes) {
        return;
    }
    let base = lane * dims.nb_elems;
    var acc: f32 = values[base];
    for (var elem = 1u; elem < dims.nb_elems; elem = elem + 1u) {
        acc = max(acc, values[base + elem]);
    }
    results[lane] = acc;
}
"#;
