//! Half-precision conversions.
//!
//! Halves travel as packed pairs in `u32` words so the kernels do not need the
//! `shader-f16` feature. Both are dispatched as lines and may be wrapped into rows.

/// Bindings: 0 floats, 1 nb_elems, 2 halves (packed). One thread per pair.
pub const FLOAT_TO_HALF_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read> floats: array<f32>;
@group(0) @binding(1) var<uniform> nb_elems: u32;
@group(0) @binding(2) var<storage, read_write> halves: array<u32>;

@compute @workgroup_size(@WG_X@, @WG_Y@, @WG_Z@)
fn convertFloat2Half(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let pair = (gid.z * nwg.y + gid.y) * nwg.x * @WG_X@u + gid.x;
    let first = pair * 2u;
    if (first >= nb_elems) {
        return;
    }
    var second: f32 = 0.0;
    if (first + 1u < nb_elems) {
        second = floats[first + 1u];
    }
    halves[pair] = pack2x16float(vec2<f32>(floats[first], second));
}
"#;

/// Bindings: 0 halves (packed), 1 nb_elems, 2 floats. One thread per element.
pub const HALF_TO_FLOAT_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read> halves: array<u32>;
@group(0) @binding(1) var<uniform> nb_elems: u32;
@group(0) @binding(2) var<storage, read_write> floats: array<f32>;

@compute @workgroup_size(@WG_X@, @WG_Y@, @WG_Z@)
fn convertHalf2Float(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let elem = (gid.z * nwg.y + gid.y) * nwg.x * @WG_X@u + gid.x;
    if (elem >= nb_elems) {
        return;
    }
    let pair = unpack2x16float(halves[elem / 2u]);
    floats[elem] = pair[elem % 2u];
}
"#;
