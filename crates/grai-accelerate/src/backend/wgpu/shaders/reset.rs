/// Zero-fills `nb_words` 32-bit words, whatever the element type stored in them.
///
/// Bindings: 0 nb_words, 1 outs.
pub const RESET_SHADER: &str = r#"
@group(0) @binding(0) var<uniform> nb_words: u32;
@group(0) @binding(1) var<storage, read_write> outs: array<u32>;

@compute @workgroup_size(@WG_X@, @WG_Y@, @WG_Z@)
fn reset(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
) {
    let word = (gid.z * nwg.y + gid.y) * nwg.x * @WG_X@u + gid.x;
    if (word >= nb_words) {
        return;
    }
    outs[word] = 0u;
}
"#;
