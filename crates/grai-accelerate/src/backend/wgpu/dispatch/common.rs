/// Size of one `f32` on the device.
pub const FLOAT_BYTES: u64 = std::mem::size_of::<f32>() as u64;

/// Kernel parameters travel as `u32`; larger values cannot be expressed.
pub fn to_u32(value: usize, what: &str) -> u32 {
    u32::try_from(value).unwrap_or_else(|_| panic!("{what} = {value} does not fit in u32"))
}

/// Asserts `buffer` holds at least `nb_floats` floats.
pub fn ensure_float_capacity(buffer: &wgpu::Buffer, nb_floats: usize, role: &str) {
    let required = nb_floats as u64 * FLOAT_BYTES;
    assert!(
        buffer.size() >= required,
        "{role} buffer holds {} bytes, {} required",
        buffer.size(),
        required
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_values_convert() {
        assert_eq!(to_u32(257, "nb_elems"), 257);
    }

    #[test]
    #[should_panic(expected = "does not fit in u32")]
    fn oversized_values_are_fatal() {
        to_u32(usize::MAX, "nb_elems");
    }
}
