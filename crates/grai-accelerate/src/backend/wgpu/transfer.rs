use futures::channel::oneshot;
use pollster::block_on;

/// Rounds a byte count up to what `copy_buffer_to_buffer` and `write_buffer` accept.
pub fn copy_size(byte_len: usize) -> u64 {
    let align = wgpu::COPY_BUFFER_ALIGNMENT;
    let bytes = byte_len as u64;
    ((bytes + align - 1) / align * align).max(align)
}

pub(crate) fn staging_buffer(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("grai-readback-staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// A staging buffer whose copy has been submitted but not mapped yet.
pub(crate) struct PendingReadback {
    pub slot: usize,
    pub staging: wgpu::Buffer,
    pub size: u64,
}

/// Maps every staging buffer, waits for `last` and hands each mapped range to `sink`.
///
/// Same-queue submissions complete in order, so waiting on the last one covers the batch.
pub(crate) fn map_readbacks(
    device: &wgpu::Device,
    pending: Vec<PendingReadback>,
    last: wgpu::SubmissionIndex,
    mut sink: impl FnMut(usize, &[u8]),
) {
    let receivers: Vec<_> = pending
        .iter()
        .map(|readback| {
            let (tx, rx) = oneshot::channel();
            readback
                .staging
                .slice(..)
                .map_async(wgpu::MapMode::Read, move |res| {
                    let _ = tx.send(res);
                });
            rx
        })
        .collect();

    device.poll(wgpu::Maintain::WaitForSubmissionIndex(last));

    for (readback, rx) in pending.into_iter().zip(receivers) {
        match block_on(rx) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => panic!("readback of {} bytes failed: {err}", readback.size),
            Err(_) => panic!("readback of {} bytes: map_async callback dropped", readback.size),
        }
        {
            let data = readback.staging.slice(..).get_mapped_range();
            sink(readback.slot, &data[..]);
        }
        readback.staging.unmap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_sizes_are_four_byte_multiples() {
        assert_eq!(copy_size(0), 4);
        assert_eq!(copy_size(2), 4);
        assert_eq!(copy_size(4), 4);
        assert_eq!(copy_size(6), 8);
        assert_eq!(copy_size(4097 * 2), 8196);
    }
}
