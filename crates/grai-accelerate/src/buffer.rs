//! Typed device arrays.
//!
//! A [`Buffer`] is either [`SharedBuffer`] (page-aligned host block kept coherent with a
//! device copy) or [`PrivateBuffer`] (device-only memory reached from the host through a
//! temporary shared mirror). Every transfer goes through the [`ComputeContext`] the buffer
//! was created for.

use std::fmt;
use std::marker::PhantomData;

use bytemuck::{Pod, Zeroable};
use once_cell::sync::OnceCell;
use wgpu::util::DeviceExt;

use crate::backend::wgpu::device::ComputeDevice;
use crate::backend::wgpu::transfer::copy_size;
use crate::registry::ComputeContext;

/// Host pages are allocated in multiples of this size.
pub const PAGE_SIZE: usize = 4096;

#[derive(Clone, Copy)]
#[repr(C, align(4096))]
struct Page([u8; PAGE_SIZE]);

// SAFETY: a page is a plain byte array with no padding (size == alignment).
unsafe impl Zeroable for Page {}
unsafe impl Pod for Page {}

/// Element types a buffer can hold.
pub trait Element: Pod + Zeroable + Send + Sync + fmt::Debug + 'static {
    const NAME: &'static str;
}

impl Element for f32 {
    const NAME: &'static str = "f32";
}

impl Element for half::f16 {
    const NAME: &'static str = "f16";
}

impl Element for u32 {
    const NAME: &'static str = "u32";
}

impl Element for i32 {
    const NAME: &'static str = "i32";
}

/// Where [`ComputeContext::create_buffer`] places raw device memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind {
    Shared,
    Private,
}

pub(crate) const DEVICE_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// Bytes reserved on the host for `byte_len` bytes of payload.
pub fn allocation_size(byte_len: usize) -> usize {
    let pages = (byte_len + PAGE_SIZE - 1) / PAGE_SIZE;
    pages.max(1) * PAGE_SIZE
}

pub struct SharedBuffer<T: Element> {
    nb_elems: usize,
    device_id: usize,
    pages: Box<[Page]>,
    handle: OnceCell<wgpu::Buffer>,
    _marker: PhantomData<T>,
}

impl<T: Element> SharedBuffer<T> {
    pub fn new(nb_elems: usize, device_id: usize) -> Self {
        let byte_len = nb_elems * std::mem::size_of::<T>();
        let nb_pages = allocation_size(byte_len) / PAGE_SIZE;
        Self {
            nb_elems,
            device_id,
            pages: vec![Page::zeroed(); nb_pages].into_boxed_slice(),
            handle: OnceCell::new(),
            _marker: PhantomData,
        }
    }

    pub fn nb_elems(&self) -> usize {
        self.nb_elems
    }

    pub fn device_id(&self) -> usize {
        self.device_id
    }

    pub fn byte_len(&self) -> usize {
        self.nb_elems * std::mem::size_of::<T>()
    }

    pub fn allocation_size(&self) -> usize {
        self.pages.len() * PAGE_SIZE
    }

    /// Host view; only reflects device writes after a download.
    pub fn as_slice(&self) -> &[T] {
        &bytemuck::cast_slice::<Page, T>(&self.pages)[..self.nb_elems]
    }

    /// Mutable host view; changes reach the device on the next upload.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let nb_elems = self.nb_elems;
        &mut bytemuck::cast_slice_mut::<Page, T>(&mut self.pages)[..nb_elems]
    }

    pub(crate) fn host_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pages)
    }

    pub(crate) fn host_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.pages)
    }

    /// Device handle, created from the host bytes on first use.
    pub fn device_handle<'s>(&'s self, ctx: &ComputeContext) -> &'s wgpu::Buffer {
        self.handle_on(ctx.device(self.device_id))
    }

    pub(crate) fn handle_on<'s>(&'s self, device: &ComputeDevice) -> &'s wgpu::Buffer {
        assert_eq!(
            device.id(),
            self.device_id,
            "buffer of device {} used on device {}",
            self.device_id,
            device.id()
        );
        self.handle.get_or_init(|| {
            device
                .wgpu_device()
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("grai-shared-buffer"),
                    contents: self.host_bytes(),
                    usage: DEVICE_USAGE,
                })
        })
    }

    pub(crate) fn existing_handle(&self) -> Option<&wgpu::Buffer> {
        self.handle.get()
    }

    /// Pushes the host bytes to an existing device copy. Queued, does not block.
    pub(crate) fn publish(&self, device: &ComputeDevice) {
        match self.handle.get() {
            Some(handle) => {
                let len = copy_size(self.byte_len()) as usize;
                device.queue().write_buffer(handle, 0, &self.host_bytes()[..len]);
                device.metrics().add_upload_bytes(len as u64);
            }
            None => {
                // First use creates the device copy from these bytes.
                self.handle_on(device);
            }
        }
    }

    pub fn download(&mut self, ctx: &ComputeContext) -> &[T] {
        ctx.device(self.device_id).download_shared(&mut [&mut *self]);
        self.as_slice()
    }

    pub fn upload(&self, ctx: &ComputeContext) {
        self.publish(ctx.device(self.device_id));
    }
}

impl<T: Element> fmt::Debug for SharedBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("element", &T::NAME)
            .field("nb_elems", &self.nb_elems)
            .field("device_id", &self.device_id)
            .field("on_device", &self.handle.get().is_some())
            .finish()
    }
}

pub struct PrivateBuffer<T: Element> {
    nb_elems: usize,
    device_id: usize,
    handle: OnceCell<wgpu::Buffer>,
    mirror: Option<SharedBuffer<T>>,
}

impl<T: Element> PrivateBuffer<T> {
    pub fn new(nb_elems: usize, device_id: usize) -> Self {
        Self {
            nb_elems,
            device_id,
            handle: OnceCell::new(),
            mirror: None,
        }
    }

    pub fn nb_elems(&self) -> usize {
        self.nb_elems
    }

    pub fn device_id(&self) -> usize {
        self.device_id
    }

    pub fn byte_len(&self) -> usize {
        self.nb_elems * std::mem::size_of::<T>()
    }

    pub fn device_handle<'s>(&'s self, ctx: &ComputeContext) -> &'s wgpu::Buffer {
        self.handle_on(ctx.device(self.device_id))
    }

    pub(crate) fn handle_on<'s>(&'s self, device: &ComputeDevice) -> &'s wgpu::Buffer {
        assert_eq!(
            device.id(),
            self.device_id,
            "buffer of device {} used on device {}",
            self.device_id,
            device.id()
        );
        self.handle
            .get_or_init(|| device.allocate(copy_size(self.byte_len()), StorageKind::Private))
    }

    pub fn has_mirror(&self) -> bool {
        self.mirror.is_some()
    }

    /// Host view of the mirror, if one is currently provisioned.
    pub fn mirror(&self) -> Option<&[T]> {
        self.mirror.as_ref().map(SharedBuffer::as_slice)
    }

    /// Mutable host view, provisioning a zeroed mirror when none exists.
    pub fn host_mut(&mut self) -> &mut [T] {
        self.mirror_mut().as_mut_slice()
    }

    pub(crate) fn mirror_mut(&mut self) -> &mut SharedBuffer<T> {
        let (nb_elems, device_id) = (self.nb_elems, self.device_id);
        self.mirror.get_or_insert_with(|| SharedBuffer::new(nb_elems, device_id))
    }

    pub(crate) fn mirror_ref(&self) -> Option<&SharedBuffer<T>> {
        self.mirror.as_ref()
    }

    pub(crate) fn mirror_slot(&mut self) -> Option<&mut SharedBuffer<T>> {
        self.mirror.as_mut()
    }

    pub(crate) fn take_mirror(&mut self) -> Option<SharedBuffer<T>> {
        self.mirror.take()
    }

    pub fn download(&mut self, ctx: &ComputeContext) -> &[T] {
        ctx.device(self.device_id).download_private(&mut [&mut *self]);
        self.mirror().unwrap_or(&[])
    }

    pub fn upload(&mut self, ctx: &ComputeContext) {
        ctx.device(self.device_id).upload_private(&mut [&mut *self]);
    }
}

impl<T: Element> fmt::Debug for PrivateBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateBuffer")
            .field("element", &T::NAME)
            .field("nb_elems", &self.nb_elems)
            .field("device_id", &self.device_id)
            .field("mirror", &self.mirror.is_some())
            .finish()
    }
}

/// An `nb_elems` array of `T` on one device.
#[derive(Debug)]
pub enum Buffer<T: Element> {
    Shared(SharedBuffer<T>),
    Private(PrivateBuffer<T>),
}

impl<T: Element> Buffer<T> {
    pub fn new(nb_elems: usize, device_id: usize, shared: bool) -> Self {
        if shared {
            Buffer::Shared(SharedBuffer::new(nb_elems, device_id))
        } else {
            Buffer::Private(PrivateBuffer::new(nb_elems, device_id))
        }
    }

    pub fn nb_elems(&self) -> usize {
        match self {
            Buffer::Shared(buffer) => buffer.nb_elems(),
            Buffer::Private(buffer) => buffer.nb_elems(),
        }
    }

    pub fn device_id(&self) -> usize {
        match self {
            Buffer::Shared(buffer) => buffer.device_id(),
            Buffer::Private(buffer) => buffer.device_id(),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Buffer::Shared(_))
    }

    pub fn byte_len(&self) -> usize {
        self.nb_elems() * std::mem::size_of::<T>()
    }

    /// Current host view without synchronizing. Empty for a private buffer without mirror.
    pub fn host(&self) -> &[T] {
        match self {
            Buffer::Shared(buffer) => buffer.as_slice(),
            Buffer::Private(buffer) => buffer.mirror().unwrap_or(&[]),
        }
    }

    /// Mutable host view to fill before [`Buffer::upload`].
    pub fn host_mut(&mut self) -> &mut [T] {
        match self {
            Buffer::Shared(buffer) => buffer.as_mut_slice(),
            Buffer::Private(buffer) => buffer.host_mut(),
        }
    }

    /// Synchronizes device to host, blocking until the copy completed.
    pub fn download(&mut self, ctx: &ComputeContext) -> &[T] {
        ctx.download(&mut [&mut *self]);
        self.host()
    }

    pub fn upload(&mut self, ctx: &ComputeContext) {
        ctx.upload(&mut [&mut *self]);
    }

    /// Copies `values` into the host view, then uploads.
    pub fn upload_from(&mut self, ctx: &ComputeContext, values: &[T]) {
        assert_eq!(
            values.len(),
            self.nb_elems(),
            "upload of {} values into a buffer of {} elements",
            values.len(),
            self.nb_elems()
        );
        self.host_mut().copy_from_slice(values);
        self.upload(ctx);
    }

    pub fn device_handle<'s>(&'s self, ctx: &ComputeContext) -> &'s wgpu::Buffer {
        self.handle_on(ctx.device(self.device_id()))
    }

    pub(crate) fn handle_on<'s>(&'s self, device: &ComputeDevice) -> &'s wgpu::Buffer {
        match self {
            Buffer::Shared(buffer) => buffer.handle_on(device),
            Buffer::Private(buffer) => buffer.handle_on(device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    #[test]
    fn host_allocation_is_page_rounded() {
        assert_eq!(allocation_size(0), PAGE_SIZE);
        assert_eq!(allocation_size(4), PAGE_SIZE);
        assert_eq!(allocation_size(4096), PAGE_SIZE);
        assert_eq!(allocation_size(4097), 2 * PAGE_SIZE);

        for (nb_elems, pages) in [(1, 1), (1024, 1), (1025, 2), (4097, 5)] {
            let buffer = SharedBuffer::<f32>::new(nb_elems, 0);
            assert_eq!(buffer.allocation_size(), pages * PAGE_SIZE);
            assert_eq!(buffer.as_slice().len(), nb_elems);
        }
    }

    #[test]
    fn host_memory_is_zeroed_and_aligned() {
        let buffer = SharedBuffer::<f16>::new(4095, 0);
        assert!(buffer.as_slice().iter().all(|v| *v == f16::ZERO));
        assert_eq!(buffer.host_bytes().as_ptr() as usize % PAGE_SIZE, 0);
    }

    #[test]
    fn host_writes_stay_in_view() {
        let mut buffer = SharedBuffer::<u32>::new(5, 0);
        buffer.as_mut_slice().copy_from_slice(&[1, 2, 3, 4, 5]);
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4, 5]);
        assert_eq!(&buffer.host_bytes()[..4], &1u32.to_ne_bytes());
        // Padding beyond the payload stays untouched.
        assert!(buffer.host_bytes()[20..].iter().all(|b| *b == 0));
    }

    #[test]
    fn private_mirror_is_lazy() {
        let mut buffer = Buffer::<f32>::new(3, 0, false);
        assert!(!buffer.is_shared());
        assert!(buffer.host().is_empty());
        buffer.host_mut()[1] = 2.5;
        assert_eq!(buffer.host(), &[0.0, 2.5, 0.0]);

        if let Buffer::Private(private) = &mut buffer {
            assert!(private.has_mirror());
            assert!(private.take_mirror().is_some());
            assert!(!private.has_mirror());
        }
    }
}
