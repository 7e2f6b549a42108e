//! Creation of every GPU buffer the renderer owns.
//!
//! Buffers are fixed-size for the renderer's lifetime. Contents are either
//! zero (wgpu zero-initializes new buffers) or written through a mapping at
//! creation, so no queued write is ever in flight when a frame starts.

use super::error::RendererError;
use wgpu::BufferUsages;

/// Validates a request against the device limits and returns the size to
/// allocate, rounded up to the copy alignment.
pub fn check_request(
    limits: &wgpu::Limits,
    label: &str,
    size: u64,
    usage: BufferUsages,
    initial_len: Option<u64>,
) -> Result<u64, RendererError> {
    if size == 0 {
        return Err(RendererError::ZeroSizedBuffer {
            label: label.to_string(),
        });
    }
    if let Some(data) = initial_len {
        if data > size {
            return Err(RendererError::InitialDataTooLarge {
                label: label.to_string(),
                data,
                size,
            });
        }
    }

    let aligned = size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
    if aligned > limits.max_buffer_size {
        return Err(RendererError::BufferTooLarge {
            label: label.to_string(),
            size: aligned,
            limit: limits.max_buffer_size,
        });
    }
    let binding_limit = limits.max_storage_buffer_binding_size as u64;
    if usage.contains(BufferUsages::STORAGE) && aligned > binding_limit {
        return Err(RendererError::StorageBindingTooLarge {
            label: label.to_string(),
            size: aligned,
            limit: binding_limit,
        });
    }
    Ok(aligned)
}

pub struct ResourceAllocator<'d> {
    device: &'d wgpu::Device,
    limits: wgpu::Limits,
}

impl<'d> ResourceAllocator<'d> {
    pub fn new(device: &'d wgpu::Device) -> Self {
        Self {
            device,
            limits: device.limits(),
        }
    }

    #[inline]
    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    /// Allocates `size` bytes, optionally filled with `initial` at creation.
    pub fn allocate(
        &self,
        label: &str,
        size: u64,
        usage: BufferUsages,
        initial: Option<&[u8]>,
    ) -> Result<wgpu::Buffer, RendererError> {
        let initial_len = initial.map(|data| data.len() as u64);
        let size = check_request(&self.limits, label, size, usage, initial_len)?;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: initial.is_some(),
        });

        if let Some(data) = initial {
            buffer.slice(..).get_mapped_range_mut()[..data.len()].copy_from_slice(data);
            buffer.unmap();
        }

        log::debug!("allocated '{}' ({} bytes, {:?})", label, size, usage);
        Ok(buffer)
    }

    /// Allocates a buffer sized for `data` and filled with it.
    pub fn allocate_init<T: bytemuck::Pod>(
        &self,
        label: &str,
        usage: BufferUsages,
        data: &[T],
    ) -> Result<wgpu::Buffer, RendererError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.allocate(label, bytes.len() as u64, usage, Some(bytes))
    }

    /// Allocates `count` zeroed elements of `T`, never fewer than one so the
    /// buffer stays bindable for empty clouds.
    pub fn allocate_array<T: bytemuck::Pod>(
        &self,
        label: &str,
        usage: BufferUsages,
        count: usize,
    ) -> Result<wgpu::Buffer, RendererError> {
        let size = (count.max(1) * std::mem::size_of::<T>()) as u64;
        self.allocate(label, size, usage, None)
    }
}
