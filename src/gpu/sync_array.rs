// ============================================================================
// SYNCHRONIZED ARRAY - host buffer + device mirror with explicit transfers
// ============================================================================
//
// The device buffer is the authority for kernel outputs.  The host copy is
// only meaningful after `read_back`, which is ordered after every kernel
// submitted before it.  Host writes mark the array dirty; the dispatcher
// uploads dirty arrays right before the kernel that binds them.

use std::cell::Cell;
use std::fmt;
use std::ops::{Index, IndexMut};

use bytemuck::Pod;

use super::context::GpuContext;
use crate::error::{ComputeError, ComputeResult};

/// Logical shape of a synchronized array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    Grid { rows: usize, cols: usize },
}

impl Shape {
    pub fn grid(rows: usize, cols: usize) -> Self {
        Self::Grid { rows, cols }
    }

    /// Element count; saturates for grids too large to address.
    pub fn len(&self) -> usize {
        self.checked_len().unwrap_or(usize::MAX)
    }

    pub fn checked_len(&self) -> Option<usize> {
        match *self {
            Shape::Scalar => Some(1),
            Shape::Grid { rows, cols } => rows.checked_mul(cols),
        }
    }

    pub fn is_grid(&self) -> bool {
        matches!(self, Shape::Grid { .. })
    }

    /// (rows, cols); a scalar is a 1×1 grid.
    pub fn dims(&self) -> (usize, usize) {
        match *self {
            Shape::Scalar => (1, 1),
            Shape::Grid { rows, cols } => (rows, cols),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Scalar => write!(f, "scalar"),
            Shape::Grid { rows, cols } => write!(f, "{rows}x{cols} grid"),
        }
    }
}

/// How kernels use the device buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// Host-provided input (parameter blocks, uploaded images).
    ReadOnly,
    /// Kernel output; the host only ever reads it back.
    WriteOnly,
    /// Host-seeded and device-updated (accumulators).
    ReadWrite,
}

impl Access {
    fn usages(self) -> wgpu::BufferUsages {
        match self {
            Access::ReadOnly => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            Access::WriteOnly | Access::ReadWrite => {
                wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC
            }
        }
    }
}

/// Device buffer size in bytes for `shape` elements of `elem` bytes.
pub fn buffer_size(label: &str, shape: Shape, elem: usize, limit: u64) -> ComputeResult<u64> {
    if elem == 0 || elem % wgpu::COPY_BUFFER_ALIGNMENT as usize != 0 {
        return Err(ComputeError::allocation(
            label,
            format!("element size {elem} is not a multiple of 4 bytes"),
        ));
    }
    let len = shape
        .checked_len()
        .ok_or_else(|| ComputeError::allocation(label, format!("{shape} is too large")))?;
    if len == 0 {
        return Err(ComputeError::allocation(label, format!("empty shape {shape}")));
    }
    let size = len
        .checked_mul(elem)
        .and_then(|bytes| u64::try_from(bytes).ok())
        .ok_or_else(|| ComputeError::allocation(label, format!("{shape} is too large")))?;
    if size > limit {
        return Err(ComputeError::allocation(
            label,
            format!("{size} bytes exceeds the device binding limit of {limit}"),
        ));
    }
    Ok(size)
}

/// Type-erased view of a synchronized array, as bound by the dispatcher.
pub trait KernelArg {
    fn label(&self) -> &str;
    fn shape(&self) -> Shape;
    fn access(&self) -> Access;
    fn buffer(&self) -> &wgpu::Buffer;
    /// Upload the host copy if it changed since the last upload.
    fn flush(&self, queue: &wgpu::Queue);
}

pub struct SyncArray<T: Pod> {
    label: String,
    shape: Shape,
    access: Access,
    host: Vec<T>,
    buffer: wgpu::Buffer,
    staging: Option<wgpu::Buffer>,
    dirty: Cell<bool>,
}

impl<T: Pod> SyncArray<T> {
    pub fn new(ctx: &GpuContext, shape: Shape, access: Access, label: &str) -> ComputeResult<Self> {
        let size = buffer_size(label, shape, std::mem::size_of::<T>(), ctx.max_storage_binding)?;
        let len = shape.len();

        ctx.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: access.usages(),
            mapped_at_creation: false,
        });
        if let Some(err) = pollster::block_on(ctx.device.pop_error_scope()) {
            return Err(ComputeError::allocation(label, err.to_string()));
        }

        tracing::debug!(label, %shape, bytes = size, "allocated synchronized array");

        Ok(Self {
            label: label.to_string(),
            shape,
            access,
            host: vec![T::zeroed(); len],
            buffer,
            staging: None,
            dirty: Cell::new(false),
        })
    }

    pub fn scalar(ctx: &GpuContext, access: Access, label: &str) -> ComputeResult<Self> {
        Self::new(ctx, Shape::Scalar, access, label)
    }

    pub fn len(&self) -> usize {
        self.host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    /// Host copy.  Stale for kernel outputs until `read_back`.
    pub fn host(&self) -> &[T] {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut [T] {
        self.dirty.set(true);
        &mut self.host
    }

    /// Replace the whole host copy; `data` must match the shape's length.
    pub fn assign(&mut self, data: &[T]) {
        assert_eq!(
            data.len(),
            self.host.len(),
            "assign to `{}`: length mismatch",
            self.label
        );
        self.host_mut().copy_from_slice(data);
    }

    /// Upload the host copy now, regardless of the dirty flag.
    pub fn write_to_device(&self, queue: &wgpu::Queue) {
        queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(&self.host));
        self.dirty.set(false);
    }

    /// Copy the current device contents into the host copy and return it.
    ///
    /// The copy is queued behind every previously submitted kernel, and this
    /// call waits for it, so the result reflects the last kernel (in
    /// submission order) that wrote this buffer.
    pub fn read_back(&mut self, ctx: &GpuContext) -> ComputeResult<&[T]> {
        if self.access == Access::ReadOnly {
            return Err(ComputeError::readback(&self.label, "array is device read-only"));
        }
        let size = self.buffer.size();
        let staging = self.staging.get_or_insert_with(|| {
            ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("sync_array_staging"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("sync_array_readback"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, staging, 0, size);
        ctx.submit_one(encoder);

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        ctx.wait_idle();
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ComputeError::readback(&self.label, e.to_string())),
            Err(e) => return Err(ComputeError::readback(&self.label, e.to_string())),
        }

        {
            let mapped = slice.get_mapped_range();
            self.host.copy_from_slice(bytemuck::cast_slice(&mapped));
        }
        staging.unmap();

        Ok(&self.host)
    }

    fn flat(&self, row: usize, col: usize) -> usize {
        let (rows, cols) = self.shape.dims();
        assert!(
            row < rows && col < cols,
            "index ({row}, {col}) out of range for `{}` ({})",
            self.label,
            self.shape
        );
        row * cols + col
    }
}

impl<T: Pod> KernelArg for SyncArray<T> {
    fn label(&self) -> &str {
        &self.label
    }

    fn shape(&self) -> Shape {
        self.shape
    }

    fn access(&self) -> Access {
        self.access
    }

    fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    fn flush(&self, queue: &wgpu::Queue) {
        if self.dirty.get() {
            self.write_to_device(queue);
        }
    }
}

impl<T: Pod> Index<usize> for SyncArray<T> {
    type Output = T;

    fn index(&self, i: usize) -> &T {
        &self.host[i]
    }
}

impl<T: Pod> IndexMut<usize> for SyncArray<T> {
    fn index_mut(&mut self, i: usize) -> &mut T {
        self.dirty.set(true);
        &mut self.host[i]
    }
}

impl<T: Pod> Index<(usize, usize)> for SyncArray<T> {
    type Output = T;

    fn index(&self, (row, col): (usize, usize)) -> &T {
        &self.host[self.flat(row, col)]
    }
}

impl<T: Pod> IndexMut<(usize, usize)> for SyncArray<T> {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut T {
        let i = self.flat(row, col);
        self.dirty.set(true);
        &mut self.host[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_lengths_and_dims() {
        assert_eq!(Shape::Scalar.len(), 1);
        assert_eq!(Shape::grid(600, 800).len(), 480_000);
        assert_eq!(Shape::grid(3, 4).dims(), (3, 4));
        assert_eq!(Shape::Scalar.dims(), (1, 1));
        assert!(!Shape::Scalar.is_grid());
        assert_eq!(Shape::grid(2, 5).to_string(), "2x5 grid");
    }

    #[test]
    fn buffer_sizes_are_checked() {
        assert_eq!(buffer_size("f", Shape::grid(600, 800), 4, u64::MAX).unwrap(), 1_920_000);
        assert_eq!(buffer_size("p", Shape::Scalar, 32, 32).unwrap(), 32);
        assert!(buffer_size("p", Shape::Scalar, 32, 31).is_err());
        assert!(buffer_size("f", Shape::grid(0, 800), 4, u64::MAX).is_err());
        assert!(buffer_size("b", Shape::grid(2, 2), 3, u64::MAX).is_err());
    }

    #[test]
    fn huge_grids_fail_instead_of_overflowing() {
        let huge = Shape::grid(1 << 32, 1 << 32);
        assert_eq!(huge.checked_len(), None);
        assert_eq!(huge.len(), usize::MAX);
        assert!(matches!(
            buffer_size("field1", huge, 4, u64::MAX),
            Err(ComputeError::Allocation { .. })
        ));
        let wide = Shape::grid(usize::MAX / 2, 1);
        assert!(matches!(
            buffer_size("field1", wide, 4, u64::MAX),
            Err(ComputeError::Allocation { .. })
        ));
    }

    #[test]
    fn output_arrays_can_be_copied_out() {
        assert!(Access::WriteOnly.usages().contains(wgpu::BufferUsages::COPY_SRC));
        assert!(!Access::ReadOnly.usages().contains(wgpu::BufferUsages::COPY_SRC));
    }
}
