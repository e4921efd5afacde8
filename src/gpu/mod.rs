// ============================================================================
// GPU MODULE - compute orchestration for the fractal field pipeline
// ============================================================================
//
// Architecture:
//   context.rs    - wgpu Device, Queue, adapter init
//   types.rs      - host mirrors of the WGSL structs
//   shaders.rs    - built-in kernel template (inline WGSL)
//   sync_array.rs - host buffer + device mirror with explicit transfers
//   program.rs    - template splicing, naga reflection, kernel registry
//   dispatch.rs   - named kernel invocations on the ordered queue
// ============================================================================

pub mod context;
pub mod dispatch;
pub mod program;
pub mod shaders;
pub mod sync_array;
pub mod types;

pub use context::GpuContext;
pub use dispatch::Dispatcher;
pub use program::{KernelProgram, KernelSources, ProgramRegistry, KERNEL_NAMES};
pub use sync_array::{Access, KernelArg, Shape, SyncArray};
pub use types::{ChannelRange, FParam, Freqs, ImDims, Pixel, TrapBox};
