//! CLImFractal - GPU-computed escape-time, proximity and orbit-trap fields
//! with a runtime-editable recurrence.

pub mod app;
pub mod cli;
pub mod error;
pub mod explorer;
pub mod gpu;
pub mod io;
pub mod logger;
pub mod pipeline;
pub mod settings;
pub mod view;

pub use error::{ComputeError, ComputeResult};
pub use explorer::{Controls, Explorer, FrameInput, Preset};
pub use pipeline::{CombineMode, FieldConfig, FieldOp, FieldPipeline, FrameStatus, TrapPart};
pub use view::{FractalMode, Viewport};
