// ============================================================================
// EXPLORER - per-frame orchestration of viewport, pipeline and kernels
// ============================================================================
//
// Owns every synchronized array (through the pipeline), the dispatcher and
// the active kernel program.  All access happens on one host thread; the
// only blocking points are `join`, `pixels` and recompilation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ComputeError, ComputeResult};
use crate::gpu::{Dispatcher, FParam, GpuContext, KernelSources, Pixel};
use crate::io::{self, DiskImages};
use crate::pipeline::{
    CombineMode, FIELD_SLOTS, FieldConfig, FieldPipeline, FrameRequest, FrameStatus, ImageSource,
};
use crate::settings::AppSettings;
use crate::view::{FractalMode, Viewport, max_iter_from_log10};

/// UI-originated values that shape a frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Controls {
    pub compute: bool,
    /// Julia constant (re, im); ignored in Mandelbrot mode.
    pub julia_c: [f32; 2],
    /// log10 of MAXITER, slider range [0, 4].
    pub max_iter_log10: f32,
    pub mode: CombineMode,
    /// Slot table: field1..field3.
    pub fields: [FieldConfig; FIELD_SLOTS],
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            compute: false,
            julia_c: [-0.85, 0.6],
            max_iter_log10: 2.0,
            mode: CombineMode::default(),
            fields: [FieldConfig::default(); FIELD_SLOTS],
        }
    }
}

impl Controls {
    pub fn max_iter(&self) -> i32 {
        max_iter_from_log10(self.max_iter_log10)
    }
}

/// Pointer and wheel input gathered over one displayed frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameInput {
    /// Pointer moved while engaged inside the view region.
    pub drag_delta: Option<[f32; 2]>,
    /// Size of the view surface in pixels.
    pub surface: [f32; 2],
    /// Positive = zoom in.
    pub wheel_ticks: i32,
}

/// Everything a user can save and restore.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub viewport: Viewport,
    pub controls: Controls,
    pub function: String,
}

pub struct Explorer {
    ctx: GpuContext,
    dispatcher: Dispatcher,
    pipeline: FieldPipeline,
    images: Box<dyn ImageSource>,
    pub viewport: Viewport,
    pub controls: Controls,
    /// Source of the recurrence the active program was built from.
    function: String,
    map_images: Vec<PathBuf>,
    last_status: FrameStatus,
}

impl Explorer {
    /// Open the GPU, compile the default program and allocate the grid
    /// described by `settings`.
    pub fn new(settings: &AppSettings) -> ComputeResult<Self> {
        let ctx = GpuContext::new(&settings.preferred_gpu)?;
        Self::with_context(ctx, settings, Box::new(DiskImages))
    }

    pub fn with_context(
        ctx: GpuContext,
        settings: &AppSettings,
        images: Box<dyn ImageSource>,
    ) -> ComputeResult<Self> {
        let sources = KernelSources::resolve(&settings.kernel_search_path)?;
        let function = sources.default_region()?.to_string();
        let dispatcher = Dispatcher::new(&ctx, sources, "")?;
        let pipeline = FieldPipeline::new(&ctx, settings.grid_rows, settings.grid_cols)?;
        let map_images = io::scan_map_images(&settings.map_image_dir);

        let mut controls = Controls {
            compute: settings.compute_on_start,
            ..Controls::default()
        };
        if let CombineMode::DualField { image } = &mut controls.mode {
            *image = map_images.first().cloned();
        }

        tracing::info!(
            adapter = %ctx.adapter_name,
            rows = settings.grid_rows,
            cols = settings.grid_cols,
            "explorer ready"
        );

        Ok(Self {
            ctx,
            dispatcher,
            pipeline,
            images,
            viewport: Viewport::new(FractalMode::Mandelbrot).with_zoom_ratio(settings.zoom_ratio),
            controls,
            function,
            map_images,
            last_status: FrameStatus::Idle,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    /// (rows, cols) of the field grid and pixel buffer.
    pub fn grid(&self) -> (usize, usize) {
        self.pipeline.shape().dims()
    }

    /// Apply interaction deltas to the viewport.
    pub fn apply_input(&mut self, input: &FrameInput) {
        if let Some(delta) = input.drag_delta {
            self.viewport.drag(delta, input.surface);
        }
        if input.wheel_ticks != 0 {
            self.viewport.zoom(input.wheel_ticks);
        }
    }

    /// Parameter block for the current viewport and controls.
    pub fn param(&self) -> FParam {
        FParam {
            mandel: (self.viewport.mode == FractalMode::Mandelbrot) as i32,
            max_iter: self.controls.max_iter(),
            c: self.controls.julia_c,
            view_rect: self.viewport.view_rect().to_f32(),
        }
    }

    /// Apply `input`, then enqueue this frame's kernels.  Never blocks.
    pub fn frame(&mut self, input: &FrameInput) -> ComputeResult<FrameStatus> {
        self.apply_input(input);
        let request = FrameRequest {
            compute: self.controls.compute,
            param: self.param(),
            fields: &self.controls.fields,
            mode: &self.controls.mode,
        };
        let status = self
            .pipeline
            .run(&mut self.dispatcher, &request, self.images.as_ref())?;
        self.last_status = status;
        Ok(status)
    }

    pub fn last_status(&self) -> FrameStatus {
        self.last_status
    }

    /// Wait for every submitted kernel.
    pub fn join(&mut self) {
        self.dispatcher.join();
    }

    /// Join, then read the pixel buffer back.
    pub fn pixels(&mut self) -> ComputeResult<&[Pixel]> {
        self.dispatcher.join();
        self.pipeline.pixels(&self.ctx)
    }

    /// Join, then rebuild every kernel around `function`.  On failure the
    /// previous program and function text stay active and the diagnostic is
    /// available from [`Explorer::diagnostic`].  A blank `function` builds the
    /// template's own recurrence, which is then the stored function text.
    pub fn recompile(&mut self, function: &str) -> ComputeResult<()> {
        self.dispatcher.join();
        match self.dispatcher.recompile(function) {
            Ok(()) => {
                self.function = if function.trim().is_empty() {
                    self.dispatcher
                        .registry()
                        .sources()
                        .default_region()?
                        .to_string()
                } else {
                    function.to_string()
                };
                tracing::info!(
                    generation = self.dispatcher.program_generation(),
                    "recurrence recompiled"
                );
                Ok(())
            }
            Err(err) => {
                tracing::warn!("recompile failed; keeping the previous program");
                Err(err)
            }
        }
    }

    /// Rebuild with the template's own recurrence.
    pub fn reset_function(&mut self) -> ComputeResult<()> {
        self.recompile("")
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn diagnostic(&self) -> Option<&str> {
        self.dispatcher.diagnostic()
    }

    pub fn program_generation(&self) -> u64 {
        self.dispatcher.program_generation()
    }

    pub fn set_fractal_mode(&mut self, mode: FractalMode) {
        self.viewport.set_mode(mode);
    }

    pub fn reset_view(&mut self) {
        self.viewport.reset();
    }

    pub fn map_images(&self) -> &[PathBuf] {
        &self.map_images
    }

    pub fn rescan_map_images(&mut self, dir: &Path) {
        self.map_images = io::scan_map_images(dir);
        if let CombineMode::DualField { image } = &mut self.controls.mode {
            if image.as_ref().is_none_or(|p| !self.map_images.contains(p)) {
                *image = self.map_images.first().cloned();
            }
        }
    }

    // ========================================================================
    // PRESETS
    // ========================================================================

    pub fn preset(&self) -> Preset {
        Preset {
            viewport: self.viewport,
            controls: self.controls.clone(),
            function: self.function.clone(),
        }
    }

    pub fn save_preset(&self, path: &Path) -> ComputeResult<()> {
        io::write_json(path, &self.preset())?;
        tracing::info!("preset saved to {}", path.display());
        Ok(())
    }

    /// Restore viewport and controls, then rebuild the program if the saved
    /// function differs.  A function that no longer compiles leaves the
    /// current program active and is reported as the error.
    pub fn apply_preset(&mut self, preset: Preset) -> ComputeResult<()> {
        self.viewport = preset.viewport.sanitized();
        self.controls = preset.controls;
        if preset.function != self.function {
            self.recompile(&preset.function)?;
        }
        Ok(())
    }

    pub fn load_preset(&mut self, path: &Path) -> ComputeResult<()> {
        let preset: Preset = io::read_json(path)?;
        self.apply_preset(preset)?;
        tracing::info!("preset loaded from {}", path.display());
        Ok(())
    }
}

/// Read a recurrence from a file, rejecting empty files.
pub fn read_function_file(path: &Path) -> ComputeResult<String> {
    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Err(ComputeError::Compile(format!(
            "{}: function file is empty",
            path.display()
        )));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::shaders::DEFAULT_RECURRENCE;
    use crate::gpu::TrapBox;
    use crate::pipeline::{FieldOp, TrapPart};

    #[test]
    fn default_controls_match_startup_state() {
        let c = Controls::default();
        assert!(!c.compute);
        assert_eq!(c.max_iter(), 100);
        assert_eq!(c.mode.fields_used(), 1);
    }

    #[test]
    fn preset_json_round_trip() {
        let mut controls = Controls::default();
        controls.mode = CombineMode::TriField { normalize: true };
        controls.fields[1] = FieldConfig {
            op: FieldOp::OrbitTrap {
                trap: TrapBox::default(),
                part: TrapPart::Real,
            },
            log_scale: true,
        };
        let preset = Preset {
            viewport: Viewport::new(FractalMode::Julia),
            controls,
            function: DEFAULT_RECURRENCE.to_string(),
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preset.json");
        io::write_json(&path, &preset).unwrap();
        let back: Preset = io::read_json(&path).unwrap();
        assert_eq!(back, preset);
    }

    #[test]
    fn corrupt_preset_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ nope").unwrap();
        let err = io::read_json::<Preset>(&path).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn empty_function_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.wgsl");
        std::fs::write(&path, "  \n").unwrap();
        assert!(read_function_file(&path).is_err());
    }
}
