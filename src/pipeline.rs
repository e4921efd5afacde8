// ============================================================================
// FIELD PIPELINE - field operations and combine modes as kernel sequences
// ============================================================================
//
// Sequencing rule for one frame:
//   1. the parameter block is written on the host (uploaded with the first
//      kernel that binds it)
//   2. every field the combine mode consumes is resolved, in slot order
//   3. the combine kernel(s) write the pixel buffer
// The queue executes in submission order, so step 3 always sees the fields
// produced by step 2 of the same frame.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ComputeError, ComputeResult};
use crate::gpu::{
    Access, ChannelRange, Dispatcher, FParam, Freqs, GpuContext, ImDims, KernelArg, Pixel, Shape,
    SyncArray, TrapBox,
};

/// Number of field slots.
pub const FIELD_SLOTS: usize = 3;

/// Proximity metric ids understood by `min_prox`.
pub const PROXIMITY_METRICS: i32 = 7;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrapPart {
    Real,
    #[default]
    Imag,
}

/// What a single field slot computes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum FieldOp {
    #[default]
    IterationCount,
    Proximity { metric: i32 },
    OrbitTrap { trap: TrapBox, part: TrapPart },
}

impl FieldOp {
    pub const LABELS: [&'static str; 3] = ["Iters", "Proximity", "Orbit trap"];

    pub fn label(&self) -> &'static str {
        Self::LABELS[self.kind_index()]
    }

    pub fn kind_index(&self) -> usize {
        match self {
            FieldOp::IterationCount => 0,
            FieldOp::Proximity { .. } => 1,
            FieldOp::OrbitTrap { .. } => 2,
        }
    }

    /// Default-parameterized op for a combo-box index.
    pub fn from_kind_index(index: usize) -> Self {
        match index {
            1 => FieldOp::Proximity { metric: 1 },
            2 => FieldOp::OrbitTrap {
                trap: TrapBox::default(),
                part: TrapPart::default(),
            },
            _ => FieldOp::IterationCount,
        }
    }
}

/// Per-slot configuration owned by the orchestrator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub op: FieldOp,
    /// Follow the operation kernel with `apply_log`.
    #[serde(default)]
    pub log_scale: bool,
}

impl FieldConfig {
    pub fn new(op: FieldOp) -> Self {
        Self {
            op,
            log_scale: false,
        }
    }
}

/// How the fields become the pixel buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CombineMode {
    /// field1 through a per-channel sine colour map.
    SingleField { freqs: [f32; 3] },
    /// field1/field2 used as UV coordinates into a map image.
    DualField { image: Option<PathBuf> },
    /// field1/field2/field3 packed into R/G/B.
    TriField { normalize: bool },
}

impl Default for CombineMode {
    fn default() -> Self {
        CombineMode::SingleField {
            freqs: [1.0, 2.0, 3.0],
        }
    }
}

impl CombineMode {
    /// How many leading field slots this mode reads.
    pub fn fields_used(&self) -> usize {
        match self {
            CombineMode::SingleField { .. } => 1,
            CombineMode::DualField { .. } => 2,
            CombineMode::TriField { .. } => 3,
        }
    }
}

/// A decoded map image, row-major, `height` rows of `width` pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct MapImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<Pixel>,
}

impl MapImage {
    /// `width * height`, or `None` if that overflows.
    pub fn pixel_count(&self) -> Option<usize> {
        self.width.checked_mul(self.height)
    }

    pub fn is_empty(&self) -> bool {
        match self.pixel_count() {
            Some(n) => n == 0 || self.pixels.len() < n,
            None => true,
        }
    }
}

/// Image-decoding collaborator for the dual-field mode.
pub trait ImageSource {
    fn load(&self, path: &Path) -> ComputeResult<MapImage>;
}

/// Everything one frame needs besides the pipeline's own buffers.
#[derive(Clone, Copy, Debug)]
pub struct FrameRequest<'a> {
    /// When false nothing is dispatched and the pixel buffer keeps its
    /// last computed contents.
    pub compute: bool,
    pub param: FParam,
    pub fields: &'a [FieldConfig; FIELD_SLOTS],
    pub mode: &'a CombineMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Dispatched,
    Idle,
    /// Fields were computed but the map image could not be used, so the
    /// pixel buffer was not rewritten this frame.
    ImageUnavailable,
}

pub struct FieldPipeline {
    shape: Shape,
    fields: [SyncArray<f32>; FIELD_SLOTS],
    pix: SyncArray<Pixel>,
    param: SyncArray<FParam>,
    prox_sel: [SyncArray<i32>; FIELD_SLOTS],
    trap: [SyncArray<TrapBox>; FIELD_SLOTS],
    freqs: SyncArray<Freqs>,
    img_dims: SyncArray<ImDims>,
    ranges: SyncArray<ChannelRange>,
}

impl FieldPipeline {
    pub fn new(ctx: &GpuContext, rows: usize, cols: usize) -> ComputeResult<Self> {
        let shape = Shape::grid(rows, cols);
        let field = |label: &str| SyncArray::<f32>::new(ctx, shape, Access::WriteOnly, label);
        let fields = [field("field1")?, field("field2")?, field("field3")?];
        let pix = SyncArray::new(ctx, shape, Access::WriteOnly, "pix")?;

        check_grid(
            shape,
            fields
                .iter()
                .map(|f| (f.label(), f.shape()))
                .chain(std::iter::once((pix.label(), pix.shape()))),
        )?;

        let prox = |label: &str| SyncArray::<i32>::scalar(ctx, Access::ReadOnly, label);
        let trap = |label: &str| SyncArray::<TrapBox>::scalar(ctx, Access::ReadOnly, label);

        tracing::info!(rows, cols, "field pipeline allocated");

        Ok(Self {
            shape,
            fields,
            pix,
            param: SyncArray::scalar(ctx, Access::ReadOnly, "param")?,
            prox_sel: [prox("prox_sel1")?, prox("prox_sel2")?, prox("prox_sel3")?],
            trap: [trap("trap1")?, trap("trap2")?, trap("trap3")?],
            freqs: SyncArray::scalar(ctx, Access::ReadOnly, "freqs")?,
            img_dims: SyncArray::scalar(ctx, Access::ReadOnly, "img_dims")?,
            ranges: SyncArray::scalar(ctx, Access::ReadWrite, "ranges")?,
        })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Rewrite the parameter block for the current frame.
    pub fn write_params(&mut self, param: FParam) {
        self.param[0] = param;
    }

    pub fn field(&self, slot: usize) -> &SyncArray<f32> {
        &self.fields[slot]
    }

    /// Host access to a field, e.g. to seed it before a combine.
    pub fn field_mut(&mut self, slot: usize) -> &mut SyncArray<f32> {
        &mut self.fields[slot]
    }

    /// Enqueue the kernels producing field `slot` from `config`.
    pub fn resolve_field(
        &mut self,
        dispatcher: &mut Dispatcher,
        slot: usize,
        config: &FieldConfig,
    ) -> ComputeResult<()> {
        match config.op {
            FieldOp::IterationCount => {
                dispatcher.apply_kernel("escape_iter", &[&self.fields[slot], &self.param])?;
            }
            FieldOp::Proximity { metric } => {
                self.prox_sel[slot][0] = metric.clamp(1, PROXIMITY_METRICS);
                dispatcher.apply_kernel(
                    "min_prox",
                    &[&self.fields[slot], &self.param, &self.prox_sel[slot]],
                )?;
            }
            FieldOp::OrbitTrap { trap, part } => {
                self.trap[slot][0] = trap;
                let kernel = match part {
                    TrapPart::Real => "orbit_trap_re",
                    TrapPart::Imag => "orbit_trap_im",
                };
                dispatcher.apply_kernel(
                    kernel,
                    &[&self.fields[slot], &self.param, &self.trap[slot]],
                )?;
            }
        }
        if config.log_scale {
            dispatcher.apply_kernel("apply_log", &[&self.fields[slot]])?;
        }
        Ok(())
    }

    /// field1 → pixel buffer through three sine colour maps.
    pub fn map_sines(&mut self, dispatcher: &mut Dispatcher, freqs: [f32; 3]) -> ComputeResult<()> {
        let [f1, f2, f3] = freqs;
        self.freqs[0] = Freqs { f1, f2, f3 };
        dispatcher.apply_kernel("map_sines", &[&self.fields[0], &self.pix, &self.freqs])
    }

    /// field1/field2 → pixel buffer by sampling `image`.  The image gets its
    /// own read-only device buffer sized to its dimensions.
    pub fn map_img(&mut self, dispatcher: &mut Dispatcher, image: &MapImage) -> ComputeResult<()> {
        let mut img = SyncArray::new(
            dispatcher.context(),
            Shape::grid(image.height, image.width),
            Access::ReadOnly,
            "map_image",
        )?;
        img.assign(&image.pixels[..img.len()]);
        self.img_dims[0] = ImDims {
            w: image.width as i32,
            h: image.height as i32,
        };
        dispatcher.apply_kernel(
            "map_img",
            &[
                &self.fields[0],
                &self.fields[1],
                &img,
                &self.pix,
                &self.img_dims,
            ],
        )
    }

    /// field1/field2/field3 → R/G/B.  With `normalize`, each channel is
    /// rescaled by its own min/max over the grid first.
    pub fn fields_to_rgb(&mut self, dispatcher: &mut Dispatcher, normalize: bool) -> ComputeResult<()> {
        let [f1, f2, f3] = &self.fields;
        if !normalize {
            return dispatcher.apply_kernel("pack", &[f1, f2, f3, &self.pix]);
        }
        self.ranges[0] = ChannelRange::empty();
        dispatcher.apply_kernel("field_range", &[f1, f2, f3, &self.ranges])?;
        dispatcher.apply_kernel("pack_norm", &[f1, f2, f3, &self.pix, &self.ranges])
    }

    /// Run the combine step for `mode` against the current fields.
    pub fn combine(
        &mut self,
        dispatcher: &mut Dispatcher,
        mode: &CombineMode,
        images: &dyn ImageSource,
    ) -> ComputeResult<FrameStatus> {
        match mode {
            CombineMode::SingleField { freqs } => self.map_sines(dispatcher, *freqs)?,
            CombineMode::DualField { image } => {
                let Some(path) = image else {
                    tracing::warn!("dual-field mode has no map image selected");
                    return Ok(FrameStatus::ImageUnavailable);
                };
                // Decoded on every frame the mode is active.
                let decoded = match images.load(path) {
                    Ok(decoded) => decoded,
                    Err(err) if err.is_recoverable() => {
                        tracing::warn!("skipping image map: {err}");
                        return Ok(FrameStatus::ImageUnavailable);
                    }
                    Err(err) => return Err(err),
                };
                if decoded.is_empty() {
                    tracing::warn!("skipping image map: `{}` is empty", path.display());
                    return Ok(FrameStatus::ImageUnavailable);
                }
                // Too large for one device binding: skip like a decode failure.
                match self.map_img(dispatcher, &decoded) {
                    Err(err @ ComputeError::Allocation { .. }) => {
                        tracing::warn!("skipping image map: {err}");
                        return Ok(FrameStatus::ImageUnavailable);
                    }
                    other => other?,
                }
            }
            CombineMode::TriField { normalize } => self.fields_to_rgb(dispatcher, *normalize)?,
        }
        Ok(FrameStatus::Dispatched)
    }

    /// Enqueue one full frame.  Never blocks.
    pub fn run(
        &mut self,
        dispatcher: &mut Dispatcher,
        request: &FrameRequest<'_>,
        images: &dyn ImageSource,
    ) -> ComputeResult<FrameStatus> {
        if !request.compute {
            return Ok(FrameStatus::Idle);
        }
        self.write_params(request.param);
        for (slot, config) in request
            .fields
            .iter()
            .enumerate()
            .take(request.mode.fields_used())
        {
            self.resolve_field(dispatcher, slot, config)?;
        }
        self.combine(dispatcher, request.mode, images)
    }

    /// Read the pixel buffer back.  Call after the dispatcher has joined.
    pub fn pixels(&mut self, ctx: &GpuContext) -> ComputeResult<&[Pixel]> {
        self.pix.read_back(ctx)
    }

    /// Read a field back.  Call after the dispatcher has joined.
    pub fn read_field(&mut self, ctx: &GpuContext, slot: usize) -> ComputeResult<&[f32]> {
        self.fields[slot].read_back(ctx)
    }
}

/// Every array must be a grid equal to `expected`.
pub fn check_grid<'a>(
    expected: Shape,
    arrays: impl IntoIterator<Item = (&'a str, Shape)>,
) -> ComputeResult<()> {
    for (label, shape) in arrays {
        if shape != expected {
            return Err(ComputeError::ShapeMismatch {
                label: label.to_string(),
                expected: expected.to_string(),
                found: shape.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_consume_leading_slots() {
        assert_eq!(CombineMode::default().fields_used(), 1);
        assert_eq!(CombineMode::DualField { image: None }.fields_used(), 2);
        assert_eq!(CombineMode::TriField { normalize: true }.fields_used(), 3);
    }

    #[test]
    fn field_op_combo_index_round_trips() {
        for i in 0..FieldOp::LABELS.len() {
            assert_eq!(FieldOp::from_kind_index(i).kind_index(), i);
        }
        assert_eq!(FieldOp::from_kind_index(99), FieldOp::IterationCount);
        assert_eq!(FieldOp::from_kind_index(1).label(), "Proximity");
    }

    #[test]
    fn grid_check_names_the_offender() {
        let grid = Shape::grid(600, 800);
        assert!(check_grid(grid, [("field1", grid), ("pix", grid)]).is_ok());

        let err = check_grid(grid, [("field1", grid), ("pix", Shape::grid(800, 600))])
            .unwrap_err();
        match err {
            ComputeError::ShapeMismatch { label, expected, found } => {
                assert_eq!(label, "pix");
                assert_eq!(expected, "600x800 grid");
                assert_eq!(found, "800x600 grid");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(check_grid(grid, [("param", Shape::Scalar)]).is_err());
    }

    #[test]
    fn empty_map_images_are_rejected() {
        let img = MapImage {
            width: 0,
            height: 4,
            pixels: Vec::new(),
        };
        assert!(img.is_empty());
        let short = MapImage {
            width: 2,
            height: 2,
            pixels: vec![Pixel::rgb(1, 2, 3); 3],
        };
        assert!(short.is_empty());
        let overflowing = MapImage {
            width: usize::MAX,
            height: 2,
            pixels: vec![Pixel::rgb(1, 2, 3); 4],
        };
        assert_eq!(overflowing.pixel_count(), None);
        assert!(overflowing.is_empty());
    }

    #[test]
    fn field_config_serde_defaults_log_scale() {
        let cfg: FieldConfig =
            serde_json::from_str(r#"{"op":{"Proximity":{"metric":3}}}"#).unwrap();
        assert_eq!(cfg.op, FieldOp::Proximity { metric: 3 });
        assert!(!cfg.log_scale);
    }
}
