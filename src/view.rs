// ============================================================================
// VIEWPORT MODEL - complex-plane center/extent, pan and zoom
// ============================================================================

use serde::{Deserialize, Serialize};

/// Each wheel tick divides (zoom in) or multiplies (zoom out) both extents.
pub const ZOOM_RATIO: f64 = 1.1;

/// Bounds of the log10 MAXITER slider.
pub const MAX_ITER_LOG_MIN: f32 = 0.0;
pub const MAX_ITER_LOG_MAX: f32 = 4.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FractalMode {
    #[default]
    Mandelbrot,
    Julia,
}

impl FractalMode {
    /// Default (center, half-extent) for this mode.
    pub fn default_view(self) -> (Complex, Complex) {
        match self {
            FractalMode::Mandelbrot => (Complex::new(-0.75, 0.0), Complex::new(1.25, 1.25)),
            FractalMode::Julia => (Complex::new(0.0, 0.0), Complex::new(2.0, 2.0)),
        }
    }
}

/// (re_min, re_max, im_min, im_max).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewRect {
    pub re_min: f64,
    pub re_max: f64,
    pub im_min: f64,
    pub im_max: f64,
}

impl ViewRect {
    pub fn to_f32(self) -> [f32; 4] {
        [
            self.re_min as f32,
            self.re_max as f32,
            self.im_min as f32,
            self.im_max as f32,
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub center: Complex,
    /// Half-widths of the view along each axis.
    pub extent: Complex,
    pub mode: FractalMode,
    #[serde(default = "default_zoom_ratio")]
    pub zoom_ratio: f64,
}

fn default_zoom_ratio() -> f64 {
    ZOOM_RATIO
}

/// A zoom ratio must be finite and greater than one.
pub fn valid_zoom_ratio(ratio: f64) -> bool {
    ratio > 1.0 && ratio.is_finite()
}

impl Viewport {
    pub fn new(mode: FractalMode) -> Self {
        let (center, extent) = mode.default_view();
        Self {
            center,
            extent,
            mode,
            zoom_ratio: ZOOM_RATIO,
        }
    }

    /// Invalid ratios fall back to [`ZOOM_RATIO`].
    pub fn with_zoom_ratio(mut self, ratio: f64) -> Self {
        self.zoom_ratio = if valid_zoom_ratio(ratio) { ratio } else { ZOOM_RATIO };
        self
    }

    /// Repair a viewport restored from disk: an invalid zoom ratio falls back
    /// to the default and a non-finite or collapsed view resets to the mode's
    /// default view.
    pub fn sanitized(self) -> Self {
        let mut vp = self.with_zoom_ratio(self.zoom_ratio);
        let finite = [vp.center.re, vp.center.im, vp.extent.re, vp.extent.im]
            .iter()
            .all(|v| v.is_finite());
        if !finite || vp.extent.re <= 0.0 || vp.extent.im <= 0.0 {
            tracing::warn!("restored viewport is degenerate; resetting view");
            vp.reset();
        }
        vp
    }

    pub fn reset(&mut self) {
        let (center, extent) = self.mode.default_view();
        self.center = center;
        self.extent = extent;
    }

    /// Switch fractal mode; always resets to that mode's default view.
    pub fn set_mode(&mut self, mode: FractalMode) {
        self.mode = mode;
        self.reset();
    }

    /// Shift the center by `extent * displacement` per axis, where the
    /// displacement is a signed fraction of the half-extent.  Content follows
    /// the pointer, so the center moves against the displacement.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.center.re -= self.extent.re * dx;
        self.center.im -= self.extent.im * dy;
    }

    /// Pan from a pointer delta in surface pixels.
    pub fn drag(&mut self, delta_px: [f32; 2], surface_px: [f32; 2]) {
        if surface_px[0] <= 0.0 || surface_px[1] <= 0.0 {
            return;
        }
        let dx = 2.0 * delta_px[0] as f64 / surface_px[0] as f64;
        let dy = 2.0 * delta_px[1] as f64 / surface_px[1] as f64;
        self.pan(dx, dy);
    }

    /// Center-anchored zoom.  Positive ticks zoom in.
    pub fn zoom(&mut self, ticks: i32) {
        let ratio = if valid_zoom_ratio(self.zoom_ratio) {
            self.zoom_ratio
        } else {
            ZOOM_RATIO
        };
        let factor = ratio.powi(ticks.saturating_abs());
        if !factor.is_finite() {
            return;
        }
        if ticks > 0 {
            self.extent.re /= factor;
            self.extent.im /= factor;
        } else if ticks < 0 {
            self.extent.re *= factor;
            self.extent.im *= factor;
        }
    }

    pub fn view_rect(&self) -> ViewRect {
        ViewRect {
            re_min: self.center.re - self.extent.re,
            re_max: self.center.re + self.extent.re,
            im_min: self.center.im - self.extent.im,
            im_max: self.center.im + self.extent.im,
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(FractalMode::Mandelbrot)
    }
}

/// MAXITER from the log10 slider: `round(10^p)`, `p` clamped to [0, 4].
pub fn max_iter_from_log10(p: f32) -> i32 {
    let p = p.clamp(MAX_ITER_LOG_MIN, MAX_ITER_LOG_MAX) as f64;
    (10f64.powf(p).round() as i32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    fn close(a: Complex, b: Complex) -> bool {
        (a.re - b.re).abs() < EPS && (a.im - b.im).abs() < EPS
    }

    #[test]
    fn default_mandelbrot_rect() {
        let r = Viewport::new(FractalMode::Mandelbrot).view_rect();
        assert_eq!(r.re_min, -2.0);
        assert_eq!(r.re_max, 0.5);
        assert_eq!(r.im_min, -1.25);
        assert_eq!(r.im_max, 1.25);
    }

    #[test]
    fn zoom_in_then_out_restores_extent() {
        let mut vp = Viewport::default();
        let before = vp.extent;
        for _ in 0..7 {
            vp.zoom(1);
        }
        assert!(vp.extent.re < before.re);
        for _ in 0..7 {
            vp.zoom(-1);
        }
        assert!(close(vp.extent, before));
        vp.zoom(5);
        vp.zoom(-5);
        assert!(close(vp.extent, before));
    }

    #[test]
    fn zoom_keeps_center_fixed() {
        let mut vp = Viewport::default();
        vp.pan(0.3, -0.2);
        let center = vp.center;
        vp.zoom(3);
        vp.zoom(-1);
        assert_eq!(vp.center, center);
    }

    #[test]
    fn zero_pan_is_identity() {
        let mut vp = Viewport::new(FractalMode::Julia);
        vp.zoom(2);
        let center = vp.center;
        vp.pan(0.0, 0.0);
        vp.drag([0.0, 0.0], [800.0, 600.0]);
        assert_eq!(vp.center, center);
    }

    #[test]
    fn pan_scales_with_extent() {
        let mut vp = Viewport::default();
        vp.pan(0.5, 1.0);
        assert!((vp.center.re - (-0.75 - 1.25 * 0.5)).abs() < EPS);
        assert!((vp.center.im - (-1.25)).abs() < EPS);
    }

    #[test]
    fn drag_uses_surface_fraction() {
        let mut vp = Viewport::default();
        vp.drag([400.0, 0.0], [800.0, 600.0]);
        assert!((vp.center.re - (-0.75 - 1.25)).abs() < EPS);
        assert_eq!(vp.center.im, 0.0);
    }

    #[test]
    fn mode_switch_resets_view() {
        let mut vp = Viewport::default();
        vp.pan(0.7, 0.4);
        vp.zoom(9);
        vp.set_mode(FractalMode::Julia);
        assert_eq!(vp.center, Complex::new(0.0, 0.0));
        assert_eq!(vp.extent, Complex::new(2.0, 2.0));
        vp.zoom(-3);
        vp.set_mode(FractalMode::Mandelbrot);
        assert_eq!(vp.center, Complex::new(-0.75, 0.0));
        assert_eq!(vp.extent, Complex::new(1.25, 1.25));
    }

    #[test]
    fn extreme_tick_counts_leave_view_finite() {
        let mut vp = Viewport::default();
        vp.zoom(i32::MIN);
        vp.zoom(i32::MAX);
        assert_eq!(vp.extent, Complex::new(1.25, 1.25));
    }

    #[test]
    fn invalid_zoom_ratios_fall_back() {
        for bad in [0.0, -2.0, 1.0, f64::NAN, f64::INFINITY] {
            assert!(!valid_zoom_ratio(bad));
            let vp = Viewport::default().with_zoom_ratio(bad);
            assert_eq!(vp.zoom_ratio, ZOOM_RATIO);
        }
        let mut vp = Viewport::default();
        vp.zoom_ratio = 0.0;
        vp.zoom(1);
        assert!((vp.extent.re - 1.25 / ZOOM_RATIO).abs() < EPS);
    }

    #[test]
    fn sanitized_repairs_restored_viewport() {
        let restored: Viewport = serde_json::from_str(
            r#"{"center":{"re":0.1,"im":0.2},"extent":{"re":0.5,"im":0.5},"mode":"Julia","zoom_ratio":-3.0}"#,
        )
        .unwrap();
        let vp = restored.sanitized();
        assert_eq!(vp.zoom_ratio, ZOOM_RATIO);
        assert_eq!(vp.center, Complex::new(0.1, 0.2));

        let mut collapsed = Viewport::new(FractalMode::Julia);
        collapsed.extent.re = 0.0;
        let vp = collapsed.sanitized();
        assert_eq!(vp.extent, Complex::new(2.0, 2.0));
    }

    #[test]
    fn max_iter_slider_bounds() {
        assert_eq!(max_iter_from_log10(0.0), 1);
        assert_eq!(max_iter_from_log10(2.0), 100);
        assert_eq!(max_iter_from_log10(4.0), 10_000);
        assert_eq!(max_iter_from_log10(-1.0), 1);
        assert_eq!(max_iter_from_log10(7.0), 10_000);
    }
}
