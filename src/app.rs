// ============================================================================
// CLImFractal APP - eframe shell around the explorer
// ============================================================================
//
// Frame loop:
//   1. if the previous update dispatched a frame, join + read back + upload
//   2. draw the viewport (collect drag / wheel) and the controls panel
//   3. enqueue the next frame; the GPU works while egui paints

use eframe::egui;

use crate::error::ComputeError;
use crate::explorer::{Explorer, FrameInput};
use crate::gpu::TrapBox;
use crate::io;
use crate::pipeline::{CombineMode, FieldConfig, FieldOp, FrameStatus, PROXIMITY_METRICS, TrapPart};
use crate::settings::AppSettings;
use crate::view::FractalMode;

/// Panel state that is not part of the explorer's controls.
struct PanelState {
    function_edit: String,
    compile_error: Option<String>,
    /// Last sine-map frequencies, restored when returning to single mode.
    freqs: [f32; 3],
    normalize: bool,
    message: Option<String>,
    fps: f32,
}

pub struct FractalApp {
    settings: AppSettings,
    explorer: Option<Explorer>,
    startup_error: Option<String>,
    panel: PanelState,
    texture: Option<egui::TextureHandle>,
    /// A frame was enqueued and has not been displayed yet.
    frame_pending: bool,
    first_frame: bool,
}

impl FractalApp {
    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let settings = AppSettings::load();
        let (explorer, startup_error) = match Explorer::new(&settings) {
            Ok(explorer) => (Some(explorer), None),
            Err(e) => {
                tracing::error!("compute setup failed: {e}");
                (None, Some(e.to_string()))
            }
        };
        let function_edit = explorer
            .as_ref()
            .map(|e| e.function().to_string())
            .unwrap_or_default();
        Self {
            settings,
            explorer,
            startup_error,
            panel: PanelState {
                function_edit,
                compile_error: None,
                freqs: [1.0, 2.0, 3.0],
                normalize: false,
                message: None,
                fps: 0.0,
            },
            texture: None,
            frame_pending: false,
            first_frame: true,
        }
    }
}

impl eframe::App for FractalApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let Some(explorer) = self.explorer.as_mut() else {
            egui::CentralPanel::default().show(ctx, |ui| {
                ui.heading("GPU compute unavailable");
                if let Some(err) = &self.startup_error {
                    ui.label(err);
                }
                if let Some(path) = crate::logger::log_path() {
                    ui.label(format!("See {}", path.display()));
                }
            });
            return;
        };

        let dt = ctx.input(|i| i.unstable_dt);
        if dt > 0.0 {
            self.panel.fps = 0.9 * self.panel.fps + 0.1 / dt;
        }

        if self.frame_pending || self.first_frame {
            upload_pixels(ctx, &mut self.texture, explorer);
            self.frame_pending = false;
            self.first_frame = false;
        }

        egui::SidePanel::right("controls")
            .resizable(true)
            .default_width(340.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    controls_panel(ui, explorer, &mut self.panel, &mut self.settings);
                });
            });

        let mut input = FrameInput::default();
        egui::CentralPanel::default().show(ctx, |ui| {
            input = viewport_panel(ui, explorer, self.texture.as_ref(), self.panel.fps);
        });

        match explorer.frame(&input) {
            Ok(status) => {
                self.frame_pending = status != FrameStatus::Idle;
            }
            Err(e) => {
                tracing::error!("frame dispatch failed: {e}");
                explorer.controls.compute = false;
                self.panel.message = Some(format!("Compute stopped: {e}"));
            }
        }
        if explorer.controls.compute {
            ctx.request_repaint();
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        if let Some(explorer) = self.explorer.as_mut() {
            explorer.join();
        }
        self.settings.save();
    }
}

/// Join, read the pixel buffer back and copy it into the display texture.
fn upload_pixels(
    ctx: &egui::Context,
    texture: &mut Option<egui::TextureHandle>,
    explorer: &mut Explorer,
) {
    let (rows, cols) = explorer.grid();
    let pixels = match explorer.pixels() {
        Ok(pixels) => pixels,
        Err(e) => {
            tracing::error!("pixel readback failed: {e}");
            return;
        }
    };
    let image = egui::ColorImage::from_rgba_unmultiplied([cols, rows], bytemuck::cast_slice(pixels));
    match texture {
        Some(tex) => tex.set(image, egui::TextureOptions::NEAREST),
        None => {
            *texture = Some(ctx.load_texture("fractal_view", image, egui::TextureOptions::NEAREST));
        }
    }
}

// ============================================================================
// VIEWPORT
// ============================================================================

fn viewport_panel(
    ui: &mut egui::Ui,
    explorer: &mut Explorer,
    texture: Option<&egui::TextureHandle>,
    fps: f32,
) -> FrameInput {
    let vp = explorer.viewport;
    ui.horizontal(|ui| {
        ui.label(format!("FPS {fps:.1}"));
        ui.separator();
        ui.label(format!("Center: ({}) + ({})i", vp.center.re, vp.center.im));
        ui.separator();
        ui.label(format!("Box dims: ({}) x ({})", 2.0 * vp.extent.re, 2.0 * vp.extent.im));
        if ui.button("Reset view").clicked() {
            explorer.reset_view();
        }
    });
    if explorer.last_status() == FrameStatus::ImageUnavailable {
        ui.colored_label(egui::Color32::YELLOW, "Map image unavailable");
    }

    let mut input = FrameInput::default();
    let Some(tex) = texture else { return input };

    let (rows, cols) = explorer.grid();
    let avail = ui.available_size();
    let scale = (avail.x / cols as f32).min(avail.y / rows as f32).max(0.05);
    let size = egui::vec2(cols as f32 * scale, rows as f32 * scale);
    let response = ui.add(egui::Image::new((tex.id(), size)).sense(egui::Sense::drag()));

    input.surface = response.rect.size().into();
    if response.dragged_by(egui::PointerButton::Secondary) {
        input.drag_delta = Some(response.drag_delta().into());
    }
    if response.hovered() {
        let scroll = ui.input(|i| i.scroll_delta.y);
        input.wheel_ticks = if scroll > 0.0 {
            1
        } else if scroll < 0.0 {
            -1
        } else {
            0
        };
    }
    input
}

// ============================================================================
// CONTROLS
// ============================================================================

fn controls_panel(
    ui: &mut egui::Ui,
    explorer: &mut Explorer,
    panel: &mut PanelState,
    settings: &mut AppSettings,
) {
    let label = if explorer.controls.compute {
        "Stop compute"
    } else {
        "Start compute"
    };
    if ui.button(label).clicked() {
        explorer.controls.compute = !explorer.controls.compute;
    }
    if let Some(msg) = &panel.message {
        ui.label(msg);
    }
    ui.label("Pan: right click and drag in the viewport");
    ui.label("Zoom: mouse wheel");
    ui.separator();

    function_editor(ui, explorer, panel);
    ui.separator();

    ui.label("General params:");
    let mut mandel = explorer.viewport.mode == FractalMode::Mandelbrot;
    if ui.checkbox(&mut mandel, "Compute mandelbrot (else Julia)").changed() {
        explorer.set_fractal_mode(if mandel {
            FractalMode::Mandelbrot
        } else {
            FractalMode::Julia
        });
    }
    if !mandel {
        ui.label("Julia constant:");
        ui.add(egui::Slider::new(&mut explorer.controls.julia_c[0], -2.0..=2.0).text("CRE"));
        ui.add(egui::Slider::new(&mut explorer.controls.julia_c[1], -2.0..=2.0).text("CIM"));
    }
    ui.add(egui::Slider::new(&mut explorer.controls.max_iter_log10, 0.0..=4.0).text("log10 MAXITER"));
    ui.label(format!("MAXITER: {}", explorer.controls.max_iter()));
    ui.separator();

    mode_selector(ui, explorer, panel);
    ui.separator();
    mode_panel(ui, explorer, panel, settings);
    ui.separator();

    file_actions(ui, explorer, panel);
}

fn function_editor(ui: &mut egui::Ui, explorer: &mut Explorer, panel: &mut PanelState) {
    ui.horizontal(|ui| {
        if ui.button("Recompile").clicked() {
            let text = panel.function_edit.clone();
            recompile(explorer, panel, &text);
        }
        if ui.button("Reset").clicked() {
            recompile(explorer, panel, "");
            panel.function_edit = explorer.function().to_string();
        }
    });
    ui.label("Recursed function:");
    ui.add(
        egui::TextEdit::multiline(&mut panel.function_edit)
            .code_editor()
            .desired_rows(6)
            .desired_width(f32::INFINITY),
    );
    if let Some(err) = &panel.compile_error {
        ui.colored_label(egui::Color32::LIGHT_RED, err);
    }
}

fn recompile(explorer: &mut Explorer, panel: &mut PanelState, text: &str) {
    panel.compile_error = match explorer.recompile(text) {
        Ok(()) => None,
        Err(ComputeError::Compile(diag)) => Some(diag),
        Err(e) => Some(e.to_string()),
    };
}

fn mode_selector(ui: &mut egui::Ui, explorer: &mut Explorer, panel: &mut PanelState) {
    ui.label("Mode:");
    let current = explorer.controls.mode.fields_used();
    let mut choice = current;
    ui.radio_value(&mut choice, 1, "Single field");
    ui.radio_value(&mut choice, 2, "Dual field - Image map");
    ui.radio_value(&mut choice, 3, "Tri field - RGB");
    if choice == current {
        return;
    }
    match &explorer.controls.mode {
        CombineMode::SingleField { freqs } => panel.freqs = *freqs,
        CombineMode::TriField { normalize } => panel.normalize = *normalize,
        CombineMode::DualField { .. } => {}
    }
    explorer.controls.mode = match choice {
        1 => CombineMode::SingleField { freqs: panel.freqs },
        2 => CombineMode::DualField {
            image: explorer.map_images().first().cloned(),
        },
        _ => CombineMode::TriField {
            normalize: panel.normalize,
        },
    };
}

fn mode_panel(
    ui: &mut egui::Ui,
    explorer: &mut Explorer,
    panel: &mut PanelState,
    settings: &mut AppSettings,
) {
    let names: &[&str] = match explorer.controls.mode {
        CombineMode::SingleField { .. } => &["Field"],
        CombineMode::DualField { .. } => &["U field", "V field"],
        CombineMode::TriField { .. } => &["R field", "G field", "B field"],
    };
    for (slot, name) in names.iter().enumerate() {
        field_editor(ui, name, &mut explorer.controls.fields[slot]);
    }

    let mut pick_dir = false;
    let map_images = explorer.map_images().to_vec();
    match &mut explorer.controls.mode {
        CombineMode::SingleField { freqs } => {
            ui.label("Cmap frequencies:");
            for (i, f) in freqs.iter_mut().enumerate() {
                ui.add(
                    egui::Slider::new(f, 0.01..=100.0)
                        .logarithmic(true)
                        .text(format!("f{}", i + 1)),
                );
            }
            panel.freqs = *freqs;
        }
        CombineMode::DualField { image } => {
            let selected = image
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string());
            egui::ComboBox::from_label("Mimg")
                .selected_text(selected)
                .show_ui(ui, |ui| {
                    for path in &map_images {
                        ui.selectable_value(image, Some(path.clone()), path.display().to_string());
                    }
                });
            ui.horizontal(|ui| {
                ui.label(format!("Folder: {}", settings.map_image_dir.display()));
                pick_dir = ui.button("Browse…").clicked();
            });
        }
        CombineMode::TriField { normalize } => {
            ui.checkbox(normalize, "Normalise colors");
            panel.normalize = *normalize;
        }
    }

    if pick_dir && let Some(dir) = rfd::FileDialog::new().pick_folder() {
        settings.map_image_dir = dir;
        explorer.rescan_map_images(&settings.map_image_dir);
        settings.save();
    }
}

fn field_editor(ui: &mut egui::Ui, name: &str, config: &mut FieldConfig) {
    ui.push_id(name, |ui| {
        let mut kind = config.op.kind_index();
        egui::ComboBox::from_label(name)
            .selected_text(config.op.label())
            .show_ui(ui, |ui| {
                for (i, label) in FieldOp::LABELS.iter().enumerate() {
                    ui.selectable_value(&mut kind, i, *label);
                }
            });
        if kind != config.op.kind_index() {
            config.op = FieldOp::from_kind_index(kind);
        }

        match &mut config.op {
            FieldOp::IterationCount => {}
            FieldOp::Proximity { metric } => {
                ui.add(egui::Slider::new(metric, 1..=PROXIMITY_METRICS).text("PROXTYPE"));
            }
            FieldOp::OrbitTrap { trap, part } => {
                let mut real = *part == TrapPart::Real;
                if ui.checkbox(&mut real, "IS REAL").changed() {
                    *part = if real { TrapPart::Real } else { TrapPart::Imag };
                }
                trap_sliders(ui, trap);
            }
        }
        ui.checkbox(&mut config.log_scale, "Log scale");
    });
}

fn trap_sliders(ui: &mut egui::Ui, trap: &mut TrapBox) {
    ui.add(egui::Slider::new(&mut trap.bot, -2.0..=2.0).text("trap bot"));
    ui.add(egui::Slider::new(&mut trap.top, -2.0..=2.0).text("trap top"));
    ui.add(egui::Slider::new(&mut trap.left, -2.0..=2.0).text("trap left"));
    ui.add(egui::Slider::new(&mut trap.right, -2.0..=2.0).text("trap right"));
}

fn file_actions(ui: &mut egui::Ui, explorer: &mut Explorer, panel: &mut PanelState) {
    ui.horizontal(|ui| {
        if ui.button("Save preset…").clicked()
            && let Some(path) = rfd::FileDialog::new()
                .add_filter("Preset", &["json"])
                .save_file()
        {
            panel.message = Some(match explorer.save_preset(&path) {
                Ok(()) => format!("Saved {}", path.display()),
                Err(e) => e.to_string(),
            });
        }
        if ui.button("Load preset…").clicked()
            && let Some(path) = rfd::FileDialog::new()
                .add_filter("Preset", &["json"])
                .pick_file()
        {
            let result = explorer.load_preset(&path);
            panel.function_edit = explorer.function().to_string();
            panel.message = Some(match result {
                Ok(()) => format!("Loaded {}", path.display()),
                Err(e) => e.to_string(),
            });
        }
        if ui.button("Save PNG…").clicked()
            && let Some(path) = rfd::FileDialog::new()
                .add_filter("PNG", &["png"])
                .save_file()
        {
            let (rows, cols) = explorer.grid();
            let result = explorer
                .pixels()
                .and_then(|pixels| io::save_png(&path, cols, rows, pixels));
            panel.message = Some(match result {
                Ok(()) => format!("Wrote {}", path.display()),
                Err(e) => e.to_string(),
            });
        }
    });
}
