// ============================================================================
// CLImFractal CLI - headless single-frame render via command-line arguments
// ============================================================================
//
// Usage examples:
//   climfractal --output mandel.png
//   climfractal -o julia.png --julia -0.8,0.156 --max-iter-log10 2.5
//   climfractal -o rgb.png --mode tri --field iters --field prox:3 --field trap-re --normalize
//   climfractal -o warped.png --function warp.wgsl --preset saved.json
//
// No window is opened in CLI mode.  One frame is computed, joined, read back
// and written as PNG.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::error::{ComputeError, ComputeResult};
use crate::explorer::{Explorer, FrameInput, read_function_file};
use crate::gpu::TrapBox;
use crate::io::save_png;
use crate::pipeline::{CombineMode, FIELD_SLOTS, FieldConfig, FieldOp, FrameStatus, TrapPart};
use crate::settings::AppSettings;
use crate::view::FractalMode;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// CLImFractal headless renderer.
#[derive(Parser, Debug)]
#[command(
    name = "climfractal",
    about = "Render one fractal frame to PNG without opening the GUI",
    long_about = "Compute one frame on the GPU and write it as PNG.\n\n\
                  Example:\n  \
                  climfractal --output mandel.png\n  \
                  climfractal -o rgb.png --mode tri --field iters --field prox:3 --field trap-im"
)]
pub struct CliArgs {
    /// Output PNG path.
    #[arg(short, long, value_name = "FILE.png")]
    pub output: PathBuf,

    /// Load viewport, controls and function from a saved preset first.
    /// Explicit flags below override it.
    #[arg(short, long, value_name = "PRESET.json")]
    pub preset: Option<PathBuf>,

    /// Combine mode: single, dual, tri.
    #[arg(short, long, value_name = "MODE")]
    pub mode: Option<String>,

    /// Field operation per slot, in order (iters, prox[:1-7], trap-re, trap-im).
    /// Append `+log` for log scaling, e.g. `prox:2+log`.
    #[arg(short, long, value_name = "OP")]
    pub field: Vec<String>,

    /// Julia constant `re,im`.  Switches to Julia mode.
    #[arg(long, value_name = "RE,IM", allow_hyphen_values = true)]
    pub julia: Option<String>,

    /// log10 of the iteration cap (0–4).
    #[arg(long, value_name = "0-4")]
    pub max_iter_log10: Option<f32>,

    /// Map image for dual-field mode.
    #[arg(long, value_name = "IMAGE")]
    pub image: Option<PathBuf>,

    /// Normalize channels in tri-field mode.
    #[arg(long)]
    pub normalize: bool,

    /// File containing the recurrence `fn f(z: Complex, c: Complex) -> Complex`.
    #[arg(long, value_name = "FILE")]
    pub function: Option<PathBuf>,

    /// Grid size `ROWSxCOLS` (defaults to the saved settings).
    #[arg(long, value_name = "ROWSxCOLS")]
    pub size: Option<String>,

    /// Print timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Returns `true` when any CLI-mode flag is present in the real process arguments.
    /// Used by `main()` to route before creating an eframe window.
    pub fn is_cli_mode() -> bool {
        std::env::args().any(|a| a == "--output" || a == "-o" || a.starts_with("--output="))
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the headless render and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let start = Instant::now();
    match render(&args) {
        Ok(()) => {
            if args.verbose {
                println!(
                    "wrote {} in {:.1} ms",
                    args.output.display(),
                    start.elapsed().as_secs_f64() * 1000.0
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn render(args: &CliArgs) -> ComputeResult<()> {
    let mut settings = AppSettings::load();
    if let Some(size) = &args.size {
        let (rows, cols) = parse_size(size)?;
        settings.grid_rows = rows;
        settings.grid_cols = cols;
    }

    let mut explorer = Explorer::new(&settings)?;
    if let Some(path) = &args.preset {
        explorer.load_preset(path)?;
    }
    if let Some(path) = &args.function {
        let text = read_function_file(path)?;
        explorer.recompile(&text)?;
    }
    apply_overrides(&mut explorer, args)?;
    explorer.controls.compute = true;

    let status = explorer.frame(&FrameInput::default())?;
    if status == FrameStatus::ImageUnavailable {
        return Err(ComputeError::Decode {
            path: args.image.clone().unwrap_or_default(),
            reason: "map image unavailable".into(),
        });
    }
    let (rows, cols) = explorer.grid();
    let pixels = explorer.pixels()?;
    save_png(&args.output, cols, rows, pixels)
}

fn apply_overrides(explorer: &mut Explorer, args: &CliArgs) -> ComputeResult<()> {
    if let Some(julia) = &args.julia {
        explorer.controls.julia_c = parse_pair(julia)?;
        explorer.set_fractal_mode(FractalMode::Julia);
    }
    if let Some(p) = args.max_iter_log10 {
        explorer.controls.max_iter_log10 = p;
    }
    for (slot, spec) in args.field.iter().take(FIELD_SLOTS).enumerate() {
        explorer.controls.fields[slot] = parse_field(spec)?;
    }
    if let Some(mode) = &args.mode {
        explorer.controls.mode = match mode.to_lowercase().as_str() {
            "single" => CombineMode::default(),
            "dual" => CombineMode::DualField {
                image: args
                    .image
                    .clone()
                    .or_else(|| explorer.map_images().first().cloned()),
            },
            "tri" => CombineMode::TriField {
                normalize: args.normalize,
            },
            other => return Err(usage(format!("unknown mode '{other}'"))),
        };
    }
    match &mut explorer.controls.mode {
        CombineMode::DualField { image } if args.image.is_some() => {
            *image = args.image.clone();
        }
        CombineMode::TriField { normalize } => *normalize |= args.normalize,
        _ => {}
    }
    Ok(())
}

fn usage(msg: String) -> ComputeError {
    ComputeError::Usage(msg)
}

/// `iters`, `prox`, `prox:N`, `trap-re`, `trap-im`, each optionally `+log`.
pub fn parse_field(spec: &str) -> ComputeResult<FieldConfig> {
    let (op, log_scale) = match spec.strip_suffix("+log") {
        Some(op) => (op, true),
        None => (spec, false),
    };
    let op = match op.trim().to_lowercase().as_str() {
        "iters" => FieldOp::IterationCount,
        "prox" => FieldOp::Proximity { metric: 1 },
        "trap-re" => FieldOp::OrbitTrap {
            trap: TrapBox::default(),
            part: TrapPart::Real,
        },
        "trap-im" => FieldOp::OrbitTrap {
            trap: TrapBox::default(),
            part: TrapPart::Imag,
        },
        other => match other.strip_prefix("prox:").map(str::parse::<i32>) {
            Some(Ok(metric)) if (1..=7).contains(&metric) => FieldOp::Proximity { metric },
            _ => return Err(usage(format!("unknown field operation '{spec}'"))),
        },
    };
    Ok(FieldConfig { op, log_scale })
}

fn parse_pair(s: &str) -> ComputeResult<[f32; 2]> {
    let bad = || usage(format!("expected RE,IM but got '{s}'"));
    let (re, im) = s.split_once(',').ok_or_else(bad)?;
    let re = re.trim().parse().map_err(|_| bad())?;
    let im = im.trim().parse().map_err(|_| bad())?;
    Ok([re, im])
}

fn parse_size(s: &str) -> ComputeResult<(usize, usize)> {
    let bad = || usage(format!("expected ROWSxCOLS but got '{s}'"));
    let (rows, cols) = s.split_once(['x', 'X']).ok_or_else(bad)?;
    let rows: usize = rows.trim().parse().map_err(|_| bad())?;
    let cols: usize = cols.trim().parse().map_err(|_| bad())?;
    if rows == 0 || cols == 0 {
        return Err(bad());
    }
    Ok((rows, cols))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_specs_parse() {
        assert_eq!(parse_field("iters").unwrap().op, FieldOp::IterationCount);
        let prox = parse_field("prox:5+log").unwrap();
        assert_eq!(prox.op, FieldOp::Proximity { metric: 5 });
        assert!(prox.log_scale);
        assert!(matches!(
            parse_field("TRAP-RE").unwrap().op,
            FieldOp::OrbitTrap {
                part: TrapPart::Real,
                ..
            }
        ));
        assert!(parse_field("prox:9").is_err());
        assert!(matches!(parse_field("bogus"), Err(ComputeError::Usage(m)) if m.contains("bogus")));
    }

    #[test]
    fn pairs_and_sizes_parse() {
        assert_eq!(parse_pair("-0.8, 0.156").unwrap(), [-0.8, 0.156]);
        assert!(parse_pair("1.0").is_err());
        assert_eq!(parse_size("600x800").unwrap(), (600, 800));
        assert!(parse_size("0x10").is_err());
        assert!(matches!(parse_size("600"), Err(ComputeError::Usage(_))));
    }

    #[test]
    fn clap_accepts_repeated_fields() {
        let args = CliArgs::try_parse_from([
            "climfractal",
            "-o",
            "out.png",
            "--mode",
            "tri",
            "--field",
            "iters",
            "--field",
            "prox:2",
            "--julia",
            "-0.8,0.156",
        ])
        .unwrap();
        assert_eq!(args.field, ["iters", "prox:2"]);
        assert_eq!(args.julia.as_deref(), Some("-0.8,0.156"));
        assert_eq!(args.output, PathBuf::from("out.png"));
    }
}
