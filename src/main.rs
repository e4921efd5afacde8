// GUI-subsystem binary on Windows in GUI mode; CLI mode re-attaches to the
// parent console so eprintln!/println! reach the terminal.
#![cfg_attr(target_os = "windows", windows_subsystem = "windows")]

use climfractal::app::FractalApp;
use climfractal::{cli, logger};
use eframe::egui;

fn main() -> Result<(), eframe::Error> {
    #[cfg(target_os = "windows")]
    if cli::CliArgs::is_cli_mode() {
        unsafe extern "system" {
            fn AttachConsole(dwProcessId: u32) -> i32;
        }
        const ATTACH_PARENT_PROCESS: u32 = 0xFFFF_FFFF;
        unsafe {
            AttachConsole(ATTACH_PARENT_PROCESS);
        }
    }

    // Initialize session log (overwrites previous session log)
    logger::init();

    // -- CLI / headless mode ---------------------------------------------
    if cli::CliArgs::is_cli_mode() {
        use clap::Parser;
        let args = cli::CliArgs::parse();
        let code = cli::run(args);
        std::process::exit(if code == std::process::ExitCode::SUCCESS {
            0
        } else {
            1
        });
    }

    // -- GUI mode -----------------------------------------------------
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 760.0])
            .with_title("CLImFractal"),
        ..Default::default()
    };

    eframe::run_native(
        "CLImFractal",
        options,
        Box::new(|cc| Box::new(FractalApp::new(cc))),
    )
}
