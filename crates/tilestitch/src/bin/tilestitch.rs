//! `tilestitch --request job.json [--output-dir DIR] [--report report.json]`
//!
//! Exit status: 0 on success, 1 when the job fails, 2 when the request cannot be read.
//! `TILESTITCH_LOG` overrides `--log-level`.

use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;
use std::process::ExitCode;
use tilestitch::{StitchReport, StitchRequest};

#[derive(Parser, Debug)]
#[command(name = "tilestitch", version, about = "Register and stitch overlapping image tiles")]
struct Cli {
    /// JSON request with `tiles`, `pattern` and optional `options`.
    #[arg(long)]
    request: PathBuf,
    /// Override `options.output_dir`.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Write a JSON report with the summary or the structured error.
    #[arg(long)]
    report: Option<PathBuf>,
    /// Do not write mosaic files.
    #[arg(long)]
    dry_run: bool,
    #[arg(long, default_value = "info", value_parser = parse_level)]
    log_level: LevelFilter,
    /// Emit JSON logs through `tracing` (needs the `tracing` feature).
    #[arg(long)]
    json_logs: bool,
}

fn parse_level(s: &str) -> Result<LevelFilter, String> {
    s.parse()
        .map_err(|_| format!("unknown log level {s:?}, expected off/error/warn/info/debug/trace"))
}

fn init_logging(cli: &Cli) {
    #[cfg(feature = "tracing")]
    if cli.json_logs {
        tilestitch::core::init_tracing(true);
        return;
    }
    if cli.json_logs {
        eprintln!("--json-logs needs the `tracing` feature, using plain logs");
    }
    let _ = tilestitch::core::init_with_level(cli.log_level);
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let mut request = match StitchRequest::load_json(&cli.request) {
        Ok(request) => request,
        Err(err) => {
            eprintln!("failed to read request {}: {err}", cli.request.display());
            return ExitCode::from(2);
        }
    };
    if let Some(dir) = &cli.output_dir {
        request.options.output_dir = Some(dir.clone());
    }
    if cli.dry_run {
        request.options.write_output = false;
    }

    let mut report = StitchReport::new(Some(cli.request.display().to_string()));
    let code = match request.run() {
        Ok(result) => {
            let s = &result.summary;
            println!(
                "stitched {} tiles into {}x{} px ({} low-confidence)",
                s.tiles.len(),
                s.canvas_width,
                s.canvas_height,
                s.low_confidence_tiles.len()
            );
            for channel in &s.channels {
                if let Some(path) = &channel.path {
                    println!("{}", path.display());
                }
            }
            report.set_result(result.summary);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            report.set_error(err);
            ExitCode::from(1)
        }
    };

    if let Some(path) = &cli.report {
        if let Err(err) = report.write_json(path) {
            eprintln!("failed to write report {}: {err}", path.display());
            return ExitCode::from(1);
        }
    }
    code
}
