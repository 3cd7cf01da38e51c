use std::fs::File;
use std::io::{self, Write};
use std::process::ExitCode;

use clap::{error::ErrorKind, Parser};
use log::error;

use policing_detect::config::{load_config, CliArgs};
use policing_detect::driver::{run, DriverConfig};

fn main() -> ExitCode {
    let cli_args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) if e.kind() == ErrorKind::MissingRequiredArgument => {
            eprintln!("Missing parameter(s)");
            eprintln!("Usage: policing_detect <input file>");
            return ExitCode::from(255);
        }
        Err(e) => {
            e.print().ok();
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    let log_level = match cli_args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(log_level).init();

    let config = match load_config(&cli_args) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let driver_config = DriverConfig {
        capture_path: std::path::Path::new(&cli_args.capture_path),
        max_num_packets: config.max_num_packets,
        cutoffs: &config.cutoffs,
    };

    let mut stdout_handle;
    let mut file_handle;
    let out: &mut dyn Write = match &cli_args.output {
        Some(path) => match File::create(path) {
            Ok(file) => {
                file_handle = file;
                &mut file_handle
            }
            Err(e) => {
                error!("failed to create output file {path}: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => {
            stdout_handle = io::stdout();
            &mut stdout_handle
        }
    };

    match run(&driver_config, out) {
        Ok(rows) => {
            log::info!("wrote {rows} row(s)");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("detection failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}
