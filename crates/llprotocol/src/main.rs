mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;
use llprotocol_frame::{FrameConfig, ScanMode, DEFAULT_MAX_FRAME_LENGTH};
use llprotocol_message::ConnectionConfig;

use crate::cmd::Command;
use crate::exit::{CliError, CliResult, USAGE};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "llprotocol", version, about = "Multiplexed message channels over TCP and Unix sockets")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Maximum payload bytes per frame. Both peers must agree.
    #[arg(
        long,
        value_name = "BYTES",
        env = "LLPROTOCOL_MAX_FRAME_LENGTH",
        default_value_t = DEFAULT_MAX_FRAME_LENGTH,
        global = true
    )]
    max_frame_length: usize,

    /// Probe for delimiters at intervals instead of at every byte.
    #[arg(long, global = true)]
    skip_scan: bool,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn connection_config(&self) -> CliResult<ConnectionConfig> {
        let scan_mode = if self.skip_scan {
            ScanMode::Skip
        } else {
            ScanMode::EveryByte
        };
        let frame = FrameConfig::default()
            .with_max_frame_length(self.max_frame_length)
            .with_scan_mode(scan_mode);
        frame
            .validate()
            .map_err(|err| CliError::new(USAGE, format!("invalid frame settings: {err}")))?;
        Ok(ConnectionConfig::default().with_frame(frame))
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cli
        .connection_config()
        .and_then(|config| cmd::run(cli.command, format, config));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
