mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "jdwprelay", version, about = "Relay a JDWP debugging session through a hub")]
struct Cli {
    /// Output format for session events.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_attach_with_hub_list() {
        let cli = Cli::try_parse_from([
            "jdwprelay",
            "attach",
            "--id",
            "jvm-1",
            "--hub",
            "10.0.0.1:7800,10.0.0.2:7800",
            "--jvm",
            "127.0.0.1:5005",
        ])
        .expect("attach args should parse");

        match cli.command {
            Command::Attach(args) => {
                assert_eq!(args.relay.hub.len(), 2);
                assert!(args.peer.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn listen_requires_peer() {
        let err = Cli::try_parse_from([
            "jdwprelay",
            "listen",
            "--id",
            "ide",
            "--hub",
            "127.0.0.1:7800",
        ])
        .expect_err("missing --peer should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn rejects_zero_overtime() {
        let err = Cli::try_parse_from([
            "jdwprelay",
            "listen",
            "--id",
            "ide",
            "--hub",
            "127.0.0.1:7800",
            "--peer",
            "jvm-1",
            "--overtime",
            "0s",
        ])
        .expect_err("zero duration should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn global_format_after_subcommand() {
        let cli = Cli::try_parse_from(["jdwprelay", "hub", "0.0.0.0:7800", "--format", "json"])
            .expect("hub args should parse");
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        assert!(matches!(cli.command, Command::Hub(_)));
    }
}
