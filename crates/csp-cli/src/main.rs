// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! csp CLI - demos for the csp-rt channel runtime.

mod commands;
mod output;

use std::env;
use std::process;

use tracing_subscriber::EnvFilter;

const DEFAULT_ROUNDS: u64 = 1_000;
const DEFAULT_ITEMS: u64 = 100;
const DEFAULT_SELECTS: u64 = 10_000;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    PingPong { rounds: u64 },
    Pipeline { items: u64 },
    Fairness { rounds: u64 },
    Policies,
    Help,
    Version,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let Some(command) = args.get(1) else {
        return Ok(Command::Help);
    };
    let count = |default: u64| -> Result<u64, String> {
        match args.get(2) {
            None => Ok(default),
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| format!("expected a positive number, got '{}'", raw)),
        }
    };

    match command.as_str() {
        "pingpong" => Ok(Command::PingPong {
            rounds: count(DEFAULT_ROUNDS)?,
        }),
        "pipeline" => Ok(Command::Pipeline {
            items: count(DEFAULT_ITEMS)?,
        }),
        "fairness" => Ok(Command::Fairness {
            rounds: count(DEFAULT_SELECTS)?,
        }),
        "policies" => Ok(Command::Policies),
        "help" | "--help" | "-h" => Ok(Command::Help),
        "version" | "--version" | "-V" => Ok(Command::Version),
        other => Err(format!("unknown command: {}", other)),
    }
}

/// Log filter from `CSP_LOG`, then `RUST_LOG`, else warnings only.
fn init_tracing() {
    let filter = env::var("CSP_LOG")
        .ok()
        .and_then(|f| EnvFilter::try_new(f).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    output::init();
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(msg) => {
            eprintln!("{}: {}", output::error_label(), msg);
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    let result = match command {
        Command::PingPong { rounds } => commands::pingpong::cmd_pingpong(rounds),
        Command::Pipeline { items } => commands::pipeline::cmd_pipeline(items),
        Command::Fairness { rounds } => commands::fairness::cmd_fairness(rounds),
        Command::Policies => commands::policies::cmd_policies(),
        Command::Help => {
            print_usage();
            Ok(())
        }
        Command::Version => {
            println!("csp {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(msg) = result {
        eprintln!("{}: {}", output::error_label(), msg);
        process::exit(1);
    }
}

fn print_usage() {
    println!("csp {} - channel runtime demos", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: csp <command> [count]");
    println!();
    println!("Commands:");
    println!("  pingpong [rounds]  Bounce a value between two pool tasks");
    println!("  pipeline [items]   Producer, squarer and blocking sink");
    println!("  fairness [rounds]  Select over two always-ready channels");
    println!("  policies           Show what each overflow policy keeps");
    println!("  help               Show this help");
    println!("  version            Show version");
    println!();
    println!("Environment:");
    println!("  CSP_WORKERS, CSP_STACK_SIZE, CSP_WORK_STEALING  pool settings");
    println!("  CSP_LOG                                        log filter");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("csp")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn no_arguments_shows_help() {
        assert_eq!(parse_args(&args(&[])), Ok(Command::Help));
    }

    #[test]
    fn counts_default_and_parse() {
        assert_eq!(
            parse_args(&args(&["pingpong"])),
            Ok(Command::PingPong {
                rounds: DEFAULT_ROUNDS
            })
        );
        assert_eq!(
            parse_args(&args(&["pipeline", "7"])),
            Ok(Command::Pipeline { items: 7 })
        );
        assert_eq!(
            parse_args(&args(&["fairness", "250"])),
            Ok(Command::Fairness { rounds: 250 })
        );
    }

    #[test]
    fn rejects_bad_counts_and_commands() {
        assert!(parse_args(&args(&["pipeline", "0"])).is_err());
        assert!(parse_args(&args(&["pingpong", "lots"])).is_err());
        let err = parse_args(&args(&["frobnicate"])).unwrap_err();
        assert!(err.contains("frobnicate"));
    }

    #[test]
    fn aliases() {
        assert_eq!(parse_args(&args(&["-V"])), Ok(Command::Version));
        assert_eq!(parse_args(&args(&["--help"])), Ok(Command::Help));
        assert_eq!(parse_args(&args(&["policies"])), Ok(Command::Policies));
    }
}
