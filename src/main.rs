//! Purpose: `ringfile` CLI entry point.
//! Role: Binary crate root; parses switches, installs logging, dispatches one mode.
//! Invariants: Exit code is 0 on success and 1 on any argument or engine error.
//! Invariants: Records go to stdout; diagnostics and errors go to stderr only.
use std::io;
use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueHint};
use tracing_subscriber::EnvFilter;

mod command;
mod size_arg;

use command::{Command, Mode};

#[derive(Parser, Debug)]
#[command(
    name = "ringfile",
    version,
    about = "Append to, read, and inspect fixed-size circular record files",
    long_about = None,
    after_help = r#"EXAMPLES
  $ printf 'a\nb\n' | ringfile --append --size 1m events.ring
  $ ringfile events.ring                # print every retained record
  $ ringfile --stat events.ring         # capacity and usage

Once the file is full, the oldest records are discarded to make room."#
)]
struct Cli {
    #[arg(short, long, action = ArgAction::SetTrue, help = "Log engine activity to stderr")]
    verbose: bool,
    #[arg(
        short,
        long,
        value_parser = size_arg::parse_size,
        help = "Total file size when creating in append mode (units: b, k, m, g)"
    )]
    size: Option<u64>,
    #[arg(short = 'S', long, conflicts_with = "append", help = "Report capacity and usage")]
    stat: bool,
    #[arg(short, long, help = "Append each stdin line as a record")]
    append: bool,
    #[arg(long, requires = "stat", help = "Emit the stat report as JSON")]
    json: bool,
    #[arg(value_hint = ValueHint::FilePath, help = "Ring file path")]
    file: PathBuf,
}

impl Cli {
    fn into_command(self) -> Command {
        let mode = if self.stat {
            Mode::Stat
        } else if self.append {
            Mode::Append
        } else {
            Mode::Read
        };
        Command {
            mode,
            path: self.file,
            size: self.size,
            json: self.json,
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            std::process::exit(if err.use_stderr() { 1 } else { 0 });
        }
    };
    init_tracing(cli.verbose);

    let command = cli.into_command();
    let stdin = io::stdin();
    let stdout = io::stdout();
    let result = command::run(&command, &mut stdin.lock(), &mut stdout.lock());
    if let Err(err) = result {
        eprintln!("ringfile: {err}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}
