#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use output::{CliError, OutputMode};
use restamp_core::timing;
use std::env;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "restamp: rewrite authorship and dates across a whole commit history",
    long_about = None
)]
struct Cli {
    /// Enable debug logging for restamp.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit command timing report to stderr.
    #[arg(long, global = true)]
    timing: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Read settings from this TOML file (on top of the user config).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    const fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Rewrite",
        about = "Rewrite identities and dates, then move every reference",
        long_about = "Rewrite author/committer identities and timestamps across the whole history \
                      reachable from local branches and tags, recompute every commit id, and move \
                      all references in one atomic batch.",
        after_help = "EXAMPLES:\n    # Replace every identity and randomize dates into 2023\n    restamp rewrite --author \"Ada <ada@example.com>\" --date-mode randomize \\\n        --since 2023-01-01T00:00:00Z --until 2024-01-01T00:00:00Z\n\n    # Several repositories, reproducibly, without writing\n    restamp rewrite --repo a --repo b --seed 42 --dry-run\n\n    # Rename master to main and push the result\n    restamp rewrite --rename-branch master=main --push origin"
    )]
    Rewrite(cmd::rewrite::RewriteArgs),

    #[command(
        next_help_heading = "Inspect",
        about = "Summarize a repository",
        after_help = "EXAMPLES:\n    restamp info\n    restamp info --repo ../other --json"
    )]
    Info(cmd::info::InfoArgs),

    #[command(
        next_help_heading = "Inspect",
        about = "Check that every commit is later than its parents",
        after_help = "EXAMPLES:\n    restamp verify\n    restamp verify --json"
    )]
    Verify(cmd::verify::VerifyArgs),

    #[command(
        next_help_heading = "Remote",
        about = "Add a remote or change its URL",
        after_help = "EXAMPLES:\n    restamp remote --name origin --url git@example.com:me/repo.git"
    )]
    Remote(cmd::remote::RemoteArgs),

    #[command(
        next_help_heading = "Remote",
        about = "Force-push every local branch and tag",
        long_about = "Force-push every local branch and tag. Use after a rewrite whose push failed.",
        after_help = "EXAMPLES:\n    restamp push --remote origin"
    )]
    Push(cmd::push::PushArgs),

    #[command(
        next_help_heading = "Shell",
        about = "Generate shell completion scripts",
        after_help = "EXAMPLES:\n    restamp completions bash\n    restamp completions zsh"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("RESTAMP_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "restamp=debug,info"
        } else {
            "restamp=info,warn"
        })
    });

    let format = env::var("RESTAMP_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let timing_enabled = cli.timing || timing::timing_enabled_from_env();
    timing::set_timing_enabled(timing_enabled);
    timing::clear_timings();

    let cwd = env::current_dir()?;
    let output = cli.output_mode();
    let config = cli.config.as_deref();
    debug!(?output, config = ?config, "restamp starting");

    let command_result = match cli.command {
        Commands::Rewrite(ref args) => timing::timed("cmd.rewrite", || {
            cmd::rewrite::run_rewrite(args, config, output, &cwd)
        }),
        Commands::Info(ref args) => {
            timing::timed("cmd.info", || cmd::info::run_info(args, output, &cwd))
        }
        Commands::Verify(ref args) => {
            timing::timed("cmd.verify", || cmd::verify::run_verify(args, output, &cwd))
        }
        Commands::Remote(ref args) => {
            timing::timed("cmd.remote", || cmd::remote::run_remote(args, output, &cwd))
        }
        Commands::Push(ref args) => {
            timing::timed("cmd.push", || cmd::push::run_push(args, output, &cwd))
        }
        Commands::Completions(ref args) => timing::timed("cmd.completions", || {
            let mut command = Cli::command();
            cmd::completions::run_completions(args.shell, &mut command)
        }),
    };

    if timing_enabled {
        let report = timing::collect_report();
        if report.is_empty() {
            eprintln!("timing report: no samples recorded");
        } else {
            eprintln!("timing report:");
            eprintln!("{}", report.display_table());
            eprintln!("timing report (json):");
            eprintln!("{}", serde_json::to_string_pretty(&report.to_json())?);
        }
    }

    if let Err(err) = command_result {
        output::render_error(output, &CliError::from(&err))?;
        std::process::exit(1);
    }
    Ok(())
}
