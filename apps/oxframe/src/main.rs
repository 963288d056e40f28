use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use log::{debug, info};
use oxframe_resolver::{BatchReport, Config};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "oxframe")]
#[command(
    about = "Resolve build output directories from framework config files",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve the given config files
    Resolve {
        /// Config files to resolve
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        config: Config,
    },
    /// Find and resolve every framework config file in a project
    Scan(Config),
}

fn main() -> Result<()> {
    env_logger::init();

    // stdio is blocked by LineWriter, use a BufWriter to reduce syscalls.
    // See https://github.com/rust-lang/rust/issues/60673
    let mut stdout = BufWriter::new(std::io::stdout());

    let cli = Cli::parse();
    debug!("Parsed CLI arguments: {:?}", cli.command);

    let start = Instant::now();

    let (report, cfg) = match cli.command {
        Commands::Resolve { files, mut config } => {
            config.initialize()?;
            info!("Resolving {} config files (phase: {})", files.len(), config.phase);
            (oxframe_resolver::resolve_batch(&files, &config), config)
        }
        Commands::Scan(mut config) => {
            config.initialize()?;
            info!("Scanning {:?} (phase: {})", config.root, config.phase);
            (oxframe_resolver::scan_project(&config)?, config)
        }
    };

    let elapsed_ms = start.elapsed().as_millis();
    if cfg.json {
        oxframe_resolver::print_json(&mut stdout, &report)?;
    } else {
        oxframe_resolver::print_report(&mut stdout, &report)?;
        print_footer(&mut stdout, &report, elapsed_ms)?;
    }
    stdout.flush()?;

    if report.has_failures() {
        // Non-zero exit to fail CI
        std::process::exit(1);
    }
    Ok(())
}

fn print_footer<W: Write>(writer: &mut W, report: &BatchReport, elapsed_ms: u128) -> Result<()> {
    writeln!(
        writer,
        "\n{} Finished in {}ms on {} files (using {} threads).",
        "●".bright_blue(),
        elapsed_ms.to_string().cyan(),
        report.outcomes.len().to_string().cyan(),
        rayon::current_num_threads().to_string().cyan()
    )?;
    Ok(())
}
