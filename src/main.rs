use std::{
    fs::File,
    io::{BufReader, Write, stdout},
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};
use clap::{Parser, Subcommand};
use log::{LevelFilter, info};
use log4rs::{
    append::console::{ConsoleAppender, Target},
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};
use race_events::{
    SimBinParser, StdFormatEncoder, metadata::TraceMetadata, tracing::BinaryTraceOutput,
};
use racegrind_core::knobs::Knobs;

#[derive(Parser)]
struct Cli {
    #[arg(long, default_value = "info", global = true)]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs a scripted program and writes its binary trace
    Run {
        program: PathBuf,

        /// JSON file with instrumentation knobs
        #[arg(long)]
        knobs: Option<PathBuf>,

        #[arg(long)]
        no_ignore_prefetch: bool,

        #[arg(long)]
        no_ignore_sync_internals: bool,

        #[arg(long)]
        print_routine_names: bool,

        /// The name tables are written next to it with a `.json` extension
        #[arg(short, long, default_value = "trace.bin")]
        output: PathBuf,
    },

    /// Prints a binary trace in human readable form
    Print {
        trace: PathBuf,

        /// Name tables of the trace. Defaults to the trace path with a
        /// `.json` extension, if that file exists.
        #[arg(long)]
        names: Option<PathBuf>,
    },
}

fn init_logging(level: LevelFilter) -> Result<(), Error> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{h({l:<5})} {t} - {m}{n}")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))?;
    log4rs::init_config(config)?;

    Ok(())
}

fn main() -> Result<(), Error> {
    let args = Cli::parse();
    init_logging(args.log_level)?;

    match args.command {
        Command::Run {
            program,
            knobs,
            no_ignore_prefetch,
            no_ignore_sync_internals,
            print_routine_names,
            output,
        } => {
            let mut knobs = match knobs {
                Some(path) => Knobs::from_file(path)?,
                None => Knobs::default(),
            };
            knobs.ignore_prefetch &= !no_ignore_prefetch;
            knobs.ignore_sync_internals &= !no_ignore_sync_internals;
            knobs.print_routine_names |= print_routine_names;

            let trace = racegrind::racegrind(program, knobs)?;
            save_trace(trace, &output)?;
            info!("Trace written to {}", output.display());
            Ok(())
        }
        Command::Print { trace, names } => print_trace(&trace, names, stdout().lock()),
    }
}

fn print_trace<W: Write>(trace: &Path, names: Option<PathBuf>, output: W) -> Result<(), Error> {
    let names = names.or_else(|| {
        let sibling = trace.with_extension("json");
        sibling.exists().then_some(sibling)
    });
    let mut encoder = match names {
        Some(path) => {
            let file = File::open(&path)
                .with_context(|| format!("Could not open name tables {}", path.display()))?;
            StdFormatEncoder::with_names(TraceMetadata::from_json(BufReader::new(file))?)
        }
        None => StdFormatEncoder::new(),
    };

    race_events::convert(
        &mut SimBinParser::new(),
        &mut encoder,
        BufReader::new(File::open(trace)?),
        output,
    )
}

fn save_trace(output: BinaryTraceOutput, path: &Path) -> Result<(), Error> {
    std::fs::write(path, output.trace).map_err(Error::from)?;
    std::fs::write(path.with_extension("json"), output.metadata.to_json()?).map_err(Error::from)
}
