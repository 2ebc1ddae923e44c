use clap::{Parser, Subcommand, ValueEnum};

/// Harvests per-track play counts for a catalog of albums.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run migrations, the worker pool and the scheduler until interrupted (default).
    Run,
    /// Harvest and persist specific albums once, then exit.
    Harvest {
        /// Album ids, e.g. `4aawyAB9vmqN3uQ7FjRGTy`.
        #[arg(required = true)]
        album_ids: Vec<String>,
    },
    /// Force a credential refresh and print the new expiries.
    Credentials,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable, compact output.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Pretty in debug builds, JSON in release builds.
fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}
