use clap::Parser;
use std::process::ExitCode;
use streamwatch::app::App;
use streamwatch::cli::{Args, Command};
use streamwatch::config::Config;
use streamwatch::logging::setup_logging;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Config comes before App::new() so startup logs are never silently dropped.
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&config, args.tracing);

    let command = args.command.unwrap_or(Command::Run);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        command = ?command,
        "starting streamwatch"
    );

    let with_database = !matches!(command, Command::Credentials);
    let app = match App::new(config, with_database).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = ?e, "Failed to initialize application");
            return ExitCode::FAILURE;
        }
    };

    match command {
        Command::Run => app.run().await,
        Command::Harvest { album_ids } => app.harvest(album_ids).await,
        Command::Credentials => app.refresh_credentials().await,
    }
}
