use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info};
use session_keeper::configuration::config::Config;
use session_keeper::session_management::is_valid_session_id;
use session_keeper::storage::build_handler;
use session_keeper::GcOutcome;

#[derive(Parser)]
#[command(name = "session-keeper")]
#[command(version)]
#[command(about = "Inspect and maintain stored server-side sessions")]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "SESSION_KEEPER_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Remove sessions idle for longer than the maximum lifetime
    Gc {
        /// Defaults to `sess_lifetime`
        #[arg(long)]
        max_lifetime: Option<u64>,
    },
    /// Print the stored record of a session
    Show { id: String },
    /// Remove a stored session
    Destroy { id: String },
}

fn main() -> ExitCode {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    let args = Args::parse();

    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration from file: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Configuration imported successfully");

    let handler = match build_handler(&config) {
        Ok(handler) => handler,
        Err(e) => {
            error!("Unable to set up session storage: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if !handler.open(&config.session.save_path, &config.session.cookie_name) {
        error!("Session storage could not be opened");
        return ExitCode::FAILURE;
    }

    let status = match args.command {
        Command::Gc { max_lifetime } => {
            let max_lifetime = max_lifetime.unwrap_or(config.session.sess_lifetime);
            let outcome = handler.gc(max_lifetime);
            println!("gc (max lifetime {}s): {}", max_lifetime, outcome);
            if outcome == GcOutcome::Failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Command::Show { id } if !is_valid_session_id(&id) => {
            error!("Not a valid session identifier: {}", id);
            ExitCode::FAILURE
        }
        Command::Show { id } => {
            let blob = handler.read(&id);
            if blob.is_empty() {
                println!("No stored session {}", id);
            } else {
                match serde_json::from_str::<serde_json::Value>(&blob)
                    .and_then(|record| serde_json::to_string_pretty(&record))
                {
                    Ok(pretty) => println!("{}", pretty),
                    Err(e) => {
                        error!("Stored session {} is not valid JSON: {}", id, e);
                        println!("{}", blob);
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Command::Destroy { id } if !is_valid_session_id(&id) => {
            error!("Not a valid session identifier: {}", id);
            ExitCode::FAILURE
        }
        Command::Destroy { id } => {
            if handler.destroy(&id) {
                println!("Destroyed session {}", id);
                ExitCode::SUCCESS
            } else {
                error!("Session {} could not be destroyed", id);
                ExitCode::FAILURE
            }
        }
    };
    handler.close();
    status
}
