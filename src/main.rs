// ========================================================================================
//
//                      THE SERVICE ORCHESTRATOR: PCOSIGHT
//
// ========================================================================================
//
// This binary owns the process lifecycle. It parses arguments, initialises logging,
// loads the startup artifacts exactly once into an immutable `Predictor`, and then
// either serves HTTP or answers a single offline request.
//
// ### Lifecycle ###
//
// 1.  **Configuration:** A TOML file names the artifacts; command-line flags may
//     override the bind address. A missing or malformed configuration is fatal.
//
// 2.  **Initialisation:** Every artifact is loaded and cross-checked before the
//     listener opens. Any failure here terminates the process with a non-zero code;
//     the service never starts in a partially loaded state.
//
// 3.  **Serving:** The `Predictor` is shared read-only behind an `Arc`. Requests are
//     independent and stateless.
//
// 4.  **Teardown:** Ctrl-C stops accepting connections, lets in-flight requests
//     finish, and drops the `Predictor`.

use clap::{Args, Parser, Subcommand};
use pcosight::config::ServiceConfig;
use pcosight::record::ClinicalRecord;
use pcosight::server;
use pcosight::service::Predictor;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Instant;

// ========================================================================================
//                         COMMAND-LINE INTERFACE DEFINITION
// ========================================================================================

#[derive(Parser)]
#[command(
    name = "pcosight",
    version,
    about = "Serve PCOS screening predictions with local explanations."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArg {
    /// Path to the service configuration file (.toml)
    #[arg(long, default_value = "service.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the artifacts and serve the HTTP API
    Serve {
        #[command(flatten)]
        config: ConfigArg,

        /// Address to listen on, overriding the configuration file
        #[arg(long, value_name = "ADDR")]
        bind: Option<SocketAddr>,
    },

    /// Run a single record through the model and print the JSON response
    Predict {
        #[command(flatten)]
        config: ConfigArg,

        /// Path to a JSON file holding one clinical record
        record: PathBuf,

        /// Also print the local explanation
        #[arg(long)]
        explain: bool,
    },

    /// Load and cross-check every artifact, then exit
    Check {
        #[command(flatten)]
        config: ConfigArg,
    },
}

// ========================================================================================
//                           THE MAIN ORCHESTRATION LOGIC
// ========================================================================================

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Serve { config, bind } => serve_command(&config.config, bind),
        Commands::Predict {
            config,
            record,
            explain,
        } => predict_command(&config.config, &record, explain),
        Commands::Check { config } => check_command(&config.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_predictor(config: &ServiceConfig) -> Result<Predictor, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let predictor = Predictor::from_config(config)?;
    log::info!(
        "Artifacts loaded in {:.2?}",
        start.elapsed()
    );
    Ok(predictor)
}

fn serve_command(
    config_path: &Path,
    bind: Option<SocketAddr>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::load(config_path)?;
    let addr: SocketAddr = match bind {
        Some(addr) => addr,
        None => config.bind.parse()?,
    };

    let predictor = Arc::new(load_predictor(&config)?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(server::serve(predictor, addr, shutdown_signal()))?;
    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("Shutdown requested, draining in-flight requests"),
        Err(e) => log::error!("Could not listen for Ctrl-C, serving until killed: {e}"),
    }
}

fn predict_command(
    config_path: &Path,
    record_path: &Path,
    explain: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::load(config_path)?;
    let predictor = load_predictor(&config)?;

    let body = fs::read(record_path)?;
    let record = ClinicalRecord::from_slice(&body)?;

    let prediction = predictor.predict(&record)?;
    let mut output = serde_json::to_value(&prediction)?;
    if explain {
        let explanation = predictor.explain(&record)?;
        output["explanation"] = serde_json::to_value(&explanation.explanation)?;
    }
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn check_command(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::load(config_path)?;
    let predictor = load_predictor(&config)?;

    println!("All artifacts loaded. Model feature order:");
    for (i, name) in predictor.feature_names().iter().enumerate() {
        println!("  {:>2}. {name:?}", i + 1);
    }
    println!("Explanations report the top {} features.", predictor.top_k());
    Ok(())
}
