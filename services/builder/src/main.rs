//! kiln - machine image builder
//!
//! Launches a temporary instance, provisions it, captures an image and
//! removes everything else it created.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use kiln_builder::config::{Backend, Config, LogFormat};
use kiln_builder::steps::{AssumeReachable, Reachability, TcpProbe};
use kiln_builder::{BuildConfig, BuildError, Builder, ConfigError, ConsoleUi, OnError};
use kiln_cloud::{Cloud, PasswordDecryptor, SimulatedCloud, SimulatedDecryptor, SimulationSettings};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about = "Bake machine images from a build template")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a build.
    Build(BuildArgs),

    /// Check a build template without touching the cloud.
    Validate {
        /// Path to the TOML build template.
        template: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct BuildArgs {
    /// Path to the TOML build template.
    template: PathBuf,

    /// Run against the in-memory cloud regardless of KILN_BACKEND.
    #[arg(long)]
    simulate: bool,

    /// What to do with created resources when the build fails.
    #[arg(long, value_enum, default_value_t = OnError::Cleanup)]
    on_error: OnError,

    /// Write the artifact as JSON to this path.
    #[arg(long)]
    manifest: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(&config);

    let result = match cli.command {
        Commands::Build(args) => build(&config, args).await,
        Commands::Validate { template } => validate(&config, &template),
    };
    if let Err(e) = result {
        print_error(&e);
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(config: &Config) {
    // Prefer RUST_LOG, fall back to KILN_LOG_LEVEL.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

fn load_template(config: &Config, path: &Path) -> Result<BuildConfig> {
    let mut template = BuildConfig::load(path)?;
    template.apply_env(config);
    template.prepare()?;
    Ok(template)
}

fn validate(config: &Config, path: &Path) -> Result<()> {
    let template = load_template(config, path)?;
    print_success(&format!(
        "{} is valid ({} image `{}`)",
        path.display(),
        template.image.image_type(),
        template.image.name
    ));
    Ok(())
}

async fn build(config: &Config, args: BuildArgs) -> Result<()> {
    let template = load_template(config, &args.template)?;
    let backend = if args.simulate {
        Backend::Simulated
    } else {
        config.backend
    };

    let (cloud, decryptor, probe) = match backend {
        Backend::Simulated => {
            let sim = Arc::new(SimulatedCloud::new(SimulationSettings::default()));
            let decryptor: Arc<dyn PasswordDecryptor> = Arc::new(SimulatedDecryptor);
            // A simulated instance has no network presence unless the
            // template points the communicator at a real host.
            let probe: Arc<dyn Reachability> = match &template.run.communicator.host {
                Some(_) => Arc::new(TcpProbe),
                None => Arc::new(AssumeReachable),
            };
            (Cloud::from_single(sim), decryptor, probe)
        }
    };
    info!(?backend, template = %args.template.display(), "configuration loaded");

    let ui = Arc::new(ConsoleUi::new(template.name.clone()));
    let builder = Builder::new(template, cloud, decryptor, ui)
        .probe(probe)
        .on_error(args.on_error);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling build");
            let _ = cancel_tx.send(true);
        }
    });

    let artifact = builder.run(cancel_rx).await?;
    print_success(&artifact.to_string());

    if let Some(path) = &args.manifest {
        let json = serde_json::to_string_pretty(&artifact)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write manifest {}", path.display()))?;
        print_info(&format!("Manifest written to {}", path.display()));
    }
    Ok(())
}

fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(build_err) = err.downcast_ref::<BuildError>() {
        match build_err {
            BuildError::Cancelled => {
                eprintln!("\n{}", "Hint: The build was interrupted; created resources were cleaned up unless --on-error=abort was given.".yellow());
            }
            BuildError::Step { step, .. } => {
                eprintln!(
                    "\n{}",
                    format!("Hint: Re-run with --on-error=abort to inspect what `{step}` left behind.")
                        .yellow()
                );
            }
        }
    } else if err.downcast_ref::<ConfigError>().is_some() {
        eprintln!(
            "\n{}",
            "Hint: Run `kiln validate <template>` to list every problem.".yellow()
        );
    }
}

fn print_success(message: &str) {
    println!("{} {}", "Success:".green().bold(), message);
}

fn print_info(message: &str) {
    println!("{} {}", "Info:".blue().bold(), message);
}
