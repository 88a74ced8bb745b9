use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use switchyard::{
    HttpServer, ServerRouter,
    adapters::builtin_modules,
    config::{
        SAMPLE_CONFIG, ServerConfigValidator,
        loader::{load_config, load_config_unchecked},
    },
    tracing_setup::{self, LogFormat},
    utils::GracefulShutdown,
};
use tracing::Instrument;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,

    /// Log filter, e.g. "info" or "switchyard=debug"
    #[clap(long, default_value = "info")]
    log_level: String,

    /// Human-readable logs instead of JSON
    #[clap(long)]
    pretty: bool,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let config_path = match args.command {
        Some(Commands::Validate { config }) => return validate_config_command(&config).await,
        Some(Commands::Init { config }) => return init_config_command(&config).await,
        Some(Commands::Serve { config }) => config,
        None => args.config,
    };

    let format = if args.pretty {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    };
    tracing_setup::init_tracing(&args.log_level, format)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    serve(&config_path)
        .instrument(tracing_setup::component_span("server"))
        .await
}

async fn serve(config_path: &str) -> Result<()> {
    tracing::info!("Loading configuration from {config_path}");
    let config = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    let registry = builtin_modules::registry();
    tracing::info!(modules = ?registry.identifiers(), "Module registry ready");
    let router = config
        .build_router(Arc::new(registry))
        .context("Failed to build routes")?;
    for line in router.describe() {
        tracing::debug!(entry = %line, "Route registered");
    }

    let graceful_shutdown = Arc::new(GracefulShutdown::with_timeout(config.shutdown_timeout()?));
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        signal_handler_shutdown.run_signal_handler().await;
    });

    let server = ServerRouter::bind(
        config.listen_addr()?,
        Arc::new(router),
        config.server_settings()?,
    )
    .await?
    .with_shutdown(graceful_shutdown);

    tracing::info!(address = %server.local_addr(), "switchyard started");
    server.run().await.context("Server error")?;
    tracing::info!("Graceful shutdown completed");
    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config_unchecked(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            let registry = builtin_modules::registry();
            let unknown: Vec<&str> = config
                .mounts
                .iter()
                .flat_map(|mount| mount.routes.iter())
                .map(|route| route.module.as_str())
                .filter(|module| !registry.contains(module))
                .collect();

            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Mounts: {}", config.mounts.len());
            println!(
                "   • Routes: {}",
                config.mounts.iter().map(|m| m.routes.len()).sum::<usize>()
            );
            println!("   • Shutdown Timeout: {}", config.shutdown_timeout);
            if !unknown.is_empty() {
                println!();
                println!("⚠️  Modules not built in (requests to them will fail): {unknown:?}");
            }
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Patterns and prefixes start with '/'");
            println!("   • Wildcards ('*' or '*name') only as the last segment");
            println!("   • Verify listen address format (e.g., '127.0.0.1:3000')");
            println!("   • Durations use humantime units (e.g., '30s', '5m')");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    tokio::fs::write(path, SAMPLE_CONFIG)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'switchyard serve --config {config_path}' to start the server");
    Ok(())
}
