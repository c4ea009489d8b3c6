//! CLI entry point for the catalog ingestion tool.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Log level priority: RUST_LOG env var > quiet flag > verbose flag > info
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    match args.command {
        Command::Run(run) => {
            let client = run.remote.to_settings()?.build_client();
            let settings = run.to_settings();
            let engine = settings.build_engine(client)?;

            // Ctrl-c requests a graceful shutdown: in-flight skus finish,
            // nothing new is dequeued, locks release on exit.
            {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        engine.request_shutdown();
                    }
                });
            }

            info!(catalog = %settings.catalog_root.display(), dry_run = settings.dry_run, "starting");
            let report = engine.run(&settings.catalog_root).await?;
            print!("{}", report.render());

            if report.has_failures() {
                std::process::exit(report.exit_code());
            }
            Ok(())
        }
        Command::Health(health) => {
            let client = health.remote.to_settings()?.build_client();
            client.health_check().await?;
            info!("remote API reachable and credentials accepted");
            println!("ok");
            Ok(())
        }
    }
}
