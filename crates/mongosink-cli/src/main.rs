//! 🚀 mongosink-cli — the front door. Loads config, sets up logging, runs the sink,
//! prints the receipt. Like a manager, it delegates everything else. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 🍃 Push an NDJSON file through a buffered, deduplicating document sink.
#[derive(Debug, Parser)]
#[command(name = "mongosink", version, about)]
struct Args {
    /// Path to the TOML config. A missing file means environment variables only.
    #[arg(default_value = "mongosink.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(None) => {}
        Ok(Some(reason)) => {
            error!("🛑 The run was stopped: {reason}");
            std::process::exit(1);
        }
        Err(err) => {
            report(&err);
            std::process::exit(1);
        }
    }
}

/// 🎯 Load, run, print. `Ok(Some(reason))` means the pipeline asked to stop.
async fn run(args: Args) -> Result<Option<String>> {
    // 🔒 Check the file exists before we get too emotionally attached
    let config_file = args
        .config
        .try_exists()
        .with_context(|| {
            format!(
                "💀 Couldn't tell whether the config file exists. If it's a relative path, \
                 try an absolute one. Was checking here: '{}'",
                args.config.display()
            )
        })?
        .then_some(args.config.as_path());

    let app_config = mongosink::app_config::load_config(config_file)
        .context("💀 Couldn't load the configuration. Check the file and the MONGOSINK_*/MONGODB_* variables.")?;

    let summary = mongosink::run(app_config).await?;
    println!("{}", mongosink::progress::render_summary(&summary));
    Ok(summary.stop_reason)
}

/// 🧅 Peel the error onion, one layer at a time, and leave a hint if it smells like disk trouble.
fn report(err: &anyhow::Error) {
    error!("💀 error: {err}");
    let mut smells_like_the_filesystem = false;
    for cause in err.chain().skip(1) {
        error!("⚠️  cause: {cause}");
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            smells_like_the_filesystem |= matches!(
                io.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            );
        }
    }

    if smells_like_the_filesystem {
        error!(
            "🔧 hint: a file or directory wasn't there or wasn't ours to touch. \
             Double-check `input.file_name`, the `[store.File] root_dir`, and their permissions. \
             Relative paths resolve from where you ran the command, not from the config file. ☕"
        );
    }
}
