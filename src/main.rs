//! CLI entry point for the modrepo tool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use modrepo_broker::auth::SessionCookieJar;
use modrepo_broker::broker::{Broker, Ticket};
use modrepo_broker::config::{BrokerConfig, FileConfig, load_default_file_config, load_file_config};
use modrepo_broker::credentials::{Credentials, StaticCredentials};
use modrepo_broker::registry::PassthroughGameRegistry;
use modrepo_broker::request::{DownloadGrant, RequestOptions};
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command};

const API_KEY_ENV: &str = "MODREPO_API_KEY";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(command = ?args.command, "CLI arguments parsed");

    let file_config = load_config(&args)?;
    let config = broker_config(&args, &file_config);

    let cookies_path = args.cookies.clone().or(file_config.cookies_file.clone());
    let cookie_jar = match &cookies_path {
        Some(path) => Some(Arc::new(SessionCookieJar::from_file(path).with_context(
            || format!("Cannot load cookie file '{}'", path.display()),
        )?)),
        None => None,
    };

    let api_key = args
        .api_key
        .clone()
        .or_else(|| std::env::var(API_KEY_ENV).ok())
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty());
    if api_key.is_none() && args.command != Command::ClearCache {
        bail!("No API key: pass --api-key or set {API_KEY_ENV}");
    }
    let credentials = Credentials::new(
        api_key.unwrap_or_default(),
        args.user_id,
        args.tier.into(),
    );

    let mut builder = Broker::builder()
        .config(config)
        .registry(Arc::new(PassthroughGameRegistry))
        .credentials(Arc::new(StaticCredentials::new(credentials)));
    if let Some(jar) = cookie_jar {
        builder = builder.cookie_jar(jar);
    }
    if let Some(dir) = args.cache_dir.clone().or(file_config.cache_dir.clone()) {
        builder = builder.cache_dir(dir);
    }
    let broker = builder.build()?;

    if args.command == Command::ClearCache {
        broker.clear_cache()?;
        info!("Cache cleared");
        return Ok(());
    }

    let options = match &args.submodule {
        Some(submodule) => RequestOptions::new().with_submodule(submodule.clone()),
        None => RequestOptions::new(),
    };
    let tickets = submit(&broker, &args.command, args.user_id, &options)?;
    info!(requests = tickets.len(), "Requests queued");

    run(tickets).await
}

fn load_config(args: &Args) -> Result<FileConfig> {
    if let Some(path) = &args.config {
        return Ok(load_file_config(path)?);
    }
    let loaded = load_default_file_config()?;
    if let Some(path) = loaded.path.as_deref().filter(|_| loaded.config.is_some()) {
        debug!(path = %path.display(), "Using config file");
    }
    Ok(loaded.config.unwrap_or_default())
}

/// Defaults, then the config file, then CLI flags.
fn broker_config(args: &Args, file: &FileConfig) -> BrokerConfig {
    let mut config = BrokerConfig::default();
    file.apply_to(&mut config);
    if let Some(max) = args.max_concurrent {
        config.max_concurrent = usize::try_from(max).unwrap_or(usize::MAX);
    }
    if let Some(secs) = args.timeout_secs {
        config.request_timeout = Duration::from_secs(secs);
    }
    if let Some(url) = &args.base_url {
        config.api_base_url.clone_from(url);
    }
    config
}

fn submit(
    broker: &Broker,
    command: &Command,
    user_id: u64,
    options: &RequestOptions,
) -> Result<Vec<Ticket>> {
    let opts = || options.clone();
    let tickets = match command {
        Command::Description { game, mod_ids } => mod_ids
            .iter()
            .map(|id| broker.request_description(game, *id, opts()))
            .collect::<Result<Vec<_>, _>>()?,
        Command::ModInfo { game, mod_ids } => mod_ids
            .iter()
            .map(|id| broker.request_mod_info(game, *id, opts()))
            .collect::<Result<Vec<_>, _>>()?,
        Command::Updated { game, period } => {
            vec![broker.request_update_info(game, *period, opts())?]
        }
        Command::Files { game, mod_ids } => mod_ids
            .iter()
            .map(|id| broker.request_files(game, *id, opts()))
            .collect::<Result<Vec<_>, _>>()?,
        Command::Updates { game, mod_ids } => mod_ids
            .iter()
            .map(|id| broker.request_updates(game, *id, opts()))
            .collect::<Result<Vec<_>, _>>()?,
        Command::FileInfo {
            game,
            mod_id,
            file_id,
        } => vec![broker.request_file_info(game, *mod_id, *file_id, opts())?],
        Command::DownloadUrl {
            game,
            mod_id,
            file_id,
            key,
            expires,
        } => {
            let grant = match (key, expires) {
                (Some(key), Some(expires)) => Some(DownloadGrant {
                    key: key.clone(),
                    expires: *expires,
                    user_id,
                }),
                _ => None,
            };
            vec![broker.request_download_url(game, *mod_id, *file_id, grant, opts())?]
        }
        Command::Md5 { game, hash } => {
            let digest = hex::decode(hash.trim())
                .with_context(|| format!("'{hash}' is not a hex-encoded digest"))?;
            vec![broker.request_info_from_md5(game, &digest, opts())?]
        }
        Command::Endorsements => vec![broker.request_endorsement_info(opts())?],
        Command::Endorse {
            game,
            mod_id,
            version,
            abstain,
        } => vec![broker.request_toggle_endorsement(game, *mod_id, version, !abstain, opts())?],
        Command::Tracked => vec![broker.request_tracking_info(opts())?],
        Command::Track {
            game,
            mod_id,
            untrack,
        } => vec![broker.request_toggle_tracking(game, *mod_id, !untrack, opts())?],
        Command::ClearCache => Vec::new(),
    };
    Ok(tickets)
}

/// Prints each outcome as it arrives; fails if any request did not succeed.
async fn run(tickets: Vec<Ticket>) -> Result<()> {
    let total = tickets.len();
    let mut failed = 0usize;

    for ticket in tickets {
        let id = ticket.id();
        match ticket.outcome().await {
            Ok(outcome) => {
                if !outcome.is_success() {
                    failed += 1;
                }
                println!("{}", serde_json::to_string(&outcome)?);
            }
            Err(error) => {
                failed += 1;
                warn!(%id, error = %error, "Request produced no outcome");
            }
        }
    }

    info!(total, failed, "Done");
    if failed > 0 {
        bail!("{failed} of {total} requests failed");
    }
    Ok(())
}
