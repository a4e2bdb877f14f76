//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use modrepo_broker::credentials::AccountTier;
use modrepo_broker::request::UpdatePeriod;

/// Query a mod-hosting API through the request broker.
///
/// Every request runs through the broker's queue; outcomes are printed to
/// stdout as one JSON object per line.
#[derive(Parser, Debug)]
#[command(name = "modrepo")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// API key (falls back to MODREPO_API_KEY)
    #[arg(long, global = true)]
    pub api_key: Option<String>,

    /// Account id the API key belongs to
    #[arg(long, default_value_t = 0, global = true)]
    pub user_id: u64,

    /// Account tier of the API key
    #[arg(long, value_enum, default_value_t = TierArg::Regular, global = true)]
    pub tier: TierArg,

    /// Maximum requests in flight (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u64).range(1..=100), global = true)]
    pub max_concurrent: Option<u64>,

    /// Per-request deadline in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600), global = true)]
    pub timeout_secs: Option<u64>,

    /// API root URL
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Netscape cookie export to seed the session
    #[arg(long, global = true)]
    pub cookies: Option<PathBuf>,

    /// Response cache directory
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Config file (default: $XDG_CONFIG_HOME/modrepo/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Module tag added to the User-Agent
    #[arg(long, global = true)]
    pub submodule: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch mod descriptions
    Description { game: String, #[arg(required = true)] mod_ids: Vec<u64> },
    /// Fetch mod metadata
    ModInfo { game: String, #[arg(required = true)] mod_ids: Vec<u64> },
    /// List mods updated recently
    Updated {
        game: String,
        /// 1d, 1w or 1m
        #[arg(long, default_value = "1w")]
        period: UpdatePeriod,
    },
    /// List the files of mods
    Files { game: String, #[arg(required = true)] mod_ids: Vec<u64> },
    /// List file updates of mods
    Updates { game: String, #[arg(required = true)] mod_ids: Vec<u64> },
    /// Fetch one file's metadata
    FileInfo { game: String, mod_id: u64, file_id: u64 },
    /// Request download links for a file
    DownloadUrl {
        game: String,
        mod_id: u64,
        file_id: u64,
        /// Download key from the website (non-premium accounts)
        #[arg(long, requires = "expires")]
        key: Option<String>,
        /// Expiry of the download key (Unix seconds)
        #[arg(long, requires = "key")]
        expires: Option<i64>,
    },
    /// Look up files by md5 digest
    Md5 {
        game: String,
        /// Hex-encoded digest
        hash: String,
    },
    /// List the account's endorsements
    Endorsements,
    /// Endorse (or abstain from) a mod
    Endorse {
        game: String,
        mod_id: u64,
        version: String,
        #[arg(long)]
        abstain: bool,
    },
    /// List tracked mods
    Tracked,
    /// Track (or untrack) a mod
    Track {
        game: String,
        mod_id: u64,
        #[arg(long)]
        untrack: bool,
    },
    /// Empty the response cache and cookie file
    ClearCache,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierArg {
    Regular,
    Supporter,
    Premium,
}

impl From<TierArg> for AccountTier {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Regular => Self::Regular,
            TierArg::Supporter => Self::Supporter,
            TierArg::Premium => Self::Premium,
        }
    }
}
