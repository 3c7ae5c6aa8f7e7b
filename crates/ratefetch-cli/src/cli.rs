//! CLI argument definitions for ratefetch.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fetch` | Fetch every page of a collection |
//! | `ids` | Fetch records of a collection by identifier |
//! | `cache clear` | Drop cached responses under a prefix |
//! | `cache keys` | List cached keys under a prefix |
//! | `cache delete` | Drop one cached response |
//! | `cache stats` | Entry counts per tier and endpoint |
//!
//! Connection settings come from `RATEFETCH_*` environment variables; the
//! global options below override the matching ones.
//!
//! # Examples
//!
//! ```bash
//! ratefetch fetch leads --param with=contacts --param filter[pipeline_id]=7 --pretty
//! ratefetch ids contacts 11 12 13
//! ratefetch --provider ads fetch act_1/campaigns --shape graph
//! ratefetch cache clear --prefix ratefetch:leads
//! ratefetch cache keys --prefix ratefetch:leads --limit 20
//! ratefetch cache stats
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};

use ratefetch_core::{EnvelopeShape, Provider};

#[derive(Debug, Parser)]
#[command(
    name = "ratefetch",
    author,
    version,
    about = "Rate-limited concurrent fetcher for paginated REST collections"
)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Treat lost pages, missing ids and truncated fetches as failures (exit code 5).
    #[arg(long, global = true, default_value_t = false)]
    pub strict: bool,

    /// Apply the rate, paging and retry preset of a known upstream.
    #[arg(long, global = true, value_enum)]
    pub provider: Option<ProviderArg>,

    /// Pages or id lookups in flight at once.
    #[arg(long, global = true)]
    pub max_concurrency: Option<usize>,

    /// Hard cap on pages per fetch.
    #[arg(long, global = true)]
    pub max_pages: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderArg {
    Crm,
    Ads,
}

impl From<ProviderArg> for Provider {
    fn from(value: ProviderArg) -> Self {
        match value {
            ProviderArg::Crm => Self::Crm,
            ProviderArg::Ads => Self::Ads,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShapeArg {
    /// `_embedded.<collection>` records with `_total_items`.
    Embedded,
    /// `data` records with a `paging.next` cursor.
    Graph,
}

impl From<ShapeArg> for EnvelopeShape {
    fn from(value: ShapeArg) -> Self {
        match value {
            ShapeArg::Embedded => Self::Embedded,
            ShapeArg::Graph => Self::Graph,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch every page of a collection.
    Fetch(FetchArgs),
    /// Fetch records by identifier.
    Ids(IdsArgs),
    /// Manage cached responses.
    Cache(CacheArgs),
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Collection path relative to the base url, e.g. `leads`.
    pub path: String,

    /// Query parameter as `name=value`; repeatable.
    #[arg(long = "param", value_name = "NAME=VALUE")]
    pub params: Vec<String>,

    /// Envelope layout; defaults to the provider's.
    #[arg(long, value_enum)]
    pub shape: Option<ShapeArg>,

    /// Give up on pages still outstanding after this many milliseconds.
    #[arg(long)]
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Args)]
pub struct IdsArgs {
    /// Collection path relative to the base url, e.g. `contacts`.
    pub path: String,

    #[arg(required = true)]
    pub ids: Vec<String>,

    #[arg(long, value_enum)]
    pub shape: Option<ShapeArg>,
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Remove cached responses whose key starts with a prefix.
    Clear {
        /// Defaults to the configured cache prefix.
        #[arg(long)]
        prefix: Option<String>,
    },
    /// List cached keys whose key starts with a prefix.
    Keys {
        /// Defaults to the configured cache prefix.
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Remove a single cached response.
    Delete {
        /// Full cache key, as printed by `cache keys`.
        key: String,
    },
    /// Show entry counts per cache tier and endpoint.
    Stats {
        /// Defaults to the configured cache prefix.
        #[arg(long)]
        prefix: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_accepts_repeated_params_and_global_flags() {
        let cli = Cli::try_parse_from([
            "ratefetch",
            "fetch",
            "leads",
            "--param",
            "with=contacts",
            "--param",
            "filter[pipeline_id]=7",
            "--strict",
            "--max-pages",
            "5",
        ])
        .expect("valid arguments");

        assert!(cli.strict);
        assert_eq!(cli.max_pages, Some(5));
        match cli.command {
            Command::Fetch(args) => {
                assert_eq!(args.path, "leads");
                assert_eq!(args.params, vec!["with=contacts", "filter[pipeline_id]=7"]);
                assert_eq!(args.shape, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn ids_requires_at_least_one_id() {
        assert!(Cli::try_parse_from(["ratefetch", "ids", "contacts"]).is_err());
    }

    #[test]
    fn cache_clear_prefix_is_optional() {
        let cli = Cli::try_parse_from(["ratefetch", "cache", "clear"]).expect("valid arguments");

        assert!(matches!(
            cli.command,
            Command::Cache(CacheArgs {
                command: CacheCommand::Clear { prefix: None }
            })
        ));
    }

    #[test]
    fn cache_keys_defaults_to_one_hundred() {
        let cli = Cli::try_parse_from(["ratefetch", "cache", "keys", "--prefix", "ratefetch:leads"])
            .expect("valid arguments");

        match cli.command {
            Command::Cache(CacheArgs {
                command: CacheCommand::Keys { prefix, limit },
            }) => {
                assert_eq!(prefix.as_deref(), Some("ratefetch:leads"));
                assert_eq!(limit, 100);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cache_delete_requires_a_key() {
        assert!(Cli::try_parse_from(["ratefetch", "cache", "delete"]).is_err());
        assert!(Cli::try_parse_from(["ratefetch", "cache", "delete", "ratefetch:leads:ab12"]).is_ok());
    }
}
