use clap::Parser;
use regsync_config::Overrides;
use regsync_registry::Cursor;
use std::path::PathBuf;

/// Keep the local npm cache in sync with the registry change feed.
#[derive(Debug, Parser)]
#[command(name = "regsync", version, about)]
pub struct Args {
    /// Follow from this sequence (or "now") instead of the saved checkpoint.
    #[arg(long, value_name = "SEQ", value_parser = parse_cursor)]
    pub since: Option<Cursor>,

    /// Config file (TOML, YAML or JSON).
    #[arg(short, long, env = "REGSYNC_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Registry to resolve package metadata against.
    #[arg(long, value_name = "URL")]
    pub registry: Option<String>,

    /// CouchDB database whose change feed to follow.
    #[arg(long, value_name = "URL")]
    pub feed: Option<String>,

    /// Maximum concurrent cache updates.
    #[arg(short = 'j', long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// State database location.
    #[arg(long, value_name = "PATH")]
    pub state: Option<PathBuf>,

    /// npm cache directory (default: ask npm).
    #[arg(long, value_name = "PATH")]
    pub npm_cache: Option<PathBuf>,

    /// Leave npm's cache-min setting alone.
    #[arg(long)]
    pub no_cache_min: bool,

    /// Skip re-checking the existing cache on startup.
    #[arg(long)]
    pub no_reconcile: bool,

    /// Resolve and log everything without touching the cache or saved state.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Don't log a line per package.
    #[arg(short, long, conflicts_with = "verbose")]
    pub silent: bool,

    /// Log internal progress as well.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,
}

fn parse_cursor(value: &str) -> Result<Cursor, String> {
    value.parse().map_err(|_| format!("expected a sequence number or \"now\", got {value:?}"))
}

impl Args {
    /// The subset of arguments that layer over file and environment config.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            registry: self.registry.clone(),
            feed: self.feed.clone(),
            concurrency: self.concurrency,
            reconcile: self.no_reconcile.then_some(false),
            cache_min: self.no_cache_min.then_some(false),
            state_path: self.state.clone(),
            npm_cache: self.npm_cache.clone(),
            dry_run: self.dry_run.then_some(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[rstest]
    #[case(&["regsync"], None)]
    #[case(&["regsync", "--since", "now"], Some(Cursor::Live))]
    #[case(&["regsync", "--since", "594192"], Some(Cursor::Seq(594192)))]
    fn test_since(#[case] argv: &[&str], #[case] expected: Option<Cursor>) {
        assert_eq!(Args::try_parse_from(argv).unwrap().since, expected);
    }

    #[test]
    fn test_invalid_since() {
        assert!(Args::try_parse_from(["regsync", "--since", "yesterday"]).is_err());
    }

    #[test]
    fn test_silent_conflicts_with_verbose() {
        assert!(Args::try_parse_from(["regsync", "--silent", "--verbose"]).is_err());
    }

    #[test]
    fn test_overrides_only_set_flags() {
        let args = Args::try_parse_from(["regsync", "--no-cache-min", "-j", "4"]).unwrap();
        let overrides = args.overrides();
        assert_eq!(overrides.cache_min, Some(false));
        assert_eq!(overrides.concurrency, Some(4));
        assert_eq!(overrides.reconcile, None);
        assert_eq!(overrides.dry_run, None);
    }
}
