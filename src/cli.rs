use clap::ValueHint;

use std::num::NonZeroU32;
use std::path::PathBuf;

#[derive(clap::Parser, Debug, Clone)]
#[command(version, about)]
pub struct Args {
    /// Path to the config file.
    ///
    /// By default, rssagg looks for a file named `rssagg.toml` in the following directories
    /// (in order):
    ///
    /// - `./` (the current directory)
    /// - `/etc`
    #[arg(
        short,
        long,
        env = "RSSAGG_CONFIG",
        value_hint(ValueHint::FilePath)
    )]
    pub config_path: Option<PathBuf>,

    /// HTTP API address to bind to.
    #[arg(long, env = "RSSAGG_BIND_ADDR")]
    pub bind_addr: Option<String>,

    /// Path to the database file.
    #[arg(long, env = "RSSAGG_DB", value_hint(ValueHint::FilePath))]
    pub db_path: Option<PathBuf>,

    /// Path to the HTTP cache directory. Feed responses are not cached if unset.
    #[arg(long, env = "RSSAGG_CACHE_DIR", value_hint(ValueHint::DirPath))]
    pub cache_dir: Option<PathBuf>,

    /// Maximum number of feeds fetched per polling cycle.
    #[arg(long, env = "RSSAGG_CONCURRENCY")]
    pub concurrency: Option<NonZeroU32>,
}

impl Args {
    pub fn parse() -> Self {
        clap::Parser::parse()
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parses_overrides() {
        let args = Args::try_parse_from([
            "rssagg",
            "-c",
            "/etc/custom.toml",
            "--concurrency",
            "4",
            "--db-path",
            "feeds.sqlite3",
        ])
        .unwrap();

        assert_eq!(args.config_path, Some("/etc/custom.toml".into()));
        assert_eq!(args.concurrency, NonZeroU32::new(4));
        assert_eq!(args.db_path, Some("feeds.sqlite3".into()));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert!(Args::try_parse_from(["rssagg", "--concurrency", "0"]).is_err());
    }
}
