mod types;

use std::fs::File;
use std::io::{self, Read};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use take_mut::take;
use tracing::{debug, info};

pub use self::types::*;

const DEFAULT_CONCURRENCY: NonZeroU32 = match NonZeroU32::new(10) {
    Some(n) => n,
    None => unreachable!(),
};

fn default_bind_addr() -> String {
    Config::default().bind_addr
}

fn default_db_path() -> PathBuf {
    Config::default().db_path
}

fn default_concurrency() -> NonZeroU32 {
    Config::default().concurrency
}

fn default_fetch_interval() -> Duration {
    Config::default().fetch_interval
}

fn default_fetch_timeout() -> Duration {
    Config::default().fetch_timeout
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Maximum number of feeds fetched per cycle.
    #[serde(default = "default_concurrency")]
    pub concurrency: NonZeroU32,

    /// Time between the starts of two consecutive cycles.
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval: Duration,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: Duration,
}

impl Config {
    pub fn update(&mut self, args: crate::cli::Args) {
        fn set_if_some<T>(dst: &mut T, v: Option<T>) {
            if let Some(v) = v {
                *dst = v;
            }
        }

        set_if_some(&mut self.bind_addr, args.bind_addr);
        set_if_some(&mut self.db_path, args.db_path);
        set_if_some(&mut self.cache_dir, args.cache_dir.map(Some));
        set_if_some(&mut self.concurrency, args.concurrency);
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch_interval.is_zero() {
            bail!("`fetch-interval` must be positive");
        }

        if self.fetch_timeout.is_zero() {
            bail!("`fetch-timeout` must be positive");
        }

        Ok(())
    }

    pub fn resolve_relative_paths(&mut self, config_dir: impl AsRef<Path>) {
        let config_dir = config_dir.as_ref();

        // rebuild the whole struct so a new path field can't be missed.
        take(self, |this| Self {
            bind_addr: this.bind_addr,
            db_path: config_dir.join(&this.db_path),
            cache_dir: this.cache_dir.map(|cache_dir| config_dir.join(cache_dir)),
            concurrency: this.concurrency,
            fetch_interval: this.fetch_interval,
            fetch_timeout: this.fetch_timeout,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "127.0.0.1:8080".into(),
            db_path: "./rssagg.sqlite3".into(),
            cache_dir: None,
            concurrency: DEFAULT_CONCURRENCY,
            fetch_interval: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

pub fn load(search_paths: &[PathBuf]) -> Result<Config> {
    for path in search_paths {
        debug!("Trying to load {}", path.display());
        let mut contents = String::new();

        {
            let mut f = match File::open(path) {
                Ok(f) => f,

                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(file = %path.display(), "File not found, skipping");
                    continue;
                }

                Err(e) => {
                    return Err(e)
                        .context(anyhow!("could not load a config file `{}`", path.display()));
                }
            };

            f.read_to_string(&mut contents).with_context(|| {
                anyhow!(
                    "could not read the contents of a config file `{}`",
                    path.display()
                )
            })?;
        }

        let mut cfg: Config = toml::from_str(&contents)
            .with_context(|| anyhow!("could not load the config file `{}`", path.display()))?;

        if let Some(parent) = path.parent() {
            cfg.resolve_relative_paths(parent);
        }

        info!("Loaded a config file `{}`", path.display());

        return Ok(cfg);
    }

    info!("Using the default config");

    Ok(Default::default())
}
