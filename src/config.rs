//! Loader configuration.
//!
//! Everything here is optional; a default [`LoaderConfig`] builds a
//! loader that reseeds from entropy every session and carries no
//! concurrency hints.

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Env var holding a `u64` seed.
pub const SEED_ENV_VAR: &str = "PIPELOADER_SEED";
/// Env var holding the worker count hint.
pub const NUM_WORKERS_ENV_VAR: &str = "PIPELOADER_NUM_WORKERS";

fn default_prefetch_factor() -> usize {
    2
}

/// Concurrency hints for backends that run work in parallel.
///
/// The loader doesn't act on these; it validates them and exposes
/// them through [`crate::Loader::concurrency`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencySpec {
    pub num_workers: usize,
    /// Seconds to wait on a worker before giving up.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default = "default_prefetch_factor")]
    pub prefetch_factor: usize,
    #[serde(default)]
    pub persistent_workers: bool,
}

impl ConcurrencySpec {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            timeout: None,
            prefetch_factor: default_prefetch_factor(),
            persistent_workers: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.prefetch_factor == 0 {
            return Err(Error::Configuration(
                "prefetch_factor must be at least 1".to_string(),
            ));
        }
        if self.persistent_workers && self.num_workers == 0 {
            return Err(Error::Configuration(
                "persistent_workers requires num_workers > 0".to_string(),
            ));
        }
        if self.timeout == Some(0) {
            return Err(Error::Configuration(
                "timeout must be a positive number of seconds".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Applied with [`crate::Loader::set_seed`] at build time.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub concurrency: Option<ConcurrencySpec>,
}

impl LoaderConfig {
    /// Read [`SEED_ENV_VAR`] and [`NUM_WORKERS_ENV_VAR`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| Error::Configuration(format!("bad loader config JSON: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let seed = lookup(SEED_ENV_VAR)
            .map(|raw| parse_var(SEED_ENV_VAR, &raw))
            .transpose()?;
        let concurrency = lookup(NUM_WORKERS_ENV_VAR)
            .map(|raw| parse_var(NUM_WORKERS_ENV_VAR, &raw).map(ConcurrencySpec::new))
            .transpose()?;
        let config = Self { seed, concurrency };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match &self.concurrency {
            Some(spec) => spec.validate(),
            None => Ok(()),
        }
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|err| Error::Configuration(format!("bad value {raw:?} for {key}: {err}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_env_is_default() {
        let config = LoaderConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, LoaderConfig::default());
    }

    #[test]
    fn env_seed_and_workers() {
        let config =
            LoaderConfig::from_lookup(lookup(&[(SEED_ENV_VAR, " 12 "), (NUM_WORKERS_ENV_VAR, "4")]))
                .unwrap();
        assert_eq!(config.seed, Some(12));
        assert_eq!(config.concurrency, Some(ConcurrencySpec::new(4)));
    }

    #[test]
    fn env_seed_out_of_range_is_config_error() {
        let res = LoaderConfig::from_lookup(lookup(&[(SEED_ENV_VAR, "18446744073709551616")]));
        assert!(matches!(res, Err(Error::Configuration(_))));
    }

    #[test]
    fn json_fills_defaults() {
        let config =
            LoaderConfig::from_json(r#"{"concurrency": {"num_workers": 2, "timeout": 30}}"#)
                .unwrap();
        let spec = config.concurrency.unwrap();
        assert_eq!(spec.prefetch_factor, 2);
        assert_eq!(spec.timeout, Some(30));
        assert!(!spec.persistent_workers);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn persistent_workers_need_workers() {
        let res = LoaderConfig::from_json(
            r#"{"concurrency": {"num_workers": 0, "persistent_workers": true}}"#,
        );
        assert!(matches!(res, Err(Error::Configuration(_))));
    }
}
