//! Tunables for both sides, optionally loaded from a TOML file.
//!
//! ```toml
//! [producer]
//! bind = "0.0.0.0:9053"
//! segment_size = 8192
//!
//! [consumer]
//! addr = "10.0.0.5:9053"
//! max_attempts = 6
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::name::Name;
use crate::protocol;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProducerConfig {
    pub prefix: String,
    pub bind: String,
    pub segment_size: usize,
    pub freshness_ms: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            prefix: protocol::DEFAULT_PREFIX.to_string(),
            bind: protocol::DEFAULT_BIND.to_string(),
            segment_size: protocol::DEFAULT_SEGMENT_SIZE,
            freshness_ms: protocol::DEFAULT_FRESHNESS_MS,
        }
    }
}

impl ProducerConfig {
    pub fn prefix_name(&self) -> Result<Name> {
        self.prefix.parse()
    }

    pub fn validate(&self) -> Result<()> {
        validate_common(&self.prefix, self.segment_size)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConsumerConfig {
    pub prefix: String,
    pub addr: String,
    pub segment_size: usize,
    pub interest_lifetime_ms: u64,
    pub max_attempts: u32,
    pub pipeline_window: usize,
    pub read_timeout_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            prefix: protocol::DEFAULT_PREFIX.to_string(),
            addr: protocol::DEFAULT_BIND.to_string(),
            segment_size: protocol::DEFAULT_SEGMENT_SIZE,
            interest_lifetime_ms: protocol::DEFAULT_INTEREST_LIFETIME_MS,
            max_attempts: protocol::DEFAULT_MAX_ATTEMPTS,
            pipeline_window: protocol::DEFAULT_PIPELINE_WINDOW,
            read_timeout_ms: protocol::DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

impl ConsumerConfig {
    pub fn prefix_name(&self) -> Result<Name> {
        self.prefix.parse()
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        validate_common(&self.prefix, self.segment_size)?;
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.pipeline_window == 0 {
            bail!("pipeline_window must be at least 1");
        }
        Ok(())
    }
}

fn validate_common(prefix: &str, segment_size: usize) -> Result<()> {
    prefix
        .parse::<Name>()
        .with_context(|| format!("invalid prefix {prefix:?}"))?;
    if segment_size == 0 {
        bail!("segment_size must be positive");
    }
    // leave room for the name and response header inside one frame
    if segment_size > protocol::MAX_FRAME_SIZE / 2 {
        bail!(
            "segment_size {} exceeds the transport limit of {}",
            segment_size,
            protocol::MAX_FRAME_SIZE / 2
        );
    }
    Ok(())
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub producer: ProducerConfig,
    pub consumer: ConsumerConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg: Config =
            toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))?;
        Ok(cfg)
    }

    /// Load `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("ndnfile.toml");
        std::fs::write(
            &p,
            "[producer]\nsegment_size = 4096\n\n[consumer]\nmax_attempts = 7\n",
        )
        .unwrap();
        let cfg = Config::load(&p).unwrap();
        assert_eq!(cfg.producer.segment_size, 4096);
        assert_eq!(cfg.producer.prefix, protocol::DEFAULT_PREFIX);
        assert_eq!(cfg.consumer.max_attempts, 7);
        assert_eq!(cfg.consumer.pipeline_window, protocol::DEFAULT_PIPELINE_WINDOW);
        cfg.producer.validate().unwrap();
        cfg.consumer.validate().unwrap();
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::load(Path::new("/no/such/ndnfile.toml")).is_err());
        assert_eq!(Config::load_or_default(None).unwrap(), Config::default());
    }

    #[test]
    fn validation_rejects_nonsense() {
        let mut c = ConsumerConfig::default();
        c.max_attempts = 0;
        assert!(c.validate().is_err());

        let mut p = ProducerConfig::default();
        p.segment_size = 0;
        assert!(p.validate().is_err());
        p.segment_size = 4;
        p.prefix = "no-leading-slash".into();
        assert!(p.validate().is_err());
    }
}
