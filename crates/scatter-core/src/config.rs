//! `scatter.toml` configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::DEFAULT_ENGINE_LABEL;

/// Groups untouched for this many sweep intervals are discarded.
pub const GC_TTL_INTERVALS: u32 = 3;

const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_CONCURRENCY: usize = 16;
const DEFAULT_MAX_RETRY_LIMIT: u32 = 30;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScatterConfig {
    pub scatter: Option<ScatterSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScatterSection {
    /// Selection tracker sweep interval, e.g. "60s".
    pub gc_interval: Option<String>,
    pub engine_label: Option<String>,
    pub default_concurrency: Option<usize>,
    pub max_retry_limit: Option<u32>,
    pub initial_backoff: Option<String>,
    pub max_backoff: Option<String>,
    /// Fixed seed for tie-breaking; entropy-seeded when absent.
    pub rng_seed: Option<u64>,
}

impl ScatterConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: ScatterConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values that parse but cannot be used.
    pub fn validate(&self) -> anyhow::Result<()> {
        let Some(section) = &self.scatter else {
            return Ok(());
        };
        for (name, value) in [
            ("gc_interval", &section.gc_interval),
            ("initial_backoff", &section.initial_backoff),
            ("max_backoff", &section.max_backoff),
        ] {
            if let Some(v) = value {
                let parsed = parse_duration(v)
                    .ok_or_else(|| anyhow::anyhow!("invalid duration for {name}: {v:?}"))?;
                if parsed.is_zero() {
                    anyhow::bail!("{name} must be greater than zero");
                }
            }
        }
        if section.default_concurrency == Some(0) {
            anyhow::bail!("default_concurrency must be at least 1");
        }
        if section.engine_label.as_deref() == Some("") {
            anyhow::bail!("engine_label must not be empty");
        }
        Ok(())
    }

    fn section(&self) -> Option<&ScatterSection> {
        self.scatter.as_ref()
    }

    /// Sweep interval; zero or unparsable values fall back to the default.
    pub fn gc_interval(&self) -> Duration {
        self.section()
            .and_then(|s| s.gc_interval.as_deref())
            .and_then(parse_positive_duration)
            .unwrap_or(DEFAULT_GC_INTERVAL)
    }

    /// Always `GC_TTL_INTERVALS` sweep intervals.
    pub fn gc_ttl(&self) -> Duration {
        self.gc_interval() * GC_TTL_INTERVALS
    }

    pub fn engine_label(&self) -> &str {
        self.section()
            .and_then(|s| s.engine_label.as_deref())
            .unwrap_or(DEFAULT_ENGINE_LABEL)
    }

    pub fn default_concurrency(&self) -> usize {
        self.section()
            .and_then(|s| s.default_concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY)
            .max(1)
    }

    pub fn max_retry_limit(&self) -> u32 {
        self.section()
            .and_then(|s| s.max_retry_limit)
            .unwrap_or(DEFAULT_MAX_RETRY_LIMIT)
    }

    pub fn initial_backoff(&self) -> Duration {
        self.section()
            .and_then(|s| s.initial_backoff.as_deref())
            .and_then(parse_positive_duration)
            .unwrap_or(DEFAULT_INITIAL_BACKOFF)
    }

    pub fn max_backoff(&self) -> Duration {
        self.section()
            .and_then(|s| s.max_backoff.as_deref())
            .and_then(parse_positive_duration)
            .unwrap_or(DEFAULT_MAX_BACKOFF)
    }

    pub fn rng_seed(&self) -> Option<u64> {
        self.section().and_then(|s| s.rng_seed)
    }

    /// Builder-style override of the sweep interval, mostly for tests.
    pub fn with_gc_interval(mut self, interval: Duration) -> Self {
        let section = self.scatter.get_or_insert_with(ScatterSection::default);
        section.gc_interval = Some(format_duration(interval));
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        let section = self.scatter.get_or_insert_with(ScatterSection::default);
        section.rng_seed = Some(seed);
        self
    }
}

/// Parse "250us", "500ms", "5s" or "2m". Returns `None` for anything else,
/// including minute counts that overflow.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(us) = s.strip_suffix("us") {
        us.trim().parse::<u64>().ok().map(Duration::from_micros)
    } else if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        None
    }
}

fn parse_positive_duration(s: &str) -> Option<Duration> {
    parse_duration(s).filter(|d| !d.is_zero())
}

/// Inverse of [`parse_duration`], in the coarsest unit that loses nothing
/// above microsecond precision.
fn format_duration(d: Duration) -> String {
    if d.subsec_micros() % 1000 != 0 {
        format!("{}us", d.as_micros())
    } else {
        format!("{}ms", d.as_millis())
    }
}
