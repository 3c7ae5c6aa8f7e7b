use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::ConfigError;
use crate::resource::EnvelopeShape;

/// Upstream APIs with known limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Crm,
    Ads,
}

impl Provider {
    pub const ALL: [Self; 2] = [Self::Crm, Self::Ads];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Crm => "crm",
            Self::Ads => "ads",
        }
    }
}

impl Display for Provider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "crm" => Ok(Self::Crm),
            "ads" => Ok(Self::Ads),
            other => Err(ConfigError::InvalidValue {
                name: "provider",
                value: other.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPolicy {
    pub provider: Provider,
    pub max_rps: f64,
    pub page_size: u32,
    pub max_concurrency: usize,
    pub shape: EnvelopeShape,
    pub retry_backoff: BackoffPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl ProviderPolicy {
    /// CRM REST API: about 7 requests per second per account, 250 records per page.
    pub fn crm_default() -> Self {
        Self {
            provider: Provider::Crm,
            max_rps: 7.0,
            page_size: 250,
            max_concurrency: 10,
            shape: EnvelopeShape::Embedded,
            retry_backoff: BackoffPolicy {
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                max_retries: 3,
            },
        }
    }

    /// Ads graph API: cursor-paged edges and a much tighter per-app quota.
    pub fn ads_default() -> Self {
        Self {
            provider: Provider::Ads,
            max_rps: 2.0,
            page_size: 100,
            max_concurrency: 4,
            shape: EnvelopeShape::Graph,
            retry_backoff: BackoffPolicy {
                initial_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(60),
                max_retries: 5,
            },
        }
    }

    pub fn default_for(provider: Provider) -> Self {
        match provider {
            Provider::Crm => Self::crm_default(),
            Provider::Ads => Self::ads_default(),
        }
    }

    /// Overwrites the rate, paging and retry settings of `config`.
    pub fn apply(&self, config: ClientConfig) -> ClientConfig {
        ClientConfig {
            max_rps: self.max_rps,
            page_size: self.page_size,
            max_concurrency: self.max_concurrency,
            max_retries: self.retry_backoff.max_retries,
            backoff_base_ms: self.retry_backoff.initial_delay.as_millis() as u64,
            backoff_max_ms: self.retry_backoff.max_delay.as_millis() as u64,
            ..config
        }
    }
}
