use serde::{Deserialize, Serialize};
use tradedesk_broker::BrokerSession;
use uuid::Uuid;

use crate::errors::{Result, ValidationError};

/// Role an instance plays when the feed layer picks quote sources.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketDataRole {
    /// Not part of the market-data pool.
    #[default]
    None,
    /// Preferred quote source.
    Primary,
    /// Used when no primary is available, and as fallback.
    Secondary,
}

impl MarketDataRole {
    /// Pool ordering rank; lower is preferred.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Self::Primary => 0,
            Self::Secondary => 1,
            Self::None => 2,
        }
    }
}

/// Health as observed by upstream calls and health checks.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

/// One configured connection to a broker trading session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub is_active: bool,
    /// True when the session runs in analyzer (simulated) mode. The
    /// auto-exit engine only ever routes a close through the position's own
    /// session, so an analyzer instance can never receive a live order.
    pub analyzer_mode: bool,
    pub market_data_role: MarketDataRole,
    pub health: HealthStatus,
}

impl Instance {
    /// Connection coordinates for upstream calls.
    pub fn session(&self) -> BrokerSession {
        BrokerSession {
            instance_id: self.id.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            analyzer: self.analyzer_mode,
        }
    }
}

/// Payload for registering an instance.
#[derive(Clone, Debug, Deserialize)]
pub struct NewInstance {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub analyzer_mode: bool,
    #[serde(default)]
    pub market_data_role: MarketDataRole,
}

impl NewInstance {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name".to_string()).into());
        }
        if self.base_url.trim().is_empty() {
            return Err(ValidationError::MissingField("base_url".to_string()).into());
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ValidationError::InvalidInput(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            ))
            .into());
        }
        if self.api_key.trim().is_empty() {
            return Err(ValidationError::MissingField("api_key".to_string()).into());
        }
        Ok(())
    }

    pub(crate) fn into_instance(self) -> Instance {
        Instance {
            id: Uuid::new_v4().to_string(),
            name: self.name,
            base_url: self.base_url,
            api_key: self.api_key,
            is_active: true,
            analyzer_mode: self.analyzer_mode,
            market_data_role: self.market_data_role,
            health: HealthStatus::Unknown,
        }
    }
}
