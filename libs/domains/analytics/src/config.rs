//! Analytics configuration, loaded from the environment.

use core_config::{env_opt, ConfigError, FromEnv};
use std::str::FromStr;
use strum::{Display, EnumString};

/// Customer.io region. Determines which tracking API host is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Region {
    Eu,
    Us,
}

impl Region {
    /// Base URL of the region's tracking API.
    pub fn api_base(&self) -> &'static str {
        match self {
            Region::Eu => "https://track-eu.customer.io",
            Region::Us => "https://track.customer.io",
        }
    }
}

/// Credentials for the secondary (replication) backend.
#[derive(Debug, Clone)]
pub struct CustomerIoConfig {
    pub site_id: String,
    pub api_key: String,
    pub region: Region,
}

impl CustomerIoConfig {
    /// Load from `CUSTOMERIO_SITE_ID`, `CUSTOMERIO_API_KEY` and
    /// `CUSTOMERIO_REGION`. Returns `None` unless all three are set;
    /// replication is opt-in.
    fn from_env_opt() -> Result<Option<Self>, ConfigError> {
        let (Some(site_id), Some(api_key), Some(region)) = (
            env_opt("CUSTOMERIO_SITE_ID"),
            env_opt("CUSTOMERIO_API_KEY"),
            env_opt("CUSTOMERIO_REGION"),
        ) else {
            return Ok(None);
        };

        let region = Region::from_str(&region).map_err(|_| ConfigError::InvalidValue {
            key: "CUSTOMERIO_REGION".to_string(),
            details: format!("'{}' is not a known region (expected eu or us)", region),
        })?;

        Ok(Some(Self {
            site_id,
            api_key,
            region,
        }))
    }
}

/// Top-level analytics configuration.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsConfig {
    /// Project token for the primary backend. Unset or empty means mock
    /// mode: messages are recorded in memory and nothing touches the
    /// network.
    pub token: Option<String>,

    /// API secret for the read-only query client.
    pub api_secret: Option<String>,

    /// Allow event and profile properties that are not in the catalog.
    /// Meta properties are always strict.
    pub allow_unknown_properties: bool,

    /// Secondary backend credentials; replication is disabled when absent.
    pub customerio: Option<CustomerIoConfig>,
}

impl FromEnv for AnalyticsConfig {
    /// Reads `ANALYTICS_TOKEN`, `ANALYTICS_API_SECRET`,
    /// `ANALYTICS_ALLOW_UNKNOWN_PROPERTIES` and the `CUSTOMERIO_*`
    /// variables.
    fn from_env() -> Result<Self, ConfigError> {
        let allow_unknown = env_opt("ANALYTICS_ALLOW_UNKNOWN_PROPERTIES")
            .map(|v| {
                v.parse::<bool>().map_err(|e| ConfigError::ParseError {
                    key: "ANALYTICS_ALLOW_UNKNOWN_PROPERTIES".to_string(),
                    details: e.to_string(),
                })
            })
            .transpose()?
            .unwrap_or(false);

        Ok(Self {
            token: env_opt("ANALYTICS_TOKEN"),
            api_secret: env_opt("ANALYTICS_API_SECRET"),
            allow_unknown_properties: allow_unknown,
            customerio: CustomerIoConfig::from_env_opt()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_token_means_mock_mode() {
        temp_env::with_vars(
            [
                ("ANALYTICS_TOKEN", Some("")),
                ("ANALYTICS_API_SECRET", None),
                ("ANALYTICS_ALLOW_UNKNOWN_PROPERTIES", None),
                ("CUSTOMERIO_SITE_ID", None),
                ("CUSTOMERIO_API_KEY", None),
                ("CUSTOMERIO_REGION", None),
            ],
            || {
                let config = AnalyticsConfig::from_env().unwrap();
                assert_eq!(config.token, None);
                assert!(!config.allow_unknown_properties);
                assert!(config.customerio.is_none());
            },
        );
    }

    #[test]
    fn test_full_config() {
        temp_env::with_vars(
            [
                ("ANALYTICS_TOKEN", Some("tok-123")),
                ("ANALYTICS_API_SECRET", Some("sec-456")),
                ("ANALYTICS_ALLOW_UNKNOWN_PROPERTIES", Some("true")),
                ("CUSTOMERIO_SITE_ID", Some("site")),
                ("CUSTOMERIO_API_KEY", Some("key")),
                ("CUSTOMERIO_REGION", Some("eu")),
            ],
            || {
                let config = AnalyticsConfig::from_env().unwrap();
                assert_eq!(config.token.as_deref(), Some("tok-123"));
                assert_eq!(config.api_secret.as_deref(), Some("sec-456"));
                assert!(config.allow_unknown_properties);

                let cio = config.customerio.unwrap();
                assert_eq!(cio.region, Region::Eu);
                assert_eq!(cio.region.api_base(), "https://track-eu.customer.io");
            },
        );
    }

    #[test]
    fn test_partial_customerio_config_is_ignored() {
        temp_env::with_vars(
            [
                ("CUSTOMERIO_SITE_ID", Some("site")),
                ("CUSTOMERIO_API_KEY", None::<&str>),
                ("CUSTOMERIO_REGION", Some("us")),
            ],
            || {
                let config = AnalyticsConfig::from_env().unwrap();
                assert!(config.customerio.is_none());
            },
        );
    }

    #[test]
    fn test_unknown_region_rejected() {
        temp_env::with_vars(
            [
                ("CUSTOMERIO_SITE_ID", Some("site")),
                ("CUSTOMERIO_API_KEY", Some("key")),
                ("CUSTOMERIO_REGION", Some("mars")),
            ],
            || {
                let err = AnalyticsConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("CUSTOMERIO_REGION"));
            },
        );
    }
}
