//! Process-wide analytics service.
//!
//! A [`Tracker`] is built once at startup and shared across requests. It
//! holds the immutable pieces every session needs: the schema catalog, the
//! validator settings and the backend senders. Sessions themselves are
//! created per request, either through the lifecycle middleware or directly
//! with [`Tracker::session`] for non-request contexts such as background
//! jobs.

use crate::catalog::Catalog;
use crate::config::AnalyticsConfig;
use crate::consumer::{BufferedConsumer, MixpanelSender, RecordingSender, Sender};
use crate::customerio::CustomerIoSender;
use crate::error::Result;
use crate::middleware::IdentityResolver;
use crate::session::AnalyticsSession;
use crate::validator::RecordValidator;
use axum::extract::Request;
use std::sync::Arc;
use tracing::{info, warn};

/// Token used on payloads when no real token is configured. Mock mode never
/// transmits, so the value only shows up in recorded messages.
const MOCK_TOKEN: &str = "testing";

struct TrackerInner {
    token: String,
    mock: bool,
    validator: RecordValidator,
    primary: Arc<dyn Sender>,
    secondary: Option<Arc<dyn Sender>>,
    primary_recorder: Option<RecordingSender>,
    secondary_recorder: Option<RecordingSender>,
    identity: Option<Arc<dyn IdentityResolver>>,
}

/// Shared, immutable analytics service handle.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

impl Tracker {
    pub fn builder(config: AnalyticsConfig) -> TrackerBuilder {
        TrackerBuilder::new(config)
    }

    /// Build a tracker from environment configuration with the reserved-only
    /// default catalog.
    pub fn from_env() -> Result<Self> {
        use core_config::FromEnv;
        TrackerBuilder::new(AnalyticsConfig::from_env()?).build()
    }

    /// Whether messages are recorded in memory instead of transmitted.
    pub fn is_mock(&self) -> bool {
        self.inner.mock
    }

    /// The recorder standing in for the primary backend in mock mode.
    pub fn primary_recorder(&self) -> Option<&RecordingSender> {
        self.inner.primary_recorder.as_ref()
    }

    /// The recorder standing in for the secondary backend in mock mode.
    pub fn secondary_recorder(&self) -> Option<&RecordingSender> {
        self.inner.secondary_recorder.as_ref()
    }

    pub(crate) fn catalog(&self) -> &Arc<Catalog> {
        self.inner.validator.catalog()
    }

    /// Create a fresh session with no distinct id resolved yet.
    pub fn session(&self) -> AnalyticsSession {
        self.session_with_distinct_id(None)
    }

    pub(crate) fn session_with_distinct_id(
        &self,
        distinct_id: Option<String>,
    ) -> AnalyticsSession {
        AnalyticsSession::new(
            self.inner.token.clone(),
            distinct_id,
            self.inner.validator.clone(),
            BufferedConsumer::new(Arc::clone(&self.inner.primary)),
            self.inner
                .secondary
                .as_ref()
                .map(|sender| BufferedConsumer::new(Arc::clone(sender))),
        )
    }

    pub(crate) fn resolve_identity(&self, request: &Request) -> Option<String> {
        self.inner
            .identity
            .as_ref()
            .and_then(|resolver| resolver.distinct_id(request))
    }
}

/// Assembles a [`Tracker`] from configuration plus explicitly injected
/// catalog, sender and identity-resolver instances.
pub struct TrackerBuilder {
    config: AnalyticsConfig,
    catalog: Option<Catalog>,
    primary: Option<Arc<dyn Sender>>,
    secondary: Option<Arc<dyn Sender>>,
    identity: Option<Arc<dyn IdentityResolver>>,
}

impl TrackerBuilder {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            catalog: None,
            primary: None,
            secondary: None,
            identity: None,
        }
    }

    /// Supply the application's catalog. Without this only the backend's
    /// reserved names are known.
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Replace the primary backend sender.
    pub fn with_primary_sender(mut self, sender: Arc<dyn Sender>) -> Self {
        self.primary = Some(sender);
        self
    }

    /// Replace the secondary (replication) backend sender.
    pub fn with_secondary_sender(mut self, sender: Arc<dyn Sender>) -> Self {
        self.secondary = Some(sender);
        self
    }

    /// Supply the hook that reads an authenticated identity's stable id
    /// from the request.
    pub fn with_identity_resolver(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.identity = Some(resolver);
        self
    }

    pub fn build(self) -> Result<Tracker> {
        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => Catalog::builder().build()?,
        };
        let validator = RecordValidator::new(
            Arc::new(catalog),
            self.config.allow_unknown_properties,
        );

        let mock = self.config.token.is_none() && self.primary.is_none();
        let token = self
            .config
            .token
            .clone()
            .unwrap_or_else(|| MOCK_TOKEN.to_string());

        let mut primary_recorder = None;
        let primary: Arc<dyn Sender> = match self.primary {
            Some(sender) => sender,
            None if mock => {
                let recorder = RecordingSender::new();
                primary_recorder = Some(recorder.clone());
                Arc::new(recorder)
            }
            None => Arc::new(MixpanelSender::new()),
        };

        let mut secondary_recorder = None;
        let secondary: Option<Arc<dyn Sender>> = match self.secondary {
            Some(sender) => Some(sender),
            None => self.config.customerio.clone().map(|cio| {
                if mock {
                    let recorder = RecordingSender::new();
                    secondary_recorder = Some(recorder.clone());
                    Arc::new(recorder.clone()) as Arc<dyn Sender>
                } else {
                    Arc::new(CustomerIoSender::new(cio)) as Arc<dyn Sender>
                }
            }),
        };

        info!(
            primary = primary.name(),
            secondary = secondary.as_ref().map(|s| s.name()),
            catalog_entries = validator.catalog().len(),
            allow_unknown_properties = self.config.allow_unknown_properties,
            "Analytics configured"
        );
        if mock {
            warn!("Analytics is in mock mode, no messages will be sent!");
        }

        Ok(Tracker {
            inner: Arc::new(TrackerInner {
                token,
                mock,
                validator,
                primary,
                secondary,
                primary_recorder,
                secondary_recorder,
                identity: self.identity,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CustomerIoConfig, Region};

    #[test]
    fn test_missing_token_builds_mock_tracker() {
        let tracker = Tracker::builder(AnalyticsConfig::default()).build().unwrap();

        assert!(tracker.is_mock());
        assert!(tracker.primary_recorder().is_some());
        assert!(tracker.secondary_recorder().is_none());
    }

    #[test]
    fn test_token_builds_live_tracker() {
        let config = AnalyticsConfig {
            token: Some("tok-123".to_string()),
            ..Default::default()
        };
        let tracker = Tracker::builder(config).build().unwrap();

        assert!(!tracker.is_mock());
        assert!(tracker.primary_recorder().is_none());
    }

    #[test]
    fn test_mock_mode_records_secondary_too() {
        let config = AnalyticsConfig {
            customerio: Some(CustomerIoConfig {
                site_id: "site".to_string(),
                api_key: "key".to_string(),
                region: Region::Us,
            }),
            ..Default::default()
        };
        let tracker = Tracker::builder(config).build().unwrap();

        assert!(tracker.is_mock());
        assert!(tracker.secondary_recorder().is_some());
    }

    #[test]
    fn test_custom_sender_disables_mock_mode() {
        let sender = RecordingSender::new();
        let tracker = Tracker::builder(AnalyticsConfig::default())
            .with_primary_sender(Arc::new(sender))
            .build()
            .unwrap();

        assert!(!tracker.is_mock());
    }
}
