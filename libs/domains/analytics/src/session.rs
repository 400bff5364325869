//! Per-request buffering session.
//!
//! An [`AnalyticsSession`] accumulates validated track events and profile
//! operations for exactly one request. Nothing touches the network until
//! `flush()`, which the lifecycle binder calls once after the request
//! succeeded; a failed request gets `discard()` instead and the buffered
//! operations are dropped. A session that reached either terminal state
//! refuses all further use — that is an integration bug, not a runtime
//! condition.

use crate::consumer::BufferedConsumer;
use crate::customerio;
use crate::error::{LifecycleError, Result, SchemaError};
use crate::models::{
    Endpoint, FlushReport, Message, ProfileOpKind, Properties, TrackOptions,
};
use crate::validator::{RecordValidator, ValidatedEvent, ValidatedProfileOp};
use chrono::Utc;
use serde_json::{json, Map, Value};
use strum::Display;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Session lifecycle states. `Flushed` and `Discarded` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Fresh,
    Accumulating,
    Flushed,
    Discarded,
}

/// One request's analytics buffer.
pub struct AnalyticsSession {
    state: SessionState,
    token: String,
    distinct_id: Option<String>,
    global_event_properties: Properties,
    validator: RecordValidator,
    primary: BufferedConsumer,
    secondary: Option<BufferedConsumer>,
}

impl AnalyticsSession {
    pub(crate) fn new(
        token: String,
        distinct_id: Option<String>,
        validator: RecordValidator,
        primary: BufferedConsumer,
        secondary: Option<BufferedConsumer>,
    ) -> Self {
        Self {
            state: SessionState::Fresh,
            token,
            distinct_id,
            global_event_properties: Properties::new(),
            validator,
            primary,
            secondary,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn distinct_id(&self) -> Option<&str> {
        self.distinct_id.as_deref()
    }

    /// Override the distinct id. Operations already queued keep the id they
    /// were issued under; only subsequent operations use the new one.
    pub fn set_distinct_id(&mut self, distinct_id: impl Into<String>) {
        self.distinct_id = Some(distinct_id.into());
    }

    /// Set a property that is merged into every event tracked by this
    /// session. Per-call properties win on conflict.
    pub fn set_global_event_property(&mut self, name: impl Into<String>, value: Value) {
        self.global_event_properties.insert(name.into(), value);
    }

    pub fn global_event_properties(&self) -> &Properties {
        &self.global_event_properties
    }

    /// Number of operations queued for the primary backend.
    pub fn queued(&self) -> usize {
        self.primary.len()
    }

    /// Track an event.
    pub fn track(&mut self, event: &str, properties: Properties) -> Result<()> {
        self.track_with(event, properties, TrackOptions::default())
    }

    /// Track an event with per-call options.
    pub fn track_with(
        &mut self,
        event: &str,
        properties: Properties,
        options: TrackOptions,
    ) -> Result<()> {
        self.ensure_active("track")?;
        let distinct_id = self.required_distinct_id()?;

        let mut merged = self.global_event_properties.clone();
        merged.extend(properties);
        let validated = self.validator.validate_event(event, &merged)?;

        let payload = self.event_payload(&distinct_id, &validated);
        self.primary.enqueue(Message {
            endpoint: Endpoint::Events,
            distinct_id: distinct_id.clone(),
            payload,
        });

        // track is on the replication allow-list.
        if !options.skip_replication {
            if let Some(secondary) = &self.secondary {
                secondary.enqueue(customerio::mirror_track(
                    &validated,
                    &distinct_id,
                    self.validator.catalog(),
                ));
            }
        }

        self.state = SessionState::Accumulating;
        debug!(event = %validated.name, distinct_id = %distinct_id, "Event queued");
        Ok(())
    }

    /// Set profile properties, creating the profile if it does not exist.
    ///
    /// Use `meta` to override the backend's special handling, e.g. `$ip` or
    /// `$ignore_time`.
    pub fn profile_set(&mut self, properties: Properties, meta: Properties) -> Result<()> {
        self.profile_set_with(properties, meta, TrackOptions::default())
    }

    /// `profile_set` with per-call options.
    pub fn profile_set_with(
        &mut self,
        properties: Properties,
        meta: Properties,
        options: TrackOptions,
    ) -> Result<()> {
        self.profile_op(ProfileOpKind::Set, "profile_set", properties, meta, options)
    }

    /// Set profile properties only where currently unset.
    pub fn profile_set_once(&mut self, properties: Properties, meta: Properties) -> Result<()> {
        self.profile_op(
            ProfileOpKind::SetOnce,
            "profile_set_once",
            properties,
            meta,
            TrackOptions::default(),
        )
    }

    /// Append values to list-valued profile properties.
    pub fn profile_append(&mut self, properties: Properties, meta: Properties) -> Result<()> {
        self.profile_op(
            ProfileOpKind::Append,
            "profile_append",
            properties,
            meta,
            TrackOptions::default(),
        )
    }

    /// Merge list values into list-valued profile properties, deduplicated.
    pub fn profile_union(&mut self, properties: Properties, meta: Properties) -> Result<()> {
        self.profile_op(
            ProfileOpKind::Union,
            "profile_union",
            properties,
            meta,
            TrackOptions::default(),
        )
    }

    /// Apply numeric deltas to profile properties.
    pub fn profile_increment(&mut self, properties: Properties) -> Result<()> {
        self.profile_op(
            ProfileOpKind::Increment,
            "profile_increment",
            properties,
            Properties::new(),
            TrackOptions::default(),
        )
    }

    /// Record a charge on the profile's transaction history.
    pub fn profile_track_charge(&mut self, amount: f64, properties: Properties) -> Result<()> {
        self.ensure_active("profile_track_charge")?;
        let distinct_id = self.required_distinct_id()?;
        let validated = self.validator.validate_profile_op(
            ProfileOpKind::Append,
            &distinct_id,
            &properties,
            &Properties::new(),
        )?;

        let mut transaction: Map<String, Value> =
            validated.properties.clone().into_iter().collect();
        transaction.insert("$amount".to_string(), json!(amount));

        let mut payload = Map::new();
        payload.insert("$token".to_string(), json!(self.token));
        payload.insert("$distinct_id".to_string(), json!(distinct_id));
        payload.insert(
            "$append".to_string(),
            json!({ "$transactions": Value::Object(transaction) }),
        );

        self.primary.enqueue(Message {
            endpoint: Endpoint::People,
            distinct_id: distinct_id.clone(),
            payload: Value::Object(payload),
        });

        self.state = SessionState::Accumulating;
        debug!(amount, distinct_id = %distinct_id, "Charge queued");
        Ok(())
    }

    /// Flush both backends, primary first. Each backend's outcome is
    /// independent of the other's; delivery failures are absorbed into the
    /// report, never raised. Allowed exactly once.
    #[instrument(skip(self), fields(queued = self.queued()))]
    pub async fn flush(&mut self) -> Result<FlushReport> {
        self.ensure_active("flush")?;
        self.state = SessionState::Flushed;

        let primary = self.primary.flush().await;
        let mut secondary = None;
        if let Some(consumer) = &self.secondary {
            secondary = Some(consumer.flush().await);
        }

        let report = FlushReport { primary, secondary };
        info!(
            sent = report.primary.sent,
            failed = report.primary.failed,
            secondary = ?report.secondary,
            "Session flushed"
        );
        Ok(report)
    }

    /// Drop every queued operation without transmitting. Called when the
    /// request failed.
    pub fn discard(&mut self) -> Result<()> {
        self.ensure_active("discard")?;
        self.state = SessionState::Discarded;

        self.primary.clear();
        if let Some(secondary) = &self.secondary {
            secondary.clear();
        }
        debug!("Session discarded, queued analytics dropped");
        Ok(())
    }

    fn ensure_active(&self, operation: &'static str) -> Result<()> {
        match self.state {
            SessionState::Flushed => Err(LifecycleError::AlreadyFlushed { operation }.into()),
            SessionState::Discarded => Err(LifecycleError::AlreadyDiscarded { operation }.into()),
            SessionState::Fresh | SessionState::Accumulating => Ok(()),
        }
    }

    fn required_distinct_id(&self) -> std::result::Result<String, SchemaError> {
        self.distinct_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or(SchemaError::MissingDistinctId)
    }

    fn event_payload(&self, distinct_id: &str, event: &ValidatedEvent) -> Value {
        let mut properties: Map<String, Value> =
            event.properties.clone().into_iter().collect();
        properties.insert("token".to_string(), json!(self.token));
        properties.insert("distinct_id".to_string(), json!(distinct_id));
        properties.insert("time".to_string(), json!(Utc::now().timestamp()));
        properties.insert(
            "$insert_id".to_string(),
            json!(Uuid::new_v4().to_string()),
        );

        json!({
            "event": event.name,
            "properties": Value::Object(properties),
        })
    }

    fn profile_op(
        &mut self,
        kind: ProfileOpKind,
        operation: &'static str,
        properties: Properties,
        meta: Properties,
        options: TrackOptions,
    ) -> Result<()> {
        self.ensure_active(operation)?;
        let distinct_id = self.required_distinct_id()?;
        let validated =
            self.validator
                .validate_profile_op(kind, &distinct_id, &properties, &meta)?;

        self.primary.enqueue(Message {
            endpoint: Endpoint::People,
            distinct_id: distinct_id.clone(),
            payload: engage_payload(&self.token, &validated),
        });

        // Only profile `set` is on the replication allow-list; append, union,
        // set_once and increment stay primary-only.
        let replicate = kind == ProfileOpKind::Set && !options.skip_replication;
        if replicate {
            if let Some(secondary) = &self.secondary {
                secondary.enqueue(customerio::mirror_profile_set(
                    &validated,
                    self.validator.catalog(),
                ));
            }
        }

        self.state = SessionState::Accumulating;
        debug!(op = %kind, distinct_id = %distinct_id, "Profile operation queued");
        Ok(())
    }
}

fn engage_payload(token: &str, op: &ValidatedProfileOp) -> Value {
    let mut payload = Map::new();
    payload.insert("$token".to_string(), json!(token));
    payload.insert("$distinct_id".to_string(), json!(op.distinct_id));
    for (key, value) in &op.meta {
        payload.insert(key.clone(), value.clone());
    }

    let properties: Map<String, Value> = op.properties.clone().into_iter().collect();
    payload.insert(op.kind.marker().to_string(), Value::Object(properties));
    Value::Object(payload)
}
