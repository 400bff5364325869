//! Secondary (replication) backend: Customer.io.
//!
//! Selected operations are mirrored here in addition to the primary backend.
//! Customer.io speaks a different dialect: no `$` prefixes, per-customer
//! REST calls instead of batches, and epoch-seconds dates where the primary
//! uses date strings, so mirrored payloads are translated before they are
//! queued.

use crate::catalog::{Catalog, DataType};
use crate::config::CustomerIoConfig;
use crate::consumer::Sender;
use crate::error::DeliveryError;
use crate::models::{Endpoint, Message};
use crate::validator::{date_to_unix_seconds, ValidatedEvent, ValidatedProfileOp};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

/// Live sender for the Customer.io track API.
pub struct CustomerIoSender {
    client: reqwest::Client,
    site_id: String,
    api_key: String,
    api_base: String,
}

impl CustomerIoSender {
    pub fn new(config: CustomerIoConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            site_id: config.site_id,
            api_key: config.api_key,
            api_base: config.region.api_base().to_string(),
        }
    }

    /// Point the sender at a different host, e.g. a local stub in tests.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn send_one(&self, message: &Message) -> Result<(), DeliveryError> {
        let request = match message.endpoint {
            Endpoint::Events => self
                .client
                .post(format!(
                    "{}/api/v1/customers/{}/events",
                    self.api_base, message.distinct_id
                ))
                .json(&message.payload),
            Endpoint::People => self
                .client
                .put(format!(
                    "{}/api/v1/customers/{}",
                    self.api_base, message.distinct_id
                ))
                .json(&message.payload),
        };

        let response = request
            .basic_auth(&self.site_id, Some(&self.api_key))
            .send()
            .await
            .map_err(|e| DeliveryError::Transport {
                backend: self.name(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                backend: self.name(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Sender for CustomerIoSender {
    /// The track API has no batch endpoint; messages are delivered one
    /// request at a time, stopping at the first failure.
    async fn send_batch(&self, _endpoint: Endpoint, batch: &[Message]) -> Result<(), DeliveryError> {
        for message in batch {
            self.send_one(message).await?;
        }
        info!(count = batch.len(), "Batch accepted by Customer.io");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "customerio"
    }
}

/// Build the mirrored message for a tracked event.
pub(crate) fn mirror_track(event: &ValidatedEvent, distinct_id: &str, catalog: &Catalog) -> Message {
    let mut data = Map::new();
    for (key, value) in &event.properties {
        let data_type = catalog.event_property(key).map(|def| def.data_type);
        let (key, value) = translate_attribute(key, value, data_type);
        data.insert(key, value);
    }

    Message {
        endpoint: Endpoint::Events,
        distinct_id: distinct_id.to_string(),
        payload: json!({
            "name": event.name,
            "data": Value::Object(data),
        }),
    }
}

/// Build the mirrored message for a profile `set`.
pub(crate) fn mirror_profile_set(op: &ValidatedProfileOp, catalog: &Catalog) -> Message {
    let mut attributes = Map::new();
    for (key, value) in &op.properties {
        let data_type = catalog.profile_property(key).map(|def| def.data_type);
        let (key, value) = translate_attribute(key, value, data_type);
        attributes.insert(key, value);
    }
    for (key, value) in &op.meta {
        let data_type = catalog.meta_property(key).map(|def| def.data_type);
        let (key, value) = translate_attribute(key, value, data_type);
        attributes.insert(key, value);
    }

    Message {
        endpoint: Endpoint::People,
        distinct_id: op.distinct_id.clone(),
        payload: Value::Object(attributes),
    }
}

/// Translate one attribute into Customer.io's dialect: strip the reserved
/// `$` prefix, map `$created` onto the reserved `created_at` attribute, and
/// convert date-typed values to unix seconds.
fn translate_attribute(key: &str, value: &Value, data_type: Option<DataType>) -> (String, Value) {
    let translated_key = if key == "$created" {
        "created_at".to_string()
    } else {
        key.replace('$', "")
    };

    let translated_value = if data_type == Some(DataType::DateTime) {
        date_to_unix_seconds(value)
            .map(|secs| json!(secs))
            .unwrap_or_else(|| value.clone())
    } else {
        value.clone()
    };

    (translated_key, translated_value)
}
