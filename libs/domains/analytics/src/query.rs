//! Read-only analytics querying.
//!
//! A thin client for the JQL endpoint, separate from the tracking path. You
//! can run raw scripts with [`AnalyticsQuery::jql`] or use the pre-built
//! lookups below.

use crate::config::AnalyticsConfig;
use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

const JQL_ENDPOINT: &str = "https://mixpanel.com/api/2.0/jql";

/// A profile row returned by [`AnalyticsQuery::profile_by_email`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMatch {
    pub distinct_id: String,
    pub email: String,
}

/// Query client authenticated with the project's api secret.
#[derive(Debug)]
pub struct AnalyticsQuery {
    client: reqwest::Client,
    api_secret: String,
    endpoint: String,
}

impl AnalyticsQuery {
    pub fn new(api_secret: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_secret: api_secret.into(),
            endpoint: JQL_ENDPOINT.to_string(),
        }
    }

    /// Build from configuration; fails when no api secret is configured.
    pub fn from_config(config: &AnalyticsConfig) -> Result<Self, QueryError> {
        config
            .api_secret
            .as_ref()
            .map(Self::new)
            .ok_or(QueryError::MissingApiSecret)
    }

    /// Point the client at a different endpoint, e.g. a local stub in tests.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Run a JQL script and return the result rows.
    #[instrument(skip(self, script))]
    pub async fn jql(&self, script: &str) -> Result<Vec<Value>, QueryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.api_secret, Some(""))
            .form(&[("script", script)])
            .send()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| QueryError::Parse(e.to_string()))
    }

    /// Look up a profile by email.
    ///
    /// Returns `None` when no profile matches. More than one match is an
    /// error carrying every match: acting on an arbitrary profile would
    /// corrupt analytics for the wrong user.
    #[instrument(skip(self))]
    pub async fn profile_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ProfileMatch>, QueryError> {
        let script = profile_by_email_script(email);
        let rows = self.jql(&script).await?;

        let matches = rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<ProfileMatch>, _>>()
            .map_err(|e| QueryError::Parse(e.to_string()))?;

        single_match(email, matches)
    }
}

fn profile_by_email_script(email: &str) -> String {
    format!(
        r#"
        function main() {{
          return People(
          )
          .filter(function(profile) {{
            return profile.properties.$email == '{email}';
          }})
          .map(function(profile) {{
            return {{
              distinct_id: profile.distinct_id,
              email: profile.properties.$email,
            }};
          }});
        }}
        "#,
        email = email.replace('\'', "\\'")
    )
}

fn single_match(
    email: &str,
    matches: Vec<ProfileMatch>,
) -> Result<Option<ProfileMatch>, QueryError> {
    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.into_iter().next()),
        _ => Err(QueryError::MultipleProfilesFound {
            email: email.to_string(),
            matches,
        }),
    }
}
