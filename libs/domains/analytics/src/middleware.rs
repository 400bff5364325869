//! Request lifecycle binding for axum.
//!
//! The middleware attaches one [`Analytics`] handle to each request and
//! settles it after the handler returns: flush when the request ended
//! successfully, discard otherwise. The underlying session is created
//! lazily, so requests that never touch analytics cost nothing, and it is
//! taken out of the handle before settling, so flush can run at most once
//! per request even if the middleware is layered twice by mistake.
//!
//! ```rust,ignore
//! use axum::{middleware, routing::get, Extension, Router};
//! use domain_analytics::{analytics_middleware, Analytics, Tracker};
//!
//! async fn signup(Extension(analytics): Extension<Analytics>) -> &'static str {
//!     analytics.track("Signed Up", Default::default()).unwrap();
//!     "ok"
//! }
//!
//! let tracker = Tracker::from_env().unwrap();
//! let app: Router = Router::new()
//!     .route("/signup", get(signup))
//!     .layer(middleware::from_fn_with_state(tracker, analytics_middleware));
//! ```

use crate::catalog::Catalog;
use crate::error::Result;
use crate::models::{FlushReport, Properties, TrackOptions};
use crate::session::{AnalyticsSession, SessionState};
use crate::tracker::Tracker;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Headers with this prefix seed global event properties for the request.
/// `X-Analytics-Title: Home` sets the `Title` property on every event
/// tracked while handling the request.
pub const GLOBAL_PROPERTY_HEADER_PREFIX: &str = "x-analytics-";

/// Reads an authenticated identity's stable id from the request, if present,
/// to seed the session's distinct id.
pub trait IdentityResolver: Send + Sync {
    fn distinct_id(&self, request: &Request) -> Option<String>;
}

impl<F> IdentityResolver for F
where
    F: Fn(&Request) -> Option<String> + Send + Sync,
{
    fn distinct_id(&self, request: &Request) -> Option<String> {
        self(request)
    }
}

struct HandleState {
    tracker: Tracker,
    seed_distinct_id: Option<String>,
    seed_global_properties: Vec<(String, Value)>,
    session: Option<AnalyticsSession>,
}

/// Request-scoped analytics handle, retrieved by handlers through
/// `Extension<Analytics>`.
///
/// Clones share one session. The session is constructed on first use; a
/// request that never calls an operation leaves no trace.
#[derive(Clone)]
pub struct Analytics {
    inner: Arc<Mutex<HandleState>>,
}

impl Analytics {
    pub(crate) fn new(
        tracker: Tracker,
        seed_distinct_id: Option<String>,
        seed_global_properties: Vec<(String, Value)>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HandleState {
                tracker,
                seed_distinct_id,
                seed_global_properties,
                session: None,
            })),
        }
    }

    /// Track an event.
    pub fn track(&self, event: &str, properties: Properties) -> Result<()> {
        self.with_session(|session| session.track(event, properties))
    }

    /// Track an event with per-call options.
    pub fn track_with(
        &self,
        event: &str,
        properties: Properties,
        options: TrackOptions,
    ) -> Result<()> {
        self.with_session(|session| session.track_with(event, properties, options))
    }

    /// Set profile properties.
    pub fn profile_set(&self, properties: Properties, meta: Properties) -> Result<()> {
        self.with_session(|session| session.profile_set(properties, meta))
    }

    /// `profile_set` with per-call options.
    pub fn profile_set_with(
        &self,
        properties: Properties,
        meta: Properties,
        options: TrackOptions,
    ) -> Result<()> {
        self.with_session(|session| session.profile_set_with(properties, meta, options))
    }

    /// Set profile properties only where currently unset.
    pub fn profile_set_once(&self, properties: Properties, meta: Properties) -> Result<()> {
        self.with_session(|session| session.profile_set_once(properties, meta))
    }

    /// Append values to list-valued profile properties.
    pub fn profile_append(&self, properties: Properties, meta: Properties) -> Result<()> {
        self.with_session(|session| session.profile_append(properties, meta))
    }

    /// Merge list values into list-valued profile properties.
    pub fn profile_union(&self, properties: Properties, meta: Properties) -> Result<()> {
        self.with_session(|session| session.profile_union(properties, meta))
    }

    /// Apply numeric deltas to profile properties.
    pub fn profile_increment(&self, properties: Properties) -> Result<()> {
        self.with_session(|session| session.profile_increment(properties))
    }

    /// Record a charge on the profile's transaction history.
    pub fn profile_track_charge(&self, amount: f64, properties: Properties) -> Result<()> {
        self.with_session(|session| session.profile_track_charge(amount, properties))
    }

    /// Override the session's distinct id for subsequent operations.
    pub fn set_distinct_id(&self, distinct_id: impl Into<String>) {
        self.with_session(|session| session.set_distinct_id(distinct_id))
    }

    /// Current session state, `None` when no operation has run yet.
    pub fn state(&self) -> Option<SessionState> {
        let state = self.inner.lock().expect("analytics handle poisoned");
        state.session.as_ref().map(AnalyticsSession::state)
    }

    fn with_session<T>(&self, f: impl FnOnce(&mut AnalyticsSession) -> T) -> T {
        let mut state = self.inner.lock().expect("analytics handle poisoned");
        if state.session.is_none() {
            let mut session = state
                .tracker
                .session_with_distinct_id(state.seed_distinct_id.clone());
            for (name, value) in state.seed_global_properties.drain(..) {
                session.set_global_event_property(name, value);
            }
            debug!("Analytics session created");
            state.session = Some(session);
        }
        f(state.session.as_mut().expect("session just initialized"))
    }

    /// Settle the session at end of request: flush on success, discard on
    /// failure. Taking the session out of the handle makes this a no-op for
    /// an untouched request and for any repeated call.
    pub(crate) async fn finish(&self, success: bool) -> Option<FlushReport> {
        let session = {
            let mut state = self.inner.lock().expect("analytics handle poisoned");
            state.session.take()
        };
        let Some(mut session) = session else {
            return None;
        };

        if success {
            match session.flush().await {
                Ok(report) => Some(report),
                Err(err) => {
                    error!(error = %err, "Analytics flush rejected");
                    None
                }
            }
        } else {
            info!(queued = session.queued(), "Request failed, analytics discarded");
            if let Err(err) = session.discard() {
                error!(error = %err, "Analytics discard rejected");
            }
            None
        }
    }
}

/// Lifecycle middleware. Layer with
/// `middleware::from_fn_with_state(tracker, analytics_middleware)`.
pub async fn analytics_middleware(
    State(tracker): State<Tracker>,
    mut request: Request,
    next: Next,
) -> Response {
    // Nested layering would create a second session for the same request;
    // the innermost instance wins and the rest pass through.
    if request.extensions().get::<Analytics>().is_some() {
        return next.run(request).await;
    }

    let distinct_id = tracker.resolve_identity(&request);
    let seed_globals = seed_global_properties(tracker.catalog(), request.headers());
    let analytics = Analytics::new(tracker, distinct_id, seed_globals);
    request.extensions_mut().insert(analytics.clone());

    let response = next.run(request).await;

    let success = !response.status().is_server_error();
    analytics.finish(success).await;
    response
}

/// Collect global event properties from `X-Analytics-*` headers. Names that
/// are not in the event property catalog are logged and skipped.
fn seed_global_properties(catalog: &Catalog, headers: &HeaderMap) -> Vec<(String, Value)> {
    let mut seeded = Vec::new();
    for (name, value) in headers {
        let Some(property_name) = name.as_str().strip_prefix(GLOBAL_PROPERTY_HEADER_PREFIX)
        else {
            continue;
        };
        let Ok(text) = value.to_str() else {
            warn!(header = %name, "Ignoring non-text analytics header value");
            continue;
        };
        match catalog.event_property_ci(property_name) {
            Some(def) => seeded.push((def.name.clone(), json!(text))),
            None => warn!(
                property = property_name,
                "Header property is not a member of the event property catalog"
            ),
        }
    }
    seeded
}
