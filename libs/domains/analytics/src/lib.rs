//! Analytics Domain
//!
//! Request-scoped analytics tracking with:
//! - a static schema catalog so only agreed-upon event and property names
//!   ever leave the application
//! - per-request buffering with deferred delivery: nothing is sent until
//!   the request has succeeded, and delivery failures never fail the request
//! - optional replication of selected operations to Customer.io
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Request Flow                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  handler ── track / profile_* ──► Validator ──► Session      │
//! │                                   (catalog)     buffers      │
//! │                                                   │          │
//! │  response ── success? ──► flush ──┬─► Mixpanel (primary)     │
//! │              failure? ──► discard └─► Customer.io (mirror)   │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! With no token configured the tracker runs in mock mode: messages are
//! recorded in an inspectable in-memory list and nothing touches the
//! network.

mod catalog;
mod config;
mod consumer;
mod customerio;
mod error;
mod middleware;
mod models;
mod query;
mod session;
mod tracker;
mod validator;

pub use catalog::{Catalog, CatalogBuilder, Category, DataType, PropertyDef};
pub use config::{AnalyticsConfig, CustomerIoConfig, Region};
pub use consumer::{
    BufferedConsumer, MixpanelSender, RecordingSender, Sender, MAX_BATCH_SIZE,
};
pub use customerio::CustomerIoSender;
pub use error::{
    AnalyticsError, DeliveryError, LifecycleError, QueryError, Result, SchemaError,
};
pub use middleware::{
    analytics_middleware, Analytics, IdentityResolver, GLOBAL_PROPERTY_HEADER_PREFIX,
};
pub use models::{
    Endpoint, FlushReport, FlushResult, Message, ProfileOpKind, Properties, TrackOptions,
};
pub use query::{AnalyticsQuery, ProfileMatch};
pub use session::{AnalyticsSession, SessionState};
pub use tracker::{Tracker, TrackerBuilder};
pub use validator::{RecordValidator, ValidatedEvent, ValidatedProfileOp, DATE_FORMAT};
