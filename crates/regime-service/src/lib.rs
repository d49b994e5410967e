// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod guard;
pub mod idempotency;
pub mod pending;
pub mod registry;
pub mod snapshot;
pub mod state;

pub use api::{
    MatchedBy, PredictCommand, PredictRequest, PredictResponse, RequestMeta, TruthCommand,
    TruthKey, TruthRequest, TruthResponse, TruthStatus,
};
pub use config::{
    DEFAULT_SERIES_ID, GuardConfig, RateLimitConfig, ServiceConfig, TruthMatching,
};
pub use guard::RequestGuard;
pub use idempotency::{CacheVerdict, IdempotencyCache};
pub use pending::{EvictedPending, PendingIndex, PendingKey, PendingRecord};
pub use registry::{SeriesHandle, SeriesRegistry};
pub use snapshot::{DEFAULT_SNAPSHOT_KEEP, SnapshotStore};
pub use state::{
    EarlyTruth, SERVICE_SNAPSHOT_KIND, SERVICE_SNAPSHOT_SCHEMA_VERSION, SeriesSnapshot,
    ServiceSnapshot, ServiceState, ServiceStats,
};
