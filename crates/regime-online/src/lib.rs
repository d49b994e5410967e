// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod bocpd;
pub mod checkpoint;
pub mod config;
pub mod conformal;
pub mod features;
pub mod models;
pub mod pipeline;
pub mod router;

pub use bocpd::{
    AlertPolicy, AlertState, BOCPD_DETECTOR_ID, BOCPD_STATE_SCHEMA_VERSION, BocpdConfig,
    BocpdDetector, BocpdState, ConstantHazard, GaussianNigPrior, GeometricHazard, HazardFunction,
    HazardSpec, NigPosterior,
};
pub use checkpoint::{
    CheckpointEnvelope, PayloadCodec, decode_checkpoint_envelope, encode_checkpoint_envelope,
    load_pipeline_checkpoint, load_pipeline_checkpoint_file, load_state_from_checkpoint_envelope,
    load_state_from_checkpoint_file, save_pipeline_checkpoint, save_pipeline_checkpoint_file,
    save_state_to_checkpoint_envelope, save_state_to_checkpoint_file, write_file_atomic,
};
pub use config::{DEFAULT_PENDING_CAP, EngineConfig};
pub use conformal::{
    ConformalConfig, ConformalState, IntervalBand, IntervalSet, OnlineConformal, ResidualBuffer,
    alpha_key,
};
pub use features::{FeatureConfig, FeatureExtractor, FeatureSnapshot, FeatureState};
pub use models::{
    AutoregressiveConfig, Capabilities, EwmaConfig, ForecastModel, GradientConfig, Model,
    ModelConfig, ModelKind, ModelPlan,
};
pub use pipeline::{
    PendingForecast, Pipeline, PipelineOutput, PipelineState, StageLatencies, TickRecord,
    TruthApplied, TruthOutcome,
};
pub use router::{RouteDecision, Router, RouterConfig, RouterState};
