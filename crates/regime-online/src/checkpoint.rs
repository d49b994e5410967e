// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::pipeline::{
    PIPELINE_STATE_KIND, PIPELINE_STATE_SCHEMA_VERSION, Pipeline, PipelineState,
};
use regime_core::RegimeError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current envelope schema version emitted by writers.
pub const CURRENT_CHECKPOINT_SCHEMA_VERSION: u32 = 1;
/// Oldest envelope schema version accepted by readers.
pub const MIN_SUPPORTED_CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// Supported codec for state payload bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadCodec {
    #[default]
    Json,
    Bincode,
}

impl PayloadCodec {
    pub fn parse(raw: &str) -> Result<Self, RegimeError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "bincode" => Ok(Self::Bincode),
            other => Err(RegimeError::invalid_input(format!(
                "payload codec '{other}' is unsupported; expected one of: json, bincode"
            ))),
        }
    }
}

/// Checksummed wrapper around a serialized state payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEnvelope {
    /// What the payload holds, e.g. `pipeline` or `service`.
    pub kind: String,
    pub state_schema_version: u32,
    pub engine_fingerprint: String,
    pub created_at_ns: i64,
    pub payload_crc32: u32,
    pub payload_codec: PayloadCodec,
    pub payload: Vec<u8>,
}

impl CheckpointEnvelope {
    fn validate_metadata(&self) -> Result<(), RegimeError> {
        if self.kind.trim().is_empty() {
            return Err(RegimeError::invalid_input("checkpoint kind must be non-empty"));
        }
        if self.engine_fingerprint.trim().is_empty() {
            return Err(RegimeError::invalid_input(
                "checkpoint engine_fingerprint must be non-empty",
            ));
        }
        if self.created_at_ns < 0 {
            return Err(RegimeError::invalid_input(format!(
                "checkpoint created_at_ns must be >= 0; got {}",
                self.created_at_ns
            )));
        }
        validate_checkpoint_state_schema_version(self.state_schema_version)
    }

    fn verify_payload_crc32(&self) -> Result<(), RegimeError> {
        let observed = crc32fast::hash(&self.payload);
        if observed != self.payload_crc32 {
            return Err(RegimeError::invalid_input(format!(
                "checkpoint payload crc32 mismatch: expected=0x{:08x}, observed=0x{:08x}",
                self.payload_crc32, observed
            )));
        }
        Ok(())
    }
}

fn checkpoint_engine_fingerprint() -> String {
    format!(
        "regime-online/{}/{}-{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

fn now_unix_ns() -> Result<i64, RegimeError> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| {
            RegimeError::resource_limit(format!(
                "system clock before UNIX epoch; cannot timestamp checkpoint: {err}"
            ))
        })?;
    i64::try_from(elapsed.as_nanos()).map_err(|_| {
        RegimeError::resource_limit("system timestamp overflow while constructing checkpoint")
    })
}

fn io_resource_error(action: &str, path: &Path, err: std::io::Error) -> RegimeError {
    RegimeError::resource_limit(format!("{action} '{}': {err}", path.display()))
}

fn serialize_state_payload<State: Serialize>(
    state: &State,
    payload_codec: PayloadCodec,
) -> Result<Vec<u8>, RegimeError> {
    match payload_codec {
        PayloadCodec::Json => serde_json::to_vec(state).map_err(|err| {
            RegimeError::invalid_input(format!(
                "checkpoint payload serialization failed (codec=json): {err}"
            ))
        }),
        PayloadCodec::Bincode => bincode::serialize(state).map_err(|err| {
            RegimeError::invalid_input(format!(
                "checkpoint payload serialization failed (codec=bincode): {err}"
            ))
        }),
    }
}

fn deserialize_state_payload<State: DeserializeOwned>(
    payload: &[u8],
    payload_codec: PayloadCodec,
) -> Result<State, RegimeError> {
    match payload_codec {
        PayloadCodec::Json => serde_json::from_slice(payload).map_err(|err| {
            RegimeError::invalid_input(format!(
                "checkpoint payload deserialization failed (codec=json): {err}"
            ))
        }),
        PayloadCodec::Bincode => bincode::deserialize(payload).map_err(|err| {
            RegimeError::invalid_input(format!(
                "checkpoint payload deserialization failed (codec=bincode): {err}"
            ))
        }),
    }
}

/// Writes `encoded` to `path` via temp file, fsync and rename.
pub fn write_file_atomic(path: &Path, encoded: &[u8]) -> Result<(), RegimeError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().ok_or_else(|| {
        RegimeError::invalid_input(format!(
            "checkpoint path '{}' must include a file name",
            path.display()
        ))
    })?;
    let file_name = file_name.to_string_lossy();

    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let temp_path = parent.join(format!("{file_name}.tmp-{}-{suffix}", process::id()));

    let mut file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .map_err(|err| {
            io_resource_error("failed creating checkpoint temp file", &temp_path, err)
        })?;

    if let Err(err) = file.write_all(encoded) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_resource_error(
            "failed writing checkpoint temp file",
            &temp_path,
            err,
        ));
    }

    if let Err(err) = file.sync_all() {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_resource_error(
            "failed fsync on checkpoint temp file",
            &temp_path,
            err,
        ));
    }

    if let Err(err) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_resource_error(
            "failed renaming checkpoint temp file",
            path,
            err,
        ));
    }

    Ok(())
}

pub fn validate_checkpoint_state_schema_version(
    state_schema_version: u32,
) -> Result<(), RegimeError> {
    if (MIN_SUPPORTED_CHECKPOINT_SCHEMA_VERSION..=CURRENT_CHECKPOINT_SCHEMA_VERSION)
        .contains(&state_schema_version)
    {
        return Ok(());
    }

    Err(RegimeError::invalid_input(format!(
        "checkpoint state_schema_version={} is unsupported; supported versions are {}..={}",
        state_schema_version,
        MIN_SUPPORTED_CHECKPOINT_SCHEMA_VERSION,
        CURRENT_CHECKPOINT_SCHEMA_VERSION,
    )))
}

/// Serializes a checkpoint envelope to JSON bytes.
pub fn encode_checkpoint_envelope(envelope: &CheckpointEnvelope) -> Result<Vec<u8>, RegimeError> {
    envelope.validate_metadata()?;
    envelope.verify_payload_crc32()?;
    serde_json::to_vec(envelope).map_err(|err| {
        RegimeError::invalid_input(format!("checkpoint envelope serialization failed: {err}"))
    })
}

/// Parses envelope JSON bytes and verifies metadata and checksum.
pub fn decode_checkpoint_envelope(encoded: &[u8]) -> Result<CheckpointEnvelope, RegimeError> {
    let envelope: CheckpointEnvelope = serde_json::from_slice(encoded).map_err(|err| {
        RegimeError::invalid_input(format!("checkpoint envelope JSON parse failed: {err}"))
    })?;
    envelope.validate_metadata()?;
    envelope.verify_payload_crc32()?;
    Ok(envelope)
}

pub fn save_state_to_checkpoint_envelope<State: Serialize>(
    kind: &str,
    state_schema_version: u32,
    state: &State,
    payload_codec: PayloadCodec,
) -> Result<CheckpointEnvelope, RegimeError> {
    if kind.trim().is_empty() {
        return Err(RegimeError::invalid_input("checkpoint kind must be non-empty"));
    }
    validate_checkpoint_state_schema_version(state_schema_version)?;

    let payload = serialize_state_payload(state, payload_codec)?;
    let envelope = CheckpointEnvelope {
        kind: kind.to_string(),
        state_schema_version,
        engine_fingerprint: checkpoint_engine_fingerprint(),
        created_at_ns: now_unix_ns()?,
        payload_crc32: crc32fast::hash(&payload),
        payload_codec,
        payload,
    };
    envelope.validate_metadata()?;
    Ok(envelope)
}

/// Decodes the payload after compatibility, checksum and kind checks.
pub fn load_state_from_checkpoint_envelope<State: DeserializeOwned>(
    envelope: &CheckpointEnvelope,
    expected_kind: &str,
) -> Result<State, RegimeError> {
    envelope.validate_metadata()?;
    envelope.verify_payload_crc32()?;
    if envelope.kind != expected_kind {
        return Err(RegimeError::invalid_input(format!(
            "checkpoint kind mismatch: expected='{}', found='{}'",
            expected_kind, envelope.kind
        )));
    }
    deserialize_state_payload(&envelope.payload, envelope.payload_codec)
}

/// Saves state to `path` using atomic persistence (tmp + fsync + rename).
pub fn save_state_to_checkpoint_file<State: Serialize>(
    path: impl AsRef<Path>,
    kind: &str,
    state_schema_version: u32,
    state: &State,
    payload_codec: PayloadCodec,
) -> Result<CheckpointEnvelope, RegimeError> {
    let path = path.as_ref();
    let envelope =
        save_state_to_checkpoint_envelope(kind, state_schema_version, state, payload_codec)?;
    let encoded = encode_checkpoint_envelope(&envelope)?;
    write_file_atomic(path, &encoded)?;
    Ok(envelope)
}

pub fn load_state_from_checkpoint_file<State: DeserializeOwned>(
    path: impl AsRef<Path>,
    expected_kind: &str,
) -> Result<State, RegimeError> {
    let path = path.as_ref();
    let encoded = std::fs::read(path)
        .map_err(|err| io_resource_error("failed reading checkpoint file", path, err))?;
    let envelope = decode_checkpoint_envelope(&encoded)?;
    load_state_from_checkpoint_envelope(&envelope, expected_kind)
}

pub fn save_pipeline_checkpoint(
    pipeline: &Pipeline,
    payload_codec: PayloadCodec,
) -> Result<CheckpointEnvelope, RegimeError> {
    save_state_to_checkpoint_envelope(
        PIPELINE_STATE_KIND,
        PIPELINE_STATE_SCHEMA_VERSION,
        &pipeline.save_state(),
        payload_codec,
    )
}

/// Restores a pipeline from an envelope; the pipeline is untouched on error.
pub fn load_pipeline_checkpoint(
    pipeline: &mut Pipeline,
    envelope: &CheckpointEnvelope,
) -> Result<(), RegimeError> {
    let state: PipelineState = load_state_from_checkpoint_envelope(envelope, PIPELINE_STATE_KIND)?;
    pipeline.load_state(&state)
}

pub fn save_pipeline_checkpoint_file(
    pipeline: &Pipeline,
    path: impl AsRef<Path>,
    payload_codec: PayloadCodec,
) -> Result<CheckpointEnvelope, RegimeError> {
    save_state_to_checkpoint_file(
        path,
        PIPELINE_STATE_KIND,
        PIPELINE_STATE_SCHEMA_VERSION,
        &pipeline.save_state(),
        payload_codec,
    )
}

pub fn load_pipeline_checkpoint_file(
    pipeline: &mut Pipeline,
    path: impl AsRef<Path>,
) -> Result<(), RegimeError> {
    let state: PipelineState = load_state_from_checkpoint_file(path, PIPELINE_STATE_KIND)?;
    pipeline.load_state(&state)
}
