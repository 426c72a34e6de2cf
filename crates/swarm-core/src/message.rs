//! The wire envelope: `{type, data, node_id}` frames exchanged with the
//! coordinator. Payload shape is type-specific and validated lazily by the
//! accessor that needs it, never at deserialization time — a frame with an
//! unexpected or missing payload field is a protocol error to be logged and
//! ignored (§7), not a reason to fail parsing the envelope itself.

use serde::{Deserialize, Serialize};

use crate::error::SwarmError;

/// Recognized inbound and outbound frame types (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    /// Inbound: begin hatching `num_clients` virtual clients at `hatch_rate`.
    Hatch,
    /// Inbound: quiesce the pool and return to READY.
    Stop,
    /// Inbound: terminate the process.
    Quit,
    /// Outbound: announce readiness (initial connect or after a stop).
    ClientReady,
    /// Outbound: acknowledge a stop.
    ClientStopped,
    /// Outbound: hatching has begun.
    Hatching,
    /// Outbound: hatching has finished; `data.count` holds the final count.
    HatchComplete,
    /// Outbound: a periodic stats snapshot.
    Stats,
    /// Outbound: periodic liveness signal.
    Heartbeat,
}

/// One message frame: a typed tag, an optional payload, and the sending
/// node's identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub node_id: String,
}

/// Parsed payload of an inbound `hatch` frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HatchParams {
    pub hatch_rate: f64,
    pub num_clients: u64,
}

impl Frame {
    pub fn new(frame_type: FrameType, data: Option<serde_json::Value>, node_id: &str) -> Self {
        Self {
            frame_type,
            data,
            node_id: node_id.to_string(),
        }
    }

    pub fn client_ready(node_id: &str) -> Self {
        Self::new(FrameType::ClientReady, None, node_id)
    }

    pub fn client_stopped(node_id: &str) -> Self {
        Self::new(FrameType::ClientStopped, None, node_id)
    }

    pub fn hatching(node_id: &str) -> Self {
        Self::new(FrameType::Hatching, None, node_id)
    }

    pub fn hatch_complete(node_id: &str, count: u64) -> Self {
        Self::new(
            FrameType::HatchComplete,
            Some(serde_json::json!({ "count": count })),
            node_id,
        )
    }

    pub fn quit(node_id: &str) -> Self {
        Self::new(FrameType::Quit, None, node_id)
    }

    pub fn heartbeat(node_id: &str) -> Self {
        Self::new(FrameType::Heartbeat, None, node_id)
    }

    pub fn stats(node_id: &str, data: serde_json::Value) -> Self {
        Self::new(FrameType::Stats, Some(data), node_id)
    }

    /// Extract and validate `hatch_rate`/`num_clients` from a `hatch` frame.
    ///
    /// Returns `SwarmError::Protocol` when the frame is not a `hatch` frame,
    /// or required fields are missing/invalid — the runner logs and ignores
    /// the frame on this error rather than propagating it (§7).
    pub fn hatch_params(&self) -> Result<HatchParams, SwarmError> {
        if self.frame_type != FrameType::Hatch {
            return Err(SwarmError::Protocol(format!(
                "expected hatch frame, got {:?}",
                self.frame_type
            )));
        }
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| SwarmError::Protocol("hatch frame missing data".to_string()))?;
        let hatch_rate = data
            .get("hatch_rate")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| SwarmError::Protocol("hatch frame missing hatch_rate".to_string()))?;
        let num_clients = data
            .get("num_clients")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| SwarmError::Protocol("hatch frame missing num_clients".to_string()))?;
        Ok(HatchParams {
            hatch_rate,
            num_clients,
        })
    }
}
