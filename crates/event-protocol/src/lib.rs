//! Wire types for the connection/worker message plane.
//!
//! `Event` is the unit of exchange between a [`Connection`] and its
//! handlers; everything else here is the payload shape of the four
//! reserved topics plus the DTOs the admin HTTP surface speaks.
//!
//! [`Connection`]: https://docs.rs/socket-core

use serde::{Deserialize, Serialize};

pub mod topic {
    pub const INIT_ID: &str = "__init_id__";
    pub const HEARTBEAT: &str = "__heartbeat__";
    pub const LOGIN: &str = "__login__";
    pub const CLOSE: &str = "__close__";
}

/// A `{topic, data}` pair, the unit of exchange over a [`Connection`].
///
/// `data` is opaque bytes: already encoded by the codec on the writer side,
/// already decoded on the reader side. Application layers declare concrete
/// payload shapes per topic and parse `data` themselves.
///
/// [`Connection`]: https://docs.rs/socket-core
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub data: Vec<u8>,
}

impl Event {
    pub fn new(topic: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            data,
        }
    }

    pub fn empty(topic: impl Into<String>) -> Self {
        Self::new(topic, Vec::new())
    }
}

/// The externally visible projection of a Connection: `{ID, WorkID}`.
///
/// Field names are capitalized to match the wire-compatible JSON shape
/// (`{"ID": int64, "WorkID": int64}`) carried by the `__init_id__` handshake
/// and by the remote presence store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "WorkID")]
    pub work_id: i64,
}

// ---------------------------------------------------------------------------
// Admin HTTP surface
// ---------------------------------------------------------------------------

/// `POST /v1/send` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct SendRequest {
    pub id: i64,
    pub topic: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Response envelope for both `/v1/find` and `/v1/send`.
///
/// `code = 0` is success; `code = 1` collapses every failure reason into a
/// human-readable `msg`, per the admin surface's reference contract.
#[derive(Debug, Clone, Serialize)]
pub struct AdminEnvelope {
    pub code: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Descriptor>,
    pub msg: String,
}

impl AdminEnvelope {
    pub fn ok(data: Descriptor) -> Self {
        Self {
            code: 0,
            data: Some(data),
            msg: "ok".to_owned(),
        }
    }

    /// Success with no payload, for endpoints whose reference contract omits
    /// `data` entirely (e.g. `/v1/send`'s `{"code":0,"msg":"ok"}`).
    pub fn ok_msg() -> Self {
        Self {
            code: 0,
            data: None,
            msg: "ok".to_owned(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            code: 1,
            data: None,
            msg: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_round_trips_the_wire_compatible_field_names() {
        let desc = Descriptor { id: 42, work_id: 7 };
        let json = serde_json::to_string(&desc).unwrap();
        assert_eq!(json, r#"{"ID":42,"WorkID":7}"#);
        let back: Descriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, desc);
    }

    #[test]
    fn admin_envelope_omits_data_on_error() {
        let env = AdminEnvelope::err("not online");
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(json, r#"{"code":1,"msg":"not online"}"#);
    }

    #[test]
    fn admin_envelope_success_shape() {
        let env = AdminEnvelope::ok(Descriptor { id: 1, work_id: 2 });
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(json, r#"{"code":0,"data":{"ID":1,"WorkID":2},"msg":"ok"}"#);
    }

    #[test]
    fn admin_envelope_ok_msg_omits_data() {
        let env = AdminEnvelope::ok_msg();
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(json, r#"{"code":0,"msg":"ok"}"#);
    }
}
