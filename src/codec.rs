//! Engine.IO / Socket.IO text frame codec.
//!
//! The wire protocol is a handful of fixed prefixes in front of JSON.
//! Classification is by prefix/content inspection in priority order;
//! anything unrecognized decodes to `Frame::Unknown` and is forwarded to
//! the catch-all subscriber instead of being dropped, so unseen server
//! event names keep flowing.

use serde_json::Value;

/// Client handshake acknowledgement.
pub const HANDSHAKE_ACK: &str = "40";
/// Reply required for the server's heartbeat probe.
pub const HEARTBEAT_REPLY: &str = "3";
/// Application-level keep-alive ping.
pub const PING_FRAME: &str = r#"42["ps"]"#;

const HEARTBEAT_PROBE: &str = "2";
const NOT_AUTHORIZED_MARKER: &str = "NotAuthorized";

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `0{"sid":…}` — transport opened, must be answered with `40`.
    OpenHandshake { sid: String },
    /// Literal `2` — must be answered with `3` immediately, never queued.
    HeartbeatProbe,
    /// `40{"sid":…}` — upgrade complete, auth replay goes out next.
    UpgradeAck { sid: String },
    /// `42[…]` / `451-[…]` — named event with its payload.
    Event { name: String, payload: Value },
    /// A `NotAuthorized` rejection.
    AuthRejected { reason: String },
    /// Anything else, forwarded raw.
    Unknown { raw: String },
}

/// Decode a raw text frame.
pub fn decode(raw: &str) -> Frame {
    if let Some(rest) = raw.strip_prefix('0') {
        if let Some(sid) = extract_sid(rest) {
            return Frame::OpenHandshake { sid };
        }
    }

    if raw == HEARTBEAT_PROBE {
        return Frame::HeartbeatProbe;
    }

    if let Some(rest) = raw.strip_prefix("40") {
        if let Some(sid) = extract_sid(rest) {
            return Frame::UpgradeAck { sid };
        }
    }

    // `451-["name",{…}]` carries the JSON after the dash.
    if raw.starts_with("45") {
        if let Some((_, json_part)) = raw.split_once('-') {
            if let Some(frame) = decode_event_array(json_part) {
                return frame;
            }
        }
    }

    if let Some(json_part) = raw.strip_prefix("42") {
        if raw.contains(NOT_AUTHORIZED_MARKER) {
            return Frame::AuthRejected {
                reason: "invalid session credentials".to_string(),
            };
        }
        if let Some(frame) = decode_event_array(json_part) {
            return frame;
        }
    }

    Frame::Unknown {
        raw: raw.to_string(),
    }
}

/// Encode an outbound event frame: `42["<name>",<json>]`.
pub fn encode_event(name: &str, payload: &Value) -> String {
    format!("42[{},{}]", Value::String(name.to_string()), payload)
}

fn decode_event_array(json_part: &str) -> Option<Frame> {
    let value: Value = serde_json::from_str(json_part).ok()?;
    let array = value.as_array()?;
    let name = array.first()?.as_str()?.to_string();
    let payload = array.get(1).cloned().unwrap_or_else(|| Value::Object(Default::default()));
    Some(Frame::Event { name, payload })
}

fn extract_sid(json_part: &str) -> Option<String> {
    let value: Value = serde_json::from_str(json_part).ok()?;
    value.get("sid")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_open_handshake() {
        let frame = decode(r#"0{"sid":"abc123","upgrades":[],"pingInterval":25000}"#);
        assert_eq!(
            frame,
            Frame::OpenHandshake {
                sid: "abc123".to_string()
            }
        );
    }

    #[test]
    fn decodes_heartbeat_probe() {
        assert_eq!(decode("2"), Frame::HeartbeatProbe);
    }

    #[test]
    fn decodes_upgrade_ack() {
        let frame = decode(r#"40{"sid":"xyz"}"#);
        assert_eq!(
            frame,
            Frame::UpgradeAck {
                sid: "xyz".to_string()
            }
        );
    }

    #[test]
    fn decodes_451_event_frame() {
        let frame = decode(r#"451-["successauth",{"balance":100.0}]"#);
        match frame {
            Frame::Event { name, payload } => {
                assert_eq!(name, "successauth");
                assert_eq!(payload["balance"], json!(100.0));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn decodes_42_event_frame() {
        let frame = decode(r#"42["successupdateBalance",{"balance":512.3,"isDemo":1}]"#);
        match frame {
            Frame::Event { name, payload } => {
                assert_eq!(name, "successupdateBalance");
                assert_eq!(payload["balance"], json!(512.3));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn event_without_payload_gets_empty_object() {
        let frame = decode(r#"42["ps"]"#);
        match frame {
            Frame::Event { name, payload } => {
                assert_eq!(name, "ps");
                assert!(payload.as_object().is_some_and(|m| m.is_empty()));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn decodes_auth_rejection() {
        let frame = decode(r#"42["NotAuthorized"]"#);
        assert!(matches!(frame, Frame::AuthRejected { .. }));
    }

    #[test]
    fn unknown_frames_are_preserved_raw() {
        let frame = decode("6");
        assert_eq!(
            frame,
            Frame::Unknown {
                raw: "6".to_string()
            }
        );
    }

    #[test]
    fn open_frame_without_sid_is_unknown() {
        assert!(matches!(decode("0{}"), Frame::Unknown { .. }));
    }

    #[test]
    fn encodes_event_frame() {
        let encoded = encode_event("openOrder", &json!({"asset":"EURUSD_otc","amount":1.0}));
        assert!(encoded.starts_with(r#"42["openOrder","#));
        // Must decode back to the same event.
        match decode(&encoded) {
            Frame::Event { name, payload } => {
                assert_eq!(name, "openOrder");
                assert_eq!(payload["asset"], "EURUSD_otc");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn handshake_ack_and_heartbeat_reply_are_literal() {
        assert_eq!(HANDSHAKE_ACK, "40");
        assert_eq!(HEARTBEAT_REPLY, "3");
        assert_eq!(PING_FRAME, r#"42["ps"]"#);
    }
}
