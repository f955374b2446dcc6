//! Wire types shared by the SSE and WebSocket transports.

use serde::{Deserialize, Serialize};

/// One inbound pub/sub message, produced by the upstream adapter and
/// consumed immediately by the router. Never stored.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub channel: String,
    pub payload: String,
}

/// Outbound frame as delivered to clients on both transports.
///
/// The `message` field carries the raw upstream payload verbatim. Upstream
/// publishers JSON-encode their values before publishing, so the field is a
/// JSON string containing JSON (double-encoded). Existing dashboard clients
/// parse it that way; do not "fix" this by flattening the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub channel: String,
    pub message: String,
}

#[derive(Serialize)]
struct FrameRef<'a> {
    channel: &'a str,
    message: &'a str,
}

/// Serialize the `{channel, message}` frame for a single upstream message.
pub fn encode_frame(channel: &str, payload: &str) -> serde_json::Result<String> {
    serde_json::to_string(&FrameRef {
        channel,
        message: payload,
    })
}

/// Control messages a WebSocket client may send to the gateway.
///
/// Closed set: anything that does not deserialize into one of these
/// variants is a protocol error, logged and dropped by the transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientCommand {
    Subscribe { channels: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_preserves_raw_payload() {
        // The upstream payload is already JSON; it must survive verbatim as
        // a string field (double-encoded on the wire).
        let json = encode_frame("temp", "21.5").unwrap();
        assert_eq!(json, r#"{"channel":"temp","message":"21.5"}"#);

        let nested = encode_frame("gps", r#"{"lat":51.0,"lon":3.7}"#).unwrap();
        let frame: Frame = serde_json::from_str(&nested).unwrap();
        assert_eq!(frame.channel, "gps");
        assert_eq!(frame.message, r#"{"lat":51.0,"lon":3.7}"#);
    }

    #[test]
    fn test_subscribe_command_parses() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"action":"subscribe","channels":["temp","humidity"]}"#)
                .unwrap();
        let ClientCommand::Subscribe { channels } = cmd;
        assert_eq!(channels, vec!["temp", "humidity"]);
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let result = serde_json::from_str::<ClientCommand>(r#"{"action":"publish","data":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        assert!(serde_json::from_str::<ClientCommand>("not json").is_err());
    }
}
