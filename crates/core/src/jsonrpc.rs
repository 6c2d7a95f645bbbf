//! JSON-RPC 2.0 envelope model.
//!
//! Parsing is two-phase: a generic [`RawEnvelope`] records which members are
//! present, then the presence pattern selects the concrete [`Envelope`]
//! variant. Payloads (`params`, `result`, `error.data`) stay as raw JSON and
//! are never deserialized further.

use crate::error::ParseError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use serde_json::{Number, Value};
use std::fmt;

/// The only protocol version the bridge speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// Maximum size of a single framed message (10 MiB).
///
/// Checked on the raw byte length before any JSON parsing.
pub const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Standard JSON-RPC 2.0 error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Correlation ID of a request and its response.
///
/// `Null` is an explicit `"id": null`; an absent ID is modelled as
/// `Option::<Id>::None` by the containing type. Numbers keep their JSON
/// representation, so the full `u64` range survives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Id {
    Number(Number),
    String(String),
    Null,
}

impl Id {
    /// Convert a JSON value into an ID. Floats, booleans, arrays and objects
    /// are not valid JSON-RPC identifiers.
    pub fn from_value(value: &Value) -> Result<Self, ParseError> {
        match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Id::Number(n.clone())),
            Value::String(s) => Ok(Id::String(s.clone())),
            Value::Null => Ok(Id::Null),
            _ => Err(ParseError::InvalidId),
        }
    }

    /// True for `null` and the empty string, neither of which can key a
    /// pending request.
    pub fn is_nil(&self) -> bool {
        match self {
            Id::Null => true,
            Id::String(s) => s.is_empty(),
            Id::Number(_) => false,
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{}", n),
            Id::String(s) => write!(f, "{:?}", s),
            Id::Null => f.write_str("null"),
        }
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n.into())
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::String(s)
    }
}

/// Coarse classification of an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Request,
    Notification,
    Response,
    Error,
}

impl EnvelopeKind {
    /// Lowercase name used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Request => "request",
            EnvelopeKind::Notification => "notification",
            EnvelopeKind::Response => "response",
            EnvelopeKind::Error => "error",
        }
    }
}

/// A request expecting a response.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: Id,
    pub method: String,
    pub params: Option<Box<RawValue>>,
}

/// A fire-and-forget message; never carries an ID.
#[derive(Debug, Clone)]
pub struct Notification {
    pub method: String,
    pub params: Option<Box<RawValue>>,
}

/// A success response.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: Id,
    pub result: Option<Box<RawValue>>,
}

/// An error response.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub id: Id,
    pub error: ErrorObject,
}

/// The `error` member of an error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<RawValue>>,
}

impl ErrorObject {
    /// Create a new error object without `data`.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error() -> Self {
        Self::new(codes::PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }
}

/// One JSON-RPC 2.0 message.
#[derive(Debug, Clone)]
pub enum Envelope {
    Request(Request),
    Notification(Notification),
    Response(Response),
    Error(ErrorResponse),
}

/// Phase one of parsing: which members exist, nothing more.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    jsonrpc: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default, deserialize_with = "present")]
    params: Option<Box<RawValue>>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Box<RawValue>>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

/// Distinguishes an explicit `null` member from an absent one: absent members
/// take the `default` (None), present ones always land in `Some`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl Envelope {
    /// Parse one framed message.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() > MAX_MESSAGE_BYTES {
            return Err(ParseError::MessageTooLarge {
                max_bytes: MAX_MESSAGE_BYTES,
            });
        }

        let trimmed = bytes.trim_ascii();
        if trimmed.is_empty() {
            return Err(ParseError::Malformed {
                reason: "empty message".to_string(),
            });
        }
        if trimmed.first() == Some(&b'[') {
            return Err(ParseError::UnsupportedBatch);
        }

        let raw: RawEnvelope =
            serde_json::from_slice(trimmed).map_err(|e| ParseError::Malformed {
                reason: e.to_string(),
            })?;

        match raw.jsonrpc {
            None => return Err(ParseError::MissingVersion),
            Some(Value::String(ref v)) if v == JSONRPC_VERSION => {}
            Some(other) => {
                let version = match other {
                    Value::String(s) => s,
                    v => v.to_string(),
                };
                return Err(ParseError::UnsupportedVersion { version });
            }
        }

        let id = raw.id.as_ref().map(Id::from_value).transpose()?;

        match raw.method {
            Some(method) if !method.is_empty() => Ok(match id {
                Some(id) => Envelope::Request(Request {
                    id,
                    method,
                    params: raw.params,
                }),
                None => Envelope::Notification(Notification {
                    method,
                    params: raw.params,
                }),
            }),
            _ => {
                let id = id.ok_or(ParseError::MissingId)?;
                match raw.error {
                    Some(error) => Ok(Envelope::Error(ErrorResponse { id, error })),
                    None if id == Id::Null => Err(ParseError::MissingId),
                    None => Ok(Envelope::Response(Response {
                        id,
                        result: raw.result,
                    })),
                }
            }
        }
    }

    /// Which of the four message shapes this is.
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Request(_) => EnvelopeKind::Request,
            Envelope::Notification(_) => EnvelopeKind::Notification,
            Envelope::Response(_) => EnvelopeKind::Response,
            Envelope::Error(_) => EnvelopeKind::Error,
        }
    }

    /// The correlation ID, if the variant carries one.
    pub fn id(&self) -> Option<&Id> {
        match self {
            Envelope::Request(r) => Some(&r.id),
            Envelope::Notification(_) => None,
            Envelope::Response(r) => Some(&r.id),
            Envelope::Error(e) => Some(&e.id),
        }
    }

    /// The method name of a request or notification.
    pub fn method(&self) -> Option<&str> {
        match self {
            Envelope::Request(r) => Some(&r.method),
            Envelope::Notification(n) => Some(&n.method),
            _ => None,
        }
    }

    /// Responses and error responses answer a request.
    pub fn is_reply(&self) -> bool {
        matches!(self, Envelope::Response(_) | Envelope::Error(_))
    }

    /// Build an error response for `id`.
    pub fn error(id: Id, error: ErrorObject) -> Self {
        Envelope::Error(ErrorResponse { id, error })
    }

    /// Build the `-32603` response the bridge synthesizes for local failures.
    pub fn internal_error(id: Id, message: impl Into<String>) -> Self {
        Self::error(id, ErrorObject::internal_error(message))
    }

    /// Serialize as compact JSON without a trailing newline.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Serialize as a single NDJSON line, trailing newline included.
    pub fn to_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Wire shape used for serialization. Absent members are skipped; `id` is
/// emitted whenever the variant has one, including `null`.
#[derive(Serialize)]
struct WireEnvelope<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a RawValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a RawValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ErrorObject>,
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            Envelope::Request(r) => WireEnvelope {
                jsonrpc: JSONRPC_VERSION,
                id: Some(&r.id),
                method: Some(&r.method),
                params: r.params.as_deref(),
                result: None,
                error: None,
            },
            Envelope::Notification(n) => WireEnvelope {
                jsonrpc: JSONRPC_VERSION,
                id: None,
                method: Some(&n.method),
                params: n.params.as_deref(),
                result: None,
                error: None,
            },
            Envelope::Response(r) => WireEnvelope {
                jsonrpc: JSONRPC_VERSION,
                id: Some(&r.id),
                method: None,
                params: None,
                result: r.result.as_deref(),
                error: None,
            },
            Envelope::Error(e) => WireEnvelope {
                jsonrpc: JSONRPC_VERSION,
                id: Some(&e.id),
                method: None,
                params: None,
                result: None,
                error: Some(&e.error),
            },
        };
        wire.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(input: &str) -> Value {
        let envelope = Envelope::parse(input.as_bytes()).unwrap();
        serde_json::from_slice(&envelope.to_vec().unwrap()).unwrap()
    }

    #[test]
    fn test_parse_request() {
        let env =
            Envelope::parse(br#"{"jsonrpc":"2.0","method":"tools/call","id":1,"params":{"a":1}}"#)
                .unwrap();
        assert_eq!(env.kind(), EnvelopeKind::Request);
        assert_eq!(env.id(), Some(&Id::from(1)));
        assert_eq!(env.method(), Some("tools/call"));
    }

    #[test]
    fn test_parse_notification() {
        let env = Envelope::parse(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .unwrap();
        assert_eq!(env.kind(), EnvelopeKind::Notification);
        assert!(env.id().is_none());
    }

    #[test]
    fn test_method_with_any_id_is_request() {
        for id in [json!(7), json!("abc"), json!(null)] {
            let line = json!({"jsonrpc": "2.0", "method": "ping", "id": id}).to_string();
            let env = Envelope::parse(line.as_bytes()).unwrap();
            assert_eq!(env.kind(), EnvelopeKind::Request, "id {}", id);
        }
    }

    #[test]
    fn test_parse_response_and_error() {
        let ok = Envelope::parse(br#"{"jsonrpc":"2.0","id":"a","result":{"x":true}}"#).unwrap();
        assert_eq!(ok.kind(), EnvelopeKind::Response);
        assert_eq!(ok.id(), Some(&Id::String("a".to_string())));

        let err = Envelope::parse(
            br#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"nope"}}"#,
        )
        .unwrap();
        assert_eq!(err.kind(), EnvelopeKind::Error);
        match err {
            Envelope::Error(e) => assert_eq!(e.error.code, codes::METHOD_NOT_FOUND),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_method_takes_priority_over_error() {
        let env = Envelope::parse(
            br#"{"jsonrpc":"2.0","id":1,"method":"x","error":{"code":1,"message":"m"}}"#,
        )
        .unwrap();
        assert_eq!(env.kind(), EnvelopeKind::Request);
    }

    #[test]
    fn test_null_error_is_a_response() {
        let env = Envelope::parse(br#"{"jsonrpc":"2.0","id":1,"result":null,"error":null}"#)
            .unwrap();
        assert_eq!(env.kind(), EnvelopeKind::Response);
    }

    #[test]
    fn test_error_response_with_null_id_is_allowed() {
        let env = Envelope::parse(
            br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#,
        )
        .unwrap();
        assert_eq!(env.id(), Some(&Id::Null));
    }

    #[test]
    fn test_response_requires_id() {
        let err = Envelope::parse(br#"{"jsonrpc":"2.0","result":{}}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingId));

        let err = Envelope::parse(br#"{"jsonrpc":"2.0","id":null,"result":{}}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingId));
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let err = Envelope::parse(br#"{"jsonrpc":"1.0","id":1,"method":"x"}"#).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedVersion { ref version } if version == "1.0"));

        let err = Envelope::parse(br#"{"jsonrpc":2,"id":1,"method":"x"}"#).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedVersion { ref version } if version == "2"));

        let err = Envelope::parse(br#"{"id":1,"method":"x"}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingVersion));
    }

    #[test]
    fn test_malformed_and_batch() {
        assert!(matches!(
            Envelope::parse(br#"{"jsonrpc":"2.0","#).unwrap_err(),
            ParseError::Malformed { .. }
        ));
        assert!(matches!(
            Envelope::parse(b"   ").unwrap_err(),
            ParseError::Malformed { .. }
        ));
        assert!(matches!(
            Envelope::parse(br#"[{"jsonrpc":"2.0","id":1,"method":"x"}]"#).unwrap_err(),
            ParseError::UnsupportedBatch
        ));
    }

    #[test]
    fn test_invalid_id_types() {
        for id in [json!(1.5), json!(true), json!([1]), json!({"a": 1})] {
            let line = json!({"jsonrpc": "2.0", "method": "x", "id": id}).to_string();
            assert!(
                matches!(Envelope::parse(line.as_bytes()), Err(ParseError::InvalidId)),
                "id {} should be rejected",
                id
            );
        }
    }

    #[test]
    fn test_unsigned_and_negative_ids() {
        let env =
            Envelope::parse(br#"{"jsonrpc":"2.0","method":"x","id":18446744073709551615}"#)
                .unwrap();
        assert_eq!(env.kind(), EnvelopeKind::Request);
        assert_eq!(env.id().unwrap().to_string(), "18446744073709551615");
        assert_eq!(
            roundtrip(r#"{"jsonrpc":"2.0","method":"x","id":18446744073709551615}"#)["id"],
            json!(u64::MAX)
        );

        let env = Envelope::parse(br#"{"jsonrpc":"2.0","id":-3,"result":{}}"#).unwrap();
        assert_eq!(env.id(), Some(&Id::from(-3)));
    }

    #[test]
    fn test_oversized_message() {
        let big = vec![b' '; MAX_MESSAGE_BYTES + 1];
        assert!(matches!(
            Envelope::parse(&big).unwrap_err(),
            ParseError::MessageTooLarge { .. }
        ));
    }

    #[test]
    fn test_roundtrip_preserves_content() {
        let inputs = [
            r#"{"jsonrpc":"2.0","method":"test","id":1,"params":{}}"#,
            r#"{"params":{"nested":[1,2,{"k":"v"}]},"id":"req-9","method":"tools/call","jsonrpc":"2.0"}"#,
            r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{"progress":0.5}}"#,
            r#"{"jsonrpc":"2.0","id":3,"result":{"tools":[]}}"#,
            r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32603,"message":"boom","data":{"why":"x"}}}"#,
        ];
        for input in inputs {
            let original: Value = serde_json::from_str(input).unwrap();
            assert_eq!(roundtrip(input), original, "roundtrip of {}", input);
        }
    }

    #[test]
    fn test_roundtrip_null_versus_absent_id() {
        let with_null = roundtrip(r#"{"jsonrpc":"2.0","method":"x","id":null}"#);
        assert!(with_null.as_object().unwrap().contains_key("id"));
        assert!(with_null["id"].is_null());

        let without = roundtrip(r#"{"jsonrpc":"2.0","method":"x"}"#);
        assert!(!without.as_object().unwrap().contains_key("id"));
    }

    #[test]
    fn test_roundtrip_null_params_and_result() {
        let req = roundtrip(r#"{"jsonrpc":"2.0","method":"x","id":1,"params":null}"#);
        assert!(req.as_object().unwrap().contains_key("params"));

        let resp = roundtrip(r#"{"jsonrpc":"2.0","id":1,"result":null}"#);
        assert!(resp.as_object().unwrap().contains_key("result"));
    }

    #[test]
    fn test_absent_members_are_omitted() {
        let value = roundtrip(r#"{"jsonrpc":"2.0","method":"ping","id":5}"#);
        let obj = value.as_object().unwrap();
        assert!(!obj.contains_key("params"));
        assert!(!obj.contains_key("result"));
        assert!(!obj.contains_key("error"));
    }

    #[test]
    fn test_internal_error_builder() {
        let env = Envelope::internal_error(Id::from(9), "HTTP 503");
        let value: Value = serde_json::from_slice(&env.to_vec().unwrap()).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 9);
        assert_eq!(value["error"]["code"], -32603);
        assert_eq!(value["error"]["message"], "HTTP 503");
        assert!(value["error"].get("data").is_none());
    }

    #[test]
    fn test_to_line_is_single_ndjson_line() {
        let env = Envelope::parse(br#"{"jsonrpc":"2.0","method":"x","params":{"a":"b\nc"}}"#)
            .unwrap();
        let line = env.to_line().unwrap();
        assert!(line.ends_with(b"\n"));
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn test_nil_ids() {
        assert!(Id::Null.is_nil());
        assert!(Id::String(String::new()).is_nil());
        assert!(!Id::from(0).is_nil());
        assert!(!Id::from("a").is_nil());
    }
}
