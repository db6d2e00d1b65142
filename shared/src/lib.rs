//! Callwire Shared Wire Types
//!
//! This crate provides the request/response records and the line codec
//! for communication between a callwire dispatch server and its remote
//! controllers (scripts, test harnesses, companion processes).

pub mod codec;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One remote call, parsed from a single request line.
///
/// All three fields are mandatory; a line missing any of them is a
/// protocol error, not a partial request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: i64,
    pub method: String,
    pub params: Vec<Value>,
}

impl Request {
    pub fn new(id: i64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Parse a request from one line of wire text.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// The reply to one request.
///
/// Both fields are always present on the wire; both are null only for
/// the void-success case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub result: Value,
    pub error: Value,
}

impl Response {
    /// A successful response carrying `result` (possibly null).
    pub fn success(result: Value) -> Self {
        Self {
            result,
            error: Value::Null,
        }
    }

    /// An error response carrying a message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            result: Value::Null,
            error: Value::String(message.into()),
        }
    }

    /// Whether this response reports an error.
    pub fn is_error(&self) -> bool {
        !self.error.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_parse() {
        let request = Request::parse(r#"{"id":1,"method":"echo","params":["yo",2,true]}"#).unwrap();
        assert_eq!(request.id, 1);
        assert_eq!(request.method, "echo");
        assert_eq!(request.params, vec![json!("yo"), json!(2), json!(true)]);
    }

    #[test]
    fn test_request_missing_field_is_rejected() {
        assert!(Request::parse(r#"{"id":1,"method":"echo"}"#).is_err());
        assert!(Request::parse(r#"{"id":1,"params":[]}"#).is_err());
        assert!(Request::parse(r#"{"method":"echo","params":[]}"#).is_err());
    }

    #[test]
    fn test_request_rejects_garbage() {
        assert!(Request::parse("not json").is_err());
        assert!(Request::parse(r#"{"id":"one","method":"echo","params":[]}"#).is_err());
    }

    #[test]
    fn test_response_wire_shape() {
        let success = serde_json::to_string(&Response::success(json!("hi"))).unwrap();
        assert_eq!(success, r#"{"result":"hi","error":null}"#);

        let failure = serde_json::to_string(&Response::failure("Unknown RPC.")).unwrap();
        assert_eq!(failure, r#"{"result":null,"error":"Unknown RPC."}"#);
    }

    #[test]
    fn test_void_success_is_double_null() {
        let void = serde_json::to_string(&Response::success(Value::Null)).unwrap();
        assert_eq!(void, r#"{"result":null,"error":null}"#);
        assert!(!Response::success(Value::Null).is_error());
    }
}
