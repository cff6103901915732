//! Request and response envelopes and their JSON codec.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload was not a valid envelope.
    #[error("failed to decode envelope: {0}")]
    Decode(#[source] serde_json::Error),
    /// The envelope could not be serialised.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
    /// The envelope's `content` did not match the expected shape.
    #[error("failed to decode request: {0}")]
    Content(#[source] serde_json::Error),
}

/// Inbound envelope selecting a route.
///
/// Missing `id` and `type` fields default to `0` and the empty string so a
/// sloppy peer still receives a correlated error instead of silence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Caller-assigned identifier echoed in the response.
    #[serde(default)]
    pub id: i64,
    /// Route name.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Route-specific payload, opaque to the dispatcher.
    #[serde(default)]
    pub content: Value,
}

impl Request {
    /// Builds a request from an already-encoded content value.
    #[must_use]
    pub fn new(id: i64, kind: impl Into<String>, content: Value) -> Self {
        Self {
            id,
            kind: kind.into(),
            content,
        }
    }

    /// Builds a request whose content is the JSON form of `content`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if `content` cannot be serialised.
    pub fn with_content<T: Serialize>(
        id: i64,
        kind: impl Into<String>,
        content: &T,
    ) -> Result<Self, CodecError> {
        let value = serde_json::to_value(content).map_err(CodecError::Encode)?;
        Ok(Self::new(id, kind, value))
    }

    /// Decodes a request from a payload frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] when the bytes are not a JSON object of
    /// the request shape.
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(payload).map_err(CodecError::Decode)
    }

    /// Encodes the request as a payload frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialisation fails.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::Encode)
    }

    /// Decodes `content` into a typed payload.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Content`] when the content has the wrong shape.
    pub fn content_as<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        decode_content(self.content.clone())
    }
}

/// Decodes a content value into a typed payload.
pub(crate) fn decode_content<T: DeserializeOwned>(content: Value) -> Result<T, CodecError> {
    serde_json::from_value(content).map_err(CodecError::Content)
}

/// The `id` and `type` salvaged from a payload that failed to decode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeader {
    /// Recovered request id, or `0`.
    pub id: i64,
    /// Recovered route name, or empty.
    pub kind: String,
}

impl RequestHeader {
    /// Recovers whatever header fields are readable from `payload`.
    ///
    /// Never fails: unreadable input yields the default header.
    #[must_use]
    pub fn recover(payload: &[u8]) -> Self {
        let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(payload) else {
            return Self::default();
        };
        Self {
            id: fields.get("id").and_then(Value::as_i64).unwrap_or_default(),
            kind: fields
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        }
    }
}

/// Result carried by a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Handler result.
    Success(Value),
    /// Human-readable failure description.
    Failure(String),
}

/// Outbound envelope answering a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireResponse", into = "WireResponse")]
pub struct Response {
    id: i64,
    kind: String,
    outcome: Outcome,
}

impl Response {
    /// Builds a successful response.
    #[must_use]
    pub fn success(id: i64, kind: impl Into<String>, content: Value) -> Self {
        Self {
            id,
            kind: kind.into(),
            outcome: Outcome::Success(content),
        }
    }

    /// Builds a failed response.
    #[must_use]
    pub fn failure(id: i64, kind: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
            outcome: Outcome::Failure(error.into()),
        }
    }

    /// Echoed request id.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Echoed route name.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns `true` for successful responses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    /// Handler result, present only on success.
    #[must_use]
    pub fn content(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Success(content) => Some(content),
            Outcome::Failure(_) => None,
        }
    }

    /// Failure description, present only on failure.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure(error) => Some(error),
        }
    }

    /// Consumes the response, yielding its outcome.
    #[must_use]
    pub fn into_outcome(self) -> Outcome {
        self.outcome
    }

    /// Decodes a response from a payload frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] when the bytes are not a response, or
    /// when `content` and `error` are not mutually exclusive.
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(payload).map_err(CodecError::Decode)
    }

    /// Encodes the response as a payload frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialisation fails.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::Encode)
    }
}

#[derive(Debug, Error)]
enum EnvelopeViolation {
    #[error("successful response must not carry an error")]
    SuccessWithError,
    #[error("failed response must not carry content")]
    FailureWithContent,
    #[error("failed response is missing its error")]
    FailureWithoutError,
}

#[derive(Serialize, Deserialize)]
struct WireResponse {
    #[serde(default)]
    id: i64,
    #[serde(rename = "type", default)]
    kind: String,
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl TryFrom<WireResponse> for Response {
    type Error = EnvelopeViolation;

    fn try_from(wire: WireResponse) -> Result<Self, Self::Error> {
        let outcome = match (wire.success, wire.content, wire.error) {
            (true, _, Some(_)) => return Err(EnvelopeViolation::SuccessWithError),
            (true, content, None) => Outcome::Success(content.unwrap_or(Value::Null)),
            (false, Some(_), _) => return Err(EnvelopeViolation::FailureWithContent),
            (false, None, Some(error)) => Outcome::Failure(error),
            (false, None, None) => return Err(EnvelopeViolation::FailureWithoutError),
        };
        Ok(Self {
            id: wire.id,
            kind: wire.kind,
            outcome,
        })
    }
}

impl From<Response> for WireResponse {
    fn from(response: Response) -> Self {
        let (success, content, error) = match response.outcome {
            Outcome::Success(content) => (true, Some(content), None),
            Outcome::Failure(error) => (false, None, Some(error)),
        };
        Self {
            id: response.id,
            kind: response.kind,
            success,
            content,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn request_round_trips_through_codec() {
        let request = Request::new(42, "allocate", json!({"semester": "2025-1"}));
        let encoded = request.encode().expect("encode request");
        assert_eq!(Request::decode(&encoded).expect("decode request"), request);
    }

    #[rstest]
    #[case(Response::success(1, "health-check", json!("OK")))]
    #[case(Response::success(2, "allocate", Value::Null))]
    #[case(Response::failure(3, "bogus", "no handler found for request type: bogus"))]
    fn response_round_trips_through_codec(#[case] response: Response) {
        let encoded = response.encode().expect("encode response");
        assert_eq!(Response::decode(&encoded).expect("decode response"), response);
    }

    #[rstest]
    fn failure_omits_content_field() {
        let encoded = Response::failure(9, "confirm", "boom")
            .encode()
            .expect("encode response");
        let text = String::from_utf8(encoded).expect("utf8");
        assert!(text.contains(r#""success":false"#));
        assert!(text.contains(r#""error":"boom""#));
        assert!(!text.contains("content"));
    }

    #[rstest]
    fn content_decodes_into_typed_requests() {
        let request = Request::new(
            7,
            "confirm",
            json!({"semester": "2025-1", "faculty": "Ciencias", "accept": true}),
        );
        let confirm: crate::ConfirmRequest = request.content_as().expect("typed content");
        assert_eq!(confirm.faculty, "Ciencias");
        assert!(confirm.accept);

        let wrong: Result<crate::ConfirmRequest, _> =
            Request::new(8, "confirm", json!("Ciencias")).content_as();
        assert!(matches!(wrong, Err(CodecError::Content(_))));
    }

    #[rstest]
    fn missing_header_fields_default() {
        let request = Request::decode(br#"{"content":{}}"#).expect("decode request");
        assert_eq!(request.id, 0);
        assert_eq!(request.kind, "");
    }

    #[rstest]
    #[case(b"".as_slice())]
    #[case(b"not json".as_slice())]
    #[case(b"[1,2,3]".as_slice())]
    #[case(b"{\"id\":\"seven\"}".as_slice())]
    #[case(b"\xff\xfe\x00".as_slice())]
    fn garbage_fails_to_decode(#[case] payload: &[u8]) {
        assert!(matches!(
            Request::decode(payload),
            Err(CodecError::Decode(_))
        ));
        assert!(Response::decode(payload).is_err());
    }

    #[rstest]
    #[case(br#"{"id":1,"type":"x","success":true,"content":1,"error":"e"}"#.as_slice())]
    #[case(br#"{"id":1,"type":"x","success":false,"content":1,"error":"e"}"#.as_slice())]
    #[case(br#"{"id":1,"type":"x","success":false}"#.as_slice())]
    fn rejects_ambiguous_responses(#[case] payload: &[u8]) {
        assert!(matches!(
            Response::decode(payload),
            Err(CodecError::Decode(_))
        ));
    }

    #[rstest]
    #[case(br#"{"id":"seven","type":"allocate"}"#.as_slice(), 0, "allocate")]
    #[case(br#"{"id":12,"type":5}"#.as_slice(), 12, "")]
    #[case(b"garbage".as_slice(), 0, "")]
    fn recovers_partial_headers(#[case] payload: &[u8], #[case] id: i64, #[case] kind: &str) {
        let header = RequestHeader::recover(payload);
        assert_eq!(header.id, id);
        assert_eq!(header.kind, kind);
    }
}
