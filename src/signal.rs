//! The synthetic health-check event and the classifier that recognises it.
//!
//! A health signal is an ordinary JSON webhook body whose `type` field is
//! `"health-check"`. Everything else (other JSON, binary payloads, missing or
//! non-JSON content type) is a regular event and gets relayed.

use axum::http::{header, HeaderMap};
use serde::{Deserialize, Deserializer, Serialize};

/// Discriminator value marking a self-test event.
pub const HEALTH_CHECK_TYPE: &str = "health-check";

/// `{ "type": "health-check", "id": "<check id>" }`
///
/// Only `type` decides classification. A missing or `null` `id` decodes as
/// the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSignal {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub id: String,
}

impl HealthSignal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            kind: HEALTH_CHECK_TYPE.to_string(),
            id: id.into(),
        }
    }

    /// Decide whether an inbound request is a health signal.
    ///
    /// Only one parse attempt is made, and only when the declared media type
    /// is `application/json`; binary and form payloads are never decoded.
    pub fn classify(headers: &HeaderMap, body: &[u8]) -> Option<Self> {
        if !is_json(headers) {
            return None;
        }
        serde_json::from_slice::<Self>(body)
            .ok()
            .filter(|signal| signal.kind == HEALTH_CHECK_TYPE)
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// `application/json`, ignoring parameters such as `charset` and letter case.
fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|media| media.trim().eq_ignore_ascii_case("application/json"))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use serde_json::json;

    use super::*;

    fn headers_with(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        headers
    }

    fn json_headers() -> HeaderMap {
        headers_with("application/json")
    }

    #[test]
    fn recognises_health_signal() {
        let body = br#"{"type":"health-check","id":"abc"}"#;
        let signal = HealthSignal::classify(&json_headers(), body).expect("should classify");
        assert_eq!(signal.id, "abc");
    }

    #[test]
    fn serialized_signal_classifies_as_itself() {
        let signal = HealthSignal::new("1f0c");
        let body = serde_json::to_vec(&signal).unwrap();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&body).unwrap(),
            json!({ "type": "health-check", "id": "1f0c" })
        );
        assert_eq!(HealthSignal::classify(&json_headers(), &body), Some(signal));
    }

    #[test]
    fn extra_fields_do_not_prevent_classification() {
        let body = br#"{"type":"health-check","id":"x","sent_at":123}"#;
        assert!(HealthSignal::classify(&json_headers(), body).is_some());
    }

    #[test]
    fn charset_parameter_is_accepted() {
        let body = br#"{"type":"health-check","id":"abc"}"#;
        let headers = headers_with("Application/JSON; charset=utf-8");
        assert!(HealthSignal::classify(&headers, body).is_some());
    }

    #[test]
    fn wrong_discriminator_is_a_regular_event() {
        let body = br#"{"type":"push","id":"abc"}"#;
        assert!(HealthSignal::classify(&json_headers(), body).is_none());
    }

    #[test]
    fn missing_or_null_id_still_classifies_with_empty_id() {
        for body in [&br#"{"type":"health-check"}"#[..], br#"{"type":"health-check","id":null}"#] {
            let signal = HealthSignal::classify(&json_headers(), body).expect("should classify");
            assert_eq!(signal.id, "");
        }
    }

    #[test]
    fn non_string_id_is_a_regular_event() {
        let body = br#"{"type":"health-check","id":42}"#;
        assert!(HealthSignal::classify(&json_headers(), body).is_none());
    }

    #[test]
    fn non_json_content_type_is_never_decoded() {
        let body = br#"{"type":"health-check","id":"abc"}"#;
        assert!(HealthSignal::classify(&headers_with("text/plain"), body).is_none());
        assert!(HealthSignal::classify(&HeaderMap::new(), body).is_none());
    }

    #[test]
    fn malformed_json_is_a_regular_event() {
        assert!(HealthSignal::classify(&json_headers(), b"{not json").is_none());
        assert!(HealthSignal::classify(&json_headers(), b"[1,2,3]").is_none());
        assert!(HealthSignal::classify(&json_headers(), b"").is_none());
    }
}
