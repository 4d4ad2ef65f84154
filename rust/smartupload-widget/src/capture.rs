//! Recognizing the vendor call that carries the session identifier.
//!
//! The vendor script posts its session identifier to an endpoint whose URL
//! contains a fixed marker. Depending on the script version the value sits
//! in the request body or comes back in the response, and the body may be
//! JSON, form-encoded, or a `FormData`/`URLSearchParams` object. A
//! [`SessionCapture`] is the [`CallObserver`] that sifts through all of it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CallObserver, InterceptedCall, RawBody};

/// Which body of the marked call is inspected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureStrategy {
    /// The outgoing payload, at send time
    #[default]
    RequestBody,
    /// The incoming payload, after the call resolves
    ResponseBody,
}

/// How the owner treats repeated matches within one widget generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapturePolicy {
    /// Keep the first identifier, ignore later ones
    FirstWins,
    /// Every match replaces the previous identifier
    #[default]
    LatestWins,
}

/// A decoded call body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The body parsed as JSON
    Json(Value),
    /// Key/value pairs from a form-encoded string or a form object
    Fields(BTreeMap<String, String>),
    /// A string that was neither JSON nor form-encoded
    Raw(String),
}

impl Payload {
    /// Decode a request body. Opaque bodies yield nothing.
    pub fn decode(body: &RawBody) -> Option<Payload> {
        match body {
            RawBody::Text(text) => Some(Payload::decode_text(text)),
            RawBody::FormData(entries) | RawBody::UrlSearchParams(entries) => {
                Some(Payload::Fields(entries.iter().cloned().collect()))
            }
            RawBody::Opaque => None,
        }
    }

    /// Decode a string body: JSON first, then form encoding, then raw.
    pub fn decode_text(text: &str) -> Payload {
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            return Payload::Json(value);
        }

        if text.contains('=') {
            let fields: BTreeMap<String, String> = url::form_urlencoded::parse(text.as_bytes())
                .into_owned()
                .collect();
            if !fields.is_empty() {
                return Payload::Fields(fields);
            }
        }

        Payload::Raw(text.to_owned())
    }

    /// Read a top-level string (or number) field.
    pub fn field(&self, key: &str) -> Option<String> {
        let value = match self {
            Payload::Json(Value::Object(object)) => match object.get(key)? {
                Value::String(value) => value.clone(),
                Value::Number(value) => value.to_string(),
                _ => return None,
            },
            Payload::Fields(fields) => fields.get(key)?.clone(),
            Payload::Json(_) | Payload::Raw(_) => return None,
        };

        if value.is_empty() { None } else { Some(value) }
    }
}

/// Filters intercepted calls down to the session identifier.
///
/// The callback fires on every match; deduplication is up to the owner.
pub struct SessionCapture {
    marker: String,
    key: String,
    strategy: CaptureStrategy,
    on_capture: Box<dyn Fn(&str)>,
}

impl SessionCapture {
    /// Create a capture for calls whose URL contains `marker`, reading the
    /// `key` field according to `strategy`.
    pub fn new(
        marker: impl Into<String>,
        key: impl Into<String>,
        strategy: CaptureStrategy,
        on_capture: impl Fn(&str) + 'static,
    ) -> Self {
        Self {
            marker: marker.into(),
            key: key.into(),
            strategy,
            on_capture: Box::new(on_capture),
        }
    }

    /// Whether `url` targets the marked endpoint.
    pub fn matches(&self, url: &str) -> bool {
        url.contains(&self.marker)
    }

    /// Extract the session identifier from the request body of `call`.
    pub fn inspect_request(&self, call: &InterceptedCall) -> Option<String> {
        if !self.matches(&call.url) {
            return None;
        }
        Payload::decode(call.raw_body.as_ref()?)?.field(&self.key)
    }

    /// Extract the session identifier from the response body of `call`.
    pub fn inspect_response(&self, call: &InterceptedCall, body: &str) -> Option<String> {
        if !self.matches(&call.url) {
            return None;
        }
        Payload::decode_text(body).field(&self.key)
    }

    fn capture(&self, call: &InterceptedCall, session_id: String) {
        tracing::debug!(method = %call.method, url = %call.url, "session identifier found");
        (self.on_capture)(&session_id);
    }
}

impl CallObserver for SessionCapture {
    fn on_call(&self, call: &InterceptedCall) {
        if self.strategy != CaptureStrategy::RequestBody {
            return;
        }
        if let Some(session_id) = self.inspect_request(call) {
            self.capture(call, session_id);
        }
    }

    fn wants_response(&self, call: &InterceptedCall) -> bool {
        self.strategy == CaptureStrategy::ResponseBody && self.matches(&call.url)
    }

    fn on_response(&self, call: &InterceptedCall, body: &str) {
        if self.strategy != CaptureStrategy::ResponseBody {
            return;
        }
        if let Some(session_id) = self.inspect_response(call, body) {
            self.capture(call, session_id);
        }
    }
}

impl std::fmt::Debug for SessionCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCapture")
            .field("marker", &self.marker)
            .field("key", &self.key)
            .field("strategy", &self.strategy)
            .finish()
    }
}
