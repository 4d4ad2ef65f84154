//! The page's shared network primitives, seen from the interception side.

use std::rc::Rc;

use crate::WidgetError;

/// An outgoing request body as the page handed it to the network layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawBody {
    /// A string body (JSON, form-encoded or free text)
    Text(String),
    /// Entries of a `FormData` body; file entries are not represented
    FormData(Vec<(String, String)>),
    /// Entries of a `URLSearchParams` body
    UrlSearchParams(Vec<(String, String)>),
    /// A body that cannot be inspected (blobs, buffers, streams)
    Opaque,
}

/// A single outbound call, captured at the moment it is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedCall {
    /// The HTTP method, as given by the caller
    pub method: String,
    /// The target URL, as given by the caller
    pub url: String,
    /// The request body, if one was sent
    pub raw_body: Option<RawBody>,
}

impl InterceptedCall {
    /// Create a call record without a body.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            raw_body: None,
        }
    }

    /// Attach a request body.
    pub fn with_body(mut self, body: RawBody) -> Self {
        self.raw_body = Some(body);
        self
    }
}

/// Receives every call that passes through a patched [`NetworkStack`].
///
/// Observers run synchronously inside the wrapped primitive and must not
/// fail: whatever they do, the call is forwarded unchanged.
pub trait CallObserver {
    /// Invoked before the call is forwarded to the original primitive.
    fn on_call(&self, call: &InterceptedCall);

    /// Whether the response body of `call` should be read. Stacks only clone
    /// and read responses when this returns `true`.
    fn wants_response(&self, call: &InterceptedCall) -> bool;

    /// Invoked with a copy of the response body once the call resolves.
    fn on_response(&self, call: &InterceptedCall, body: &str);
}

/// The page-wide network primitives (a fetch-like function and an XHR-like
/// request object) that can be wrapped and later restored.
pub trait NetworkStack {
    /// The original primitives, captured at install time. Restoring consumes
    /// it, so a record can never be applied twice.
    type Patch: 'static;

    /// Replace the primitives with wrappers that report to `observer` and
    /// forward to the originals.
    fn install(&self, observer: Rc<dyn CallObserver>) -> Result<Self::Patch, WidgetError>;

    /// Put back the exact primitives captured in `patch`.
    fn restore(&self, patch: Self::Patch);
}
