//! Browser bindings.
//!
//! [`BrowserDom`] and [`BrowserNetwork`] implement the host traits over
//! `web-sys`, and [`SmartUploadWidget`] exposes a controller to JavaScript:
//!
//! ```ignore
//! // This is JavaScript code that uses the WASM bindings, not a Rust doctest
//! import init, { SmartUploadWidget } from "smartupload-widget";
//!
//! await init();
//!
//! const widget = new SmartUploadWidget(
//!     document.querySelector(".upload-widget-container"),
//!     "urn:uuid:7c1e",
//!     (sessionId) => console.log("session", sessionId),
//!     { captureStrategy: "request-body" },
//! );
//!
//! await widget.initialize();
//! // ...
//! widget.teardown();
//! ```

mod bindings;
mod dom;
mod network;

pub use bindings::*;
pub use dom::*;
pub use network::*;

use wasm_bindgen::JsValue;

use crate::WidgetError;

fn js_error(value: JsValue) -> String {
    value
        .as_string()
        .unwrap_or_else(|| format!("{value:?}"))
}

impl From<WidgetError> for JsValue {
    fn from(value: WidgetError) -> Self {
        format!("{value}").into()
    }
}
