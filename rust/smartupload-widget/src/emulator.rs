//! In-memory host emulation.
//!
//! [`EmulatedDom`] and [`EmulatedNetwork`] implement [`Dom`](crate::Dom) and
//! [`NetworkStack`](crate::NetworkStack) without a browser. They model the
//! parts of browser behaviour the widget layer depends on: resource nodes
//! that settle on `load`/`error`, and network primitives that are looked up
//! through shared, replaceable references (as `window.fetch` and
//! `XMLHttpRequest.prototype` are). Tests steer them directly, for example
//! by holding a script load open to tear a widget down mid-flight.

mod dom;
pub use dom::*;

mod network;
pub use network::*;
