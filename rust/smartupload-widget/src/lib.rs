#![warn(missing_docs)]

//! Embedding layer for the Smart Upload verification widget.
//!
//! The vendor ships the widget as a hosted stylesheet and script pair. The
//! script binds itself to a node carrying a handful of `data-*` attributes
//! and then talks to its own backend. The one value the host page needs
//! from that conversation, the session identifier, is never surfaced
//! through a public callback: it only shows up in the body of the vendor's
//! `updatesession` call. This crate mounts the widget and recovers that
//! value by observing the page's outbound traffic.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────── PageContext ───────────────────────────────┐
//! │                                                                          │
//! │  ResourceLoader (URL-keyed lease table) ──▸ Dom                          │
//! │  InterceptorRegistry (one patch, N subscriptions) ──▸ NetworkStack       │
//! │                                                                          │
//! └──────────────▲──────────────────────────────────────▲────────────────────┘
//!                │ leases                               │ subscription
//!        ┌───────┴──────────────────────────────────────┴──────┐
//!        │ LifecycleController (one per mounted widget)         │
//!        │   Idle ─▸ Loading ─▸ Mounted ─▸ Active | Failed      │
//!        │   WidgetMount ──▸ container ──▸ <div data-buttonid…> │
//!        │   SessionCapture ──▸ on_session(sessionid)           │
//!        └──────────────────────────────────────────────────────┘
//! ```
//!
//! The core is written against two host traits:
//!
//! - **[`Dom`]**: the slice of the document the widget touches (resource
//!   nodes in `<head>`, the container, timers).
//! - **[`NetworkStack`]**: the page's shared network primitives, which can be
//!   patched with a [`CallObserver`] and restored from the returned record.
//!
//! Two implementations ship with the crate. [`emulator`] keeps a document
//! and a network stack in memory and is what the test-suite drives. The
//! `web` module (only on `wasm32-unknown-unknown`) binds the traits to
//! `web-sys` and exports a `SmartUploadWidget` class to JavaScript.
//!
//! ```rust
//! use std::{cell::RefCell, rc::Rc};
//! use smartupload_widget::{
//!     LifecycleController, PageContext, RawBody, WidgetConfig, WidgetState,
//!     emulator::{EmulatedDom, EmulatedNetwork},
//! };
//!
//! # futures::executor::block_on(async {
//! let dom = Rc::new(EmulatedDom::default());
//! let network = Rc::new(EmulatedNetwork::default());
//! let page = PageContext::new(dom.clone(), network.clone());
//!
//! let captured = Rc::new(RefCell::new(Vec::new()));
//! let sink = captured.clone();
//! let controller = LifecycleController::new(
//!     &page,
//!     Some(dom.create_container()),
//!     "urn:example",
//!     WidgetConfig::default(),
//!     move |session_id: &str| sink.borrow_mut().push(session_id.to_owned()),
//! );
//!
//! controller.initialize().await;
//! assert_eq!(controller.state(), WidgetState::Active);
//!
//! let xhr = network.xhr();
//! xhr.open("POST", "https://api.example.com/updatesession");
//! xhr.send(Some(RawBody::Text(r#"{"sessionid":"abc123"}"#.into())));
//!
//! assert_eq!(*captured.borrow(), vec!["abc123".to_string()]);
//! # });
//! ```

mod error;
pub use error::*;

mod config;
pub use config::*;

mod dom;
pub use dom::*;

mod network;
pub use network::*;

mod loader;
pub use loader::*;

mod mount;
pub use mount::*;

mod capture;
pub use capture::*;

mod interceptor;
pub use interceptor::*;

mod page;
pub use page::*;

mod lifecycle;
pub use lifecycle::*;

pub mod emulator;

#[cfg(all(target_arch = "wasm32", target_os = "unknown"))]
pub mod web;
