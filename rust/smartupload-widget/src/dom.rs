//! The document surface the widget needs from its host.
//!
//! [`Dom`] covers resource nodes in the document head, the widget container
//! and a timer. Whatever else the vendor script does to the page happens
//! outside of it.

use std::{fmt, time::Duration};

use futures::future::LocalBoxFuture;

use crate::WidgetError;

/// Resolves once a freshly inserted resource node fires `load` or `error`.
pub type LoadFuture = LocalBoxFuture<'static, LoadOutcome>;

/// The kinds of node the [`ResourceLoader`](crate::ResourceLoader) tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// `<link rel="stylesheet" href="…">`
    Stylesheet,
    /// `<script src="…" async>`
    Script,
    /// `<style id="…">` holding inline override rules
    StyleOverride,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Stylesheet => write!(f, "stylesheet"),
            ResourceKind::Script => write!(f, "script"),
            ResourceKind::StyleOverride => write!(f, "style override"),
        }
    }
}

/// How a resource load settled. Failures are reported, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The native `load` event fired
    Loaded,
    /// The native `error` event fired, or the node went away before either
    Failed,
}

impl LoadOutcome {
    /// Whether the resource is usable.
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded)
    }
}

/// Host document operations.
///
/// Implementations are single-threaded: handles are cheap clones of the
/// host's own node references and every method is synchronous apart from
/// the futures it hands back.
pub trait Dom {
    /// A reference to a node in the host document.
    type Node: Clone + PartialEq + fmt::Debug + 'static;

    /// Find a stylesheet or script already present in the document head.
    fn find_resource(&self, kind: ResourceKind, url: &str) -> Option<Self::Node>;

    /// Append a stylesheet or script node to the document head. The returned
    /// future observes that node's `load`/`error` events.
    fn insert_resource(
        &self,
        kind: ResourceKind,
        url: &str,
    ) -> Result<(Self::Node, LoadFuture), WidgetError>;

    /// Look up an element by its `id` attribute.
    fn find_by_id(&self, id: &str) -> Option<Self::Node>;

    /// Append an inline `<style>` element with the given id and rules.
    fn insert_style(&self, id: &str, css: &str) -> Result<Self::Node, WidgetError>;

    /// Remove every child of `parent`.
    fn clear_children(&self, parent: &Self::Node);

    /// Create an element and append it to `parent`.
    fn append_element(
        &self,
        parent: &Self::Node,
        tag: &str,
        attributes: &[(&str, &str)],
    ) -> Result<Self::Node, WidgetError>;

    /// Detach a node from the document. Detached nodes are ignored.
    fn remove(&self, node: &Self::Node);

    /// A timer that resolves after `duration`.
    fn delay(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}
