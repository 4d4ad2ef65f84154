use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap, HashSet},
    time::Duration,
};

use futures::{
    FutureExt,
    channel::oneshot,
    future::{LocalBoxFuture, ready},
};

use crate::{CONTAINER_CLASS, Dom, LoadFuture, LoadOutcome, ResourceKind, WidgetError};

/// A node in an [`EmulatedDom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(u64);

#[derive(Debug, Default)]
struct Element {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: Option<String>,
    parent: Option<NodeRef>,
    children: Vec<NodeRef>,
}

struct PendingLoad {
    url: String,
    settle: oneshot::Sender<LoadOutcome>,
}

struct DocumentState {
    next_id: u64,
    nodes: HashMap<NodeRef, Element>,
    head: NodeRef,
    body: NodeRef,
    held: HashSet<String>,
    failing: HashSet<String>,
    pending: HashMap<NodeRef, PendingLoad>,
    delays: Vec<Duration>,
}

impl DocumentState {
    fn create(&mut self, tag: &str) -> NodeRef {
        let node = NodeRef(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            node,
            Element {
                tag: tag.to_owned(),
                ..Element::default()
            },
        );
        node
    }

    fn append(&mut self, parent: NodeRef, child: NodeRef) -> Result<(), WidgetError> {
        if !self.nodes.contains_key(&child) {
            return Err(WidgetError::Dom(format!("{child:?} does not exist")));
        }
        let Some(element) = self.nodes.get_mut(&parent) else {
            return Err(WidgetError::Dom(format!("{parent:?} is not in the document")));
        };
        element.children.push(child);
        if let Some(element) = self.nodes.get_mut(&child) {
            element.parent = Some(parent);
        }
        Ok(())
    }

    fn set_attribute(&mut self, node: NodeRef, name: &str, value: &str) {
        if let Some(element) = self.nodes.get_mut(&node) {
            element.attributes.insert(name.to_owned(), value.to_owned());
        }
    }

    fn attribute(&self, node: NodeRef, name: &str) -> Option<&str> {
        self.nodes
            .get(&node)?
            .attributes
            .get(name)
            .map(String::as_str)
    }

    /// Detach `node` and drop it along with its descendants. Loads pending
    /// on dropped nodes settle as failed.
    fn remove_subtree(&mut self, node: NodeRef) {
        let parent = self.nodes.get(&node).and_then(|element| element.parent);
        if let Some(parent) = parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            parent.children.retain(|child| *child != node);
        }

        let mut stack = vec![node];
        while let Some(next) = stack.pop() {
            if let Some(element) = self.nodes.remove(&next) {
                stack.extend(element.children);
            }
            self.pending.remove(&next);
        }
    }

    fn is_attached(&self, node: NodeRef) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == self.head || current == self.body {
                return true;
            }
            cursor = self.nodes.get(&current).and_then(|element| element.parent);
        }
        false
    }

    fn matches_resource(&self, node: NodeRef, kind: ResourceKind, key: &str) -> bool {
        let Some(element) = self.nodes.get(&node) else {
            return false;
        };
        match kind {
            ResourceKind::Stylesheet => {
                element.tag == "link"
                    && self.attribute(node, "rel") == Some("stylesheet")
                    && self.attribute(node, "href") == Some(key)
            }
            ResourceKind::Script => {
                element.tag == "script" && self.attribute(node, "src") == Some(key)
            }
            ResourceKind::StyleOverride => {
                element.tag == "style" && self.attribute(node, "id") == Some(key)
            }
        }
    }
}

/// An in-memory document with a `<head>` and a `<body>`.
///
/// Resource loads settle immediately as [`LoadOutcome::Loaded`] unless the
/// URL was marked with [`EmulatedDom::fail`] or [`EmulatedDom::hold`].
/// Delays resolve immediately and are recorded.
pub struct EmulatedDom {
    state: RefCell<DocumentState>,
}

impl Default for EmulatedDom {
    fn default() -> Self {
        let mut state = DocumentState {
            next_id: 0,
            nodes: HashMap::new(),
            head: NodeRef(0),
            body: NodeRef(0),
            held: HashSet::new(),
            failing: HashSet::new(),
            pending: HashMap::new(),
            delays: Vec::new(),
        };
        state.head = state.create("head");
        state.body = state.create("body");

        Self {
            state: RefCell::new(state),
        }
    }
}

impl EmulatedDom {
    /// The document head.
    pub fn head(&self) -> NodeRef {
        self.state.borrow().head
    }

    /// The document body.
    pub fn body(&self) -> NodeRef {
        self.state.borrow().body
    }

    /// Append an empty widget container to the body.
    pub fn create_container(&self) -> NodeRef {
        let mut state = self.state.borrow_mut();
        let container = state.create("div");
        state.set_attribute(container, "class", CONTAINER_CLASS);
        let body = state.body;
        // Both nodes were just created or always exist.
        let _ = state.append(body, container);
        container
    }

    /// Keep loads of `url` pending until [`EmulatedDom::release`].
    pub fn hold(&self, url: &str) {
        self.state.borrow_mut().held.insert(url.to_owned());
    }

    /// Make future loads of `url` fire their error event.
    pub fn fail(&self, url: &str) {
        self.state.borrow_mut().failing.insert(url.to_owned());
    }

    /// Stop holding `url` and settle its pending loads with `outcome`.
    /// Returns how many loads were settled.
    pub fn release(&self, url: &str, outcome: LoadOutcome) -> usize {
        let mut state = self.state.borrow_mut();
        state.held.remove(url);

        let nodes: Vec<NodeRef> = state
            .pending
            .iter()
            .filter(|(_, pending)| pending.url == url)
            .map(|(node, _)| *node)
            .collect();

        let mut settled = 0;
        for node in nodes {
            if let Some(pending) = state.pending.remove(&node) {
                if pending.settle.send(outcome).is_ok() {
                    settled += 1;
                }
            }
        }
        settled
    }

    /// Number of loads still waiting for `release`.
    pub fn pending_loads(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Number of nodes in the head matching `kind` and `url` (or style id).
    pub fn count_resources(&self, kind: ResourceKind, url: &str) -> usize {
        let state = self.state.borrow();
        let head = state.head;
        state
            .nodes
            .get(&head)
            .map(|element| {
                element
                    .children
                    .iter()
                    .filter(|child| state.matches_resource(**child, kind, url))
                    .count()
            })
            .unwrap_or(0)
    }

    /// The children of `node`, in document order.
    pub fn children(&self, node: NodeRef) -> Vec<NodeRef> {
        self.state
            .borrow()
            .nodes
            .get(&node)
            .map(|element| element.children.clone())
            .unwrap_or_default()
    }

    /// Read an attribute of `node`.
    pub fn attribute(&self, node: NodeRef, name: &str) -> Option<String> {
        self.state.borrow().attribute(node, name).map(str::to_owned)
    }

    /// The tag name of `node`.
    pub fn tag(&self, node: NodeRef) -> Option<String> {
        self.state
            .borrow()
            .nodes
            .get(&node)
            .map(|element| element.tag.clone())
    }

    /// The text content of `node`.
    pub fn text(&self, node: NodeRef) -> Option<String> {
        self.state
            .borrow()
            .nodes
            .get(&node)
            .and_then(|element| element.text.clone())
    }

    /// Whether `node` is still reachable from the head or the body.
    pub fn is_attached(&self, node: NodeRef) -> bool {
        self.state.borrow().is_attached(node)
    }

    /// Every delay requested so far.
    pub fn delays(&self) -> Vec<Duration> {
        self.state.borrow().delays.clone()
    }
}

impl Dom for EmulatedDom {
    type Node = NodeRef;

    fn find_resource(&self, kind: ResourceKind, url: &str) -> Option<NodeRef> {
        let state = self.state.borrow();
        state
            .nodes
            .get(&state.head)?
            .children
            .iter()
            .copied()
            .find(|child| state.matches_resource(*child, kind, url))
    }

    fn insert_resource(
        &self,
        kind: ResourceKind,
        url: &str,
    ) -> Result<(NodeRef, LoadFuture), WidgetError> {
        let mut state = self.state.borrow_mut();
        let node = match kind {
            ResourceKind::Stylesheet => {
                let node = state.create("link");
                state.set_attribute(node, "rel", "stylesheet");
                state.set_attribute(node, "href", url);
                node
            }
            ResourceKind::Script => {
                let node = state.create("script");
                state.set_attribute(node, "src", url);
                state.set_attribute(node, "async", "");
                node
            }
            ResourceKind::StyleOverride => {
                return Err(WidgetError::Dom(
                    "style overrides have no load event; use insert_style".into(),
                ));
            }
        };
        let head = state.head;
        state.append(head, node)?;

        let loaded = if state.failing.contains(url) {
            ready(LoadOutcome::Failed).boxed_local()
        } else if state.held.contains(url) {
            let (settle, settled) = oneshot::channel();
            state.pending.insert(
                node,
                PendingLoad {
                    url: url.to_owned(),
                    settle,
                },
            );
            settled
                .map(|outcome| outcome.unwrap_or(LoadOutcome::Failed))
                .boxed_local()
        } else {
            ready(LoadOutcome::Loaded).boxed_local()
        };

        Ok((node, loaded))
    }

    fn find_by_id(&self, id: &str) -> Option<NodeRef> {
        let state = self.state.borrow();
        // Node ids grow with creation order, so the smallest match is the
        // first one created.
        state
            .nodes
            .keys()
            .copied()
            .filter(|node| state.attribute(*node, "id") == Some(id) && state.is_attached(*node))
            .min()
    }

    fn insert_style(&self, id: &str, css: &str) -> Result<NodeRef, WidgetError> {
        let mut state = self.state.borrow_mut();
        let node = state.create("style");
        state.set_attribute(node, "id", id);
        if let Some(element) = state.nodes.get_mut(&node) {
            element.text = Some(css.to_owned());
        }
        let head = state.head;
        state.append(head, node)?;
        Ok(node)
    }

    fn clear_children(&self, parent: &NodeRef) {
        let mut state = self.state.borrow_mut();
        let children = state
            .nodes
            .get(parent)
            .map(|element| element.children.clone())
            .unwrap_or_default();
        for child in children {
            state.remove_subtree(child);
        }
    }

    fn append_element(
        &self,
        parent: &NodeRef,
        tag: &str,
        attributes: &[(&str, &str)],
    ) -> Result<NodeRef, WidgetError> {
        let mut state = self.state.borrow_mut();
        if !state.nodes.contains_key(parent) {
            return Err(WidgetError::Dom(format!("{parent:?} is not in the document")));
        }
        let node = state.create(tag);
        for (name, value) in attributes {
            state.set_attribute(node, name, value);
        }
        state.append(*parent, node)?;
        Ok(node)
    }

    fn remove(&self, node: &NodeRef) {
        let mut state = self.state.borrow_mut();
        if *node == state.head || *node == state.body {
            return;
        }
        state.remove_subtree(*node);
    }

    fn delay(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        self.state.borrow_mut().delays.push(duration);
        ready(()).boxed_local()
    }
}
