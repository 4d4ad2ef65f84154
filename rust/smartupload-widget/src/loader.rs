//! Page-wide loading of the vendor's stylesheet and script.
//!
//! Resources are tracked in a table keyed by kind and URL. Every
//! `ensure_*` call returns a [`ResourceLease`]; concurrent callers for the
//! same resource share one node and one in-flight load. When the last lease
//! on a script or style override is dropped its node is removed from the
//! document. Stylesheets stay: the vendor stylesheet is page-wide and
//! harmless once present.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use futures::{
    FutureExt,
    future::{Shared, ready},
};

use crate::{Dom, LoadFuture, LoadOutcome, ResourceKind, WidgetError};

/// Identifies an entry in the resource table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResourceKey {
    kind: ResourceKind,
    // The URL, or the element id for style overrides
    key: String,
}

impl ResourceKey {
    fn new(kind: ResourceKind, key: &str) -> Self {
        Self {
            kind,
            key: key.to_owned(),
        }
    }
}

/// A load that any number of leases can await.
pub type SharedLoad = Shared<LoadFuture>;

struct Entry<D: Dom> {
    node: D::Node,
    leases: usize,
    loaded: SharedLoad,
}

struct LoaderState<D: Dom> {
    dom: Rc<D>,
    table: RefCell<HashMap<ResourceKey, Entry<D>>>,
}

impl<D: Dom> LoaderState<D> {
    fn release(&self, key: &ResourceKey) {
        let removed = {
            let mut table = self.table.borrow_mut();
            let Some(entry) = table.get_mut(key) else {
                return;
            };
            entry.leases = entry.leases.saturating_sub(1);
            if entry.leases > 0 {
                return;
            }
            table.remove(key)
        };

        if let Some(entry) = removed {
            if key.kind != ResourceKind::Stylesheet {
                tracing::debug!(kind = %key.kind, key = %key.key, "removing widget resource");
                self.dom.remove(&entry.node);
            }
        }
    }
}

/// Loads each external resource once per page, however many widgets ask.
pub struct ResourceLoader<D: Dom> {
    state: Rc<LoaderState<D>>,
}

impl<D: Dom> Clone for ResourceLoader<D> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<D: Dom> ResourceLoader<D> {
    /// Create a loader with an empty table.
    pub fn new(dom: Rc<D>) -> Self {
        Self {
            state: Rc::new(LoaderState {
                dom,
                table: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Make sure the stylesheet at `url` is in the document. A stylesheet
    /// that is already present resolves as loaded without a second node.
    pub fn ensure_stylesheet(&self, url: &str) -> Result<ResourceLease<D>, WidgetError> {
        let key = ResourceKey::new(ResourceKind::Stylesheet, url);
        if let Some(lease) = self.share(&key) {
            return Ok(lease);
        }

        let dom = &self.state.dom;
        let (node, loaded) = match dom.find_resource(ResourceKind::Stylesheet, url) {
            Some(node) => {
                tracing::debug!(%url, "stylesheet already present");
                (node, ready(LoadOutcome::Loaded).boxed_local())
            }
            None => dom.insert_resource(ResourceKind::Stylesheet, url)?,
        };

        Ok(self.track(key, node, loaded))
    }

    /// Make sure the script at `url` is in the document. If no lease holds
    /// it, any node left behind for that URL is replaced by a fresh one so
    /// the vendor script runs again against the current mount.
    pub fn ensure_script(&self, url: &str) -> Result<ResourceLease<D>, WidgetError> {
        let key = ResourceKey::new(ResourceKind::Script, url);
        if let Some(lease) = self.share(&key) {
            return Ok(lease);
        }

        let dom = &self.state.dom;
        if let Some(stale) = dom.find_resource(ResourceKind::Script, url) {
            tracing::debug!(%url, "replacing untracked script");
            dom.remove(&stale);
        }
        let (node, loaded) = dom.insert_resource(ResourceKind::Script, url)?;

        Ok(self.track(key, node, loaded))
    }

    /// Make sure an inline `<style>` element with `id` holds `css`. The first
    /// lease replaces any element already using that id.
    pub fn ensure_style_override(
        &self,
        id: &str,
        css: &str,
    ) -> Result<ResourceLease<D>, WidgetError> {
        let key = ResourceKey::new(ResourceKind::StyleOverride, id);
        if let Some(lease) = self.share(&key) {
            return Ok(lease);
        }

        let dom = &self.state.dom;
        if let Some(existing) = dom.find_by_id(id) {
            dom.remove(&existing);
        }
        let node = dom.insert_style(id, css)?;

        Ok(self.track(key, node, ready(LoadOutcome::Loaded).boxed_local()))
    }

    /// Number of live leases on a resource.
    pub fn lease_count(&self, kind: ResourceKind, key: &str) -> usize {
        self.state
            .table
            .borrow()
            .get(&ResourceKey::new(kind, key))
            .map(|entry| entry.leases)
            .unwrap_or(0)
    }

    fn share(&self, key: &ResourceKey) -> Option<ResourceLease<D>> {
        let mut table = self.state.table.borrow_mut();
        let entry = table.get_mut(key)?;
        entry.leases += 1;

        Some(ResourceLease {
            key: key.clone(),
            loaded: entry.loaded.clone(),
            state: self.state.clone(),
        })
    }

    fn track(&self, key: ResourceKey, node: D::Node, loaded: LoadFuture) -> ResourceLease<D> {
        let kind = key.kind;
        let url = key.key.clone();
        let loaded = async move {
            let outcome = loaded.await;
            match (outcome, kind) {
                (LoadOutcome::Failed, ResourceKind::Script) => {
                    tracing::error!(%url, "failed to load widget script")
                }
                (LoadOutcome::Failed, _) => {
                    tracing::warn!(%url, %kind, "failed to load widget resource")
                }
                (LoadOutcome::Loaded, _) => tracing::debug!(%url, %kind, "widget resource loaded"),
            }
            outcome
        }
        .boxed_local()
        .shared();

        self.state.table.borrow_mut().insert(
            key.clone(),
            Entry {
                node,
                leases: 1,
                loaded: loaded.clone(),
            },
        );

        ResourceLease {
            key,
            loaded,
            state: self.state.clone(),
        }
    }
}

/// A claim on a tracked resource. Dropping the last lease on a script or
/// style override removes its node.
pub struct ResourceLease<D: Dom> {
    key: ResourceKey,
    loaded: SharedLoad,
    state: Rc<LoaderState<D>>,
}

impl<D: Dom> ResourceLease<D> {
    /// Resolves when the resource settles. Never fails: a broken resource
    /// yields [`LoadOutcome::Failed`].
    pub fn loaded(&self) -> SharedLoad {
        self.loaded.clone()
    }
}

impl<D: Dom> Drop for ResourceLease<D> {
    fn drop(&mut self) {
        self.state.release(&self.key);
    }
}

impl<D: Dom> std::fmt::Debug for ResourceLease<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLease")
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::emulator::EmulatedDom;

    #[cfg(target_arch = "wasm32")]
    use wasm_bindgen_test::wasm_bindgen_test;

    const CSS: &str = "https://cdn.example.com/widget.css";
    const JS: &str = "https://cdn.example.com/widget.js";

    fn loader() -> (Rc<EmulatedDom>, ResourceLoader<EmulatedDom>) {
        let dom = Rc::new(EmulatedDom::default());
        (dom.clone(), ResourceLoader::new(dom))
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_inserts_each_resource_once() -> anyhow::Result<()> {
        let (dom, loader) = loader();

        let mut leases = Vec::new();
        for _ in 0..3 {
            let stylesheet = loader.ensure_stylesheet(CSS)?;
            let script = loader.ensure_script(JS)?;
            assert_eq!(stylesheet.loaded().await, LoadOutcome::Loaded);
            assert_eq!(script.loaded().await, LoadOutcome::Loaded);
            leases.push((stylesheet, script));
        }

        assert_eq!(dom.count_resources(ResourceKind::Stylesheet, CSS), 1);
        assert_eq!(dom.count_resources(ResourceKind::Script, JS), 1);
        assert_eq!(loader.lease_count(ResourceKind::Script, JS), 3);
        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_reuses_a_stylesheet_already_in_the_document() -> anyhow::Result<()> {
        let (dom, loader) = loader();
        dom.insert_resource(ResourceKind::Stylesheet, CSS)?;
        dom.hold(CSS);

        let lease = loader.ensure_stylesheet(CSS)?;

        assert_eq!(lease.loaded().await, LoadOutcome::Loaded);
        assert_eq!(dom.count_resources(ResourceKind::Stylesheet, CSS), 1);
        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_removes_scripts_with_their_last_lease() -> anyhow::Result<()> {
        let (dom, loader) = loader();

        let first = loader.ensure_script(JS)?;
        let second = loader.ensure_script(JS)?;
        drop(first);
        assert_eq!(dom.count_resources(ResourceKind::Script, JS), 1);

        drop(second);
        assert_eq!(dom.count_resources(ResourceKind::Script, JS), 0);

        let stylesheet = loader.ensure_stylesheet(CSS)?;
        drop(stylesheet);
        assert_eq!(dom.count_resources(ResourceKind::Stylesheet, CSS), 1);
        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_replaces_an_untracked_script() -> anyhow::Result<()> {
        let (dom, loader) = loader();
        let (leftover, _) = dom.insert_resource(ResourceKind::Script, JS)?;

        let lease = loader.ensure_script(JS)?;

        assert_eq!(lease.loaded().await, LoadOutcome::Loaded);
        assert!(!dom.is_attached(leftover));
        assert_eq!(dom.count_resources(ResourceKind::Script, JS), 1);
        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_reports_failures_without_raising() -> anyhow::Result<()> {
        let (dom, loader) = loader();
        dom.fail(CSS);

        let stylesheet = loader.ensure_stylesheet(CSS)?;
        let script = loader.ensure_script(JS)?;

        assert_eq!(stylesheet.loaded().await, LoadOutcome::Failed);
        assert_eq!(script.loaded().await, LoadOutcome::Loaded);
        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_shares_an_in_flight_load() -> anyhow::Result<()> {
        let (dom, loader) = loader();
        dom.hold(JS);

        let first = loader.ensure_script(JS)?;
        let second = loader.ensure_script(JS)?;
        assert_eq!(dom.pending_loads(), 1);

        dom.release(JS, LoadOutcome::Loaded);

        let (a, b) = futures::join!(first.loaded(), second.loaded());
        assert_eq!((a, b), (LoadOutcome::Loaded, LoadOutcome::Loaded));
        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_replaces_and_removes_style_overrides() -> anyhow::Result<()> {
        let (dom, loader) = loader();
        let foreign = dom.insert_style("widget-styles", "p { color: red }")?;

        let lease = loader.ensure_style_override("widget-styles", ".a { margin: 0 }")?;
        let node = dom.find_by_id("widget-styles");

        assert!(!dom.is_attached(foreign));
        assert_eq!(
            node.and_then(|node| dom.text(node)),
            Some(".a { margin: 0 }".to_string())
        );

        drop(lease);
        assert_eq!(dom.find_by_id("widget-styles"), None);
        Ok(())
    }
}
