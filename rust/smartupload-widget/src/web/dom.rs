use std::{cell::RefCell, rc::Rc, time::Duration};

use futures::{FutureExt, channel::oneshot, future::LocalBoxFuture};
use wasm_bindgen::{JsCast, prelude::*};
use web_sys::{Document, Element, HtmlHeadElement};

use super::js_error;
use crate::{Dom, LoadFuture, LoadOutcome, ResourceKind, WidgetError};

type Settle = Rc<RefCell<Option<oneshot::Sender<LoadOutcome>>>>;

fn settle(sender: &Settle, outcome: LoadOutcome) {
    if let Some(sender) = sender.borrow_mut().take() {
        let _ = sender.send(outcome);
    }
}

/// Quote a value for use inside a CSS attribute selector.
fn quoted(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// The page's `document`.
pub struct BrowserDom {
    document: Document,
    pending: RefCell<Vec<(Element, Settle)>>,
}

impl BrowserDom {
    /// Bind to the current window's document.
    pub fn new() -> Result<Self, WidgetError> {
        let document = web_sys::window()
            .and_then(|window| window.document())
            .ok_or_else(|| WidgetError::Dom("no document in this context".into()))?;

        Ok(Self {
            document,
            pending: RefCell::new(Vec::new()),
        })
    }

    fn head(&self) -> Result<HtmlHeadElement, WidgetError> {
        self.document
            .head()
            .ok_or_else(|| WidgetError::Dom("document has no <head>".into()))
    }

    fn create(&self, tag: &str, attributes: &[(&str, &str)]) -> Result<Element, WidgetError> {
        let element = self
            .document
            .create_element(tag)
            .map_err(|error| WidgetError::Dom(js_error(error)))?;
        for (name, value) in attributes {
            element
                .set_attribute(name, value)
                .map_err(|error| WidgetError::Dom(js_error(error)))?;
        }
        Ok(element)
    }

    /// Settle the load of `element` once it fires `load` or `error`, or when
    /// it is removed first.
    fn watch(&self, element: &Element) -> Result<LoadFuture, WidgetError> {
        let (sender, settled) = oneshot::channel();
        let sender: Settle = Rc::new(RefCell::new(Some(sender)));

        let on_load = Closure::<dyn FnMut()>::new({
            let sender = sender.clone();
            move || settle(&sender, LoadOutcome::Loaded)
        });
        let on_error = Closure::<dyn FnMut()>::new({
            let sender = sender.clone();
            move || settle(&sender, LoadOutcome::Failed)
        });

        element
            .add_event_listener_with_callback("load", on_load.as_ref().unchecked_ref())
            .map_err(|error| WidgetError::Dom(js_error(error)))?;
        element
            .add_event_listener_with_callback("error", on_error.as_ref().unchecked_ref())
            .map_err(|error| WidgetError::Dom(js_error(error)))?;

        self.pending
            .borrow_mut()
            .push((element.clone(), sender.clone()));

        let element = element.clone();
        Ok(async move {
            let outcome = settled.await.unwrap_or(LoadOutcome::Failed);
            let _ = element
                .remove_event_listener_with_callback("load", on_load.as_ref().unchecked_ref());
            let _ = element
                .remove_event_listener_with_callback("error", on_error.as_ref().unchecked_ref());
            outcome
        }
        .boxed_local())
    }
}

impl Dom for BrowserDom {
    type Node = Element;

    fn find_resource(&self, kind: ResourceKind, url: &str) -> Option<Element> {
        let selector = match kind {
            ResourceKind::Stylesheet => {
                format!("link[rel=\"stylesheet\"][href={}]", quoted(url))
            }
            ResourceKind::Script => format!("script[src={}]", quoted(url)),
            ResourceKind::StyleOverride => format!("style[id={}]", quoted(url)),
        };
        self.document.query_selector(&selector).ok().flatten()
    }

    fn insert_resource(
        &self,
        kind: ResourceKind,
        url: &str,
    ) -> Result<(Element, LoadFuture), WidgetError> {
        let element = match kind {
            ResourceKind::Stylesheet => {
                self.create("link", &[("rel", "stylesheet"), ("href", url)])?
            }
            ResourceKind::Script => self.create("script", &[("src", url), ("async", "")])?,
            ResourceKind::StyleOverride => {
                return Err(WidgetError::Dom(
                    "style overrides have no load event; use insert_style".into(),
                ));
            }
        };

        let loaded = self.watch(&element)?;
        self.head()?
            .append_child(&element)
            .map_err(|error| WidgetError::Dom(js_error(error)))?;

        Ok((element, loaded))
    }

    fn find_by_id(&self, id: &str) -> Option<Element> {
        self.document.get_element_by_id(id)
    }

    fn insert_style(&self, id: &str, css: &str) -> Result<Element, WidgetError> {
        let element = self.create("style", &[("id", id)])?;
        element.set_text_content(Some(css));
        self.head()?
            .append_child(&element)
            .map_err(|error| WidgetError::Dom(js_error(error)))?;
        Ok(element)
    }

    fn clear_children(&self, parent: &Element) {
        parent.set_inner_html("");
    }

    fn append_element(
        &self,
        parent: &Element,
        tag: &str,
        attributes: &[(&str, &str)],
    ) -> Result<Element, WidgetError> {
        let element = self.create(tag, attributes)?;
        parent
            .append_child(&element)
            .map_err(|error| WidgetError::Dom(js_error(error)))?;
        Ok(element)
    }

    fn remove(&self, node: &Element) {
        let removed: Vec<Settle> = {
            let mut pending = self.pending.borrow_mut();
            pending.retain(|(_, sender)| sender.borrow().is_some());
            let (removed, kept): (Vec<_>, Vec<_>) = pending
                .drain(..)
                .partition(|(element, _)| element == node);
            *pending = kept;
            removed.into_iter().map(|(_, sender)| sender).collect()
        };

        node.remove();
        for sender in removed {
            settle(&sender, LoadOutcome::Failed);
        }
    }

    fn delay(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        let millis = i32::try_from(duration.as_millis()).unwrap_or(i32::MAX);
        let promise = js_sys::Promise::new(&mut |resolve, _reject| {
            let scheduled = web_sys::window().map(|window| {
                window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, millis)
            });
            if !matches!(scheduled, Some(Ok(_))) {
                let _ = resolve.call0(&JsValue::UNDEFINED);
            }
        });

        async move {
            let _ = wasm_bindgen_futures::JsFuture::from(promise).await;
        }
        .boxed_local()
    }
}
