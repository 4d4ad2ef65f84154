use std::{cell::RefCell, rc::Rc};

use js_sys::{Array, Function, Object, Reflect, WeakMap};
use wasm_bindgen::{JsCast, prelude::*};
use wasm_bindgen_futures::JsFuture;

use super::js_error;
use crate::{CallObserver, InterceptedCall, NetworkStack, RawBody, WidgetError};

#[wasm_bindgen(inline_js = "export function bind_this(hook) { \
    return function(...args) { return hook(this, args); }; \
}")]
extern "C" {
    /// Wrap `hook` in a plain function that passes its receiver along, so
    /// it can stand in for a prototype method.
    fn bind_this(hook: &JsValue) -> Function;
}

fn network_error(value: JsValue) -> WidgetError {
    WidgetError::Network(js_error(value))
}

fn property(target: &JsValue, name: &str) -> Result<JsValue, WidgetError> {
    Reflect::get(target, &JsValue::from_str(name)).map_err(network_error)
}

fn function(target: &JsValue, name: &str) -> Result<Function, WidgetError> {
    property(target, name)?
        .dyn_into::<Function>()
        .map_err(|_| WidgetError::Network(format!("`{name}` is not a function")))
}

fn entries(value: &JsValue) -> Vec<(String, String)> {
    let Ok(Some(iterator)) = js_sys::try_iter(value) else {
        return Vec::new();
    };
    iterator
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let entry: Array = entry.dyn_into().ok()?;
            // File entries have no string value and are skipped.
            Some((entry.get(0).as_string()?, entry.get(1).as_string()?))
        })
        .collect()
}

/// Read a request body the way the page handed it over.
fn raw_body(body: &JsValue) -> Option<RawBody> {
    if body.is_undefined() || body.is_null() {
        return None;
    }
    if let Some(text) = body.as_string() {
        return Some(RawBody::Text(text));
    }
    if body.is_instance_of::<web_sys::FormData>() {
        return Some(RawBody::FormData(entries(body)));
    }
    if body.is_instance_of::<web_sys::UrlSearchParams>() {
        return Some(RawBody::UrlSearchParams(entries(body)));
    }
    Some(RawBody::Opaque)
}

/// Describe a `fetch(input, init)` call. `input` may be a string, a `URL`
/// or a `Request`.
fn fetch_call(input: &JsValue, init: &JsValue) -> InterceptedCall {
    let url = input
        .as_string()
        .or_else(|| property(input, "url").ok()?.as_string())
        .or_else(|| input.dyn_ref::<Object>().map(|object| object.to_string().into()))
        .unwrap_or_default();

    let has_init = init.is_object();
    let method = has_init
        .then(|| property(init, "method").ok()?.as_string())
        .flatten()
        .or_else(|| property(input, "method").ok()?.as_string())
        .unwrap_or_else(|| "GET".into());

    InterceptedCall {
        method,
        url,
        raw_body: has_init
            .then(|| property(init, "body").ok())
            .flatten()
            .and_then(|body| raw_body(&body)),
    }
}

/// Resolve to the original response while a clone of it is read for
/// `observer`.
fn tap_response(
    promise: JsValue,
    call: InterceptedCall,
    observer: Rc<dyn CallObserver>,
) -> Result<JsValue, JsValue> {
    let on_response = Closure::once_into_js(move |response: JsValue| -> JsValue {
        let copy = response
            .dyn_ref::<web_sys::Response>()
            .and_then(|response| response.clone().ok());
        if let Some(copy) = copy {
            wasm_bindgen_futures::spawn_local(async move {
                let Ok(text) = copy.text() else {
                    return;
                };
                if let Ok(body) = JsFuture::from(text).await {
                    if let Some(body) = body.as_string() {
                        observer.on_response(&call, &body);
                    }
                }
            });
        }
        response
    });

    let then: Function = Reflect::get(&promise, &"then".into())?.dyn_into()?;
    then.call1(&promise, &on_response)
}

type FetchHook = Closure<dyn Fn(JsValue, JsValue) -> Result<JsValue, JsValue>>;
type MethodHook = Closure<dyn Fn(JsValue, Array) -> Result<JsValue, JsValue>>;

/// The primitives the wrappers forward to.
#[derive(Clone)]
struct Targets {
    fetch: Function,
    open: Function,
    send: Function,
}

/// What the wrappers read on every call. Clearing `observer` turns them into
/// plain pass-throughs.
struct Relay {
    observer: RefCell<Option<Rc<dyn CallObserver>>>,
    targets: RefCell<Option<Targets>>,
    opened: WeakMap,
}

impl Relay {
    fn new() -> Self {
        Self {
            observer: RefCell::new(None),
            targets: RefCell::new(None),
            opened: WeakMap::new(),
        }
    }

    fn observer(&self) -> Option<Rc<dyn CallObserver>> {
        self.observer.borrow().clone()
    }

    fn targets(&self) -> Result<Targets, JsValue> {
        self.targets
            .borrow()
            .clone()
            .ok_or_else(|| JsValue::from_str("network primitives were never captured"))
    }
}

fn wrap_fetch(relay: Rc<Relay>) -> FetchHook {
    let global = js_sys::global();
    Closure::new(move |input: JsValue, init: JsValue| -> Result<JsValue, JsValue> {
        let targets = relay.targets()?;
        let Some(observer) = relay.observer() else {
            return targets.fetch.call2(&global, &input, &init);
        };

        let call = fetch_call(&input, &init);
        observer.on_call(&call);

        let promise = targets.fetch.call2(&global, &input, &init)?;
        if observer.wants_response(&call) {
            return tap_response(promise, call, observer);
        }
        Ok(promise)
    })
}

fn wrap_open(relay: Rc<Relay>) -> MethodHook {
    Closure::new(move |xhr: JsValue, args: Array| -> Result<JsValue, JsValue> {
        if let Some(object) = xhr.dyn_ref::<Object>() {
            relay
                .opened
                .set(object, &Array::of2(&args.get(0), &args.get(1)));
        }
        relay.targets()?.open.apply(&xhr, &args)
    })
}

fn observe_send(observer: Rc<dyn CallObserver>, xhr: &JsValue, opened: &Array, body: &JsValue) {
    let call = InterceptedCall {
        method: opened.get(0).as_string().unwrap_or_default(),
        url: opened.get(1).as_string().unwrap_or_default(),
        raw_body: raw_body(body),
    };
    observer.on_call(&call);

    if !observer.wants_response(&call) {
        return;
    }
    let Some(target) = xhr.dyn_ref::<web_sys::EventTarget>() else {
        return;
    };

    let request = xhr.clone();
    let on_load = Closure::once_into_js(move || {
        let body = request
            .dyn_ref::<web_sys::XmlHttpRequest>()
            .and_then(|request| request.response_text().ok().flatten());
        if let Some(body) = body {
            observer.on_response(&call, &body);
        }
    });
    if let Err(error) = target.add_event_listener_with_callback("load", on_load.unchecked_ref()) {
        tracing::warn!(error = %js_error(error), "could not observe the XHR response");
    }
}

fn wrap_send(relay: Rc<Relay>) -> MethodHook {
    Closure::new(move |xhr: JsValue, args: Array| -> Result<JsValue, JsValue> {
        let targets = relay.targets()?;
        if let Some(observer) = relay.observer() {
            let opened = xhr
                .dyn_ref::<Object>()
                .map(|object| relay.opened.get(object))
                .and_then(|opened| opened.dyn_into::<Array>().ok());
            if let Some(opened) = opened {
                observe_send(observer, &xhr, &opened, &args.get(0));
            }
        }
        targets.send.apply(&xhr, &args)
    })
}

struct Wrappers {
    fetch: FetchHook,
    open: Function,
    send: Function,
    // The functions behind `open` and `send`.
    _hooks: [MethodHook; 2],
}

/// The primitives that were in place before [`BrowserNetwork`] patched them.
pub struct BrowserPatch {
    original: Targets,
}

/// The page's `fetch` and `XMLHttpRequest.prototype`.
///
/// The wrappers are built once and reused by every install. Code that cached
/// one keeps working after a restore, it just stops being observed. They are
/// freed with the network, so it should live as long as the page.
pub struct BrowserNetwork {
    relay: Rc<Relay>,
    wrappers: Wrappers,
}

impl Default for BrowserNetwork {
    fn default() -> Self {
        let relay = Rc::new(Relay::new());
        let open = wrap_open(relay.clone());
        let send = wrap_send(relay.clone());

        Self {
            wrappers: Wrappers {
                fetch: wrap_fetch(relay.clone()),
                open: bind_this(open.as_ref()),
                send: bind_this(send.as_ref()),
                _hooks: [open, send],
            },
            relay,
        }
    }
}

impl BrowserNetwork {
    fn xhr_prototype() -> Result<JsValue, WidgetError> {
        let constructor = property(&js_sys::global(), "XMLHttpRequest")?;
        property(&constructor, "prototype")
    }

    fn apply(fetch: &JsValue, open: &JsValue, send: &JsValue) -> Result<(), WidgetError> {
        let prototype = Self::xhr_prototype()?;
        Reflect::set(&js_sys::global(), &"fetch".into(), fetch).map_err(network_error)?;
        Reflect::set(&prototype, &"open".into(), open).map_err(network_error)?;
        Reflect::set(&prototype, &"send".into(), send).map_err(network_error)?;
        Ok(())
    }
}

impl NetworkStack for BrowserNetwork {
    type Patch = BrowserPatch;

    fn install(&self, observer: Rc<dyn CallObserver>) -> Result<BrowserPatch, WidgetError> {
        let prototype = Self::xhr_prototype()?;
        let original = Targets {
            fetch: function(&js_sys::global(), "fetch")?,
            open: function(&prototype, "open")?,
            send: function(&prototype, "send")?,
        };

        *self.relay.targets.borrow_mut() = Some(original.clone());
        *self.relay.observer.borrow_mut() = Some(observer);

        let wrappers = &self.wrappers;
        if let Err(error) = Self::apply(wrappers.fetch.as_ref(), &wrappers.open, &wrappers.send) {
            self.relay.observer.borrow_mut().take();
            return Err(error);
        }

        tracing::debug!("patched fetch and XMLHttpRequest");
        Ok(BrowserPatch { original })
    }

    fn restore(&self, patch: BrowserPatch) {
        self.relay.observer.borrow_mut().take();

        let BrowserPatch { original } = patch;
        match Self::apply(&original.fetch, &original.open, &original.send) {
            Ok(()) => tracing::debug!("restored fetch and XMLHttpRequest"),
            Err(error) => tracing::error!(%error, "could not restore network primitives"),
        }
    }
}
