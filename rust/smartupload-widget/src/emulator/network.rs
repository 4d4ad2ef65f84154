use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use futures::{
    FutureExt,
    future::{LocalBoxFuture, ready},
};

use crate::{CallObserver, InterceptedCall, NetworkStack, RawBody, WidgetError};

/// A response produced by the emulated server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
}

impl Response {
    /// A `200` response with the given body.
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }
}

/// Arguments of an emulated `fetch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Target URL
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Request body
    pub body: Option<RawBody>,
}

impl FetchRequest {
    /// A `GET` request without a body.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".into(),
            body: None,
        }
    }

    /// A `POST` request carrying `body`.
    pub fn post(url: impl Into<String>, body: RawBody) -> Self {
        Self {
            url: url.into(),
            method: "POST".into(),
            body: Some(body),
        }
    }
}

type FetchResult = Result<Response, WidgetError>;

/// The page's fetch function.
pub type FetchFn = Rc<dyn Fn(FetchRequest) -> LocalBoxFuture<'static, FetchResult>>;
/// `XMLHttpRequest.prototype.open`
pub type OpenFn = Rc<dyn Fn(&XmlHttpRequest, &str, &str)>;
/// `XMLHttpRequest.prototype.send`
pub type SendFn = Rc<dyn Fn(&XmlHttpRequest, Option<RawBody>)>;

type Handler = Rc<dyn Fn(&InterceptedCall) -> FetchResult>;

struct Primitives {
    fetch: FetchFn,
    open: OpenFn,
    send: SendFn,
}

struct Server {
    handler: RefCell<Handler>,
    log: RefCell<Vec<InterceptedCall>>,
}

impl Server {
    fn handle(&self, call: InterceptedCall) -> FetchResult {
        self.log.borrow_mut().push(call.clone());
        let handler = self.handler.borrow().clone();
        handler(&call)
    }
}

type LoadListener = Rc<dyn Fn(&Response)>;

#[derive(Default)]
struct XhrState {
    opened: Option<(String, String)>,
    intercepted: Option<(String, String)>,
    response: Option<FetchResult>,
    load_listeners: Vec<LoadListener>,
}

/// An emulated `XMLHttpRequest`. `open` and `send` are looked up on the
/// network's shared prototype at call time, so patching the network affects
/// requests created before the patch.
pub struct XmlHttpRequest {
    prototype: Rc<RefCell<Primitives>>,
    state: RefCell<XhrState>,
}

impl XmlHttpRequest {
    /// Set the method and target of the request.
    pub fn open(&self, method: &str, url: &str) {
        let open = self.prototype.borrow().open.clone();
        open(self, method, url);
    }

    /// Send the request. The emulated server answers synchronously.
    pub fn send(&self, body: Option<RawBody>) {
        let send = self.prototype.borrow().send.clone();
        send(self, body);
    }

    /// The response, once the request completed.
    pub fn response(&self) -> Option<FetchResult> {
        self.state.borrow().response.clone()
    }

    /// Register a `load` listener.
    pub fn add_load_listener(&self, listener: impl Fn(&Response) + 'static) {
        self.state
            .borrow_mut()
            .load_listeners
            .push(Rc::new(listener));
    }

    fn complete(&self, result: FetchResult) {
        let listeners = {
            let mut state = self.state.borrow_mut();
            state.response = Some(result.clone());
            state.load_listeners.clone()
        };
        if let Ok(response) = result {
            for listener in listeners {
                listener(&response);
            }
        }
    }
}

/// The primitives captured when [`EmulatedNetwork`] was patched.
pub struct EmulatedPatch {
    fetch: FetchFn,
    open: OpenFn,
    send: SendFn,
}

/// An in-memory network stack with a fetch function, an XHR prototype and a
/// programmable server behind both.
pub struct EmulatedNetwork {
    prototype: Rc<RefCell<Primitives>>,
    server: Rc<Server>,
    installs: Cell<usize>,
    patched: Cell<bool>,
}

impl Default for EmulatedNetwork {
    fn default() -> Self {
        let default_handler: Handler = Rc::new(|_| Ok(Response::ok("{}")));
        let server = Rc::new(Server {
            handler: RefCell::new(default_handler),
            log: RefCell::new(Vec::new()),
        });

        let fetch: FetchFn = {
            let server = server.clone();
            Rc::new(move |request: FetchRequest| {
                let call = InterceptedCall {
                    method: request.method,
                    url: request.url,
                    raw_body: request.body,
                };
                ready(server.handle(call)).boxed_local()
            })
        };

        let open: OpenFn = Rc::new(|xhr: &XmlHttpRequest, method: &str, url: &str| {
            xhr.state.borrow_mut().opened = Some((method.to_owned(), url.to_owned()));
        });

        let send: SendFn = {
            let server = server.clone();
            Rc::new(move |xhr: &XmlHttpRequest, body: Option<RawBody>| {
                let opened = xhr.state.borrow().opened.clone();
                let result = match opened {
                    Some((method, url)) => server.handle(InterceptedCall {
                        method,
                        url,
                        raw_body: body,
                    }),
                    None => Err(WidgetError::Network("send() called before open()".into())),
                };
                xhr.complete(result);
            })
        };

        Self {
            prototype: Rc::new(RefCell::new(Primitives { fetch, open, send })),
            server,
            installs: Cell::new(0),
            patched: Cell::new(false),
        }
    }
}

impl EmulatedNetwork {
    /// Call the page's current fetch function.
    pub fn fetch(&self, request: FetchRequest) -> LocalBoxFuture<'static, FetchResult> {
        let fetch = self.prototype.borrow().fetch.clone();
        fetch(request)
    }

    /// Create a request object bound to the shared prototype.
    pub fn xhr(&self) -> XmlHttpRequest {
        XmlHttpRequest {
            prototype: self.prototype.clone(),
            state: RefCell::new(XhrState::default()),
        }
    }

    /// Replace the server's request handler.
    pub fn respond_with(&self, handler: impl Fn(&InterceptedCall) -> FetchResult + 'static) {
        *self.server.handler.borrow_mut() = Rc::new(handler);
    }

    /// Every call that reached the server, in order.
    pub fn requests(&self) -> Vec<InterceptedCall> {
        self.server.log.borrow().clone()
    }

    /// The current fetch, open and send references.
    pub fn primitives(&self) -> (FetchFn, OpenFn, SendFn) {
        let prototype = self.prototype.borrow();
        (
            prototype.fetch.clone(),
            prototype.open.clone(),
            prototype.send.clone(),
        )
    }

    /// Whether wrappers are currently installed.
    pub fn is_patched(&self) -> bool {
        self.patched.get()
    }

    /// How many times wrappers were installed over the network's lifetime.
    pub fn install_count(&self) -> usize {
        self.installs.get()
    }
}

impl NetworkStack for EmulatedNetwork {
    type Patch = EmulatedPatch;

    fn install(&self, observer: Rc<dyn CallObserver>) -> Result<EmulatedPatch, WidgetError> {
        let mut prototype = self.prototype.borrow_mut();
        let original = EmulatedPatch {
            fetch: prototype.fetch.clone(),
            open: prototype.open.clone(),
            send: prototype.send.clone(),
        };

        prototype.fetch = wrap_fetch(original.fetch.clone(), observer.clone());
        prototype.open = wrap_open(original.open.clone());
        prototype.send = wrap_send(original.send.clone(), observer);

        self.installs.set(self.installs.get() + 1);
        self.patched.set(true);
        Ok(original)
    }

    fn restore(&self, patch: EmulatedPatch) {
        let EmulatedPatch { fetch, open, send } = patch;
        *self.prototype.borrow_mut() = Primitives { fetch, open, send };
        self.patched.set(false);
    }
}

fn wrap_fetch(original: FetchFn, observer: Rc<dyn CallObserver>) -> FetchFn {
    Rc::new(move |request: FetchRequest| {
        let call = InterceptedCall {
            method: request.method.clone(),
            url: request.url.clone(),
            raw_body: request.body.clone(),
        };
        observer.on_call(&call);

        let forwarded = original(request);
        if !observer.wants_response(&call) {
            return forwarded;
        }

        let observer = observer.clone();
        async move {
            let result = forwarded.await;
            if let Ok(response) = &result {
                let copy = response.clone();
                observer.on_response(&call, &copy.body);
            }
            result
        }
        .boxed_local()
    })
}

fn wrap_open(original: OpenFn) -> OpenFn {
    Rc::new(move |xhr: &XmlHttpRequest, method: &str, url: &str| {
        xhr.state.borrow_mut().intercepted = Some((method.to_owned(), url.to_owned()));
        original(xhr, method, url);
    })
}

fn wrap_send(original: SendFn, observer: Rc<dyn CallObserver>) -> SendFn {
    Rc::new(move |xhr: &XmlHttpRequest, body: Option<RawBody>| {
        let intercepted = xhr.state.borrow().intercepted.clone();
        if let Some((method, url)) = intercepted {
            let call = InterceptedCall {
                method,
                url,
                raw_body: body.clone(),
            };
            observer.on_call(&call);
            if observer.wants_response(&call) {
                let observer = observer.clone();
                xhr.add_load_listener(move |response| observer.on_response(&call, &response.body));
            }
        }
        original(xhr, body);
    })
}
