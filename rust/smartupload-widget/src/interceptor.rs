//! A reference-counted registry over the page's network primitives.
//!
//! Patching shared primitives is only safe when it happens once: a second
//! install would capture the first wrapper as its "original", and restoring
//! in the wrong order would leave a wrapper behind for good. The registry
//! therefore owns the single [`NetworkStack::Patch`] for a page and hands out
//! [`Subscription`]s instead. The first subscription installs the patch, the
//! last one to drop restores it, and everything in between shares it.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use crate::{CallObserver, InterceptedCall, NetworkStack, WidgetError};

type SubscriberId = u64;

/// Fans calls out to the current subscribers. The patched primitives hold
/// this (and only this), so they never keep the patch record alive.
#[derive(Default)]
struct Dispatcher {
    subscribers: RefCell<Vec<(SubscriberId, Rc<dyn CallObserver>)>>,
}

impl Dispatcher {
    // Observers may subscribe or unsubscribe from inside a callback, so the
    // list is never borrowed while one runs.
    fn snapshot(&self) -> Vec<Rc<dyn CallObserver>> {
        self.subscribers
            .borrow()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect()
    }
}

impl CallObserver for Dispatcher {
    fn on_call(&self, call: &InterceptedCall) {
        tracing::trace!(method = %call.method, url = %call.url, "intercepted call");
        for observer in self.snapshot() {
            observer.on_call(call);
        }
    }

    fn wants_response(&self, call: &InterceptedCall) -> bool {
        self.snapshot()
            .iter()
            .any(|observer| observer.wants_response(call))
    }

    fn on_response(&self, call: &InterceptedCall, body: &str) {
        tracing::trace!(method = %call.method, url = %call.url, "intercepted response");
        for observer in self.snapshot() {
            if observer.wants_response(call) {
                observer.on_response(call, body);
            }
        }
    }
}

struct RegistryState<S: NetworkStack> {
    stack: Rc<S>,
    dispatcher: Rc<Dispatcher>,
    patch: RefCell<Option<S::Patch>>,
    next_id: Cell<SubscriberId>,
}

impl<S: NetworkStack> RegistryState<S> {
    fn unsubscribe(&self, id: SubscriberId) {
        let remaining = {
            let mut subscribers = self.dispatcher.subscribers.borrow_mut();
            subscribers.retain(|(subscriber, _)| *subscriber != id);
            subscribers.len()
        };

        if remaining == 0 {
            let patch = self.patch.borrow_mut().take();
            if let Some(patch) = patch {
                self.stack.restore(patch);
                tracing::debug!("network interception restored");
            }
        }
    }
}

/// The page-wide interception point. Cloning yields another handle to the
/// same registry.
pub struct InterceptorRegistry<S: NetworkStack> {
    state: Rc<RegistryState<S>>,
}

impl<S: NetworkStack> Clone for InterceptorRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<S: NetworkStack> InterceptorRegistry<S> {
    /// Create a registry for `stack`. Nothing is patched until the first
    /// subscription.
    pub fn new(stack: Rc<S>) -> Self {
        Self {
            state: Rc::new(RegistryState {
                stack,
                dispatcher: Rc::new(Dispatcher::default()),
                patch: RefCell::new(None),
                next_id: Cell::new(0),
            }),
        }
    }

    /// Start observing calls. Installs the patch if this is the first active
    /// subscription, otherwise shares the existing one.
    pub fn subscribe(&self, observer: Rc<dyn CallObserver>) -> Result<Subscription<S>, WidgetError> {
        let state = &self.state;

        if state.patch.borrow().is_none() {
            let dispatcher: Rc<dyn CallObserver> = state.dispatcher.clone();
            let patch = state.stack.install(dispatcher)?;
            *state.patch.borrow_mut() = Some(patch);
            tracing::debug!("network interception installed");
        }

        let id = state.next_id.get();
        state.next_id.set(id + 1);
        state
            .dispatcher
            .subscribers
            .borrow_mut()
            .push((id, observer));

        Ok(Subscription {
            id,
            state: state.clone(),
        })
    }

    /// Whether the page's primitives are currently patched.
    pub fn is_installed(&self) -> bool {
        self.state.patch.borrow().is_some()
    }

    /// The number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.state.dispatcher.subscribers.borrow().len()
    }
}

/// A live registration with an [`InterceptorRegistry`]. Dropping it stops
/// delivery to its observer and, if it was the last one, restores the
/// page's original primitives.
pub struct Subscription<S: NetworkStack> {
    id: SubscriberId,
    state: Rc<RegistryState<S>>,
}

impl<S: NetworkStack> Drop for Subscription<S> {
    fn drop(&mut self) {
        self.state.unsubscribe(self.id);
    }
}

impl<S: NetworkStack> std::fmt::Debug for Subscription<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        RawBody,
        emulator::{EmulatedNetwork, FetchRequest},
    };

    #[cfg(target_arch = "wasm32")]
    use wasm_bindgen_test::wasm_bindgen_test;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
    }

    impl CallObserver for Recorder {
        fn on_call(&self, call: &InterceptedCall) {
            self.calls.borrow_mut().push(call.url.clone());
        }

        fn wants_response(&self, _call: &InterceptedCall) -> bool {
            false
        }

        fn on_response(&self, _call: &InterceptedCall, _body: &str) {}
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), test)]
    fn it_restores_the_exact_original_primitives() -> anyhow::Result<()> {
        let network = Rc::new(EmulatedNetwork::default());
        let registry = InterceptorRegistry::new(network.clone());
        let (fetch, open, send) = network.primitives();

        let subscription = registry.subscribe(Rc::new(Recorder::default()))?;
        assert!(network.is_patched());
        assert!(!Rc::ptr_eq(&network.primitives().0, &fetch));

        drop(subscription);

        let (restored_fetch, restored_open, restored_send) = network.primitives();
        assert!(Rc::ptr_eq(&restored_fetch, &fetch));
        assert!(Rc::ptr_eq(&restored_open, &open));
        assert!(Rc::ptr_eq(&restored_send, &send));
        assert!(!registry.is_installed());
        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), test)]
    fn it_shares_one_patch_between_subscriptions() -> anyhow::Result<()> {
        let network = Rc::new(EmulatedNetwork::default());
        let registry = InterceptorRegistry::new(network.clone());
        let (original_fetch, ..) = network.primitives();

        let first = registry.subscribe(Rc::new(Recorder::default()))?;
        let (patched_fetch, ..) = network.primitives();
        let second = registry.subscribe(Rc::new(Recorder::default()))?;

        assert_eq!(network.install_count(), 1);
        assert!(Rc::ptr_eq(&network.primitives().0, &patched_fetch));
        assert_eq!(registry.subscriber_count(), 2);

        drop(first);
        assert!(registry.is_installed());
        drop(second);
        assert!(!registry.is_installed());
        assert!(Rc::ptr_eq(&network.primitives().0, &original_fetch));

        let _third = registry.subscribe(Rc::new(Recorder::default()))?;
        assert_eq!(network.install_count(), 2);
        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn it_delivers_calls_to_every_subscriber() -> anyhow::Result<()> {
        let network = Rc::new(EmulatedNetwork::default());
        let registry = InterceptorRegistry::new(network.clone());
        let first = Rc::new(Recorder::default());
        let second = Rc::new(Recorder::default());

        let _a = registry.subscribe(first.clone())?;
        let _b = registry.subscribe(second.clone())?;

        let xhr = network.xhr();
        xhr.open("POST", "https://api.example.com/upload");
        xhr.send(Some(RawBody::Text("{}".into())));
        network
            .fetch(FetchRequest::get("https://api.example.com/balance"))
            .await?;

        let expected = vec![
            "https://api.example.com/upload".to_string(),
            "https://api.example.com/balance".to_string(),
        ];
        assert_eq!(*first.calls.borrow(), expected);
        assert_eq!(*second.calls.borrow(), expected);
        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), test)]
    fn it_stops_delivering_after_unsubscribe() -> anyhow::Result<()> {
        let network = Rc::new(EmulatedNetwork::default());
        let registry = InterceptorRegistry::new(network.clone());
        let kept = Rc::new(Recorder::default());
        let dropped = Rc::new(Recorder::default());

        let _kept = registry.subscribe(kept.clone())?;
        drop(registry.subscribe(dropped.clone())?);

        let xhr = network.xhr();
        xhr.open("GET", "https://api.example.com/ping");
        xhr.send(None);

        assert_eq!(kept.calls.borrow().len(), 1);
        assert!(dropped.calls.borrow().is_empty());
        Ok(())
    }
}
