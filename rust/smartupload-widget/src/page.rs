use std::rc::Rc;

use crate::{Dom, InterceptorRegistry, NetworkStack, ResourceLoader};

/// The page-wide state every widget on a page shares: the document, the
/// resource table and the interceptor registry.
///
/// Create one per page and build every
/// [`LifecycleController`](crate::LifecycleController) from it. Two
/// contexts over the same page would each patch the network stack, which is
/// exactly what the registry exists to prevent.
pub struct PageContext<D: Dom, S: NetworkStack> {
    dom: Rc<D>,
    loader: ResourceLoader<D>,
    interceptor: InterceptorRegistry<S>,
}

impl<D: Dom, S: NetworkStack> Clone for PageContext<D, S> {
    fn clone(&self) -> Self {
        Self {
            dom: self.dom.clone(),
            loader: self.loader.clone(),
            interceptor: self.interceptor.clone(),
        }
    }
}

impl<D: Dom, S: NetworkStack> PageContext<D, S> {
    /// Create the context for a page.
    pub fn new(dom: Rc<D>, network: Rc<S>) -> Self {
        Self {
            loader: ResourceLoader::new(dom.clone()),
            interceptor: InterceptorRegistry::new(network),
            dom,
        }
    }

    /// The page's document.
    pub fn dom(&self) -> &Rc<D> {
        &self.dom
    }

    /// The page's resource table.
    pub fn loader(&self) -> &ResourceLoader<D> {
        &self.loader
    }

    /// The page's interceptor registry.
    pub fn interceptor(&self) -> &InterceptorRegistry<S> {
        &self.interceptor
    }
}
