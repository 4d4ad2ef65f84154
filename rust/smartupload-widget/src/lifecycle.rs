//! The controller that owns one mounted widget.
//!
//! A [`LifecycleController`] walks the widget through
//!
//! ```text
//!           initialize()
//!   Idle ─────────────────▸ Loading ──▸ Mounted ──▸ Active
//!    ▲                         ▲              │
//!    │ teardown()              │              └───▸ Failed
//!    │                         │ settle delay
//!    └──── any ──reinitialize()┴──▸ Reinitializing
//! ```
//!
//! Loading awaits the stylesheet, mounts the vendor node, subscribes to the
//! page's network traffic and then awaits the script. Every re-initialize
//! and teardown bumps the widget's generation; a load that settles after its
//! generation was superseded is discarded instead of being applied to the
//! newer mount.

use std::{
    cell::{Cell, RefCell},
    future::Future,
    rc::Rc,
};

use crate::{
    CapturePolicy, Dom, MountAttributes, NetworkStack, PageContext, ResourceKind,
    ResourceLease, SessionCapture, Subscription, WidgetConfig, WidgetError, WidgetMount,
};

/// Where a widget is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetState {
    /// Nothing loaded, or torn down
    Idle,
    /// Waiting for the vendor stylesheet
    Loading,
    /// The vendor node is in place; waiting for the script
    Mounted,
    /// The vendor script loaded and is bound to the node
    Active,
    /// A step failed; the widget area stays on its placeholder
    Failed,
    /// Torn down and waiting to remount
    Reinitializing,
}

/// Per-controller mount state.
struct WidgetInstance<D: Dom> {
    generation: u64,
    initialized: bool,
    mount: WidgetMount<D>,
}

/// Everything a mount holds on to in the page.
struct Leases<D: Dom, S: NetworkStack> {
    stylesheet: Option<ResourceLease<D>>,
    style_override: Option<ResourceLease<D>>,
    script: Option<ResourceLease<D>>,
    subscription: Option<Subscription<S>>,
}

impl<D: Dom, S: NetworkStack> Default for Leases<D, S> {
    fn default() -> Self {
        Self {
            stylesheet: None,
            style_override: None,
            script: None,
            subscription: None,
        }
    }
}

enum Step {
    Done,
    Superseded,
}

struct Widget<D: Dom, S: NetworkStack> {
    page: PageContext<D, S>,
    config: WidgetConfig,
    correlation: String,
    on_session: Box<dyn Fn(&str)>,
    state: Cell<WidgetState>,
    instance: RefCell<WidgetInstance<D>>,
    session_id: RefCell<Option<String>>,
    leases: RefCell<Leases<D, S>>,
}

impl<D, S> Widget<D, S>
where
    D: Dom + 'static,
    S: NetworkStack + 'static,
{
    fn generation(&self) -> u64 {
        self.instance.borrow().generation
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    fn transition(&self, next: WidgetState) {
        let previous = self.state.replace(next);
        if previous != next {
            tracing::debug!(?previous, ?next, generation = self.generation(), "widget state changed");
        }
    }

    /// Bump the generation so in-flight continuations discard themselves.
    /// The session identifier belongs to the old generation and is dropped.
    fn supersede(&self) -> u64 {
        self.session_id.borrow_mut().take();
        let mut instance = self.instance.borrow_mut();
        instance.generation += 1;
        instance.initialized = false;
        instance.generation
    }

    /// Give back everything held in the page: the interception first, then
    /// the script node, then the style overrides.
    fn release_leases(&self) {
        let Leases {
            stylesheet,
            style_override,
            script,
            subscription,
        } = std::mem::take(&mut *self.leases.borrow_mut());

        drop(subscription);
        drop(script);
        drop(style_override);
        drop(stylesheet);
    }

    async fn initialize(self: Rc<Self>) {
        let generation = {
            let instance = self.instance.borrow();
            let busy = matches!(
                self.state.get(),
                WidgetState::Loading
                    | WidgetState::Mounted
                    | WidgetState::Active
                    | WidgetState::Reinitializing
            );
            if instance.initialized || busy {
                tracing::debug!(state = ?self.state.get(), "widget already initializing");
                return;
            }
            instance.generation
        };

        self.start(generation).await;
    }

    async fn reinitialize(self: Rc<Self>) {
        let generation = self.supersede();
        self.transition(WidgetState::Reinitializing);
        self.release_leases();

        self.page.dom().delay(self.config.settle_delay()).await;
        if !self.is_current(generation) {
            tracing::debug!(generation, "reinitialize superseded while settling");
            return;
        }

        self.start(generation).await;
    }

    fn teardown(&self) {
        let generation = self.supersede();
        self.release_leases();
        self.transition(WidgetState::Idle);
        tracing::debug!(generation, "widget torn down");
    }

    async fn start(self: Rc<Self>, generation: u64) {
        self.transition(WidgetState::Loading);

        match self.run(generation).await {
            Ok(Step::Done) => {
                self.instance.borrow_mut().initialized = true;
                self.transition(WidgetState::Active);
                tracing::info!(generation, "widget active");
            }
            Ok(Step::Superseded) => {
                tracing::debug!(generation, "discarding superseded initialization");
            }
            Err(error) if self.is_current(generation) => {
                tracing::error!(%error, generation, "widget initialization failed");
                self.release_leases();
                self.transition(WidgetState::Failed);
            }
            Err(error) => {
                tracing::debug!(%error, generation, "superseded initialization failed");
            }
        }
    }

    async fn run(self: &Rc<Self>, generation: u64) -> Result<Step, WidgetError> {
        let loader = self.page.loader();

        let stylesheet = loader.ensure_stylesheet(&self.config.stylesheet_url)?;
        let outcome = stylesheet.loaded().await;
        if !self.is_current(generation) {
            return Ok(Step::Superseded);
        }
        if !outcome.is_loaded() {
            tracing::warn!("continuing without the vendor stylesheet");
        }
        self.leases.borrow_mut().stylesheet = Some(stylesheet);

        match loader.ensure_style_override(
            &self.config.style_override_id,
            &self.config.style_override(),
        ) {
            Ok(lease) => self.leases.borrow_mut().style_override = Some(lease),
            Err(error) => tracing::warn!(%error, "could not inject style overrides"),
        }

        self.instance.borrow().mount.mount(
            self.page.dom(),
            &MountAttributes {
                element_id: &self.config.element_id,
                button_id: &self.config.button_id,
                track_id: &self.correlation,
                wrapper: &self.config.wrapper,
            },
        )?;
        self.transition(WidgetState::Mounted);

        // Subscribe before the script is requested so its first call is seen.
        let capture = self.session_capture(generation);
        let subscription = self.page.interceptor().subscribe(Rc::new(capture))?;
        self.leases.borrow_mut().subscription = Some(subscription);

        let script = loader.ensure_script(&self.config.script_url)?;
        let loaded = script.loaded();
        self.leases.borrow_mut().script = Some(script);

        let outcome = loaded.await;
        if !self.is_current(generation) {
            return Ok(Step::Superseded);
        }
        if !outcome.is_loaded() {
            return Err(WidgetError::ResourceLoad {
                kind: ResourceKind::Script,
                url: self.config.script_url.clone(),
            });
        }

        Ok(Step::Done)
    }

    fn session_capture(self: &Rc<Self>, generation: u64) -> SessionCapture {
        let widget = Rc::downgrade(self);
        SessionCapture::new(
            self.config.session_marker.as_str(),
            self.config.session_key.as_str(),
            self.config.capture_strategy,
            move |session_id| {
                if let Some(widget) = widget.upgrade() {
                    widget.record_session(generation, session_id);
                }
            },
        )
    }

    fn record_session(&self, generation: u64, session_id: &str) {
        if !self.is_current(generation) {
            tracing::debug!(generation, "ignoring session identifier from a superseded mount");
            return;
        }

        {
            let mut current = self.session_id.borrow_mut();
            if self.config.capture_policy == CapturePolicy::FirstWins && current.is_some() {
                tracing::debug!(generation, "keeping the first session identifier");
                return;
            }
            *current = Some(session_id.to_owned());
        }

        tracing::info!(generation, "session identifier captured");
        (self.on_session)(session_id);
    }
}

/// The handle a host page holds for one embedded widget.
///
/// Dropping the controller tears the widget down.
pub struct LifecycleController<D, S>
where
    D: Dom + 'static,
    S: NetworkStack + 'static,
{
    widget: Rc<Widget<D, S>>,
}

impl<D, S> LifecycleController<D, S>
where
    D: Dom + 'static,
    S: NetworkStack + 'static,
{
    /// Create a controller for a widget mounted into `container`.
    ///
    /// `correlation` ends up in the node's `data-trackid`; `on_session`
    /// receives session identifiers according to the configured
    /// [`CapturePolicy`]. Nothing touches the page until
    /// [`initialize`](Self::initialize) runs.
    pub fn new(
        page: &PageContext<D, S>,
        container: Option<D::Node>,
        correlation: impl Into<String>,
        config: WidgetConfig,
        on_session: impl Fn(&str) + 'static,
    ) -> Self {
        Self {
            widget: Rc::new(Widget {
                page: page.clone(),
                config,
                correlation: correlation.into(),
                on_session: Box::new(on_session),
                state: Cell::new(WidgetState::Idle),
                instance: RefCell::new(WidgetInstance {
                    generation: 0,
                    initialized: false,
                    mount: WidgetMount::new(container),
                }),
                session_id: RefCell::new(None),
                leases: RefCell::new(Leases::default()),
            }),
        }
    }

    /// Load the vendor resources and mount the widget. A no-op while a
    /// mount is in progress or already active.
    ///
    /// The returned future owns what it needs, so it can be handed to an
    /// executor that outlives this borrow.
    pub fn initialize(&self) -> impl Future<Output = ()> + 'static {
        Widget::initialize(self.widget.clone())
    }

    /// Tear the widget down and mount it again after the configured settle
    /// delay. Loads still in flight from the previous mount are ignored when
    /// they settle.
    pub fn reinitialize(&self) -> impl Future<Output = ()> + 'static {
        Widget::reinitialize(self.widget.clone())
    }

    /// Accepts updated host data. The vendor script re-reads its node's
    /// attributes by itself, so there is nothing to push.
    pub fn update(&self, _data: &serde_json::Value) {
        tracing::trace!("ignoring widget update");
    }

    /// Release the interception, the script node and the style overrides.
    /// Safe to call at any point, including mid-load and repeatedly.
    pub fn teardown(&self) {
        self.widget.teardown();
    }

    /// The current lifecycle state.
    pub fn state(&self) -> WidgetState {
        self.widget.state.get()
    }

    /// The current generation.
    pub fn generation(&self) -> u64 {
        self.widget.generation()
    }

    /// Whether the vendor script is bound; hosts show a placeholder until
    /// this turns `true`.
    pub fn is_loaded(&self) -> bool {
        self.state() == WidgetState::Active
    }

    /// The session identifier kept for the current generation.
    pub fn session_id(&self) -> Option<String> {
        self.widget.session_id.borrow().clone()
    }
}

impl<D, S> Drop for LifecycleController<D, S>
where
    D: Dom + 'static,
    S: NetworkStack + 'static,
{
    fn drop(&mut self) {
        self.widget.teardown();
    }
}
