use std::{cell::RefCell, rc::Rc};

use js_sys::{Function, Promise};
use wasm_bindgen::prelude::*;
use web_sys::Element;

use super::{BrowserDom, BrowserNetwork, js_error};
use crate::{LifecycleController, PageContext, WidgetConfig, WidgetError};

#[wasm_bindgen(typescript_custom_section)]
const WIDGET_CONFIG_INTERFACE: &'static str = r#"
/**
 * Overrides for the widget's defaults. Every field is optional.
 */
interface WidgetConfig {
  stylesheetUrl?: string,
  scriptUrl?: string,
  buttonId?: string,
  elementId?: string,
  containerClass?: string,
  wrapper?: {
    height?: string,
    width?: string,
    themeColor?: string,
    fontFamily?: string,
    fontSize?: string,
    fontWeight?: string
  },
  sessionMarker?: string,
  sessionKey?: string,
  captureStrategy?: "request-body" | "response-body",
  capturePolicy?: "first-wins" | "latest-wins",
  settleDelayMs?: number,
  styleOverrideId?: string,
  styleOverrideCss?: string
}
"#;

#[wasm_bindgen]
extern "C" {
    #[allow(missing_docs)]
    #[wasm_bindgen(typescript_type = "WidgetConfig")]
    pub type WidgetConfigDuckType;
}

type BrowserPage = PageContext<BrowserDom, BrowserNetwork>;

thread_local! {
    static PAGE: RefCell<Option<BrowserPage>> = const { RefCell::new(None) };
}

/// Every widget on the page shares one context, and with it one patch of
/// the network primitives.
fn page() -> Result<BrowserPage, WidgetError> {
    PAGE.with(|page| {
        let existing = page.borrow().clone();
        if let Some(existing) = existing {
            return Ok(existing);
        }

        let context = PageContext::new(
            Rc::new(BrowserDom::new()?),
            Rc::new(BrowserNetwork::default()),
        );
        *page.borrow_mut() = Some(context.clone());
        Ok(context)
    })
}

fn js_value_to_error(value: JsValue) -> JsError {
    JsError::new(&js_error(value))
}

fn to_json(value: &JsValue) -> Result<Option<String>, JsError> {
    if value.is_undefined() || value.is_null() {
        return Ok(None);
    }
    let json = js_sys::JSON::stringify(value).map_err(js_value_to_error)?;
    Ok(Some(json.into()))
}

/// A Smart Upload widget mounted into a container element.
///
/// Freeing the object tears the widget down.
#[wasm_bindgen(js_name = "SmartUploadWidget")]
pub struct SmartUploadWidget {
    controller: LifecycleController<BrowserDom, BrowserNetwork>,
}

#[wasm_bindgen(js_class = "SmartUploadWidget")]
impl SmartUploadWidget {
    /// Create a widget for `container`. `onSession` is called with each
    /// session identifier the vendor script reports. Nothing is loaded until
    /// `initialize` is called.
    #[wasm_bindgen(constructor)]
    pub fn new(
        container: Option<Element>,
        correlation: Option<String>,
        on_session: Function,
        config: Option<WidgetConfigDuckType>,
    ) -> Result<SmartUploadWidget, JsError> {
        console_error_panic_hook::set_once();

        let config = match config.map(JsValue::from) {
            Some(config) => match to_json(&config)? {
                Some(json) => WidgetConfig::from_json(&json)?,
                None => WidgetConfig::default(),
            },
            None => WidgetConfig::default(),
        };

        let controller = LifecycleController::new(
            &page()?,
            container,
            correlation.unwrap_or_default(),
            config,
            move |session_id: &str| {
                if let Err(error) = on_session.call1(&JsValue::NULL, &session_id.into()) {
                    tracing::warn!(error = %js_error(error), "session callback threw");
                }
            },
        );

        Ok(Self { controller })
    }

    /// Load the vendor resources and mount the widget. Resolves once the
    /// widget is active or has failed.
    pub fn initialize(&self) -> Promise {
        let initializing = self.controller.initialize();
        wasm_bindgen_futures::future_to_promise(async move {
            initializing.await;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Tear the widget down and mount it again.
    pub fn reinitialize(&self) -> Promise {
        let reinitializing = self.controller.reinitialize();
        wasm_bindgen_futures::future_to_promise(async move {
            reinitializing.await;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Pass updated host data to the widget.
    pub fn update(&self, data: JsValue) -> Result<(), JsError> {
        let data = match to_json(&data)? {
            Some(json) => serde_json::from_str(&json)?,
            None => serde_json::Value::Null,
        };
        self.controller.update(&data);
        Ok(())
    }

    /// Remove the widget's script and styles and stop observing the network.
    pub fn teardown(&self) {
        self.controller.teardown();
    }

    /// The most recent session identifier, if one was reported.
    #[wasm_bindgen(getter, js_name = "sessionId")]
    pub fn session_id(&self) -> Option<String> {
        self.controller.session_id()
    }

    /// Whether the vendor script is bound to the widget.
    #[wasm_bindgen(getter, js_name = "isLoaded")]
    pub fn is_loaded(&self) -> bool {
        self.controller.is_loaded()
    }

    /// The lifecycle state, in lower case.
    #[wasm_bindgen(getter)]
    pub fn state(&self) -> String {
        format!("{:?}", self.controller.state()).to_lowercase()
    }
}
