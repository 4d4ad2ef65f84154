use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CapturePolicy, CaptureStrategy, WidgetError, WrapperConfig};

/// Hosted vendor stylesheet
pub const STYLESHEET_URL: &str = "https://smartupload.diro.io/widgets/diro.css";

/// Hosted vendor script
pub const SCRIPT_URL: &str = "https://smartupload.diro.io/widgets/diro.js";

/// Button identifier the vendor issued for this integration
pub const BUTTON_ID: &str = "O.c117bd44-8cfa-42df-99df-c4ad2ba6c6f5-F6je";

/// Element id the vendor script looks for
pub const ELEMENT_ID: &str = "reactWidget";

/// Class carried by the container the widget is mounted into
pub const CONTAINER_CLASS: &str = "upload-widget-container";

/// Substring identifying the vendor call that carries the session identifier
pub const SESSION_MARKER: &str = "updatesession";

/// Body field holding the session identifier
pub const SESSION_KEY: &str = "sessionid";

/// Id of the injected `<style>` element
pub const STYLE_OVERRIDE_ID: &str = "diro-widget-custom-styles";

/// Milliseconds to wait between teardown and remount
pub const SETTLE_DELAY_MS: u64 = 100;

/// Everything about the vendor integration that a deployment may override.
///
/// Every field has a default, so a partial JSON document is a valid
/// configuration:
///
/// ```rust
/// # use smartupload_widget::{CaptureStrategy, WidgetConfig};
/// let config = WidgetConfig::from_json(r#"{ "captureStrategy": "response-body" }"#)?;
/// assert_eq!(config.capture_strategy, CaptureStrategy::ResponseBody);
/// assert_eq!(config.session_marker, "updatesession");
/// # Ok::<_, smartupload_widget::WidgetError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WidgetConfig {
    /// Vendor stylesheet URL
    pub stylesheet_url: String,
    /// Vendor script URL
    pub script_url: String,
    /// Value of the mounted node's `data-buttonid`
    pub button_id: String,
    /// Id of the mounted node
    pub element_id: String,
    /// Class the style overrides are scoped to
    pub container_class: String,
    /// Serialized into the mounted node's `wrapper` attribute
    pub wrapper: WrapperConfig,
    /// URL substring marking the call worth inspecting
    pub session_marker: String,
    /// Body field holding the session identifier
    pub session_key: String,
    /// Which body the session identifier is read from
    pub capture_strategy: CaptureStrategy,
    /// What to do with repeated matches within one generation
    pub capture_policy: CapturePolicy,
    /// Pause before remounting, in milliseconds
    pub settle_delay_ms: u64,
    /// Id of the injected `<style>` element
    pub style_override_id: String,
    /// Extra rules injected alongside the vendor stylesheet; `None` derives
    /// them from `container_class` and `element_id`
    pub style_override_css: Option<String>,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            stylesheet_url: STYLESHEET_URL.into(),
            script_url: SCRIPT_URL.into(),
            button_id: BUTTON_ID.into(),
            element_id: ELEMENT_ID.into(),
            container_class: CONTAINER_CLASS.into(),
            wrapper: WrapperConfig::default(),
            session_marker: SESSION_MARKER.into(),
            session_key: SESSION_KEY.into(),
            capture_strategy: CaptureStrategy::default(),
            capture_policy: CapturePolicy::default(),
            settle_delay_ms: SETTLE_DELAY_MS,
            style_override_id: STYLE_OVERRIDE_ID.into(),
            style_override_css: None,
        }
    }
}

impl WidgetConfig {
    /// Parse a (possibly partial) JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, WidgetError> {
        let config: WidgetConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that could never capture or mount anything.
    pub fn validate(&self) -> Result<(), WidgetError> {
        let required = [
            ("scriptUrl", &self.script_url),
            ("elementId", &self.element_id),
            ("sessionMarker", &self.session_marker),
            ("sessionKey", &self.session_key),
        ];

        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(WidgetError::Config(format!("`{name}` must not be empty")));
            }
        }

        Ok(())
    }

    /// The pause between teardown and remount.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Rules that center the vendor UI inside the container.
    pub fn style_override(&self) -> String {
        if let Some(css) = &self.style_override_css {
            return css.clone();
        }

        let scope = format!(".{}", self.container_class);
        let element = format!("{scope} #{}", self.element_id);

        format!(
            "{element} {{ display: flex !important; justify-content: center !important; \
             align-items: center !important; text-align: center !important; }}\n\
             {element} * {{ text-align: center !important; }}\n\
             {scope} .diro-upload-area, {scope} [class*=\"upload\"], {scope} [class*=\"drop\"] {{ \
             display: flex !important; flex-direction: column !important; \
             justify-content: center !important; align-items: center !important; \
             text-align: center !important; }}\n\
             {scope} .upload-icon, {scope} .cloud-icon, {scope} [class*=\"icon\"], {scope} svg {{ \
             margin: 0 auto !important; display: block !important; }}\n"
        )
    }
}
