use serde::{Deserialize, Serialize};

use crate::{Dom, WidgetError};

/// Presentation settings the vendor script reads from the `wrapper`
/// attribute of the mounted node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WrapperConfig {
    /// CSS height of the widget
    pub height: String,
    /// CSS width of the widget
    pub width: String,
    /// Accent color
    pub theme_color: String,
    /// CSS font family
    pub font_family: String,
    /// CSS font size
    pub font_size: String,
    /// CSS font weight, omitted from the blob when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_weight: Option<String>,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            height: "350px".into(),
            width: "350px".into(),
            theme_color: "black".into(),
            font_family: "sans-serif".into(),
            font_size: "12px".into(),
            font_weight: Some("300".into()),
        }
    }
}

/// The attribute set the vendor script expects on its mount node.
#[derive(Debug, Clone, Copy)]
pub struct MountAttributes<'a> {
    /// `id` of the node
    pub element_id: &'a str,
    /// `data-buttonid`: the vendor-issued button identifier
    pub button_id: &'a str,
    /// `data-trackid`: the caller's correlation value, possibly empty
    pub track_id: &'a str,
    /// `wrapper`: serialized presentation settings
    pub wrapper: &'a WrapperConfig,
}

/// Owns the container the vendor widget is mounted into.
pub struct WidgetMount<D: Dom> {
    container: Option<D::Node>,
}

impl<D: Dom> WidgetMount<D> {
    /// Wrap a container reference. `None` stands for a container that is not
    /// (or no longer) in the document.
    pub fn new(container: Option<D::Node>) -> Self {
        Self { container }
    }

    /// Forget the container. Later mounts become no-ops.
    pub fn detach(&mut self) -> Option<D::Node> {
        self.container.take()
    }

    /// Replace everything inside the container with a single fresh node
    /// carrying `attributes`. Does nothing without a container.
    pub fn mount(&self, dom: &D, attributes: &MountAttributes<'_>) -> Result<(), WidgetError> {
        let Some(container) = &self.container else {
            tracing::debug!("no container to mount into");
            return Ok(());
        };

        let wrapper = serde_json::to_string(attributes.wrapper)?;

        dom.clear_children(container);
        dom.append_element(
            container,
            "div",
            &[
                ("id", attributes.element_id),
                ("data-buttonid", attributes.button_id),
                ("data-trackid", attributes.track_id),
                ("wrapper", wrapper.as_str()),
            ],
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::emulator::EmulatedDom;

    #[cfg(target_arch = "wasm32")]
    use wasm_bindgen_test::wasm_bindgen_test;

    fn attributes<'a>(track_id: &'a str, wrapper: &'a WrapperConfig) -> MountAttributes<'a> {
        MountAttributes {
            element_id: "reactWidget",
            button_id: "O.button",
            track_id,
            wrapper,
        }
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), test)]
    fn it_mounts_exactly_one_node_with_vendor_attributes() -> anyhow::Result<()> {
        let dom = EmulatedDom::default();
        let container = dom.create_container();
        let wrapper = WrapperConfig::default();
        let mount = WidgetMount::<EmulatedDom>::new(Some(container));

        mount.mount(&dom, &attributes("urn:123", &wrapper))?;
        mount.mount(&dom, &attributes("urn:123", &wrapper))?;

        let children = dom.children(container);
        assert_eq!(children.len(), 1);
        let node = children[0];
        assert_eq!(dom.attribute(node, "id").as_deref(), Some("reactWidget"));
        assert_eq!(dom.attribute(node, "data-buttonid").as_deref(), Some("O.button"));
        assert_eq!(dom.attribute(node, "data-trackid").as_deref(), Some("urn:123"));

        let blob: serde_json::Value =
            serde_json::from_str(&dom.attribute(node, "wrapper").unwrap_or_default())?;
        assert_eq!(
            blob,
            serde_json::json!({
                "height": "350px",
                "width": "350px",
                "themeColor": "black",
                "fontFamily": "sans-serif",
                "fontSize": "12px",
                "fontWeight": "300"
            })
        );
        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), test)]
    fn it_replaces_the_node_on_every_mount() -> anyhow::Result<()> {
        let dom = EmulatedDom::default();
        let container = dom.create_container();
        let wrapper = WrapperConfig::default();
        let mount = WidgetMount::<EmulatedDom>::new(Some(container));

        mount.mount(&dom, &attributes("", &wrapper))?;
        let first = dom.children(container);
        mount.mount(&dom, &attributes("", &wrapper))?;
        let second = dom.children(container);

        assert_ne!(first, second);
        assert!(!dom.is_attached(first[0]));
        assert_eq!(dom.attribute(second[0], "data-trackid").as_deref(), Some(""));
        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), test)]
    fn it_omits_an_unset_font_weight() -> anyhow::Result<()> {
        let wrapper = WrapperConfig {
            font_weight: None,
            ..WrapperConfig::default()
        };

        let blob = serde_json::to_string(&wrapper)?;

        assert!(!blob.contains("fontWeight"));
        Ok(())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), test)]
    fn it_ignores_an_absent_container() -> anyhow::Result<()> {
        let dom = EmulatedDom::default();
        let wrapper = WrapperConfig::default();
        let mut mount = WidgetMount::<EmulatedDom>::new(Some(dom.create_container()));
        mount.detach();

        mount.mount(&dom, &attributes("urn:1", &wrapper))?;

        assert_eq!(dom.find_by_id("reactWidget"), None);
        Ok(())
    }
}
