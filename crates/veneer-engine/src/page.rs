//! The slice of a live document the overlay controller works against.
//!
//! A browser host implements [`Page`] over real `<img>` elements.
//! [`MemoryPage`] is the in-process host used by the CLI and the tests; it
//! round-trips through JSON page snapshots.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Boolean marker set on every image the overlay has replaced.
pub const PROCESSED_ATTR: &str = "data-ai-overlay";
/// Holds the replacement source while the marker is present.
pub const AI_SRC_ATTR: &str = "data-ai-src";
pub const PROCESSING_CLASS: &str = "ai-overlay-processing";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Attributes of one image as the page currently renders it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageAttributes {
    pub src: String,
    pub alt: String,
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub class_name: String,
    pub id: String,
    pub inline_style: String,
    pub rendered_width: u32,
    pub rendered_height: u32,
}

/// A source that was assigned to a node and then failed to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub node: NodeId,
    pub src: String,
}

pub trait Page {
    /// Every image node, in document order.
    fn image_nodes(&self) -> Vec<NodeId>;
    fn describe(&self, node: NodeId) -> Option<ImageAttributes>;
    fn attribute(&self, node: NodeId, name: &str) -> Option<String>;
    /// Setting `src` starts a load; a failed load is reported through
    /// [`Page::take_load_failures`].
    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str);
    fn remove_attribute(&mut self, node: NodeId, name: &str);
    /// `None` clears the inline property.
    fn set_style(&mut self, node: NodeId, property: &str, value: Option<&str>);
    fn show_processing_indicator(&mut self, node: NodeId);
    fn remove_processing_indicator(&mut self, node: NodeId);
    fn take_load_failures(&mut self) -> Vec<LoadFailure>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageElement {
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub alt: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// Layout size; the intrinsic size is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_height: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub style: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default = "default_has_parent")]
    pub has_parent: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parent_style: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_children: Vec<String>,
}

fn default_has_parent() -> bool {
    true
}

impl ImageElement {
    pub fn new(src: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            src: src.into(),
            width,
            height,
            has_parent: true,
            ..Self::default()
        }
    }

    pub fn with_alt(mut self, alt: impl Into<String>) -> Self {
        self.alt = alt.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_rendered_size(mut self, width: u32, height: u32) -> Self {
        self.rendered_width = Some(width);
        self.rendered_height = Some(height);
        self
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn css_text(&self) -> String {
        self.style
            .iter()
            .map(|(property, value)| format!("{property}: {value};"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemoryPage {
    #[serde(default)]
    pub images: Vec<ImageElement>,
    /// Sources that fail to load when assigned.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub broken_sources: BTreeSet<String>,
    #[serde(skip)]
    load_failures: Vec<LoadFailure>,
}

impl MemoryPage {
    pub fn new(images: Vec<ImageElement>) -> Self {
        Self {
            images,
            ..Self::default()
        }
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn mark_broken(&mut self, src: impl Into<String>) {
        self.broken_sources.insert(src.into());
    }

    pub fn image(&self, node: NodeId) -> Option<&ImageElement> {
        self.images.get(node.0)
    }

    fn image_mut(&mut self, node: NodeId) -> Option<&mut ImageElement> {
        self.images.get_mut(node.0)
    }
}

impl Page for MemoryPage {
    fn image_nodes(&self) -> Vec<NodeId> {
        (0..self.images.len()).map(NodeId).collect()
    }

    fn describe(&self, node: NodeId) -> Option<ImageAttributes> {
        let image = self.image(node)?;
        Some(ImageAttributes {
            src: image.src.clone(),
            alt: image.alt.clone(),
            title: image.title.clone(),
            width: image.width,
            height: image.height,
            class_name: image.class_name.clone(),
            id: image.id.clone(),
            inline_style: image.css_text(),
            rendered_width: image.rendered_width.unwrap_or(image.width),
            rendered_height: image.rendered_height.unwrap_or(image.height),
        })
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        let image = self.image(node)?;
        match name {
            "src" => Some(image.src.clone()),
            "alt" => Some(image.alt.clone()),
            "title" => Some(image.title.clone()),
            "class" => Some(image.class_name.clone()),
            "id" => Some(image.id.clone()),
            other => image.attributes.get(other).cloned(),
        }
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        let broken = name == "src" && self.broken_sources.contains(value);
        let Some(image) = self.image_mut(node) else {
            return;
        };
        match name {
            "src" => image.src = value.to_string(),
            "alt" => image.alt = value.to_string(),
            "title" => image.title = value.to_string(),
            "class" => image.class_name = value.to_string(),
            "id" => image.id = value.to_string(),
            other => {
                image.attributes.insert(other.to_string(), value.to_string());
            }
        }
        if broken {
            self.load_failures.push(LoadFailure {
                node,
                src: value.to_string(),
            });
        }
    }

    fn remove_attribute(&mut self, node: NodeId, name: &str) {
        if let Some(image) = self.image_mut(node) {
            image.attributes.remove(name);
        }
    }

    fn set_style(&mut self, node: NodeId, property: &str, value: Option<&str>) {
        let Some(image) = self.image_mut(node) else {
            return;
        };
        match value.filter(|value| !value.is_empty()) {
            Some(value) => {
                image.style.insert(property.to_string(), value.to_string());
            }
            None => {
                image.style.remove(property);
            }
        }
    }

    fn show_processing_indicator(&mut self, node: NodeId) {
        let Some(image) = self.image_mut(node).filter(|image| image.has_parent) else {
            return;
        };
        image
            .parent_style
            .insert("position".to_string(), "relative".to_string());
        image.parent_children.push(PROCESSING_CLASS.to_string());
    }

    fn remove_processing_indicator(&mut self, node: NodeId) {
        let Some(image) = self.image_mut(node) else {
            return;
        };
        if let Some(idx) = image
            .parent_children
            .iter()
            .position(|child| child == PROCESSING_CLASS)
        {
            image.parent_children.remove(idx);
        }
    }

    fn take_load_failures(&mut self) -> Vec<LoadFailure> {
        std::mem::take(&mut self.load_failures)
    }
}
