use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::bail;
use serde_json::{json, Value};
use thiserror::Error;
use veneer_contracts::events::{
    ActivityJournal, IMAGES_RESTORED, IMAGE_FALLBACK, IMAGE_LOAD_FAILED, IMAGE_REPLACED,
    IMAGE_UNCHANGED, OVERLAY_FINISHED, OVERLAY_STARTED,
};
use veneer_contracts::messages::{
    error_response, protocol_error_response, response_error, response_value, BackgroundRequest,
    ContentRequest, MessageChannel, OverlayStatus, ProcessImageResponse, RunOverlayResponse,
    SuccessResponse,
};
use veneer_contracts::placeholder::{random_seed, tagged_placeholder_url};
use veneer_contracts::settings::OverlaySettings;

use crate::page::{LoadFailure, NodeId, Page, AI_SRC_ATTR, PROCESSED_ATTR};

const OVERLAID_STYLE: [(&str, &str); 3] = [
    ("border", "2px solid #667eea"),
    ("border-radius", "4px"),
    ("box-shadow", "0 0 10px rgba(102, 126, 234, 0.3)"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Overlaying,
    Overlaid,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverlayError {
    #[error("No images found on this page")]
    NoImagesFound,
    #[error("overlay session is busy ({state:?})")]
    Busy { state: SessionState },
}

/// One page image under overlay management. Everything but
/// `current_ai_src` is captured at discovery and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedImage {
    pub element: NodeId,
    pub original_src: String,
    pub original_alt: String,
    pub original_title: String,
    pub original_width: u32,
    pub original_height: u32,
    pub original_class_name: String,
    pub original_id: String,
    pub original_inline_style: String,
    pub current_ai_src: Option<String>,
}

#[derive(Debug, Default)]
struct OverlaySession {
    state: SessionState,
    tracked: BTreeMap<NodeId, TrackedImage>,
    overlaid_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Replaced,
    Fallback,
    Unchanged,
}

/// Page-side controller: one instance per page context. Clones share the
/// same session.
#[derive(Debug, Clone, Default)]
pub struct OverlayController {
    session: Arc<Mutex<OverlaySession>>,
    journal: Option<ActivityJournal>,
}

/// Images eligible for replacement, in document order.
pub fn discover_images(page: &dyn Page) -> Vec<NodeId> {
    page.image_nodes()
        .into_iter()
        .filter(|node| {
            let Some(attrs) = page.describe(*node) else {
                return false;
            };
            !attrs.src.is_empty()
                && attrs.src.starts_with("http")
                && !attrs.src.contains("data:")
                && attrs.rendered_width > 0
                && attrs.rendered_height > 0
                && page.attribute(*node, PROCESSED_ATTR).is_none()
        })
        .collect()
}

impl OverlayController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: ActivityJournal) -> Self {
        Self {
            session: Arc::default(),
            journal: Some(journal),
        }
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn status(&self) -> OverlayStatus {
        let session = self.lock();
        OverlayStatus {
            has_overlaid_images: session.state == SessionState::Overlaid,
            image_count: session.overlaid_count,
        }
    }

    pub fn tracked_images(&self) -> Vec<TrackedImage> {
        self.lock().tracked.values().cloned().collect()
    }

    /// Replaces every eligible image, one at a time. Returns the number of
    /// images discovered, whatever happened to each of them.
    pub fn run_overlay(
        &self,
        page: &mut dyn Page,
        background: &dyn MessageChannel,
        settings: &OverlaySettings,
    ) -> Result<usize, OverlayError> {
        let images = {
            let mut session = self.lock();
            if session.state != SessionState::Idle {
                return Err(OverlayError::Busy {
                    state: session.state,
                });
            }
            let images = discover_images(page);
            if images.is_empty() {
                return Err(OverlayError::NoImagesFound);
            }
            session.state = SessionState::Overlaying;
            images
        };
        let stale = page.take_load_failures();
        if !stale.is_empty() {
            tracing::debug!(
                count = stale.len(),
                "discarding load failures from before this run"
            );
        }
        tracing::info!(count = images.len(), style = %settings.style, "starting overlay run");
        self.journal_event(
            OVERLAY_STARTED,
            json!({ "image_count": images.len(), "settings": settings }),
        );

        for node in &images {
            self.process_image(page, background, settings, *node);
            self.handle_load_errors(page);
        }

        for node in &images {
            for (property, value) in OVERLAID_STYLE {
                page.set_style(*node, property, Some(value));
            }
        }

        {
            let mut session = self.lock();
            session.state = SessionState::Overlaid;
            session.overlaid_count = images.len();
        }
        self.journal_event(OVERLAY_FINISHED, json!({ "image_count": images.len() }));
        Ok(images.len())
    }

    fn process_image(
        &self,
        page: &mut dyn Page,
        background: &dyn MessageChannel,
        settings: &OverlaySettings,
        node: NodeId,
    ) {
        let Some(tracked) = capture(page, node) else {
            return;
        };
        let original_src = tracked.original_src.clone();
        self.lock().tracked.insert(node, tracked);

        page.show_processing_indicator(node);
        let outcome = match request_replacement(background, &original_src, settings) {
            Ok(ai_src) => {
                if self.apply_replacement(page, node, &ai_src) {
                    Outcome::Replaced
                } else {
                    Outcome::Unchanged
                }
            }
            Err(err) => {
                tracing::warn!(src = %original_src, error = %err, "AI replacement failed; using placeholder");
                let fallback = tagged_placeholder_url(settings, random_seed());
                if self.apply_replacement(page, node, &fallback) {
                    Outcome::Fallback
                } else {
                    Outcome::Unchanged
                }
            }
        };
        page.remove_processing_indicator(node);

        let event_type = match outcome {
            Outcome::Replaced => IMAGE_REPLACED,
            Outcome::Fallback => IMAGE_FALLBACK,
            Outcome::Unchanged => IMAGE_UNCHANGED,
        };
        self.journal_event(
            event_type,
            json!({ "node": node.0, "original_src": original_src }),
        );
    }

    fn apply_replacement(&self, page: &mut dyn Page, node: NodeId, new_src: &str) -> bool {
        if page.describe(node).is_none() {
            return false;
        }
        if let Some(tracked) = self.lock().tracked.get_mut(&node) {
            tracked.current_ai_src = Some(new_src.to_string());
        }
        page.set_attribute(node, PROCESSED_ATTR, "true");
        page.set_attribute(node, AI_SRC_ATTR, new_src);
        page.set_attribute(node, "src", new_src);
        true
    }

    /// Restores every tracked image whose replacement failed to load.
    /// Returns how many were restored.
    pub fn handle_load_errors(&self, page: &mut dyn Page) -> usize {
        let failures = page.take_load_failures();
        let mut restored = 0;
        for LoadFailure { node, src } in failures {
            let tracked = {
                let mut session = self.lock();
                let Some(tracked) = session.tracked.get_mut(&node) else {
                    continue;
                };
                let current = page.attribute(node, "src");
                if tracked.current_ai_src.as_deref() != Some(src.as_str())
                    || current.as_deref() != Some(src.as_str())
                {
                    continue;
                }
                tracked.current_ai_src = None;
                tracked.clone()
            };
            tracing::warn!(node = node.0, "replacement image failed to load; restoring original");
            restore(page, &tracked);
            self.journal_event(
                IMAGE_LOAD_FAILED,
                json!({ "node": node.0, "original_src": tracked.original_src }),
            );
            restored += 1;
        }
        restored
    }

    /// Puts every tracked image back the way it was found and returns the
    /// session to idle. Calling it again is harmless.
    pub fn reset_images(&self, page: &mut dyn Page) -> Result<usize, OverlayError> {
        let tracked = {
            let mut session = self.lock();
            if session.state == SessionState::Overlaying {
                return Err(OverlayError::Busy {
                    state: session.state,
                });
            }
            session.state = SessionState::Idle;
            session.overlaid_count = 0;
            std::mem::take(&mut session.tracked)
        };

        for image in tracked.values() {
            clear_overlaid_style(page, image.element);
            restore(page, image);
        }
        for node in page.image_nodes() {
            if page.attribute(node, PROCESSED_ATTR).as_deref() == Some("true") {
                clear_overlaid_style(page, node);
            }
        }

        if !tracked.is_empty() {
            tracing::info!(count = tracked.len(), "restored original images");
            self.journal_event(IMAGES_RESTORED, json!({ "image_count": tracked.len() }));
        }
        Ok(tracked.len())
    }

    /// Serves the page-side actions; anything else is an unknown action.
    pub fn handle_message(
        &self,
        page: &mut dyn Page,
        background: &dyn MessageChannel,
        message: &Value,
    ) -> Value {
        let request = match ContentRequest::parse(message) {
            Ok(request) => request,
            Err(err) => return protocol_error_response(&err),
        };
        match request {
            ContentRequest::RunOverlay { settings } => {
                match self.run_overlay(page, background, &settings) {
                    Ok(image_count) => response_value(&RunOverlayResponse {
                        success: true,
                        image_count,
                    }),
                    Err(err) => error_response(&err.to_string()),
                }
            }
            ContentRequest::ResetImages => match self.reset_images(page) {
                Ok(_) => response_value(&SuccessResponse { success: true }),
                Err(err) => error_response(&err.to_string()),
            },
            ContentRequest::GetOverlayStatus => response_value(&self.status()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OverlaySession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn journal_event(&self, event_type: &str, payload: Value) {
        if let Some(journal) = &self.journal {
            journal.record(event_type, payload);
        }
    }
}

fn capture(page: &dyn Page, node: NodeId) -> Option<TrackedImage> {
    let attrs = page.describe(node)?;
    Some(TrackedImage {
        element: node,
        original_src: attrs.src,
        original_alt: attrs.alt,
        original_title: attrs.title,
        original_width: attrs.width,
        original_height: attrs.height,
        original_class_name: attrs.class_name,
        original_id: attrs.id,
        original_inline_style: attrs.inline_style,
        current_ai_src: None,
    })
}

fn restore(page: &mut dyn Page, image: &TrackedImage) {
    page.set_attribute(image.element, "src", &image.original_src);
    page.set_attribute(image.element, "alt", &image.original_alt);
    page.set_attribute(image.element, "title", &image.original_title);
    page.remove_attribute(image.element, PROCESSED_ATTR);
    page.remove_attribute(image.element, AI_SRC_ATTR);
}

fn clear_overlaid_style(page: &mut dyn Page, node: NodeId) {
    for (property, _) in OVERLAID_STYLE {
        page.set_style(node, property, None);
    }
}

fn request_replacement(
    background: &dyn MessageChannel,
    image_url: &str,
    settings: &OverlaySettings,
) -> anyhow::Result<String> {
    let request = BackgroundRequest::ProcessImage {
        image_url: image_url.to_string(),
        settings: *settings,
    };
    let response = background.send(request.to_value())?;
    if let Some(err) = response_error(&response) {
        bail!("{err}");
    }
    let parsed: ProcessImageResponse = serde_json::from_value(response)?;
    if !parsed.success || parsed.ai_image_url.is_empty() {
        bail!("Failed to process image with AI");
    }
    Ok(parsed.ai_image_url)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::anyhow;
    use serde_json::{json, Value};
    use veneer_contracts::events::{read_journal, ActivityJournal};
    use veneer_contracts::messages::MessageChannel;
    use veneer_contracts::settings::{OverlaySettings, Style};

    use super::{discover_images, OverlayController, OverlayError, SessionState};
    use crate::page::{
        ImageAttributes, ImageElement, LoadFailure, MemoryPage, NodeId, Page, AI_SRC_ATTR,
        PROCESSED_ATTR,
    };

    struct FnChannel<F>(F);

    impl<F> MessageChannel for FnChannel<F>
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync,
    {
        fn send(&self, message: Value) -> anyhow::Result<Value> {
            (self.0)(message)
        }
    }

    fn fn_channel<F>(f: F) -> FnChannel<F>
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync,
    {
        FnChannel(f)
    }

    fn echo_channel() -> FnChannel<impl Fn(Value) -> anyhow::Result<Value> + Send + Sync> {
        FnChannel(|message: Value| {
            let src = message["imageUrl"].as_str().unwrap_or_default().to_string();
            Ok(json!({"success": true, "aiImageUrl": format!("data:image/png;base64,{}", src.len())}))
        })
    }

    fn failing_channel() -> FnChannel<impl Fn(Value) -> anyhow::Result<Value> + Send + Sync> {
        FnChannel(|_message: Value| Err(anyhow!("background unavailable")))
    }

    /// Drops one node out of the document once its processing indicator is
    /// shown, the way a page script might remove it mid-request.
    struct VanishingPage {
        inner: MemoryPage,
        target: NodeId,
        gone: bool,
    }

    impl Page for VanishingPage {
        fn image_nodes(&self) -> Vec<NodeId> {
            self.inner.image_nodes()
        }

        fn describe(&self, node: NodeId) -> Option<ImageAttributes> {
            if self.gone && node == self.target {
                return None;
            }
            self.inner.describe(node)
        }

        fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
            self.inner.attribute(node, name)
        }

        fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
            self.inner.set_attribute(node, name, value);
        }

        fn remove_attribute(&mut self, node: NodeId, name: &str) {
            self.inner.remove_attribute(node, name);
        }

        fn set_style(&mut self, node: NodeId, property: &str, value: Option<&str>) {
            self.inner.set_style(node, property, value);
        }

        fn show_processing_indicator(&mut self, node: NodeId) {
            self.inner.show_processing_indicator(node);
            if node == self.target {
                self.gone = true;
            }
        }

        fn remove_processing_indicator(&mut self, node: NodeId) {
            self.inner.remove_processing_indicator(node);
        }

        fn take_load_failures(&mut self) -> Vec<LoadFailure> {
            self.inner.take_load_failures()
        }
    }

    fn journal_types(path: &std::path::Path) -> anyhow::Result<Vec<String>> {
        Ok(read_journal(path)?
            .iter()
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    fn sample_page() -> MemoryPage {
        MemoryPage::new(vec![
            ImageElement::new("https://example.com/cat.jpg", 200, 100)
                .with_alt("a cat")
                .with_title("Cat"),
            ImageElement::new("http://example.com/dog.png", 64, 64).with_alt("a dog"),
        ])
    }

    #[test]
    fn discovery_excludes_each_ineligible_kind() {
        let page = MemoryPage::new(vec![
            ImageElement::new("https://example.com/ok.jpg", 10, 10),
            ImageElement::new("https://example.com/hidden.jpg", 10, 10).with_rendered_size(0, 10),
            ImageElement::new("https://example.com/flat.jpg", 10, 10).with_rendered_size(10, 0),
            ImageElement::new("data:image/png;base64,AAAA", 10, 10),
            ImageElement::new("ftp://example.com/old.jpg", 10, 10),
            ImageElement::new("", 10, 10),
            ImageElement::new("https://example.com/done.jpg", 10, 10)
                .with_attribute(PROCESSED_ATTR, "true"),
            ImageElement::new("http://example.com/also-ok.gif", 1, 1),
        ]);
        assert_eq!(discover_images(&page), vec![NodeId(0), NodeId(7)]);
    }

    #[test]
    fn empty_page_fails_and_stays_idle() {
        let controller = OverlayController::new();
        let mut page = MemoryPage::new(vec![ImageElement::new("data:image/gif;base64,R0", 5, 5)]);
        let err = controller
            .run_overlay(&mut page, &echo_channel(), &OverlaySettings::default())
            .unwrap_err();
        assert_eq!(err, OverlayError::NoImagesFound);
        assert_eq!(err.to_string(), "No images found on this page");
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(!controller.status().has_overlaid_images);
    }

    #[test]
    fn run_replaces_sources_and_marks_nodes() {
        let controller = OverlayController::new();
        let mut page = sample_page();
        let count = controller
            .run_overlay(&mut page, &echo_channel(), &OverlaySettings::default())
            .unwrap();

        assert_eq!(count, 2);
        let cat = page.image(NodeId(0)).unwrap();
        assert_eq!(cat.src, "data:image/png;base64,27");
        assert_eq!(cat.attributes.get(PROCESSED_ATTR).map(String::as_str), Some("true"));
        assert_eq!(
            cat.attributes.get(AI_SRC_ATTR).map(String::as_str),
            Some("data:image/png;base64,27")
        );
        assert_eq!(cat.style.get("border").map(String::as_str), Some("2px solid #667eea"));
        assert!(cat.parent_children.is_empty());

        let status = controller.status();
        assert!(status.has_overlaid_images);
        assert_eq!(status.image_count, 2);
        assert_eq!(controller.state(), SessionState::Overlaid);

        let tracked = controller.tracked_images();
        assert_eq!(tracked.len(), 2);
        assert_eq!(tracked[0].original_alt, "a cat");
        assert_eq!(tracked[0].original_width, 200);
        assert_eq!(
            tracked[0].current_ai_src.as_deref(),
            Some("data:image/png;base64,27")
        );
    }

    #[test]
    fn channel_failures_fall_back_to_tagged_placeholder() {
        let controller = OverlayController::new();
        let mut page = sample_page();
        let settings = OverlaySettings::new(Style::Cartoon, 3);
        let count = controller
            .run_overlay(&mut page, &failing_channel(), &settings)
            .unwrap();

        assert_eq!(count, 2);
        for node in [NodeId(0), NodeId(1)] {
            let image = page.image(node).unwrap();
            assert!(image.src.starts_with("https://picsum.photos/400/300?random="));
            assert!(image.src.ends_with("&style=cartoon&intensity=3"));
            assert!(image.parent_children.is_empty());
        }
        assert_eq!(controller.status().image_count, 2);
    }

    #[test]
    fn error_replies_are_isolated_per_image() {
        let controller = OverlayController::new();
        let mut page = sample_page();
        let channel = fn_channel(|message: Value| {
            if message["imageUrl"] == json!("https://example.com/cat.jpg") {
                Ok(json!({"error": "model exploded"}))
            } else {
                Ok(json!({"success": true, "aiImageUrl": "https://cdn.example.com/ai.png"}))
            }
        });
        let count = controller
            .run_overlay(&mut page, &channel, &OverlaySettings::default())
            .unwrap();

        assert_eq!(count, 2);
        assert!(page.image(NodeId(0)).unwrap().src.starts_with("https://picsum.photos/"));
        assert_eq!(page.image(NodeId(1)).unwrap().src, "https://cdn.example.com/ai.png");
    }

    #[test]
    fn reset_round_trips_attributes_and_is_idempotent() {
        let controller = OverlayController::new();
        let original = sample_page();
        let mut page = original.clone();
        controller
            .run_overlay(&mut page, &echo_channel(), &OverlaySettings::default())
            .unwrap();
        assert_ne!(page, original);

        assert_eq!(controller.reset_images(&mut page).unwrap(), 2);
        let after_first = page.clone();
        assert_eq!(controller.reset_images(&mut page).unwrap(), 0);
        assert_eq!(page, after_first);

        for node in [NodeId(0), NodeId(1)] {
            let restored = page.image(node).unwrap();
            let before = original.image(node).unwrap();
            assert_eq!(restored.src, before.src);
            assert_eq!(restored.alt, before.alt);
            assert_eq!(restored.title, before.title);
            assert!(restored.attributes.get(PROCESSED_ATTR).is_none());
            assert!(restored.attributes.get(AI_SRC_ATTR).is_none());
            assert!(restored.style.is_empty());
        }
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(controller.status().image_count, 0);
        assert!(controller.tracked_images().is_empty());
    }

    #[test]
    fn reset_sweeps_stale_markers_left_by_an_earlier_run() {
        let controller = OverlayController::new();
        let mut stale = ImageElement::new("https://example.com/old.jpg", 10, 10)
            .with_attribute(PROCESSED_ATTR, "true");
        stale
            .style
            .insert("box-shadow".to_string(), "0 0 10px rgba(102, 126, 234, 0.3)".to_string());
        let mut page = MemoryPage::new(vec![stale]);

        assert_eq!(controller.reset_images(&mut page).unwrap(), 0);
        assert!(page.image(NodeId(0)).unwrap().style.is_empty());
    }

    #[test]
    fn a_second_run_is_rejected_until_reset() {
        let controller = OverlayController::new();
        let mut page = sample_page();
        controller
            .run_overlay(&mut page, &echo_channel(), &OverlaySettings::default())
            .unwrap();

        let mut fresh = sample_page();
        let err = controller
            .run_overlay(&mut fresh, &echo_channel(), &OverlaySettings::default())
            .unwrap_err();
        assert_eq!(
            err,
            OverlayError::Busy {
                state: SessionState::Overlaid
            }
        );

        controller.reset_images(&mut page).unwrap();
        assert!(controller
            .run_overlay(&mut page, &echo_channel(), &OverlaySettings::default())
            .is_ok());
    }

    #[test]
    fn re_entrant_run_while_overlaying_is_busy() {
        let controller = OverlayController::new();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let channel = {
            let controller = controller.clone();
            let observed = observed.clone();
            fn_channel(move |_message: Value| {
                let mut other = sample_page();
                let nested = controller.run_overlay(
                    &mut other,
                    &failing_channel(),
                    &OverlaySettings::default(),
                );
                let reset = controller.reset_images(&mut other);
                observed
                    .lock()
                    .unwrap()
                    .push((nested.err(), reset.err(), controller.status()));
                Ok(json!({"success": true, "aiImageUrl": "https://cdn.example.com/x.png"}))
            })
        };

        let mut page = sample_page();
        controller
            .run_overlay(&mut page, &channel, &OverlaySettings::default())
            .unwrap();

        let observed = observed.lock().unwrap();
        assert_eq!(observed.len(), 2);
        for (nested, reset, status) in observed.iter() {
            let busy = Some(OverlayError::Busy {
                state: SessionState::Overlaying,
            });
            assert_eq!(nested, &busy);
            assert_eq!(reset, &busy);
            assert!(!status.has_overlaid_images);
        }
        assert_eq!(controller.state(), SessionState::Overlaid);
    }

    #[test]
    fn broken_replacement_is_restored_from_snapshot() {
        let controller = OverlayController::new();
        let mut page = sample_page();
        page.mark_broken("https://cdn.example.com/broken.png");
        let channel = fn_channel(|message: Value| {
            let url = if message["imageUrl"] == json!("https://example.com/cat.jpg") {
                "https://cdn.example.com/broken.png"
            } else {
                "https://cdn.example.com/fine.png"
            };
            Ok(json!({"success": true, "aiImageUrl": url}))
        });

        let count = controller
            .run_overlay(&mut page, &channel, &OverlaySettings::default())
            .unwrap();

        assert_eq!(count, 2);
        let cat = page.image(NodeId(0)).unwrap();
        assert_eq!(cat.src, "https://example.com/cat.jpg");
        assert!(cat.attributes.get(PROCESSED_ATTR).is_none());
        assert_eq!(page.image(NodeId(1)).unwrap().src, "https://cdn.example.com/fine.png");
        assert_eq!(controller.status().image_count, 2);
    }

    #[test]
    fn message_handler_serves_content_actions() {
        let controller = OverlayController::new();
        let mut page = sample_page();
        let channel = echo_channel();

        let status = controller.handle_message(&mut page, &channel, &json!({"action": "getOverlayStatus"}));
        assert_eq!(status, json!({"hasOverlaidImages": false, "imageCount": 0}));

        let run = controller.handle_message(
            &mut page,
            &channel,
            &json!({"action": "runAIOverlay", "settings": {"style": "modern", "intensity": 7}}),
        );
        assert_eq!(run, json!({"success": true, "imageCount": 2}));

        let reset = controller.handle_message(&mut page, &channel, &json!({"action": "resetImages"}));
        assert_eq!(reset, json!({"success": true}));

        let unknown = controller.handle_message(&mut page, &channel, &json!({"action": "setApiKey"}));
        assert_eq!(unknown, json!({"error": "Unknown action"}));

        let mut empty = MemoryPage::default();
        let failed = controller.handle_message(
            &mut empty,
            &channel,
            &json!({"action": "runAIOverlay", "settings": {}}),
        );
        assert_eq!(failed, json!({"error": "No images found on this page"}));
    }

    #[test]
    fn journal_records_run_and_restore() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let controller = OverlayController::with_journal(ActivityJournal::new(&path, "page-1"));
        let mut page = sample_page();
        let channel = fn_channel(|message: Value| {
            if message["imageUrl"] == json!("https://example.com/cat.jpg") {
                Ok(json!({"success": true, "aiImageUrl": "https://cdn.example.com/a.png"}))
            } else {
                Err(anyhow!("dropped"))
            }
        });

        controller
            .run_overlay(&mut page, &channel, &OverlaySettings::default())
            .unwrap();
        controller.reset_images(&mut page).unwrap();

        assert_eq!(
            journal_types(&path)?,
            vec![
                "overlay_started",
                "image_replaced",
                "image_fallback",
                "overlay_finished",
                "images_restored"
            ]
        );
        Ok(())
    }

    #[test]
    fn stale_load_failure_from_reset_does_not_undo_the_next_run() {
        let controller = OverlayController::new();
        let mut page = MemoryPage::new(vec![ImageElement::new(
            "https://example.com/broken-original.jpg",
            40,
            40,
        )]);
        page.mark_broken("https://example.com/broken-original.jpg");
        let channel = fn_channel(|_message: Value| {
            Ok(json!({"success": true, "aiImageUrl": "https://cdn.example.com/fine.png"}))
        });

        controller
            .run_overlay(&mut page, &channel, &OverlaySettings::default())
            .unwrap();
        controller.reset_images(&mut page).unwrap();
        assert_eq!(
            page.image(NodeId(0)).unwrap().src,
            "https://example.com/broken-original.jpg"
        );

        controller
            .run_overlay(&mut page, &channel, &OverlaySettings::default())
            .unwrap();
        let image = page.image(NodeId(0)).unwrap();
        assert_eq!(image.src, "https://cdn.example.com/fine.png");
        assert_eq!(image.attributes.get(PROCESSED_ATTR).map(String::as_str), Some("true"));
    }

    #[test]
    fn failure_for_an_older_source_is_ignored() {
        let controller = OverlayController::new();
        let mut page = sample_page();
        page.mark_broken("https://cdn.example.com/old.png");
        controller
            .run_overlay(&mut page, &echo_channel(), &OverlaySettings::default())
            .unwrap();

        page.set_attribute(NodeId(0), "src", "https://cdn.example.com/old.png");
        page.set_attribute(NodeId(0), "src", "data:image/png;base64,27");
        assert_eq!(controller.handle_load_errors(&mut page), 0);
        assert_eq!(page.image(NodeId(0)).unwrap().src, "data:image/png;base64,27");
    }

    #[test]
    fn vanished_node_is_left_unchanged_and_still_counted() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let controller = OverlayController::with_journal(ActivityJournal::new(&path, "page-1"));
        let mut page = VanishingPage {
            inner: sample_page(),
            target: NodeId(0),
            gone: false,
        };

        let count = controller
            .run_overlay(&mut page, &failing_channel(), &OverlaySettings::default())
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(controller.status().image_count, 2);
        let cat = page.inner.image(NodeId(0)).unwrap();
        assert_eq!(cat.src, "https://example.com/cat.jpg");
        assert!(cat.attributes.get(PROCESSED_ATTR).is_none());
        assert!(cat.attributes.get(AI_SRC_ATTR).is_none());
        assert!(cat.parent_children.is_empty());
        assert!(page
            .inner
            .image(NodeId(1))
            .unwrap()
            .src
            .starts_with("https://picsum.photos/"));
        assert_eq!(
            journal_types(&path)?,
            vec![
                "overlay_started",
                "image_unchanged",
                "image_fallback",
                "overlay_finished"
            ]
        );
        Ok(())
    }
}
