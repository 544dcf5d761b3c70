use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use veneer_contracts::messages::{
    protocol_error_response, response_value, ApiStatus, BackgroundRequest, FaceImageResponse,
    MessageChannel, ProcessImageResponse, SuccessResponse,
};
use veneer_contracts::placeholder::{random_seed, styled_placeholder_url};
use veneer_contracts::prompts::{build_personalized_prompt, build_prompt};
use veneer_contracts::settings::{OverlaySettings, SettingsStore};

use crate::client::{GenerationError, GenerationRequest, ImageGenerator};

/// Background side: owns the credential and decides how each image is
/// generated. One instance per background context.
pub struct BackgroundCoordinator {
    settings: SettingsStore,
    generator: Arc<dyn ImageGenerator>,
    api_key: Mutex<Option<String>>,
}

impl BackgroundCoordinator {
    pub fn new(settings: SettingsStore, generator: Arc<dyn ImageGenerator>) -> Self {
        match settings.install_defaults() {
            Ok(true) => tracing::info!("installed default overlay settings"),
            Ok(false) => {}
            Err(err) => tracing::warn!(error = %err, "could not install default overlay settings"),
        }
        let api_key = settings.api_key();
        Self {
            settings,
            generator,
            api_key: Mutex::new(api_key),
        }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Always yields an image reference: generation failures degrade to a
    /// styled placeholder.
    pub fn process_image_with_ai(&self, image_url: &str, settings: &OverlaySettings) -> String {
        let generated = match self.settings.face_image() {
            Some(face_image) => self.personalize(image_url, &face_image, settings),
            None => self.generate(build_prompt(settings)),
        };
        match generated {
            Ok(ai_image_url) => ai_image_url,
            Err(err) => {
                tracing::warn!(image_url, error = %err, "AI generation failed; using placeholder");
                styled_placeholder_url(settings, random_seed())
            }
        }
    }

    // The face image only selects the portrait prompt; it is never composited
    // into the generated picture.
    fn personalize(
        &self,
        image_url: &str,
        face_image: &str,
        settings: &OverlaySettings,
    ) -> Result<String, GenerationError> {
        tracing::debug!(
            image_url,
            face_image_bytes = face_image.len(),
            "generating personalized image"
        );
        self.generate(build_personalized_prompt(settings))
            .or_else(|err| {
                tracing::warn!(error = %err, "personalized generation failed; trying plain prompt");
                self.generate(build_prompt(settings))
            })
    }

    fn generate(&self, prompt: String) -> Result<String, GenerationError> {
        let request = GenerationRequest::new(prompt, self.api_key());
        self.generator.generate(&request)
    }

    fn api_key(&self) -> Option<String> {
        self.api_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Keeps the key in memory even when persisting it fails; the return
    /// value reports whether it was persisted.
    pub fn set_api_key(&self, api_key: &str) -> bool {
        let trimmed = api_key.trim();
        *self.api_key.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(trimmed.to_string()).filter(|value| !value.is_empty());
        match self.settings.set_api_key(trimmed) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "failed to persist API key");
                false
            }
        }
    }

    pub fn api_status(&self) -> ApiStatus {
        ApiStatus {
            has_api_key: self.api_key().is_some(),
            api_url: self.generator.endpoint().to_string(),
        }
    }

    pub fn set_user_face_image(&self, image_data_url: Option<&str>) -> bool {
        match self.settings.set_face_image(image_data_url) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "failed to store face image");
                false
            }
        }
    }

    pub fn user_face_image(&self) -> Option<String> {
        self.settings.face_image()
    }

    pub fn handle_message(&self, message: &Value) -> Value {
        let request = match BackgroundRequest::parse(message) {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(error = %err, "rejecting background message");
                return protocol_error_response(&err);
            }
        };
        match request {
            BackgroundRequest::ProcessImage {
                image_url,
                settings,
            } => response_value(&ProcessImageResponse {
                success: true,
                ai_image_url: self.process_image_with_ai(&image_url, &settings),
            }),
            BackgroundRequest::SetApiKey { api_key } => response_value(&SuccessResponse {
                success: self.set_api_key(&api_key),
            }),
            BackgroundRequest::SetUserFaceImage { image_data_url } => {
                response_value(&SuccessResponse {
                    success: self.set_user_face_image(image_data_url.as_deref()),
                })
            }
            BackgroundRequest::GetApiStatus => response_value(&self.api_status()),
            BackgroundRequest::GetUserFaceImage => response_value(&FaceImageResponse {
                face_image: self.user_face_image(),
            }),
        }
    }
}

impl MessageChannel for BackgroundCoordinator {
    fn send(&self, message: Value) -> anyhow::Result<Value> {
        Ok(self.handle_message(&message))
    }
}
