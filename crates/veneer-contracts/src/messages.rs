use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::settings::OverlaySettings;

pub const UNKNOWN_ACTION: &str = "Unknown action";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Unknown action")]
    UnknownAction(String),
    #[error("malformed '{action}' message: {reason}")]
    Malformed { action: String, reason: String },
}

/// Sends one JSON message to another surface and waits for its reply.
pub trait MessageChannel: Send + Sync {
    fn send(&self, message: Value) -> anyhow::Result<Value>;
}

/// Actions served by the page-side overlay controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ContentRequest {
    #[serde(rename = "runAIOverlay")]
    RunOverlay {
        #[serde(default)]
        settings: OverlaySettings,
    },
    #[serde(rename = "resetImages")]
    ResetImages,
    #[serde(rename = "getOverlayStatus")]
    GetOverlayStatus,
}

impl ContentRequest {
    pub const ACTIONS: &'static [&'static str] =
        &["runAIOverlay", "resetImages", "getOverlayStatus"];

    pub fn parse(message: &Value) -> Result<Self, ProtocolError> {
        parse_tagged(message, Self::ACTIONS)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Actions served by the background coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum BackgroundRequest {
    #[serde(rename = "processImageWithAI")]
    ProcessImage {
        #[serde(rename = "imageUrl")]
        image_url: String,
        #[serde(default)]
        settings: OverlaySettings,
    },
    #[serde(rename = "setApiKey")]
    SetApiKey {
        #[serde(rename = "apiKey", default)]
        api_key: String,
    },
    #[serde(rename = "setUserFaceImage")]
    SetUserFaceImage {
        #[serde(rename = "imageDataUrl", default)]
        image_data_url: Option<String>,
    },
    #[serde(rename = "getApiStatus")]
    GetApiStatus,
    #[serde(rename = "getUserFaceImage")]
    GetUserFaceImage,
}

impl BackgroundRequest {
    pub const ACTIONS: &'static [&'static str] = &[
        "processImageWithAI",
        "setApiKey",
        "setUserFaceImage",
        "getApiStatus",
        "getUserFaceImage",
    ];

    pub fn parse(message: &Value) -> Result<Self, ProtocolError> {
        parse_tagged(message, Self::ACTIONS)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub fn action_of(message: &Value) -> Option<&str> {
    message.get("action").and_then(Value::as_str)
}

fn parse_tagged<T: DeserializeOwned>(
    message: &Value,
    actions: &[&str],
) -> Result<T, ProtocolError> {
    let action = action_of(message).unwrap_or_default();
    if !actions.contains(&action) {
        return Err(ProtocolError::UnknownAction(action.to_string()));
    }
    serde_json::from_value(message.clone()).map_err(|err| ProtocolError::Malformed {
        action: action.to_string(),
        reason: err.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOverlayResponse {
    pub success: bool,
    pub image_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayStatus {
    pub has_overlaid_images: bool,
    pub image_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessImageResponse {
    pub success: bool,
    pub ai_image_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiStatus {
    pub has_api_key: bool,
    pub api_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceImageResponse {
    pub face_image: Option<String>,
}

pub fn response_value<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload)
        .unwrap_or_else(|err| error_response(&format!("response encoding failed: {err}")))
}

pub fn error_response(message: &str) -> Value {
    json!({ "error": message })
}

pub fn protocol_error_response(err: &ProtocolError) -> Value {
    error_response(&err.to_string())
}

/// Error text carried by a response, if any.
pub fn response_error(response: &Value) -> Option<&str> {
    response.get("error").and_then(Value::as_str)
}
