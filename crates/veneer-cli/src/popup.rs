//! Coarse status text shown to the user, derived from message responses.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use veneer_contracts::messages::response_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Processing,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub kind: StatusKind,
    pub text: String,
}

impl StatusLine {
    fn processing(text: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Processing,
            text: text.into(),
        }
    }

    fn success(text: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Success,
            text: text.into(),
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Error,
            text: text.into(),
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self.kind {
            StatusKind::Processing => "…",
            StatusKind::Success => "✓",
            StatusKind::Error => "✗",
        };
        write!(f, "{marker} {}", self.text)
    }
}

fn succeeded(response: &Value) -> bool {
    response
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn count_field(response: &Value, key: &str) -> u64 {
    response.get(key).and_then(Value::as_u64).unwrap_or(0)
}

pub fn run_started() -> StatusLine {
    StatusLine::processing("Processing images...")
}

pub fn run_finished(response: &Value) -> StatusLine {
    if succeeded(response) {
        return StatusLine::success(format!(
            "Processed {} images",
            count_field(response, "imageCount")
        ));
    }
    let message = response_error(response).unwrap_or("Failed to process images");
    StatusLine::error(format!("Error: {message}"))
}

pub fn reset_started() -> StatusLine {
    StatusLine::processing("Restoring images...")
}

pub fn reset_finished(response: &Value) -> StatusLine {
    match response_error(response) {
        Some(message) => StatusLine::error(format!("Error: {message}")),
        None => StatusLine::success("Images restored"),
    }
}

/// Only an overlaid page has something to report.
pub fn overlay_status(response: &Value) -> Option<StatusLine> {
    let overlaid = response
        .get("hasOverlaidImages")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    overlaid.then(|| {
        StatusLine::success(format!(
            "{} images overlaid",
            count_field(response, "imageCount")
        ))
    })
}

pub fn api_status(response: &Value) -> StatusLine {
    let has_key = response
        .get("hasApiKey")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if has_key {
        StatusLine::success("API key configured")
    } else {
        StatusLine::processing("Using free AI (rate limited)")
    }
}

pub fn api_key_saved(api_key: &str, response: &Value) -> StatusLine {
    if !succeeded(response) {
        return StatusLine::error("Failed to configure API key");
    }
    if api_key.trim().is_empty() {
        StatusLine::success("Using free tier (rate limited)")
    } else {
        StatusLine::success("API key configured")
    }
}

pub fn face_uploaded(response: &Value) -> StatusLine {
    if succeeded(response) {
        StatusLine::success("Face image uploaded successfully")
    } else {
        face_upload_failed()
    }
}

pub fn face_upload_failed() -> StatusLine {
    StatusLine::error("Failed to upload face image")
}

/// Only a stored face image has something to report.
pub fn stored_face(response: &Value) -> Option<StatusLine> {
    response
        .get("faceImage")
        .and_then(Value::as_str)
        .filter(|data_url| !data_url.is_empty())
        .map(|data_url| {
            let kind = data_url
                .strip_prefix("data:")
                .and_then(|rest| rest.split(';').next())
                .unwrap_or("image");
            StatusLine::success(format!("Face image on file ({kind})"))
        })
}

pub fn face_removed(response: &Value) -> StatusLine {
    if succeeded(response) {
        StatusLine::success("Face image removed")
    } else {
        StatusLine::error("Failed to remove face image")
    }
}

/// Reads an image file into a `data:` URL. The content type comes from the
/// file's magic bytes; anything that is not a known image format is refused.
pub fn face_image_data_url(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let Ok(format) = image::guess_format(&bytes) else {
        bail!("{} is not a recognized image", path.display());
    };
    Ok(format!(
        "data:{};base64,{}",
        format.to_mime_type(),
        BASE64.encode(&bytes)
    ))
}
