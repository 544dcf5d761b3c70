use crate::settings::{OverlaySettings, Style};

const PROMPT_SUFFIX: &str = "beautiful, professional quality";
const PERSONALIZED_SUFFIX: &str = "personalized face";

pub fn style_phrase(style: Style) -> &'static str {
    match style {
        Style::Artistic | Style::Other => "artistic, creative, abstract, colorful, vibrant",
        Style::Realistic => "photorealistic, detailed, high quality, sharp",
        Style::Cartoon => "cartoon style, animated, colorful, playful",
        Style::Vintage => "vintage, retro, sepia, aged, classic",
        Style::Modern => "modern, contemporary, sleek, minimalist, clean",
    }
}

pub fn portrait_phrase(style: Style) -> &'static str {
    match style {
        Style::Artistic | Style::Other => {
            "artistic portrait, creative, abstract, colorful, vibrant"
        }
        Style::Realistic => "photorealistic portrait, detailed, high quality, sharp",
        Style::Cartoon => "cartoon portrait, animated, colorful, playful",
        Style::Vintage => "vintage portrait, retro, sepia, aged, classic",
        Style::Modern => "modern portrait, contemporary, sleek, minimalist, clean",
    }
}

pub fn intensity_phrase(intensity: u8) -> &'static str {
    if intensity > 7 {
        "highly detailed, dramatic, intense"
    } else if intensity > 4 {
        "detailed, enhanced"
    } else {
        "subtle, gentle"
    }
}

pub fn build_prompt(settings: &OverlaySettings) -> String {
    format!(
        "{}, {}, {PROMPT_SUFFIX}",
        style_phrase(settings.style),
        intensity_phrase(settings.intensity)
    )
}

/// Portrait-flavored prompt used when the user has stored a face image.
pub fn build_personalized_prompt(settings: &OverlaySettings) -> String {
    format!(
        "{}, {}, {PROMPT_SUFFIX}, {PERSONALIZED_SUFFIX}",
        portrait_phrase(settings.style),
        intensity_phrase(settings.intensity)
    )
}
