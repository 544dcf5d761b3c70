//! Locally synthesized placeholder images. Building these never touches the
//! network and never fails.

use rand::Rng;

use crate::settings::{OverlaySettings, Style};

pub const PLACEHOLDER_BASE_URL: &str = "https://picsum.photos";
pub const PLACEHOLDER_WIDTH: u32 = 400;
pub const PLACEHOLDER_HEIGHT: u32 = 300;
const SEED_RANGE: u32 = 1000;

pub fn random_seed() -> u32 {
    rand::thread_rng().gen_range(0..SEED_RANGE)
}

fn style_filter(style: Style) -> Option<&'static str> {
    match style {
        Style::Artistic => Some("blur=1&grayscale"),
        Style::Realistic => Some("grayscale"),
        Style::Cartoon => Some("blur=2"),
        Style::Vintage => Some("sepia=100"),
        Style::Modern => Some("blur=0.5"),
        Style::Other => None,
    }
}

fn intensity_blur(intensity: u8) -> Option<&'static str> {
    if intensity > 7 {
        Some("blur=2")
    } else if intensity > 4 {
        Some("blur=1")
    } else {
        None
    }
}

fn base_url(seed: u32) -> String {
    format!(
        "{PLACEHOLDER_BASE_URL}/{PLACEHOLDER_WIDTH}/{PLACEHOLDER_HEIGHT}?random={}",
        seed % SEED_RANGE
    )
}

/// Placeholder the background side falls back to when generation fails:
/// the style maps to a filter and the intensity to an extra blur level.
pub fn styled_placeholder_url(settings: &OverlaySettings, seed: u32) -> String {
    let mut url = base_url(seed);
    let params = [style_filter(settings.style), intensity_blur(settings.intensity)];
    for param in params.into_iter().flatten() {
        url.push('&');
        url.push_str(param);
    }
    url
}

/// Placeholder the page side applies when the background round trip fails.
pub fn tagged_placeholder_url(settings: &OverlaySettings, seed: u32) -> String {
    format!(
        "{}&style={}&intensity={}",
        base_url(seed),
        settings.style,
        settings.intensity
    )
}
