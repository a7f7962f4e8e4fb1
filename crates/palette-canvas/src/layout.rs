use palette_core::canvas::CanvasDocument;
use palette_core::config::Config;

/// Where new media lands on a canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutPolicy {
    /// Gap between the last media element's right edge and the next element.
    pub spacing: f64,
    pub origin_x: f64,
    pub origin_y: f64,
}

impl Default for LayoutPolicy {
    fn default() -> Self {
        Self {
            spacing: 20.0,
            origin_x: 0.0,
            origin_y: 0.0,
        }
    }
}

impl LayoutPolicy {
    pub fn from_config(config: &Config) -> Self {
        let (origin_x, origin_y) = config.canvas_origin();
        Self {
            spacing: config.canvas_spacing(),
            origin_x,
            origin_y,
        }
    }
}

/// Position for the next media element: right of the most recent image or
/// video, same row; the origin on a canvas without media.
pub fn next_placement(document: &CanvasDocument, policy: &LayoutPolicy) -> (f64, f64) {
    match document.last_media_element() {
        Some(last) => (last.x + last.width + policy.spacing, last.y),
        None => (policy.origin_x, policy.origin_y),
    }
}
