use serde::{Deserialize, Serialize};
use tiny_skia::{Path, PathBuilder};

/// Horizontal bound of the photo drag on ID and visiting cards, in pixels either way.
pub const IMAGE_X_OFFSET_LIMIT_PX: f32 = 15.0;
/// Vertical bound of the photo drag on ID and visiting cards, in pixels either way.
pub const IMAGE_Y_OFFSET_LIMIT_PX: f32 = 20.0;

/// A width and height pair.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Size { width, height }
    }
}

/// A point in the coordinate space of whatever surface is being drawn onto.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// An axis-aligned rectangle given by its top-left corner and size.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    /// Grows the rectangle by the given amounts on each side.
    pub fn inflate(&self, horizontal: f32, vertical: f32) -> Rect {
        Rect {
            x: self.x - horizontal,
            y: self.y - vertical,
            width: self.width + 2.0 * horizontal,
            height: self.height + 2.0 * vertical,
        }
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Rect {
        Rect {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }
}

/// The uniform scale factor that makes the content fit entirely inside the container,
/// touching it on at least one axis. Degenerate sizes yield a factor of zero.
pub fn scale_to_fit_container(
    content_width: f32,
    content_height: f32,
    container_width: f32,
    container_height: f32,
) -> f32 {
    if content_width <= 0.0 || content_height <= 0.0 {
        return 0.0;
    }
    let scale = (container_width / content_width).min(container_height / content_height);
    scale.max(0.0)
}

/// The top-left corner that centers content of the given size within the container.
pub fn center_within_container(content: Size, container: Rect) -> Point {
    Point {
        x: container.x + (container.width - content.width) / 2.0,
        y: container.y + (container.height - content.height) / 2.0,
    }
}

/// Moves `base` by `percent` percent of `of_dimension`.
pub fn apply_percent_offset(base: f32, percent: f32, of_dimension: f32) -> f32 {
    base + of_dimension * percent / 100.0
}

/// Clamps a proposed drag position into `[min, max]`.
pub fn constrain_drag(proposed: f32, min: f32, max: f32) -> f32 {
    if proposed.is_nan() {
        return min.max(0.0).min(max);
    }
    proposed.clamp(min, max)
}

/// Where an image of the given size lands when it covers the canvas entirely: scaled so
/// that both axes are filled, then centered so the overflow is cropped evenly.
pub fn cover_placement(
    image_width: f32,
    image_height: f32,
    canvas_width: f32,
    canvas_height: f32,
) -> Rect {
    let image_ratio = image_width / image_height;
    let canvas_ratio = canvas_width / canvas_height;

    if image_ratio > canvas_ratio {
        // Wider than the canvas: match the height and crop the sides
        let width = image_width * (canvas_height / image_height);
        Rect::new((canvas_width - width) / 2.0, 0.0, width, canvas_height)
    } else {
        // Taller than the canvas: match the width and crop top and bottom
        let height = image_height * (canvas_width / image_width);
        Rect::new(0.0, (canvas_height - height) / 2.0, canvas_width, height)
    }
}

/// Builds a rounded rectangle from four straight edges joined by quadratic corners.
/// The radius is clamped to half the shortest side; a zero radius gives a plain
/// rectangle. Returns `None` for empty rectangles.
pub fn rounded_rect_path(x: f32, y: f32, width: f32, height: f32, radius: f32) -> Option<Path> {
    if width <= 0.0 || height <= 0.0 {
        return None;
    }
    let radius = radius.max(0.0).min(width / 2.0).min(height / 2.0);

    let mut builder = PathBuilder::new();
    builder.move_to(x + radius, y);
    builder.line_to(x + width - radius, y);
    builder.quad_to(x + width, y, x + width, y + radius);
    builder.line_to(x + width, y + height - radius);
    builder.quad_to(x + width, y + height, x + width - radius, y + height);
    builder.line_to(x + radius, y + height);
    builder.quad_to(x, y + height, x, y + height - radius);
    builder.line_to(x, y + radius);
    builder.quad_to(x, y, x + radius, y);
    builder.close();
    builder.finish()
}
