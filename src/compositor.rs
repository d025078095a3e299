//! Poster compositing: a base image covering the whole surface with movable overlay layers
//! (logos) on top. Layers are positioned relative to a placement container expressed in
//! percentages of the surface, so the same composition renders at any output size.

use serde::{Deserialize, Serialize};
use tiny_skia::{
    Color, FillRule, FilterQuality, IntSize, Mask, Paint, Pixmap, PixmapPaint, Stroke,
    StrokeDash, Transform,
};
use uuid::Uuid;

use crate::{
    document::Rgb,
    error::ContextError,
    geometry::{
        apply_percent_offset, center_within_container, cover_placement, rounded_rect_path,
        scale_to_fit_container, Rect, Size,
    },
    metadata::{set_raster_dpi, RasterFormat},
};

const PLACEHOLDER_FILL: Rgb = Rgb::new(0.945, 0.961, 0.976);
const PLACEHOLDER_BORDER: Rgb = Rgb::new(0.796, 0.835, 0.882);
const SELECTION_COLOR: Rgb = Rgb::new(0.231, 0.510, 0.965);
const SELECTION_MARGIN_PX: f32 = 4.0;
const HANDLE_SIZE_PX: f32 = 8.0;

/// How a layer is composited onto what is already drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
}

impl BlendMode {
    fn to_tiny_skia(self) -> tiny_skia::BlendMode {
        match self {
            BlendMode::Normal => tiny_skia::BlendMode::SourceOver,
            BlendMode::Multiply => tiny_skia::BlendMode::Multiply,
            BlendMode::Screen => tiny_skia::BlendMode::Screen,
            BlendMode::Overlay => tiny_skia::BlendMode::Overlay,
            BlendMode::Darken => tiny_skia::BlendMode::Darken,
            BlendMode::Lighten => tiny_skia::BlendMode::Lighten,
            BlendMode::ColorDodge => tiny_skia::BlendMode::ColorDodge,
            BlendMode::ColorBurn => tiny_skia::BlendMode::ColorBurn,
            BlendMode::HardLight => tiny_skia::BlendMode::HardLight,
            BlendMode::SoftLight => tiny_skia::BlendMode::SoftLight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlateKind {
    #[default]
    None,
    White,
}

/// A panel drawn behind a layer so that it stands out of a busy background.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Plate {
    pub kind: PlateKind,
    /// Horizontal padding, in percent of the layer width.
    pub padding_x_percent: f32,
    /// Vertical padding, in percent of the layer height.
    pub padding_y_percent: f32,
    pub radius_px: f32,
}

impl Default for Plate {
    fn default() -> Self {
        Plate {
            kind: PlateKind::None,
            padding_x_percent: 10.0,
            padding_y_percent: 10.0,
            radius_px: 12.0,
        }
    }
}

/// The adjustable properties of a layer. Values out of their range are clamped when the
/// layer is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayerSettings {
    /// Offset from the center of the container, in percent of its width, in `[-50, 50]`.
    pub x_percent: f32,
    /// Offset from the center of the container, in percent of its height, in `[-50, 50]`.
    pub y_percent: f32,
    /// In `[10, 200]`, 100 being the largest size that fits the container.
    pub scale_percent: f32,
    pub opacity_percent: f32,
    /// Clockwise, in `[-180, 180]`.
    pub rotation_deg: f32,
    pub blend_mode: BlendMode,
    pub corner_radius_px: f32,
    pub border_width_px: f32,
    pub border_color: Rgb,
    pub plate: Plate,
}

impl Default for LayerSettings {
    fn default() -> Self {
        LayerSettings {
            x_percent: 0.0,
            y_percent: 0.0,
            scale_percent: 100.0,
            opacity_percent: 100.0,
            rotation_deg: 0.0,
            blend_mode: BlendMode::Normal,
            corner_radius_px: 0.0,
            border_width_px: 0.0,
            border_color: Rgb::new(1.0, 1.0, 1.0),
            plate: Plate::default(),
        }
    }
}

impl LayerSettings {
    /// The settings with every value brought back into its range. Non-finite values take
    /// their default.
    pub fn clamped(&self) -> LayerSettings {
        let defaults = LayerSettings::default();
        let plate_defaults = Plate::default();
        LayerSettings {
            x_percent: clamp_or(self.x_percent, -50.0, 50.0, defaults.x_percent),
            y_percent: clamp_or(self.y_percent, -50.0, 50.0, defaults.y_percent),
            scale_percent: clamp_or(self.scale_percent, 10.0, 200.0, defaults.scale_percent),
            opacity_percent: clamp_or(self.opacity_percent, 0.0, 100.0, defaults.opacity_percent),
            rotation_deg: clamp_or(self.rotation_deg, -180.0, 180.0, defaults.rotation_deg),
            blend_mode: self.blend_mode,
            corner_radius_px: clamp_or(self.corner_radius_px, 0.0, f32::MAX, 0.0),
            border_width_px: clamp_or(self.border_width_px, 0.0, f32::MAX, 0.0),
            border_color: Rgb::new(
                clamp_or(self.border_color.red, 0.0, 1.0, 1.0),
                clamp_or(self.border_color.green, 0.0, 1.0, 1.0),
                clamp_or(self.border_color.blue, 0.0, 1.0, 1.0),
            ),
            plate: Plate {
                kind: self.plate.kind,
                padding_x_percent: clamp_or(
                    self.plate.padding_x_percent,
                    0.0,
                    100.0,
                    plate_defaults.padding_x_percent,
                ),
                padding_y_percent: clamp_or(
                    self.plate.padding_y_percent,
                    0.0,
                    100.0,
                    plate_defaults.padding_y_percent,
                ),
                radius_px: clamp_or(self.plate.radius_px, 0.0, f32::MAX, 0.0),
            },
        }
    }
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

/// An image placed over the base image.
#[derive(Clone)]
pub struct OverlayLayer {
    pub id: Uuid,
    pub image: Pixmap,
    pub settings: LayerSettings,
}

impl OverlayLayer {
    pub fn new(image: Pixmap, settings: LayerSettings) -> Self {
        OverlayLayer {
            id: Uuid::new_v4(),
            image,
            settings,
        }
    }
}

impl std::fmt::Debug for OverlayLayer {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("OverlayLayer")
            .field("id", &self.id)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("settings", &self.settings)
            .finish()
    }
}

/// The band of the surface layers are laid out in, in percent of the surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlacementContainer {
    pub top_percent: f32,
    pub bottom_percent: f32,
    /// Left and right padding.
    pub side_padding_percent: f32,
}

impl Default for PlacementContainer {
    fn default() -> Self {
        PlacementContainer {
            top_percent: 62.0,
            bottom_percent: 76.0,
            side_padding_percent: 35.0,
        }
    }
}

impl PlacementContainer {
    /// The container in pixels for a surface of the given size.
    pub fn rect(&self, surface: Size) -> Rect {
        let top = surface.height * self.top_percent.clamp(0.0, 100.0) / 100.0;
        let bottom = surface.height * self.bottom_percent.clamp(0.0, 100.0) / 100.0;
        let side = surface.width * self.side_padding_percent.clamp(0.0, 50.0) / 100.0;
        Rect::new(
            side,
            top.min(bottom),
            surface.width - 2.0 * side,
            (bottom - top).abs(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CompositeOptions {
    /// The layer whose selection outline is drawn, unless exporting.
    pub selected_layer_id: Option<Uuid>,
    /// Exports never carry the interactive selection outline.
    pub for_export: bool,
    pub container: PlacementContainer,
}

/// The rectangle a layer occupies before rotation.
pub fn layer_rect(layer: &OverlayLayer, container: Rect) -> Rect {
    let settings = layer.settings.clamped();
    let image_width = layer.image.width() as f32;
    let image_height = layer.image.height() as f32;

    let scale = scale_to_fit_container(image_width, image_height, container.width, container.height)
        * settings.scale_percent
        / 100.0;
    let size = Size::new(image_width * scale, image_height * scale);
    let origin = center_within_container(size, container);

    Rect::new(
        apply_percent_offset(origin.x, settings.x_percent, container.width),
        apply_percent_offset(origin.y, settings.y_percent, container.height),
        size.width,
        size.height,
    )
}

/// Draws the composition onto the surface, replacing whatever it held. The output only
/// depends on the arguments: rendering twice gives the same pixels.
pub fn render_composite(
    surface: &mut Pixmap,
    base: Option<&Pixmap>,
    layers: &[OverlayLayer],
    options: &CompositeOptions,
) {
    surface.fill(Color::TRANSPARENT);
    let surface_size = Size::new(surface.width() as f32, surface.height() as f32);

    match base {
        Some(base) => draw_cover(surface, base),
        None => draw_placeholder(surface),
    }

    let container = options.container.rect(surface_size);
    for layer in layers {
        let rect = layer_rect(layer, container);
        if rect.width <= 0.0 || rect.height <= 0.0 {
            log::debug!("Skipping the empty layer {}", layer.id);
            continue;
        }
        let settings = layer.settings.clamped();
        let center = rect.center();
        let rotation = Transform::from_rotate_at(settings.rotation_deg, center.x, center.y);

        // The layer is drawn apart so that its opacity and blend mode apply to the plate,
        // the image and the border as a whole
        let Some(mut layer_surface) = Pixmap::new(surface.width(), surface.height()) else {
            continue;
        };
        draw_layer(&mut layer_surface, layer, &settings, rect, rotation);
        surface.draw_pixmap(
            0,
            0,
            layer_surface.as_ref(),
            &PixmapPaint {
                opacity: settings.opacity_percent / 100.0,
                blend_mode: settings.blend_mode.to_tiny_skia(),
                quality: FilterQuality::Nearest,
            },
            Transform::identity(),
            None,
        );

        if !options.for_export && options.selected_layer_id == Some(layer.id) {
            draw_selection(surface, rect, rotation);
        }
    }
}

fn draw_cover(surface: &mut Pixmap, base: &Pixmap) {
    let placement = cover_placement(
        base.width() as f32,
        base.height() as f32,
        surface.width() as f32,
        surface.height() as f32,
    );
    let transform = Transform::from_row(
        placement.width / base.width() as f32,
        0.0,
        0.0,
        placement.height / base.height() as f32,
        placement.x,
        placement.y,
    );
    surface.draw_pixmap(
        0,
        0,
        base.as_ref(),
        &PixmapPaint {
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        },
        transform,
        None,
    );
}

fn draw_placeholder(surface: &mut Pixmap) {
    surface.fill(to_color(PLACEHOLDER_FILL, 1.0));
    let border_width = 2.0;
    if let Some(path) = rounded_rect_path(
        border_width / 2.0,
        border_width / 2.0,
        surface.width() as f32 - border_width,
        surface.height() as f32 - border_width,
        0.0,
    ) {
        let stroke = Stroke {
            width: border_width,
            ..Stroke::default()
        };
        surface.stroke_path(
            &path,
            &fill_paint(PLACEHOLDER_BORDER, 1.0),
            &stroke,
            Transform::identity(),
            None,
        );
    }
}

/// Plate, image and border of a layer, in that order.
fn draw_layer(
    layer_surface: &mut Pixmap,
    layer: &OverlayLayer,
    settings: &LayerSettings,
    rect: Rect,
    rotation: Transform,
) {
    if settings.plate.kind == PlateKind::White {
        let plate_rect = rect.inflate(
            rect.width * settings.plate.padding_x_percent / 100.0,
            rect.height * settings.plate.padding_y_percent / 100.0,
        );
        // Soft shadow: a few translucent layers, each one slightly larger
        for spread in 0..4 {
            let shadow_rect = plate_rect
                .translate(0.0, 4.0)
                .inflate(spread as f32 * 1.5, spread as f32 * 1.5);
            if let Some(path) = rounded_rect_path(
                shadow_rect.x,
                shadow_rect.y,
                shadow_rect.width,
                shadow_rect.height,
                settings.plate.radius_px + spread as f32 * 1.5,
            ) {
                layer_surface.fill_path(
                    &path,
                    &fill_paint(Rgb::new(0.0, 0.0, 0.0), 0.06),
                    FillRule::Winding,
                    rotation,
                    None,
                );
            }
        }
        if let Some(path) = rounded_rect_path(
            plate_rect.x,
            plate_rect.y,
            plate_rect.width,
            plate_rect.height,
            settings.plate.radius_px,
        ) {
            layer_surface.fill_path(
                &path,
                &fill_paint(Rgb::new(1.0, 1.0, 1.0), 1.0),
                FillRule::Winding,
                rotation,
                None,
            );
        }
    }

    let outline = rounded_rect_path(
        rect.x,
        rect.y,
        rect.width,
        rect.height,
        settings.corner_radius_px,
    );

    let clip_mask = match &outline {
        Some(path) if settings.corner_radius_px > 0.0 => {
            Mask::new(layer_surface.width(), layer_surface.height()).map(|mut mask| {
                mask.fill_path(path, FillRule::Winding, true, rotation);
                mask
            })
        }
        _ => None,
    };
    let image_transform = rotation.pre_concat(Transform::from_row(
        rect.width / layer.image.width() as f32,
        0.0,
        0.0,
        rect.height / layer.image.height() as f32,
        rect.x,
        rect.y,
    ));
    layer_surface.draw_pixmap(
        0,
        0,
        layer.image.as_ref(),
        &PixmapPaint {
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        },
        image_transform,
        clip_mask.as_ref(),
    );

    if settings.border_width_px > 0.0 {
        if let Some(path) = &outline {
            let stroke = Stroke {
                width: settings.border_width_px,
                ..Stroke::default()
            };
            layer_surface.stroke_path(
                path,
                &fill_paint(settings.border_color, 1.0),
                &stroke,
                rotation,
                None,
            );
        }
    }
}

/// Dashed outline with square handles on the corners. Never part of an export.
fn draw_selection(surface: &mut Pixmap, rect: Rect, rotation: Transform) {
    let outline_rect = rect.inflate(SELECTION_MARGIN_PX, SELECTION_MARGIN_PX);
    if let Some(path) = rounded_rect_path(
        outline_rect.x,
        outline_rect.y,
        outline_rect.width,
        outline_rect.height,
        0.0,
    ) {
        let stroke = Stroke {
            width: 2.0,
            dash: StrokeDash::new(vec![6.0, 4.0], 0.0),
            ..Stroke::default()
        };
        surface.stroke_path(
            &path,
            &fill_paint(SELECTION_COLOR, 1.0),
            &stroke,
            rotation,
            None,
        );
    }

    let corners = [
        (outline_rect.x, outline_rect.y),
        (outline_rect.x + outline_rect.width, outline_rect.y),
        (outline_rect.x, outline_rect.y + outline_rect.height),
        (
            outline_rect.x + outline_rect.width,
            outline_rect.y + outline_rect.height,
        ),
    ];
    for (x, y) in corners {
        let Some(handle) = rounded_rect_path(
            x - HANDLE_SIZE_PX / 2.0,
            y - HANDLE_SIZE_PX / 2.0,
            HANDLE_SIZE_PX,
            HANDLE_SIZE_PX,
            0.0,
        ) else {
            continue;
        };
        surface.fill_path(
            &handle,
            &fill_paint(Rgb::new(1.0, 1.0, 1.0), 1.0),
            FillRule::Winding,
            rotation,
            None,
        );
        surface.stroke_path(
            &handle,
            &fill_paint(SELECTION_COLOR, 1.0),
            &Stroke {
                width: 1.5,
                ..Stroke::default()
            },
            rotation,
            None,
        );
    }
}

fn fill_paint(color: Rgb, opacity: f32) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(to_color(color, opacity));
    paint.anti_alias = true;
    paint
}

fn to_color(color: Rgb, opacity: f32) -> Color {
    Color::from_rgba(
        color.red.clamp(0.0, 1.0),
        color.green.clamp(0.0, 1.0),
        color.blue.clamp(0.0, 1.0),
        opacity.clamp(0.0, 1.0),
    )
    .unwrap_or(Color::BLACK)
}

/// Output size, encoding and print resolution of an exported composition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSettings {
    pub width: u32,
    pub height: u32,
    pub format: RasterFormat,
    /// JPEG quality in `[1, 100]`, ignored for PNG.
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

fn default_quality() -> u8 {
    92
}

fn default_dpi() -> u32 {
    300
}

/// Renders the composition without any selection outline, encodes it and records the
/// print resolution in the encoded metadata.
pub fn export_composite(
    base: Option<&Pixmap>,
    layers: &[OverlayLayer],
    container: PlacementContainer,
    export_settings: &ExportSettings,
) -> Result<Vec<u8>, ContextError> {
    let mut surface = Pixmap::new(export_settings.width, export_settings.height).ok_or(
        ContextError::with_context(format!(
            "Invalid export size {}x{}",
            export_settings.width, export_settings.height
        )),
    )?;
    render_composite(
        &mut surface,
        base,
        layers,
        &CompositeOptions {
            selected_layer_id: None,
            for_export: true,
            container,
        },
    );

    let encoded_bytes = match export_settings.format {
        RasterFormat::Png => surface
            .encode_png()
            .map_err(|error| ContextError::with_error("Failed to encode the PNG", &error))?,
        RasterFormat::Jpeg => encode_jpeg(&surface, export_settings.quality)?,
    };

    Ok(set_raster_dpi(
        &encoded_bytes,
        export_settings.dpi,
        export_settings.format,
    ))
}

/// JPEG has no alpha channel: the surface is flattened onto white first.
fn encode_jpeg(surface: &Pixmap, quality: u8) -> Result<Vec<u8>, ContextError> {
    let rgb_data: Vec<u8> = surface
        .pixels()
        .iter()
        .flat_map(|pixel| {
            // Premultiplied source over opaque white
            let background = 255 - pixel.alpha();
            [
                pixel.red().saturating_add(background),
                pixel.green().saturating_add(background),
                pixel.blue().saturating_add(background),
            ]
        })
        .collect();

    let mut jpeg_bytes = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg_bytes, quality.clamp(1, 100))
        .encode(
            &rgb_data,
            surface.width(),
            surface.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|error| ContextError::with_error("Failed to encode the JPEG", &error))?;

    Ok(jpeg_bytes)
}

/// Decodes PNG or JPEG bytes into a pixmap.
pub fn decode_image(encoded_bytes: &[u8]) -> Result<Pixmap, ContextError> {
    let decoded_image = image::load_from_memory(encoded_bytes)
        .map_err(|error| ContextError::with_error("Failed to decode the image", &error))?
        .to_rgba8();
    let (width, height) = decoded_image.dimensions();

    let premultiplied_data = decoded_image
        .pixels()
        .flat_map(|pixel| {
            let [red, green, blue, alpha] = pixel.0;
            let color = tiny_skia::ColorU8::from_rgba(red, green, blue, alpha).premultiply();
            [color.red(), color.green(), color.blue(), color.alpha()]
        })
        .collect();
    let size = IntSize::from_wh(width, height).ok_or(ContextError::with_context(format!(
        "Invalid image size {}x{}",
        width, height
    )))?;

    Pixmap::from_vec(premultiplied_data, size).ok_or(ContextError::with_context(
        "The decoded image doesn't match its size",
    ))
}

/// The state of an interactive composition: the base image, the layers in drawing order
/// and the (single) selected layer.
#[derive(Debug, Default)]
pub struct CompositeSession {
    base: Option<Pixmap>,
    layers: Vec<OverlayLayer>,
    selected_layer_id: Option<Uuid>,
    pub container: PlacementContainer,
}

impl CompositeSession {
    pub fn new(container: PlacementContainer) -> Self {
        CompositeSession {
            container,
            ..CompositeSession::default()
        }
    }

    pub fn set_base(&mut self, base: Option<Pixmap>) {
        self.base = base;
    }

    pub fn layers(&self) -> &[OverlayLayer] {
        &self.layers
    }

    pub fn selected_layer_id(&self) -> Option<Uuid> {
        self.selected_layer_id
    }

    /// Adds the layer on top of the others and selects it.
    pub fn add_layer(&mut self, image: Pixmap, settings: LayerSettings) -> Uuid {
        let layer = OverlayLayer::new(image, settings);
        let layer_id = layer.id;
        self.layers.push(layer);
        self.selected_layer_id = Some(layer_id);
        layer_id
    }

    pub fn remove_layer(&mut self, layer_id: Uuid) -> Option<OverlayLayer> {
        let position = self.position(layer_id)?;
        if self.selected_layer_id == Some(layer_id) {
            self.selected_layer_id = None;
        }
        Some(self.layers.remove(position))
    }

    /// Selects a layer, or clears the selection with `None`. Unknown layers are ignored.
    pub fn select(&mut self, layer_id: Option<Uuid>) -> bool {
        match layer_id {
            Some(layer_id) if self.position(layer_id).is_none() => false,
            _ => {
                self.selected_layer_id = layer_id;
                true
            }
        }
    }

    pub fn layer_settings_mut(&mut self, layer_id: Uuid) -> Option<&mut LayerSettings> {
        self.layers
            .iter_mut()
            .find(|layer| layer.id == layer_id)
            .map(|layer| &mut layer.settings)
    }

    /// Moves the layer one step up in the drawing order.
    pub fn bring_forward(&mut self, layer_id: Uuid) -> bool {
        match self.position(layer_id) {
            Some(position) if position + 1 < self.layers.len() => {
                self.layers.swap(position, position + 1);
                true
            }
            _ => false,
        }
    }

    /// Moves the layer one step down in the drawing order.
    pub fn send_backward(&mut self, layer_id: Uuid) -> bool {
        match self.position(layer_id) {
            Some(position) if position > 0 => {
                self.layers.swap(position, position - 1);
                true
            }
            _ => false,
        }
    }

    /// Live preview, with the selection outline.
    pub fn render(&self, surface: &mut Pixmap) {
        render_composite(
            surface,
            self.base.as_ref(),
            &self.layers,
            &CompositeOptions {
                selected_layer_id: self.selected_layer_id,
                for_export: false,
                container: self.container,
            },
        );
    }

    pub fn export(&self, export_settings: &ExportSettings) -> Result<Vec<u8>, ContextError> {
        export_composite(
            self.base.as_ref(),
            &self.layers,
            self.container,
            export_settings,
        )
    }

    fn position(&self, layer_id: Uuid) -> Option<usize> {
        self.layers.iter().position(|layer| layer.id == layer_id)
    }
}
