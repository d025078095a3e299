use docstamp::compositor::{
    export_composite, render_composite, BlendMode, CompositeOptions, CompositeSession,
    ExportSettings, LayerSettings, OverlayLayer, Plate, PlacementContainer, PlateKind,
};
use docstamp::document::Rgb;
use docstamp::metadata::RasterFormat;
use tiny_skia::{Color, Pixmap, PremultipliedColorU8};

fn solid(width: u32, height: u32, color: Color) -> Pixmap {
    let mut pixmap = Pixmap::new(width, height).unwrap();
    pixmap.fill(color);
    pixmap
}

/// A base image whose left half is red and right half is blue.
fn split_base() -> Pixmap {
    let mut base = solid(20, 10, Color::from_rgba8(255, 0, 0, 255));
    let blue = Color::from_rgba8(0, 0, 255, 255).premultiply().to_color_u8();
    for y in 0..10 {
        for x in 10..20 {
            base.pixels_mut()[(y * 20 + x) as usize] = blue;
        }
    }
    base
}

fn pixel(surface: &Pixmap, x: u32, y: u32) -> PremultipliedColorU8 {
    surface.pixel(x, y).unwrap()
}

fn decorated_settings() -> LayerSettings {
    LayerSettings {
        x_percent: 10.0,
        y_percent: -5.0,
        rotation_deg: 30.0,
        corner_radius_px: 4.0,
        border_width_px: 2.0,
        plate: Plate {
            kind: PlateKind::White,
            ..Plate::default()
        },
        ..LayerSettings::default()
    }
}

// With the default container, a 200x200 surface lays layers out in the band
// (70, 124, 60, 28): a 10x10 layer is scaled to 28x28 around (100, 138).

#[test]
fn rendering_is_idempotent() {
    let mut session = CompositeSession::new(PlacementContainer::default());
    session.set_base(Some(split_base()));
    session.add_layer(
        solid(10, 10, Color::from_rgba8(30, 160, 90, 255)),
        decorated_settings(),
    );

    let mut first = Pixmap::new(200, 200).unwrap();
    let mut second = Pixmap::new(200, 200).unwrap();
    session.render(&mut first);
    session.render(&mut second);
    assert_eq!(first, second);

    // Rendering over a previous frame doesn't accumulate anything
    session.render(&mut first);
    assert_eq!(first, second);
}

#[test]
fn base_image_covers_the_whole_surface() {
    let mut surface = Pixmap::new(100, 100).unwrap();
    render_composite(
        &mut surface,
        Some(&split_base()),
        &[],
        &CompositeOptions::default(),
    );

    for (x, y) in [(0, 0), (99, 0), (0, 99), (99, 99), (50, 50)] {
        assert_eq!(pixel(&surface, x, y).alpha(), 255);
    }
    // The wide base is scaled to the surface height and cropped on both sides
    let left = pixel(&surface, 10, 50);
    assert!(left.red() > 240 && left.blue() < 15);
    let right = pixel(&surface, 90, 50);
    assert!(right.blue() > 240 && right.red() < 15);
}

#[test]
fn placeholder_is_drawn_without_a_base_and_layers_still_render() {
    let black = Color::from_rgba8(0, 0, 0, 255);
    let layer = OverlayLayer::new(solid(10, 10, black), LayerSettings::default());

    let mut empty = Pixmap::new(200, 200).unwrap();
    render_composite(&mut empty, None, &[], &CompositeOptions::default());
    let mut with_layer = Pixmap::new(200, 200).unwrap();
    render_composite(
        &mut with_layer,
        None,
        std::slice::from_ref(&layer),
        &CompositeOptions::default(),
    );

    let placeholder = pixel(&empty, 100, 50);
    assert_eq!(placeholder.alpha(), 255);
    assert!(placeholder.red() > 200);
    assert_eq!(pixel(&with_layer, 100, 50), placeholder);

    let center = pixel(&with_layer, 100, 138);
    assert_eq!(center.alpha(), 255);
    assert!(center.red() < 10 && center.green() < 10 && center.blue() < 10);
}

#[test]
fn opacity_blends_the_layer_with_the_base() {
    let white = solid(4, 4, Color::WHITE);
    let layer = OverlayLayer::new(
        solid(10, 10, Color::BLACK),
        LayerSettings {
            opacity_percent: 50.0,
            ..LayerSettings::default()
        },
    );
    let mut surface = Pixmap::new(200, 200).unwrap();
    render_composite(
        &mut surface,
        Some(&white),
        &[layer],
        &CompositeOptions::default(),
    );

    let center = pixel(&surface, 100, 138);
    assert_eq!(center.alpha(), 255);
    assert!((center.red() as i32 - 128).abs() <= 3);
    // Far from the layer the base is untouched
    assert_eq!(pixel(&surface, 10, 10).red(), 255);
}

#[test]
fn multiply_keeps_the_darker_colors() {
    let red_base = solid(4, 4, Color::from_rgba8(255, 0, 0, 255));
    let layer = OverlayLayer::new(
        solid(10, 10, Color::WHITE),
        LayerSettings {
            blend_mode: BlendMode::Multiply,
            ..LayerSettings::default()
        },
    );
    let mut surface = Pixmap::new(200, 200).unwrap();
    render_composite(
        &mut surface,
        Some(&red_base),
        &[layer],
        &CompositeOptions::default(),
    );

    let center = pixel(&surface, 100, 138);
    assert!(center.red() > 240 && center.green() < 15 && center.blue() < 15);
}

/// Renders a single layer over the base with the default container on a 200x200 surface.
fn render_single_layer(base: Option<&Pixmap>, image: Pixmap, settings: LayerSettings) -> Pixmap {
    let mut surface = Pixmap::new(200, 200).unwrap();
    render_composite(
        &mut surface,
        base,
        &[OverlayLayer::new(image, settings)],
        &CompositeOptions::default(),
    );
    surface
}

fn is_white(color: PremultipliedColorU8) -> bool {
    color.red() > 240 && color.green() > 240 && color.blue() > 240
}

fn is_black(color: PremultipliedColorU8) -> bool {
    color.alpha() == 255 && color.red() < 15 && color.green() < 15 && color.blue() < 15
}

#[test]
fn rounded_corners_clip_the_image() {
    let white = solid(4, 4, Color::WHITE);
    let square = render_single_layer(
        Some(&white),
        solid(10, 10, Color::BLACK),
        LayerSettings::default(),
    );
    let rounded = render_single_layer(
        Some(&white),
        solid(10, 10, Color::BLACK),
        LayerSettings {
            corner_radius_px: 10.0,
            ..LayerSettings::default()
        },
    );

    // The layer spans (86, 124) to (114, 152)
    assert!(is_black(pixel(&square, 86, 124)));
    assert!(is_white(pixel(&rounded, 86, 124)));
    assert!(is_white(pixel(&rounded, 113, 151)));
    assert!(is_black(pixel(&rounded, 100, 138)));
    assert!(is_black(pixel(&rounded, 100, 124)));
}

#[test]
fn border_is_stroked_on_the_layer_edge() {
    let surface = render_single_layer(
        Some(&solid(4, 4, Color::WHITE)),
        solid(10, 10, Color::BLACK),
        LayerSettings {
            border_width_px: 4.0,
            border_color: Rgb::new(1.0, 0.0, 0.0),
            ..LayerSettings::default()
        },
    );

    // The stroke is centered on the left edge at x = 86
    for (x, y) in [(85, 138), (87, 138), (100, 125)] {
        let edge = pixel(&surface, x, y);
        assert!(
            edge.red() > 240 && edge.green() < 15 && edge.blue() < 15,
            "({}, {}) is {:?}",
            x,
            y,
            edge
        );
    }
    assert!(is_black(pixel(&surface, 100, 138)));
    assert!(is_white(pixel(&surface, 80, 138)));
}

#[test]
fn white_plate_fills_the_padding() {
    let surface = render_single_layer(
        Some(&solid(4, 4, Color::BLACK)),
        solid(10, 10, Color::from_rgba8(255, 0, 0, 255)),
        LayerSettings {
            plate: Plate {
                kind: PlateKind::White,
                ..Plate::default()
            },
            ..LayerSettings::default()
        },
    );

    // 10% padding of the 28px layer: the plate spans (83.2, 121.2) to (116.8, 154.8)
    assert!(is_white(pixel(&surface, 84, 138)));
    assert!(is_white(pixel(&surface, 115, 138)));
    assert!(is_white(pixel(&surface, 100, 122)));
    let image = pixel(&surface, 100, 138);
    assert!(image.red() > 240 && image.green() < 15);
    assert!(is_black(pixel(&surface, 60, 138)));
}

#[test]
fn rotation_turns_the_layer_about_its_center() {
    let upright = render_single_layer(None, solid(10, 10, Color::BLACK), LayerSettings::default());
    let rotated = render_single_layer(
        None,
        solid(10, 10, Color::BLACK),
        LayerSettings {
            rotation_deg: 45.0,
            ..LayerSettings::default()
        },
    );
    let mut placeholder = Pixmap::new(200, 200).unwrap();
    render_composite(&mut placeholder, None, &[], &CompositeOptions::default());

    // The corner of the upright layer is uncovered once rotated
    assert!(is_black(pixel(&upright, 87, 125)));
    assert_eq!(pixel(&rotated, 87, 125), pixel(&placeholder, 87, 125));
    // The top tip of the rotated layer reaches past the upright top edge at y = 124
    assert_eq!(pixel(&upright, 100, 122), pixel(&placeholder, 100, 122));
    assert!(is_black(pixel(&rotated, 100, 122)));
    assert!(is_black(pixel(&rotated, 100, 138)));
}

#[test]
fn layers_are_drawn_in_order() {
    let mut session = CompositeSession::new(PlacementContainer::default());
    session.add_layer(
        solid(10, 10, Color::from_rgba8(255, 0, 0, 255)),
        LayerSettings::default(),
    );
    let top_layer_id = session.add_layer(
        solid(10, 10, Color::from_rgba8(0, 0, 255, 255)),
        LayerSettings::default(),
    );
    session.select(None);

    let mut surface = Pixmap::new(200, 200).unwrap();
    session.render(&mut surface);
    assert!(pixel(&surface, 100, 138).blue() > 240);

    assert!(session.send_backward(top_layer_id));
    assert!(!session.send_backward(top_layer_id));
    session.render(&mut surface);
    assert!(pixel(&surface, 100, 138).red() > 240);
}

#[test]
fn selection_outline_never_reaches_an_export() {
    let mut session = CompositeSession::new(PlacementContainer::default());
    session.set_base(Some(solid(4, 4, Color::WHITE)));
    let layer_id = session.add_layer(solid(10, 10, Color::BLACK), LayerSettings::default());
    assert_eq!(session.selected_layer_id(), Some(layer_id));

    let mut preview = Pixmap::new(200, 200).unwrap();
    session.render(&mut preview);

    let mut exported = Pixmap::new(200, 200).unwrap();
    render_composite(
        &mut exported,
        Some(&solid(4, 4, Color::WHITE)),
        session.layers(),
        &CompositeOptions {
            selected_layer_id: Some(layer_id),
            for_export: true,
            container: PlacementContainer::default(),
        },
    );
    let mut unselected = Pixmap::new(200, 200).unwrap();
    render_composite(
        &mut unselected,
        Some(&solid(4, 4, Color::WHITE)),
        session.layers(),
        &CompositeOptions::default(),
    );

    assert_ne!(preview, exported);
    assert_eq!(exported, unselected);
}

#[test]
fn exports_carry_their_print_resolution() {
    let mut session = CompositeSession::new(PlacementContainer::default());
    session.set_base(Some(split_base()));
    session.add_layer(solid(10, 10, Color::BLACK), LayerSettings::default());

    let png = session
        .export(&ExportSettings {
            width: 300,
            height: 200,
            format: RasterFormat::Png,
            quality: 92,
            dpi: 300,
        })
        .unwrap();
    // Signature (8) and IHDR (25), then the length of the next chunk
    assert_eq!(&png[37..41], b"pHYs");
    assert_eq!(png[41..45], 11811u32.to_be_bytes());
    let decoded = image::load_from_memory(&png).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (300, 200));

    let jpeg = export_composite(
        None,
        session.layers(),
        PlacementContainer::default(),
        &ExportSettings {
            width: 120,
            height: 80,
            format: RasterFormat::Jpeg,
            quality: 80,
            dpi: 600,
        },
    )
    .unwrap();
    assert_eq!(&jpeg[6..11], b"JFIF\0");
    assert_eq!(jpeg[13], 1);
    assert_eq!(jpeg[14..16], 600u16.to_be_bytes());
    assert_eq!(jpeg[16..18], 600u16.to_be_bytes());
    let decoded = image::load_from_memory(&jpeg).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (120, 80));
}

#[test]
fn invalid_export_sizes_are_errors() {
    let result = export_composite(
        None,
        &[],
        PlacementContainer::default(),
        &ExportSettings {
            width: 0,
            height: 100,
            format: RasterFormat::Png,
            quality: 92,
            dpi: 300,
        },
    );
    assert!(result.is_err());
}
