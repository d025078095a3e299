//! Where every field of every template variant goes. Coordinates are PDF points with the
//! origin at the bottom-left corner of the page, and `y` is the baseline of the text.

use time::macros::format_description;

use crate::{
    assets::TemplateAsset,
    document::{
        CertificateRecord, CertificateVariant, FontKey, ImageCardData, Rgb, TemplateField,
        VisitingCardTheme,
    },
    error::ContextError,
    geometry::{
        center_within_container, constrain_drag, scale_to_fit_container, Rect, Size,
        IMAGE_X_OFFSET_LIMIT_PX, IMAGE_Y_OFFSET_LIMIT_PX,
    },
};

/// The dark visiting card template has its artwork on the second page, drawn 20pt lower
/// than the light one. Tied to the current `visitingcard/dark.pdf` asset.
pub const DARK_THEME_Y_SHIFT_PT: f32 = 20.0;

/// Distance between the right edge of the page and right-anchored fields.
pub const CERTIFICATE_RIGHT_MARGIN_PT: f32 = 60.0;

/// Only drawn on the second certificate variant.
pub const TRAINING_PROGRAM_PARAGRAPH: &str = "has successfully completed the Basic Life \
Support (BLS) and Advanced Cardiovascular Life Support (ACLS) training program, including \
hands-on skills practice and a written evaluation, in accordance with the current \
resuscitation guidelines.";

const INK: Rgb = Rgb::new(0.133, 0.133, 0.133);
const ACCENT: Rgb = Rgb::new(0.047, 0.274, 0.478);
const WHITE: Rgb = Rgb::new(1.0, 1.0, 1.0);

/// Measures text with the metrics of the fonts that will actually be embedded.
pub trait TextMeasure {
    fn width_of_text_at_size(
        &self,
        font_key: FontKey,
        text: &str,
        font_size: f32,
    ) -> Result<f32, ContextError>;
}

/// Vertical positions and sizes of a certificate layout. When `left_edge` is set the name
/// and hospital are left aligned on it, otherwise they are centered on the page.
struct CertificateLayout {
    left_edge: Option<f32>,
    name_baseline: f32,
    name_size: f32,
    hospital_baseline: f32,
    hospital_size: f32,
    certificate_number_baseline: f32,
    doi_baseline: f32,
    detail_size: f32,
    paragraph_baseline: f32,
}

const CERTIFICATE1_LAYOUT: CertificateLayout = CertificateLayout {
    left_edge: None,
    name_baseline: 300.0,
    name_size: 28.0,
    hospital_baseline: 258.0,
    hospital_size: 16.0,
    certificate_number_baseline: 540.0,
    doi_baseline: 84.0,
    detail_size: 11.0,
    paragraph_baseline: 0.0,
};

const CERTIFICATE2_LAYOUT: CertificateLayout = CertificateLayout {
    left_edge: None,
    name_baseline: 318.0,
    name_size: 28.0,
    hospital_baseline: 280.0,
    hospital_size: 15.0,
    certificate_number_baseline: 540.0,
    doi_baseline: 84.0,
    detail_size: 11.0,
    paragraph_baseline: 236.0,
};

const CERTIFICATE3_LAYOUT: CertificateLayout = CertificateLayout {
    left_edge: Some(92.0),
    name_baseline: 334.0,
    name_size: 30.0,
    hospital_baseline: 292.0,
    hospital_size: 16.0,
    certificate_number_baseline: 112.0,
    doi_baseline: 94.0,
    detail_size: 10.0,
    paragraph_baseline: 0.0,
};

const PARAGRAPH_WIDTH_PT: f32 = 540.0;
const PARAGRAPH_SIZE_PT: f32 = 12.0;
const PARAGRAPH_LINE_HEIGHT_PT: f32 = 17.0;

/// The page every field of the template is drawn on.
pub fn page_index(template: TemplateAsset) -> usize {
    match template {
        TemplateAsset::VisitingCardDark => 1,
        _ => 0,
    }
}

/// The fonts a template draws with, each embedded once.
pub fn required_fonts(template: TemplateAsset) -> &'static [FontKey] {
    match template {
        TemplateAsset::Certificate1
        | TemplateAsset::Certificate2
        | TemplateAsset::Certificate3
        | TemplateAsset::IdCard => &[FontKey::SemiBold, FontKey::Regular, FontKey::Medium],
        TemplateAsset::VisitingCardDark | TemplateAsset::VisitingCardLight => {
            &[FontKey::SemiBold, FontKey::Regular]
        }
    }
}

pub fn certificate_fields(
    record: &CertificateRecord,
    variant: CertificateVariant,
    page: Size,
    measure: &impl TextMeasure,
) -> Result<Vec<TemplateField>, ContextError> {
    let layout = match variant {
        CertificateVariant::Certificate1 => &CERTIFICATE1_LAYOUT,
        CertificateVariant::Certificate2 => &CERTIFICATE2_LAYOUT,
        CertificateVariant::Certificate3 => &CERTIFICATE3_LAYOUT,
    };
    let page_index = page_index(variant.template());

    let aligned = |text: &str, font_key: FontKey, size: f32| -> Result<f32, ContextError> {
        match layout.left_edge {
            Some(left_edge) => Ok(left_edge),
            None => {
                let width = measure.width_of_text_at_size(font_key, text, size)?;
                let container = Rect::new(0.0, 0.0, page.width, 0.0);
                Ok(center_within_container(Size::new(width, 0.0), container).x)
            }
        }
    };
    let right_anchored = |text: &str, font_key: FontKey, size: f32| -> Result<f32, ContextError> {
        let width = measure.width_of_text_at_size(font_key, text, size)?;
        Ok(page.width - CERTIFICATE_RIGHT_MARGIN_PT - width)
    };

    // Names may carry intentional capitalization ("H.S"), they are drawn exactly as given
    let name = record.name.clone();
    let hospital = title_case(&record.hospital);
    let doi = format_doi(&record.doi);
    let certificate_number = record.certificate_no.trim().to_string();

    let mut fields = vec![
        TemplateField {
            x: aligned(&name, FontKey::SemiBold, layout.name_size)?,
            y: layout.name_baseline,
            font_key: FontKey::SemiBold,
            size_pt: layout.name_size,
            color: ACCENT,
            text: name,
            max_width_pt: None,
            line_height_pt: None,
            page_index,
        },
        TemplateField {
            x: aligned(&hospital, FontKey::Regular, layout.hospital_size)?,
            y: layout.hospital_baseline,
            font_key: FontKey::Regular,
            size_pt: layout.hospital_size,
            color: INK,
            text: hospital,
            max_width_pt: None,
            line_height_pt: None,
            page_index,
        },
        TemplateField {
            x: right_anchored(&certificate_number, FontKey::Medium, layout.detail_size)?,
            y: layout.certificate_number_baseline,
            font_key: FontKey::Medium,
            size_pt: layout.detail_size,
            color: INK,
            text: certificate_number,
            max_width_pt: None,
            line_height_pt: None,
            page_index,
        },
        TemplateField {
            x: right_anchored(&doi, FontKey::Medium, layout.detail_size)?,
            y: layout.doi_baseline,
            font_key: FontKey::Medium,
            size_pt: layout.detail_size,
            color: INK,
            text: doi,
            max_width_pt: None,
            line_height_pt: None,
            page_index,
        },
    ];

    if variant.has_training_paragraph() {
        fields.push(TemplateField {
            text: TRAINING_PROGRAM_PARAGRAPH.to_string(),
            x: (page.width - PARAGRAPH_WIDTH_PT) / 2.0,
            y: layout.paragraph_baseline,
            font_key: FontKey::Regular,
            size_pt: PARAGRAPH_SIZE_PT,
            color: INK,
            max_width_pt: Some(PARAGRAPH_WIDTH_PT),
            line_height_pt: Some(PARAGRAPH_LINE_HEIGHT_PT),
            page_index,
        });
    }

    Ok(fields)
}

// ID card: a portrait card with the photo at the top and the details below it
const ID_CARD_PHOTO_WIDTH_PT: f32 = 72.0;
const ID_CARD_PHOTO_HEIGHT_PT: f32 = 86.0;
const ID_CARD_PHOTO_TOP_MARGIN_PT: f32 = 46.0;
const ID_CARD_DETAIL_LEFT_PT: f32 = 22.0;

/// The box the photo of an ID card is fitted into, moved by the (clamped) drag offsets.
/// Offsets are screen pixels, so a positive vertical offset moves the photo down.
pub fn id_card_photo_box(data: &ImageCardData, page: Size) -> Rect {
    let x_offset = constrain_drag(
        data.image_x_offset_px,
        -IMAGE_X_OFFSET_LIMIT_PX,
        IMAGE_X_OFFSET_LIMIT_PX,
    );
    let y_offset = constrain_drag(
        data.image_y_offset_px,
        -IMAGE_Y_OFFSET_LIMIT_PX,
        IMAGE_Y_OFFSET_LIMIT_PX,
    );

    Rect::new(
        (page.width - ID_CARD_PHOTO_WIDTH_PT) / 2.0 + x_offset,
        page.height - ID_CARD_PHOTO_TOP_MARGIN_PT - ID_CARD_PHOTO_HEIGHT_PT - y_offset,
        ID_CARD_PHOTO_WIDTH_PT,
        ID_CARD_PHOTO_HEIGHT_PT,
    )
}

/// Where an image of the given pixel size is drawn inside the photo box: scaled to fit
/// and centered, so that the photo is never distorted.
pub fn fit_photo(image: Size, photo_box: Rect) -> Rect {
    let scale = scale_to_fit_container(
        image.width,
        image.height,
        photo_box.width,
        photo_box.height,
    );
    let fitted = Size::new(image.width * scale, image.height * scale);
    let origin = center_within_container(fitted, photo_box);
    Rect::new(origin.x, origin.y, fitted.width, fitted.height)
}

pub fn id_card_fields(
    data: &ImageCardData,
    page: Size,
    measure: &impl TextMeasure,
) -> Result<Vec<TemplateField>, ContextError> {
    let page_index = page_index(TemplateAsset::IdCard);
    let photo_bottom = page.height - ID_CARD_PHOTO_TOP_MARGIN_PT - ID_CARD_PHOTO_HEIGHT_PT;
    let centered = |text: &str, font_key: FontKey, size: f32| -> Result<f32, ContextError> {
        let width = measure.width_of_text_at_size(font_key, text, size)?;
        Ok((page.width - width) / 2.0)
    };

    let full_name = data.full_name.clone();
    let designation = data.designation.trim().to_string();
    let mut fields = vec![
        TemplateField {
            x: centered(&full_name, FontKey::SemiBold, 11.0)?,
            y: photo_bottom - 24.0,
            font_key: FontKey::SemiBold,
            size_pt: 11.0,
            color: ACCENT,
            text: full_name,
            max_width_pt: None,
            line_height_pt: None,
            page_index,
        },
        TemplateField {
            x: centered(&designation, FontKey::Regular, 8.0)?,
            y: photo_bottom - 37.0,
            font_key: FontKey::Regular,
            size_pt: 8.0,
            color: INK,
            text: designation,
            max_width_pt: None,
            line_height_pt: None,
            page_index,
        },
    ];

    let details = [
        ("ID No", data.id_card_no.trim()),
        ("Blood Group", data.blood_group.trim()),
    ];
    for (line_index, (label, value)) in details.into_iter().enumerate() {
        if value.is_empty() {
            continue;
        }
        fields.push(TemplateField {
            text: format!("{label}: {value}"),
            x: ID_CARD_DETAIL_LEFT_PT,
            y: photo_bottom - 58.0 - line_index as f32 * 12.0,
            font_key: FontKey::Medium,
            size_pt: 8.0,
            color: INK,
            max_width_pt: None,
            line_height_pt: None,
            page_index,
        });
    }

    Ok(fields
        .into_iter()
        .filter(|field| !field.text.is_empty())
        .collect())
}

pub fn visiting_card_fields(
    data: &ImageCardData,
    theme: VisitingCardTheme,
) -> Vec<TemplateField> {
    let template = theme.template();
    let page_index = page_index(template);
    let (y_shift, name_color, detail_color) = match theme {
        VisitingCardTheme::Dark => (DARK_THEME_Y_SHIFT_PT, WHITE, WHITE),
        VisitingCardTheme::Light => (0.0, ACCENT, INK),
    };

    let lines = [
        (data.full_name.as_str(), FontKey::SemiBold, 14.0, 84.0, name_color),
        (data.designation.trim(), FontKey::Regular, 9.0, 69.0, detail_color),
        (data.id_card_no.trim(), FontKey::Regular, 8.0, 40.0, detail_color),
    ];
    lines
        .into_iter()
        .filter(|(text, ..)| !text.is_empty())
        .map(|(text, font_key, size_pt, baseline, color)| TemplateField {
            text: text.to_string(),
            x: 24.0,
            y: baseline + y_shift,
            font_key,
            size_pt,
            color,
            max_width_pt: None,
            line_height_pt: None,
            page_index,
        })
        .collect()
}

/// Capitalizes the first letter of every word and lowercases the rest, collapsing runs of
/// whitespace.
pub fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut characters = word.chars();
            match characters.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(characters.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `DD-MM-YYYY` becomes `DD/MM/YYYY`. Anything that isn't a valid date in that format is
/// drawn as an empty field.
pub fn format_doi(doi: &str) -> String {
    let input_format = format_description!("[day]-[month]-[year]");
    let output_format = format_description!("[day]/[month]/[year]");

    let formatted = time::Date::parse(doi.trim(), input_format)
        .map_err(|error| ContextError::with_error("Invalid date of issue", &error))
        .and_then(|date| {
            date.format(output_format)
                .map_err(|error| ContextError::with_error("Unable to format the date", &error))
        });
    match formatted {
        Ok(formatted) => formatted,
        Err(error) => {
            log::warn!("{} ({:?}), leaving the field empty", error, doi);
            String::new()
        }
    }
}
