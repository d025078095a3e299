use base64::Engine as _;
use serde::{Deserialize, Serialize};

use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    assets::{AssetConfiguration, AssetSource, TemplateAsset},
    error::{ContextError, GenerationError},
    geometry::Size,
    metadata::split_data_url,
    pdf::{PdfDocument, TextWrap},
    templates::{self, TextMeasure},
};

/// The font faces templates draw with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FontKey {
    Regular,
    SemiBold,
    Medium,
}

impl FontKey {
    pub fn name(&self) -> &'static str {
        match self {
            FontKey::Regular => "regular",
            FontKey::SemiBold => "semi-bold",
            FontKey::Medium => "medium",
        }
    }

    pub(crate) fn default_path(&self) -> &'static str {
        match self {
            FontKey::Regular => "fonts/Sora-Regular.ttf",
            FontKey::SemiBold => "fonts/Sora-SemiBold.ttf",
            FontKey::Medium => "fonts/Poppins-Medium.ttf",
        }
    }
}

/// A color with components between 0 and 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
}

impl Rgb {
    pub const fn new(red: f32, green: f32, blue: f32) -> Self {
        Rgb { red, green, blue }
    }

    pub fn components(&self) -> [f32; 3] {
        [self.red, self.green, self.blue]
    }
}

/// One piece of text to draw on a template, derived from a record for a single render.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateField {
    pub text: String,
    /// Left edge of the text, in points.
    pub x: f32,
    /// Baseline of the (first line of the) text, in points from the bottom of the page.
    pub y: f32,
    pub font_key: FontKey,
    pub size_pt: f32,
    pub color: Rgb,
    pub max_width_pt: Option<f32>,
    pub line_height_pt: Option<f32>,
    pub page_index: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRecord {
    pub certificate_no: String,
    pub name: String,
    pub hospital: String,
    /// Date of issue, `DD-MM-YYYY`.
    pub doi: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CertificateVariant {
    Certificate1,
    Certificate2,
    Certificate3,
}

impl CertificateVariant {
    pub fn template(&self) -> TemplateAsset {
        match self {
            CertificateVariant::Certificate1 => TemplateAsset::Certificate1,
            CertificateVariant::Certificate2 => TemplateAsset::Certificate2,
            CertificateVariant::Certificate3 => TemplateAsset::Certificate3,
        }
    }

    pub fn has_training_paragraph(&self) -> bool {
        matches!(self, CertificateVariant::Certificate2)
    }
}

/// The record behind ID cards and visiting cards.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageCardData {
    pub full_name: String,
    pub designation: String,
    pub id_card_no: String,
    pub blood_group: String,
    /// Base64 PNG or JPEG data URL of the photo, may be empty.
    pub user_image_data_uri: String,
    pub image_x_offset_px: f32,
    pub image_y_offset_px: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisitingCardTheme {
    Dark,
    Light,
}

impl VisitingCardTheme {
    pub fn template(&self) -> TemplateAsset {
        match self {
            VisitingCardTheme::Dark => TemplateAsset::VisitingCardDark,
            VisitingCardTheme::Light => TemplateAsset::VisitingCardLight,
        }
    }
}

/// Everything needed to generate one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DocumentRequest {
    Certificate {
        record: CertificateRecord,
        variant: CertificateVariant,
    },
    IdCard {
        card: ImageCardData,
    },
    VisitingCard {
        card: ImageCardData,
        theme: VisitingCardTheme,
    },
}

/// A request file holds either a single request or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum RequestFile {
    Single(DocumentRequest),
    Batch(Vec<DocumentRequest>),
}

impl DocumentRequest {
    /// Reads one or several requests from a JSON file.
    pub fn from_path(request_path: &Path) -> Result<Vec<DocumentRequest>, ContextError> {
        let request_content = std::fs::read_to_string(request_path).map_err(|error| {
            ContextError::with_error(
                format!("Unable to read the request {:?}", request_path),
                &error,
            )
        })?;
        let request_file: RequestFile = serde_json::from_str(&request_content).map_err(|error| {
            ContextError::with_error(
                format!("Unable to parse the request {:?}", request_path),
                &error,
            )
        })?;

        Ok(match request_file {
            RequestFile::Single(request) => vec![request],
            RequestFile::Batch(requests) => requests,
        })
    }

    pub fn template(&self) -> TemplateAsset {
        match self {
            DocumentRequest::Certificate { variant, .. } => variant.template(),
            DocumentRequest::IdCard { .. } => TemplateAsset::IdCard,
            DocumentRequest::VisitingCard { theme, .. } => theme.template(),
        }
    }

    /// Name fields can't be drawn best effort: without them there is no document.
    fn validate(&self) -> Result<(), GenerationError> {
        let (field, value) = match self {
            DocumentRequest::Certificate { record, .. } => ("name", &record.name),
            DocumentRequest::IdCard { card } | DocumentRequest::VisitingCard { card, .. } => {
                ("fullName", &card.full_name)
            }
        };
        if value.trim().is_empty() {
            return Err(GenerationError::Validation {
                template: self.template().name().to_string(),
                field: field.to_string(),
                reason: "the field is required".to_string(),
            });
        }
        Ok(())
    }

    fn filename_stem(&self) -> String {
        match self {
            DocumentRequest::Certificate { record, .. } => {
                format!("{} - {}", record.name.trim(), record.certificate_no.trim())
            }
            DocumentRequest::IdCard { card } => format!("{} ID Card", card.full_name.trim()),
            DocumentRequest::VisitingCard { card, .. } => {
                format!("{} Visiting Card", card.full_name.trim())
            }
        }
    }
}

/// A finished document, ready to be saved or uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// The fonts embedded into a document, addressed by key.
struct EmbeddedFonts<'a> {
    pdf_document: &'a PdfDocument,
    font_indices: &'a BTreeMap<FontKey, usize>,
}

impl EmbeddedFonts<'_> {
    fn font_index(&self, font_key: FontKey) -> Result<usize, ContextError> {
        self.font_indices
            .get(&font_key)
            .copied()
            .ok_or(ContextError::with_context(format!(
                "The font {} has not been embedded",
                font_key.name()
            )))
    }
}

impl TextMeasure for EmbeddedFonts<'_> {
    fn width_of_text_at_size(
        &self,
        font_key: FontKey,
        text: &str,
        font_size: f32,
    ) -> Result<f32, ContextError> {
        self.pdf_document
            .width_of_text_at_size(self.font_index(font_key)?, text, font_size)
    }
}

/// Renders a request onto its template. The template and the fonts it needs are fetched
/// from `assets`, each font being embedded once. Any failure aborts the whole document.
pub fn generate_document(
    request: &DocumentRequest,
    assets: &dyn AssetSource,
    configuration: &AssetConfiguration,
) -> Result<GeneratedDocument, GenerationError> {
    let template = request.template();
    let template_name = template.name().to_string();
    request.validate()?;

    let template_path = configuration.get_template_path(template);
    let template_bytes =
        assets
            .fetch(&template_path)
            .map_err(|cause| GenerationError::AssetFetch {
                template: template_name.clone(),
                asset: template_path.clone(),
                cause,
            })?;
    let mut pdf_document = PdfDocument::load_template(&template_bytes).map_err(|cause| {
        GenerationError::TemplateParse {
            template: template_name.clone(),
            cause,
        }
    })?;

    let mut font_indices = BTreeMap::new();
    for &font_key in templates::required_fonts(template) {
        let font_path = configuration.get_font_path(font_key);
        let font_bytes = assets
            .fetch(&font_path)
            .map_err(|cause| GenerationError::AssetFetch {
                template: template_name.clone(),
                asset: font_path.clone(),
                cause,
            })?;
        let font_index =
            pdf_document
                .add_font(font_bytes)
                .map_err(|cause| GenerationError::FontEmbed {
                    template: template_name.clone(),
                    font: font_key.name().to_string(),
                    cause,
                })?;
        font_indices.insert(font_key, font_index);
    }

    let page_index = templates::page_index(template);
    let (page_width, page_height) =
        pdf_document
            .page_size(page_index)
            .map_err(|cause| GenerationError::TemplateParse {
                template: template_name.clone(),
                cause,
            })?;
    let page = Size::new(page_width, page_height);

    let render_error = |cause: ContextError| GenerationError::Render {
        template: template_name.clone(),
        cause,
    };

    let fields = {
        let embedded_fonts = EmbeddedFonts {
            pdf_document: &pdf_document,
            font_indices: &font_indices,
        };
        let fields = match request {
            DocumentRequest::Certificate { record, variant } => {
                templates::certificate_fields(record, *variant, page, &embedded_fonts)
            }
            DocumentRequest::IdCard { card } => {
                templates::id_card_fields(card, page, &embedded_fonts)
            }
            DocumentRequest::VisitingCard { card, theme } => {
                Ok(templates::visiting_card_fields(card, *theme))
            }
        };
        fields.map_err(render_error)?
    };

    for field in &fields {
        log::debug!(
            "Drawing {:?} on page {} of {} at ({}, {})",
            field.text,
            field.page_index,
            template_name,
            field.x,
            field.y
        );
        let font_index = font_indices
            .get(&field.font_key)
            .copied()
            .ok_or(ContextError::with_context(format!(
                "The font {} has not been embedded",
                field.font_key.name()
            )))
            .map_err(render_error)?;
        let wrap = field.max_width_pt.map(|max_width| TextWrap {
            max_width,
            line_height: field.line_height_pt.unwrap_or(field.size_pt * 1.2),
        });
        pdf_document
            .write_text_to_page(
                field.page_index,
                field.color.components(),
                &field.text,
                font_index,
                field.size_pt,
                [field.x, field.y],
                wrap,
            )
            .map_err(render_error)?;
    }

    if let DocumentRequest::IdCard { card } = request {
        draw_photo(&mut pdf_document, card, page, page_index).map_err(render_error)?;
    }

    pdf_document.write_all().map_err(render_error)?;
    pdf_document.optimize();
    let bytes = pdf_document.save_to_bytes().map_err(render_error)?;

    Ok(GeneratedDocument {
        filename: derive_filename(&request.filename_stem()),
        bytes,
    })
}

/// Embeds the photo of an ID card. A missing or undecodable photo leaves the box empty.
fn draw_photo(
    pdf_document: &mut PdfDocument,
    card: &ImageCardData,
    page: Size,
    page_index: usize,
) -> Result<(), ContextError> {
    if card.user_image_data_uri.trim().is_empty() {
        return Ok(());
    }
    let photo = match decode_photo(&card.user_image_data_uri) {
        Ok(photo) => photo,
        Err(error) => {
            log::warn!("Skipping the photo of {:?}: {}", card.full_name, error);
            return Ok(());
        }
    };

    let photo_box = templates::id_card_photo_box(card, page);
    let placement = templates::fit_photo(
        Size::new(photo.width() as f32, photo.height() as f32),
        photo_box,
    );
    let image_index = pdf_document.add_image(&photo);
    pdf_document.draw_image_to_page(
        page_index,
        image_index,
        [placement.x, placement.y, placement.width, placement.height],
    )
}

fn decode_photo(data_uri: &str) -> Result<image::DynamicImage, ContextError> {
    let (_mime_type, payload) = split_data_url(data_uri).ok_or(ContextError::with_context(
        "The photo is not a base64 data URL",
    ))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|error| ContextError::with_error("Invalid base64 payload", &error))?;
    image::load_from_memory(&bytes)
        .map_err(|error| ContextError::with_error("Unable to decode the photo", &error))
}

/// Characters that are not allowed in file names on at least one common platform.
const FORBIDDEN_FILENAME_CHARACTERS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Turns an arbitrary title into a file name: forbidden characters are removed, the
/// result is trimmed and falls back to `document` when nothing is left.
pub fn derive_filename(title: &str) -> String {
    let sanitized: String = title
        .chars()
        .filter(|character| {
            !FORBIDDEN_FILENAME_CHARACTERS.contains(character) && !character.is_control()
        })
        .collect();
    let stem = sanitized.trim().trim_end_matches('.').trim();
    let stem = if stem.is_empty() { "document" } else { stem };
    format!("{stem}.pdf")
}

/// The outcome of a batch: failures don't prevent the other documents from being generated.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub documents: Vec<GeneratedDocument>,
    /// The index of the failed request in the batch, and why it failed.
    pub failures: Vec<(usize, GenerationError)>,
}

impl BatchReport {
    pub fn success_count(&self) -> usize {
        self.documents.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

/// Generates every request one after the other.
pub fn generate_batch(
    requests: &[DocumentRequest],
    assets: &dyn AssetSource,
    configuration: &AssetConfiguration,
) -> BatchReport {
    let mut batch_report = BatchReport::default();
    for (request_index, request) in requests.iter().enumerate() {
        match generate_document(request, assets, configuration) {
            Ok(document) => batch_report.documents.push(document),
            Err(error) => {
                log::warn!("Request {} of the batch failed: {}", request_index, error);
                batch_report.failures.push((request_index, error));
            }
        }
    }
    log::info!(
        "Generated {} documents, {} failed",
        batch_report.success_count(),
        batch_report.failure_count()
    );

    batch_report
}

/// Writes the documents into the directory, pausing `save_interval` between two files.
/// Documents sharing a file name are numbered instead of overwriting each other.
pub fn save_batch(
    documents: &[GeneratedDocument],
    output_directory: &Path,
    save_interval: Duration,
) -> Result<Vec<PathBuf>, ContextError> {
    std::fs::create_dir_all(output_directory).map_err(|error| {
        ContextError::with_error(
            format!("Unable to create the directory {:?}", output_directory),
            &error,
        )
    })?;

    let mut used_filenames = HashSet::new();
    let mut saved_paths = Vec::with_capacity(documents.len());
    for (document_index, document) in documents.iter().enumerate() {
        if document_index > 0 && !save_interval.is_zero() {
            std::thread::sleep(save_interval);
        }

        let filename = unique_filename(&document.filename, &mut used_filenames);
        let document_path = output_directory.join(filename);
        std::fs::write(&document_path, &document.bytes).map_err(|error| {
            ContextError::with_error(format!("Unable to write {:?}", document_path), &error)
        })?;
        log::info!("Saved {:?}", document_path);
        saved_paths.push(document_path);
    }

    Ok(saved_paths)
}

fn unique_filename(filename: &str, used_filenames: &mut HashSet<String>) -> String {
    let (stem, extension) = filename.rsplit_once('.').unwrap_or((filename, ""));
    let mut candidate = filename.to_string();
    let mut counter = 1;
    while !used_filenames.insert(candidate.clone()) {
        counter += 1;
        candidate = if extension.is_empty() {
            format!("{stem} ({counter})")
        } else {
            format!("{stem} ({counter}).{extension}")
        };
    }
    candidate
}
