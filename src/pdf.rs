use lopdf::{content::Operation, Object, ObjectId, StringFormat};
use owned_ttf_parser::{AsFaceRef as _, Face, OwnedFace};
use std::{
    collections::{BTreeMap, HashMap},
    io::BufWriter,
    mem,
};
use unicode_normalization::UnicodeNormalization as _;

use crate::error::ContextError;

/// The (insofar) relevant vertical metrics of a font.
#[derive(Clone, Copy, Debug, Default)]
pub struct FontMetrics {
    /// The ascent of the font.
    pub ascent: i16,
    /// The descent of the font.
    pub descent: i16,
    /// The height of the capital letters, falling back to the ascent when the font omits it.
    pub cap_height: i16,
    /// The number of units per em of the font.
    pub units_per_em: u16,
}

/// The (insofar) relevant metrics associated to a single glyph of a font.
#[derive(Clone, Copy, Debug, Default)]
pub struct GlyphMetrics {
    /// The advance width of the glyph.
    pub width: u32,
    /// The height of the glyph.
    pub height: u32,
}

/// A font face loaded from a TTF font, together with its measure of units per em.
#[derive(Clone, Debug)]
struct TtfFontFace {
    /// The underlying font face which is represented through the `ttf_parser` crate.
    inner: std::sync::Arc<owned_ttf_parser::OwnedFace>,
    /// The number of units per em of the font face.
    units_per_em: u16,
}

impl TtfFontFace {
    /// Retrieve the font metrics from the associated font face.
    fn font_metrics(&self) -> FontMetrics {
        FontMetrics {
            ascent: self.face().ascender(),
            descent: self.face().descender(),
            cap_height: self
                .face()
                .capital_height()
                .unwrap_or(self.face().ascender()),
            units_per_em: self.units_per_em,
        }
    }

    /// Retrieve the glyph ID of a specific codepoint, which in our case is just a `char`.
    fn glyph_id(&self, codepoint: char) -> Option<u16> {
        self.face()
            .glyph_index(codepoint)
            .map(|glyph_id| glyph_id.0)
    }

    /// Maps every glyph reachable from a Unicode subtable back to the first codepoint that
    /// selects it. This is what the `ToUnicode` CMap of the embedded font is built from.
    fn glyph_ids(&self) -> HashMap<u16, char> {
        let font_subtables = self.face().tables().cmap.map(|cmap| {
            cmap.subtables
                .into_iter()
                .filter(|font_subtable| font_subtable.is_unicode())
        });
        let Some(font_subtables) = font_subtables else {
            return HashMap::new();
        };

        let mut gid_to_codepoint_map =
            HashMap::with_capacity(self.face().number_of_glyphs().into());
        for font_subtable in font_subtables {
            font_subtable.codepoints(|codepoint| {
                use std::convert::TryFrom as _;

                if let Ok(character) = char::try_from(codepoint) {
                    // Glyph 0 is `.notdef`, it never carries a character
                    if let Some(glyph_index) = font_subtable
                        .glyph_index(codepoint)
                        .filter(|index| index.0 > 0)
                    {
                        gid_to_codepoint_map
                            .entry(glyph_index.0)
                            .or_insert(character);
                    }
                }
            })
        }

        gid_to_codepoint_map
    }

    /// Retrieve the total number of glyphs present in the font face.
    fn glyph_count(&self) -> u16 {
        self.face().number_of_glyphs()
    }

    /// Attempt to calculate the metrics of a glyph from the associated glyph ID, taken as input.
    fn glyph_metrics(&self, glyph_id: u16) -> Option<GlyphMetrics> {
        let glyph_id = owned_ttf_parser::GlyphId(glyph_id);

        let width = self.face().glyph_hor_advance(glyph_id)? as u32;
        // Horizontal fonts only: the descender is subtracted so that the height spans the
        // whole line box. Glyphs without outline (spaces) fall back to one em.
        let height = self
            .face()
            .glyph_bounding_box(glyph_id)
            .map(|bounding_box| {
                bounding_box.y_max as i32 - bounding_box.y_min as i32
                    - self.face().descender() as i32
            })
            .unwrap_or(1000)
            .max(0) as u32;

        Some(GlyphMetrics { width, height })
    }

    /// Constructs a font face from the raw data of a TTF font file.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ContextError> {
        let face = OwnedFace::from_vec(data.to_vec(), 0)
            .map_err(|error| ContextError::with_error("Failed to parse font", &error))?;
        let units_per_em = face.as_face_ref().units_per_em();

        Ok(Self {
            inner: std::sync::Arc::new(face),
            units_per_em,
        })
    }

    /// Retrieve the underlying font face as a reference.
    fn face(&self) -> &Face<'_> {
        self.inner.as_face_ref()
    }
}

/// A TrueType font to be embedded into a document, together with the name it is
/// referenced by in the page resources.
#[derive(Debug, Clone)]
pub struct Font {
    /// The byte data the font was loaded from.
    bytes: Vec<u8>,
    /// The actual font face, together with its measure of units per em.
    ttf_face: TtfFontFace,
    /// The identifier of the font face, which is also its resource name on the pages.
    face_identifier: String,
}

impl Font {
    /// Glyph identifiers for the text after NFC normalization. Characters missing from the
    /// font are dropped (and logged) rather than rendered as `.notdef`.
    fn glyph_ids_of(&self, text: &str) -> Vec<u16> {
        let mut glyph_id_list = Vec::new();
        for character in text.nfc() {
            if let Some(glyph_id) = self.ttf_face.glyph_id(character) {
                glyph_id_list.push(glyph_id);
            } else {
                log::warn!(
                    "Unable to find the character {:?} in the font {:?}",
                    character,
                    self.face_identifier
                )
            }
        }
        glyph_id_list
    }

    /// The advance width of the text once drawn at the given size, in points. This is the
    /// same glyph sequence `write_text_to_page` emits, so alignment computed with it is exact.
    pub fn width_of_text_at_size(&self, text: &str, font_size: f32) -> f32 {
        let units: u32 = self
            .glyph_ids_of(text)
            .into_iter()
            .filter_map(|glyph_id| self.ttf_face.glyph_metrics(glyph_id))
            .map(|glyph_metrics| glyph_metrics.width)
            .sum();
        units as f32 * font_size / self.ttf_face.units_per_em as f32
    }

    /// Builds the Type0 font dictionary (with its CID descendant, descriptor, embedded
    /// program and `ToUnicode` map) and inserts the auxiliary objects into the document.
    fn insert_into_document(
        &self,
        inner_document: &mut lopdf::Document,
    ) -> Result<lopdf::Dictionary, ContextError> {
        use lopdf::Object::*;
        let face_metrics = self.ttf_face.font_metrics();

        // `Length1` is the length of the uncompressed font program
        let mut font_stream = lopdf::Stream::new(
            lopdf::Dictionary::from_iter(vec![("Length1", Integer(self.bytes.len() as i64))]),
            self.bytes.clone(),
        );

        let mut font_vector: Vec<(::std::string::String, lopdf::Object)> = vec![
            ("Type".into(), Name("Font".into())),
            ("Subtype".into(), Name("Type0".into())),
            (
                "BaseFont".into(),
                Name(self.face_identifier.clone().into_bytes()),
            ),
            ("Encoding".into(), Name("Identity-H".into())),
        ];

        let mut font_descriptor_vector: Vec<(::std::string::String, lopdf::Object)> = vec![
            ("Type".into(), Name("FontDescriptor".into())),
            (
                "FontName".into(),
                Name(self.face_identifier.clone().into_bytes()),
            ),
            ("Ascent".into(), Integer(i64::from(face_metrics.ascent))),
            ("Descent".into(), Integer(i64::from(face_metrics.descent))),
            (
                "CapHeight".into(),
                Integer(i64::from(face_metrics.cap_height)),
            ),
            ("ItalicAngle".into(), Integer(0)),
            // Nonsymbolic
            ("Flags".into(), Integer(32)),
            ("StemV".into(), Integer(80)),
        ];

        let mut maximum_character_height = 0;
        let mut total_width = 0;

        // Glyph ID -> (codepoint, width, height), ordered by glyph ID
        let mut gid_to_glyph_properties_map = BTreeMap::<u32, (u32, u32, u32)>::new();
        gid_to_glyph_properties_map.insert(0, (0, 1000, 1000));

        for (glyph_id, character) in self.ttf_face.glyph_ids() {
            if let Some(glyph_metrics) = self.ttf_face.glyph_metrics(glyph_id) {
                maximum_character_height = maximum_character_height.max(glyph_metrics.height);
                total_width += glyph_metrics.width;
                gid_to_glyph_properties_map.insert(
                    glyph_id as u32,
                    (character as u32, glyph_metrics.width, glyph_metrics.height),
                );
            }
        }

        // `bfchar` blocks may hold at most 100 entries and every entry of a block must share
        // the high byte of its glyph ID
        let mut current_high_byte: u16 = 0;
        let mut all_gid_to_character_blocks = Vec::new();
        let mut current_gid_to_character_block = Vec::new();
        for (glyph_id, (character, _glyph_width, _glyph_height)) in
            gid_to_glyph_properties_map.iter()
        {
            if (*glyph_id >> 8) as u16 != current_high_byte
                || current_gid_to_character_block.len() >= 100
            {
                all_gid_to_character_blocks.push(mem::take(&mut current_gid_to_character_block));
                current_high_byte = (*glyph_id >> 8) as u16;
            }
            current_gid_to_character_block.push((*glyph_id, *character));
        }
        all_gid_to_character_blocks.push(current_gid_to_character_block);

        let cid_to_unicode_map =
            generate_cid_to_unicode_map(self.face_identifier.clone(), all_gid_to_character_blocks);
        let cid_to_unicode_map_stream = lopdf::Stream::new(
            lopdf::Dictionary::new(),
            cid_to_unicode_map.as_bytes().to_vec(),
        );
        let cid_to_unicode_map_stream_id = inner_document.add_object(cid_to_unicode_map_stream);

        // The `W` array lists runs of consecutive glyph IDs: `first [w0 w1 ...]`, with the
        // widths expressed in thousandths of an em (PDF 1.7 reference, 9.7.4.3)
        let mut width_objects = Vec::<Object>::new();
        let mut current_lesser_glyph_id = 0;
        let mut current_upper_gid = 0;
        let mut current_widths_vector = Vec::<Object>::new();
        let percentage_font_scaling = 1000.0 / (face_metrics.units_per_em as f32);

        for glyph_id in 0..self.ttf_face.glyph_count() {
            let Some(GlyphMetrics { width, .. }) = self.ttf_face.glyph_metrics(glyph_id) else {
                log::warn!(
                    "Glyph ID {} of the font {:?} has no width, leaving it out of the widths array",
                    glyph_id,
                    self.face_identifier
                );
                continue;
            };
            if glyph_id != current_upper_gid && !current_widths_vector.is_empty() {
                width_objects.push(Integer(current_lesser_glyph_id as i64));
                width_objects.push(Array(mem::take(&mut current_widths_vector)));
                current_lesser_glyph_id = glyph_id;
            } else if current_widths_vector.is_empty() {
                current_lesser_glyph_id = glyph_id;
            }
            current_widths_vector.push(Integer((width as f32 * percentage_font_scaling) as i64));
            current_upper_gid = glyph_id + 1;
        }
        if !current_widths_vector.is_empty() {
            width_objects.push(Integer(current_lesser_glyph_id as i64));
            width_objects.push(Array(mem::take(&mut current_widths_vector)));
        }

        let mut font_descriptors = lopdf::Dictionary::from_iter(vec![
            ("Type", Name("Font".into())),
            ("Subtype", Name("CIDFontType2".into())),
            ("BaseFont", Name(self.face_identifier.clone().into())),
            (
                "CIDSystemInfo",
                Dictionary(lopdf::Dictionary::from_iter(vec![
                    ("Registry", String("Adobe".into(), StringFormat::Literal)),
                    ("Ordering", String("Identity".into(), StringFormat::Literal)),
                    ("Supplement", Integer(0)),
                ])),
            ),
            ("W", Array(width_objects)),
            ("DW", Integer(1000)),
        ]);

        let font_bounding_box = vec![
            Integer(0),
            Integer(i64::from(face_metrics.descent)),
            Integer(total_width as i64),
            Integer(maximum_character_height as i64),
        ];
        font_stream.compress().map_err(|error| {
            ContextError::with_error("Failed to compress the font program", &error)
        })?;
        font_descriptor_vector.push((
            "FontFile2".into(),
            Reference(inner_document.add_object(font_stream)),
        ));
        font_descriptor_vector.push(("FontBBox".into(), Array(font_bounding_box)));

        let font_descriptor_vector_id =
            inner_document.add_object(lopdf::Dictionary::from_iter(font_descriptor_vector));
        font_descriptors.set("FontDescriptor", Reference(font_descriptor_vector_id));

        font_vector.push((
            "DescendantFonts".into(),
            Array(vec![Dictionary(font_descriptors)]),
        ));
        font_vector.push(("ToUnicode".into(), Reference(cid_to_unicode_map_stream_id)));

        Ok(lopdf::Dictionary::from_iter(font_vector))
    }
}

/// The low-level image representation for a PDF document: 8-bit RGB samples with an
/// optional 8-bit alpha channel, which becomes a soft mask.
#[derive(Debug, Clone)]
pub struct ImageXObject {
    pub width: u32,
    pub height: u32,
    pub rgb_data: Vec<u8>,
    pub alpha_data: Option<Vec<u8>>,
    /// Should the image be interpolated when scaled?
    pub interpolate: bool,
}

impl ImageXObject {
    /// Splits a decoded image into its color samples and, when any pixel is not fully
    /// opaque, its alpha samples.
    pub fn from_dynamic_image(image: &image::DynamicImage) -> Self {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        let mut rgb_data = Vec::with_capacity((width * height * 3) as usize);
        let mut alpha_data = Vec::with_capacity((width * height) as usize);
        for pixel in rgba.pixels() {
            rgb_data.extend_from_slice(&pixel.0[..3]);
            alpha_data.push(pixel.0[3]);
        }
        let is_opaque = alpha_data.iter().all(|alpha| *alpha == u8::MAX);

        ImageXObject {
            width,
            height,
            rgb_data,
            alpha_data: (!is_opaque).then_some(alpha_data),
            interpolate: true,
        }
    }

    fn insert_into_document(
        &self,
        inner_document: &mut lopdf::Document,
    ) -> Result<lopdf::Stream, ContextError> {
        use lopdf::Object::*;

        let mut dictionary = lopdf::Dictionary::from_iter(vec![
            ("Type", Name("XObject".into())),
            ("Subtype", Name("Image".into())),
            ("Width", Integer(self.width as i64)),
            ("Height", Integer(self.height as i64)),
            ("ColorSpace", Name("DeviceRGB".into())),
            ("BitsPerComponent", Integer(8)),
            ("Interpolate", Boolean(self.interpolate)),
        ]);

        if let Some(alpha_data) = &self.alpha_data {
            let mut soft_mask = lopdf::Stream::new(
                lopdf::Dictionary::from_iter(vec![
                    ("Type", Name("XObject".into())),
                    ("Subtype", Name("Image".into())),
                    ("Width", Integer(self.width as i64)),
                    ("Height", Integer(self.height as i64)),
                    ("ColorSpace", Name("DeviceGray".into())),
                    ("BitsPerComponent", Integer(8)),
                ]),
                alpha_data.clone(),
            );
            soft_mask.compress().map_err(|error| {
                ContextError::with_error("Failed to compress the image soft mask", &error)
            })?;
            dictionary.set("SMask", Reference(inner_document.add_object(soft_mask)));
        }

        let mut image_stream = lopdf::Stream::new(dictionary, self.rgb_data.clone());
        image_stream.compress().map_err(|error| {
            ContextError::with_error("Failed to compress the image samples", &error)
        })?;

        Ok(image_stream)
    }
}

/// Optional word wrapping of a text run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextWrap {
    /// Lines never grow wider than this, unless a single word already is.
    pub max_width: f32,
    /// Distance between two consecutive baselines.
    pub line_height: f32,
}

/// A PDF template opened for drawing. Fonts and images are registered first, then text and
/// images are queued per page, and finally `write_all` splices everything into the template:
/// the fonts and images are inserted once and referenced from the resources of every page
/// drawn on, while the queued operations are appended as an isolated content stream.
pub struct PdfDocument {
    /// The association between the font resource names, their reserved object and face data.
    fonts: BTreeMap<String, (ObjectId, Font)>,
    /// The association between the image resource names, their reserved object and samples.
    images: BTreeMap<String, (ObjectId, ImageXObject)>,
    /// The underlying PDF document, exposed for the rare cases where the template needs
    /// to be inspected directly.
    pub inner_document: lopdf::Document,
    /// The page objects of the template, in reading order.
    page_ids: Vec<ObjectId>,
    /// The operations queued for each page index.
    pending_operations: BTreeMap<usize, Vec<Operation>>,
    written: bool,
}

impl PdfDocument {
    /// Parses the bytes of a PDF template. Templates without pages are rejected.
    pub fn load_template(template_bytes: &[u8]) -> Result<Self, ContextError> {
        let inner_document = lopdf::Document::load_mem(template_bytes).map_err(|error| {
            ContextError::with_error("Failed to parse the PDF template", &error)
        })?;
        let page_ids: Vec<ObjectId> = inner_document.get_pages().into_values().collect();
        if page_ids.is_empty() {
            return Err(ContextError::with_context(
                "The PDF template does not contain any page",
            ));
        }

        Ok(PdfDocument {
            fonts: BTreeMap::default(),
            images: BTreeMap::default(),
            inner_document,
            page_ids,
            pending_operations: BTreeMap::default(),
            written: false,
        })
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// The width and height in points of the given page, read from its (possibly
    /// inherited) `MediaBox`.
    pub fn page_size(&self, page_index: usize) -> Result<(f32, f32), ContextError> {
        let page_id = self.get_page_id(page_index)?;
        let media_box = self
            .inherited_page_attribute(page_id, b"MediaBox")
            .ok_or(ContextError::with_context(format!(
                "The page with index {} has no media box",
                page_index
            )))?;
        let coordinates = media_box
            .as_array()
            .map_err(|error| ContextError::with_error("The media box is not an array", &error))?
            .iter()
            .map(|coordinate| {
                self.inner_document
                    .dereference(coordinate)
                    .and_then(|(_, coordinate)| coordinate.as_float())
            })
            .collect::<Result<Vec<f32>, _>>()
            .map_err(|error| {
                ContextError::with_error("The media box contains an invalid coordinate", &error)
            })?;

        match coordinates[..] {
            [left, bottom, right, top] => Ok(((right - left).abs(), (top - bottom).abs())),
            _ => Err(ContextError::with_context(format!(
                "Invalid media box {:?}",
                coordinates
            ))),
        }
    }

    /// Registers a TTF (or TTF-flavoured OTF) font from its bytes and returns the index to
    /// draw text with. Nothing is written into the document until `write_all`.
    pub fn add_font(&mut self, font_bytes: Vec<u8>) -> Result<usize, ContextError> {
        let ttf_font_face = TtfFontFace::from_bytes(&font_bytes)?;
        let font = Font {
            bytes: font_bytes,
            ttf_face: ttf_font_face,
            face_identifier: font_resource_name(self.fonts.len()),
        };
        let font_object_id = self.inner_document.new_object_id();
        self.fonts
            .insert(font.face_identifier.clone(), (font_object_id, font));

        Ok(self.fonts.len() - 1)
    }

    /// Registers an image and returns the index to draw it with.
    pub fn add_image(&mut self, image: &image::DynamicImage) -> usize {
        let image_index = self.images.len();
        let image_object_id = self.inner_document.new_object_id();
        self.images.insert(
            image_resource_name(image_index),
            (image_object_id, ImageXObject::from_dynamic_image(image)),
        );
        image_index
    }

    /// Measures text with the metrics of an embedded font.
    pub fn width_of_text_at_size(
        &self,
        font_index: usize,
        text: &str,
        font_size: f32,
    ) -> Result<f32, ContextError> {
        Ok(self.get_font(font_index)?.1.width_of_text_at_size(text, font_size))
    }

    /// Queues the text on the given page with its baseline starting at `caret_position`
    /// (in points, origin at the bottom-left corner of the page). With a `wrap`, the text
    /// is broken on whitespace into lines no wider than `max_width`, each placed
    /// `line_height` below the previous one.
    #[allow(clippy::too_many_arguments)]
    pub fn write_text_to_page(
        &mut self,
        page_index: usize,
        color: [f32; 3],
        text: &str,
        font_index: usize,
        font_size: f32,
        caret_position: [f32; 2],
        wrap: Option<TextWrap>,
    ) -> Result<(), ContextError> {
        self.get_page_id(page_index)?;
        let font = &self.get_font(font_index)?.1;

        let lines = match wrap {
            Some(wrap) => wrap_text(font, text, font_size, wrap.max_width),
            None => vec![text.to_string()],
        };
        let line_height = wrap.map(|wrap| wrap.line_height).unwrap_or(font_size);

        let mut operations = Vec::new();
        for (line_index, line) in lines.iter().enumerate() {
            let [x, y] = caret_position;
            let baseline = y - line_index as f32 * line_height;

            // Glyph IDs are written as big-endian pairs of bytes, as `Identity-H` expects
            let glyph_id_bytes = font
                .glyph_ids_of(line)
                .iter()
                .flat_map(|glyph_id| glyph_id.to_be_bytes())
                .collect::<Vec<u8>>();

            operations.extend([
                Operation::new("BT", vec![]),
                Operation::new(
                    "Tf",
                    vec![
                        Object::Name(font.face_identifier.clone().into_bytes()),
                        font_size.into(),
                    ],
                ),
                Operation::new("Td", vec![x.into(), baseline.into()]),
                Operation::new(
                    "rg",
                    color.into_iter().map(lopdf::Object::Real).collect(),
                ),
                Operation::new(
                    "Tj",
                    vec![Object::String(glyph_id_bytes, StringFormat::Hexadecimal)],
                ),
                Operation::new("ET", vec![]),
            ]);
        }

        self.add_operations_to_page(page_index, operations);
        Ok(())
    }

    /// Queues a registered image on the given page, stretched over the rectangle
    /// `[x, y, width, height]` (in points, origin at the bottom-left corner of the page).
    pub fn draw_image_to_page(
        &mut self,
        page_index: usize,
        image_index: usize,
        rectangle: [f32; 4],
    ) -> Result<(), ContextError> {
        self.get_page_id(page_index)?;
        let image_name = image_resource_name(image_index);
        if !self.images.contains_key(&image_name) {
            return Err(ContextError::with_context(format!(
                "Failed to find image {} into the images map",
                image_index
            )));
        }

        let [x, y, width, height] = rectangle;
        self.add_operations_to_page(
            page_index,
            vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        width.into(),
                        0.into(),
                        0.into(),
                        height.into(),
                        x.into(),
                        y.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(image_name.into_bytes())]),
                Operation::new("Q", vec![]),
            ],
        );
        Ok(())
    }

    /// Inserts the fonts and images into the document, references them from every page that
    /// was drawn on and appends the queued operations to those pages. Can only run once.
    pub fn write_all(&mut self) -> Result<(), ContextError> {
        if self.written {
            return Err(ContextError::with_context(
                "The document has already been written",
            ));
        }
        self.written = true;

        let font_resources = self.insert_fonts_into_document()?;
        let image_resources = self.insert_images_into_document()?;

        for (page_index, operations) in mem::take(&mut self.pending_operations) {
            let page_id = self.get_page_id(page_index)?;
            self.merge_page_resources(page_id, b"Font", &font_resources)?;
            self.merge_page_resources(page_id, b"XObject", &image_resources)?;
            self.append_isolated_contents(page_id, operations)?;
        }

        Ok(())
    }

    /// Optimize the PDF document (only superficially).
    pub fn optimize(&mut self) {
        self.inner_document.prune_objects();
        self.inner_document.delete_zero_length_streams();
        self.inner_document.renumber_objects();
        self.inner_document.compress();
    }

    /// Save the `PdfDocument` to bytes in order for it to be written or further processed.
    pub fn save_to_bytes(&mut self) -> Result<Vec<u8>, ContextError> {
        let mut pdf_document_bytes = Vec::new();
        let mut writer = BufWriter::new(&mut pdf_document_bytes);
        self.inner_document.save_to(&mut writer).map_err(|error| {
            ContextError::with_error("Error while saving the PDF document to bytes", &error)
        })?;
        mem::drop(writer);

        Ok(pdf_document_bytes)
    }

    fn insert_fonts_into_document(&mut self) -> Result<Vec<(String, ObjectId)>, ContextError> {
        let mut font_resources = Vec::new();
        for (font_name, (font_object_id, font)) in self.fonts.iter() {
            let font_dictionary = font.insert_into_document(&mut self.inner_document)?;
            self.inner_document
                .objects
                .insert(*font_object_id, lopdf::Object::Dictionary(font_dictionary));
            font_resources.push((font_name.clone(), *font_object_id));
        }
        Ok(font_resources)
    }

    fn insert_images_into_document(&mut self) -> Result<Vec<(String, ObjectId)>, ContextError> {
        let mut image_resources = Vec::new();
        for (image_name, (image_object_id, image)) in self.images.iter() {
            let image_stream = image.insert_into_document(&mut self.inner_document)?;
            self.inner_document
                .objects
                .insert(*image_object_id, lopdf::Object::Stream(image_stream));
            image_resources.push((image_name.clone(), *image_object_id));
        }
        Ok(image_resources)
    }

    /// Adds the given named references to the `category` sub-dictionary (`Font`, `XObject`)
    /// of the page resources. Resources shared through a reference are edited in place,
    /// inherited ones are copied onto the page first so that sibling pages are unaffected.
    fn merge_page_resources(
        &mut self,
        page_id: ObjectId,
        category: &[u8],
        entries: &[(String, ObjectId)],
    ) -> Result<(), ContextError> {
        if entries.is_empty() {
            return Ok(());
        }

        let page_resources = self
            .inner_document
            .get_dictionary(page_id)
            .map_err(|error| ContextError::with_error("The page is not a dictionary", &error))?
            .get(b"Resources")
            .ok()
            .cloned();
        let (resources_id, mut resources) = match page_resources {
            Some(Object::Reference(resources_id)) => {
                let resources = self
                    .inner_document
                    .get_dictionary(resources_id)
                    .map_err(|error| {
                        ContextError::with_error("The page resources are not a dictionary", &error)
                    })?
                    .clone();
                (Some(resources_id), resources)
            }
            Some(Object::Dictionary(resources)) => (None, resources),
            _ => {
                let inherited = self
                    .inherited_page_attribute(page_id, b"Resources")
                    .and_then(|resources| resources.as_dict().ok().cloned())
                    .unwrap_or_default();
                (None, inherited)
            }
        };

        let category_object = resources.get(category).ok().cloned();
        match category_object {
            Some(Object::Reference(category_id)) => {
                let category_dictionary = self
                    .inner_document
                    .get_dictionary_mut(category_id)
                    .map_err(|error| {
                        ContextError::with_error(
                            "The resource category is not a dictionary",
                            &error,
                        )
                    })?;
                for (name, object_id) in entries {
                    category_dictionary.set(name.clone(), Object::Reference(*object_id));
                }
            }
            Some(Object::Dictionary(mut category_dictionary)) => {
                for (name, object_id) in entries {
                    category_dictionary.set(name.clone(), Object::Reference(*object_id));
                }
                resources.set(category.to_vec(), Object::Dictionary(category_dictionary));
            }
            _ => {
                let category_dictionary = entries
                    .iter()
                    .map(|(name, object_id)| (name.clone(), Object::Reference(*object_id)))
                    .collect::<lopdf::Dictionary>();
                resources.set(category.to_vec(), Object::Dictionary(category_dictionary));
            }
        }

        match resources_id {
            Some(resources_id) => {
                self.inner_document
                    .objects
                    .insert(resources_id, Object::Dictionary(resources));
            }
            None => {
                self.inner_document
                    .get_dictionary_mut(page_id)
                    .map_err(|error| {
                        ContextError::with_error("The page is not a dictionary", &error)
                    })?
                    .set("Resources", Object::Dictionary(resources));
            }
        }

        Ok(())
    }

    /// Appends the operations after the existing page content. The template content is
    /// wrapped in `q`/`Q` so that whatever graphics state it leaves behind doesn't leak.
    fn append_isolated_contents(
        &mut self,
        page_id: ObjectId,
        operations: Vec<Operation>,
    ) -> Result<(), ContextError> {
        let existing_contents = self.inner_document.get_page_contents(page_id);

        let content = lopdf::content::Content { operations }
            .encode()
            .map_err(|error| {
                ContextError::with_error("Failed to encode the page content", &error)
            })?;
        // Each stream starts and ends on a line break so that concatenating them keeps
        // the operators apart
        let mut appended = b"\nQ\nq\n".to_vec();
        appended.extend(content);
        appended.extend_from_slice(b"\nQ\n");

        let save_state_id = self
            .inner_document
            .add_object(lopdf::Stream::new(lopdf::Dictionary::new(), b"q\n".to_vec()));
        let appended_id = self
            .inner_document
            .add_object(lopdf::Stream::new(lopdf::Dictionary::new(), appended));

        let mut contents = vec![Object::Reference(save_state_id)];
        contents.extend(existing_contents.into_iter().map(Object::Reference));
        contents.push(Object::Reference(appended_id));

        self.inner_document
            .get_dictionary_mut(page_id)
            .map_err(|error| ContextError::with_error("The page is not a dictionary", &error))?
            .set("Contents", Object::Array(contents));

        Ok(())
    }

    /// Looks the attribute up on the page, then on its ancestors in the page tree.
    fn inherited_page_attribute(&self, page_id: ObjectId, key: &[u8]) -> Option<Object> {
        let mut node_id = page_id;
        // The depth bound protects against cyclic page trees
        for _ in 0..32 {
            let node = self.inner_document.get_dictionary(node_id).ok()?;
            if let Ok(value) = node.get(key) {
                return self
                    .inner_document
                    .dereference(value)
                    .ok()
                    .map(|(_, value)| value.clone());
            }
            node_id = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        }
        None
    }

    fn add_operations_to_page(&mut self, page_index: usize, operations: Vec<Operation>) {
        self.pending_operations
            .entry(page_index)
            .or_default()
            .extend(operations);
    }

    fn get_font(&self, font_index: usize) -> Result<&(ObjectId, Font), ContextError> {
        self.fonts
            .get(&font_resource_name(font_index))
            .ok_or(ContextError::with_context(format!(
                "Failed to find font {} into the fonts map",
                font_index
            )))
    }

    fn get_page_id(&self, page_index: usize) -> Result<ObjectId, ContextError> {
        self.page_ids
            .get(page_index)
            .copied()
            .ok_or(ContextError::with_context(format!(
                "Failed to find the page with index {}, the template has {} pages",
                page_index,
                self.page_count()
            )))
    }
}

/// Resource names are prefixed so they cannot shadow the fonts and images of the template.
fn font_resource_name(font_index: usize) -> String {
    format!("DocstampF{font_index}")
}

fn image_resource_name(image_index: usize) -> String {
    format!("DocstampIm{image_index}")
}

/// Greedy word wrapping: words are appended to the current line while it stays within
/// `max_width`. Explicit line breaks in the text are kept.
fn wrap_text(font: &Font, text: &str, font_size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current_line = String::new();
        for word in paragraph.split_whitespace() {
            if current_line.is_empty() {
                current_line.push_str(word);
                continue;
            }
            let candidate = format!("{current_line} {word}");
            if font.width_of_text_at_size(&candidate, font_size) <= max_width {
                current_line = candidate;
            } else {
                lines.push(mem::replace(&mut current_line, word.to_string()));
            }
        }
        lines.push(current_line);
    }
    lines
}

type GlyphId = u32;
type UnicodeCodePoint = u32;
type CmapBlock = Vec<(GlyphId, UnicodeCodePoint)>;

/// Generates the `ToUnicode` CMap from the glyph blocks, between the fixed prologue and
/// epilogue of the CMap resource.
fn generate_cid_to_unicode_map(face_name: String, all_cmap_blocks: Vec<CmapBlock>) -> String {
    let mut cid_to_unicode_map =
        format!(include_str!("../assets/gid_to_unicode_beg.txt"), face_name);

    for cmap_block in all_cmap_blocks
        .into_iter()
        .filter(|block| !block.is_empty())
    {
        cid_to_unicode_map.push_str(format!("{} beginbfchar\r\n", cmap_block.len()).as_str());
        for (glyph_id, unicode) in cmap_block {
            cid_to_unicode_map.push_str(format!("<{glyph_id:04x}> <{unicode:04x}>\n").as_str());
        }
        cid_to_unicode_map.push_str("endbfchar\r\n");
    }

    cid_to_unicode_map.push_str(include_str!("../assets/gid_to_unicode_end.txt"));

    cid_to_unicode_map
}

#[cfg(test)]
mod tests {
    use super::*;

    const FONT_BYTES: &[u8] = include_bytes!("../tests/fixtures/fonts/DejaVuSansMono.ttf");

    fn font() -> Font {
        Font {
            bytes: FONT_BYTES.to_vec(),
            ttf_face: TtfFontFace::from_bytes(FONT_BYTES).unwrap(),
            face_identifier: font_resource_name(0),
        }
    }

    #[test]
    fn monospaced_width_grows_linearly() {
        let font = font();
        let one = font.width_of_text_at_size("a", 12.0);
        let ten = font.width_of_text_at_size("aaaaaaaaaa", 12.0);
        assert!(one > 0.0);
        assert!((ten - one * 10.0).abs() < 1e-3);
        assert!((font.width_of_text_at_size("a", 24.0) - one * 2.0).abs() < 1e-3);
    }

    #[test]
    fn wrapping_respects_the_maximum_width() {
        let font = font();
        let character_width = font.width_of_text_at_size("x", 10.0);
        let lines = wrap_text(
            &font,
            "alpha beta gamma delta",
            10.0,
            character_width * 11.5,
        );
        assert_eq!(lines, vec!["alpha beta", "gamma delta"]);
    }

    #[test]
    fn cmap_blocks_are_framed() {
        let cmap = generate_cid_to_unicode_map(
            "DocstampF0".into(),
            vec![vec![(3, 0x41), (4, 0x42)], vec![]],
        );
        assert!(cmap.contains("/CMapName /DocstampF0-UTF16 def"));
        assert!(cmap.contains("2 beginbfchar\r\n<0003> <0041>\n<0004> <0042>\nendbfchar"));
        assert_eq!(cmap.matches("beginbfchar").count(), 1);
    }
}
