#![allow(dead_code)]

use std::collections::HashMap;

use docstamp::assets::InMemoryAssets;
use lopdf::{content::Content, dictionary, Document, Object, Stream};

pub const FONT_BYTES: &[u8] = include_bytes!("../fixtures/fonts/DejaVuSansMono.ttf");

pub const CERTIFICATE_PAGE: (i64, i64) = (842, 595);
pub const ID_CARD_PAGE: (i64, i64) = (153, 243);
pub const VISITING_CARD_PAGE: (i64, i64) = (252, 144);

/// A template with the given page sizes. Every page already shows the word "Template" in a
/// font named `F1`, declared in resources inherited from the page tree, like the artwork
/// of a real template would.
pub fn template(page_sizes: &[(i64, i64)]) -> Vec<u8> {
    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let font_id = document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for (width, height) in page_sizes {
        let content = Stream::new(
            dictionary! {},
            b"BT /F1 12 Tf 20 20 Td (Template) Tj ET".to_vec(),
        );
        let content_id = document.add_object(content);
        let page_id = document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), (*width).into(), (*height).into()],
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let pages = dictionary! {
        "Type" => "Pages",
        "Count" => kids.len() as i64,
        "Kids" => kids,
        "Resources" => dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        },
    };
    document.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    let mut template_bytes = Vec::new();
    document.save_to(&mut template_bytes).unwrap();
    template_bytes
}

/// Every template and font at its conventional path, the fonts all being the fixture font.
pub fn assets() -> InMemoryAssets {
    let mut assets = InMemoryAssets::new();
    for certificate_path in [
        "certificates/certificate1.pdf",
        "certificates/certificate2.pdf",
        "certificates/certificate3.pdf",
    ] {
        assets.insert(certificate_path, template(&[CERTIFICATE_PAGE]));
    }
    assets.insert("idcard/idcard.pdf", template(&[ID_CARD_PAGE]));
    assets.insert("visitingcard/light.pdf", template(&[VISITING_CARD_PAGE]));
    assets.insert(
        "visitingcard/dark.pdf",
        template(&[VISITING_CARD_PAGE, VISITING_CARD_PAGE]),
    );
    for font_path in [
        "fonts/Sora-Regular.ttf",
        "fonts/Sora-SemiBold.ttf",
        "fonts/Poppins-Medium.ttf",
    ] {
        assets.insert(font_path, FONT_BYTES.to_vec());
    }
    assets
}

/// A text run found in a page, with the font resource it was drawn with and its position.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub font_name: String,
    pub text: String,
    pub position: [f32; 2],
}

/// Decodes the text runs of a page. Runs drawn with a font that has a `ToUnicode` map are
/// decoded through it, the others are read as Latin-1.
pub fn page_text_runs(pdf_bytes: &[u8], page_index: usize) -> Vec<TextRun> {
    let document = Document::load_mem(pdf_bytes).unwrap();
    let page_id = *document
        .get_pages()
        .values()
        .nth(page_index)
        .expect("the page exists");

    let mut unicode_maps = HashMap::new();
    for (font_name, font) in document.get_page_fonts(page_id) {
        if let Ok(to_unicode) = font.get(b"ToUnicode").and_then(Object::as_reference) {
            let stream = document
                .get_object(to_unicode)
                .and_then(Object::as_stream)
                .unwrap();
            let cmap = stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone());
            unicode_maps.insert(font_name, parse_bfchar(&String::from_utf8_lossy(&cmap)));
        }
    }

    let content = Content::decode(&document.get_page_content(page_id).unwrap()).unwrap();
    let mut text_runs = Vec::new();
    let mut font_name = Vec::new();
    let mut position = [0.0, 0.0];
    for operation in content.operations {
        match operation.operator.as_str() {
            "Tf" => font_name = operation.operands[0].as_name().unwrap().to_vec(),
            "Td" => {
                position = [
                    operation.operands[0].as_float().unwrap(),
                    operation.operands[1].as_float().unwrap(),
                ]
            }
            "Tj" => {
                let Object::String(bytes, _) = &operation.operands[0] else {
                    continue;
                };
                let text = match unicode_maps.get(&font_name) {
                    Some(unicode_map) => bytes
                        .chunks(2)
                        .map(|pair| {
                            let glyph_id = u16::from_be_bytes([pair[0], pair[1]]);
                            unicode_map.get(&glyph_id).copied().unwrap_or('\u{fffd}')
                        })
                        .collect(),
                    None => bytes.iter().map(|&byte| byte as char).collect(),
                };
                text_runs.push(TextRun {
                    font_name: String::from_utf8_lossy(&font_name).to_string(),
                    text,
                    position,
                });
            }
            _ => {}
        }
    }
    text_runs
}

pub fn page_texts(pdf_bytes: &[u8], page_index: usize) -> Vec<String> {
    page_text_runs(pdf_bytes, page_index)
        .into_iter()
        .map(|text_run| text_run.text)
        .collect()
}

fn parse_bfchar(cmap: &str) -> HashMap<u16, char> {
    cmap.lines()
        .filter_map(|line| {
            let (glyph_id, unicode) = line.trim().split_once(' ')?;
            let glyph_id = glyph_id.strip_prefix('<')?.strip_suffix('>')?;
            let unicode = unicode.strip_prefix('<')?.strip_suffix('>')?;
            Some((
                u16::from_str_radix(glyph_id, 16).ok()?,
                char::from_u32(u32::from_str_radix(unicode, 16).ok()?)?,
            ))
        })
        .collect()
}
