mod common;

use docstamp::{
    assets::{AssetConfiguration, InMemoryAssets},
    document::{
        derive_filename, generate_batch, generate_document, save_batch, CertificateRecord,
        CertificateVariant, DocumentRequest, GeneratedDocument, ImageCardData, VisitingCardTheme,
    },
    error::GenerationError,
    pdf::PdfDocument,
    templates::{DARK_THEME_Y_SHIFT_PT, TRAINING_PROGRAM_PARAGRAPH},
};

fn certificate_request(name: &str, variant: CertificateVariant) -> DocumentRequest {
    DocumentRequest::Certificate {
        record: CertificateRecord {
            certificate_no: "SSI-1001".into(),
            name: name.into(),
            hospital: "city general hospital".into(),
            doi: "01-07-2024".into(),
        },
        variant,
    }
}

fn generate(request: &DocumentRequest) -> Result<GeneratedDocument, GenerationError> {
    generate_document(request, &common::assets(), &AssetConfiguration::default())
}

#[test]
fn second_certificate_carries_the_training_paragraph() {
    let document =
        generate(&certificate_request("John Doe", CertificateVariant::Certificate2)).unwrap();
    let texts = common::page_texts(&document.bytes, 0);

    for expected in ["John Doe", "City General Hospital", "01/07/2024", "SSI-1001"] {
        assert!(
            texts.iter().any(|text| text == expected),
            "{:?} missing from {:?}",
            expected,
            texts
        );
    }
    // The paragraph is wrapped over several lines
    let generated_text = texts.join(" ");
    assert!(generated_text.contains(TRAINING_PROGRAM_PARAGRAPH));
    let paragraph_lines = texts
        .iter()
        .filter(|text| TRAINING_PROGRAM_PARAGRAPH.contains(text.as_str()))
        .count();
    assert!(paragraph_lines > 1);
    // The artwork of the template is still there
    assert!(texts.iter().any(|text| text == "Template"));

    let document =
        generate(&certificate_request("John Doe", CertificateVariant::Certificate1)).unwrap();
    let generated_text = common::page_texts(&document.bytes, 0).join(" ");
    assert!(generated_text.contains("John Doe"));
    assert!(!generated_text.contains("training program"));
}

#[test]
fn names_are_drawn_exactly_as_given() {
    let document = generate(&certificate_request(
        "Dr. H.S Nagpal",
        CertificateVariant::Certificate3,
    ))
    .unwrap();
    let texts = common::page_texts(&document.bytes, 0);
    assert!(texts.iter().any(|text| text == "Dr. H.S Nagpal"), "{:?}", texts);
    assert!(!texts.iter().any(|text| text == "Dr. H.s Nagpal"));
    assert_eq!(document.filename, "Dr. H.S Nagpal - SSI-1001.pdf");
}

#[test]
fn detail_fields_are_anchored_to_the_right_margin() {
    // The fixture font is monospaced, so the width of a run only depends on its length
    let document =
        generate(&certificate_request("John Doe", CertificateVariant::Certificate1)).unwrap();
    let runs = common::page_text_runs(&document.bytes, 0);
    let certificate_number = runs.iter().find(|run| run.text == "SSI-1001").unwrap();
    let doi = runs.iter().find(|run| run.text == "01/07/2024").unwrap();

    // "SSI-1001" is two characters shorter than "01/07/2024" at the same size
    assert!(certificate_number.position[0] > doi.position[0]);
    assert_eq!(certificate_number.font_name, doi.font_name);
}

#[test]
fn fonts_are_embedded_once_per_key() {
    let document =
        generate(&certificate_request("John Doe", CertificateVariant::Certificate2)).unwrap();
    let pdf_document = lopdf::Document::load_mem(&document.bytes).unwrap();
    let embedded_programs = pdf_document
        .objects
        .values()
        .filter_map(|object| object.as_dict().ok())
        .filter(|dictionary| dictionary.get(b"FontFile2").is_ok())
        .count();
    assert_eq!(embedded_programs, 3);
}

#[test]
fn dark_visiting_card_is_drawn_on_the_second_page() {
    let card = ImageCardData {
        full_name: "Asha Rao".into(),
        designation: "Staff Nurse".into(),
        ..ImageCardData::default()
    };
    let dark = generate(&DocumentRequest::VisitingCard {
        card: card.clone(),
        theme: VisitingCardTheme::Dark,
    })
    .unwrap();
    let light = generate(&DocumentRequest::VisitingCard {
        card,
        theme: VisitingCardTheme::Light,
    })
    .unwrap();

    let dark_document = PdfDocument::load_template(&dark.bytes).unwrap();
    assert_eq!(dark_document.page_count(), 2);
    assert_eq!(common::page_texts(&dark.bytes, 0), vec!["Template"]);
    let dark_runs = common::page_text_runs(&dark.bytes, 1);
    let light_runs = common::page_text_runs(&light.bytes, 0);
    let dark_name = dark_runs.iter().find(|run| run.text == "Asha Rao").unwrap();
    let light_name = light_runs.iter().find(|run| run.text == "Asha Rao").unwrap();
    let shift = dark_name.position[1] - light_name.position[1];
    assert!((shift - DARK_THEME_Y_SHIFT_PT).abs() < 1e-3);
}

#[test]
fn id_card_embeds_the_photo() {
    let mut png_bytes = Vec::new();
    let red_square = image::RgbImage::from_pixel(30, 40, image::Rgb([200, 30, 30]));
    image::DynamicImage::ImageRgb8(red_square)
        .write_to(
            &mut std::io::Cursor::new(&mut png_bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
    let photo = format!(
        "data:image/png;base64,{}",
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &png_bytes)
    );

    let with_photo = generate(&DocumentRequest::IdCard {
        card: ImageCardData {
            full_name: "Asha Rao".into(),
            id_card_no: "EMP-77".into(),
            user_image_data_uri: photo,
            image_x_offset_px: 40.0,
            ..ImageCardData::default()
        },
    })
    .unwrap();
    let texts = common::page_texts(&with_photo.bytes, 0);
    assert!(texts.iter().any(|text| text == "ID No: EMP-77"));

    let pdf_document = lopdf::Document::load_mem(&with_photo.bytes).unwrap();
    let images = pdf_document
        .objects
        .values()
        .filter_map(|object| object.as_stream().ok())
        .filter(|stream| {
            stream.dict.get(b"Subtype").and_then(lopdf::Object::as_name).ok()
                == Some(b"Image".as_slice())
        })
        .count();
    assert_eq!(images, 1);

    // An unreadable photo doesn't prevent the card from being generated
    let without_photo = generate(&DocumentRequest::IdCard {
        card: ImageCardData {
            full_name: "Asha Rao".into(),
            user_image_data_uri: "data:image/png;base64,AAAA".into(),
            ..ImageCardData::default()
        },
    });
    assert!(without_photo.is_ok());
}

#[test]
fn failures_name_the_template_and_the_asset() {
    let assets = InMemoryAssets::new().with_asset(
        "certificates/certificate1.pdf",
        common::template(&[common::CERTIFICATE_PAGE]),
    );
    let error = generate_document(
        &certificate_request("John Doe", CertificateVariant::Certificate1),
        &assets,
        &AssetConfiguration::default(),
    )
    .unwrap_err();
    match &error {
        GenerationError::AssetFetch { template, asset, .. } => {
            assert_eq!(template, "certificate1");
            assert_eq!(asset, "fonts/Sora-SemiBold.ttf");
        }
        other => panic!("unexpected error {:?}", other),
    }

    let assets =
        common::assets().with_asset("certificates/certificate2.pdf", b"not a pdf".to_vec());
    let error = generate_document(
        &certificate_request("John Doe", CertificateVariant::Certificate2),
        &assets,
        &AssetConfiguration::default(),
    )
    .unwrap_err();
    assert_eq!(error.kind(), "template-parse");
    assert!(std::error::Error::source(&error).is_some());

    let assets = common::assets().with_asset("fonts/Poppins-Medium.ttf", vec![0; 64]);
    let error = generate_document(
        &certificate_request("John Doe", CertificateVariant::Certificate2),
        &assets,
        &AssetConfiguration::default(),
    )
    .unwrap_err();
    assert!(matches!(error, GenerationError::FontEmbed { ref font, .. } if font == "medium"));
}

#[test]
fn batches_isolate_failures() {
    let requests: Vec<DocumentRequest> = (1..=5)
        .map(|index| {
            let name = if index == 3 {
                String::new()
            } else {
                format!("Recipient {index}")
            };
            certificate_request(&name, CertificateVariant::Certificate1)
        })
        .collect();

    let batch_report =
        generate_batch(&requests, &common::assets(), &AssetConfiguration::default());
    assert_eq!(batch_report.success_count(), 4);
    assert_eq!(batch_report.failure_count(), 1);
    let (failed_index, error) = &batch_report.failures[0];
    assert_eq!(*failed_index, 2);
    assert!(matches!(error, GenerationError::Validation { field, .. } if field == "name"));

    let output_directory =
        std::env::temp_dir().join(format!("docstamp-batch-{}", std::process::id()));
    let saved_paths = save_batch(
        &batch_report.documents,
        &output_directory,
        std::time::Duration::ZERO,
    )
    .unwrap();
    assert_eq!(saved_paths.len(), 4);
    for saved_path in &saved_paths {
        let bytes = std::fs::read(saved_path).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
    }
    std::fs::remove_dir_all(&output_directory).unwrap();
}

#[test]
fn filenames_never_contain_reserved_characters() {
    for title in ["A/B:C*D", "what?", "\"quoted\" <name>", "   ", "back\\slash|pipe"] {
        let filename = derive_filename(title);
        assert!(
            !filename.contains(['\\', '/', ':', '*', '?', '"', '<', '>', '|']),
            "{}",
            filename
        );
        assert!(filename.len() > ".pdf".len());
        assert!(filename.ends_with(".pdf"));
    }
}
