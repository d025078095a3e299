//! Docstamp lays structured field data onto binary templates and produces print-ready
//! artifacts: certificates, ID cards and visiting cards as PDF documents, posters as PNG or
//! JPEG images carrying their print resolution.
//!
//! Documents are produced by `document::generate_document`, which takes a `DocumentRequest`
//! and an `AssetSource` providing the PDF templates and the TrueType fonts. Posters are
//! produced by the `compositor` module, which draws overlay layers over a base image with a
//! software rasterizer, so that a composition renders headlessly and identically every time.

/// Where templates and fonts come from.
///
/// The `AssetSource` trait abstracts over the storage of the binary assets: `FileSystemAssets`
/// reads them from a directory and `InMemoryAssets` serves bytes the caller already holds.
/// `AssetConfiguration` maps every template and font to its path, following the layout
/// `certificates/`, `idcard/`, `visitingcard/` and `fonts/` unless overridden.
pub mod assets;

/// Compositing of overlay layers over a base image.
///
/// # Introduction
///
/// A composition is a base image, scaled to cover the whole surface, and an ordered list of
/// `OverlayLayer`s. Layers are laid out inside a `PlacementContainer`, a band of the surface
/// expressed in percentages, and moved by percentage offsets of that band, so a composition
/// designed on a preview renders the same way on a 4K export.
///
/// `render_composite` draws onto a caller provided `tiny_skia::Pixmap`, while
/// `export_composite` renders, encodes and records the DPI in the encoded bytes.
/// `CompositeSession` holds the state of an interactive editor with at most one selected layer.
pub mod compositor;

/// The entry point for generating PDF documents.
///
/// # Introduction
///
/// A `DocumentRequest` is one of the known document kinds with its record. Calling
/// `generate_document` fetches the template and the fonts it needs, derives the fields of the
/// template variant, draws them and returns the PDF bytes together with a sanitized file name.
/// Every failure is reported as a `GenerationError` naming the template.
///
/// Batches are generated with `generate_batch`, which isolates the failures of single
/// requests, and saved with `save_batch`.
pub mod document;

/// This module contains the `ContextError` type, the low-level error used throughout this
/// library, and `GenerationError`, which classifies the failures of a document generation.
///
/// `ContextError` describes what was being done when an error happened and, if the error was
/// propagated from another library, its message. Both types implement `std::fmt::Display`
/// and `std::error::Error`.
pub mod error;

/// Pure geometry helpers shared by the compositor and the templates.
pub mod geometry;

/// Print resolution patches for encoded PNG and JPEG images, performed without re-encoding
/// the pixels.
///
/// PNG streams receive a `pHYs` chunk right after their header, JPEG streams have the density
/// of their JFIF header overwritten. Input that doesn't match the declared format is returned
/// unchanged, never rejected.
pub mod metadata;

/// The module where the `PdfDocument` interface for working with PDF templates is presented.
///
/// # Introduction
///
/// A `PdfDocument` wraps a template loaded with `lopdf`. TrueType fonts are registered with
/// `add_font` and embedded as Type0 fonts with `Identity-H` encoding, so that any character
/// present in the font can be drawn, along with a `ToUnicode` map that keeps the text
/// extractable. Text and images are queued with `write_text_to_page` and `draw_image_to_page`,
/// then `write_all` writes the fonts and images once and appends the drawing operations to
/// the pages of the template without touching their original content.
pub mod pdf;

/// The layouts of the template variants.
pub mod templates;
