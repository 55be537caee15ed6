//! Page rasterisation and image encoding for the vision fallback.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12 000 × 17 000 px bitmap. The render target is derived from the DPI and
//! the page's physical width, then clamped to `max_rendered_pixels` on both
//! edges, so memory stays bounded whatever the page size.
//!
//! ## Why PNG?
//!
//! Lossless compression keeps glyph edges crisp; JPEG artefacts on rendered
//! text degrade transcription accuracy at low DPI.

use crate::document::DocumentInfo;
use crate::error::EngineError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info, warn};

use super::pdfium;

/// Rendering parameters for one document.
#[derive(Debug, Clone)]
pub struct RasterOptions<'a> {
    pub engine: &'a str,
    pub dpi: u32,
    pub max_pixels: u32,
    pub max_pages: Option<usize>,
    pub password: Option<&'a str>,
    pub lib_path: Option<&'a Path>,
}

/// Rendered pages plus what pdfium knows about the document.
pub struct RenderedDocument {
    /// `(page_index_0based, image)` for every page that rendered.
    pub pages: Vec<(usize, DynamicImage)>,
    pub total_pages: usize,
    pub info: DocumentInfo,
}

/// Rasterise the first pages of a PDF held in memory. Blocking.
pub fn render_pages_blocking(
    bytes: &[u8],
    opts: &RasterOptions<'_>,
) -> Result<RenderedDocument, EngineError> {
    let pdfium = pdfium::bind(opts.engine, opts.lib_path)?;
    let document = pdfium::open(&pdfium, opts.engine, bytes, opts.password)?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    let wanted = pdfium::pages_to_process(total_pages, opts.max_pages);
    info!("{}: rasterising {} of {} pages", opts.engine, wanted, total_pages);

    let mut rendered = Vec::with_capacity(wanted);
    for idx in 0..wanted {
        let page = match pages.get(idx as u16) {
            Ok(p) => p,
            Err(e) => {
                warn!("Page {}: cannot open for rendering: {:?}", idx + 1, e);
                continue;
            }
        };

        let width_px = target_width(page.width().value, opts.dpi, opts.max_pixels);
        let render_config = PdfRenderConfig::new()
            .set_target_width(width_px)
            .set_maximum_height(opts.max_pixels as i32);

        match page.render_with_config(&render_config) {
            Ok(bitmap) => {
                let image = bitmap.as_image();
                debug!("Rendered page {} → {}x{} px", idx + 1, image.width(), image.height());
                rendered.push((idx, image));
            }
            Err(e) => warn!("Page {}: rasterisation failed: {:?}", idx + 1, e),
        };
    }

    Ok(RenderedDocument {
        pages: rendered,
        total_pages,
        info: pdfium::document_info(&document),
    })
}

/// Pixel width for a page `width_pt` points wide rendered at `dpi`,
/// clamped to `[1, max_pixels]`.
pub fn target_width(width_pt: f32, dpi: u32, max_pixels: u32) -> i32 {
    let px = (width_pt / 72.0 * dpi as f32).round();
    px.clamp(1.0, max_pixels as f32) as i32
}

/// Encode a rasterised page as a base64 PNG ready for a vision request.
///
/// `detail: "high"` lets GPT-4-class models tile the image instead of
/// looking at a single downscaled overview, which loses fine print.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page image → {} bytes base64", b64.len());
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
