//! pdfium access shared by the text-layer and vision engines.
//!
//! ## Why bind explicitly?
//!
//! `Pdfium::default()` panics when the shared library cannot be found. Both
//! PDF engines must instead report an [`EngineError`] so the pipeline can
//! try the other engine or fail with a readable `ConversionFailed`.
//!
//! Every function here is blocking; callers run them inside
//! `tokio::task::spawn_blocking`.

use crate::document::DocumentInfo;
use crate::error::EngineError;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::debug;

/// Bind to the pdfium shared library.
///
/// `lib_path` may name the library file or a directory containing it. With
/// no path the working directory is tried first, then the system search path.
pub(crate) fn bind(engine: &str, lib_path: Option<&Path>) -> Result<Pdfium, EngineError> {
    let bindings = match lib_path {
        Some(path) if path.is_dir() => {
            Pdfium::bind_to_library(&path.join(Pdfium::pdfium_platform_library_name()))
        }
        Some(path) => Pdfium::bind_to_library(path),
        None => {
            let local = Path::new(".").join(Pdfium::pdfium_platform_library_name());
            Pdfium::bind_to_library(&local).or_else(|_| Pdfium::bind_to_system_library())
        }
    }
    .map_err(|e| {
        EngineError::unavailable(
            engine,
            format!("pdfium library could not be loaded ({e:?}); set PDFIUM_LIB_PATH"),
        )
    })?;

    debug!("{engine}: pdfium bound");
    Ok(Pdfium::new(bindings))
}

/// Load a document from memory, mapping pdfium's errors to engine errors.
pub(crate) fn open<'a>(
    pdfium: &'a Pdfium,
    engine: &str,
    bytes: &'a [u8],
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, EngineError> {
    pdfium.load_pdf_from_byte_slice(bytes, password).map_err(|e| {
        let detail = format!("{e:?}");
        if detail.to_ascii_lowercase().contains("password") {
            if password.is_some() {
                EngineError::failed(engine, "wrong password for encrypted PDF")
            } else {
                EngineError::failed(engine, "PDF is encrypted; supply --password")
            }
        } else {
            EngineError::failed(engine, format!("corrupt or unreadable PDF: {detail}"))
        }
    })
}

/// Number of pages to process given an optional `max_pages` limit.
pub(crate) fn pages_to_process(total: usize, max_pages: Option<usize>) -> usize {
    max_pages.map_or(total, |m| m.min(total))
}

/// Read the document information dictionary.
pub(crate) fn document_info(document: &PdfDocument<'_>) -> DocumentInfo {
    let metadata = document.metadata();
    let get = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata
            .get(tag)
            .map(|t| t.value().trim().to_string())
            .filter(|v| !v.is_empty())
    };

    DocumentInfo {
        title: get(PdfDocumentMetadataTagType::Title),
        author: get(PdfDocumentMetadataTagType::Author),
        description: get(PdfDocumentMetadataTagType::Subject),
        published: get(PdfDocumentMetadataTagType::CreationDate),
        language: None,
    }
}
