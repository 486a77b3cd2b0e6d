//! Local upload checks, run before any network call.
//!
//! Content type comes from magic bytes (NOT file extensions).

use super::error::{CaseError, RejectReason};
use super::processing_set::ProcessingSet;
use super::types::{AcceptedUpload, UploadFile};
use crate::config::UploadLimits;
use crate::models::CaseSnapshot;

/// Detect the MIME type from the first bytes of a file.
pub fn detect_mime(bytes: &[u8], allow_plain_text: bool) -> Option<&'static str> {
    match bytes {
        // PDF: starts with %PDF
        [0x25, 0x50, 0x44, 0x46, ..] => Some("application/pdf"),
        // JPEG: starts with FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        // PNG: starts with 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        // TIFF: little-endian (49 49 2A 00) or big-endian (4D 4D 00 2A)
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => Some("image/tiff"),
        // HEIC/HEIF: "ftyp" at offset 4
        _ if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" => Some("image/heic"),
        _ if allow_plain_text && is_likely_text(bytes) => Some("text/plain"),
        _ => None,
    }
}

fn is_likely_text(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(4096)];
    // A multi-byte sequence may be cut at the sample boundary.
    let valid = match std::str::from_utf8(sample) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    };
    valid && !sample.contains(&0)
}

/// Check one file against the limits and the current case.
pub fn check_upload(
    file: UploadFile,
    limits: &UploadLimits,
    snapshot: &CaseSnapshot,
    processing: &ProcessingSet,
) -> Result<AcceptedUpload, CaseError> {
    let reject = |reason: RejectReason, file: &UploadFile| CaseError::UploadRejected {
        file_name: file.file_name.clone(),
        reason,
    };

    if file.bytes.is_empty() {
        return Err(reject(RejectReason::Empty, &file));
    }

    let size_bytes = file.bytes.len() as u64;
    if size_bytes > limits.max_file_bytes {
        return Err(reject(
            RejectReason::TooLarge {
                size_bytes,
                max_bytes: limits.max_file_bytes,
            },
            &file,
        ));
    }

    let mime_type = match detect_mime(&file.bytes, limits.allow_plain_text) {
        Some(m) => m,
        None => {
            return Err(reject(
                RejectReason::UnsupportedType {
                    mime_type: "application/octet-stream".into(),
                },
                &file,
            ))
        }
    };

    if !snapshot.has_document_type(&file.document_type_id) {
        let type_id = file.document_type_id.clone();
        return Err(reject(RejectReason::UnknownDocumentType(type_id), &file));
    }

    let busy = snapshot
        .documents
        .iter()
        .any(|d| d.document_type_id == file.document_type_id && processing.contains(&d.id));
    if busy {
        let type_id = file.document_type_id.clone();
        return Err(reject(RejectReason::AlreadyProcessing(type_id), &file));
    }

    Ok(AcceptedUpload {
        file,
        mime_type: mime_type.to_string(),
    })
}
