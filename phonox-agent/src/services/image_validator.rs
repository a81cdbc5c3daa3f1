//! Image precondition validation
//!
//! Rejects a proposed run before any provider spend: image count, per-blob
//! and total byte ceilings, allowed content types, empty blobs. Appends no
//! evidence.

use crate::error::AgentError;
use crate::types::ImageInput;
use phonox_common::AgentConfig;

/// Accepted declared content types
const ALLOWED_CONTENT_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/gif"];

/// Validates image preconditions for a run
#[derive(Debug, Clone)]
pub struct ImageValidator {
    max_images: usize,
    max_image_bytes: usize,
    max_total_bytes: usize,
}

impl ImageValidator {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            max_images: config.max_images,
            max_image_bytes: config.max_image_bytes,
            max_total_bytes: config.max_total_bytes,
        }
    }

    /// Check every precondition; first violation wins
    pub fn validate(&self, images: &[ImageInput]) -> Result<(), AgentError> {
        if images.is_empty() {
            return Err(AgentError::Validation(
                "At least one image is required".to_string(),
            ));
        }
        if images.len() > self.max_images {
            return Err(AgentError::Validation(format!(
                "Too many images: {} (maximum {})",
                images.len(),
                self.max_images
            )));
        }

        let mut total_bytes = 0usize;
        for (index, image) in images.iter().enumerate() {
            if image.bytes.is_empty() {
                return Err(AgentError::Validation(format!(
                    "Image {} ({}) is empty",
                    index, image.filename
                )));
            }
            if image.bytes.len() > self.max_image_bytes {
                return Err(AgentError::Validation(format!(
                    "Image {} ({}) is {} bytes (maximum {})",
                    index,
                    image.filename,
                    image.bytes.len(),
                    self.max_image_bytes
                )));
            }
            if !ALLOWED_CONTENT_TYPES.contains(&image.content_type.as_str()) {
                return Err(AgentError::Validation(format!(
                    "Unsupported content type {} for image {} ({})",
                    image.content_type, index, image.filename
                )));
            }

            // Advisory: a declared type that disagrees with the blob's magic
            // bytes is logged, not rejected; the vision provider does its own
            // decoding and some phone uploads carry sloppy headers.
            if let Some(kind) = infer::get(&image.bytes) {
                if kind.mime_type() != image.content_type {
                    tracing::warn!(
                        image_index = index,
                        declared = %image.content_type,
                        sniffed = %kind.mime_type(),
                        "Declared content type disagrees with sniffed format"
                    );
                }
            }

            total_bytes += image.bytes.len();
        }

        if total_bytes > self.max_total_bytes {
            return Err(AgentError::Validation(format!(
                "Images total {} bytes (maximum {})",
                total_bytes, self.max_total_bytes
            )));
        }

        Ok(())
    }
}
