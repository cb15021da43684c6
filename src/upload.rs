//! Upload validation.
//!
//! Pure predicates over the uploaded package: nothing here touches the
//! filesystem, so every rejection happens before a workspace is allocated.

use bytes::Bytes;

use crate::error::ValidationError;

/// Extensions accepted for upload and recognized in tool output.
pub const PACKAGE_EXTENSIONS: [&str; 2] = ["apk", "aab"];

/// Filename prefix the gateway stamps on results. An upload already carrying
/// it is a previously-processed package and is rejected up front.
pub const PROTECTED_PREFIX: &str = "protected_";

/// An uploaded package: the client-supplied filename and the raw bytes as
/// actually received (never a declared content length).
#[derive(Debug, Clone)]
pub struct UploadedPackage {
    pub file_name: String,
    pub bytes: Bytes,
}

impl UploadedPackage {
    pub fn new(file_name: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Validate the upload against the configured size limit.
    ///
    /// Checks run in order: presence, extension, measured size, the
    /// already-protected marker. The size check uses `bytes.len()` — the
    /// transmitted payload — so caller-supplied metadata is never trusted.
    pub fn validate(&self, max_bytes: u64) -> Result<(), ValidationError> {
        if self.file_name.trim().is_empty() {
            return Err(ValidationError::MissingFile);
        }

        if !has_package_extension(&self.file_name) {
            return Err(ValidationError::UnsupportedType {
                file_name: self.file_name.clone(),
            });
        }

        let size_bytes = self.bytes.len() as u64;
        if size_bytes > max_bytes {
            return Err(ValidationError::TooLarge {
                size_bytes,
                max_bytes,
            });
        }

        if self.file_name.starts_with(PROTECTED_PREFIX) {
            return Err(ValidationError::AlreadyProcessed {
                file_name: self.file_name.clone(),
            });
        }

        Ok(())
    }
}

/// Whether a filename ends in one of the accepted package extensions
/// (case-insensitive).
pub fn has_package_extension(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    PACKAGE_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
}

/// Reduce a client-supplied filename to a safe single path component.
///
/// Strips any directory parts, then keeps only ASCII alphanumerics, `.`,
/// `-` and `_` (everything else becomes `_`). Falls back to `package.apk`
/// when nothing usable remains.
pub fn sanitize_file_name(file_name: &str) -> String {
    // Take the last path component under either separator convention.
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    // A name of only dots/underscores (e.g. "..") could escape or vanish.
    let meaningful = cleaned.chars().any(|c| c.is_ascii_alphanumeric());
    if !meaningful {
        return "package.apk".to_string();
    }
    cleaned
}
