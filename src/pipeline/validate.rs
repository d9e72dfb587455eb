//! File validation: decide locally whether a selection is worth uploading.
//!
//! The accepted set is fixed on the client. The backend's own list of
//! supported formats ([`SupportedFormats`]) is only used to make rejection
//! messages more helpful; the backend stays the final arbiter of support.

use crate::error::ValidationError;
use crate::job::SourceFile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Extensions the pipeline uploads.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["rvt", "ifc", "step", "stp"];

/// Extensions a file picker should offer: the accepted set plus Revit
/// families, which get a guidance message instead of a generic rejection.
pub const PICKER_EXTENSIONS: &[&str] = &["rvt", "rfa", "ifc", "step", "stp"];

const FAMILY_EXTENSION: &str = "rfa";

/// Category → ordered list of extensions, as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupportedFormats(pub BTreeMap<String, Vec<String>>);

impl SupportedFormats {
    /// All extensions across categories, lower-cased, in category order.
    pub fn extensions(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for ext in self.0.values().flatten() {
            let ext = ext.trim_start_matches('.').to_ascii_lowercase();
            if !ext.is_empty() && !out.contains(&ext) {
                out.push(ext);
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }
}

/// A file that passed validation, with any non-fatal remarks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    pub extension: String,
    pub warnings: Vec<String>,
}

/// Validate `file` against the accepted extensions and the soft size limit.
///
/// Never touches the network.
pub fn validate_file(
    file: &SourceFile,
    formats: Option<&SupportedFormats>,
    large_file_warning_bytes: u64,
) -> Result<Validated, ValidationError> {
    let supported = describe_supported(formats);

    let extension = match file.extension() {
        Some(ext) => ext,
        None => {
            return Err(ValidationError::MissingExtension {
                file: file.name().to_string(),
                supported,
            })
        }
    };

    if extension == FAMILY_EXTENSION {
        return Err(ValidationError::FamilyFile {
            file: file.name().to_string(),
        });
    }

    if !ACCEPTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ValidationError::UnsupportedExtension {
            file: file.name().to_string(),
            extension,
            supported,
        });
    }

    if file.size_bytes() == 0 {
        return Err(ValidationError::EmptyFile {
            file: file.name().to_string(),
        });
    }

    let mut warnings = Vec::new();
    if file.size_bytes() > large_file_warning_bytes {
        warnings.push(format!(
            "'{}' is {:.1} MB; uploading and translating large models can take several minutes",
            file.name(),
            file.size_mb()
        ));
    }

    Ok(Validated {
        extension,
        warnings,
    })
}

/// Human-readable list of extensions for rejection messages.
fn describe_supported(formats: Option<&SupportedFormats>) -> String {
    let accepted = ACCEPTED_EXTENSIONS
        .iter()
        .map(|e| format!(".{e}"))
        .collect::<Vec<_>>()
        .join(", ");

    match formats.filter(|f| !f.is_empty()) {
        Some(f) => {
            let backend = f
                .extensions()
                .iter()
                .map(|e| format!(".{e}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{accepted} (backend reports: {backend})")
        }
        None => accepted,
    }
}
