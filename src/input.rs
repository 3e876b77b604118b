//! Input normalization for code submissions.
//!
//! Turns an uploaded file or a pasted text payload into a [`CodeSubmission`].
//! The extension allow-list is derived from [`LANGUAGE_TABLE`], and the HTTP
//! upload layer filters with the same [`is_allowed_extension`] check, so the
//! two can never disagree about which files are accepted.
//!
//! This module is pure: no I/O, only validation and mapping.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::CodeSubmission;

/// Size ceiling for both uploads and pasted code (200 KiB).
pub const MAX_CODE_BYTES: usize = 200 * 1024;

/// Language used for pasted code when the caller gives no hint.
pub const DEFAULT_LANGUAGE: &str = "javascript";

/// Extension → language tag. Extensions are lowercase and include the dot.
pub const LANGUAGE_TABLE: &[(&str, &str)] = &[
    (".js", "javascript"),
    (".jsx", "javascript"),
    (".mjs", "javascript"),
    (".ts", "typescript"),
    (".tsx", "typescript"),
    (".py", "python"),
    (".pyw", "python"),
    (".java", "java"),
    (".cpp", "cpp"),
    (".cc", "cpp"),
    (".cxx", "cpp"),
    (".c", "c"),
    (".h", "c"),
    (".hpp", "cpp"),
    (".html", "html"),
    (".htm", "html"),
    (".css", "css"),
    (".scss", "css"),
    (".sass", "css"),
    (".php", "php"),
    (".rb", "ruby"),
    (".go", "go"),
    (".rs", "rust"),
    (".swift", "swift"),
    (".kt", "kotlin"),
    (".scala", "scala"),
    (".json", "json"),
    (".xml", "xml"),
    (".yaml", "yaml"),
    (".yml", "yaml"),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("No file uploaded. Please select a file to upload.")]
    MissingFile,
    #[error("Uploaded file is corrupt or empty. Please try again.")]
    EmptyFile,
    #[error("Code text is required. Please paste your code in the text area.")]
    MissingCode,
    #[error("Code is empty. Please provide some code to analyze.")]
    EmptyContent,
    #[error("Code too large: {size} bytes. Maximum size is 200KB.")]
    TooLarge { size: usize },
    #[error("Unsupported file type: {extension}. Supported types: {supported}")]
    UnsupportedExtension {
        extension: String,
        supported: String,
    },
    #[error("Failed to read file content. The file must be UTF-8 text.")]
    Unreadable,
}

/// A file received by the upload layer.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Pasted code with optional hints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCodeInput {
    pub code: Option<String>,
    pub language: Option<String>,
    pub file_name: Option<String>,
}

/// Lowercased extension of `file_name` including the leading dot, or `""`.
pub fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

pub fn language_for_extension(extension: &str) -> Option<&'static str> {
    LANGUAGE_TABLE
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, lang)| *lang)
}

pub fn allowed_extensions() -> impl Iterator<Item = &'static str> {
    LANGUAGE_TABLE.iter().map(|(ext, _)| *ext)
}

pub fn is_allowed_extension(file_name: &str) -> bool {
    language_for_extension(&extension_of(file_name)).is_some()
}

/// Mapped language for a file name, or `"unknown"`.
pub fn detect_language(file_name: &str) -> &'static str {
    language_for_extension(&extension_of(file_name)).unwrap_or("unknown")
}

pub fn parse_uploaded_file(file: Option<&UploadedFile>) -> Result<CodeSubmission, InputError> {
    let file = file.ok_or(InputError::MissingFile)?;

    if file.bytes.is_empty() {
        return Err(InputError::EmptyFile);
    }

    let size = file.bytes.len();
    if size > MAX_CODE_BYTES {
        return Err(InputError::TooLarge { size });
    }

    let extension = extension_of(&file.file_name);
    let language = language_for_extension(&extension).ok_or_else(|| {
        InputError::UnsupportedExtension {
            extension: extension.clone(),
            supported: allowed_extensions()
                .map(|ext| ext.trim_start_matches('.'))
                .collect::<Vec<_>>()
                .join(", "),
        }
    })?;

    let text = std::str::from_utf8(&file.bytes).map_err(|_| InputError::Unreadable)?;
    let code = text.trim();
    if code.is_empty() {
        return Err(InputError::EmptyContent);
    }

    Ok(CodeSubmission {
        code: code.to_string(),
        language: language.to_string(),
        file_name: file.file_name.clone(),
        size,
        extension: Some(extension),
    })
}

pub fn parse_raw_code_input(input: RawCodeInput) -> Result<CodeSubmission, InputError> {
    parse_raw_code_input_at(input, chrono::Utc::now().timestamp_millis())
}

/// Like [`parse_raw_code_input`], with the placeholder file name derived from `now_millis`.
pub fn parse_raw_code_input_at(
    input: RawCodeInput,
    now_millis: i64,
) -> Result<CodeSubmission, InputError> {
    let raw = input.code.ok_or(InputError::MissingCode)?;

    let code = raw.trim();
    if code.is_empty() {
        return Err(InputError::EmptyContent);
    }

    let size = code.len();
    if size > MAX_CODE_BYTES {
        return Err(InputError::TooLarge { size });
    }

    let language = input
        .language
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_lowercase())
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

    let file_name = input
        .file_name
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| format!("code-{}.txt", now_millis));

    Ok(CodeSubmission {
        code: code.to_string(),
        language,
        file_name,
        size,
        extension: None,
    })
}

/// Supported extensions and languages, as served by `GET /languages`.
#[derive(Debug, Clone, Serialize)]
pub struct SupportedLanguages {
    pub extensions: Vec<&'static str>,
    pub languages: Vec<&'static str>,
    /// Extension → language, serialized as a JSON object.
    pub mapping: BTreeMap<&'static str, &'static str>,
}

pub fn supported_languages() -> SupportedLanguages {
    let languages: BTreeSet<&'static str> = LANGUAGE_TABLE.iter().map(|(_, l)| *l).collect();
    SupportedLanguages {
        extensions: allowed_extensions().collect(),
        languages: languages.into_iter().collect(),
        mapping: LANGUAGE_TABLE.iter().copied().collect(),
    }
}
