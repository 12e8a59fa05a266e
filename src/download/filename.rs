//! Filename guessing, sanitization, and partial artifact naming.
//!
//! A download carries two candidate save names: one derived from the URL path,
//! one from the server's `Content-Disposition` header. Neither is ever used for
//! the partial artifact, which lives under a name derived from the URL hash.

use std::path::{Component, Path};

use sha2::{Digest, Sha256};
use url::Url;

use super::constants::{FALLBACK_FILENAME, PARTIAL_EXTENSION};

/// Number of hex characters of the URL digest used in artifact names.
const ARTIFACT_HASH_CHARS: usize = 32;

/// Guesses a filename from the last URL path segment.
///
/// Returns an empty string when the path has no usable last segment
/// (`https://example.com/`, `https://example.com/dir/`).
#[must_use]
pub fn filename_guess_from_url(url: &Url) -> String {
    let Some(last) = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
    else {
        return String::new();
    };

    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
    if decoded == "." || decoded == ".." {
        return String::new();
    }
    sanitize_filename(&decoded)
}

/// Parses Content-Disposition header to extract filename.
///
/// Handles:
/// - `attachment; filename="example.pdf"`
/// - `attachment; filename=example.pdf`
/// - `attachment; filename*=UTF-8''example.pdf` (RFC 5987)
#[must_use]
pub fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        // charset'language'encoded_value
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            let encoded_name = encoded[..end].trim().trim_matches('"');
            if let Ok(decoded) = urlencoding::decode(encoded_name)
                && !decoded.is_empty()
            {
                return Some(decoded.into_owned());
            }
        }
    }

    let pos = header.find("filename=")?;
    let value = header[pos + 9..].trim();

    if let Some(stripped) = value.strip_prefix('"') {
        let end = stripped.find('"')?;
        let name = &stripped[..end];
        return (!name.is_empty()).then(|| name.to_string());
    }

    let end = value.find(';').unwrap_or(value.len());
    let name = value[..end].trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Picks the save name shown to the user and used as the default destination.
///
/// The probe's name wins when non-empty, then the URL's, then a fixed fallback.
#[must_use]
pub fn display_filename(guess_from_head: &str, guess_from_url: &str) -> String {
    let chosen = [guess_from_head, guess_from_url]
        .into_iter()
        .map(str::trim)
        .find(|name| !name.is_empty());

    match chosen {
        Some(name) => {
            let sanitized = sanitize_filename(name);
            if sanitized.trim_matches('_').is_empty() {
                FALLBACK_FILENAME.to_string()
            } else {
                sanitized
            }
        }
        None => FALLBACK_FILENAME.to_string(),
    }
}

/// Name of the partial artifact for a URL: hex digest prefix plus `.part`.
#[must_use]
pub fn partial_artifact_name(url: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(url.as_bytes()));
    format!("{}.{PARTIAL_EXTENSION}", &digest[..ARTIFACT_HASH_CHARS])
}
