//! Title sanitization and filename derivation shared by extractors.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Maximum sanitized title length.
pub const MAX_TITLE_LENGTH: usize = 100;

/// Title used when nothing usable survives sanitization.
pub const FALLBACK_TITLE: &str = "download";

#[allow(clippy::expect_used)]
static DISALLOWED_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-zA-Z0-9\s\-_]").expect("title regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static WHITESPACE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

/// Well-known downloadable file extensions (lowercase, no dot).
pub const KNOWN_FILE_EXTENSIONS: &[&str] = &[
    // video
    "mp4", "webm", "mkv", "avi", "mov", "flv", "wmv", "m4v", "mpg", "mpeg", "3gp", "ogv",
    // audio
    "mp3", "m4a", "aac", "flac", "ogg", "opus", "wav",
    // archives
    "zip", "rar", "7z", "tar", "gz", "bz2", "xz",
    // documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    // images
    "jpg", "jpeg", "png", "gif", "bmp", "svg", "webp",
    // binaries
    "exe", "dmg", "iso", "apk",
];

/// Cleans a title for use as a filename stem.
///
/// Drops non-ASCII, keeps only alphanumerics, whitespace, `-` and `_`,
/// collapses whitespace, title-cases words and truncates to
/// [`MAX_TITLE_LENGTH`]. Returns [`FALLBACK_TITLE`] when nothing remains.
#[must_use]
pub fn sanitize_title(title: &str) -> String {
    let ascii: String = title.chars().filter(char::is_ascii).collect();
    let kept = DISALLOWED_CHARS.replace_all(&ascii, "");
    let collapsed = WHITESPACE_RUNS.replace_all(&kept, " ");
    let mut cleaned = title_case(collapsed.trim());

    if cleaned.len() > MAX_TITLE_LENGTH {
        cleaned.truncate(MAX_TITLE_LENGTH);
        cleaned = cleaned.trim_end().to_string();
    }

    if cleaned.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        cleaned
    }
}

/// Uppercases the first letter of each alphabetic run and lowercases the rest.
fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut previous_is_letter = false;
    for ch in value.chars() {
        if ch.is_ascii_alphabetic() {
            if previous_is_letter {
                out.push(ch.to_ascii_lowercase());
            } else {
                out.push(ch.to_ascii_uppercase());
            }
            previous_is_letter = true;
        } else {
            out.push(ch);
            previous_is_letter = false;
        }
    }
    out
}

/// Builds `<title>.<ext>`, or just the title when no extension is known.
#[must_use]
pub fn suggested_filename(sanitized_title: &str, extension: Option<&str>) -> String {
    match extension
        .map(|ext| ext.trim_start_matches('.'))
        .filter(|ext| is_safe_extension(ext))
    {
        Some(ext) => format!("{sanitized_title}.{}", ext.to_ascii_lowercase()),
        None => sanitized_title.to_string(),
    }
}

/// Returns the last non-empty URL path segment, percent-decoded.
#[must_use]
pub fn last_path_segment(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.rev().find(|segment| !segment.is_empty())?;
    urlencoding::decode(last)
        .ok()
        .map(|decoded| decoded.into_owned())
}

/// Longest extension accepted into an output filename.
const MAX_EXTENSION_LEN: usize = 8;

/// Extensions end up in the engine's `out` option, so only short ASCII
/// alphanumerics pass.
fn is_safe_extension(ext: &str) -> bool {
    !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.bytes().all(|byte| byte.is_ascii_alphanumeric())
}

/// Splits a filename into stem and lowercase extension.
///
/// A suffix that is not a safe extension stays part of the stem.
#[must_use]
pub fn split_extension(filename: &str) -> (&str, Option<String>) {
    match filename.rfind('.') {
        Some(pos) if pos > 0 && is_safe_extension(&filename[pos + 1..]) => (
            &filename[..pos],
            Some(filename[pos + 1..].to_ascii_lowercase()),
        ),
        _ => (filename, None),
    }
}

/// Extension of the URL's last path segment, if it is a well-known file type.
#[must_use]
pub fn known_extension_from_url(url: &str) -> Option<String> {
    let segment = last_path_segment(url)?;
    let (_, extension) = split_extension(&segment);
    extension.filter(|ext| KNOWN_FILE_EXTENSIONS.contains(&ext.as_str()))
}

/// Guesses an extension from a `Content-Type` header value.
#[must_use]
pub fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    let ext = match mime.as_str() {
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/ogg" => "ogv",
        "video/x-matroska" => "mkv",
        "video/x-flv" => "flv",
        "video/x-msvideo" => "avi",
        "video/quicktime" => "mov",
        "video/x-m4v" => "m4v",
        "video/x-mpeg" | "video/mpeg" => "mpg",
        "video/3gpp" | "video/3gpp2" => "3gp",
        "audio/mpeg" => "mp3",
        "audio/mp4" => "m4a",
        "audio/ogg" => "ogg",
        "audio/flac" => "flac",
        "audio/wav" | "audio/x-wav" => "wav",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "application/gzip" => "gz",
        "application/x-7z-compressed" => "7z",
        "application/vnd.rar" | "application/x-rar-compressed" => "rar",
        "application/x-iso9660-image" => "iso",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => return None,
    };
    Some(ext)
}

/// Parses a `Content-Disposition` header to extract the filename.
///
/// Handles:
/// - `attachment; filename="example.pdf"`
/// - `attachment; filename=example.pdf`
/// - `attachment; filename*=UTF-8''example.pdf` (RFC 5987)
#[must_use]
pub fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            if let Ok(decoded) = urlencoding::decode(encoded[..end].trim()) {
                return Some(decoded.into_owned());
            }
        }
    }

    let pos = header.find("filename=")?;
    let value = header[pos + 9..].trim();
    if let Some(stripped) = value.strip_prefix('"') {
        let end = stripped.find('"')?;
        return Some(stripped[..end].to_string()).filter(|name| !name.is_empty());
    }
    let end = value.find(';').unwrap_or(value.len());
    let filename = value[..end].trim();
    (!filename.is_empty()).then(|| filename.to_string())
}

/// True when a `Content-Disposition` header marks the body as an attachment.
#[must_use]
pub fn is_attachment(header: &str) -> bool {
    header
        .split(';')
        .next()
        .is_some_and(|disposition| disposition.trim().eq_ignore_ascii_case("attachment"))
}
