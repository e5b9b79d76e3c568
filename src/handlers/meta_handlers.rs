//! Link-preview metadata for shared files.
//!
//! `GET /meta/{id}` is what chat apps and the web client call to describe a
//! link before anyone clicks it, so it never spends a download and never
//! asks for the password.

use crate::{
    errors::AppError,
    services::lifecycle_service::{LifecycleError, LifecycleService},
};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, header},
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

pub const SITE_NAME: &str = "FileOrcha";

const TITLE_LIMIT: usize = 60;
const DESCRIPTION_LIMIT: usize = 160;
const IMAGE_NAME_LIMIT: usize = 30;
const PREVIEW_IMAGE_BASE: &str = "https://via.placeholder.com/1200x630/3b82f6/ffffff";

/// Open Graph card plus the file facts the download page shows.
#[derive(Debug, Serialize)]
pub struct MetaResponse {
    pub title: String,
    pub description: String,
    pub image: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub site_name: &'static str,
    pub id: String,
    pub file_name: String,
    pub file_size: String,
    pub file_type: String,
    pub downloads_left: u32,
    pub has_password: bool,
    /// RFC 3339 instant at which the link stops working, if it expires at all.
    pub expires_at: Option<String>,
}

pub async fn get_meta(
    State(service): State<LifecycleService>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<MetaResponse>, AppError> {
    let record = service.fetch(&id).await?;
    if record.downloads_remaining == 0 {
        return Err(LifecycleError::Exhausted(id).into());
    }

    let expires_at = service
        .remaining_ttl(&id)
        .await?
        .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
        .map(|ttl| (Utc::now() + ttl).to_rfc3339_opts(SecondsFormat::Secs, true));

    let file_size = format_file_size(record.size());
    let file_type = file_type_label(&record.mime_type, &record.file_name);

    Ok(Json(MetaResponse {
        title: card_title(&record.file_name),
        description: card_description(&record.file_name, &file_size, record.downloads_remaining),
        image: preview_image_url(&record.file_name, &file_type),
        url: format!(
            "{}/download.html?id={}",
            base_url(&headers),
            urlencoding::encode(&id)
        ),
        kind: "website",
        site_name: SITE_NAME,
        file_size,
        file_type,
        downloads_left: record.downloads_remaining,
        has_password: record.is_protected(),
        file_name: record.file_name,
        expires_at,
        id,
    }))
}

/// `{name} - FileOrcha`, shortened to fit a 60 character card title.
pub fn card_title(file_name: &str) -> String {
    let title = format!("{file_name} - {SITE_NAME}");
    if title.chars().count() <= TITLE_LIMIT {
        return title;
    }
    format!("{}... - {SITE_NAME}", truncate_chars(file_name, TITLE_LIMIT - 3))
}

/// Falls back to a form without the size when the long one passes 160 characters.
pub fn card_description(file_name: &str, file_size: &str, downloads_left: u32) -> String {
    let long = format!(
        "Download {file_name} ({file_size}) \u{2022} {downloads_left} downloads left \u{2022} Self-destructing file"
    );
    if long.chars().count() <= DESCRIPTION_LIMIT {
        return long;
    }
    format!("Download {file_name} \u{2022} {downloads_left} downloads left \u{2022} Self-destructing file")
}

pub fn preview_image_url(file_name: &str, file_type: &str) -> String {
    let name = if file_name.chars().count() > IMAGE_NAME_LIMIT {
        format!("{}...", truncate_chars(file_name, IMAGE_NAME_LIMIT - 3))
    } else {
        file_name.to_string()
    };
    let text = urlencoding::encode(&format!("{name} - {file_type}")).replace("%20", "+");
    format!("{PREVIEW_IMAGE_BASE}?text={text}")
}

/// `scheme://host` of the request. TLS ends in front of us, so the scheme
/// comes from `X-Forwarded-Proto` when a proxy sets it.
fn base_url(headers: &HeaderMap) -> String {
    let scheme = match headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
    {
        Some(proto) if proto.eq_ignore_ascii_case("https") => "https",
        _ => "http",
    };
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{scheme}://{host}")
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Human-readable size with one decimal, e.g. `1.5 MB`.
pub fn format_file_size(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".into();
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

/// Friendly label from the file extension, falling back to the MIME type.
pub fn file_type_label(mime_type: &str, file_name: &str) -> String {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    let known = match ext.as_str() {
        "pdf" => Some("PDF Document"),
        "doc" | "docx" => Some("Word Document"),
        "xls" | "xlsx" => Some("Excel Spreadsheet"),
        "ppt" | "pptx" => Some("PowerPoint Presentation"),
        "txt" => Some("Text File"),
        "md" => Some("Markdown File"),
        "jpg" | "jpeg" | "png" | "gif" | "webp" => Some("Image"),
        "mp4" | "avi" | "mov" | "wmv" => Some("Video"),
        "mp3" | "wav" | "flac" => Some("Audio"),
        "zip" | "rar" | "7z" => Some("Archive"),
        "js" => Some("JavaScript"),
        "ts" => Some("TypeScript"),
        "py" => Some("Python"),
        "go" => Some("Go"),
        "rs" => Some("Rust"),
        "html" => Some("HTML"),
        "css" => Some("CSS"),
        "json" => Some("JSON"),
        _ => None,
    };
    if let Some(label) = known {
        return label.to_string();
    }

    match mime_type.split_once('/') {
        Some((kind, sub)) if !kind.is_empty() && !sub.is_empty() => {
            format!("{} {}", capitalize(kind), capitalize(sub))
        }
        _ => "File".to_string(),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
