//! HTTP handlers for uploading, downloading and previewing shared files.
//! Payloads are buffered in memory; the upload route caps the body size.

use crate::{
    errors::AppError,
    models::record::{Download, ObjectRecord},
    services::{
        access_guard,
        lifecycle_service::{LifecycleError, LifecycleService},
        policy,
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Payloads below this size are returned inline by the preview endpoint.
pub const INLINE_PREVIEW_LIMIT: usize = 5 * 1024 * 1024;

const DEFAULT_MIME: &str = "application/octet-stream";
const X_FILE_NAME: HeaderName = HeaderName::from_static("x-file-name");
const X_FILE_SIZE: HeaderName = HeaderName::from_static("x-file-size");
const X_DOWNLOADS_LEFT: HeaderName = HeaderName::from_static("x-downloads-left");

/// Optional password supplied by the downloader.
#[derive(Debug, Deserialize)]
pub struct AccessQuery {
    pub password: Option<String>,
}

/// Metadata returned by the preview endpoint for files too large to inline.
#[derive(Debug, Serialize)]
pub struct PreviewInfo {
    #[serde(rename = "filename")]
    pub file_name: String,
    #[serde(rename = "filesize")]
    pub file_size: usize,
    #[serde(rename = "mime")]
    pub mime_type: String,
    #[serde(rename = "downloadleft")]
    pub downloads_left: u32,
    #[serde(rename = "haspassword")]
    pub has_password: bool,
}

struct UploadedFile {
    file_name: String,
    mime_type: String,
    data: Bytes,
}

#[derive(Default)]
struct UploadForm {
    file: Option<UploadedFile>,
    password: String,
    slug: String,
    downloads: Option<i64>,
    expiry_minutes: Option<i64>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    let declared = field
                        .headers()
                        .get(header::CONTENT_LENGTH)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<u64>().ok());
                    if let Some(size) = declared {
                        policy::validate_file_size(size)?;
                    }
                    let file_name = field.file_name().unwrap_or_default().to_string();
                    let mime_type = field.content_type().unwrap_or_default().to_string();
                    let data = field.bytes().await?;
                    form.file = Some(UploadedFile {
                        file_name,
                        mime_type,
                        data,
                    });
                }
                "password" => form.password = field.text().await?,
                "slug" => form.slug = field.text().await?.trim().to_string(),
                "downloads" => form.downloads = field.text().await?.trim().parse().ok(),
                "expiry" => form.expiry_minutes = field.text().await?.trim().parse().ok(),
                _ => {}
            }
        }
        Ok(form)
    }
}

/// `POST /upload`: multipart form with `file`, and optional `password`,
/// `slug`, `downloads` and `expiry` (minutes).
pub async fn upload_file(
    State(service): State<LifecycleService>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = UploadForm::read(multipart).await?;
    let file = form
        .file
        .ok_or_else(|| AppError::bad_request("Upload fail: missing `file` field"))?;

    // Declared sizes can lie; check what actually arrived.
    policy::validate_file_size(file.data.len() as u64)?;
    let slug = if form.slug.is_empty() {
        None
    } else {
        policy::validate_slug(&form.slug)?;
        Some(form.slug)
    };
    let downloads = policy::resolve_downloads(form.downloads)?;
    let expiry_minutes = policy::resolve_expiry_minutes(form.expiry_minutes)?;
    let ttl = policy::expiry_ttl(expiry_minutes);

    let password_hash = access_guard::hash_password_blocking(form.password).await?;
    let record = ObjectRecord {
        file_name: policy::sanitize_file_name(&file.file_name),
        mime_type: file.mime_type,
        payload: file.data,
        password_hash,
        downloads_remaining: downloads,
    };

    let id = match slug {
        Some(slug) => {
            service.create(&slug, &record, ttl).await?;
            slug
        }
        None => service.create_with_generated_id(&record, ttl).await?,
    };

    Ok(format!("File uploaded--Download:/file/{}\n", id))
}

/// `GET /file/{id}`: spend one download and stream the payload back.
pub async fn download_file(
    State(service): State<LifecycleService>,
    Path(id): Path<String>,
    Query(query): Query<AccessQuery>,
) -> Result<Response, AppError> {
    // Only the hash outlives the check, so the fetched payload is freed
    // before the consume reads its own copy.
    let verified_hash = {
        let record = service.fetch(&id).await?;
        authorize(&id, &record, query.password).await?;
        record.password_hash
    };

    let download = service.consume_download_as(&id, &verified_hash).await?;
    Ok(download_response(download))
}

/// `GET /preview/{id}`: inspect a file without spending a download.
pub async fn preview_file(
    State(service): State<LifecycleService>,
    Path(id): Path<String>,
    Query(query): Query<AccessQuery>,
) -> Result<Response, AppError> {
    let record = service.fetch(&id).await?;
    authorize(&id, &record, query.password).await?;

    if record.downloads_remaining == 0 {
        return Err(LifecycleError::Exhausted(id).into());
    }

    if record.size() >= INLINE_PREVIEW_LIMIT {
        let info = PreviewInfo {
            file_size: record.size(),
            has_password: record.is_protected(),
            downloads_left: record.downloads_remaining,
            file_name: record.file_name,
            mime_type: record.mime_type,
        };
        return Ok(Json(info).into_response());
    }

    let mut response = Response::new(Body::from(record.payload.clone()));
    let headers = response.headers_mut();
    set_content_type(headers, &record.mime_type);
    headers.insert(X_FILE_NAME, header_text(&record.file_name));
    headers.insert(X_FILE_SIZE, HeaderValue::from(record.size()));
    headers.insert(X_DOWNLOADS_LEFT, HeaderValue::from(record.downloads_remaining));
    Ok(response)
}

/// Reject the request unless `password` unlocks `record`.
///
/// A wrong password never touches the stored object.
async fn authorize(id: &str, record: &ObjectRecord, password: Option<String>) -> Result<(), AppError> {
    if !record.is_protected() {
        return Ok(());
    }
    let candidate = password.unwrap_or_default();
    if access_guard::verify_password_blocking(candidate, record.password_hash.clone()).await {
        Ok(())
    } else {
        warn!(id, "rejected password");
        Err(LifecycleError::AccessDenied(id.to_string()).into())
    }
}

fn download_response(download: Download) -> Response {
    info!(
        id = %download.id,
        file_name = %download.file_name,
        size = download.payload.len(),
        remaining = download.downloads_remaining,
        "serving download"
    );
    let disposition = format!(
        "attachment; filename=\"{}\"",
        download.file_name.replace(['"', '\\'], "_")
    );

    let mut response = Response::new(Body::from(download.payload));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    set_content_type(headers, &download.mime_type);
    headers.insert(header::CONTENT_DISPOSITION, header_text(&disposition));
    headers.insert(X_DOWNLOADS_LEFT, HeaderValue::from(download.downloads_remaining));
    response
}

fn set_content_type(headers: &mut HeaderMap, mime_type: &str) {
    let value = if mime_type.is_empty() {
        DEFAULT_MIME
    } else {
        mime_type
    };
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_MIME)),
    );
}

/// Header-safe rendition of user-controlled text.
fn header_text(value: &str) -> HeaderValue {
    let cleaned: String = value
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();
    HeaderValue::from_str(&cleaned).unwrap_or_else(|_| HeaderValue::from_static("file"))
}
