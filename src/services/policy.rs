//! Upload limits and input sanitation. Everything here is pure.

use std::time::Duration;
use thiserror::Error;

pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;
pub const DEFAULT_DOWNLOADS: u32 = 1;
pub const MAX_DOWNLOADS: u32 = 10;
pub const DEFAULT_EXPIRY_MINUTES: u32 = 5;
/// Seven days.
pub const MAX_EXPIRY_MINUTES: u32 = 10_080;
pub const MAX_FILE_NAME_LEN: usize = 255;
pub const FALLBACK_FILE_NAME: &str = "file";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("invalid file size")]
    InvalidFileSize,
    #[error("file size exceeds {}MB limit", MAX_FILE_SIZE / (1024 * 1024))]
    FileTooLarge,
    #[error("downloads cannot exceed {MAX_DOWNLOADS}")]
    DownloadsExceeded,
    #[error("expiry cannot exceed 7 days ({MAX_EXPIRY_MINUTES} minutes)")]
    ExpiryExceeded,
    #[error("invalid slug format: only lowercase letters, digits and hyphens are allowed")]
    InvalidSlug,
}

/// Reject empty payloads and anything above [`MAX_FILE_SIZE`].
///
/// Applied to the declared size when one is sent and again to the bytes
/// actually received.
pub fn validate_file_size(size: u64) -> Result<(), PolicyError> {
    if size == 0 {
        return Err(PolicyError::InvalidFileSize);
    }
    if size > MAX_FILE_SIZE {
        return Err(PolicyError::FileTooLarge);
    }
    Ok(())
}

/// Missing or non-positive counts fall back to [`DEFAULT_DOWNLOADS`].
pub fn resolve_downloads(requested: Option<i64>) -> Result<u32, PolicyError> {
    match requested {
        Some(n) if n > i64::from(MAX_DOWNLOADS) => Err(PolicyError::DownloadsExceeded),
        Some(n) if n > 0 => Ok(n as u32),
        _ => Ok(DEFAULT_DOWNLOADS),
    }
}

/// Missing or non-positive durations fall back to [`DEFAULT_EXPIRY_MINUTES`].
pub fn resolve_expiry_minutes(requested: Option<i64>) -> Result<u32, PolicyError> {
    match requested {
        Some(n) if n > i64::from(MAX_EXPIRY_MINUTES) => Err(PolicyError::ExpiryExceeded),
        Some(n) if n > 0 => Ok(n as u32),
        _ => Ok(DEFAULT_EXPIRY_MINUTES),
    }
}

pub fn expiry_ttl(minutes: u32) -> Duration {
    Duration::from_secs(u64::from(minutes) * 60)
}

/// Slugs must match `^[a-z0-9-]+$`.
pub fn validate_slug(slug: &str) -> Result<(), PolicyError> {
    let well_formed = !slug.is_empty()
        && slug
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'-'));
    if well_formed {
        Ok(())
    } else {
        Err(PolicyError::InvalidSlug)
    }
}

/// Turn a client-supplied file name into something safe to echo back in
/// response headers.
///
/// Directory components are dropped, control characters other than tab,
/// newline and carriage return are removed, the name is cut to
/// [`MAX_FILE_NAME_LEN`] bytes and surrounding whitespace and dots are
/// trimmed. An empty result becomes [`FALLBACK_FILE_NAME`].
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let mut name: String = base
        .chars()
        .filter(|&c| c >= ' ' || matches!(c, '\t' | '\n' | '\r'))
        .collect();

    if name.len() > MAX_FILE_NAME_LEN {
        let mut cut = MAX_FILE_NAME_LEN;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }

    let trimmed = name.trim_matches(|c: char| c.is_whitespace() || c == '.');
    if trimmed.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}
