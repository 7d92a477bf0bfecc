//! Validation of the source URL submitted to `POST /download`.

use url::Url;

use crate::error::Error;

/// Message returned when no URL was supplied.
pub const URL_REQUIRED: &str = "YouTube URL required";

/// Check that `url` is a non-empty absolute http(s) URL and return it trimmed.
///
/// # Examples
///
/// ```
/// use video_drive::source_url::validate_source_url;
///
/// let url = validate_source_url(Some("  https://example.com/watch?v=abc ")).unwrap();
/// assert_eq!(url, "https://example.com/watch?v=abc");
///
/// assert!(validate_source_url(None).is_err());
/// ```
pub fn validate_source_url(url: Option<&str>) -> Result<String, Error> {
    let trimmed = url.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Err(Error::Validation(URL_REQUIRED.to_string()));
    }

    let parsed = Url::parse(trimmed)
        .map_err(|err| Error::Validation(format!("invalid URL {:?}: {}", trimmed, err)))?;

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(Error::Validation(format!(
            "unsupported URL {:?}: only http and https links are accepted",
            trimmed
        )));
    }

    Ok(trimmed.to_string())
}
