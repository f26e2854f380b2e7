//! Centralized URI normalization.
//!
//! Every URI entering the hub (document operations, routing hints,
//! workspace edits, diagnostics subscriptions) passes through
//! [`normalize`] so that store keys and listener keys always agree.

use std::path::Path;

use url::Url;

use crate::error::HubError;

/// Normalize a document URI.
///
/// Accepts a full URI, a bare absolute path, or a Windows drive-letter
/// path. Bare paths become percent-encoded `file://` URIs. Existing URIs
/// are reparsed and re-emitted canonically: fragments are stripped and a
/// Windows drive letter is uppercased.
pub(crate) fn normalize(input: &str) -> Result<String, HubError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(HubError::invalid_uri(input, "empty URI"));
    }

    if trimmed.starts_with('/') {
        return file_uri_from_path_str(trimmed, input);
    }
    if is_windows_drive_path(trimmed) {
        let drive = trimmed.as_bytes()[0].to_ascii_uppercase() as char;
        let rest = trimmed[2..].replace('\\', "/");
        return file_uri_from_path_str(&format!("/{drive}:{rest}"), input);
    }

    let mut url = Url::parse(trimmed)
        .map_err(|e| HubError::invalid_uri(input, e.to_string()))?;
    url.set_fragment(None);
    Ok(uppercase_drive_letter(url.to_string()))
}

/// True for `C:\...` or `C:/...` style inputs.
fn is_windows_drive_path(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'/' || bytes[2] == b'\\')
}

/// Build a `file://` URI from an absolute slash-separated path,
/// percent-encoding as needed.
fn file_uri_from_path_str(path: &str, original: &str) -> Result<String, HubError> {
    let mut url = Url::parse("file:///")
        .map_err(|e| HubError::invalid_uri(original, e.to_string()))?;
    url.set_path(path);
    Ok(uppercase_drive_letter(url.to_string()))
}

/// Uppercase the drive letter in `file:///c:/...` URIs.
fn uppercase_drive_letter(uri: String) -> String {
    let bytes = uri.as_bytes();
    if uri.len() > 9
        && uri.starts_with("file:///")
        && bytes[8] == b':'
        && bytes[7].is_ascii_lowercase()
    {
        let mut out = String::with_capacity(uri.len());
        out.push_str(&uri[..7]);
        out.push(bytes[7].to_ascii_uppercase() as char);
        out.push_str(&uri[8..]);
        return out;
    }
    uri
}

/// Convert a filesystem path to a `file://` URI (workspace roots).
pub(crate) fn from_path(path: &Path) -> Result<Url, HubError> {
    Url::from_file_path(path).map_err(|()| {
        HubError::invalid_uri(path.display().to_string(), "path is not absolute")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_unix_path() {
        assert_eq!(normalize("/home/me/a.ts").unwrap(), "file:///home/me/a.ts");
    }

    #[test]
    fn test_bare_path_percent_encodes() {
        assert_eq!(
            normalize("/home/me/my file.ts").unwrap(),
            "file:///home/me/my%20file.ts"
        );
    }

    #[test]
    fn test_windows_drive_backslashes() {
        assert_eq!(
            normalize(r"c:\Users\me\a.ts").unwrap(),
            "file:///C:/Users/me/a.ts"
        );
    }

    #[test]
    fn test_windows_drive_forward_slashes() {
        assert_eq!(normalize("C:/work/a.ts").unwrap(), "file:///C:/work/a.ts");
    }

    #[test]
    fn test_existing_uri_passes_through() {
        assert_eq!(normalize("file:///a.ts").unwrap(), "file:///a.ts");
    }

    #[test]
    fn test_uri_drive_letter_uppercased() {
        assert_eq!(
            normalize("file:///c:/work/a.ts").unwrap(),
            "file:///C:/work/a.ts"
        );
    }

    #[test]
    fn test_fragment_stripped() {
        assert_eq!(normalize("file:///a.ts#L10").unwrap(), "file:///a.ts");
    }

    #[test]
    fn test_whitespace_trimmed() {
        assert_eq!(normalize("  file:///a.ts \n").unwrap(), "file:///a.ts");
    }

    #[test]
    fn test_non_file_scheme_kept() {
        assert_eq!(
            normalize("untitled:Untitled-1").unwrap(),
            "untitled:Untitled-1"
        );
    }

    #[test]
    fn test_empty_is_invalid() {
        let err = normalize("   ").unwrap_err();
        assert_eq!(err.kind(), "InvalidUri");
    }

    #[test]
    fn test_relative_path_is_invalid() {
        let err = normalize("src/main.rs").unwrap_err();
        assert_eq!(err.kind(), "InvalidUri");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let once = normalize(r"c:\Users\me\my file.ts").unwrap();
        let twice = normalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_from_path_requires_absolute() {
        assert!(from_path(Path::new("/work")).is_ok());
        assert!(from_path(Path::new("relative")).is_err());
    }
}
