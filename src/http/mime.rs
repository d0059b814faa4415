//! Best-guess `Content-Type` inference from a path's file extension.

/// Returns the MIME type for the extension of the last segment of `path`.
///
/// Matching is case-insensitive. Paths without an extension, or with an
/// extension not in the table, yield `None`.
///
/// # Examples
///
/// ```
/// use rttp_provide::http::mime::content_type_for;
///
/// assert_eq!(content_type_for("/3f2a.json"), Some("application/json"));
/// assert_eq!(content_type_for("/data.CSV"), Some("text/csv"));
/// assert_eq!(content_type_for("/no-extension"), None);
/// ```
pub fn content_type_for(path: &str) -> Option<&'static str> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let (_, extension) = file_name.rsplit_once('.')?;

    let mime = match extension.to_ascii_lowercase().as_str() {
        "txt" | "text" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "tsv" => "text/tab-separated-values",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "geojson" => "application/geo+json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "arrow" | "parquet" => "application/octet-stream",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "wasm" => "application/wasm",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions() {
        assert_eq!(content_type_for("hello_world.txt"), Some("text/plain"));
        assert_eq!(content_type_for("/a/b/chart.svg"), Some("image/svg+xml"));
        assert_eq!(content_type_for("/index.html"), Some("text/html"));
    }

    #[test]
    fn only_last_segment_counts() {
        assert_eq!(content_type_for("/v1.json/raw"), None);
    }

    #[test]
    fn unknown_or_missing_extension() {
        assert_eq!(content_type_for("/blob.xyz"), None);
        assert_eq!(content_type_for("/"), None);
        assert_eq!(content_type_for("/d41d8cd98f00b204e9800998ecf8427e"), None);
    }
}
