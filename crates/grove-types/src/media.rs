//! Media-type classification for remote responses.

/// True if a `Content-Type` value names a textual media type.
///
/// `text/*` is textual, as are the JSON and XML families under
/// `application/` (including `+json`/`+xml` suffixes).
pub fn media_type_is_text(media_type: &str) -> bool {
    let essence = media_type.split(';').next().unwrap_or("").trim();
    let Some((kind, subtype)) = essence.split_once('/') else {
        return false;
    };
    if kind.is_empty() || subtype.is_empty() {
        return false;
    }
    match kind.to_ascii_lowercase().as_str() {
        "text" => true,
        "application" => {
            let subtype = subtype.to_ascii_lowercase();
            subtype == "json"
                || subtype.ends_with("+json")
                || subtype.ends_with(".json")
                || subtype == "xml"
                || subtype.ends_with("+xml")
                || subtype.ends_with(".xml")
        }
        _ => false,
    }
}
