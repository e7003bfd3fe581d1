use crate::error::IngestError;

/// Path segment for raw uploads: `{owner_id}/photos/{photo_id}.{ext}`.
pub const PHOTOS_SEGMENT: &str = "photos";
/// Path segment for pipeline output: `{owner_id}/thumbnails/{photo_id}.{ext}`.
pub const THUMBNAILS_SEGMENT: &str = "thumbnails";

/// The parts of a raw-upload object key.
///
/// The category segment is the sole discriminator between user uploads and
/// pipeline output, so the pipeline never reprocesses its own thumbnails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPhotoKey {
    pub owner_id: String,
    pub photo_id: String,
    /// The decoded object key as stored in the bucket.
    pub key: String,
}

/// Decode an object key as delivered in an S3 event notification.
///
/// Event payloads URL-encode keys and use `+` for spaces (unquote-plus
/// semantics), so both transformations are reversed here.
pub fn decode_event_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// Whether a key lives under any owner's thumbnail namespace.
pub fn is_thumbnail_key(key: &str) -> bool {
    key.contains(&format!("/{}/", THUMBNAILS_SEGMENT))
}

/// Parse an object key by the fixed `{owner_id}/{category}/{filename}`
/// convention. `photo_id` is the filename with its extension stripped.
///
/// Only keys in the raw-upload category are accepted. A key under any other
/// category has no thumbnail-key derivation: substituting the category
/// segment would be a no-op and the thumbnail would overwrite the source
/// object, whose ObjectCreated event would re-trigger ingestion forever.
pub fn parse_photo_key(key: &str) -> Result<ParsedPhotoKey, IngestError> {
    let segments: Vec<&str> = key.split('/').collect();
    if segments.len() < 3 {
        return Err(IngestError::MalformedKey(key.to_string()));
    }

    let owner_id = segments[0];
    let filename = segments[2];
    if owner_id.is_empty() || filename.is_empty() {
        return Err(IngestError::MalformedKey(key.to_string()));
    }

    if segments[1] != PHOTOS_SEGMENT {
        return Err(IngestError::MalformedKey(key.to_string()));
    }

    let photo_id = filename
        .split('.')
        .next()
        .unwrap_or(filename)
        .to_string();
    if photo_id.is_empty() {
        return Err(IngestError::MalformedKey(key.to_string()));
    }

    Ok(ParsedPhotoKey {
        owner_id: owner_id.to_string(),
        photo_id,
        key: key.to_string(),
    })
}

/// Build the raw-upload key for a new photo.
pub fn raw_photo_key(owner_id: &str, photo_id: &str, ext: &str) -> String {
    format!("{owner_id}/{PHOTOS_SEGMENT}/{photo_id}.{ext}")
}

/// Derive the thumbnail key from a raw-upload key by swapping the category
/// segment. The derivation is deterministic so redelivered events overwrite
/// the same thumbnail.
pub fn thumbnail_key_for(raw_key: &str) -> String {
    raw_key.replace(
        &format!("/{}/", PHOTOS_SEGMENT),
        &format!("/{}/", THUMBNAILS_SEGMENT),
    )
}

/// Prefix under which all of an owner's objects (raw and thumbnails) live.
pub fn owner_prefix(owner_id: &str) -> String {
    format!("{owner_id}/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_key() {
        let parsed = parse_photo_key("u1/photos/abc.jpg").unwrap();
        assert_eq!(parsed.owner_id, "u1");
        assert_eq!(parsed.photo_id, "abc");
        assert_eq!(parsed.key, "u1/photos/abc.jpg");
    }

    #[test]
    fn test_parse_strips_extension_only_once() {
        let parsed = parse_photo_key("u1/photos/abc.tar.gz").unwrap();
        assert_eq!(parsed.photo_id, "abc");
    }

    #[test]
    fn test_parse_rejects_short_keys() {
        assert!(matches!(
            parse_photo_key("u1/abc.jpg"),
            Err(IngestError::MalformedKey(_))
        ));
        assert!(matches!(
            parse_photo_key("abc.jpg"),
            Err(IngestError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_parse_rejects_foreign_category() {
        // No thumbnail key can be derived for these; accepting them would
        // overwrite the source object in place.
        assert!(matches!(
            parse_photo_key("u1/videos/abc.jpg"),
            Err(IngestError::MalformedKey(_))
        ));
        assert!(matches!(
            parse_photo_key("u1/thumbnails/abc.jpg"),
            Err(IngestError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_parse_rejects_empty_segments() {
        assert!(parse_photo_key("/photos/abc.jpg").is_err());
        assert!(parse_photo_key("u1/photos/").is_err());
    }

    #[test]
    fn test_thumbnail_guard() {
        assert!(is_thumbnail_key("u1/thumbnails/abc.png"));
        assert!(!is_thumbnail_key("u1/photos/abc.jpg"));
        assert!(!is_thumbnail_key("thumbnails/photos/abc.jpg"));
    }

    #[test]
    fn test_thumbnail_key_derivation() {
        assert_eq!(
            thumbnail_key_for("u1/photos/abc.jpg"),
            "u1/thumbnails/abc.jpg"
        );
    }

    #[test]
    fn test_raw_photo_key_format() {
        assert_eq!(raw_photo_key("u1", "abc", "jpg"), "u1/photos/abc.jpg");
    }

    #[test]
    fn test_decode_event_key() {
        assert_eq!(decode_event_key("u1/photos/my%20cat.jpg"), "u1/photos/my cat.jpg");
        assert_eq!(decode_event_key("u1/photos/my+cat.jpg"), "u1/photos/my cat.jpg");
        assert_eq!(decode_event_key("u1/photos/abc.jpg"), "u1/photos/abc.jpg");
    }
}
