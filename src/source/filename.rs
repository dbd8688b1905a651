//! Naming helpers: channel reference normalisation and media filenames.

/// Kind of attachment as reported by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Document,
    Photo,
}

/// Normalise a channel reference to the bare form the feed expects.
///
/// Accepts `https://t.me/name`, `t.me/name`, `@name`, `name`, and numeric
/// ids such as `-1001234567890` (returned unchanged).
pub fn clean_channel_ref(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let without_host = without_scheme
        .strip_prefix("t.me/")
        .or_else(|| without_scheme.strip_prefix("telegram.me/"))
        .unwrap_or(without_scheme);
    let name = without_host.trim_start_matches('@');
    // Message links (t.me/name/123) and query strings point into the same channel.
    let name = name.split(['/', '?']).next().unwrap_or(name);
    name.to_string()
}

/// Filename an attachment is stored under.
///
/// Documents keep their own file name when they carry one; otherwise the
/// name is derived from the media id plus the MIME subtype. Photos never
/// carry a name and are always stored as JPEG.
pub fn media_filename(
    kind: MediaKind,
    media_id: i64,
    file_name: Option<&str>,
    mime_type: Option<&str>,
) -> String {
    match kind {
        MediaKind::Photo => format!("photo_{}.jpg", media_id),
        MediaKind::Document => {
            if let Some(name) = file_name.filter(|n| !n.trim().is_empty()) {
                return name.to_string();
            }
            let ext = mime_type
                .and_then(|m| m.rsplit('/').next())
                .filter(|e| !e.is_empty());
            match ext {
                Some(ext) => format!("document_{}.{}", media_id, ext),
                None => format!("document_{}", media_id),
            }
        }
    }
}
