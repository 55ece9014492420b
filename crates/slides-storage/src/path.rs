use chrono::Utc;

/// Strip everything except ASCII letters, digits, `-` and `_`, so an id
/// can be used as a single path segment.
pub fn sanitize_presentation_id(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// `img-{unix_millis}-{12 hex}.{ext}`. The extension is the lowercased text
/// after the last dot of the original name, `jpg` when there is no dot.
pub fn unique_filename(original_name: &str) -> String {
    let timestamp = Utc::now().timestamp_millis();
    let random: [u8; 6] = rand::random();
    format!("img-{}-{}.{}", timestamp, hex::encode(random), extension(original_name))
}

fn extension(name: &str) -> String {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    if ext.is_empty() { "jpg".to_string() } else { ext }
}

/// Object key for an image inside the bucket. `presentation_id` must
/// already be sanitized.
pub fn object_path(presentation_id: &str, file_name: &str) -> String {
    format!("presentations/{}/{}", presentation_id, file_name)
}
