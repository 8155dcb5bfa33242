/// Vector index collections are named per document and the name is the sole
/// key into the index, so it has to stay stable for the document's lifetime
/// and fit the index naming limit.
pub const MAX_COLLECTION_NAME_LEN: usize = 120;

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Deterministic collection name: `chat_<chatId>_<uploadMillis>_<sanitized
/// fileName>`, truncated to MAX_COLLECTION_NAME_LEN.
pub fn collection_name(chat_id: i32, uploaded_at_millis: i64, file_name: &str) -> String {
    let full = format!(
        "chat_{}_{}_{}",
        chat_id,
        uploaded_at_millis,
        sanitize_component(file_name)
    );

    if full.len() > MAX_COLLECTION_NAME_LEN {
        full[..MAX_COLLECTION_NAME_LEN].to_string()
    } else {
        full
    }
}
