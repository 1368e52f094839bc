/// Reduce a raw engine error to `<description> [SQL: <query>]`
///
/// The leading colon-delimited segment (driver prefix) is dropped. Messages
/// that do not carry both the prefix and an `[SQL: ...]` tail come back as-is.
pub fn simplify_sql_error_message(message: &str) -> String {
    let Some((head, tail)) = message.split_once("[SQL:") else {
        return message.to_string();
    };
    let Some((_, description)) = head.split_once(": ") else {
        return message.to_string();
    };

    let sql = match tail.rfind(']') {
        Some(end) => &tail[..end],
        None => tail,
    };

    format!("{} [SQL: {}]", description.trim(), sql.trim())
}
