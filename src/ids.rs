use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Provider and UI ids arrive as JSON strings or numbers; both become strings.
/// Blank strings count as absent.
pub fn loose_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
