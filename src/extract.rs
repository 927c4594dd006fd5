use serde_json::Value;

/// Extract the final agent message from a codex `--json` event stream.
///
/// Codex emits one JSON event per line; the message we want arrives as
/// `{"type":"item.completed","item":{"type":"agent_message","text":...}}`.
/// This is a fallback for runs where the tool's own `--output-last-message`
/// file was never written. The scan is tolerant: non-JSON lines and events
/// of other shapes are skipped.
pub fn extract_final_message(raw: &str) -> Option<String> {
    let mut last: Option<String> = None;
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || !trimmed.starts_with('{') {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(trimmed) else {
            continue;
        };
        if let Some(text) = agent_message_text(&event) {
            last = Some(text);
        }
    }
    last
}

fn agent_message_text(event: &Value) -> Option<String> {
    if event.get("type")?.as_str()? != "item.completed" {
        return None;
    }
    let item = event.get("item")?;
    if item.get("type")?.as_str()? != "agent_message" {
        return None;
    }
    let text = item.get("text")?.as_str()?;
    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
