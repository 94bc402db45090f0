use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;

/// Pulls the JSON payload out of model text that may carry a markdown fence or a
/// sentence of preamble around it.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let closer = match text.as_bytes()[start] {
        b'{' => '}',
        _ => ']',
    };
    let end = text.rfind(closer)?;
    (end > start).then(|| &text[start..=end])
}

pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let payload = extract_json(text).ok_or_else(|| anyhow!("no JSON object in model output"))?;
    serde_json::from_str(payload).context("model output did not match the expected shape")
}

/// Model JSON sometimes carries numbers or booleans where strings were asked for.
pub fn value_to_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Probe {
        ok: bool,
    }

    #[test]
    fn strips_fences_and_preamble() {
        let text = "Sure, here you go:\n```json\n{\"ok\": true}\n```";
        let probe: Probe = parse_json(text).unwrap();
        assert!(probe.ok);
    }

    #[test]
    fn finds_bare_arrays() {
        assert_eq!(extract_json("result: [1, 2]"), Some("[1, 2]"));
    }

    #[test]
    fn rejects_text_without_json() {
        assert!(extract_json("I can't see the screen").is_none());
        assert!(parse_json::<Probe>("{ nope").is_err());
    }

    #[test]
    fn stringifies_scalars() {
        assert_eq!(value_to_string(serde_json::json!(42)), Some("42".into()));
        assert_eq!(value_to_string(serde_json::json!("x")), Some("x".into()));
        assert_eq!(value_to_string(serde_json::Value::Null), None);
    }
}
