//! Pull a JSON document out of free-form model output.

use serde_json::Value;

/// Ways of locating a JSON object inside a model response, tried in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonCandidate {
    /// Content of a ```json fenced block
    FencedJson,
    /// Content of any ``` fenced block
    FencedAny,
    /// From the first '{' to the last '}'
    BraceSlice,
    /// The whole response, trimmed
    Raw,
}

impl JsonCandidate {
    pub const ORDER: [JsonCandidate; 4] = [
        JsonCandidate::FencedJson,
        JsonCandidate::FencedAny,
        JsonCandidate::BraceSlice,
        JsonCandidate::Raw,
    ];

    pub fn locate<'a>(&self, text: &'a str) -> Option<&'a str> {
        match self {
            JsonCandidate::FencedJson => {
                let start = text.find("```json")?;
                let rest = &text[start + 7..];
                let end = rest.find("```")?;
                Some(rest[..end].trim())
            }
            JsonCandidate::FencedAny => {
                let start = text.find("```")?;
                let rest = &text[start + 3..];
                let end = rest.find("```")?;
                // drop an optional language tag on the opening fence
                let body = match rest[..end].split_once('\n') {
                    Some((tag, body)) if !tag.trim().contains(['{', '[']) => body,
                    _ => &rest[..end],
                };
                Some(body.trim())
            }
            JsonCandidate::BraceSlice => {
                let start = text.find('{')?;
                let end = text.rfind('}')?;
                (end > start).then(|| &text[start..=end])
            }
            JsonCandidate::Raw => Some(text.trim()),
        }
    }
}

/// First candidate that parses as JSON, with the strategy that found it.
pub fn extract_json(text: &str) -> Option<(JsonCandidate, Value)> {
    JsonCandidate::ORDER.iter().find_map(|strategy| {
        let slice = strategy.locate(text)?;
        serde_json::from_str::<Value>(slice).ok().map(|v| (*strategy, v))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_wins() {
        let text = "Aquí está:\n```json\n{\"a\": 1}\n```\nfin";
        let (strategy, value) = extract_json(text).unwrap();
        assert_eq!(strategy, JsonCandidate::FencedJson);
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn any_fence_with_language_tag() {
        let text = "```javascript\n{\"b\": [1, 2]}\n```";
        let (strategy, value) = extract_json(text).unwrap();
        assert_eq!(strategy, JsonCandidate::FencedAny);
        assert_eq!(value["b"][1], 2);
    }

    #[test]
    fn brace_slice_after_preamble() {
        let text = "Claro, la clasificación es {\"economia\": []} espero que sirva";
        let (strategy, value) = extract_json(text).unwrap();
        assert_eq!(strategy, JsonCandidate::BraceSlice);
        assert!(value["economia"].is_array());
    }

    #[test]
    fn raw_array() {
        let (strategy, value) = extract_json("  [1, 2, 3] ").unwrap();
        assert_eq!(strategy, JsonCandidate::Raw);
        assert_eq!(value.as_array().unwrap().len(), 3);
    }

    #[test]
    fn unparseable_is_none() {
        assert!(extract_json("no hay json aquí").is_none());
    }
}
