//! Turning raw model text into detections.
//!
//! Vision models are told to answer with a bare JSON array, but in practice
//! they wrap it in ```` ```json ```` fences, run out of tokens mid-fence, or
//! put literal line breaks inside string values. The contract here is:
//!
//! 1. strip fences (terminated or not)
//! 2. parse; on failure repair raw newlines inside strings and parse once more
//! 3. accept an array or a single object; skip malformed elements
//!
//! A second parse failure is a [`PageError::DetectionParse`]; what happens
//! next is up to [`crate::config::ParseFailurePolicy`].

use crate::document::{normalize_label, BBox, Detection};
use crate::error::PageError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

static RE_FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[\w-]*[ \t]*\r?\n?(.*?)```").unwrap());

static RE_STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(?:[^"\\]|\\.)*""#).unwrap());

/// One element of the model's answer.
#[derive(Debug, Deserialize)]
struct RawDetection {
    #[serde(alias = "bbox")]
    bbox_2d: [f64; 4],
    label: String,
}

/// Extract the JSON payload from model text.
///
/// Takes the body of the first fenced block if there is one. A leading fence
/// with no closing fence (token cap hit) loses only its opening line.
/// Otherwise the trimmed text is returned unchanged.
pub fn strip_fences(raw: &str) -> String {
    if let Some(caps) = RE_FENCED_BLOCK.captures(raw) {
        return caps[1].trim().to_string();
    }
    let trimmed = raw.trim();
    if trimmed.starts_with("```") {
        return match trimmed.split_once('\n') {
            Some((_, rest)) => rest.trim().to_string(),
            None => String::new(),
        };
    }
    trimmed.to_string()
}

/// Escape raw line breaks and tabs that sit inside JSON string literals.
///
/// Text outside string literals is left alone, so repairing already-valid
/// JSON is a no-op.
pub fn repair_json(text: &str) -> String {
    RE_STRING_LITERAL
        .replace_all(text, |caps: &regex::Captures| {
            caps[0]
                .replace('\r', "\\r")
                .replace('\n', "\\n")
                .replace('\t', "\\t")
        })
        .into_owned()
}

/// Parse model output for page `page` (1-based) into detections.
///
/// Labels are mapped onto `vocabulary` with [`normalize_label`].
pub fn parse_detections(raw: &str, page: usize, vocabulary: &[String]) -> Result<Vec<Detection>, PageError> {
    let body = strip_fences(raw);

    let value: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(first) => {
            warn!("Page {}: detection JSON invalid ({}), attempting repair", page, first);
            serde_json::from_str(&repair_json(&body)).map_err(|e| PageError::DetectionParse {
                page,
                detail: e.to_string(),
            })?
        }
    };

    let items = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(PageError::DetectionParse {
                page,
                detail: format!("expected a JSON array or object, got {}", json_type(&other)),
            })
        }
    };

    let mut detections = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<RawDetection>(item) {
            Ok(raw) => detections.push(Detection::new(
                BBox::from_f64(raw.bbox_2d),
                normalize_label(&raw.label, vocabulary),
            )),
            Err(e) => warn!("Page {}: skipping malformed detection #{}: {}", page, i, e),
        }
    }
    debug!("Page {}: parsed {} detections", page, detections.len());
    Ok(detections)
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::OTHER_LABEL;

    fn vocab() -> Vec<String> {
        vec!["names".into(), "address".into(), "signature".into(), OTHER_LABEL.into()]
    }

    const PLAIN: &str = r#"[{"bbox_2d": [10, 20, 110, 40], "label": "names"}, {"bbox_2d": [5, 60, 300, 90], "label": "address"}]"#;

    #[test]
    fn empty_array_yields_no_detections() {
        assert!(parse_detections("[]", 1, &vocab()).unwrap().is_empty());
        assert!(parse_detections("```json\n[]\n```", 1, &vocab()).unwrap().is_empty());
    }

    #[test]
    fn fenced_and_plain_parse_identically() {
        let plain = parse_detections(PLAIN, 1, &vocab()).unwrap();
        let fenced = parse_detections(&format!("```json\n{PLAIN}\n```"), 1, &vocab()).unwrap();
        let bare_fence = parse_detections(&format!("```\n{PLAIN}\n```"), 1, &vocab()).unwrap();
        let chatty = parse_detections(
            &format!("Here are the boxes:\n```json\n{PLAIN}\n```\nLet me know!"),
            1,
            &vocab(),
        )
        .unwrap();
        assert_eq!(plain.len(), 2);
        assert_eq!(plain, fenced);
        assert_eq!(plain, bare_fence);
        assert_eq!(plain, chatty);
    }

    #[test]
    fn unterminated_fence_is_dropped() {
        let truncated = format!("```json\n{PLAIN}");
        assert_eq!(strip_fences(&truncated), PLAIN);
        assert_eq!(parse_detections(&truncated, 1, &vocab()).unwrap().len(), 2);
    }

    #[test]
    fn raw_newline_in_label_is_repaired() {
        let broken = "[{\"bbox_2d\": [1, 2, 3, 4], \"label\": \"na\nmes\"}]";
        assert!(serde_json::from_str::<Value>(broken).is_err());
        let found = parse_detections(broken, 3, &vocab()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bbox, BBox::new(1, 2, 3, 4));
        assert_eq!(found[0].label, OTHER_LABEL);
    }

    #[test]
    fn repair_is_idempotent() {
        let broken = "[{\"label\": \"a\r\nb\", \"bbox_2d\": [0,0,1,1]}]";
        let once = repair_json(broken);
        assert_eq!(repair_json(&once), once);
        assert_eq!(repair_json(PLAIN), PLAIN);
    }

    #[test]
    fn escaped_newline_is_left_alone() {
        let escaped = r#"[{"bbox_2d": [1, 2, 3, 4], "label": "names\nx"}]"#;
        assert!(serde_json::from_str::<Value>(escaped).is_ok());
        assert_eq!(repair_json(escaped), escaped);
        let value: Value = serde_json::from_str(&repair_json(escaped)).unwrap();
        assert_eq!(value[0]["label"], "names\nx");
    }

    #[test]
    fn single_object_becomes_one_element_list() {
        let found = parse_detections(r#"{"bbox_2d": [0, 0, 5, 5], "label": "signature"}"#, 1, &vocab()).unwrap();
        assert_eq!(found, vec![Detection::new(BBox::new(0, 0, 5, 5), "signature")]);
    }

    #[test]
    fn bbox_alias_is_accepted() {
        let found = parse_detections(r#"[{"bbox": [0.5, 0.5, 4.2, 4.0], "label": "Names"}]"#, 1, &vocab()).unwrap();
        assert_eq!(found[0].bbox, BBox::new(0, 0, 5, 4));
        assert_eq!(found[0].label, "names");
    }

    #[test]
    fn malformed_items_are_skipped() {
        let raw = r#"[{"bbox_2d": [1, 2, 3], "label": "names"}, {"label": "address"}, {"bbox_2d": [0, 0, 9, 9], "label": "address"}]"#;
        let found = parse_detections(raw, 1, &vocab()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].label, "address");
    }

    #[test]
    fn unparseable_output_is_a_parse_error() {
        let err = parse_detections("I could not find any PII, sorry.", 4, &vocab()).unwrap_err();
        assert!(matches!(err, PageError::DetectionParse { page: 4, .. }));
    }

    #[test]
    fn scalar_json_is_a_parse_error() {
        let err = parse_detections("42", 1, &vocab()).unwrap_err();
        match err {
            PageError::DetectionParse { detail, .. } => assert!(detail.contains("a number")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
