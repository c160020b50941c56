//! Prompts for VLM-based PII detection.
//!
//! Every prompt lives here so that detection behaviour changes in one place
//! and unit tests can inspect the text without calling a model.
//!
//! Callers can replace the system prompt via
//! [`crate::config::RedactionConfig::system_prompt`]; the user instruction is
//! always built from the configured label vocabulary.

/// System prompt template. `{labels}` is replaced with the quoted vocabulary.
const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are a document redaction detector. You look at an image of a document page and locate every piece of personally identifiable information on it.

Your output must be ONLY a JSON array. Each element is an object of the form
{"bbox_2d": [x1, y1, x2, y2], "label": "<class>"}
where:
- x1, y1 is the top-left and x2, y2 the bottom-right corner, in pixels of the image you were given
- <class> is exactly one of: {labels}

If the page holds no private information, output [].
Do NOT add commentary, explanations or markdown fences."#;

/// Build the default system prompt for a label vocabulary.
pub fn detection_system_prompt(labels: &[String]) -> String {
    SYSTEM_PROMPT_TEMPLATE.replace("{labels}", &quoted_list(labels))
}

/// Build the user instruction sent alongside the page image.
pub fn detection_user_prompt(labels: &[String]) -> String {
    format!(
        "Detect and return bounding boxes for every instance of private information in this image. \
         This includes all of: {}. Do not skip any field. \
         Return a list of all bounding boxes and their labels in valid JSON.",
        quoted_list(labels)
    )
}

fn quoted_list(labels: &[String]) -> String {
    labels
        .iter()
        .map(|l| format!("'{}'", l))
        .collect::<Vec<_>>()
        .join(", ")
}
