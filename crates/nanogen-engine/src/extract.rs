use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{Map, Value};

use nanogen_contracts::error::{GenerateError, Result};
use nanogen_contracts::format::{detect, DetectedFormat};

const DEFAULT_REPORTED_MIME: &str = "image/png";

/// Decoded image plus what the server claimed about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub format: DetectedFormat,
    pub reported_mime_type: String,
}

impl GeneratedImage {
    pub fn mime_mismatch(&self) -> bool {
        !self
            .reported_mime_type
            .eq_ignore_ascii_case(self.format.mime_type)
    }
}

/// Pulls the first inline image from `candidates[0].content.parts`.
pub fn extract_image(response: &Value, warnings: &mut Vec<String>) -> Result<GeneratedImage> {
    let candidate = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .ok_or_else(|| GenerateError::response_shape("no candidates in response"))?;
    let parts = candidate
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if let Some(inline) = parts.iter().find_map(inline_data) {
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| GenerateError::response_shape("inline image has no data"))?;
        let bytes = BASE64.decode(data.trim().as_bytes()).map_err(|err| {
            GenerateError::response_shape(format!("image base64 decode failed: {err}"))
        })?;
        if bytes.is_empty() {
            return Err(GenerateError::response_shape("inline image has no data"));
        }
        let reported_mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_REPORTED_MIME)
            .to_string();
        let image = GeneratedImage {
            format: detect(&bytes),
            bytes,
            reported_mime_type,
        };
        if image.mime_mismatch() {
            warnings.push(format!(
                "Note: API reported {}, actual format is {}",
                image.reported_mime_type, image.format.mime_type
            ));
        }
        return Ok(image);
    }

    let model_text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .map(str::to_string)
        .collect::<Vec<_>>();
    Err(GenerateError::ResponseShape {
        reason: "no image data in response".to_string(),
        model_text,
    })
}

fn inline_data(part: &Value) -> Option<&Map<String, Value>> {
    part.get("inlineData")
        .or_else(|| part.get("inline_data"))
        .and_then(Value::as_object)
}
