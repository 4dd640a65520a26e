// Citation rewriting: Pass A turns user-written [Image #n] citations into
// stable-ID form; Pass B substitutes full descriptions for recognized
// images and their citations.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use super::extract::{image_number_re, is_image_part};
use super::{ImageReference, ImageResult};

/// Pass A: rewrite every `[Image #n]` citation in every text part against
/// the active ID list: `[Image #1]` -> `[Image <active_ids[0]>]` and so on.
/// Out-of-range numbers are left untouched. Idempotent: rewritten tokens
/// contain an underscore and no longer match the citation pattern.
pub fn fill_image_ids_by_number(content: &mut [Value], active_ids: &[String]) {
    let re = image_number_re();

    for item in content.iter_mut() {
        if item.get("type").and_then(Value::as_str) != Some("text") {
            continue;
        }
        let Some(text) = item.get("text").and_then(Value::as_str) else {
            continue;
        };

        let rewritten = re.replace_all(text, |caps: &regex::Captures| {
            let number: usize = match caps[1].parse() {
                Ok(n) => n,
                Err(_) => return caps[0].to_string(),
            };
            match number.checked_sub(1).and_then(|idx| active_ids.get(idx)) {
                Some(id) => {
                    tracing::debug!("filled citation [Image #{}] -> [Image {}]", number, id);
                    format!("[Image {}]", id)
                }
                None => {
                    tracing::debug!(
                        "citation [Image #{}] out of range ({} active images), left as-is",
                        number,
                        active_ids.len()
                    );
                    caps[0].to_string()
                }
            }
        });

        if rewritten != text {
            let new_text = rewritten.into_owned();
            *item = json!({ "type": "text", "text": new_text });
        }
    }
}

/// The preamble spliced in front of every recognized description.
pub fn build_image_prefix(reference: &ImageReference) -> String {
    format!(
        "[Image {}] 以下是系统自动识别的图片内容描述：\n\n",
        reference.image_id
    )
}

/// Pass B: apply recognition results to a content array in place.
///
/// First every successful result replaces its image part with a text part
/// holding the prefixed description. Then, for each of those images, every
/// text part between it and the next remaining image part (or the end of
/// the array) has literal `[Image <id>]` citations replaced with the full
/// prefixed description. Failed images are left untouched.
pub fn apply_recognition_results(
    content: &mut [Value],
    results: &[ImageResult],
    references: &BTreeMap<usize, ImageReference>,
) {
    let mut substitutions: BTreeMap<usize, (String, String)> = BTreeMap::new();

    for result in results {
        if !result.success {
            continue;
        }
        let Some(reference) = references.get(&result.content_index) else {
            continue;
        };
        let full_text = format!("{}{}", build_image_prefix(reference), result.text);

        content[result.content_index] = json!({ "type": "text", "text": full_text.clone() });
        tracing::info!(
            "replaced content[{}] image with its description (ID: {})",
            result.content_index,
            reference.image_id
        );

        substitutions.insert(
            result.content_index,
            (reference.image_id.clone(), full_text),
        );
    }

    for (&image_index, (image_id, full_text)) in &substitutions {
        let identifier = format!("[Image {}]", image_id);

        let next_image_index = content[image_index + 1..]
            .iter()
            .position(is_image_part)
            .map(|offset| image_index + 1 + offset)
            .unwrap_or(content.len());

        let mut replaced = 0;
        for item in &mut content[image_index + 1..next_image_index] {
            if item.get("type").and_then(Value::as_str) != Some("text") {
                continue;
            }
            let Some(text) = item.get("text").and_then(Value::as_str) else {
                continue;
            };
            if text.contains(&identifier) {
                replaced += text.matches(&identifier).count();
                let new_text = text.replace(&identifier, full_text);
                *item = json!({ "type": "text", "text": new_text });
            }
        }

        if replaced > 0 {
            tracing::info!(
                "spliced description for image {} into {} later citation(s)",
                image_id,
                replaced
            );
        }
    }
}
