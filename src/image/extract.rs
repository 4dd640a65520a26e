// Reference extraction: assigns stable IDs to image parts and picks up
// human-written [Image #n] citations next to them.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::ImageReference;

static IMAGE_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[Image\s*#(\d+)\]").unwrap());

pub(crate) fn image_number_re() -> &'static Regex {
    &IMAGE_NUMBER_RE
}

fn part_type(item: &Value) -> Option<&str> {
    item.get("type").and_then(Value::as_str)
}

pub(crate) fn is_image_part(item: &Value) -> bool {
    matches!(part_type(item), Some("image") | Some("image_url"))
}

/// Walk a message's content array and derive an `ImageReference` for every
/// image part, keyed by content-part index.
///
/// IDs are `#<msg_idx>_<counter>`, with the counter continuing from
/// `start_counter` so they stay unique across the whole request. For each
/// image, only the first text part that follows it (skipping any non-text
/// parts in between) is scanned for a `[Image #n]` citation; later text
/// parts are never consulted.
pub fn extract_image_references(
    content: &[Value],
    msg_idx: usize,
    start_counter: usize,
) -> BTreeMap<usize, ImageReference> {
    let mut references = BTreeMap::new();
    let mut image_id_counter = start_counter;

    for (i, item) in content.iter().enumerate() {
        if !is_image_part(item) {
            continue;
        }

        let image_id = format!("#{}_{}", msg_idx, image_id_counter);
        image_id_counter += 1;

        let mut found_number = 0u32;
        for next in &content[i + 1..] {
            match part_type(next) {
                Some("text") => {
                    if let Some(text) = next.get("text").and_then(Value::as_str) {
                        if let Some(caps) = IMAGE_NUMBER_RE.captures(text) {
                            if let Ok(num) = caps[1].parse() {
                                found_number = num;
                            }
                        }
                    }
                    break;
                }
                _ => continue,
            }
        }

        references.insert(
            i,
            ImageReference {
                image_id,
                number: found_number,
            },
        );
    }

    references
}

/// Pull the base64 payload out of a data URI, or pass a bare payload
/// through unchanged.
pub fn extract_base64(data: &str) -> &str {
    if data.starts_with("data:") {
        if let Some((_, payload)) = data.split_once(',') {
            return payload;
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(s: &str) -> Value {
        json!({ "type": "text", "text": s })
    }

    fn image_url(url: &str) -> Value {
        json!({ "type": "image_url", "image_url": { "url": url } })
    }

    fn image(data: &str) -> Value {
        json!({ "type": "image", "source": { "media_type": "image/png", "data": data } })
    }

    #[test]
    fn test_assigns_sequential_ids() {
        let content = vec![image("a"), image("b"), text("hello")];
        let refs = extract_image_references(&content, 2, 5);

        assert_eq!(refs.len(), 2);
        assert_eq!(refs[&0].image_id, "#2_5");
        assert_eq!(refs[&1].image_id, "#2_6");
    }

    #[test]
    fn test_number_from_first_following_text_only() {
        let content = vec![
            image_url("a"),
            text("no citation here"),
            text("see [Image #3]"),
        ];
        let refs = extract_image_references(&content, 0, 1);

        // Only the immediately following text part counts.
        assert_eq!(refs[&0].number, 0);
    }

    #[test]
    fn test_number_found_with_whitespace_variants() {
        let content = vec![image_url("a"), text("see [Image #2] and more")];
        let refs = extract_image_references(&content, 0, 1);
        assert_eq!(refs[&0].number, 2);

        let content = vec![image_url("a"), text("see [Image  #7]")];
        let refs = extract_image_references(&content, 0, 1);
        assert_eq!(refs[&0].number, 7);
    }

    #[test]
    fn test_scan_skips_intervening_images() {
        // The text after image B is the first text part for both images.
        let content = vec![image("a"), image("b"), text("see [Image #1]")];
        let refs = extract_image_references(&content, 0, 1);

        assert_eq!(refs[&0].number, 1);
        assert_eq!(refs[&1].number, 1);
    }

    #[test]
    fn test_no_following_text_means_zero() {
        let content = vec![text("leading"), image_url("a")];
        let refs = extract_image_references(&content, 0, 1);

        assert_eq!(refs.len(), 1);
        assert_eq!(refs[&1].number, 0);
    }

    #[test]
    fn test_rewritten_ids_do_not_match() {
        let content = vec![image_url("a"), text("see [Image #0_1]")];
        let refs = extract_image_references(&content, 0, 1);

        // Stable IDs carry an underscore and never re-match as numbers.
        assert_eq!(refs[&0].number, 0);
    }

    #[test]
    fn test_extract_base64() {
        assert_eq!(extract_base64("data:image/png;base64,AAA"), "AAA");
        assert_eq!(extract_base64("AAA"), "AAA");
        assert_eq!(extract_base64("data:nocomma"), "data:nocomma");
    }
}
