// Orchestration: extraction, cache lookup, concurrent vision fan-out and
// in-place substitution, for both wire formats.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::cache::{self, ImageCache};
use crate::vision::VisionClient;

use super::extract::{extract_base64, extract_image_references};
use super::rewrite::{apply_recognition_results, build_image_prefix, fill_image_ids_by_number};
use super::{ImageReference, ImageResult, ImageTask};

/// Per-message snapshot taken on the first pass over an Anthropic request.
struct MessageSnapshot {
    references: BTreeMap<usize, ImageReference>,
    /// Stable IDs of the most recent image group at this point in the
    /// conversation; citations in this message resolve against these.
    active_ids: Vec<String>,
}

pub struct ImagePipeline {
    vision: VisionClient,
    cache: Option<Arc<ImageCache>>,
}

impl ImagePipeline {
    pub fn new(vision: VisionClient, cache: Option<Arc<ImageCache>>) -> Self {
        Self { vision, cache }
    }

    /// Build a pipeline wired to the process-wide cache and the default
    /// vision endpoint.
    pub fn from_globals() -> Self {
        Self::new(VisionClient::default(), cache::global())
    }

    /// Replace inline images in an OpenAI-style chat request with textual
    /// descriptions. Mutates the request in place; failures only ever leave
    /// individual image parts untouched.
    pub async fn process_openai(&self, request: &mut Value, auth_header: &str) {
        let api_key = strip_bearer(auth_header).to_string();
        let Some(messages) = request.get_mut("messages").and_then(Value::as_array_mut) else {
            return;
        };

        let mut global_counter = 1usize;
        for (msg_idx, message) in messages.iter_mut().enumerate() {
            let Some(content) = message.get_mut("content").and_then(Value::as_array_mut) else {
                continue;
            };

            let references = extract_image_references(content.as_slice(), msg_idx, global_counter);
            global_counter += references.len();
            if references.is_empty() {
                continue;
            }
            tracing::info!(
                "OpenAI API: message #{} carries {} image reference(s)",
                msg_idx,
                references.len()
            );

            let tasks = self.collect_openai_tasks(content, &references);
            let results = self
                .recognize_concurrently(tasks, &api_key, "OpenAI API")
                .await;
            apply_recognition_results(content, &results, &references);
        }
    }

    /// Replace inline images in an Anthropic-style messages request. Three
    /// passes over the whole request: snapshot references and propagate the
    /// active-ID list, rewrite citations in every message against its
    /// active list, then recognize and substitute per image-bearing message.
    pub async fn process_anthropic(&self, request: &mut Value, auth_header: &str) {
        let api_key = strip_bearer(auth_header).to_string();
        let Some(messages) = request.get_mut("messages").and_then(Value::as_array_mut) else {
            return;
        };
        tracing::info!(
            "Anthropic API: processing request with {} message(s)",
            messages.len()
        );

        let mut snapshots: Vec<MessageSnapshot> = Vec::with_capacity(messages.len());
        let mut current_active: Vec<String> = Vec::new();
        let mut global_counter = 1usize;

        for (msg_idx, message) in messages.iter().enumerate() {
            if let Some(role) = message.get("role").and_then(Value::as_str) {
                tracing::debug!("message #{} (role: {})", msg_idx, role);
            }

            let references = message
                .get("content")
                .and_then(Value::as_array)
                .map(|content| extract_image_references(content, msg_idx, global_counter))
                .unwrap_or_default();

            if !references.is_empty() {
                // A new image group supersedes the previous one as the
                // citation target, ordered by content-part index.
                current_active = references
                    .values()
                    .map(|reference| reference.image_id.clone())
                    .collect();
                global_counter += references.len();
                for (idx, reference) in &references {
                    tracing::debug!(
                        "  image[{}] -> ID: {}, number: #{}",
                        idx,
                        reference.image_id,
                        reference.number
                    );
                }
            }

            snapshots.push(MessageSnapshot {
                references,
                active_ids: current_active.clone(),
            });
        }

        for (msg_idx, snapshot) in snapshots.iter().enumerate() {
            if snapshot.active_ids.is_empty() {
                continue;
            }
            if let Some(content) = messages[msg_idx]
                .get_mut("content")
                .and_then(Value::as_array_mut)
            {
                fill_image_ids_by_number(content, &snapshot.active_ids);
                tracing::debug!(
                    "message #{} citations filled (active images: {:?})",
                    msg_idx,
                    snapshot.active_ids
                );
            }
        }

        for (msg_idx, snapshot) in snapshots.iter().enumerate() {
            if snapshot.references.is_empty() {
                continue;
            }
            let tasks = match messages[msg_idx]
                .get_mut("content")
                .and_then(Value::as_array_mut)
            {
                Some(content) => self.collect_anthropic_tasks(content, &snapshot.references),
                None => continue,
            };
            let results = self
                .recognize_concurrently(tasks, &api_key, "Anthropic API")
                .await;
            if let Some(content) = messages[msg_idx]
                .get_mut("content")
                .and_then(Value::as_array_mut)
            {
                apply_recognition_results(content, &results, &snapshot.references);
            }
            tracing::info!("message #{}: image handling finished", msg_idx);
        }
    }

    /// Collect recognition tasks from OpenAI-shape `image_url` parts,
    /// resolving cache hits in place as they are found.
    fn collect_openai_tasks(
        &self,
        content: &mut [Value],
        references: &BTreeMap<usize, ImageReference>,
    ) -> Vec<ImageTask> {
        let mut tasks = Vec::new();

        for (i, item) in content.iter_mut().enumerate() {
            if item.get("type").and_then(Value::as_str) != Some("image_url") {
                continue;
            }
            let Some(url) = item
                .get("image_url")
                .and_then(|v| v.get("url"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            let Some(reference) = references.get(&i) else {
                continue;
            };

            let base64_data = extract_base64(url).to_string();
            let image_hash = cache::compute_hash(&base64_data);

            if let Some(text) = self.cached_description(&image_hash, reference) {
                *item = json!({ "type": "text", "text": text });
                continue;
            }

            tasks.push(ImageTask {
                content_index: i,
                base64_data,
                image_hash,
                image_id: reference.image_id.clone(),
            });
        }

        tasks
    }

    /// Collect recognition tasks from Anthropic-shape `image` parts. Only
    /// sources whose media type is an image are considered; the base64 goes
    /// through the same extractor so data URIs are normalized.
    fn collect_anthropic_tasks(
        &self,
        content: &mut [Value],
        references: &BTreeMap<usize, ImageReference>,
    ) -> Vec<ImageTask> {
        let mut tasks = Vec::new();

        for (i, item) in content.iter_mut().enumerate() {
            if item.get("type").and_then(Value::as_str) != Some("image") {
                continue;
            }
            let Some(source) = item.get("source") else {
                continue;
            };
            let is_image_media = source
                .get("media_type")
                .and_then(Value::as_str)
                .is_some_and(|media_type| media_type.starts_with("image/"));
            if !is_image_media {
                continue;
            }
            let Some(data) = source.get("data").and_then(Value::as_str) else {
                continue;
            };
            let Some(reference) = references.get(&i) else {
                continue;
            };

            let base64_data = extract_base64(data).to_string();
            let image_hash = cache::compute_hash(&base64_data);

            if let Some(text) = self.cached_description(&image_hash, reference) {
                *item = json!({ "type": "text", "text": text });
                continue;
            }

            tasks.push(ImageTask {
                content_index: i,
                base64_data,
                image_hash,
                image_id: reference.image_id.clone(),
            });
        }

        tasks
    }

    /// Cache lookup; a hit comes back already prefixed for substitution.
    fn cached_description(&self, image_hash: &str, reference: &ImageReference) -> Option<String> {
        let cache = self.cache.as_ref()?;
        let cached = cache.get(image_hash)?;

        if reference.number > 0 {
            tracing::info!(
                "using cached description (hash: {}, ID: {}, number: #{})",
                &image_hash[..16],
                reference.image_id,
                reference.number
            );
        } else {
            tracing::info!(
                "using cached description (hash: {}, ID: {})",
                &image_hash[..16],
                reference.image_id
            );
        }

        Some(format!("{}{}", build_image_prefix(reference), cached))
    }

    /// Fan out one vision call per task and wait for all of them. Results
    /// arrive in completion order over a channel sized to the task count;
    /// they are keyed by content index, so application stays deterministic.
    async fn recognize_concurrently(
        &self,
        tasks: Vec<ImageTask>,
        api_key: &str,
        api_label: &str,
    ) -> Vec<ImageResult> {
        if tasks.is_empty() {
            return Vec::new();
        }
        tracing::info!(
            "{}: {} image(s) to recognize, dispatching concurrently",
            api_label,
            tasks.len()
        );

        let task_count = tasks.len();
        let (tx, mut rx) = mpsc::channel::<ImageResult>(task_count);

        for task in tasks {
            let tx = tx.clone();
            let vision = self.vision.clone();
            let cache = self.cache.clone();
            let api_key = api_key.to_string();

            tokio::spawn(async move {
                tracing::info!(
                    "recognizing image (hash: {}, ID: {})",
                    &task.image_hash[..16],
                    task.image_id
                );

                let result = match vision.analyze(&task.base64_data, &api_key, "").await {
                    Ok(description) => {
                        if let Some(cache) = &cache {
                            cache.set(&task.image_hash, &description);
                            tracing::info!(
                                "description cached (hash: {}, ID: {})",
                                &task.image_hash[..16],
                                task.image_id
                            );
                        }
                        ImageResult {
                            content_index: task.content_index,
                            text: description,
                            success: true,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            "image recognition failed (hash: {}, ID: {}): {}",
                            &task.image_hash[..16],
                            task.image_id,
                            e
                        );
                        ImageResult {
                            content_index: task.content_index,
                            text: String::new(),
                            success: false,
                        }
                    }
                };

                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(task_count);
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        tracing::info!("{}: all image recognitions finished", api_label);

        results
    }
}

fn strip_bearer(auth_header: &str) -> &str {
    auth_header.strip_prefix("Bearer ").unwrap_or(auth_header)
}
