// Vision-offload middleware: finds inline images in a conversation,
// describes them through the vision model, and splices the descriptions
// back into the request in place.

mod extract;
mod pipeline;
mod rewrite;

pub use extract::{extract_base64, extract_image_references};
pub use pipeline::ImagePipeline;
pub use rewrite::{apply_recognition_results, build_image_prefix, fill_image_ids_by_number};

/// A pending recognition for one cache-miss image.
#[derive(Debug, Clone)]
pub struct ImageTask {
    /// Index of the image part within its message's content array.
    pub content_index: usize,
    pub base64_data: String,
    /// SHA-256 hex digest of the base64 payload; the cache key.
    pub image_hash: String,
    pub image_id: String,
}

/// Outcome of one recognition task.
#[derive(Debug, Clone)]
pub struct ImageResult {
    pub content_index: usize,
    pub text: String,
    pub success: bool,
}

/// Identity derived for each image part during extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Stable identifier of form `#<messageIndex>_<globalCounter>`.
    pub image_id: String,
    /// The number cited in the first following text part (`[Image #n]`),
    /// or 0 when the image is never cited there.
    pub number: u32,
}
