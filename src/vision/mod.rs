// Vision model client: one-shot image description calls

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use serde_json::json;

const VISION_API_BASE: &str = "https://open.bigmodel.cn/api/paas/v4";

/// Default analysis prompt. Kept verbatim so that cached descriptions stay
/// compatible across deployments.
const DEFAULT_PROMPT: &str = "请详细全面地描述这张图片的内容，包括但不限于：\n\
1. 整体场景和环境（室内/室外、时间、天气等）\n\
2. 主要物体和人物（位置、大小、特征、动作、表情等）\n\
3. 颜色搭配和光影效果\n\
4. 构图和布局（前景、中景、背景）\n\
5. 文字内容（如果图片中包含文字，请完整识别并提取）\n\
6. 整体氛围、情绪和风格\n\
7. 其他值得注意的细节\n\n\
请用清晰、结构化的方式组织描述，确保信息准确完整。";

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: VISION_API_BASE.to_string(),
            model: "glm-4.6v".to_string(),
            temperature: 0.8,
            top_p: 0.6,
            max_tokens: 16384,
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: MessageContent,
}

#[derive(Debug, Default, Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone, Default)]
pub struct VisionClient {
    config: VisionConfig,
}

impl VisionClient {
    pub fn new(config: VisionConfig) -> Self {
        Self { config }
    }

    /// Describe a base64-encoded image. An empty `prompt` selects the
    /// default prompt. No retries; the caller decides what a failure means.
    pub async fn analyze(&self, image_base64: &str, api_key: &str, prompt: &str) -> Result<String> {
        if image_base64.is_empty() {
            bail!("image_base64 is required");
        }
        if api_key.is_empty() {
            bail!("API key is required");
        }

        let prompt = if prompt.is_empty() {
            DEFAULT_PROMPT
        } else {
            prompt
        };

        let image_url = if image_base64.starts_with("data:") {
            image_base64.to_string()
        } else {
            format!("data:image/jpeg;base64,{}", image_base64)
        };

        // The content order is contractual: image first, then the prompt.
        let body = json!({
            "model": self.config.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "image_url", "image_url": { "url": image_url } },
                    { "type": "text", "text": prompt }
                ]
            }],
            "thinking": { "type": "enabled" },
            "stream": false,
            "temperature": self.config.temperature,
            "top_p": self.config.top_p,
            "max_tokens": self.config.max_tokens
        });

        let client = reqwest::Client::builder()
            .timeout(self.config.timeout)
            .build()?;

        let url = format!("{}/chat/completions", self.config.base_url);
        let response = client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("X-Title", "4.6V MCP Local")
            .header("Accept-Language", "en-US,en")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let response_body = response.text().await?;

        if !status.is_success() {
            return Err(anyhow!(
                "API error (status {}): {}",
                status.as_u16(),
                response_body
            ));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&response_body)?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no choices in response"))?;

        Ok(choice.message.content)
    }
}
