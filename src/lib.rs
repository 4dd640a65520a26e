// glm-tool - LLM API reverse proxy with vision offload

pub mod api;
pub mod cache;
pub mod config;
pub mod debuglog;
pub mod image;
pub mod proxy;
pub mod vision;
