// Optional JSON capture of proxied request/response pairs. Enabled with
// DEBUG=true; every append rewrites the whole log file so the file is
// always a valid JSON array.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

static LOG_ENTRIES: Lazy<Mutex<Vec<DebugEntry>>> = Lazy::new(|| Mutex::new(Vec::new()));

#[derive(Debug, Clone, Serialize)]
pub struct DebugEntry {
    pub timestamp: String,
    pub request: Option<Value>,
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn log_request(request: Option<&Value>, response: Option<&Value>, error: Option<&anyhow::Error>) {
    let config = crate::config::get();
    if !config.debug {
        return;
    }

    let entry = DebugEntry {
        timestamp: chrono::Utc::now().to_rfc3339(),
        request: request.cloned(),
        response: response.cloned(),
        error: error.map(|e| e.to_string()),
    };

    let mut entries = LOG_ENTRIES.lock();
    entries.push(entry);

    if let Err(e) = write_to_file(&config.debug_log_file, &entries) {
        tracing::warn!("failed to write debug log: {}", e);
    }
}

fn write_to_file(path: &str, entries: &[DebugEntry]) -> anyhow::Result<()> {
    let data = serde_json::to_string_pretty(entries)?;
    std::fs::write(path, data)?;
    Ok(())
}

pub fn entries() -> Vec<DebugEntry> {
    LOG_ENTRIES.lock().clone()
}

pub fn clear() {
    let config = crate::config::get();
    LOG_ENTRIES.lock().clear();
    let _ = std::fs::remove_file(config.debug_log_file);
}
