//! `qce-exporters` — streaming serializers for parsed message batches.
//!
//! Each exporter writes to `<final name>.part` and renames into place only
//! when `finish` succeeds, so a crashed or canceled export never leaves an
//! artifact that looks complete. Batch ordering is the caller's contract:
//! JSON receives upstream order (newest first), TXT/HTML receive ascending
//! timestamps.

pub mod html;
pub mod json;
pub mod txt;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use qce_core::message::ParsedMessage;
use qce_core::sanitize::sanitize_file_name;
use qce_core::task::ExportFormat;
use qce_core::{ChatType, TimeWindow};

pub use html::HtmlExporter;
pub use json::JsonExporter;
pub use txt::TxtExporter;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ExportError> for qce_core::QceError {
    fn from(e: ExportError) -> Self {
        match e {
            ExportError::Io(io) => qce_core::QceError::Io(io),
            ExportError::Json(j) => qce_core::QceError::Serialization(j),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;

/// Everything an exporter needs besides the messages themselves.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub chat_name: String,
    pub chat_type: ChatType,
    pub window: TimeWindow,
    pub pretty_json: bool,
    pub include_system_messages: bool,
    pub include_resource_links: bool,
    /// Unix millis stamped into the artifact file name; shared across the
    /// formats of one task so they sort together.
    pub stamp_ms: i64,
}

/// A finished artifact.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub file_size: u64,
    pub message_count: u64,
    pub format: ExportFormat,
}

/// `<sanitizedChatName>_<unixMillis>.<ext>`
pub fn export_file_name(chat_name: &str, stamp_ms: i64, format: ExportFormat) -> String {
    format!(
        "{}_{}.{}",
        sanitize_file_name(chat_name),
        stamp_ms,
        format.extension()
    )
}

/// Streaming export sink. Call `write_batch` any number of times between
/// `create` and `finish`; `abort` discards the partial file.
#[async_trait]
pub trait Exporter: Send {
    fn format(&self) -> ExportFormat;

    async fn write_batch(&mut self, batch: &[ParsedMessage]) -> Result<()>;

    async fn finish(self: Box<Self>) -> Result<ExportArtifact>;

    async fn abort(self: Box<Self>);
}

/// Open the exporter for `format` in `dir`.
pub async fn create_exporter(
    format: ExportFormat,
    dir: &Path,
    opts: &ExportOptions,
) -> Result<Box<dyn Exporter>> {
    Ok(match format {
        ExportFormat::Json => Box::new(JsonExporter::create(dir, opts).await?),
        ExportFormat::Txt => Box::new(TxtExporter::create(dir, opts).await?),
        ExportFormat::Html => Box::new(HtmlExporter::create(dir, opts).await?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_sanitised_and_stamped() {
        assert_eq!(
            export_file_name("my/chat: two", 1_700_000_000_000, ExportFormat::Html),
            "my_chat_ two_1700000000000.html"
        );
    }
}
