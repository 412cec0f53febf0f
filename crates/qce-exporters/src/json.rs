use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use qce_core::message::ParsedMessage;
use qce_core::task::ExportFormat;

use crate::{export_file_name, ExportArtifact, ExportOptions, Exporter, Result};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Meta {
    version: &'static str,
    generated_at: String,
    chat: ChatMeta,
    window: WindowMeta,
    counts: Counts,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatMeta {
    name: String,
    #[serde(rename = "type")]
    chat_type: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WindowMeta {
    start_ms: i64,
    end_ms: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Counts {
    messages: u64,
}

/// Streaming JSON artifact: `{"messages":[…],"meta":{…}}`.
///
/// Messages stream out one at a time, so peak memory stays at one batch;
/// `meta` (which needs the final counts) closes the object.
pub struct JsonExporter {
    writer: BufWriter<File>,
    part_path: PathBuf,
    final_path: PathBuf,
    file_name: String,
    opts: ExportOptions,
    count: u64,
}

impl JsonExporter {
    pub async fn create(dir: &Path, opts: &ExportOptions) -> Result<Self> {
        let file_name = export_file_name(&opts.chat_name, opts.stamp_ms, ExportFormat::Json);
        let final_path = dir.join(&file_name);
        let part_path = dir.join(format!("{file_name}.part"));
        let mut writer = BufWriter::new(File::create(&part_path).await?);

        if opts.pretty_json {
            writer.write_all(b"{\n  \"messages\": [").await?;
        } else {
            writer.write_all(b"{\"messages\":[").await?;
        }
        Ok(Self {
            writer,
            part_path,
            final_path,
            file_name,
            opts: opts.clone(),
            count: 0,
        })
    }
}

#[async_trait::async_trait]
impl Exporter for JsonExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }

    async fn write_batch(&mut self, batch: &[ParsedMessage]) -> Result<()> {
        for msg in batch {
            if self.count > 0 {
                self.writer.write_all(b",").await?;
            }
            if self.opts.pretty_json {
                let body = serde_json::to_string_pretty(msg)?;
                // Re-indent under "messages".
                let indented = body.replace('\n', "\n    ");
                self.writer.write_all(b"\n    ").await?;
                self.writer.write_all(indented.as_bytes()).await?;
            } else {
                let body = serde_json::to_string(msg)?;
                self.writer.write_all(body.as_bytes()).await?;
            }
            self.count += 1;
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<ExportArtifact> {
        let meta = Meta {
            version: env!("CARGO_PKG_VERSION"),
            generated_at: Utc::now().to_rfc3339(),
            chat: ChatMeta {
                name: self.opts.chat_name.clone(),
                chat_type: self.opts.chat_type.to_string(),
            },
            window: WindowMeta {
                start_ms: self.opts.window.start_ms,
                end_ms: self.opts.window.end_ms,
            },
            counts: Counts {
                messages: self.count,
            },
        };
        if self.opts.pretty_json {
            let meta_body = serde_json::to_string_pretty(&meta)?.replace('\n', "\n  ");
            self.writer.write_all(b"\n  ],\n  \"meta\": ").await?;
            self.writer.write_all(meta_body.as_bytes()).await?;
            self.writer.write_all(b"\n}\n").await?;
        } else {
            self.writer.write_all(b"],\"meta\":").await?;
            self.writer
                .write_all(serde_json::to_string(&meta)?.as_bytes())
                .await?;
            self.writer.write_all(b"}").await?;
        }
        self.writer.flush().await?;
        drop(self.writer);

        tokio::fs::rename(&self.part_path, &self.final_path).await?;
        let file_size = tokio::fs::metadata(&self.final_path).await?.len();
        debug!(file = %self.file_name, messages = self.count, "JSON artifact written");
        Ok(ExportArtifact {
            path: self.final_path,
            file_name: self.file_name,
            file_size,
            message_count: self.count,
            format: ExportFormat::Json,
        })
    }

    async fn abort(self: Box<Self>) {
        drop(self.writer);
        let _ = tokio::fs::remove_file(&self.part_path).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qce_core::message::MessageContent;
    use qce_core::{ChatType, TimeWindow};

    fn opts() -> ExportOptions {
        ExportOptions {
            chat_name: "test chat".into(),
            chat_type: ChatType::Group,
            window: TimeWindow::unbounded(),
            pretty_json: false,
            include_system_messages: true,
            include_resource_links: true,
            stamp_ms: 1_700_000_000_000,
        }
    }

    fn message(id: &str, ts: i64, text: &str) -> ParsedMessage {
        let mut content = MessageContent::default();
        content.text = text.to_string();
        ParsedMessage {
            message_id: id.to_string(),
            message_seq: 1,
            timestamp: ts,
            content,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn artifact_round_trips_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = Box::new(JsonExporter::create(dir.path(), &opts()).await.unwrap());

        let original = vec![
            message("M3", 1_700_000_030_000, "newest"),
            message("M2", 1_700_000_020_000, "middle"),
        ];
        exporter.write_batch(&original).await.unwrap();
        exporter
            .write_batch(&[message("M1", 1_700_000_010_000, "oldest")])
            .await
            .unwrap();
        let artifact = exporter.finish().await.unwrap();
        assert_eq!(artifact.message_count, 3);

        let text = std::fs::read_to_string(&artifact.path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["meta"]["counts"]["messages"], 3);
        assert_eq!(value["meta"]["chat"]["type"], "group");

        // Upstream (newest-first) order is preserved verbatim.
        let messages: Vec<ParsedMessage> =
            serde_json::from_value(value["messages"].clone()).unwrap();
        assert_eq!(messages[0], original[0]);
        assert_eq!(messages[1], original[1]);
        assert_eq!(messages[2].message_id, "M1");
    }

    #[tokio::test]
    async fn empty_export_is_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Box::new(JsonExporter::create(dir.path(), &opts()).await.unwrap());
        let artifact = exporter.finish().await.unwrap();
        assert_eq!(artifact.message_count, 0);

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&artifact.path).unwrap()).unwrap();
        assert_eq!(value["messages"].as_array().unwrap().len(), 0);
        assert!(value["meta"]["generatedAt"].is_string());
    }

    #[tokio::test]
    async fn pretty_output_parses_identically() {
        let dir = tempfile::tempdir().unwrap();
        let mut o = opts();
        o.pretty_json = true;
        let mut exporter = Box::new(JsonExporter::create(dir.path(), &o).await.unwrap());
        exporter
            .write_batch(&[message("M1", 1_700_000_010_000, "x")])
            .await
            .unwrap();
        let artifact = exporter.finish().await.unwrap();
        let text = std::fs::read_to_string(&artifact.path).unwrap();
        assert!(text.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["messages"][0]["messageId"], "M1");
    }

    #[tokio::test]
    async fn abort_leaves_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Box::new(JsonExporter::create(dir.path(), &opts()).await.unwrap());
        exporter.abort().await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
