use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, TimeZone};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use qce_core::message::ParsedMessage;
use qce_core::task::ExportFormat;

use crate::{export_file_name, ExportArtifact, ExportOptions, Exporter, Result};

/// Line-oriented plain-text artifact.
///
/// One line per message — `HH:MM:SS NAME: text` — with a date header whenever
/// the (local) day changes. Expects batches in ascending timestamp order.
pub struct TxtExporter {
    writer: BufWriter<File>,
    part_path: PathBuf,
    final_path: PathBuf,
    file_name: String,
    include_system: bool,
    last_day: Option<NaiveDate>,
    count: u64,
}

impl TxtExporter {
    pub async fn create(dir: &Path, opts: &ExportOptions) -> Result<Self> {
        let file_name = export_file_name(&opts.chat_name, opts.stamp_ms, ExportFormat::Txt);
        let final_path = dir.join(&file_name);
        let part_path = dir.join(format!("{file_name}.part"));
        let mut writer = BufWriter::new(File::create(&part_path).await?);

        let header = format!(
            "# Chat: {}\n# Type: {}\n\n",
            opts.chat_name, opts.chat_type
        );
        writer.write_all(header.as_bytes()).await?;

        Ok(Self {
            writer,
            part_path,
            final_path,
            file_name,
            include_system: opts.include_system_messages,
            last_day: None,
            count: 0,
        })
    }
}

#[async_trait::async_trait]
impl Exporter for TxtExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Txt
    }

    async fn write_batch(&mut self, batch: &[ParsedMessage]) -> Result<()> {
        for msg in batch {
            if msg.is_system && !self.include_system {
                continue;
            }
            let Some(local) = Local.timestamp_millis_opt(msg.timestamp).single() else {
                continue;
            };

            let day = local.date_naive();
            if self.last_day != Some(day) {
                let header = format!("==== {} ====\n", day.format("%Y-%m-%d"));
                self.writer.write_all(header.as_bytes()).await?;
                self.last_day = Some(day);
            }

            // Single physical line per message.
            let flat = msg.content.text.replace(['\n', '\r'], " ");
            let recalled = if msg.is_recalled { " [recalled]" } else { "" };
            let line = format!(
                "{} {}: {}{}\n",
                local.format("%H:%M:%S"),
                msg.sender.display_name,
                flat,
                recalled
            );
            self.writer.write_all(line.as_bytes()).await?;
            self.count += 1;
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<ExportArtifact> {
        self.writer.flush().await?;
        drop(self.writer);
        tokio::fs::rename(&self.part_path, &self.final_path).await?;
        let file_size = tokio::fs::metadata(&self.final_path).await?.len();
        debug!(file = %self.file_name, messages = self.count, "TXT artifact written");
        Ok(ExportArtifact {
            path: self.final_path,
            file_name: self.file_name,
            file_size,
            message_count: self.count,
            format: ExportFormat::Txt,
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
    use qce_core::message::{MessageContent, SenderInfo};
    use qce_core::{ChatType, TimeWindow};

    fn opts() -> ExportOptions {
        ExportOptions {
            chat_name: "daily".into(),
            chat_type: ChatType::Private,
            window: TimeWindow::unbounded(),
            pretty_json: false,
            include_system_messages: true,
            include_resource_links: true,
            stamp_ms: 1_700_000_000_000,
        }
    }

    fn message(ts: i64, name: &str, text: &str) -> ParsedMessage {
        let mut content = MessageContent::default();
        content.text = text.to_string();
        ParsedMessage {
            message_id: format!("m-{ts}"),
            timestamp: ts,
            sender: SenderInfo {
                display_name: name.to_string(),
                ..Default::default()
            },
            content,
            ..Default::default()
        }
    }

    async fn render(messages: &[ParsedMessage], opts: &ExportOptions) -> String {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = Box::new(TxtExporter::create(dir.path(), opts).await.unwrap());
        exporter.write_batch(messages).await.unwrap();
        let artifact = exporter.finish().await.unwrap();
        std::fs::read_to_string(&artifact.path).unwrap()
    }

    #[tokio::test]
    async fn day_headers_on_day_change() {
        let day_ms = 86_400_000;
        let messages = vec![
            message(1_700_000_000_000, "alice", "day one"),
            message(1_700_000_000_000 + day_ms, "bob", "day two"),
            message(1_700_000_000_000 + day_ms + 1_000, "bob", "still day two"),
        ];
        let text = render(&messages, &opts()).await;
        assert_eq!(text.matches("==== ").count(), 2);
        assert!(text.contains("alice: day one"));
        assert!(text.contains("bob: still day two"));
    }

    #[tokio::test]
    async fn multiline_text_is_flattened() {
        let messages = vec![message(1_700_000_000_000, "alice", "line one\nline two")];
        let text = render(&messages, &opts()).await;
        assert!(text.contains("alice: line one line two"));
    }

    #[tokio::test]
    async fn system_messages_can_be_excluded() {
        let mut sys = message(1_700_000_000_000, "system", "x joined");
        sys.is_system = true;
        let mut o = opts();
        o.include_system_messages = false;
        let text = render(&[sys.clone()], &o).await;
        assert!(!text.contains("x joined"));
        let text = render(&[sys], &opts()).await;
        assert!(text.contains("x joined"));
    }

    #[tokio::test]
    async fn identical_input_renders_identical_bytes() {
        let messages = vec![
            message(1_700_000_000_000, "alice", "one"),
            message(1_700_000_005_000, "bob", "two"),
        ];
        let a = render(&messages, &opts()).await;
        let b = render(&messages, &opts()).await;
        assert_eq!(a, b);
    }
}
