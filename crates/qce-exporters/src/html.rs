use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, TimeZone};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use qce_core::message::ParsedMessage;
use qce_core::resource::{ResourceInfo, ResourceStatus, ResourceType};
use qce_core::task::ExportFormat;
use qce_parser::escape_html;

use crate::{export_file_name, ExportArtifact, ExportOptions, Exporter, Result};

const STYLE: &str = "\
body{margin:0;font:14px/1.5 -apple-system,'Segoe UI',sans-serif;background:#f2f3f5;color:#1f2329}\
main.chat{max-width:760px;margin:0 auto;padding:16px}\
header.chat-title{padding:12px 0;border-bottom:1px solid #d9dce1;margin-bottom:12px}\
.day{margin:18px 0 8px;text-align:center;color:#8a8f99;font-size:12px}\
section.msg{background:#fff;border-radius:8px;padding:8px 12px;margin:6px 0;box-shadow:0 1px 2px rgba(0,0,0,.06)}\
section.msg.system{background:transparent;box-shadow:none;text-align:center;color:#8a8f99;font-size:12px}\
section.msg.recalled{opacity:.6}\
.meta{display:flex;gap:8px;align-items:baseline}\
.sender{font-weight:600;color:#355e9e}\
.time{color:#8a8f99;font-size:12px}\
.body{white-space:pre-wrap;word-break:break-word;margin-top:2px}\
blockquote.reply{margin:4px 0;padding:4px 8px;border-left:3px solid #c4cad3;color:#5a6372;font-size:13px;background:#f7f8fa}\
.media img{max-width:320px;max-height:320px;border-radius:6px;display:block;margin-top:6px}\
.media video,.media audio{display:block;margin-top:6px;max-width:420px}\
a.file{display:inline-block;margin-top:6px;padding:6px 10px;background:#eef1f5;border-radius:6px;text-decoration:none}\
.media-missing{margin-top:6px;padding:10px;border:1px dashed #c4cad3;border-radius:6px;color:#8a8f99;font-size:12px}\
.mention{color:#0b6bcb}\
pre.markdown{background:#f7f8fa;padding:8px;border-radius:6px;overflow-x:auto}";

/// Self-contained HTML artifact.
///
/// Inline CSS, no external requests; downloaded media is referenced with
/// relative `resources/<type>s/<md5>_<name>` paths next to the export file,
/// failed media renders as a dashed placeholder. Expects ascending batches.
pub struct HtmlExporter {
    writer: BufWriter<File>,
    part_path: PathBuf,
    final_path: PathBuf,
    file_name: String,
    include_links: bool,
    last_day: Option<NaiveDate>,
    count: u64,
}

impl HtmlExporter {
    pub async fn create(dir: &Path, opts: &ExportOptions) -> Result<Self> {
        let file_name = export_file_name(&opts.chat_name, opts.stamp_ms, ExportFormat::Html);
        let final_path = dir.join(&file_name);
        let part_path = dir.join(format!("{file_name}.part"));
        let mut writer = BufWriter::new(File::create(&part_path).await?);

        let title = escape_html(&opts.chat_name);
        let head = format!(
            "<!DOCTYPE html>\n<html lang=\"zh-CN\">\n<head>\n<meta charset=\"utf-8\">\n\
             <meta name=\"viewport\" content=\"width=device-width,initial-scale=1\">\n\
             <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n\
             <main class=\"chat\">\n<header class=\"chat-title\"><h1>{title}</h1></header>\n"
        );
        writer.write_all(head.as_bytes()).await?;

        Ok(Self {
            writer,
            part_path,
            final_path,
            file_name,
            include_links: opts.include_resource_links,
            last_day: None,
            count: 0,
        })
    }

    fn render_resource(resource: &ResourceInfo) -> String {
        let name = escape_html(&resource.file_name);
        if resource.status == ResourceStatus::Downloaded && resource.accessible {
            let rel = escape_html(&resource.artifact_rel_path()).into_owned();
            match resource.resource_type {
                ResourceType::Image => {
                    format!("<div class=\"media\"><img src=\"{rel}\" alt=\"{name}\" loading=\"lazy\"></div>")
                }
                ResourceType::Video => {
                    format!("<div class=\"media\"><video controls src=\"{rel}\"></video></div>")
                }
                ResourceType::Audio => {
                    format!("<div class=\"media\"><audio controls src=\"{rel}\"></audio></div>")
                }
                ResourceType::File => {
                    format!("<a class=\"file\" href=\"{rel}\" download>{name}</a>")
                }
            }
        } else {
            format!(
                "<div class=\"media-missing\">{} unavailable: {name}</div>",
                resource.resource_type
            )
        }
    }

    fn render_message(&mut self, msg: &ParsedMessage) -> String {
        let mut out = String::with_capacity(256);

        if let Some(local) = Local.timestamp_millis_opt(msg.timestamp).single() {
            let day = local.date_naive();
            if self.last_day != Some(day) {
                out.push_str(&format!(
                    "<div class=\"day\">{}</div>\n",
                    day.format("%Y-%m-%d")
                ));
                self.last_day = Some(day);
            }

            let mut classes = String::from("msg");
            if msg.is_system {
                classes.push_str(" system");
            }
            if msg.is_recalled {
                classes.push_str(" recalled");
            }
            out.push_str(&format!("<section class=\"{classes}\">"));
            out.push_str(&format!(
                "<div class=\"meta\"><span class=\"sender\">{}</span><span class=\"time\">{}</span></div>",
                escape_html(&msg.sender.display_name),
                local.format("%H:%M:%S"),
            ));
        } else {
            out.push_str("<section class=\"msg\">");
        }

        if let Some(reply) = &msg.content.reply {
            out.push_str(&format!(
                "<blockquote class=\"reply\">{}: {}</blockquote>",
                escape_html(&reply.sender_name),
                escape_html(&reply.content)
            ));
        }

        let body = match &msg.content.html {
            Some(html) => html.clone(),
            None => escape_html(&msg.content.text).into_owned(),
        };
        out.push_str(&format!("<div class=\"body\">{body}</div>"));

        if self.include_links {
            for resource in &msg.content.resources {
                out.push_str(&Self::render_resource(resource));
            }
        }

        out.push_str("</section>\n");
        out
    }
}

#[async_trait::async_trait]
impl Exporter for HtmlExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Html
    }

    async fn write_batch(&mut self, batch: &[ParsedMessage]) -> Result<()> {
        for msg in batch {
            let rendered = self.render_message(msg);
            self.writer.write_all(rendered.as_bytes()).await?;
            self.count += 1;
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<ExportArtifact> {
        let footer = format!(
            "<footer class=\"day\">{} messages</footer>\n</main>\n</body>\n</html>\n",
            self.count
        );
        self.writer.write_all(footer.as_bytes()).await?;
        self.writer.flush().await?;
        drop(self.writer);

        tokio::fs::rename(&self.part_path, &self.final_path).await?;
        let file_size = tokio::fs::metadata(&self.final_path).await?.len();
        debug!(file = %self.file_name, messages = self.count, "HTML artifact written");
        Ok(ExportArtifact {
            path: self.final_path,
            file_name: self.file_name,
            file_size,
            message_count: self.count,
            format: ExportFormat::Html,
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
            chat_name: "html chat".into(),
            chat_type: ChatType::Group,
            window: TimeWindow::unbounded(),
            pretty_json: false,
            include_system_messages: true,
            include_resource_links: true,
            stamp_ms: 1_700_000_000_000,
        }
    }

    fn message(text: &str, resources: Vec<ResourceInfo>) -> ParsedMessage {
        let mut content = MessageContent::default();
        content.text = text.to_string();
        content.resources = resources;
        ParsedMessage {
            message_id: "M1".into(),
            timestamp: 1_700_000_000_000,
            sender: SenderInfo {
                display_name: "alice".into(),
                ..Default::default()
            },
            content,
            ..Default::default()
        }
    }

    async fn render(messages: &[ParsedMessage], opts: &ExportOptions) -> String {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = Box::new(HtmlExporter::create(dir.path(), opts).await.unwrap());
        exporter.write_batch(messages).await.unwrap();
        let artifact = exporter.finish().await.unwrap();
        std::fs::read_to_string(&artifact.path).unwrap()
    }

    fn image(name: &str, status: ResourceStatus) -> ResourceInfo {
        let mut r = ResourceInfo::new(ResourceType::Image, name);
        r.md5 = "abc123".into();
        r.status = status;
        r.accessible = status == ResourceStatus::Downloaded;
        r
    }

    #[tokio::test]
    async fn downloaded_image_gets_relative_src() {
        let html = render(
            &[message("see pic", vec![image("a.png", ResourceStatus::Downloaded)])],
            &opts(),
        )
        .await;
        assert!(html.contains("<img src=\"resources/images/abc123_a.png\""));
        assert!(html.contains("see pic"));
    }

    #[tokio::test]
    async fn failed_image_renders_placeholder() {
        let html = render(
            &[message("broken", vec![image("b.png", ResourceStatus::Failed)])],
            &opts(),
        )
        .await;
        assert!(html.contains("media-missing"));
        assert!(html.contains("image unavailable: b.png"));
        assert!(!html.contains("<img"));
    }

    #[tokio::test]
    async fn user_text_is_escaped() {
        let html = render(
            &[message("<script>alert('x')</script>", vec![])],
            &opts(),
        )
        .await;
        assert!(!html.contains("<script>alert"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[tokio::test]
    async fn resource_links_can_be_disabled() {
        let mut o = opts();
        o.include_resource_links = false;
        let html = render(
            &[message("x", vec![image("a.png", ResourceStatus::Downloaded)])],
            &o,
        )
        .await;
        assert!(!html.contains("<img"));
    }

    #[tokio::test]
    async fn document_is_self_contained() {
        let html = render(&[message("hello", vec![])], &opts()).await;
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<style>"));
        assert!(!html.contains("http://"));
        assert!(!html.contains("https://"));
        assert!(html.ends_with("</html>\n"));
    }
}
