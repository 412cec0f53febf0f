use qce_core::message::{Element, MessageElement};
use qce_core::resource::{ResourceInfo, ResourceType};

use crate::escape::escape_html;

/// Plain-text rendering of one element.
pub fn element_text(el: &Element) -> String {
    match el {
        Element::Text { content, .. } => content.clone(),
        Element::Picture { file_name, .. } => {
            if file_name.is_empty() {
                "[image]".to_string()
            } else {
                format!("[image: {file_name}]")
            }
        }
        Element::File { file_name, .. } => format!("[file: {file_name}]"),
        Element::Video { file_name, .. } => {
            if file_name.is_empty() {
                "[video]".to_string()
            } else {
                format!("[video: {file_name}]")
            }
        }
        Element::Voice { duration_secs, .. } => match duration_secs {
            Some(d) => format!("[voice {d}s]"),
            None => "[voice]".to_string(),
        },
        Element::Face { face_id, name } => match name {
            Some(n) if !n.is_empty() => format!("[{n}]"),
            _ => format!("[face:{face_id}]"),
        },
        Element::MarketFace { name, .. } => {
            if name.is_empty() {
                "[sticker]".to_string()
            } else {
                format!("[{name}]")
            }
        }
        // Replies render through the resolved preview, not inline.
        Element::Reply { .. } => String::new(),
        Element::ArkCard { .. } => "[card]".to_string(),
        Element::MultiForward { summary, .. } => match summary {
            Some(s) if !s.is_empty() => format!("[forward: {s}]"),
            _ => "[forwarded messages]".to_string(),
        },
        Element::Location { title, .. } => match title {
            Some(t) if !t.is_empty() => format!("[location: {t}]"),
            _ => "[location]".to_string(),
        },
        Element::GrayTip { text } => text.clone(),
        Element::Markdown { content } => content.clone(),
        Element::Calendar { summary, .. } => format!("[calendar: {summary}]"),
    }
}

/// HTML rendering where one exists beyond escaped text. Resources get their
/// markup from the exporter (which knows final local paths), so only rich
/// inline content renders here.
pub fn element_html(el: &Element) -> Option<String> {
    match el {
        Element::Text { content, at_type, .. } => {
            let escaped = escape_html(content);
            match at_type {
                qce_core::message::AtType::None => Some(escaped.into_owned()),
                _ => Some(format!("<span class=\"mention\">{escaped}</span>")),
            }
        }
        Element::Face { face_id, name } => {
            let label = name.clone().unwrap_or_else(|| format!("face:{face_id}"));
            Some(format!(
                "<span class=\"face\" data-id=\"{face_id}\">[{}]</span>",
                escape_html(&label)
            ))
        }
        Element::MarketFace { name, .. } => Some(format!(
            "<span class=\"market-face\">[{}]</span>",
            escape_html(name)
        )),
        Element::GrayTip { text } => Some(format!(
            "<span class=\"system\">{}</span>",
            escape_html(text)
        )),
        Element::Markdown { content } => {
            // Markdown is exported as escaped preformatted text; rendering a
            // markdown engine into the artifact is the front-end's job.
            Some(format!("<pre class=\"markdown\">{}</pre>", escape_html(content)))
        }
        _ => None,
    }
}

/// Minimal extension → mime mapping for the media we actually see.
pub fn guess_mime(file_name: &str, resource_type: ResourceType) -> String {
    let ext = file_name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "amr" => "audio/amr",
        "silk" => "audio/silk",
        _ => match resource_type {
            ResourceType::Image => "image/png",
            ResourceType::Video => "video/mp4",
            ResourceType::Audio => "audio/mpeg",
            ResourceType::File => "application/octet-stream",
        },
    };
    mime.to_string()
}

fn build_resource(
    rt: ResourceType,
    file_name: &str,
    file_size: Option<i64>,
    md5: &str,
    element_id: &str,
) -> ResourceInfo {
    let mut info = ResourceInfo::new(rt, file_name);
    info.file_size = file_size.unwrap_or(0);
    info.md5 = md5.to_ascii_lowercase();
    info.mime_type = guess_mime(file_name, rt);
    info.element_id = if element_id.is_empty() {
        None
    } else {
        Some(element_id.to_string())
    };
    info
}

/// Build a `ResourceInfo` for a media element, when it carries one.
pub fn resource_from_element(el: &Element) -> Option<ResourceInfo> {
    match el {
        Element::Picture {
            file_name,
            file_size,
            md5,
            element_id,
            source_path,
            url,
        } => {
            let mut info =
                build_resource(ResourceType::Image, file_name, *file_size, md5, element_id);
            info.original_url = url.clone();
            info.source_path = source_path.clone();
            Some(info)
        }
        Element::Video {
            file_name,
            file_size,
            md5,
            element_id,
            source_path,
        } => {
            let mut info =
                build_resource(ResourceType::Video, file_name, *file_size, md5, element_id);
            info.source_path = source_path.clone();
            Some(info)
        }
        Element::Voice {
            file_name,
            file_size,
            md5,
            element_id,
            file_uuid,
            ..
        } => {
            let mut info =
                build_resource(ResourceType::Audio, file_name, *file_size, md5, element_id);
            info.file_uuid = Some(file_uuid.clone()).filter(|u| !u.is_empty());
            Some(info)
        }
        Element::File {
            file_name,
            file_size,
            md5,
            element_id,
            source_path,
        } => {
            let mut info =
                build_resource(ResourceType::File, file_name, *file_size, md5, element_id);
            info.source_path = source_path.clone();
            Some(info)
        }
        _ => None,
    }
}

/// Short plain-text preview over a slice of elements, truncated on a char
/// boundary. Used for reply synthesis.
pub fn preview_text(elements: &[MessageElement], max_chars: usize) -> String {
    let mut chunks: Vec<String> = Vec::new();
    for el in elements {
        if let MessageElement::Known(known) = el {
            let t = element_text(known);
            if !t.is_empty() {
                chunks.push(t);
            }
        }
    }
    let joined = chunks.join(" ");
    if joined.chars().count() > max_chars {
        let truncated: String = joined.chars().take(max_chars).collect();
        format!("{truncated}…")
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picture_resource_lowercases_md5() {
        let el = Element::Picture {
            file_name: "photo.JPG".into(),
            file_size: Some(2048),
            md5: "ABCDEF0123456789ABCDEF0123456789".into(),
            element_id: "e1".into(),
            source_path: None,
            url: None,
        };
        let r = resource_from_element(&el).unwrap();
        assert_eq!(r.md5, "abcdef0123456789abcdef0123456789");
        assert_eq!(r.mime_type, "image/jpeg");
        assert_eq!(r.resource_type, ResourceType::Image);
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let els = vec![MessageElement::text("日本語のテキストです、長いメッセージ")];
        let p = preview_text(&els, 5);
        assert_eq!(p, "日本語のテ…");
    }

    #[test]
    fn text_elements_have_no_resource() {
        assert!(resource_from_element(&Element::GrayTip { text: "x".into() }).is_none());
    }
}
