use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Image,
    Video,
    Audio,
    File,
}

impl ResourceType {
    /// Subdirectory under the resource storage root.
    pub fn subdir(&self) -> &'static str {
        match self {
            ResourceType::Image => "images",
            ResourceType::Video => "videos",
            ResourceType::Audio => "audios",
            ResourceType::File => "files",
        }
    }

    /// Queue priority bonus — small media first keeps exports responsive.
    pub fn priority_bonus(&self) -> i32 {
        match self {
            ResourceType::Image => 100,
            ResourceType::Audio => 50,
            ResourceType::Video => 30,
            ResourceType::File => 10,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceType::Image => "image",
            ResourceType::Video => "video",
            ResourceType::Audio => "audio",
            ResourceType::File => "file",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "image" => Ok(ResourceType::Image),
            "video" => Ok(ResourceType::Video),
            "audio" => Ok(ResourceType::Audio),
            "file" => Ok(ResourceType::File),
            other => Err(format!("unknown resource type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Pending,
    Downloading,
    Downloaded,
    Failed,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceStatus::Pending => "pending",
            ResourceStatus::Downloading => "downloading",
            ResourceStatus::Downloaded => "downloaded",
            ResourceStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ResourceStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ResourceStatus::Pending),
            "downloading" => Ok(ResourceStatus::Downloading),
            "downloaded" => Ok(ResourceStatus::Downloaded),
            "failed" => Ok(ResourceStatus::Failed),
            other => Err(format!("unknown resource status: {other}")),
        }
    }
}

/// One media resource referenced by a message.
///
/// `accessible == true` implies `local_path` exists and, when `md5` is known,
/// the file content hashes to it — the resource handler is the only writer of
/// that pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub file_name: String,
    pub file_size: i64,
    pub mime_type: String,
    /// Lowercase hex; empty when the bridge did not supply a hash.
    pub md5: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    pub status: ResourceStatus,
    pub accessible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<DateTime<Utc>>,
    pub download_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Element id inside the owning message, needed for bridge downloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    /// Client-local source path some elements carry (already-cached media).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    /// Voice-message uuid, needed to resolve a PTT URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_uuid: Option<String>,
}

impl ResourceInfo {
    pub fn new(resource_type: ResourceType, file_name: impl Into<String>) -> Self {
        Self {
            resource_type,
            file_name: file_name.into(),
            file_size: 0,
            mime_type: String::new(),
            md5: String::new(),
            original_url: None,
            local_path: None,
            status: ResourceStatus::Pending,
            accessible: false,
            checked_at: None,
            download_attempts: 0,
            last_error: None,
            element_id: None,
            source_path: None,
            file_uuid: None,
        }
    }

    /// Stable identity: md5 when present, else `(type, name, size)`.
    pub fn identity(&self) -> String {
        if self.md5.is_empty() {
            format!("{}:{}:{}", self.resource_type, self.file_name, self.file_size)
        } else {
            self.md5.clone()
        }
    }

    /// On-disk file name under the content store: `<md5>_<sanitized name>`.
    /// Hash-less resources get a digest of their identity so the name stays
    /// deterministic across runs.
    pub fn storage_file_name(&self) -> String {
        let key = if self.md5.is_empty() {
            hex::encode(md5::compute(self.identity().as_bytes()).0)
        } else {
            self.md5.clone()
        };
        format!("{key}_{}", crate::sanitize::sanitize_file_name(&self.file_name))
    }

    /// Path referenced from inside an export artifact, relative to the
    /// export file's directory.
    pub fn artifact_rel_path(&self) -> String {
        format!("resources/{}/{}", self.resource_type.subdir(), self.storage_file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_prefers_md5() {
        let mut r = ResourceInfo::new(ResourceType::Image, "a.png");
        assert_eq!(r.identity(), "image:a.png:0");
        r.md5 = "d41d8cd98f00b204e9800998ecf8427e".into();
        assert_eq!(r.identity(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn priority_bonus_ordering() {
        assert!(ResourceType::Image.priority_bonus() > ResourceType::Audio.priority_bonus());
        assert!(ResourceType::Audio.priority_bonus() > ResourceType::Video.priority_bonus());
        assert!(ResourceType::Video.priority_bonus() > ResourceType::File.priority_bonus());
    }
}
