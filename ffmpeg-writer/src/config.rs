use serde::{Deserialize, Serialize};

/// Named settings the writer reads while running.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WriterConfig {
    /// Identifies the camera in log messages.
    pub camera_id: String,
    /// Preferred audio codec when transcoding, e.g. "ac3".
    pub encode_format_audio: Option<String>,
    /// Preferred video codec when transcoding, e.g. "hevc".
    pub encode_format_video: Option<String>,
}

impl WriterConfig {
    pub fn new(camera_id: &str) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_audio_format(mut self, codec: &str) -> Self {
        self.encode_format_audio = Some(codec.to_string());
        self
    }

    pub fn with_video_format(mut self, codec: &str) -> Self {
        self.encode_format_video = Some(codec.to_string());
        self
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Lookup by the legacy key names. Unknown or unset keys yield an empty string.
    pub fn get_value(&self, name: &str) -> &str {
        match name {
            "camera-id" => &self.camera_id,
            "encode-format-audio" => self.encode_format_audio.as_deref().unwrap_or(""),
            "encode-format-video" => self.encode_format_video.as_deref().unwrap_or(""),
            _ => "",
        }
    }
}
