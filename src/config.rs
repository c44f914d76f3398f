use std::path::{Path, PathBuf};

use ffmpeg_writer::WriterConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RecorderConfig {
    /// File path or stream url, e.g. `rtsp://camera/stream1`.
    pub input: String,
    /// Forced input format such as "v4l2"; detected when unset.
    pub input_format: Option<String>,
    pub output_dir: PathBuf,
    pub segment_seconds: u64,
    /// Container extension, picks the muxer.
    pub container: String,
    /// Re-encode audio tracks instead of copying them.
    pub transcode_audio: bool,
    pub writer: WriterConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            input: String::new(),
            input_format: None,
            output_dir: PathBuf::from("recordings"),
            segment_seconds: 60,
            container: "mkv".to_string(),
            transcode_audio: false,
            writer: WriterConfig::new("camera"),
        }
    }
}

impl RecorderConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read the JSON file at `path`, or fall back to the defaults.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(Path::new(path))
                    .map_err(|e| anyhow::anyhow!("read config {}: {}", path, e))?;
                Self::from_json(&text)
            }
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.input.is_empty() {
            anyhow::bail!("no input configured");
        }
        if self.segment_seconds == 0 {
            anyhow::bail!("segment-seconds must be positive");
        }
        if self.container.is_empty() {
            anyhow::bail!("no container extension configured");
        }
        Ok(())
    }

    /// `<output-dir>/<camera>-<n>.<container>`
    pub fn segment_path(&self, segment: u64) -> PathBuf {
        self.output_dir.join(format!(
            "{}-{}.{}",
            self.writer.camera_id, segment, self.container
        ))
    }
}
