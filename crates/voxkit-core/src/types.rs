//! Shared type definitions

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Model family tag
///
/// Kept as an open string so new families can be added without touching
/// this crate. Serialized as a plain string (`"WHISPER"`, `"PIPER"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelType(Cow<'static, str>);

impl ModelType {
    /// whisper.cpp GGML speech-to-text models
    pub const WHISPER: ModelType = ModelType(Cow::Borrowed("WHISPER"));
    /// Piper ONNX text-to-speech voices
    pub const PIPER: ModelType = ModelType(Cow::Borrowed("PIPER"));

    /// Create a tag for a family defined outside this crate
    pub fn new(tag: impl Into<String>) -> Self {
        Self(Cow::Owned(tag.into()))
    }

    /// Tag as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Subdirectory under the models directory used by this family
    pub fn subdirectory(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whisper model size tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WhisperSize {
    Tiny,
    Base,
    Small,
    Medium,
    LargeV1,
    LargeV2,
    LargeV3,
    LargeV3Turbo,
}

impl WhisperSize {
    /// Label used in whisper.cpp file names
    pub fn label(&self) -> &'static str {
        match self {
            WhisperSize::Tiny => "tiny",
            WhisperSize::Base => "base",
            WhisperSize::Small => "small",
            WhisperSize::Medium => "medium",
            WhisperSize::LargeV1 => "large-v1",
            WhisperSize::LargeV2 => "large-v2",
            WhisperSize::LargeV3 => "large-v3",
            WhisperSize::LargeV3Turbo => "large-v3-turbo",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "tiny" => Some(WhisperSize::Tiny),
            "base" => Some(WhisperSize::Base),
            "small" => Some(WhisperSize::Small),
            "medium" => Some(WhisperSize::Medium),
            "large-v1" => Some(WhisperSize::LargeV1),
            "large-v2" => Some(WhisperSize::LargeV2),
            "large-v3" => Some(WhisperSize::LargeV3),
            "large-v3-turbo" => Some(WhisperSize::LargeV3Turbo),
            _ => None,
        }
    }

    /// Approximate size in bytes of the full-precision model
    pub fn approximate_bytes(&self) -> u64 {
        match self {
            WhisperSize::Tiny => 77_691_713,
            WhisperSize::Base => 147_951_465,
            WhisperSize::Small => 487_601_617,
            WhisperSize::Medium => 1_533_774_081,
            WhisperSize::LargeV1 | WhisperSize::LargeV2 | WhisperSize::LargeV3 => 3_094_623_201,
            WhisperSize::LargeV3Turbo => 1_622_089_793,
        }
    }
}

/// Whisper quantization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quantization {
    #[serde(rename = "q5_1")]
    Q5_1,
    #[serde(rename = "q8_0")]
    Q8_0,
}

impl Quantization {
    pub fn label(&self) -> &'static str {
        match self {
            Quantization::Q5_1 => "q5_1",
            Quantization::Q8_0 => "q8_0",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "q5_1" => Some(Quantization::Q5_1),
            "q8_0" => Some(Quantization::Q8_0),
            _ => None,
        }
    }

    /// Size of a quantized model relative to full precision
    pub fn size_ratio(&self) -> f64 {
        match self {
            Quantization::Q5_1 => 0.45,
            Quantization::Q8_0 => 0.65,
        }
    }
}

/// Piper voice quality tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiperQuality {
    XLow,
    Low,
    Medium,
    High,
}

impl PiperQuality {
    pub fn label(&self) -> &'static str {
        match self {
            PiperQuality::XLow => "x_low",
            PiperQuality::Low => "low",
            PiperQuality::Medium => "medium",
            PiperQuality::High => "high",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "x_low" => Some(PiperQuality::XLow),
            "low" => Some(PiperQuality::Low),
            "medium" => Some(PiperQuality::Medium),
            "high" => Some(PiperQuality::High),
            _ => None,
        }
    }
}

/// Language metadata published with Piper voices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageInfo {
    /// Language code (e.g., "en_US")
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub region: String,
    #[serde(default, alias = "name_native")]
    pub name_native: String,
    #[serde(default, alias = "name_english")]
    pub name_english: String,
    #[serde(default, alias = "country_english")]
    pub country_english: String,
}

/// Whisper-specific descriptor attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhisperAttributes {
    pub size: WhisperSize,
    pub english_only: bool,
    #[serde(default)]
    pub quantization: Option<Quantization>,
}

/// Piper-specific descriptor attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PiperAttributes {
    pub language: LanguageInfo,
    pub quality: PiperQuality,
    pub num_speakers: u32,
    #[serde(default)]
    pub speaker_id_map: BTreeMap<String, i64>,
}

/// Family-specific payload of a descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ModelAttributes {
    Whisper(WhisperAttributes),
    Piper(PiperAttributes),
    /// Free-form attributes for families defined by the host
    Other(BTreeMap<String, String>),
}

/// Role of a file within a model artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    /// Model payload
    Primary,
    /// Companion configuration file
    Config,
}

/// One downloadable file of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// Download URL
    pub url: String,
    /// File name on disk
    pub file_name: String,
    pub role: FileRole,
    /// Size in bytes (0 if unknown)
    #[serde(default)]
    pub size_bytes: u64,
    /// Checksum as published by the catalog, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// A remotely available model that has not necessarily been downloaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    /// Stable identifier
    pub id: String,
    /// Display name
    pub display_name: String,
    /// Estimated size in bytes (0 if unknown)
    pub size_bytes: u64,
    /// Model family
    pub model_type: ModelType,
    /// Files to download
    pub files: Vec<RemoteFile>,
    /// Family-specific attributes
    pub attributes: ModelAttributes,
}

impl ModelDescriptor {
    /// The model payload file
    pub fn primary_file(&self) -> Option<&RemoteFile> {
        self.files.iter().find(|f| f.role == FileRole::Primary)
    }

    /// The companion configuration file, if the family has one
    pub fn config_file(&self) -> Option<&RemoteFile> {
        self.files.iter().find(|f| f.role == FileRole::Config)
    }

    pub fn whisper(&self) -> Option<&WhisperAttributes> {
        match &self.attributes {
            ModelAttributes::Whisper(attrs) => Some(attrs),
            _ => None,
        }
    }

    pub fn piper(&self) -> Option<&PiperAttributes> {
        match &self.attributes {
            ModelAttributes::Piper(attrs) => Some(attrs),
            _ => None,
        }
    }

    /// Get human-readable size string
    pub fn size_string(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if self.size_bytes >= GB {
            format!("{:.1} GB", self.size_bytes as f64 / GB as f64)
        } else if self.size_bytes >= MB {
            format!("{:.0} MB", self.size_bytes as f64 / MB as f64)
        } else if self.size_bytes >= KB {
            format!("{:.0} KB", self.size_bytes as f64 / KB as f64)
        } else {
            format!("{} bytes", self.size_bytes)
        }
    }
}

/// A model that has been downloaded and is available locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalModelRecord {
    /// Identifier matching [`ModelDescriptor::id`]
    pub model_id: String,
    pub model_type: ModelType,
    /// Path to the model payload
    #[serde(alias = "modelPath")]
    pub primary_path: PathBuf,
    /// Path to a companion config file (Piper voices)
    #[serde(default, alias = "configPath", skip_serializing_if = "Option::is_none")]
    pub secondary_path: Option<PathBuf>,
    /// Unix timestamp in milliseconds
    #[serde(alias = "downloadedAt")]
    pub downloaded_at_millis: u64,
}

/// State of a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadState {
    /// Whether no further progress follows this state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Completed | DownloadState::Failed | DownloadState::Cancelled
        )
    }
}

/// Download progress information
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    /// Bytes downloaded so far
    pub bytes_downloaded: u64,
    /// Total bytes to download (0 if unknown)
    pub total_bytes: u64,
    /// Percentage (0.0 - 100.0)
    pub percent_complete: f32,
    pub state: DownloadState,
}

impl DownloadProgress {
    pub fn pending() -> Self {
        Self {
            bytes_downloaded: 0,
            total_bytes: 0,
            percent_complete: 0.0,
            state: DownloadState::Pending,
        }
    }

    pub fn downloading(bytes_downloaded: u64, total_bytes: u64) -> Self {
        Self {
            bytes_downloaded,
            total_bytes,
            percent_complete: percent_of(bytes_downloaded, total_bytes),
            state: DownloadState::Downloading,
        }
    }

    pub fn completed(total_bytes: u64) -> Self {
        Self {
            bytes_downloaded: total_bytes,
            total_bytes,
            percent_complete: 100.0,
            state: DownloadState::Completed,
        }
    }

    pub fn failed() -> Self {
        Self {
            state: DownloadState::Failed,
            ..Self::pending()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            state: DownloadState::Cancelled,
            ..Self::pending()
        }
    }
}

/// Percentage of `done` over `total`, clamped to [0, 100]; 0 when the total is unknown
fn percent_of(done: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    ((done as f64 / total as f64) * 100.0).clamp(0.0, 100.0) as f32
}
