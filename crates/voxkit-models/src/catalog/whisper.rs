//! whisper.cpp GGML models listed by the HuggingFace model API

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;
use voxkit_core::{
    FileRole, ModelAttributes, ModelDescriptor, ModelType, Quantization, RemoteFile,
    WhisperAttributes, WhisperSize,
};

use super::ManifestSource;
use crate::error::ModelError;

const REPO: &str = "ggerganov/whisper.cpp";

/// ggml-tiny.bin, ggml-base.en.bin, ggml-medium-q5_1.bin, ggml-large-v3-turbo.bin
static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^ggml-(tiny|base|small|medium|large-v1|large-v2|large-v3-turbo|large-v3)",
        r"(?:\.(en))?(?:-(q5_1|q8_0))?\.bin$",
    ))
    .expect("whisper filename pattern is valid")
});

#[derive(Deserialize)]
struct HubModel {
    #[serde(default)]
    siblings: Vec<serde_json::Value>,
}

/// Manifest of `ggerganov/whisper.cpp`
#[derive(Debug, Clone, Copy, Default)]
pub struct WhisperManifest;

impl WhisperManifest {
    /// Build a descriptor from a repository file name, if it is a model
    pub fn parse_file_name(file_name: &str, base_url: &str) -> Option<ModelDescriptor> {
        let caps = FILENAME_RE.captures(file_name)?;
        let size = WhisperSize::from_label(caps.get(1)?.as_str())?;
        let english_only = caps.get(2).is_some();
        let quantization = caps
            .get(3)
            .and_then(|m| Quantization::from_label(m.as_str()));

        let mut display_name = format!(
            "Whisper {} ({})",
            capitalize(size.label()),
            if english_only { "English" } else { "Multilingual" }
        );
        if let Some(q) = quantization {
            display_name.push_str(&format!(" [{}]", q.label()));
        }

        let base_bytes = size.approximate_bytes();
        let size_bytes = match quantization {
            Some(q) => (base_bytes as f64 * q.size_ratio()) as u64,
            None => base_bytes,
        };

        Some(ModelDescriptor {
            id: file_name.to_string(),
            display_name,
            size_bytes,
            model_type: ModelType::WHISPER,
            files: vec![RemoteFile {
                url: format!("{}/{}/resolve/main/{}", base_url, REPO, file_name),
                file_name: file_name.to_string(),
                role: FileRole::Primary,
                size_bytes,
                checksum: None,
            }],
            attributes: ModelAttributes::Whisper(WhisperAttributes {
                size,
                english_only,
                quantization,
            }),
        })
    }
}

impl ManifestSource for WhisperManifest {
    fn family(&self) -> ModelType {
        ModelType::WHISPER
    }

    fn manifest_url(&self, base_url: &str) -> String {
        format!("{}/api/models/{}", base_url, REPO)
    }

    fn snapshot_file_name(&self) -> &str {
        "whisper_catalog_cache.json"
    }

    fn parse_manifest(
        &self,
        body: &str,
        base_url: &str,
    ) -> Result<Vec<ModelDescriptor>, ModelError> {
        let model: HubModel = serde_json::from_str(body)
            .map_err(|e| ModelError::Parse(format!("{} model info: {}", REPO, e)))?;

        let mut models: Vec<ModelDescriptor> = model
            .siblings
            .iter()
            .filter_map(|sibling| {
                let Some(file_name) = sibling.get("rfilename").and_then(|v| v.as_str()) else {
                    debug!("Skipping sibling without rfilename: {}", sibling);
                    return None;
                };
                Self::parse_file_name(file_name, base_url)
            })
            .collect();

        models.sort_by_key(|m| m.size_bytes);
        Ok(models)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
