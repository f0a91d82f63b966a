//! Piper voices listed in `rhasspy/piper-voices/voices.json`

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;
use voxkit_core::{
    FileRole, LanguageInfo, ModelAttributes, ModelDescriptor, ModelType, PiperAttributes,
    PiperQuality, RemoteFile,
};

use super::ManifestSource;
use crate::error::ModelError;

const REPO: &str = "rhasspy/piper-voices";

/// Voice files are pinned to this revision
const FILES_REVISION: &str = "v1.0.0";

#[derive(Debug, Deserialize)]
struct VoiceEntry {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    name: Option<String>,
    language: LanguageInfo,
    #[serde(default)]
    quality: Option<String>,
    #[serde(default)]
    num_speakers: Option<u32>,
    #[serde(default)]
    speaker_id_map: Option<BTreeMap<String, i64>>,
    files: BTreeMap<String, VoiceFile>,
}

#[derive(Debug, Deserialize)]
struct VoiceFile {
    #[serde(default)]
    size_bytes: u64,
    #[serde(default)]
    md5_digest: Option<String>,
}

/// Manifest of `rhasspy/piper-voices`
#[derive(Debug, Clone, Copy, Default)]
pub struct PiperManifest;

impl PiperManifest {
    fn parse_voice(key: &str, entry: VoiceEntry, base_url: &str) -> Option<ModelDescriptor> {
        let id = entry.key.unwrap_or_else(|| key.to_string());
        let download_base = format!("{}/{}/resolve/{}", base_url, REPO, FILES_REVISION);

        let mut model = None;
        let mut config = None;
        let mut size_bytes = 0;
        for (path, info) in entry.files {
            size_bytes += info.size_bytes;
            let role = if path.ends_with(".onnx.json") {
                FileRole::Config
            } else if path.ends_with(".onnx") {
                FileRole::Primary
            } else {
                continue;
            };
            let file = RemoteFile {
                url: format!("{}/{}", download_base, path),
                file_name: path.rsplit('/').next().unwrap_or(&path).to_string(),
                role,
                size_bytes: info.size_bytes,
                checksum: info.md5_digest,
            };
            match role {
                FileRole::Primary => model = Some(file),
                FileRole::Config => config = Some(file),
            }
        }

        let (Some(model), Some(config)) = (model, config) else {
            debug!("Skipping voice {} without model and config files", id);
            return None;
        };

        let quality_label = entry.quality.unwrap_or_else(|| "medium".to_string());
        let quality = PiperQuality::from_label(&quality_label).unwrap_or(PiperQuality::Medium);

        let name = entry.name.unwrap_or_else(|| id.clone());
        let language = entry.language;
        let mut region = String::new();
        if !language.country_english.is_empty() {
            region.push_str(&language.country_english);
            region.push(' ');
        }
        region.push_str(&language.name_english);
        let display_name = format!(
            "{} ({}, {})",
            capitalize(&name),
            region,
            capitalize(&quality_label)
        );

        Some(ModelDescriptor {
            id,
            display_name,
            size_bytes,
            model_type: ModelType::PIPER,
            files: vec![model, config],
            attributes: ModelAttributes::Piper(PiperAttributes {
                language,
                quality,
                num_speakers: entry.num_speakers.unwrap_or(1),
                speaker_id_map: entry.speaker_id_map.unwrap_or_default(),
            }),
        })
    }
}

impl ManifestSource for PiperManifest {
    fn family(&self) -> ModelType {
        ModelType::PIPER
    }

    fn manifest_url(&self, base_url: &str) -> String {
        format!("{}/{}/resolve/main/voices.json", base_url, REPO)
    }

    fn snapshot_file_name(&self) -> &str {
        "piper_catalog_cache.json"
    }

    fn parse_manifest(
        &self,
        body: &str,
        base_url: &str,
    ) -> Result<Vec<ModelDescriptor>, ModelError> {
        let root: serde_json::Map<String, serde_json::Value> = serde_json::from_str(body)
            .map_err(|e| ModelError::Parse(format!("voices.json: {}", e)))?;

        let mut voices: Vec<ModelDescriptor> = root
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_value::<VoiceEntry>(value) {
                Ok(entry) => Self::parse_voice(&key, entry, base_url),
                Err(e) => {
                    debug!("Skipping malformed voice {}: {}", key, e);
                    None
                }
            })
            .collect();

        voices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(voices)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
