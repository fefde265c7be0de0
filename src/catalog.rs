//! Static model catalogs and descriptor resolution.

use std::collections::BTreeMap;

use offline_types::{AsrModel, CustomModel, ModelDescriptor, OfflineError};

/// How a catalog model's artifacts are located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogSource {
    /// Known to the engine by id.
    Prebuilt,
    /// Hosted outside the engine's own list; loaded like a user custom model.
    Remote {
        model_url: &'static str,
        model_lib_url: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub source: CatalogSource,
}

impl CatalogEntry {
    pub fn descriptor(&self) -> ModelDescriptor {
        match self.source {
            CatalogSource::Prebuilt => ModelDescriptor::prebuilt(self.id),
            CatalogSource::Remote {
                model_url,
                model_lib_url,
            } => ModelDescriptor::custom(self.id, model_url, model_lib_url),
        }
    }
}

pub const OFFLINE_MODELS: &[CatalogEntry] = &[
    CatalogEntry {
        id: "Qwen3-4B-q4f16_1-MLC",
        name: "Qwen3-4B (2.7 GB)",
        source: CatalogSource::Prebuilt,
    },
    CatalogEntry {
        id: "Qwen2.5-3B-Instruct-q4f16_1-MLC",
        name: "Qwen2.5-3B-Instruct (1.9 GB)",
        source: CatalogSource::Prebuilt,
    },
    CatalogEntry {
        id: "GPT-5-Distill-Qwen3-4B-Instruct-q4f16_1-MLC",
        name: "GPT-5-Distill-Qwen3-4B (2.28 GB)",
        source: CatalogSource::Remote {
            model_url: "https://huggingface.co/willopcbeta/GPT-5-Distill-Qwen3-4B-Instruct-q4f16_1-MLC",
            model_lib_url: "https://raw.githubusercontent.com/mlc-ai/binary-mlc-llm-libs/main/web-llm-models/v0_2_80/Qwen3-4B-Instruct-2507-q4f16_1-ctx4k_cs1k-webgpu.wasm",
        },
    },
    CatalogEntry {
        id: "Llama-Breeze2-3B-Instruct-Text-q4f16_1-MLC",
        name: "Llama-Breeze2-3B (2.04 GB)",
        source: CatalogSource::Remote {
            model_url: "https://huggingface.co/willopcbeta/Llama-Breeze2-3B-Instruct-Text-q4f16_1-MLC",
            model_lib_url: "https://raw.githubusercontent.com/mlc-ai/binary-mlc-llm-libs/main/web-llm-models/v0_2_80/Llama-3.2-3B-Instruct-q4f16_1-ctx4k_cs1k-webgpu.wasm",
        },
    },
    CatalogEntry {
        id: "EZO-gemma-2-2b-jpn-it-q4f32_1-MLC",
        name: "EZO-gemma-2-2b-jpn-it (1.51 GB)",
        source: CatalogSource::Remote {
            model_url: "https://huggingface.co/willopcbeta/EZO-gemma-2-2b-jpn-it-q4f32_1-MLC",
            model_lib_url: "https://raw.githubusercontent.com/mlc-ai/binary-mlc-llm-libs/main/web-llm-models/v0_2_80/gemma-2-2b-jpn-it-q4f32_1-ctx4k_cs1k-webgpu.wasm",
        },
    },
];

pub fn find_model(model_id: &str) -> Option<&'static CatalogEntry> {
    OFFLINE_MODELS.iter().find(|entry| entry.id == model_id)
}

/// Resolve a model id: the static catalog first, then the caller's registry.
pub fn resolve(model_id: &str, custom_models: &[CustomModel]) -> Result<ModelDescriptor, OfflineError> {
    if let Some(entry) = find_model(model_id) {
        return Ok(entry.descriptor());
    }
    custom_models
        .iter()
        .find(|model| model.id == model_id)
        .map(CustomModel::descriptor)
        .ok_or_else(|| OfflineError::UnknownModel(model_id.to_string()))
}

/// Every catalog descriptor followed by each custom one not already listed.
pub fn descriptors_for_purge(custom_models: &[CustomModel]) -> Vec<ModelDescriptor> {
    let mut descriptors: Vec<ModelDescriptor> =
        OFFLINE_MODELS.iter().map(CatalogEntry::descriptor).collect();
    for model in custom_models {
        if !descriptors.iter().any(|d| d.id == model.id) {
            descriptors.push(model.descriptor());
        }
    }
    descriptors
}

struct AsrEntry {
    id: &'static str,
    name: &'static str,
    quantization: &'static [(&'static str, &'static str)],
    size: &'static str,
}

const ASR_MODELS: &[AsrEntry] = &[
    AsrEntry {
        id: "nicky48/whisper-large-v3-turbo-ONNX",
        name: "whisper-large-v3-turbo (q4f16)",
        quantization: &[("encoder_model", "q4f16"), ("decoder_model_merged", "q4f16")],
        size: "~600 MB",
    },
    AsrEntry {
        id: "Xenova/whisper-small",
        name: "Whisper small (q4)",
        quantization: &[("encoder_model", "q4"), ("decoder_model_merged", "q4")],
        size: "~200 MB",
    },
    AsrEntry {
        id: "Xenova/whisper-base",
        name: "Whisper Base (q4)",
        quantization: &[("encoder_model", "q4"), ("decoder_model_merged", "q4")],
        size: "~150 MB",
    },
];

impl AsrEntry {
    fn to_model(&self) -> AsrModel {
        AsrModel {
            id: self.id.to_string(),
            name: self.name.to_string(),
            quantization: self
                .quantization
                .iter()
                .map(|(component, dtype)| (component.to_string(), dtype.to_string()))
                .collect::<BTreeMap<_, _>>(),
            size: self.size.to_string(),
        }
    }
}

pub fn asr_models() -> Vec<AsrModel> {
    ASR_MODELS.iter().map(AsrEntry::to_model).collect()
}

pub fn find_asr_model(model_id: &str) -> Option<AsrModel> {
    ASR_MODELS
        .iter()
        .find(|entry| entry.id == model_id)
        .map(AsrEntry::to_model)
}
