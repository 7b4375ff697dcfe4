use crate::classifier::EmbedderConfig;

/// Represents the available built-in embedding models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinModel {
    /// MobileNetV2 image classifier from the ONNX model zoo
    ///
    /// Characteristics:
    /// - Embedding size: 1000 (final logits)
    /// - Input: 224x224 RGB, ImageNet normalization
    /// - Size: ~14MB
    MobileNetV2,
}

/// Characteristics of a model including its capabilities and requirements
#[derive(Debug, Clone)]
pub struct ModelCharacteristics {
    /// Size of the embedding vectors produced by the model
    pub embedding_size: usize,
    /// Side length of the square input image
    pub image_size: u32,
    /// Approximate size of the model on disk
    pub model_size_mb: usize,
}

/// Where to fetch a model and how to check it
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub model_url: String,
    /// SHA-256 of the model file; downloads are not verified when unset
    pub model_hash: Option<String>,
}

impl BuiltinModel {
    /// Get the characteristics of the model
    pub fn characteristics(&self) -> ModelCharacteristics {
        match self {
            Self::MobileNetV2 => ModelCharacteristics {
                embedding_size: 1000,
                image_size: 224,
                model_size_mb: 14,
            },
        }
    }

    pub fn get_model_info(&self) -> ModelInfo {
        match self {
            Self::MobileNetV2 => ModelInfo {
                name: "mobilenetv2-7".to_string(),
                model_url: "https://github.com/onnx/models/raw/main/validated/vision/classification/mobilenet/model/mobilenetv2-7.onnx".to_string(),
                model_hash: None,
            },
        }
    }

    /// Preprocessing matching the model's training input
    pub fn embedder_config(&self) -> EmbedderConfig {
        EmbedderConfig {
            image_size: self.characteristics().image_size,
            ..EmbedderConfig::default()
        }
    }
}
