//! モデル推論機能

use std::path::PathBuf;

use burn::{
    backend::Wgpu,
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;

use crate::classifier::{ModelLoader, ScoreModel};
use crate::error::ClassifierError;
use crate::ml::{ModelConfig, SkinClassifier, CHANNELS};
use crate::model::model_metadata::NORMALIZATION_MOBILENET_V2;
use crate::model::{load_model_with_metadata, DeviceType, ModelMetadata};

/// 読み込み済みのBurnモデル
pub struct BurnScoreModel<B: Backend> {
    model: SkinClassifier<B>,
    device: B::Device,
    input_size: usize,
}

impl<B: Backend> BurnScoreModel<B> {
    /// モデルの重みを復元
    pub fn from_binary(
        model_binary: Vec<u8>,
        num_classes: usize,
        input_size: u32,
        device: B::Device,
    ) -> Result<Self, ClassifierError> {
        // 推論時はドロップアウトなし
        let model = ModelConfig::new(num_classes)
            .with_dropout(0.0)
            .with_image_size(input_size as usize)
            .init::<B>(&device);

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = Recorder::<B>::load(&recorder, model_binary, &device)
            .map_err(|e| ClassifierError::ModelLoad(format!("cannot restore weights: {:?}", e)))?;

        Ok(Self {
            model: model.load_record(record),
            device,
            input_size: input_size as usize,
        })
    }
}

impl<B: Backend> ScoreModel for BurnScoreModel<B> {
    fn forward(&self, input: &[f32]) -> Result<Vec<f32>, ClassifierError> {
        let size = self.input_size;
        let expected = CHANNELS * size * size;
        if input.len() != expected {
            return Err(ClassifierError::Inference(format!(
                "input has {} values, model expects {} (3x{}x{})",
                input.len(),
                expected,
                size,
                size
            )));
        }

        // Tensorに変換 [1, 3, size, size]
        let tensor = Tensor::<B, 1>::from_floats(input, &self.device).reshape([1, CHANNELS, size, size]);

        self.model
            .predict_proba(tensor)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("cannot read model output: {:?}", e)))
    }
}

/// tar.gzパッケージからモデルを読み込むローダー
pub struct BurnModelLoader {
    model_path: PathBuf,
    device_type: DeviceType,
    input_size: u32,
}

impl BurnModelLoader {
    pub fn new(model_path: PathBuf, device_type: DeviceType, input_size: u32) -> Self {
        Self {
            model_path,
            device_type,
            input_size,
        }
    }

    /// パッケージのメタデータがラベルファイル・入力設定と矛盾しないか確認
    fn check_metadata(&self, metadata: &ModelMetadata, labels: &[String]) -> Result<(), ClassifierError> {
        if !metadata.class_labels.is_empty() && metadata.class_labels != labels {
            return Err(ClassifierError::ModelLoad(format!(
                "model was trained on [{}] but label file lists [{}]",
                metadata.class_labels.join(", "),
                labels.join(", ")
            )));
        }
        if metadata.model_input_size != self.input_size {
            return Err(ClassifierError::ModelLoad(format!(
                "model expects {}x{} input, configured for {}x{}",
                metadata.model_input_size, metadata.model_input_size, self.input_size, self.input_size
            )));
        }
        if metadata.normalization != NORMALIZATION_MOBILENET_V2 {
            return Err(ClassifierError::ModelLoad(format!(
                "unsupported normalization: {}",
                metadata.normalization
            )));
        }
        Ok(())
    }
}

impl ModelLoader for BurnModelLoader {
    fn load(&self, labels: &[String]) -> Result<Box<dyn ScoreModel>, ClassifierError> {
        let (metadata, model_binary) = load_model_with_metadata(&self.model_path)
            .map_err(|e| ClassifierError::ModelLoad(format!("{:#}", e)))?;
        self.check_metadata(&metadata, labels)?;

        tracing::info!(
            path = %self.model_path.display(),
            device = %self.device_type,
            trained_at = %metadata.trained_at,
            "loading model weights"
        );

        let num_classes = labels.len();
        let model: Box<dyn ScoreModel> = match self.device_type {
            DeviceType::Cpu => Box::new(BurnScoreModel::<NdArray>::from_binary(
                model_binary,
                num_classes,
                self.input_size,
                NdArrayDevice::Cpu,
            )?),
            DeviceType::Wgpu => Box::new(BurnScoreModel::<Wgpu>::from_binary(
                model_binary,
                num_classes,
                self.input_size,
                WgpuDevice::default(),
            )?),
        };
        Ok(model)
    }
}
