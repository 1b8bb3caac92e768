//! 画像分類器
//!
//! 学習済みモデルで推論する `NativeClassifier` と、開発用の
//! `MockClassifier` の2種類を同じ `Classifier` トレイトで扱います。
//! どちらを使うかは設定から構築時に1度だけ決めます。

pub mod mock;
pub mod native;

pub use mock::MockClassifier;
pub use native::NativeClassifier;

use std::path::PathBuf;

use crate::error::ClassifierError;
use crate::model::{AppConfig, ClassifierBackend};
use crate::types::ClassificationResult;

/// 順伝播を行うモデル
pub trait ScoreModel: Send {
    /// 正規化済みの入力 (C, H, W) からクラスごとのスコアを返す
    ///
    /// スコアの順序はラベルファイルの順序と一致する。
    fn forward(&self, input: &[f32]) -> Result<Vec<f32>, ClassifierError>;
}

/// モデルの読み込み元
pub trait ModelLoader: Send {
    /// モデルを読み込む。`labels` はラベルファイルの内容。
    fn load(&self, labels: &[String]) -> Result<Box<dyn ScoreModel>, ClassifierError>;
}

/// 画像分類器
pub trait Classifier: Send {
    /// モデルとラベルを読み込む（初期化済みなら何もしない）
    fn initialize(&mut self) -> Result<(), ClassifierError>;

    fn is_ready(&self) -> bool;

    /// 読み込み済みのラベル（未初期化なら空）
    fn labels(&self) -> &[String];

    /// 画像を分類し、信頼度の降順で全ラベル分の結果を返す
    fn classify(&mut self, image: &[u8]) -> Result<Vec<ClassificationResult>, ClassifierError>;

    /// モデルを解放する
    fn dispose(&mut self);
}

/// 設定に従って分類器を構築
pub fn build_classifier(config: &AppConfig) -> Box<dyn Classifier> {
    let settings = &config.classifier;
    match settings.backend {
        ClassifierBackend::Native => {
            tracing::info!(
                model = %settings.model_path,
                labels = %settings.labels_path,
                device = %config.device_type,
                "using native classifier"
            );
            Box::new(NativeClassifier::new(
                PathBuf::from(&settings.labels_path),
                settings.input_size,
                native_loader(config),
            ))
        }
        ClassifierBackend::Mock => {
            tracing::info!("using mock classifier");
            Box::new(MockClassifier::new())
        }
    }
}

#[cfg(feature = "ml")]
fn native_loader(config: &AppConfig) -> Box<dyn ModelLoader> {
    Box::new(crate::ml::BurnModelLoader::new(
        PathBuf::from(&config.classifier.model_path),
        config.device_type,
        config.classifier.input_size,
    ))
}

#[cfg(not(feature = "ml"))]
fn native_loader(_config: &AppConfig) -> Box<dyn ModelLoader> {
    Box::new(native::UnavailableLoader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_mock_classifier_from_config() {
        let mut config = AppConfig::default();
        config.classifier.backend = ClassifierBackend::Mock;
        let mut classifier = build_classifier(&config);
        assert!(!classifier.is_ready());
        classifier.initialize().unwrap();
        assert_eq!(classifier.labels().len(), 4);
    }

    #[test]
    fn test_native_classifier_with_missing_resources_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.classifier.model_path = dir.path().join("none.tar.gz").to_string_lossy().to_string();
        config.classifier.labels_path = dir.path().join("none.txt").to_string_lossy().to_string();

        let mut classifier = build_classifier(&config);
        let err = classifier.initialize().unwrap_err();
        assert!(matches!(err, ClassifierError::ModelLoad(_)));
        assert!(!classifier.is_ready());
    }
}
