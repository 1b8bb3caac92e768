//! アプリケーションコンテキスト
//!
//! 分類サービスと疾患情報を起動時に1度だけ構築し、参照で渡します。

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::classifier::{build_classifier, Classifier};
use crate::disease_info::{DiseaseInfo, DiseaseInfoStore};
use crate::error::ClassifierError;
use crate::model::AppConfig;
use crate::service::ClassificationService;
use crate::types::ClassificationResult;

/// 解析結果（分類結果 + 最有力候補の疾患情報）
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub results: Vec<ClassificationResult>,
    pub top_label: String,
    /// 疾患情報が無い場合はラベルそのもの
    pub display_name: String,
    pub info: Option<DiseaseInfo>,
}

pub struct AppContext {
    pub classifier: ClassificationService,
    pub disease_info: Arc<DiseaseInfoStore>,
}

impl AppContext {
    pub fn new(classifier: Box<dyn Classifier>, disease_info: DiseaseInfoStore) -> Self {
        Self {
            classifier: ClassificationService::new(classifier),
            disease_info: Arc::new(disease_info),
        }
    }

    /// 設定から構築
    pub fn from_config(config: &AppConfig) -> Self {
        let disease_info =
            DiseaseInfoStore::from_path_or_bundled(config.disease_info_path.as_deref().map(Path::new));
        tracing::debug!(records = disease_info.len(), "disease info loaded");
        Self::new(build_classifier(config), disease_info)
    }

    /// 画像を分類し、最有力候補の疾患情報を添えて返す
    pub async fn analyze(&self, image: Vec<u8>) -> Result<AnalysisReport, ClassifierError> {
        let results = self.classifier.classify(image).await?;
        let top_label = results
            .first()
            .map(|r| r.label.clone())
            .ok_or_else(|| ClassifierError::Inference("model produced no results".to_string()))?;

        let info = self.disease_info.get_info(&top_label).cloned();
        let display_name = self.disease_info.display_name(&top_label);

        Ok(AnalysisReport {
            results,
            top_label,
            display_name,
            info,
        })
    }
}
