//! モデルメタデータの定義と永続化
//!
//! tar.gz形式のモデルパッケージに `metadata.json` として格納されます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 画素値の正規化方式（[-1, 1]）
pub const NORMALIZATION_MOBILENET_V2: &str = "mobilenet_v2";

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// 全クラスラベル（モデル出力の順序）
    /// 例: ["candidiasis", "tinea_corporis", "tinea_pedis", "tinea_versicolor"]
    pub class_labels: Vec<String>,

    /// モデル入力サイズ（通常224x224）
    pub model_input_size: u32,

    /// 画素値の正規化方式
    #[serde(default = "default_normalization")]
    pub normalization: String,

    /// 学習エポック数
    pub num_epochs: u32,

    /// 検証データでの正解率
    #[serde(default)]
    pub validation_accuracy: Option<f64>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

fn default_normalization() -> String {
    NORMALIZATION_MOBILENET_V2.to_string()
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(class_labels: Vec<String>, model_input_size: u32, num_epochs: u32) -> Self {
        Self {
            class_labels,
            model_input_size,
            normalization: default_normalization(),
            num_epochs,
            validation_accuracy: None,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn with_validation_accuracy(mut self, accuracy: f64) -> Self {
        self.validation_accuracy = Some(accuracy);
        self
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
