//! アプリケーション設定管理モジュール
//!
//! 計算デバイスや分類器・学習の設定をJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// 分類器の実装
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierBackend {
    /// 学習済みモデルで推論する
    #[default]
    Native,
    /// 開発用のダミー分類器
    Mock,
}

/// 分類器設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub backend: ClassifierBackend,
    /// モデルパッケージ（tar.gz）のパス
    pub model_path: String,
    /// ラベルファイルのパス
    pub labels_path: String,
    /// モデル入力サイズ（正方形）
    pub input_size: u32,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            backend: ClassifierBackend::default(),
            model_path: "models/fungal_classifier.tar.gz".to_string(),
            labels_path: "models/labels.txt".to_string(),
            input_size: crate::ml::IMAGE_SIZE,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード
    pub seed: u64,
    /// 検証データの割合
    pub validation_split: f32,
    /// ドロップアウト率
    pub dropout: f64,
    /// 学習データのランダム反転
    pub augment: bool,
    /// 検証正解率が改善しないまま続けるエポック数（0で無効）
    pub early_stopping_patience: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 50,
            batch_size: 16,
            learning_rate: 1e-3,
            seed: 42,
            validation_split: 0.2,
            dropout: 0.5,
            augment: true,
            early_stopping_patience: 10,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// 分類器設定
    #[serde(default)]
    pub classifier: ClassifierSettings,
    /// トレーニング設定
    #[serde(default)]
    pub training: TrainingSettings,
    /// 疾患情報JSONのパス（未指定ならバイナリ同梱のデータを使用）
    #[serde(default)]
    pub disease_info_path: Option<String>,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub const DEFAULT_PATH: &'static str = "config.json";

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 設定を読み込む、存在しないか壊れている場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "config loaded");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to load config, using defaults"
                );
                Self::default()
            }
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
