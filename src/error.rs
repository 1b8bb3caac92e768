//! エラー定義
//!
//! 分類パイプラインのエラーは呼び出し元（画面側）まで伝播させます。
//! 疾患情報の読み込みエラーはログに残すだけで表に出しません。

use std::path::PathBuf;

/// 分類器のエラー
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// モデルまたはラベルファイルが存在しない・壊れている
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("classifier is not initialized")]
    NotInitialized,

    #[error("failed to decode image: {0}")]
    ImageDecode(#[source] image::ImageError),

    /// 順伝播の失敗（入力形状の不一致など）
    #[error("inference failed: {0}")]
    Inference(String),

    /// 別の処理が実行中
    #[error("classifier is busy with another request")]
    Busy,

    #[error("background task failed: {0}")]
    Task(String),
}

impl ClassifierError {
    pub fn model_load(err: impl std::fmt::Display) -> Self {
        ClassifierError::ModelLoad(err.to_string())
    }
}

/// 疾患情報の読み込みエラー（ソフトエラー）
#[derive(Debug, thiserror::Error)]
pub enum InfoLoadError {
    #[error("failed to read disease info {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid disease info JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// 学習データセットの検証エラー
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("dataset directory not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to scan dataset: {0}")]
    Io(#[from] std::io::Error),

    /// 検出したすべての問題を1行ずつ保持する
    #[error("insufficient training data:\n{}", .0.join("\n"))]
    Insufficient(Vec<String>),
}
