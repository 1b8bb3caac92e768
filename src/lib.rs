//! 皮膚真菌症の画像分類ライブラリ
//!
//! 画像 → 前処理 → 推論 → ランキング → 疾患情報の参照、までを提供します。
//! モデルの学習・書き出しは `ml` フィーチャー有効時のみ利用できます。

pub mod classifier;
pub mod context;
pub mod disease_info;
pub mod error;
pub mod ml;
pub mod model;
pub mod service;
pub mod types;

#[cfg(test)]
mod test_support;

pub use classifier::{build_classifier, Classifier, MockClassifier, NativeClassifier};
pub use context::{AnalysisReport, AppContext};
pub use disease_info::{DiseaseInfo, DiseaseInfoStore};
pub use error::{ClassifierError, DatasetError, InfoLoadError};
pub use service::ClassificationService;
pub use types::{rank_scores, ClassificationResult};

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// ログ出力を初期化（標準エラー出力、`RUST_LOG` で上書き可能）
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();
}
