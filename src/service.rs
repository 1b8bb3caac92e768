//! 分類器の非同期ラッパー
//!
//! モデル読み込みや推論は時間がかかるため、`spawn_blocking` で
//! 呼び出し元のスレッドを塞がずに実行します。同時に受け付ける処理は1つだけで、
//! 実行中に届いた要求は `Busy` で拒否します。

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::classifier::Classifier;
use crate::error::ClassifierError;
use crate::types::ClassificationResult;

#[derive(Clone)]
pub struct ClassificationService {
    classifier: Arc<Mutex<Box<dyn Classifier>>>,
}

impl ClassificationService {
    pub fn new(classifier: Box<dyn Classifier>) -> Self {
        Self {
            classifier: Arc::new(Mutex::new(classifier)),
        }
    }

    async fn run<T, F>(&self, job: F) -> Result<T, ClassifierError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Classifier) -> Result<T, ClassifierError> + Send + 'static,
    {
        let mut guard = self
            .classifier
            .clone()
            .try_lock_owned()
            .map_err(|_| ClassifierError::Busy)?;

        tokio::task::spawn_blocking(move || job(&mut **guard))
            .await
            .map_err(|e| ClassifierError::Task(e.to_string()))?
    }

    /// モデルを読み込む
    pub async fn initialize(&self) -> Result<(), ClassifierError> {
        self.run(|classifier| classifier.initialize()).await
    }

    /// 画像を分類する
    pub async fn classify(&self, image: Vec<u8>) -> Result<Vec<ClassificationResult>, ClassifierError> {
        self.run(move |classifier| classifier.classify(&image)).await
    }

    /// モデルを解放する
    pub async fn dispose(&self) -> Result<(), ClassifierError> {
        self.run(|classifier| {
            classifier.dispose();
            Ok(())
        })
        .await
    }

    pub async fn is_ready(&self) -> bool {
        self.classifier.lock().await.is_ready()
    }

    pub async fn labels(&self) -> Vec<String> {
        self.classifier.lock().await.labels().to_vec()
    }
}
