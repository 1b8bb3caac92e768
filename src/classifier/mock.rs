//! 開発用のダミー分類器
//!
//! モデル無しで画面側の動作確認をするためのもので、
//! 出力される分布に意味はありません。

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::classifier::Classifier;
use crate::error::ClassifierError;
use crate::ml::preprocess::decode_image;
use crate::ml::CLASS_NAMES;
use crate::types::{rank_scores, ClassificationResult};

/// もっともらしく見える重み（CLASS_NAMES の順）
const MOCK_PROFILES: [[f32; 4]; 5] = [
    [0.72, 0.12, 0.09, 0.07],
    [0.10, 0.68, 0.14, 0.08],
    [0.06, 0.15, 0.70, 0.09],
    [0.08, 0.09, 0.11, 0.72],
    [0.35, 0.30, 0.20, 0.15],
];

/// 各重みに掛けるノイズの幅（±）
const NOISE: f32 = 0.15;

pub struct MockClassifier {
    labels: Vec<String>,
    rng: StdRng,
    ready: bool,
}

impl MockClassifier {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// 乱数シードを固定して作成（テスト用）
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            labels: Vec::new(),
            rng,
            ready: false,
        }
    }

    fn synthetic_scores(&mut self) -> Vec<f32> {
        let profile = MOCK_PROFILES[self.rng.gen_range(0..MOCK_PROFILES.len())];
        profile
            .iter()
            .map(|weight| {
                let noise = self.rng.gen_range(-NOISE..NOISE);
                (weight * (1.0 + noise)).max(0.001)
            })
            .collect()
    }
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for MockClassifier {
    fn initialize(&mut self) -> Result<(), ClassifierError> {
        if !self.ready {
            self.labels = CLASS_NAMES.iter().map(|s| s.to_string()).collect();
            self.ready = true;
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn classify(&mut self, image: &[u8]) -> Result<Vec<ClassificationResult>, ClassifierError> {
        if !self.ready {
            return Err(ClassifierError::NotInitialized);
        }
        // 本物と同じく、読めない画像はエラーにする
        decode_image(image)?;

        let scores = self.synthetic_scores();
        rank_scores(&self.labels, &scores)
    }

    fn dispose(&mut self) {
        self.labels.clear();
        self.ready = false;
    }
}
