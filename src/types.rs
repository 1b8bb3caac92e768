use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::ClassifierError;

/// 確率分布とみなす合計値の許容誤差
pub const DISTRIBUTION_TOLERANCE: f32 = 1e-3;

/// 1ラベル分の分類結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: String,
    pub confidence: f32,
}

impl ClassificationResult {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// モデル出力をラベルと対応付け、信頼度の降順に並べる
///
/// - 出力が確率分布になっていない場合は正規化する
///   （負値を含むならロジットとみなしてsoftmax、それ以外は合計で割る）
/// - 同じ信頼度はラベル順を保つ（安定ソート）
pub fn rank_scores(
    labels: &[String],
    scores: &[f32],
) -> Result<Vec<ClassificationResult>, ClassifierError> {
    if labels.len() != scores.len() {
        return Err(ClassifierError::Inference(format!(
            "model produced {} scores for {} labels",
            scores.len(),
            labels.len()
        )));
    }
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        return Err(ClassifierError::Inference(format!(
            "model produced a non-finite score: {}",
            bad
        )));
    }

    let probabilities = normalize_scores(scores);

    let mut results: Vec<ClassificationResult> = labels
        .iter()
        .zip(probabilities)
        .map(|(label, confidence)| ClassificationResult::new(label.clone(), confidence))
        .collect();

    // 非有限値は上で弾いているので partial_cmp で足りる（-0.0 と 0.0 は同値として扱う）
    results.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));
    Ok(results)
}

/// スコア列を合計1の分布に変換
pub fn normalize_scores(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let all_non_negative = scores.iter().all(|s| *s >= 0.0);
    let sum: f32 = scores.iter().sum();

    let normalized = if all_non_negative && (sum - 1.0).abs() <= DISTRIBUTION_TOLERANCE {
        scores.to_vec()
    } else if all_non_negative && sum > 0.0 {
        scores.iter().map(|s| s / sum).collect()
    } else {
        softmax(scores)
    };

    normalized.into_iter().map(|p| p.clamp(0.0, 1.0)).collect()
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rank_scores_orders_by_confidence() {
        let results = rank_scores(&labels(&["a", "b", "c"]), &[0.1, 0.7, 0.2]).unwrap();
        let order: Vec<&str> = results.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
        assert!((results[0].confidence - 0.7).abs() < 1e-6);
        assert!((results[1].confidence - 0.2).abs() < 1e-6);
        assert!((results[2].confidence - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_rank_scores_keeps_label_order_on_ties() {
        let results = rank_scores(&labels(&["x", "y", "z", "w"]), &[0.25; 4]).unwrap();
        let order: Vec<&str> = results.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(order, vec!["x", "y", "z", "w"]);
    }

    #[test]
    fn test_rank_scores_treats_signed_zeros_as_ties() {
        let results = rank_scores(&labels(&["a", "b", "c"]), &[-0.0, 0.0, 1.0]).unwrap();
        let order: Vec<&str> = results.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_rank_scores_normalizes_unscaled_scores() {
        let results = rank_scores(&labels(&["a", "b"]), &[2.0, 6.0]).unwrap();
        assert_eq!(results[0].label, "b");
        assert!((results[0].confidence - 0.75).abs() < 1e-6);
        let sum: f32 = results.iter().map(|r| r.confidence).sum();
        assert!((sum - 1.0).abs() < DISTRIBUTION_TOLERANCE);
    }

    #[test]
    fn test_rank_scores_applies_softmax_to_logits() {
        let results = rank_scores(&labels(&["a", "b", "c"]), &[-1.0, 3.0, 0.5]).unwrap();
        assert_eq!(results[0].label, "b");
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.confidence)));
        let sum: f32 = results.iter().map(|r| r.confidence).sum();
        assert!((sum - 1.0).abs() < DISTRIBUTION_TOLERANCE);
    }

    #[test]
    fn test_all_zero_scores_become_uniform() {
        let probs = normalize_scores(&[0.0, 0.0, 0.0, 0.0]);
        for p in probs {
            assert!((p - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn test_rank_scores_rejects_shape_mismatch() {
        let err = rank_scores(&labels(&["a", "b"]), &[0.5, 0.3, 0.2]).unwrap_err();
        assert!(matches!(err, ClassifierError::Inference(_)));
    }

    #[test]
    fn test_rank_scores_rejects_nan() {
        let err = rank_scores(&labels(&["a", "b"]), &[f32::NAN, 0.3]).unwrap_err();
        assert!(matches!(err, ClassifierError::Inference(_)));
    }
}
