//! 学習済みモデルによる分類器

use std::path::PathBuf;
use std::time::Instant;

use crate::classifier::{Classifier, ModelLoader, ScoreModel};
use crate::error::ClassifierError;
use crate::ml::preprocess::preprocess_bytes;
use crate::model::load_labels;
use crate::types::{rank_scores, ClassificationResult};

enum State {
    Uninitialized,
    Ready {
        labels: Vec<String>,
        model: Box<dyn ScoreModel>,
    },
}

/// モデルで推論する分類器
///
/// `initialize()` でラベルとモデルを読み込み、`dispose()` で解放します。
pub struct NativeClassifier {
    labels_path: PathBuf,
    input_size: u32,
    loader: Box<dyn ModelLoader>,
    state: State,
}

impl NativeClassifier {
    pub fn new(labels_path: PathBuf, input_size: u32, loader: Box<dyn ModelLoader>) -> Self {
        Self {
            labels_path,
            input_size,
            loader,
            state: State::Uninitialized,
        }
    }
}

impl Classifier for NativeClassifier {
    fn initialize(&mut self) -> Result<(), ClassifierError> {
        if self.is_ready() {
            return Ok(());
        }

        let started = Instant::now();
        let labels = load_labels(&self.labels_path)?;
        let model = self.loader.load(&labels)?;

        tracing::info!(
            labels = labels.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "classifier ready"
        );
        self.state = State::Ready { labels, model };
        Ok(())
    }

    fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready { .. })
    }

    fn labels(&self) -> &[String] {
        match &self.state {
            State::Ready { labels, .. } => labels,
            State::Uninitialized => &[],
        }
    }

    fn classify(&mut self, image: &[u8]) -> Result<Vec<ClassificationResult>, ClassifierError> {
        let State::Ready { labels, model } = &self.state else {
            return Err(ClassifierError::NotInitialized);
        };

        let started = Instant::now();
        let input = preprocess_bytes(image, self.input_size)?;
        let scores = model.forward(&input)?;
        let results = rank_scores(labels, &scores)?;

        if let Some(top) = results.first() {
            tracing::debug!(
                label = %top.label,
                confidence = top.confidence,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "image classified"
            );
        }
        Ok(results)
    }

    fn dispose(&mut self) {
        if self.is_ready() {
            tracing::info!("classifier disposed");
        }
        self.state = State::Uninitialized;
    }
}

/// `ml` フィーチャー無しでビルドした場合のローダー
#[cfg(not(feature = "ml"))]
pub struct UnavailableLoader;

#[cfg(not(feature = "ml"))]
impl ModelLoader for UnavailableLoader {
    fn load(&self, _labels: &[String]) -> Result<Box<dyn ScoreModel>, ClassifierError> {
        Err(ClassifierError::ModelLoad(
            "native inference is not available: built without the `ml` feature".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::png_bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedScores(Vec<f32>);

    impl ScoreModel for FixedScores {
        fn forward(&self, input: &[f32]) -> Result<Vec<f32>, ClassifierError> {
            assert_eq!(input.len(), 3 * 224 * 224);
            assert!(input.iter().all(|v| (-1.0..=1.0).contains(v)));
            Ok(self.0.clone())
        }
    }

    struct FixedLoader {
        scores: Vec<f32>,
        loads: Arc<AtomicUsize>,
    }

    impl ModelLoader for FixedLoader {
        fn load(&self, _labels: &[String]) -> Result<Box<dyn ScoreModel>, ClassifierError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FixedScores(self.scores.clone())))
        }
    }

    struct BrokenLoader;

    impl ModelLoader for BrokenLoader {
        fn load(&self, _labels: &[String]) -> Result<Box<dyn ScoreModel>, ClassifierError> {
            Err(ClassifierError::ModelLoad("corrupt model".to_string()))
        }
    }

    fn classifier_with(labels: &str, scores: Vec<f32>) -> (NativeClassifier, Arc<AtomicUsize>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let labels_path = dir.path().join("labels.txt");
        std::fs::write(&labels_path, labels).unwrap();
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = FixedLoader {
            scores,
            loads: loads.clone(),
        };
        (
            NativeClassifier::new(labels_path, 224, Box::new(loader)),
            loads,
            dir,
        )
    }

    #[test]
    fn test_classify_pairs_scores_with_labels_and_sorts() {
        let (mut classifier, _, _dir) = classifier_with("a\nb\nc\n", vec![0.1, 0.7, 0.2]);
        classifier.initialize().unwrap();

        let results = classifier.classify(&png_bytes(50, 30)).unwrap();
        let pairs: Vec<(&str, f32)> = results
            .iter()
            .map(|r| (r.label.as_str(), r.confidence))
            .collect();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].0, "b");
        assert_eq!(pairs[1].0, "c");
        assert_eq!(pairs[2].0, "a");
        assert!((pairs[0].1 - 0.7).abs() < 1e-6);
        assert!((pairs[2].1 - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_results_form_a_sorted_distribution() {
        let labels = "candidiasis\ntinea_corporis\ntinea_pedis\ntinea_versicolor\n";
        let (mut classifier, _, _dir) = classifier_with(labels, vec![3.0, 1.0, 4.0, 2.0]);
        classifier.initialize().unwrap();

        let results = classifier.classify(&png_bytes(224, 224)).unwrap();
        assert_eq!(results.len(), 4);
        for pair in results.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        let sum: f32 = results.iter().map(|r| r.confidence).sum();
        assert!((sum - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_classify_before_initialize_fails() {
        let (mut classifier, _, _dir) = classifier_with("a\nb\n", vec![0.5, 0.5]);
        let err = classifier.classify(&png_bytes(4, 4)).unwrap_err();
        assert!(matches!(err, ClassifierError::NotInitialized));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (mut classifier, loads, _dir) = classifier_with("a\nb\n", vec![0.5, 0.5]);
        classifier.initialize().unwrap();
        classifier.initialize().unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(classifier.labels(), ["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_dispose_requires_reinitialization() {
        let (mut classifier, loads, _dir) = classifier_with("a\nb\n", vec![0.5, 0.5]);
        classifier.initialize().unwrap();
        classifier.dispose();
        assert!(!classifier.is_ready());
        assert!(classifier.labels().is_empty());
        assert!(matches!(
            classifier.classify(&png_bytes(4, 4)),
            Err(ClassifierError::NotInitialized)
        ));

        classifier.initialize().unwrap();
        assert!(classifier.classify(&png_bytes(4, 4)).is_ok());
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_malformed_image_is_a_decode_error() {
        let (mut classifier, _, _dir) = classifier_with("a\nb\n", vec![0.5, 0.5]);
        classifier.initialize().unwrap();
        let err = classifier.classify(&[0xde, 0xad, 0xbe, 0xef]).unwrap_err();
        assert!(matches!(err, ClassifierError::ImageDecode(_)));
    }

    #[test]
    fn test_score_count_mismatch_is_an_inference_error() {
        let (mut classifier, _, _dir) = classifier_with("a\nb\nc\n", vec![0.5, 0.5]);
        classifier.initialize().unwrap();
        let err = classifier.classify(&png_bytes(8, 8)).unwrap_err();
        assert!(matches!(err, ClassifierError::Inference(_)));
    }

    #[test]
    fn test_loader_failure_leaves_classifier_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let labels_path = dir.path().join("labels.txt");
        std::fs::write(&labels_path, "a\n").unwrap();
        let mut classifier = NativeClassifier::new(labels_path, 224, Box::new(BrokenLoader));

        assert!(matches!(classifier.initialize(), Err(ClassifierError::ModelLoad(_))));
        assert!(!classifier.is_ready());
    }
}
