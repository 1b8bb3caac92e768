//! モデル学習とエクスポート

use anyhow::{Context, Result};
use image::DynamicImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use burn::{
    backend::{Autodiff, Wgpu},
    data::{dataloader::batcher::Batcher, dataloader::DataLoaderBuilder, dataset::Dataset},
    module::Module,
    optim::AdamConfig,
    record::{BinBytesRecorder, CompactRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
    train::{
        checkpoint::MetricCheckpointingStrategy,
        metric::{
            store::{Aggregate, Direction, Split},
            AccuracyMetric, LossMetric,
        },
        ClassificationOutput, LearnerBuilder, LearningStrategy, MetricEarlyStoppingStrategy,
        StoppingCondition, TrainOutput, TrainStep, ValidStep,
    },
};
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;

use crate::ml::dataset::{
    check_samples, collect_samples, remove_corrupted_samples, split_samples, validate_dataset,
};
use crate::ml::preprocess::{image_to_input, CHANNELS};
use crate::ml::{ModelConfig, SkinClassifier};
use crate::model::{save_model_with_metadata, write_labels, DeviceType, ModelMetadata, TrainingSettings};

/// チェックポイントのファイル名の接頭辞（`model-{epoch}.mpk`）
const CHECKPOINT_PREFIX: &str = "model-";

/// 学習データセット（パスのリストのみ保持）
pub struct SkinDataset {
    samples: Vec<(PathBuf, usize)>, // (画像パス, クラスID)
}

impl SkinDataset {
    pub fn new(samples: Vec<(PathBuf, usize)>) -> Self {
        Self { samples }
    }
}

/// データセットアイテム（画像パスのみ保持）
#[derive(Clone, Debug)]
pub struct SkinItem {
    pub path: PathBuf,
    pub label: usize,
}

impl Dataset<SkinItem> for SkinDataset {
    fn get(&self, index: usize) -> Option<SkinItem> {
        let (path, label) = self.samples.get(index)?;
        Some(SkinItem {
            path: path.clone(),
            label: *label,
        })
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// ランダム反転（学習データのみ）
#[derive(Clone)]
pub struct FlipAugmentation {
    probability: f64,
    rng: Arc<Mutex<StdRng>>,
}

impl FlipAugmentation {
    pub fn new(seed: u64) -> Self {
        Self::with_probability(seed, 0.5)
    }

    pub fn with_probability(seed: u64, probability: f64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// 左右・上下をそれぞれ確率 `probability` で反転
    pub fn apply(&self, img: DynamicImage) -> DynamicImage {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let img = if rng.gen_bool(self.probability) { img.fliph() } else { img };
        if rng.gen_bool(self.probability) {
            img.flipv()
        } else {
            img
        }
    }
}

/// バッチャー
#[derive(Clone)]
pub struct SkinBatcher {
    image_size: usize,
    augmentation: Option<FlipAugmentation>,
}

impl SkinBatcher {
    /// 検証用（拡張なし）
    pub fn new(image_size: usize) -> Self {
        Self {
            image_size,
            augmentation: None,
        }
    }

    /// 学習用（ランダム反転あり）
    pub fn with_augmentation(image_size: usize, augmentation: FlipAugmentation) -> Self {
        Self {
            image_size,
            augmentation: Some(augmentation),
        }
    }

    fn load_input(&self, path: &Path) -> Result<Vec<f32>> {
        let img = image::open(path)?;
        let img = match &self.augmentation {
            Some(augmentation) => augmentation.apply(img),
            None => img,
        };
        // 推論時と同じ前処理（224x224、[-1, 1]）
        Ok(image_to_input(&img, self.image_size as u32))
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct SkinBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, SkinItem, SkinBatch<B>> for SkinBatcher {
    fn batch(&self, items: Vec<SkinItem>, device: &B::Device) -> SkinBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;
        let plane = CHANNELS * size * size;
        let mut all_pixels = Vec::with_capacity(batch_size * plane);
        let mut targets = Vec::with_capacity(batch_size);

        for item in items {
            match self.load_input(&item.path) {
                Ok(image_data) => all_pixels.extend_from_slice(&image_data),
                Err(e) => {
                    // 事前に壊れた画像は除いているので、ここに来るのは学習中に消えた場合のみ
                    tracing::warn!(path = %item.path.display(), error = %e, "failed to load training image");
                    all_pixels.extend(std::iter::repeat(0.0f32).take(plane));
                }
            }
            targets.push(item.label as i64);
        }

        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), device)
            .reshape([batch_size, CHANNELS, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets.as_slice(), device);

        SkinBatch { images, targets }
    }
}

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
impl<B: AutodiffBackend> TrainStep<SkinBatch<B>, ClassificationOutput<B>> for SkinClassifier<B> {
    fn step(&self, batch: SkinBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> ValidStep<SkinBatch<B>, ClassificationOutput<B>> for SkinClassifier<B> {
    fn step(&self, batch: SkinBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// 学習の入力
#[derive(Debug, Clone)]
pub struct TrainingOptions {
    pub data_dir: PathBuf,
    /// 出力するモデルパッケージのパス（.tar.gz）
    pub output_path: PathBuf,
    pub device_type: DeviceType,
    pub image_size: u32,
    pub settings: TrainingSettings,
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub package_path: PathBuf,
    pub labels_path: PathBuf,
    pub class_labels: Vec<String>,
    pub num_train: usize,
    pub num_validation: usize,
    pub validation_accuracy: Option<f64>,
}

/// モデル学習を実行
///
/// データセットを検証し、学習後にモデルパッケージと `labels.txt` を書き出します。
/// クラス順はディレクトリ名のアルファベット順です。
pub fn train_model(options: &TrainingOptions) -> Result<TrainingReport> {
    let started = Instant::now();

    let stats = validate_dataset(&options.data_dir)?;
    let class_labels: Vec<String> = stats.class_counts.keys().cloned().collect();
    for (class_name, count) in &stats.class_counts {
        tracing::info!(class = %class_name, images = count, "training class");
    }

    let samples = collect_samples(&options.data_dir, &class_labels)
        .context("Failed to collect training samples")?;
    let samples = remove_corrupted_samples(samples);
    check_samples(&samples, &class_labels)?;
    let (train, validation) = split_samples(
        samples,
        options.settings.validation_split,
        options.settings.seed,
    );
    let num_train = train.len();
    let num_validation = validation.len();
    tracing::info!(
        train = num_train,
        validation = num_validation,
        device = %options.device_type,
        epochs = options.settings.num_epochs,
        "starting training"
    );

    let (model_binary, validation_accuracy) = match options.device_type {
        DeviceType::Cpu => run_training::<Autodiff<NdArray>>(
            NdArrayDevice::Cpu,
            options,
            class_labels.len(),
            train,
            validation,
        )?,
        DeviceType::Wgpu => run_training::<Autodiff<Wgpu>>(
            WgpuDevice::default(),
            options,
            class_labels.len(),
            train,
            validation,
        )?,
    };

    let mut metadata = ModelMetadata::new(
        class_labels.clone(),
        options.image_size,
        options.settings.num_epochs as u32,
    );
    if let Some(accuracy) = validation_accuracy {
        metadata = metadata.with_validation_accuracy(accuracy);
    }

    let package_path = save_model_with_metadata(&options.output_path, &metadata, &model_binary)?;
    let labels_path = package_path.with_file_name("labels.txt");
    write_labels(&labels_path, &class_labels)
        .with_context(|| format!("Failed to write labels file: {:?}", labels_path))?;

    tracing::info!(
        package = %package_path.display(),
        labels = %labels_path.display(),
        accuracy = ?validation_accuracy,
        elapsed_s = started.elapsed().as_secs(),
        "training complete"
    );

    Ok(TrainingReport {
        package_path,
        labels_path,
        class_labels,
        num_train,
        num_validation,
        validation_accuracy,
    })
}

/// 指定バックエンドで学習し、(重みのバイト列, 検証正解率) を返す
fn run_training<B: AutodiffBackend>(
    device: B::Device,
    options: &TrainingOptions,
    num_classes: usize,
    train: Vec<(PathBuf, usize)>,
    validation: Vec<(PathBuf, usize)>,
) -> Result<(Vec<u8>, Option<f64>)> {
    let settings = &options.settings;
    let image_size = options.image_size as usize;

    let train_batcher = if settings.augment {
        SkinBatcher::with_augmentation(image_size, FlipAugmentation::new(settings.seed))
    } else {
        SkinBatcher::new(image_size)
    };

    // 分割時にシャッフル済みなのでここではシャッフル不要
    let dataloader_train = DataLoaderBuilder::new(train_batcher)
        .batch_size(settings.batch_size)
        .num_workers(0)
        .build(SkinDataset::new(train));
    let dataloader_val = DataLoaderBuilder::new(SkinBatcher::new(image_size))
        .batch_size(settings.batch_size)
        .num_workers(0)
        .build(SkinDataset::new(validation.clone()));

    let model = ModelConfig::new(num_classes)
        .with_dropout(settings.dropout)
        .with_image_size(image_size)
        .init::<B>(&device);

    let artifact_dir = create_artifact_dir()?;
    let artifact_dir_str = artifact_dir.path().to_string_lossy().to_string();

    let mut builder = LearnerBuilder::new(&artifact_dir_str)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        // 検証正解率が最も高いエポックのチェックポイントだけを残す
        .with_file_checkpointer(CompactRecorder::new())
        .with_checkpointing_strategy(MetricCheckpointingStrategy::new(
            &AccuracyMetric::<B::InnerBackend>::new(),
            Aggregate::Mean,
            Direction::Highest,
            Split::Valid,
        ))
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(settings.num_epochs)
        .summary();

    if settings.early_stopping_patience > 0 {
        builder = builder.early_stopping(MetricEarlyStoppingStrategy::new(
            &AccuracyMetric::<B::InnerBackend>::new(),
            Aggregate::Mean,
            Direction::Highest,
            Split::Valid,
            StoppingCondition::NoImprovementSince {
                n_epochs: settings.early_stopping_patience,
            },
        ));
    }

    let learner = builder.build(model, AdamConfig::new().init(), settings.learning_rate);
    let trained = learner.fit(dataloader_train, dataloader_val);
    let mut inference_model = trained.model;

    // 最良エポックの重みに戻す
    let checkpoint_dir = artifact_dir.path().join("checkpoint");
    if let Some(epoch) = best_checkpoint_epoch(&checkpoint_dir) {
        let checkpoint = checkpoint_dir.join(format!("{}{}", CHECKPOINT_PREFIX, epoch));
        match Recorder::<B::InnerBackend>::load(&CompactRecorder::new(), checkpoint, &device) {
            Ok(record) => {
                tracing::info!(epoch, "restored best checkpoint");
                inference_model = inference_model.load_record(record);
            }
            Err(e) => {
                tracing::warn!(epoch, error = ?e, "failed to restore best checkpoint, keeping last epoch");
            }
        }
    }

    let validation_accuracy = evaluate_accuracy(
        &inference_model,
        &validation,
        image_size,
        settings.batch_size,
        &device,
    );

    // f32精度のまま保存
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let model_binary = Recorder::<B::InnerBackend>::record(&recorder, inference_model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("Failed to serialize model weights: {:?}", e))?;

    Ok((model_binary, validation_accuracy))
}

/// 学習の作業ディレクトリ（実行ごとに別、drop時に削除）
fn create_artifact_dir() -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("fungi_scan_training_")
        .tempdir()
        .context("Failed to create artifact directory")
}

/// 残っているモデルチェックポイントのうち最新のエポック番号
///
/// 正解率ベースの保存戦略では最良エポックだけが残る。
fn best_checkpoint_epoch(checkpoint_dir: &Path) -> Option<usize> {
    std::fs::read_dir(checkpoint_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            name.strip_prefix(CHECKPOINT_PREFIX)?
                .strip_suffix(".mpk")?
                .parse::<usize>()
                .ok()
        })
        .max()
}

/// 検証データでの正解率（検証データが無ければ None）
fn evaluate_accuracy<B: Backend>(
    model: &SkinClassifier<B>,
    samples: &[(PathBuf, usize)],
    image_size: usize,
    batch_size: usize,
    device: &B::Device,
) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }

    let batcher = SkinBatcher::new(image_size);
    let mut correct = 0usize;
    for chunk in samples.chunks(batch_size.max(1)) {
        let items = chunk
            .iter()
            .map(|(path, label)| SkinItem {
                path: path.clone(),
                label: *label,
            })
            .collect();
        let batch = Batcher::<B, SkinItem, SkinBatch<B>>::batch(&batcher, items, device);
        let predicted = model.forward(batch.images).argmax(1).flatten::<1>(0, 1);
        correct += predicted
            .equal(batch.targets)
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>() as usize;
    }
    Some(correct as f64 / samples.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_batcher_shapes_and_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        RgbImage::from_pixel(40, 20, Rgb([255, 255, 255])).save(&good).unwrap();
        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"broken").unwrap();

        let items = vec![
            SkinItem { path: good, label: 1 },
            SkinItem { path: bad, label: 3 },
        ];
        let device = NdArrayDevice::Cpu;
        let batch = Batcher::<NdArray, SkinItem, SkinBatch<NdArray>>::batch(&SkinBatcher::new(8), items, &device);

        assert_eq!(batch.images.dims(), [2, 3, 8, 8]);
        let pixels = batch.images.into_data().to_vec::<f32>().unwrap();
        assert!(pixels[..192].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(pixels[192..].iter().all(|v| *v == 0.0));
        let targets = batch.targets.into_data().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![1, 3]);
    }

    #[test]
    fn test_untrained_model_accuracy_is_a_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let mut samples = Vec::new();
        for i in 0..3 {
            let path = dir.path().join(format!("{}.png", i));
            RgbImage::from_pixel(8, 8, Rgb([i * 40, 10, 200])).save(&path).unwrap();
            samples.push((path, i as usize % 2));
        }
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(2).with_image_size(16).init::<NdArray>(&device);

        // バッチサイズ2で端数のバッチも含めて数える
        let accuracy = evaluate_accuracy(&model, &samples, 16, 2, &device).unwrap();
        assert!((0.0..=1.0).contains(&accuracy));
        assert_eq!(evaluate_accuracy(&model, &[], 16, 2, &device), None);
    }

    /// 左半分が赤、右半分が青の画像
    fn write_split_image(path: &Path) {
        let img = RgbImage::from_fn(8, 8, |x, _| {
            if x < 4 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        });
        img.save(path).unwrap();
    }

    fn red_plane(batcher: &SkinBatcher, path: &Path) -> Vec<f32> {
        let items = vec![SkinItem {
            path: path.to_path_buf(),
            label: 0,
        }];
        let batch = Batcher::<NdArray, SkinItem, SkinBatch<NdArray>>::batch(batcher, items, &NdArrayDevice::Cpu);
        let pixels = batch.images.into_data().to_vec::<f32>().unwrap();
        pixels[..64].to_vec()
    }

    #[test]
    fn test_training_batcher_flips_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("split.png");
        write_split_image(&path);

        let plain = red_plane(&SkinBatcher::new(8), &path);
        assert!((plain[0] - 1.0).abs() < 1e-6);
        assert!((plain[7] + 1.0).abs() < 1e-6);

        let flipping = SkinBatcher::with_augmentation(8, FlipAugmentation::with_probability(42, 1.0));
        let flipped = red_plane(&flipping, &path);
        assert!((flipped[0] + 1.0).abs() < 1e-6);
        assert!((flipped[7] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_validation_batcher_never_augments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("split.png");
        write_split_image(&path);

        let batcher = SkinBatcher::new(8);
        let first = red_plane(&batcher, &path);
        for _ in 0..5 {
            assert_eq!(red_plane(&batcher, &path), first);
        }
    }

    #[test]
    fn test_flip_augmentation_is_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("split.png");
        write_split_image(&path);

        let a = SkinBatcher::with_augmentation(8, FlipAugmentation::new(7));
        let b = SkinBatcher::with_augmentation(8, FlipAugmentation::new(7));
        for _ in 0..8 {
            assert_eq!(red_plane(&a, &path), red_plane(&b, &path));
        }
    }

    #[test]
    fn test_artifact_dirs_are_unique_and_removed() {
        let first = create_artifact_dir().unwrap();
        let second = create_artifact_dir().unwrap();
        assert_ne!(first.path(), second.path());

        let path = first.path().to_path_buf();
        std::fs::create_dir_all(path.join("checkpoint")).unwrap();
        drop(first);
        assert!(!path.exists());
        assert!(second.path().exists());
    }

    #[test]
    fn test_best_checkpoint_epoch() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(best_checkpoint_epoch(&dir.path().join("missing")), None);

        for name in ["model-3.mpk", "model-12.mpk", "optim-14.mpk", "scheduler-14.mpk"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(best_checkpoint_epoch(dir.path()), Some(12));
    }

    #[test]
    fn test_train_model_rejects_insufficient_dataset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("candidiasis")).unwrap();
        let options = TrainingOptions {
            data_dir: dir.path().to_path_buf(),
            output_path: dir.path().join("out/model.tar.gz"),
            device_type: DeviceType::Cpu,
            image_size: 224,
            settings: TrainingSettings::default(),
        };
        assert!(train_model(&options).is_err());
        assert!(!dir.path().join("out").exists());
    }
}
