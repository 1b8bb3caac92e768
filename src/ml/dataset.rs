//! 学習データセットの走査と検証
//!
//! データディレクトリはクラスごとのサブディレクトリで構成します。
//!
//! ```text
//! data/training_images/
//! ├── candidiasis/
//! ├── tinea_corporis/
//! ├── tinea_pedis/
//! └── tinea_versicolor/
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::DatasetError;

/// 学習に使う画像の拡張子
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "webp", "bmp", "gif"];

/// 必要なクラス数の下限
pub const MIN_CLASSES: usize = 2;
/// 1クラスあたりの画像枚数の下限
pub const MIN_IMAGES_PER_CLASS: usize = 3;
/// 全画像枚数の下限
pub const MIN_TOTAL_IMAGES: usize = 20;

/// 画像ファイルかどうか（拡張子で判定）
pub fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                IMAGE_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
}

/// クラスディレクトリ内の画像を列挙（ファイル名順）
pub fn list_class_images(class_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(class_dir)? {
        let path = entry?.path();
        if is_image_file(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// データセットの統計
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetStats {
    /// クラス名 -> 画像枚数（画像が1枚以上あるクラスのみ）
    pub class_counts: BTreeMap<String, usize>,
}

impl DatasetStats {
    pub fn num_classes(&self) -> usize {
        self.class_counts.len()
    }

    pub fn total_images(&self) -> usize {
        self.class_counts.values().sum()
    }
}

/// データディレクトリを走査して枚数を数える
///
/// 隠しディレクトリ（`.` 始まり）は無視します。
pub fn scan_dataset(data_dir: &Path) -> Result<DatasetStats, DatasetError> {
    if !data_dir.is_dir() {
        return Err(DatasetError::NotFound(data_dir.to_path_buf()));
    }

    let mut class_counts = BTreeMap::new();
    for entry in std::fs::read_dir(data_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !path.is_dir() || name.starts_with('.') {
            continue;
        }

        let count = list_class_images(&path)?.len();
        if count > 0 {
            class_counts.insert(name.to_string(), count);
        }
    }

    Ok(DatasetStats { class_counts })
}

/// 学習に十分なデータがあるか検証
///
/// 問題がある場合は検出したものをすべて `DatasetError::Insufficient` に入れて返します。
pub fn validate_dataset(data_dir: &Path) -> Result<DatasetStats, DatasetError> {
    let stats = scan_dataset(data_dir)?;
    let problems = check_stats(&stats);
    if problems.is_empty() {
        Ok(stats)
    } else {
        Err(DatasetError::Insufficient(problems))
    }
}

fn check_stats(stats: &DatasetStats) -> Vec<String> {
    let num_classes = stats.num_classes();
    let total = stats.total_images();
    let mut problems = Vec::new();

    if num_classes == 0 {
        problems.push("no training images found; add images to one folder per class".to_string());
        return problems;
    }
    if num_classes < MIN_CLASSES {
        problems.push(format!(
            "insufficient classes: {} (minimum: {}), current: {}",
            num_classes,
            MIN_CLASSES,
            stats.class_counts.keys().cloned().collect::<Vec<_>>().join(", ")
        ));
        return problems;
    }

    for (class_name, count) in &stats.class_counts {
        if *count < MIN_IMAGES_PER_CLASS {
            problems.push(format!(
                "class {} has {} images (need {} more)",
                class_name,
                count,
                MIN_IMAGES_PER_CLASS - count
            ));
        }
    }
    if total < MIN_TOTAL_IMAGES {
        problems.push(format!(
            "insufficient total images: {} (minimum: {}), add {} more",
            total,
            MIN_TOTAL_IMAGES,
            MIN_TOTAL_IMAGES - total
        ));
    }
    problems
}

/// 指定したクラス順でサンプル (画像パス, クラスID) を集める
///
/// ディレクトリが存在しないクラスはスキップします。
pub fn collect_samples(data_dir: &Path, class_order: &[String]) -> std::io::Result<Vec<(PathBuf, usize)>> {
    let mut samples = Vec::new();
    for (class_id, class_name) in class_order.iter().enumerate() {
        let class_dir = data_dir.join(class_name);
        if !class_dir.is_dir() {
            tracing::warn!(class = %class_name, "class directory missing, skipped");
            continue;
        }
        for path in list_class_images(&class_dir)? {
            samples.push((path, class_id));
        }
    }
    Ok(samples)
}

/// 画像としてデコードできるか（ヘッダだけでなく本体まで読む）
pub fn is_decodable_image(path: &Path) -> bool {
    image::ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(image::ImageError::IoError)
        .and_then(|reader| reader.decode())
        .is_ok()
}

/// デコードできない画像をサンプルから除く
///
/// 除いた枚数をログに残します。
pub fn remove_corrupted_samples(samples: Vec<(PathBuf, usize)>) -> Vec<(PathBuf, usize)> {
    let total = samples.len();
    let valid: Vec<(PathBuf, usize)> = samples
        .into_iter()
        .filter(|(path, _)| {
            let ok = is_decodable_image(path);
            if !ok {
                tracing::warn!(path = %path.display(), "corrupted image skipped");
            }
            ok
        })
        .collect();

    let skipped = total - valid.len();
    if skipped > 0 {
        tracing::warn!(skipped, remaining = valid.len(), "removed corrupted training images");
    }
    valid
}

/// サンプル (画像パス, クラスID) が学習に十分か再検証
///
/// 壊れた画像を除いた後の枚数で判定します。
pub fn check_samples(samples: &[(PathBuf, usize)], class_order: &[String]) -> Result<DatasetStats, DatasetError> {
    let mut class_counts = BTreeMap::new();
    for (_, class_id) in samples {
        if let Some(name) = class_order.get(*class_id) {
            *class_counts.entry(name.clone()).or_insert(0) += 1;
        }
    }

    let stats = DatasetStats { class_counts };
    let problems = check_stats(&stats);
    if problems.is_empty() {
        Ok(stats)
    } else {
        Err(DatasetError::Insufficient(problems))
    }
}

/// シャッフルして学習用と検証用に分割
pub fn split_samples<T>(mut samples: Vec<T>, validation_split: f32, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let split = validation_split.clamp(0.0, 1.0);
    let val_len = (samples.len() as f32 * split).round() as usize;
    let train_len = samples.len() - val_len;
    let val = samples.split_off(train_len);
    (samples, val)
}
