//! 機械学習モデルの共通定義
//!
//! 皮膚画像分類用のCNNモデルと関連する設定を提供します。

#[cfg(feature = "ml")]
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};

/// クラス数
pub const NUM_CLASSES: usize = 4;

/// クラス名の定義（モデル出力の順序）
pub const CLASS_NAMES: [&str; NUM_CLASSES] = [
    "candidiasis",
    "tinea_corporis",
    "tinea_pedis",
    "tinea_versicolor",
];

/// モデル設定
#[cfg(feature = "ml")]
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// ドロップアウト率
    #[config(default = 0.5)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub image_size: usize,
}

#[cfg(feature = "ml")]
impl ModelConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> SkinClassifier<B> {
        // stride 2 の畳み込み4層で 224 -> 112 -> 56 -> 28 -> 14
        // その後 Global Average Pooling で入力サイズに依存しない特徴次元にする
        tracing::debug!(
            image_size = self.image_size,
            num_classes = self.num_classes,
            dropout = self.dropout,
            "building classifier network"
        );

        let conv = |channels: [usize; 2]| {
            Conv2dConfig::new(channels, [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device)
        };

        SkinClassifier {
            conv1: conv([3, 32]),
            conv2: conv([32, 64]),
            conv3: conv([64, 128]),
            conv4: conv([128, 256]),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc1: LinearConfig::new(256, 128).init(device),
            fc2: LinearConfig::new(128, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// 皮膚画像分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 (padding 1, stride 2) + ReLU} x 4層
/// - Global Average Pooling -> 256次元
/// - Dropout + FC: 256 -> 128 + ReLU
/// - Dropout + FC: 128 -> num_classes
/// - Softmax (推論時)
#[cfg(feature = "ml")]
#[derive(Module, Debug)]
pub struct SkinClassifier<B: Backend> {
    conv1: Conv2d<B>, // 3 -> 32
    conv2: Conv2d<B>, // 32 -> 64
    conv3: Conv2d<B>, // 64 -> 128
    conv4: Conv2d<B>, // 128 -> 256
    pool: AdaptiveAvgPool2d,

    dropout: Dropout,
    fc1: Linear<B>, // 256 -> 128
    fc2: Linear<B>, // 128 -> num_classes

    activation: Relu,
}

#[cfg(feature = "ml")]
impl<B: Backend> SkinClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]、値域 [-1, 1]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.activation.forward(self.conv1.forward(images));
        let x = self.activation.forward(self.conv2.forward(x));
        let x = self.activation.forward(self.conv3.forward(x));
        let x = self.activation.forward(self.conv4.forward(x));

        // [batch, 256, 1, 1] -> [batch, 256]
        let x = self.pool.forward(x);
        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.dropout.forward(x);
        let x = self.activation.forward(self.fc1.forward(x));
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    /// クラスごとの確率を返す（softmax適用済み）
    pub fn predict_proba(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

#[cfg(all(test, feature = "ml"))]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    #[test]
    fn test_forward_output_shape() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(NUM_CLASSES)
            .with_image_size(32)
            .init::<NdArray>(&device);
        let images = Tensor::<NdArray, 4>::zeros([2, 3, 32, 32], &device);
        assert_eq!(model.forward(images).dims(), [2, NUM_CLASSES]);
    }

    #[test]
    fn test_predict_proba_sums_to_one() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(NUM_CLASSES).init::<NdArray>(&device);
        let images = Tensor::<NdArray, 4>::ones([1, 3, 224, 224], &device);
        let probs = model
            .predict_proba(images)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-3);
    }
}
