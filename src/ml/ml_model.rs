//! 機械学習モデルの共通定義
//!
//! 船舶あり/なしの2クラス分類に使う独自CNNと、分類器共通のインターフェースを提供します。

use anyhow::Result;
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{
        activation::{sigmoid, softmax},
        backend::Backend,
        Int, Tensor,
    },
    train::ClassificationOutput,
};
use log::debug;

use crate::types::NUM_CLASSES;

/// 分類器に共通の操作
///
/// 入力は `[batch, channels, size, size]`、出力はクラスごとのロジット `[batch, 2]` です。
pub trait TileClassifier<B: Backend> {
    /// 期待する入力チャンネル数
    fn input_channels(&self) -> usize;

    /// 順伝播（ロジット）
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    /// 順伝播と損失計算
    fn classify(&self, images: Tensor<B, 4>, targets: Tensor<B, 1, Int>) -> ClassificationOutput<B>;

    /// クラスごとのソフトマックススコア
    fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.logits(images), 1)
    }
}

/// 独自CNNの設定
#[derive(Config, Debug)]
pub struct VesselCnnConfig {
    /// 入力タイルサイズ（正方形）
    #[config(default = 256)]
    pub image_size: usize,
    /// 入力チャンネル数
    #[config(default = 1)]
    pub in_channels: usize,
    /// 畳み込み2段目の後のドロップアウト率
    #[config(default = 0.2)]
    pub conv_dropout: f64,
    /// 全結合層の間のドロップアウト率
    #[config(default = 0.1)]
    pub dense_dropout: f64,
    /// 隠れ全結合層のユニット数
    #[config(default = 64)]
    pub hidden_units: usize,
    /// 隠れ全結合層の重みに掛けるL2係数
    #[config(default = 0.01)]
    pub l2_penalty: f64,
}

/// 3x3 (padding無し) 畳み込みと 2x2 プーリングを経た後の特徴マップサイズ
pub fn feature_map_size(image_size: usize) -> Option<usize> {
    let after_conv1 = image_size.checked_sub(2)?;
    let after_pool1 = after_conv1 / 2;
    let after_conv2 = after_pool1.checked_sub(2)?;
    let after_pool2 = after_conv2 / 2;
    let size = after_pool2.checked_sub(2)?;
    (size > 0).then_some(size)
}

impl VesselCnnConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<VesselCnn<B>> {
        let Some(map_size) = feature_map_size(self.image_size) else {
            anyhow::bail!("入力サイズが小さすぎます: {} (最小14x14が必要)", self.image_size);
        };

        // 64チャネル * map_size * map_size
        let flattened = 64 * map_size * map_size;
        debug!(
            "VesselCnn: 入力 {}x{}x{}, Conv3後 64x{}x{}, 特徴次元 {}",
            self.in_channels, self.image_size, self.image_size, map_size, map_size, flattened
        );

        Ok(VesselCnn {
            conv1: Conv2dConfig::new([self.in_channels, 32], [3, 3]).init(device),
            pool1: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv2: Conv2dConfig::new([32, 64], [3, 3]).init(device),
            pool2: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv_dropout: DropoutConfig::new(self.conv_dropout).init(),
            conv3: Conv2dConfig::new([64, 64], [3, 3]).init(device),
            fc1: LinearConfig::new(flattened, self.hidden_units).init(device),
            dense_dropout: DropoutConfig::new(self.dense_dropout).init(),
            fc2: LinearConfig::new(self.hidden_units, NUM_CLASSES).init(device),
            activation: Relu::new(),
            in_channels: self.in_channels,
            l2_penalty: self.l2_penalty,
        })
    }
}

/// 1チャンネルSARタイル用のCNN
///
/// # アーキテクチャ
/// - Conv 3x3 (32) + ReLU, MaxPool 2x2
/// - Conv 3x3 (64) + ReLU, MaxPool 2x2, Dropout
/// - Conv 3x3 (64) + ReLU
/// - Flatten
/// - FC: d -> 64 + sigmoid（重みにL2ペナルティ）, Dropout
/// - FC: 64 -> 2
#[derive(Module, Debug)]
pub struct VesselCnn<B: Backend> {
    conv1: Conv2d<B>,
    pool1: MaxPool2d,
    conv2: Conv2d<B>,
    pool2: MaxPool2d,
    conv_dropout: Dropout,
    conv3: Conv2d<B>,

    fc1: Linear<B>,
    dense_dropout: Dropout,
    fc2: Linear<B>,

    activation: Relu,
    in_channels: usize,
    l2_penalty: f64,
}

impl<B: Backend> VesselCnn<B> {
    /// 順伝播
    ///
    /// - `images`: `[batch_size, 1, size, size]`
    /// - 戻り値: クラスごとのロジット `[batch_size, 2]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);
        let x = self.conv_dropout.forward(x);

        let x = self.conv3.forward(x);
        let x = self.activation.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = sigmoid(self.fc1.forward(x));
        let x = self.dense_dropout.forward(x);

        self.fc2.forward(x)
    }

    /// 隠れ全結合層の重みに対するL2ペナルティ `l2 * sum(w^2)`
    pub fn weight_penalty(&self) -> Tensor<B, 1> {
        let weight = self.fc1.weight.val();
        (weight.clone() * weight).sum().mul_scalar(self.l2_penalty)
    }

    /// 順伝播と損失計算（学習用）
    ///
    /// 損失はクロスエントロピーにL2ペナルティを加えたものです。
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());
        let loss = loss + self.weight_penalty();

        ClassificationOutput::new(loss, output, targets)
    }
}

impl<B: Backend> TileClassifier<B> for VesselCnn<B> {
    fn input_channels(&self) -> usize {
        self.in_channels
    }

    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }

    fn classify(&self, images: Tensor<B, 4>, targets: Tensor<B, 1, Int>) -> ClassificationOutput<B> {
        self.forward_classification(images, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::ElementConversion;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_feature_map_size() {
        assert_eq!(feature_map_size(256), Some(60));
        assert_eq!(feature_map_size(32), Some(4));
        assert_eq!(feature_map_size(13), None);
    }

    #[test]
    fn test_too_small_input_is_error() {
        let device = Default::default();
        let config = VesselCnnConfig::new().with_image_size(8);
        assert!(config.init::<TestBackend>(&device).is_err());
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = VesselCnnConfig::new()
            .with_image_size(32)
            .init::<TestBackend>(&device)
            .unwrap();

        let images = Tensor::<TestBackend, 4>::zeros([3, 1, 32, 32], &device);
        assert_eq!(model.forward(images.clone()).dims(), [3, 2]);

        let scores = model.predict(images);
        let sums: Vec<f32> = scores.sum_dim(1).into_data().convert::<f32>().to_vec().unwrap();
        for s in sums {
            assert!((s - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_loss_includes_weight_penalty() {
        let device = Default::default();
        let model = VesselCnnConfig::new()
            .with_image_size(32)
            .init::<TestBackend>(&device)
            .unwrap();

        let images = Tensor::<TestBackend, 4>::ones([2, 1, 32, 32], &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 1], &device);

        let penalty = model.weight_penalty().into_scalar().elem::<f64>();
        assert!(penalty > 0.0);

        let output = model.forward_classification(images, targets.clone());
        let plain = CrossEntropyLossConfig::new()
            .init(&device)
            .forward(output.output.clone(), targets)
            .into_scalar()
            .elem::<f64>();
        let total = output.loss.into_scalar().elem::<f64>();
        assert!((total - plain - penalty).abs() < 1e-4);
    }
}
