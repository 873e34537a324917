//! 転移学習用の分類器
//!
//! 事前学習済みの特徴抽出器（バックボーン）を凍結し、その上に
//! グローバル平均プーリング + 全結合層のヘッドだけを学習します。
//! 入力は強度チャンネルを3回複製した3チャンネル画像です。

use anyhow::{Context, Result};
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    record::{DefaultFileRecorder, FullPrecisionSettings},
    tensor::{backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use log::{info, warn};
use std::path::Path;

use crate::ml::ml_model::TileClassifier;
use crate::types::NUM_CLASSES;

/// バックボーンの設定
#[derive(Config, Debug)]
pub struct FeatureExtractorConfig {
    #[config(default = 3)]
    pub in_channels: usize,
    /// 1段目のフィルタ数（段ごとに2倍）
    #[config(default = 32)]
    pub base_filters: usize,
}

impl FeatureExtractorConfig {
    /// 出力特徴マップのチャンネル数
    pub fn feature_dim(&self) -> usize {
        self.base_filters * 8
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> FeatureExtractor<B> {
        let b = self.base_filters;
        let stage = |input: usize, output: usize| {
            Conv2dConfig::new([input, output], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device)
        };

        FeatureExtractor {
            stage1: stage(self.in_channels, b),
            stage2: stage(b, b * 2),
            stage3: stage(b * 2, b * 4),
            stage4: stage(b * 4, b * 8),
            activation: Relu::new(),
        }
    }
}

/// 畳み込みバックボーン（stride 2 の Conv 3x3 + ReLU を4段）
#[derive(Module, Debug)]
pub struct FeatureExtractor<B: Backend> {
    stage1: Conv2d<B>,
    stage2: Conv2d<B>,
    stage3: Conv2d<B>,
    stage4: Conv2d<B>,
    activation: Relu,
}

impl<B: Backend> FeatureExtractor<B> {
    /// `[batch, 3, H, W]` -> `[batch, 8 * base, H / 16, W / 16]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.activation.forward(self.stage1.forward(images));
        let x = self.activation.forward(self.stage2.forward(x));
        let x = self.activation.forward(self.stage3.forward(x));
        self.activation.forward(self.stage4.forward(x))
    }
}

/// 転移学習分類器の設定
#[derive(Config, Debug)]
pub struct TransferClassifierConfig {
    pub backbone: FeatureExtractorConfig,
}

impl TransferClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TransferClassifier<B> {
        TransferClassifier {
            backbone: self.backbone.init(device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head: LinearConfig::new(self.backbone.feature_dim(), NUM_CLASSES).init(device),
            in_channels: self.backbone.in_channels,
        }
    }
}

/// 凍結バックボーン + 学習可能ヘッド
#[derive(Module, Debug)]
pub struct TransferClassifier<B: Backend> {
    backbone: FeatureExtractor<B>,
    pool: AdaptiveAvgPool2d,
    head: Linear<B>,
    in_channels: usize,
}

impl<B: Backend> TransferClassifier<B> {
    /// 事前学習済みのバックボーン重み（burnのレコードファイル）を読み込む
    pub fn load_backbone<P: AsRef<Path>>(mut self, weights: P, device: &B::Device) -> Result<Self> {
        let weights = weights.as_ref();
        let recorder = DefaultFileRecorder::<FullPrecisionSettings>::new();
        self.backbone = self
            .backbone
            .load_file(weights.to_path_buf(), &recorder, device)
            .map_err(|e| anyhow::anyhow!("{:?}", e))
            .with_context(|| format!("バックボーン重みの読み込みに失敗しました: {}", weights.display()))?;
        info!("バックボーン重みを読み込みました: {}", weights.display());
        Ok(self)
    }

    /// 事前学習済み重みがあれば読み込み、バックボーンを凍結する
    pub fn with_pretrained(self, weights: Option<&Path>, device: &B::Device) -> Result<Self> {
        let model = match weights {
            Some(path) => self.load_backbone(path, device)?,
            None => {
                warn!("事前学習済み重みが指定されていません。ランダム初期化したバックボーンを凍結して使用します");
                self
            }
        };
        Ok(model.freeze())
    }

    /// バックボーンのパラメータを勾配計算の対象から外す
    pub fn freeze(mut self) -> Self {
        self.backbone = self.backbone.no_grad();
        self
    }

    /// 順伝播
    ///
    /// - `images`: `[batch_size, 3, size, size]`
    /// - 戻り値: クラスごとのロジット `[batch_size, 2]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let features = self.backbone.forward(images);
        let pooled = self.pool.forward(features);
        let [_, c, _, _] = pooled.dims();

        self.head.forward(pooled.reshape([batch_size, c]))
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

impl<B: Backend> TileClassifier<B> for TransferClassifier<B> {
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
