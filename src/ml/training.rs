//! モデル学習
//!
//! 前処理済みのタイルをburnのデータローダーに流し、`LearnerBuilder` で学習します。

use anyhow::{Context, Result};
use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoaderBuilder},
        dataset::Dataset,
    },
    optim::AdamConfig,
    tensor::{
        backend::{AutodiffBackend, Backend},
        Int, Tensor,
    },
    train::{
        metric::{AccuracyMetric, LossMetric},
        ClassificationOutput, LearnerBuilder, LearningStrategy, TrainOutput, TrainStep, ValidStep,
    },
};
use log::{info, warn};
use std::path::{Path, PathBuf};

use crate::dataset::{PreparedData, TileDataset, TileSample};
use crate::ml::backend::{wgpu_device, InferenceBackend, TrainBackend};
use crate::ml::inference::ClassifierModel;
use crate::ml::ml_model::VesselCnn;
use crate::ml::transfer::TransferClassifier;
use crate::model::{AppConfig, ModelMetadata};
use crate::report::TrainingHistory;
use crate::types::ClassifierVariant;

/// データセットアイテム（1チャンネル、行優先の画素値）
#[derive(Clone, Debug)]
pub struct TileItem {
    pub pixels: Vec<f32>,
    pub label: usize,
}

impl From<&TileSample> for TileItem {
    fn from(sample: &TileSample) -> Self {
        Self {
            pixels: sample.tile.to_vec(),
            label: sample.label,
        }
    }
}

impl Dataset<TileItem> for TileDataset {
    fn get(&self, index: usize) -> Option<TileItem> {
        self.samples().get(index).map(TileItem::from)
    }

    fn len(&self) -> usize {
        TileDataset::len(self)
    }
}

/// バッチャー
///
/// `channels` が1より大きい場合は強度チャンネルを複製します。
#[derive(Clone)]
pub struct TileBatcher<B: Backend> {
    device: B::Device,
    tile_size: usize,
    channels: usize,
}

impl<B: Backend> TileBatcher<B> {
    pub fn new(device: B::Device, tile_size: usize, channels: usize) -> Self {
        Self {
            device,
            tile_size,
            channels: channels.max(1),
        }
    }
}

impl<B: Backend> Batcher<B, TileItem, TileBatch<B>> for TileBatcher<B> {
    fn batch(&self, items: Vec<TileItem>, _device: &B::Device) -> TileBatch<B> {
        let batch_size = items.len();
        let plane = self.tile_size * self.tile_size;
        let mut all_pixels = Vec::with_capacity(batch_size * self.channels * plane);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            if item.pixels.len() == plane {
                for _ in 0..self.channels {
                    all_pixels.extend_from_slice(&item.pixels);
                }
            } else {
                warn!("タイルの画素数が不正です: {} (期待: {})", item.pixels.len(), plane);
                all_pixels.extend(std::iter::repeat(0.0f32).take(self.channels * plane));
            }
            targets_vec.push(item.label as i64);
        }

        // 1回の転送でバッチ全体をデバイスへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device).reshape([
            batch_size,
            self.channels,
            self.tile_size,
            self.tile_size,
        ]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        TileBatch { images, targets }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct TileBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: AutodiffBackend> TrainStep<TileBatch<B>, ClassificationOutput<B>> for VesselCnn<B> {
    fn step(&self, batch: TileBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

impl<B: Backend> ValidStep<TileBatch<B>, ClassificationOutput<B>> for VesselCnn<B> {
    fn step(&self, batch: TileBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

impl<B: AutodiffBackend> TrainStep<TileBatch<B>, ClassificationOutput<B>> for TransferClassifier<B> {
    fn step(&self, batch: TileBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

impl<B: Backend> ValidStep<TileBatch<B>, ClassificationOutput<B>> for TransferClassifier<B> {
    fn step(&self, batch: TileBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// 学習結果
pub struct TrainedClassifier {
    /// 検証用バックエンドに移したモデル
    pub model: ClassifierModel<InferenceBackend>,
    pub metadata: ModelMetadata,
    /// `model.bin` に書き込む重み
    pub model_binary: Vec<u8>,
    /// エポックごとの損失・正解率
    pub history: TrainingHistory,
}

/// 学習ログ（burnのメトリクスログとチェックポイント）の保存先
pub fn training_artifact_dir(config: &AppConfig, variant: ClassifierVariant) -> PathBuf {
    config.output_dir().join(format!("training_{}", variant))
}

// どちらのモデルでも同じ Learner 構成で学習する
macro_rules! fit_classifier {
    ($model:expr, $artifact_dir:expr, $device:expr, $epochs:expr, $lr:expr, $train:expr, $valid:expr) => {{
        let learner = LearnerBuilder::new($artifact_dir)
            .metric_train_numeric(AccuracyMetric::new())
            .metric_valid_numeric(AccuracyMetric::new())
            .metric_train_numeric(LossMetric::new())
            .metric_valid_numeric(LossMetric::new())
            .learning_strategy(LearningStrategy::SingleDevice($device.clone()))
            .num_epochs($epochs)
            .summary()
            .build($model, AdamConfig::new().init(), $lr);

        learner.fit($train, $valid).model
    }};
}

/// 分類器を学習する
///
/// `data` は正規化・データ拡張済みであること。`pretrained` は転移学習の
/// バックボーン重みで、未指定なら設定ファイルの値を使います。
pub fn train_classifier(
    config: &AppConfig,
    variant: ClassifierVariant,
    data: &PreparedData,
    pretrained: Option<&Path>,
) -> Result<TrainedClassifier> {
    let settings = &config.training;
    let tile_size = config.sampling.tile_size();
    let channels = variant.input_channels();
    let learning_rate = match variant {
        ClassifierVariant::Custom => settings.learning_rate,
        ClassifierVariant::Transfer => settings.transfer_learning_rate,
    };

    info!(
        "学習を開始します: {} (入力 {}ch x {}x{}), エポック数 {}, バッチサイズ {}, 学習率 {}",
        variant, channels, tile_size, tile_size, settings.num_epochs, settings.batch_size, learning_rate
    );
    info!(
        "学習データ: {} 枚, 検証データ: {} 枚",
        data.train.len(),
        data.validation.len()
    );

    let device = wgpu_device(&config.device_type);

    let batcher_train = TileBatcher::<TrainBackend>::new(device.clone(), tile_size, channels);
    let batcher_valid = TileBatcher::<InferenceBackend>::new(device.clone(), tile_size, channels);

    let mut builder_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(settings.batch_size)
        .num_workers(settings.num_workers);
    if settings.shuffle {
        builder_train = builder_train.shuffle(settings.seed);
    }
    let dataloader_train = builder_train.build(data.train.clone());
    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(settings.batch_size)
        .num_workers(settings.num_workers)
        .build(data.validation.clone());

    let artifact_dir = training_artifact_dir(config, variant);
    // 前回の学習のログと混ざらないようにする
    if artifact_dir.exists() {
        std::fs::remove_dir_all(&artifact_dir).with_context(|| {
            format!("前回の学習ログを削除できません: {}", artifact_dir.display())
        })?;
    }
    std::fs::create_dir_all(&artifact_dir)
        .with_context(|| format!("作業ディレクトリを作成できません: {}", artifact_dir.display()))?;
    let artifact_dir_str = artifact_dir.to_string_lossy().to_string();

    let trained = match ClassifierModel::<TrainBackend>::init(variant, tile_size, &device)? {
        ClassifierModel::Custom(model) => ClassifierModel::Custom(fit_classifier!(
            model,
            &artifact_dir_str,
            device,
            settings.num_epochs,
            learning_rate,
            dataloader_train,
            dataloader_valid
        )),
        ClassifierModel::Transfer(model) => {
            let weights = pretrained.map(Path::to_path_buf).or_else(|| {
                config
                    .model
                    .pretrained_weights
                    .as_ref()
                    .map(PathBuf::from)
            });
            let model = model.with_pretrained(weights.as_deref(), &device)?;
            ClassifierModel::Transfer(fit_classifier!(
                model,
                &artifact_dir_str,
                device,
                settings.num_epochs,
                learning_rate,
                dataloader_train,
                dataloader_valid
            ))
        }
    };

    let history = match TrainingHistory::from_metric_logs(&artifact_dir) {
        Ok(history) => history,
        Err(e) => {
            warn!("学習履歴を読み込めません: {:#}", e);
            TrainingHistory::default()
        }
    };
    if history.is_empty() {
        warn!("学習履歴が見つかりません: {}", artifact_dir.display());
    } else {
        info!("学習履歴: {} エポック ({})", history.len(), artifact_dir.display());
    }

    info!("学習済みモデルの総パラメータ数: {}", trained.num_params());
    let model_binary = trained.to_bytes()?;

    let metadata = ModelMetadata::new(
        variant,
        tile_size as u32,
        data.normalization,
        settings.num_epochs as u32,
        learning_rate,
        data.train.len() as u32,
        data.validation.len() as u32,
    )
    .with_normalization_policy(data.normalization_policy);

    Ok(TrainedClassifier {
        model: trained,
        metadata,
        model_binary,
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Tile;
    use burn_ndarray::NdArray;
    use ndarray::Array2;

    type TestBackend = NdArray;

    #[test]
    fn test_dataset_items() {
        let mut dataset = TileDataset::new();
        dataset.push(Tile::new(Array2::from_shape_fn((2, 2), |(r, c)| (r * 2 + c) as f32)), 1);

        let item = Dataset::<TileItem>::get(&dataset, 0).unwrap();
        assert_eq!(item.pixels, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(item.label, 1);
        assert!(Dataset::<TileItem>::get(&dataset, 1).is_none());
        assert_eq!(Dataset::<TileItem>::len(&dataset), 1);
    }

    #[test]
    fn test_batcher_triplicates_intensity_channel() {
        let device = Default::default();
        let batcher = TileBatcher::<TestBackend>::new(device, 2, 3);
        let items = vec![
            TileItem {
                pixels: vec![0.1, 0.2, 0.3, 0.4],
                label: 1,
            },
            TileItem {
                pixels: vec![0.5, 0.6, 0.7, 0.8],
                label: 0,
            },
        ];

        let batch = batcher.batch(items, &Default::default());
        assert_eq!(batch.images.dims(), [2, 3, 2, 2]);

        let pixels: Vec<f32> = batch.images.into_data().convert::<f32>().to_vec().unwrap();
        assert_eq!(&pixels[0..4], &pixels[4..8]);
        assert_eq!(&pixels[0..4], &pixels[8..12]);
        assert_eq!(pixels[12], 0.5);

        let targets: Vec<i64> = batch.targets.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(targets, vec![1, 0]);
    }

    #[test]
    fn test_single_channel_batch() {
        let device = Default::default();
        let batcher = TileBatcher::<TestBackend>::new(device, 3, 1);
        let items = vec![TileItem {
            pixels: vec![1.0; 9],
            label: 0,
        }];
        let batch = batcher.batch(items, &Default::default());
        assert_eq!(batch.images.dims(), [1, 1, 3, 3]);
    }

    #[test]
    fn test_training_logs_kept_under_output_dir() {
        let config = AppConfig::default();
        assert_eq!(
            training_artifact_dir(&config, ClassifierVariant::Transfer),
            PathBuf::from("output/training_transfer")
        );
    }
}
