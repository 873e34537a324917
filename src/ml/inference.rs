//! モデル推論機能
//!
//! 保存済みアーカイブからどちらの分類器も復元し、タイルのスコア算出と評価を行います。

use anyhow::Result;
use burn::{
    data::dataloader::batcher::Batcher,
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, ElementConversion, Int, Tensor},
    train::ClassificationOutput,
};
use burn_wgpu::WgpuDevice;
use log::info;
use std::path::Path;

use crate::dataset::TileDataset;
use crate::error::DetectorError;
use crate::ml::backend::{wgpu_device, InferenceBackend};
use crate::ml::ml_model::{TileClassifier, VesselCnn, VesselCnnConfig};
use crate::ml::training::{TileBatcher, TileItem};
use crate::ml::transfer::{FeatureExtractorConfig, TransferClassifier, TransferClassifierConfig};
use crate::model::{load_model_with_metadata, DeviceType, ModelMetadata};
use crate::report::{argmax_rows, EvaluationReport};
use crate::types::{ClassifierVariant, NUM_CLASSES};

/// 推論時のバッチサイズ
pub const DEFAULT_INFERENCE_BATCH_SIZE: usize = 32;

/// 学習済みの分類器（種類ごと）
#[derive(Debug, Clone)]
pub enum ClassifierModel<B: Backend> {
    Custom(VesselCnn<B>),
    Transfer(TransferClassifier<B>),
}

impl<B: Backend> ClassifierModel<B> {
    /// 重みを読み込む前の構造だけを作る
    pub fn init(variant: ClassifierVariant, tile_size: usize, device: &B::Device) -> Result<Self> {
        Ok(match variant {
            ClassifierVariant::Custom => ClassifierModel::Custom(
                VesselCnnConfig::new().with_image_size(tile_size).init(device)?,
            ),
            ClassifierVariant::Transfer => ClassifierModel::Transfer(
                TransferClassifierConfig::new(FeatureExtractorConfig::new()).init(device),
            ),
        })
    }

    pub fn variant(&self) -> ClassifierVariant {
        match self {
            ClassifierModel::Custom(_) => ClassifierVariant::Custom,
            ClassifierModel::Transfer(_) => ClassifierVariant::Transfer,
        }
    }

    /// 重みをバイト列に記録する（フル精度）
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let bytes = match self {
            ClassifierModel::Custom(model) => recorder.record(model.clone().into_record(), ()),
            ClassifierModel::Transfer(model) => recorder.record(model.clone().into_record(), ()),
        };
        bytes.map_err(|e| anyhow::anyhow!("モデル重みの記録エラー: {:?}", e))
    }

    /// バイト列から重みを復元する
    pub fn load_bytes(self, bytes: Vec<u8>, device: &B::Device) -> Result<Self> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let model = match self {
            ClassifierModel::Custom(model) => {
                let record = recorder
                    .load(bytes, device)
                    .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
                ClassifierModel::Custom(model.load_record(record))
            }
            ClassifierModel::Transfer(model) => {
                let record = recorder
                    .load(bytes, device)
                    .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
                ClassifierModel::Transfer(model.load_record(record))
            }
        };
        Ok(model)
    }

    pub fn num_params(&self) -> usize {
        match self {
            ClassifierModel::Custom(model) => model.num_params(),
            ClassifierModel::Transfer(model) => model.num_params(),
        }
    }
}

impl<B: Backend> TileClassifier<B> for ClassifierModel<B> {
    fn input_channels(&self) -> usize {
        match self {
            ClassifierModel::Custom(model) => model.input_channels(),
            ClassifierModel::Transfer(model) => model.input_channels(),
        }
    }

    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            ClassifierModel::Custom(model) => model.forward(images),
            ClassifierModel::Transfer(model) => model.forward(images),
        }
    }

    fn classify(&self, images: Tensor<B, 4>, targets: Tensor<B, 1, Int>) -> ClassificationOutput<B> {
        match self {
            ClassifierModel::Custom(model) => model.forward_classification(images, targets),
            ClassifierModel::Transfer(model) => model.forward_classification(images, targets),
        }
    }
}

fn float_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))
}

fn tile_size_of(dataset: &TileDataset) -> Result<usize> {
    dataset
        .samples()
        .first()
        .map(|s| s.tile.size())
        .ok_or_else(|| DetectorError::EmptyDataset("推論対象のタイルがありません".to_string()).into())
}

/// 正規化済みタイルのソフトマックススコアを求める
pub fn predict_scores<B, M>(
    model: &M,
    dataset: &TileDataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<Vec<[f32; NUM_CLASSES]>>
where
    B: Backend,
    M: TileClassifier<B>,
{
    let batcher = TileBatcher::<B>::new(device.clone(), tile_size_of(dataset)?, model.input_channels());
    let mut scores = Vec::with_capacity(dataset.len());

    for chunk in dataset.samples().chunks(batch_size.max(1)) {
        let items: Vec<TileItem> = chunk.iter().map(TileItem::from).collect();
        let batch = batcher.batch(items, device);
        let values = float_values(model.predict(batch.images))?;
        scores.extend(values.chunks(NUM_CLASSES).map(|row| [row[0], row[1]]));
    }

    Ok(scores)
}

/// 正規化済みタイルで損失と正解率を求める
pub fn evaluate_dataset<B, M>(
    model: &M,
    dataset: &TileDataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<EvaluationReport>
where
    B: Backend,
    M: TileClassifier<B>,
{
    let batcher = TileBatcher::<B>::new(device.clone(), tile_size_of(dataset)?, model.input_channels());
    let mut loss_sum = 0.0;
    let mut predictions = Vec::with_capacity(dataset.len());

    for chunk in dataset.samples().chunks(batch_size.max(1)) {
        let items: Vec<TileItem> = chunk.iter().map(TileItem::from).collect();
        let batch = batcher.batch(items, device);
        let output = model.classify(batch.images, batch.targets);

        loss_sum += output.loss.into_scalar().elem::<f64>() * chunk.len() as f64;
        predictions.extend(argmax_rows(&float_values(output.output)?, NUM_CLASSES));
    }

    let loss = loss_sum / dataset.len() as f64;
    Ok(EvaluationReport::from_predictions(loss, predictions, &dataset.labels()))
}

/// 推論エンジン
pub struct InferenceEngine {
    model: ClassifierModel<InferenceBackend>,
    metadata: ModelMetadata,
    device: WgpuDevice,
    batch_size: usize,
}

impl InferenceEngine {
    /// 学習直後のモデルから推論エンジンを作る
    pub fn new(model: ClassifierModel<InferenceBackend>, metadata: ModelMetadata, device: WgpuDevice) -> Self {
        Self {
            model,
            metadata,
            device,
            batch_size: DEFAULT_INFERENCE_BATCH_SIZE,
        }
    }

    /// モデルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device_type: &DeviceType) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path.as_ref())?;
        let device = wgpu_device(device_type);

        let model = ClassifierModel::<InferenceBackend>::init(
            metadata.variant,
            metadata.tile_size as usize,
            &device,
        )?
        .load_bytes(model_binary, &device)?;

        info!(
            "モデルを読み込みました: {} ({}, {} パラメータ)",
            model_path.as_ref().display(),
            metadata.variant,
            model.num_params()
        );

        Ok(Self::new(model, metadata, device))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    fn normalized(&self, raw: &TileDataset) -> Result<TileDataset> {
        self.metadata.normalize_inputs(raw)
    }

    /// 生のタイルのスコア
    pub fn predict(&self, raw: &TileDataset) -> Result<Vec<[f32; NUM_CLASSES]>> {
        self.predict_normalized(&self.normalized(raw)?)
    }

    /// 正規化済みタイルのスコア
    pub fn predict_normalized(&self, dataset: &TileDataset) -> Result<Vec<[f32; NUM_CLASSES]>> {
        predict_scores(&self.model, dataset, self.batch_size, &self.device)
    }

    /// 生のタイルで評価
    pub fn evaluate(&self, raw: &TileDataset) -> Result<EvaluationReport> {
        self.evaluate_normalized(&self.normalized(raw)?)
    }

    /// 正規化済みタイルで評価
    pub fn evaluate_normalized(&self, dataset: &TileDataset) -> Result<EvaluationReport> {
        evaluate_dataset(&self.model, dataset, self.batch_size, &self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Tile;
    use burn_ndarray::NdArray;
    use ndarray::Array2;

    type TestBackend = NdArray;

    fn dataset(n: usize, size: usize) -> TileDataset {
        let mut dataset = TileDataset::new();
        for i in 0..n {
            let value = i as f32 / n as f32;
            dataset.push(Tile::new(Array2::from_elem((size, size), value)), i % 2);
        }
        dataset
    }

    #[test]
    fn test_predict_scores_per_tile() {
        let device = Default::default();
        let model = ClassifierModel::<TestBackend>::Custom(
            VesselCnnConfig::new().with_image_size(32).init(&device).unwrap(),
        );

        let scores = predict_scores(&model, &dataset(5, 32), 2, &device).unwrap();
        assert_eq!(scores.len(), 5);
        for row in scores {
            assert!((row[0] + row[1] - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_evaluate_transfer_model() {
        let device = Default::default();
        let model = ClassifierModel::<TestBackend>::Transfer(
            TransferClassifierConfig::new(FeatureExtractorConfig::new().with_base_filters(4)).init(&device),
        );

        let report = evaluate_dataset(&model, &dataset(6, 32), 4, &device).unwrap();
        assert_eq!(report.samples, 6);
        assert_eq!(report.predictions.len(), 6);
        assert!(report.loss.is_finite());
        assert!((0.0..=1.0).contains(&report.accuracy));
    }

    #[test]
    fn test_bytes_round_trip_keeps_outputs() {
        let device = Default::default();
        let model = ClassifierModel::<TestBackend>::Custom(
            VesselCnnConfig::new().with_image_size(16).init(&device).unwrap(),
        );
        let bytes = model.to_bytes().unwrap();

        let restored = ClassifierModel::<TestBackend>::Custom(
            VesselCnnConfig::new().with_image_size(16).init(&device).unwrap(),
        )
        .load_bytes(bytes, &device)
        .unwrap();

        let data = dataset(3, 16);
        let expected = predict_scores(&model, &data, 8, &device).unwrap();
        let actual = predict_scores(&restored, &data, 8, &device).unwrap();
        for (e, a) in expected.iter().zip(&actual) {
            assert!((e[0] - a[0]).abs() < 1e-6);
        }
        assert_eq!(restored.variant(), ClassifierVariant::Custom);
    }

    #[test]
    fn test_empty_dataset_is_error() {
        let device = Default::default();
        let model = ClassifierModel::<TestBackend>::Custom(
            VesselCnnConfig::new().with_image_size(16).init(&device).unwrap(),
        );
        assert!(evaluate_dataset(&model, &TileDataset::new(), 4, &device).is_err());
    }
}
