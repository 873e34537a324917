//! モデルメタデータの定義
//!
//! tar.gz形式でモデルの重みと一緒に保存され、推論時のモデル復元と前処理に使われます。

#[cfg(feature = "ml")]
use anyhow::{Context, Result};
#[cfg(feature = "ml")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "ml")]
use crate::dataset::{NormalizationPolicy, NormalizationStats, TileDataset};
#[cfg(feature = "ml")]
use crate::types::{ClassifierVariant, CLASS_NAMES};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[cfg(feature = "ml")]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    /// 分類器の種類
    pub variant: ClassifierVariant,

    /// クラスラベル（インデックスがクラスID）
    pub class_labels: Vec<String>,

    /// 入力タイルの一辺（ピクセル）
    pub tile_size: u32,

    /// 入力チャンネル数（独自CNNは1、転移学習は3）
    pub input_channels: u32,

    /// 学習データから求めた正規化定数
    /// 推論時は生のdB値にこの定数を適用してからモデルに入力する
    pub normalization: NormalizationStats,

    /// 評価データに適用する正規化定数の決め方（学習時の設定）
    #[serde(default)]
    pub normalization_policy: NormalizationPolicy,

    /// 学習エポック数
    pub num_epochs: u32,

    pub learning_rate: f64,

    /// データ拡張後の学習サンプル数
    pub train_samples: u32,

    pub validation_samples: u32,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

#[cfg(feature = "ml")]
impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        variant: ClassifierVariant,
        tile_size: u32,
        normalization: NormalizationStats,
        num_epochs: u32,
        learning_rate: f64,
        train_samples: u32,
        validation_samples: u32,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            variant,
            class_labels: CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            tile_size,
            input_channels: variant.input_channels() as u32,
            normalization,
            normalization_policy: NormalizationPolicy::default(),
            num_epochs,
            learning_rate,
            train_samples,
            validation_samples,
            trained_at,
        }
    }

    pub fn with_normalization_policy(mut self, policy: NormalizationPolicy) -> Self {
        self.normalization_policy = policy;
        self
    }

    /// 生のdB値のタイルを学習時と同じ方法で正規化する
    pub fn normalize_inputs(&self, raw: &TileDataset) -> Result<TileDataset> {
        if let Some(sample) = raw.samples().first() {
            if sample.tile.size() != self.tile_size as usize {
                anyhow::bail!(
                    "タイルサイズが一致しません: {} (モデル: {})",
                    sample.tile.size(),
                    self.tile_size
                );
            }
        }
        let stats = self.normalization_policy.stats_for(self.normalization, raw)?;
        let mut dataset = raw.clone();
        stats.apply(&mut dataset);
        Ok(dataset)
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}

#[cfg(all(test, feature = "ml"))]
mod tests {
    use super::*;
    use crate::dataset::normalize::normalize_splits;
    use crate::dataset::Tile;
    use ndarray::Array2;

    #[test]
    fn test_metadata_json_round_trip() {
        let stats = NormalizationStats::new(-40.0, 5.0).unwrap();
        let metadata = ModelMetadata::new(ClassifierVariant::Transfer, 256, stats, 20, 0.0005, 120, 30);

        assert_eq!(metadata.input_channels, 3);
        assert_eq!(metadata.class_labels, vec!["no_vessel", "vessel"]);
        assert!(chrono::DateTime::parse_from_rfc3339(&metadata.trained_at).is_ok());

        let json = metadata.to_json_string().unwrap();
        assert!(json.contains("\"variant\": \"transfer\""));
        let restored = ModelMetadata::from_json_string(&json).unwrap();
        assert_eq!(restored, metadata);
    }

    fn raw_split(values: &[f32], size: usize) -> TileDataset {
        let mut dataset = TileDataset::new();
        for chunk in values.chunks(size * size) {
            let tile = Tile::new(Array2::from_shape_vec((size, size), chunk.to_vec()).unwrap());
            dataset.push(tile, 1);
        }
        dataset
    }

    #[test]
    fn test_inputs_normalized_like_training_for_each_policy() {
        let train_raw = raw_split(&[-30.0, -10.0, -20.0, 0.0, -25.0, -5.0, -15.0, -12.0], 2);
        let validation_raw = raw_split(&[-8.0, -2.0, -6.0, 4.0], 2);

        for policy in [NormalizationPolicy::SharedFromTraining, NormalizationPolicy::PerSplit] {
            let mut train = train_raw.clone();
            let mut validation = validation_raw.clone();
            let stats = normalize_splits(&mut train, &mut validation, policy).unwrap();

            let metadata = ModelMetadata::new(ClassifierVariant::Custom, 2, stats, 1, 0.001, 2, 1)
                .with_normalization_policy(policy);
            let inputs = metadata.normalize_inputs(&validation_raw).unwrap();

            for (expected, actual) in validation.samples().iter().zip(inputs.samples()) {
                assert_eq!(expected.tile, actual.tile, "policy {}", policy);
            }
        }
    }

    #[test]
    fn test_normalize_inputs_rejects_wrong_tile_size() {
        let stats = NormalizationStats::new(-30.0, 0.0).unwrap();
        let metadata = ModelMetadata::new(ClassifierVariant::Custom, 4, stats, 1, 0.001, 2, 1);
        assert!(metadata.normalize_inputs(&raw_split(&[-1.0; 4], 2)).is_err());
    }

    #[test]
    fn test_missing_policy_defaults_to_shared() {
        let stats = NormalizationStats::new(-40.0, 5.0).unwrap();
        let metadata = ModelMetadata::new(ClassifierVariant::Custom, 256, stats, 20, 0.001, 120, 30)
            .with_normalization_policy(NormalizationPolicy::PerSplit);
        let mut value: serde_json::Value = serde_json::from_str(&metadata.to_json_string().unwrap()).unwrap();
        value.as_object_mut().unwrap().remove("normalization_policy");

        let restored = ModelMetadata::from_json_string(&value.to_string()).unwrap();
        assert_eq!(restored.normalization_policy, NormalizationPolicy::SharedFromTraining);
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(ModelMetadata::from_json_string("{\"variant\": \"custom\"}").is_err());
    }
}
