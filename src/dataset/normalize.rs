//! 画素値の [0, 1] 正規化
//!
//! データセット全体の最小値・最大値で `(x - min) / (max - min)` に変換します。

use log::info;
use serde::{Deserialize, Serialize};

use crate::dataset::TileDataset;
use crate::error::{DetectorError, Result};

/// 検証データに適用する正規化定数の決め方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationPolicy {
    /// 学習データの定数を検証データにもそのまま使う
    #[default]
    SharedFromTraining,
    /// 学習・検証それぞれの最小値/最大値で正規化する
    PerSplit,
}

impl NormalizationPolicy {
    /// `dataset` に適用する正規化定数を決める
    ///
    /// `PerSplit` で `dataset` が空の場合は学習データの定数を使います。
    pub fn stats_for(
        &self,
        train_stats: NormalizationStats,
        dataset: &TileDataset,
    ) -> Result<NormalizationStats> {
        match self {
            Self::SharedFromTraining => Ok(train_stats),
            Self::PerSplit if dataset.is_empty() => Ok(train_stats),
            Self::PerSplit => NormalizationStats::fit(dataset),
        }
    }
}

impl std::fmt::Display for NormalizationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SharedFromTraining => write!(f, "shared_from_training"),
            Self::PerSplit => write!(f, "per_split"),
        }
    }
}

/// 正規化定数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub min: f32,
    pub max: f32,
}

impl NormalizationStats {
    /// データセット全体の最小値・最大値を求める
    ///
    /// 空のデータセット、または最小値と最大値が一致する場合はエラー。
    pub fn fit(dataset: &TileDataset) -> Result<Self> {
        let (min, max) = dataset
            .value_range()
            .ok_or_else(|| DetectorError::EmptyDataset("正規化の対象がありません".to_string()))?;
        Self::new(min, max)
    }

    pub fn new(min: f32, max: f32) -> Result<Self> {
        if max - min <= 0.0 || !(max - min).is_finite() {
            return Err(DetectorError::ZeroVariance { value: min });
        }
        Ok(Self { min, max })
    }

    pub fn range(&self) -> f32 {
        self.max - self.min
    }

    pub fn normalize_value(&self, value: f32) -> f32 {
        (value - self.min) / self.range()
    }

    pub fn restore_value(&self, value: f32) -> f32 {
        value * self.range() + self.min
    }

    /// データセットの全画素を正規化する
    pub fn apply(&self, dataset: &mut TileDataset) {
        for sample in dataset.samples_mut() {
            sample
                .tile
                .pixels_mut()
                .mapv_inplace(|v| self.normalize_value(v));
        }
    }

    /// 正規化前の値に戻す
    pub fn restore(&self, dataset: &mut TileDataset) {
        for sample in dataset.samples_mut() {
            sample
                .tile
                .pixels_mut()
                .mapv_inplace(|v| self.restore_value(v));
        }
    }
}

/// 方針に従って学習・検証データを正規化する
///
/// 戻り値は学習データの定数（モデルのメタデータに保存する値）です。
pub fn normalize_splits(
    train: &mut TileDataset,
    validation: &mut TileDataset,
    policy: NormalizationPolicy,
) -> Result<NormalizationStats> {
    let train_stats = NormalizationStats::fit(train)?;
    info!(
        "正規化定数 (学習): min = {}, max = {}",
        train_stats.min, train_stats.max
    );

    let validation_stats = policy.stats_for(train_stats, validation)?;
    if validation_stats != train_stats {
        info!(
            "正規化定数 (検証): min = {}, max = {}",
            validation_stats.min, validation_stats.max
        );
    }

    train_stats.apply(train);
    validation_stats.apply(validation);

    Ok(train_stats)
}
