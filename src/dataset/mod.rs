//! タイルとラベルのデータセット
//!
//! タイルはシーンから切り出した独立コピーで、元のシーンの寿命には依存しません。

pub mod augmentation;
pub mod normalize;
pub mod prepare;

use ndarray::Array2;

use crate::types::{LABEL_NO_VESSEL, LABEL_VESSEL};

pub use augmentation::{AugmentationSettings, Augmenter};
pub use normalize::{NormalizationPolicy, NormalizationStats};
pub use prepare::{prepare_datasets, prepare_validation_tiles, PreparedData, SplitSummary};

/// 正方形タイル
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pixels: Array2<f32>,
}

impl Tile {
    pub fn new(pixels: Array2<f32>) -> Self {
        Self { pixels }
    }

    /// 一辺のピクセル数
    pub fn size(&self) -> usize {
        self.pixels.nrows()
    }

    pub fn pixels(&self) -> &Array2<f32> {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut Array2<f32> {
        &mut self.pixels
    }

    pub fn min(&self) -> f32 {
        self.pixels.iter().copied().fold(f32::INFINITY, f32::min)
    }

    pub fn max(&self) -> f32 {
        self.pixels.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// 行優先で平坦化した画素値
    pub fn to_vec(&self) -> Vec<f32> {
        self.pixels.iter().copied().collect()
    }
}

/// タイルとクラスIDの組
#[derive(Debug, Clone, PartialEq)]
pub struct TileSample {
    pub tile: Tile,
    pub label: usize,
}

/// 順序付きのサンプル列
#[derive(Debug, Clone, Default)]
pub struct TileDataset {
    samples: Vec<TileSample>,
}

impl TileDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tile: Tile, label: usize) {
        self.samples.push(TileSample { tile, label });
    }

    pub fn extend(&mut self, samples: impl IntoIterator<Item = TileSample>) {
        self.samples.extend(samples);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[TileSample] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [TileSample] {
        &mut self.samples
    }

    pub fn labels(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.label).collect()
    }

    /// (船舶あり, 船舶なし) の件数
    pub fn class_counts(&self) -> (usize, usize) {
        let vessels = self.samples.iter().filter(|s| s.label == LABEL_VESSEL).count();
        let background = self
            .samples
            .iter()
            .filter(|s| s.label == LABEL_NO_VESSEL)
            .count();
        (vessels, background)
    }

    /// 全タイルを通した (最小値, 最大値)
    pub fn value_range(&self) -> Option<(f32, f32)> {
        if self.samples.is_empty() {
            return None;
        }
        let (min, max) = self
            .samples
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), s| {
                (lo.min(s.tile.min()), hi.max(s.tile.max()))
            });
        Some((min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_counts_and_range() {
        let mut dataset = TileDataset::new();
        dataset.push(Tile::new(Array2::from_elem((2, 2), 1.0)), LABEL_VESSEL);
        dataset.push(Tile::new(Array2::from_elem((2, 2), -3.0)), LABEL_NO_VESSEL);
        dataset.push(Tile::new(Array2::from_elem((2, 2), 5.0)), LABEL_VESSEL);

        assert_eq!(dataset.class_counts(), (2, 1));
        assert_eq!(dataset.value_range(), Some((-3.0, 5.0)));
        assert_eq!(dataset.labels(), vec![1, 0, 1]);
    }

    #[test]
    fn test_empty_range() {
        assert_eq!(TileDataset::new().value_range(), None);
    }
}
