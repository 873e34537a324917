//! タイルのグリッド画像出力
//!
//! 予測がある場合は正解を緑、不正解を赤の枠で囲みます。

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;

use crate::dataset::{Tile, TileDataset};

const CORRECT: Rgb<u8> = Rgb([0, 200, 0]);
const WRONG: Rgb<u8> = Rgb([220, 0, 0]);
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// グリッドの行数・列数と枠の太さ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub rows: usize,
    pub cols: usize,
    pub border: usize,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            rows: 5,
            cols: 5,
            border: 4,
        }
    }
}

impl GridLayout {
    pub fn capacity(&self) -> usize {
        self.rows * self.cols
    }
}

/// プレビュー用に `step` 枚ごとのインデックスを最大 `limit` 件選ぶ
pub fn preview_indices(len: usize, step: usize, limit: usize) -> Vec<usize> {
    (0..len).step_by(step.max(1)).take(limit).collect()
}

/// `len` 件から重複なしで最大 `limit` 件をランダムに選ぶ（シード固定）
pub fn random_indices(len: usize, limit: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    rand::seq::index::sample(&mut rng, len, len.min(limit)).into_vec()
}

/// `indices` のタイルをグリッド状に並べてPNGに保存する
///
/// `predictions` はデータセットと同じ長さの予測クラスIDです。
pub fn render_tile_grid(
    dataset: &TileDataset,
    indices: &[usize],
    predictions: Option<&[usize]>,
    layout: GridLayout,
    path: &Path,
) -> Result<()> {
    let selected: Vec<usize> = indices
        .iter()
        .copied()
        .filter(|&i| i < dataset.len())
        .take(layout.capacity())
        .collect();
    if selected.is_empty() {
        anyhow::bail!("描画するタイルがありません");
    }

    let tile_size = dataset.samples()[selected[0]].tile.size();
    let cell = tile_size + 2 * layout.border;
    let mut canvas = RgbImage::from_pixel(
        (cell * layout.cols) as u32,
        (cell * layout.rows) as u32,
        BACKGROUND,
    );

    for (slot, &index) in selected.iter().enumerate() {
        let sample = &dataset.samples()[index];
        let origin_x = (slot % layout.cols) * cell;
        let origin_y = (slot / layout.cols) * cell;

        if let Some(predicted) = predictions.and_then(|p| p.get(index)) {
            let color = if *predicted == sample.label { CORRECT } else { WRONG };
            fill_rect(&mut canvas, origin_x, origin_y, cell, color);
        }
        draw_tile(&mut canvas, &sample.tile, origin_x + layout.border, origin_y + layout.border);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("出力ディレクトリを作成できません: {}", parent.display()))?;
    }
    canvas
        .save(path)
        .with_context(|| format!("グリッド画像を保存できません: {}", path.display()))?;
    info!("{} 枚のタイルを描画しました: {}", selected.len(), path.display());
    Ok(())
}

fn fill_rect(canvas: &mut RgbImage, x: usize, y: usize, size: usize, color: Rgb<u8>) {
    for dy in 0..size {
        for dx in 0..size {
            canvas.put_pixel((x + dx) as u32, (y + dy) as u32, color);
        }
    }
}

/// タイル自身の最小値・最大値でグレースケールに変換して描画する
fn draw_tile(canvas: &mut RgbImage, tile: &Tile, x: usize, y: usize) {
    let (min, max) = (tile.min(), tile.max());
    let range = max - min;
    for ((r, c), &v) in tile.pixels().indexed_iter() {
        let level = if range > 0.0 {
            ((v - min) / range * 255.0).round() as u8
        } else {
            0
        };
        canvas.put_pixel((x + c) as u32, (y + r) as u32, Rgb([level, level, level]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn dataset(n: usize) -> TileDataset {
        let mut dataset = TileDataset::new();
        for i in 0..n {
            let tile = Tile::new(Array2::from_shape_fn((8, 8), |(r, c)| (r + c + i) as f32));
            dataset.push(tile, i % 2);
        }
        dataset
    }

    #[test]
    fn test_preview_indices() {
        assert_eq!(preview_indices(65, 20, 25), vec![0, 20, 40, 60]);
        assert_eq!(preview_indices(1000, 20, 25).len(), 25);
    }

    #[test]
    fn test_random_indices() {
        let indices = random_indices(200, 25, 42);
        assert_eq!(indices.len(), 25);
        assert!(indices.iter().all(|&i| i < 200));

        let mut unique = indices.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 25);
        // 先頭25件の連番ではない
        assert_ne!(unique, (0..25).collect::<Vec<_>>());

        assert_eq!(random_indices(200, 25, 42), indices);
        assert_eq!(random_indices(7, 25, 1).len(), 7);
        assert!(random_indices(0, 25, 1).is_empty());
    }

    #[test]
    fn test_render_with_predictions() {
        let dataset = dataset(4);
        let predictions = vec![0, 0, 0, 1];
        let layout = GridLayout {
            rows: 2,
            cols: 2,
            border: 2,
        };
        let path = std::env::temp_dir().join(format!("vessel_grid_{}.png", std::process::id()));

        render_tile_grid(&dataset, &[0, 1, 2, 3], Some(&predictions), layout, &path).unwrap();

        let image = image::open(&path).unwrap().to_rgb8();
        assert_eq!(image.dimensions(), (24, 24));
        // 1枚目は正解、2枚目は不正解
        assert_eq!(*image.get_pixel(0, 0), CORRECT);
        assert_eq!(*image.get_pixel(12, 0), WRONG);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_render_without_tiles_is_error() {
        let path = std::env::temp_dir().join("vessel_grid_empty.png");
        assert!(render_tile_grid(&TileDataset::new(), &[], None, GridLayout::default(), &path).is_err());
    }
}
