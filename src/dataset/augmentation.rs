//! データ拡張
//!
//! 各タイルにランダムな反転・回転・ズームを1回ずつ適用した合成タイルを作り、
//! 元のデータセットの後ろに連結します（件数は2倍になります）。

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

use crate::dataset::{Tile, TileDataset, TileSample};

/// データ拡張の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentationSettings {
    /// データ拡張を行うか
    pub enabled: bool,
    /// 左右反転（確率0.5）
    pub horizontal_flip: bool,
    /// 上下反転（確率0.5）
    pub vertical_flip: bool,
    /// 回転角の上限（1回転に対する割合）
    pub rotation_factor: f32,
    /// 拡大率の上限（0.1 なら 0〜10% 拡大）
    pub zoom_max: f32,
}

impl Default for AugmentationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            horizontal_flip: true,
            vertical_flip: true,
            rotation_factor: 0.1,
            zoom_max: 0.1,
        }
    }
}

/// 1タイル分の幾何変換
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileTransform {
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    /// 回転角（ラジアン）
    pub angle: f32,
    /// 拡大率（0.0 で等倍）
    pub zoom: f32,
}

impl TileTransform {
    pub fn identity() -> Self {
        Self {
            flip_horizontal: false,
            flip_vertical: false,
            angle: 0.0,
            zoom: 0.0,
        }
    }

    /// 逆写像 + バイリニア補間で変換後のタイルを作る（範囲外は反射）
    pub fn apply(&self, tile: &Tile) -> Tile {
        let src = tile.pixels();
        let (h, w) = src.dim();
        let cy = (h as f32 - 1.0) / 2.0;
        let cx = (w as f32 - 1.0) / 2.0;
        let (sin, cos) = self.angle.sin_cos();
        let scale = 1.0 - self.zoom;

        let out = ndarray::Array2::from_shape_fn((h, w), |(y, x)| {
            let dy = (y as f32 - cy) * scale;
            let dx = (x as f32 - cx) * scale;

            let mut sx = cos * dx + sin * dy + cx;
            let mut sy = -sin * dx + cos * dy + cy;
            if self.flip_horizontal {
                sx = (w as f32 - 1.0) - sx;
            }
            if self.flip_vertical {
                sy = (h as f32 - 1.0) - sy;
            }

            bilinear(src, sy, sx)
        });

        Tile::new(out)
    }
}

fn reflect(index: i64, len: usize) -> usize {
    let len = len as i64;
    let m = index.rem_euclid(2 * len);
    (if m < len { m } else { 2 * len - 1 - m }) as usize
}

fn bilinear(src: &ndarray::Array2<f32>, y: f32, x: f32) -> f32 {
    let (h, w) = src.dim();
    let y0 = y.floor();
    let x0 = x.floor();
    let fy = y - y0;
    let fx = x - x0;
    let (y0, x0) = (y0 as i64, x0 as i64);

    let r0 = reflect(y0, h);
    let r1 = reflect(y0 + 1, h);
    let c0 = reflect(x0, w);
    let c1 = reflect(x0 + 1, w);

    let top = src[[r0, c0]] * (1.0 - fx) + src[[r0, c1]] * fx;
    let bottom = src[[r1, c0]] * (1.0 - fx) + src[[r1, c1]] * fx;
    top * (1.0 - fy) + bottom * fy
}

/// ランダムな幾何変換でデータを水増しする
pub struct Augmenter {
    settings: AugmentationSettings,
    rng: StdRng,
}

impl Augmenter {
    pub fn new(settings: AugmentationSettings, seed: u64) -> Self {
        Self {
            settings,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// 変換パラメータをランダムに決める
    pub fn random_transform(&mut self) -> TileTransform {
        let flip_horizontal = self.settings.horizontal_flip && self.rng.gen_bool(0.5);
        let flip_vertical = self.settings.vertical_flip && self.rng.gen_bool(0.5);

        let max_angle = self.settings.rotation_factor.abs() * 2.0 * PI;
        let angle = if max_angle > 0.0 {
            self.rng.gen_range(-max_angle..=max_angle)
        } else {
            0.0
        };

        let zoom_max = self.settings.zoom_max.clamp(0.0, 0.99);
        let zoom = if zoom_max > 0.0 {
            self.rng.gen_range(0.0..=zoom_max)
        } else {
            0.0
        };

        TileTransform {
            flip_horizontal,
            flip_vertical,
            angle,
            zoom,
        }
    }

    pub fn augment_tile(&mut self, tile: &Tile) -> Tile {
        self.random_transform().apply(tile)
    }

    /// 元のサンプルの後ろに合成サンプルを連結する
    ///
    /// `labels[i] == labels[i + n]` が常に成り立ちます。
    pub fn augment_dataset(&mut self, dataset: TileDataset) -> TileDataset {
        let synthetic: Vec<TileSample> = dataset
            .samples()
            .iter()
            .map(|sample| TileSample {
                tile: self.augment_tile(&sample.tile),
                label: sample.label,
            })
            .collect();

        let mut doubled = dataset;
        doubled.extend(synthetic);
        doubled
    }
}
