//! ラベル位置からのタイル切り出しとクラスバランス調整
//!
//! - [`positive`]: ラベル中心のウィンドウを切り出す
//! - [`negative`]: ラベルと重ならないウィンドウを棄却サンプリングで追加する

pub mod negative;
pub mod positive;
pub mod window;

use ndarray::{s, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::dataset::Tile;

pub use negative::{balance_quota, sample_background_tiles};
pub use positive::{extract_labeled_tiles, PositiveExtraction};
pub use window::Window;

/// xView3で欠損画素を表す値
pub const NODATA_SENTINEL: f32 = -32768.0;

/// ウィンドウ半径（タイルは 2W x 2W）
pub const DEFAULT_HALF_WINDOW: usize = 128;

/// ネガティブ1枚あたりの最大試行回数
pub const DEFAULT_MAX_RETRIES: usize = 10_000;

/// 欠損画素の判定方法
pub trait NoDataPolicy {
    /// タイルに欠損画素が含まれていれば `true`
    fn contains_nodata(&self, window: &ArrayView2<'_, f32>) -> bool;
}

/// 最小値が番兵値と一致するタイルを欠損とみなす
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentinelValue(pub f32);

impl Default for SentinelValue {
    fn default() -> Self {
        SentinelValue(NODATA_SENTINEL)
    }
}

impl NoDataPolicy for SentinelValue {
    fn contains_nodata(&self, window: &ArrayView2<'_, f32>) -> bool {
        let min = window.iter().copied().fold(f32::INFINITY, f32::min);
        min == self.0
    }
}

/// 1つでもNaNを含むタイルを欠損とみなす
#[derive(Debug, Clone, Copy, Default)]
pub struct NanValue;

impl NoDataPolicy for NanValue {
    fn contains_nodata(&self, window: &ArrayView2<'_, f32>) -> bool {
        window.iter().any(|v| v.is_nan())
    }
}

/// サンプリング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingSettings {
    /// ウィンドウ半径 W
    pub half_window: usize,
    /// 欠損の番兵値
    pub nodata_value: f32,
    /// ネガティブ1枚あたりの最大試行回数
    pub max_retries: usize,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            half_window: DEFAULT_HALF_WINDOW,
            nodata_value: NODATA_SENTINEL,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl SamplingSettings {
    /// タイル一辺のピクセル数
    pub fn tile_size(&self) -> usize {
        self.half_window * 2
    }

    pub fn nodata_policy(&self) -> SentinelValue {
        SentinelValue(self.nodata_value)
    }
}

/// ウィンドウを切り出してタイルにする（欠損を含む場合は `None`）
pub(crate) fn cut_tile<P: NoDataPolicy + ?Sized>(
    data: &ndarray::Array2<f32>,
    window: &Window,
    nodata: &P,
) -> Option<Tile> {
    let view = data.slice(s![window.row_start..window.row_end, window.col_start..window.col_end]);
    if nodata.contains_nodata(&view) {
        return None;
    }
    Some(Tile::new(view.to_owned()))
}
