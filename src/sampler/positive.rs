//! ラベル中心のタイル切り出し

use log::{debug, warn};

use crate::dataset::TileSample;
use crate::raster::Scene;
use crate::sampler::{cut_tile, NoDataPolicy, Window};
use crate::types::LabelRecord;

/// 1シーン分の切り出し結果
#[derive(Debug, Default)]
pub struct PositiveExtraction {
    pub samples: Vec<TileSample>,
    /// 欠損画素を含むため除外した件数
    pub rejected_nodata: usize,
    /// ウィンドウがシーン外にはみ出したため除外した件数
    pub out_of_bounds: usize,
}

/// ラベルごとに中心 (row, col) のウィンドウを切り出す
///
/// 欠損画素を含むタイルとシーン外にはみ出すタイルは除外します（エラーにはしません）。
/// 他のシーンのラベルは無視します。
pub fn extract_labeled_tiles<'a, P, I>(
    scene: &Scene,
    labels: I,
    half_window: usize,
    nodata: &P,
) -> PositiveExtraction
where
    P: NoDataPolicy + ?Sized,
    I: IntoIterator<Item = &'a LabelRecord>,
{
    let mut result = PositiveExtraction::default();

    for label in labels.into_iter().filter(|l| l.scene_id == scene.id()) {
        let Some(window) = Window::centered(label.row, label.col, half_window, scene.rows(), scene.cols())
        else {
            warn!(
                "シーン {}: ラベル ({}, {}) のウィンドウがシーン外にはみ出すためスキップします",
                scene.id(),
                label.row,
                label.col
            );
            result.out_of_bounds += 1;
            continue;
        };

        match cut_tile(scene.data(), &window, nodata) {
            Some(tile) => result.samples.push(TileSample {
                tile,
                label: label.class_id(),
            }),
            None => result.rejected_nodata += 1,
        }
    }

    debug!(
        "シーン {}: {} 枚切り出し (欠損: {}, 範囲外: {})",
        scene.id(),
        result.samples.len(),
        result.rejected_nodata,
        result.out_of_bounds
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::{SentinelValue, NODATA_SENTINEL};
    use crate::types::{LABEL_NO_VESSEL, LABEL_VESSEL};
    use ndarray::Array2;

    fn label(scene: &str, row: i64, col: i64, is_vessel: bool) -> LabelRecord {
        LabelRecord {
            scene_id: scene.to_string(),
            row,
            col,
            is_vessel,
        }
    }

    #[test]
    fn test_single_centered_label_on_zero_scene() {
        let scene = Scene::new("zeros", Array2::zeros((512, 512)));
        let labels = vec![label("zeros", 256, 256, true)];

        let result = extract_labeled_tiles(&scene, &labels, 128, &SentinelValue::default());

        assert_eq!(result.samples.len(), 1);
        assert_eq!(result.rejected_nodata, 0);
        assert_eq!(result.out_of_bounds, 0);
        assert_eq!(result.samples[0].tile.pixels().dim(), (256, 256));
        assert_eq!(result.samples[0].label, LABEL_VESSEL);
    }

    #[test]
    fn test_nodata_and_out_of_bounds_are_excluded() {
        let mut data = Array2::<f32>::zeros((600, 600));
        data[[100, 100]] = NODATA_SENTINEL;
        let scene = Scene::new("s", data);

        let labels = vec![
            label("s", 150, 150, true),  // 欠損画素を含む
            label("s", 10, 300, true),   // 上端からはみ出す
            label("s", 400, 400, false), // 有効
            label("other", 300, 300, true),
        ];

        let result = extract_labeled_tiles(&scene, &labels, 128, &SentinelValue::default());

        assert_eq!(result.samples.len(), 1);
        assert_eq!(result.samples[0].label, LABEL_NO_VESSEL);
        assert_eq!(result.rejected_nodata, 1);
        assert_eq!(result.out_of_bounds, 1);
    }

    #[test]
    fn test_sentinel_scene_yields_no_tiles() {
        let scene = Scene::new("void", Array2::from_elem((512, 512), NODATA_SENTINEL));
        let labels = vec![label("void", 256, 256, true), label("void", 200, 300, false)];

        let result = extract_labeled_tiles(&scene, &labels, 128, &SentinelValue::default());

        assert!(result.samples.is_empty());
        assert_eq!(result.rejected_nodata, 2);
    }

    #[test]
    fn test_tiles_are_independent_copies() {
        let data = Array2::from_shape_fn((300, 300), |(r, c)| (r + c) as f32);
        let scene = Scene::new("grad", data);
        let labels = vec![label("grad", 150, 150, true)];

        let result = extract_labeled_tiles(&scene, &labels, 128, &SentinelValue::default());
        drop(scene);

        let tile = &result.samples[0].tile;
        assert_eq!(tile.pixels()[[0, 0]], 44.0);
        assert_eq!(tile.min(), 44.0);
    }
}
