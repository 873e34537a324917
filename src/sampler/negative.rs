//! ラベルと重ならない背景タイルの棄却サンプリング

use log::{debug, info};
use rand::Rng;

use crate::csv_loader::labels_for_scene;
use crate::dataset::{Tile, TileSample};
use crate::error::{DetectorError, Result};
use crate::raster::Scene;
use crate::sampler::{cut_tile, NoDataPolicy, SamplingSettings, Window};
use crate::types::{LabelRecord, LABEL_NO_VESSEL};

/// 採用された背景タイルとその中心
#[derive(Debug, Clone)]
pub struct BackgroundDraw {
    pub row: usize,
    pub col: usize,
    pub tile: Tile,
}

impl From<BackgroundDraw> for TileSample {
    fn from(draw: BackgroundDraw) -> Self {
        TileSample {
            tile: draw.tile,
            label: LABEL_NO_VESSEL,
        }
    }
}

/// シーン1つあたりに追加する背景タイル数
///
/// 不均衡量 `#positive - #negative` をシーン数で割った値（切り捨て）。
/// 既にネガティブが多い場合は 0 です。
pub fn balance_quota(positives: usize, negatives: usize, num_scenes: usize) -> usize {
    if num_scenes == 0 {
        return 0;
    }
    positives.saturating_sub(negatives) / num_scenes
}

/// シーンから `quota` 枚の背景タイルをランダムに切り出す
///
/// 中心は各軸 `[W, dim - W)` から一様に選びます。候補は次の場合に棄却して引き直します。
/// - このシーンのいずれかのラベル中心が、縦横ともに W 未満の距離にある
/// - 欠損画素を含む
///
/// 1枚あたり `max_retries` 回引いても採用できなければ
/// [`DetectorError::RetryCapExhausted`] を返します。
pub fn sample_background_tiles<P, R>(
    scene: &Scene,
    labels: &[LabelRecord],
    quota: usize,
    settings: &SamplingSettings,
    nodata: &P,
    rng: &mut R,
) -> Result<Vec<BackgroundDraw>>
where
    P: NoDataPolicy + ?Sized,
    R: Rng + ?Sized,
{
    if quota == 0 {
        return Ok(Vec::new());
    }

    let half = settings.half_window;
    let (rows, cols) = (scene.rows(), scene.cols());
    if rows <= 2 * half || cols <= 2 * half {
        return Err(DetectorError::SceneTooSmall {
            scene_id: scene.id().to_string(),
            rows,
            cols,
            half_window: half,
        });
    }

    let scene_labels = labels_for_scene(labels, scene.id());

    let mut accepted = Vec::with_capacity(quota);
    let mut total_attempts = 0usize;

    while accepted.len() < quota {
        let mut drawn = None;

        for _ in 0..settings.max_retries {
            total_attempts += 1;
            let row = rng.gen_range(half..rows - half);
            let col = rng.gen_range(half..cols - half);

            let overlaps_label = scene_labels
                .iter()
                .any(|l| Window::near_center(row as i64, col as i64, l.row, l.col, half));
            if overlaps_label {
                continue;
            }

            let Some(window) = Window::centered(row as i64, col as i64, half, rows, cols) else {
                continue;
            };
            if let Some(tile) = cut_tile(scene.data(), &window, nodata) {
                drawn = Some(BackgroundDraw { row, col, tile });
                break;
            }
        }

        match drawn {
            Some(draw) => accepted.push(draw),
            None => {
                return Err(DetectorError::RetryCapExhausted {
                    scene_id: scene.id().to_string(),
                    attempts: total_attempts,
                    accepted: accepted.len(),
                    quota,
                })
            }
        }
    }

    debug!(
        "シーン {}: 背景タイル {} 枚を {} 回の試行で取得",
        scene.id(),
        accepted.len(),
        total_attempts
    );
    info!("シーン {}: 背景タイルを {} 枚追加しました", scene.id(), accepted.len());

    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::{SentinelValue, NODATA_SENTINEL};
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn label(scene: &str, row: i64, col: i64, is_vessel: bool) -> LabelRecord {
        LabelRecord {
            scene_id: scene.to_string(),
            row,
            col,
            is_vessel,
        }
    }

    fn small_settings(half_window: usize, max_retries: usize) -> SamplingSettings {
        SamplingSettings {
            half_window,
            max_retries,
            ..SamplingSettings::default()
        }
    }

    #[test]
    fn test_balance_quota() {
        assert_eq!(balance_quota(95, 5, 5), 18);
        assert_eq!(balance_quota(10, 3, 3), 2);
        assert_eq!(balance_quota(3, 10, 3), 0);
        assert_eq!(balance_quota(10, 0, 0), 0);
    }

    #[test]
    fn test_background_never_overlaps_labels() {
        let data = Array2::from_shape_fn((400, 400), |(r, c)| (r * 400 + c) as f32);
        let scene = Scene::new("s", data);
        let labels = vec![
            label("s", 100, 100, true),
            label("s", 300, 250, true),
            label("s", 200, 200, false),
            // 他シーンのラベルは判定に使わない
            label("t", 60, 340, true),
        ];
        let settings = small_settings(32, 1000);
        let mut rng = StdRng::seed_from_u64(7);

        let draws = sample_background_tiles(
            &scene,
            &labels,
            40,
            &settings,
            &SentinelValue::default(),
            &mut rng,
        )
        .unwrap();

        assert_eq!(draws.len(), 40);
        for draw in &draws {
            for l in labels.iter().filter(|l| l.scene_id == "s") {
                assert!(
                    !Window::near_center(draw.row as i64, draw.col as i64, l.row, l.col, 32),
                    "center ({}, {}) overlaps label ({}, {})",
                    draw.row,
                    draw.col,
                    l.row,
                    l.col
                );
            }
            assert!(draw.row >= 32 && draw.row < 400 - 32);
            assert!(draw.col >= 32 && draw.col < 400 - 32);
            // タイル左上の値から中心位置を確認
            let expected = ((draw.row - 32) * 400 + (draw.col - 32)) as f32;
            assert_eq!(draw.tile.pixels()[[0, 0]], expected);
            assert_eq!(draw.tile.size(), 64);
        }
    }

    #[test]
    fn test_background_skips_nodata() {
        let mut data = Array2::<f32>::zeros((200, 200));
        for r in 0..200 {
            for c in 0..100 {
                data[[r, c]] = NODATA_SENTINEL;
            }
        }
        let scene = Scene::new("half", data);
        let settings = small_settings(16, 10_000);
        let mut rng = StdRng::seed_from_u64(3);

        let draws = sample_background_tiles(
            &scene,
            &[],
            20,
            &settings,
            &SentinelValue::default(),
            &mut rng,
        )
        .unwrap();

        assert_eq!(draws.len(), 20);
        for draw in &draws {
            assert!(draw.col >= 116);
            assert_ne!(draw.tile.min(), NODATA_SENTINEL);
        }
    }

    #[test]
    fn test_sentinel_scene_exhausts_retry_cap() {
        let scene = Scene::new("void", Array2::from_elem((512, 512), NODATA_SENTINEL));
        let settings = small_settings(128, 50);
        let mut rng = StdRng::seed_from_u64(42);

        let result = sample_background_tiles(
            &scene,
            &[],
            3,
            &settings,
            &SentinelValue::default(),
            &mut rng,
        );

        match result {
            Err(DetectorError::RetryCapExhausted {
                attempts,
                accepted,
                quota,
                ..
            }) => {
                assert_eq!(attempts, 50);
                assert_eq!(accepted, 0);
                assert_eq!(quota, 3);
            }
            other => panic!("expected RetryCapExhausted, got {:?}", other.map(|d| d.len())),
        }
    }

    #[test]
    fn test_scene_too_small() {
        let scene = Scene::new("tiny", Array2::zeros((256, 512)));
        let settings = small_settings(128, 10);
        let mut rng = StdRng::seed_from_u64(1);

        let result = sample_background_tiles(
            &scene,
            &[],
            1,
            &settings,
            &SentinelValue::default(),
            &mut rng,
        );
        assert!(matches!(result, Err(DetectorError::SceneTooSmall { .. })));
    }

    #[test]
    fn test_zero_quota_returns_nothing() {
        let scene = Scene::new("tiny", Array2::zeros((8, 8)));
        let mut rng = StdRng::seed_from_u64(1);
        let draws = sample_background_tiles(
            &scene,
            &[],
            0,
            &SamplingSettings::default(),
            &SentinelValue::default(),
            &mut rng,
        )
        .unwrap();
        assert!(draws.is_empty());
    }
}
