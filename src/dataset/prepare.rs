//! 学習・検証データセットの組み立て
//!
//! ラベル読み込み → シーン読み込み → ラベル中心のタイル切り出し → 背景タイルでのバランス調整
//! → シーン破棄 → 正規化 → データ拡張 の順に処理します。

use anyhow::{Context, Result};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

use crate::csv_loader::{class_counts, filter_scenes, load_labels};
use crate::dataset::normalize::normalize_splits;
use crate::dataset::{Augmenter, NormalizationPolicy, NormalizationStats, TileDataset, TileSample};
use crate::error::DetectorError;
use crate::model::AppConfig;
use crate::raster::SceneStore;
use crate::sampler::{
    balance_quota, extract_labeled_tiles, sample_background_tiles, NoDataPolicy, SamplingSettings,
};
use crate::types::LabelRecord;

/// 1分割分の集計
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitSummary {
    pub scenes: usize,
    /// ラベルから切り出した船舶タイル
    pub vessels: usize,
    /// ラベルから切り出した船舶なしタイル
    pub labeled_background: usize,
    /// バランス調整で追加した背景タイル
    pub sampled_background: usize,
    pub rejected_nodata: usize,
    pub out_of_bounds: usize,
}

impl SplitSummary {
    pub fn total(&self) -> usize {
        self.vessels + self.labeled_background + self.sampled_background
    }
}

impl std::fmt::Display for SplitSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} シーン, 船舶 {} 枚, 船舶なし {} 枚 (ラベル {} + 追加 {}), 欠損除外 {}, 範囲外 {}",
            self.scenes,
            self.vessels,
            self.labeled_background + self.sampled_background,
            self.labeled_background,
            self.sampled_background,
            self.rejected_nodata,
            self.out_of_bounds
        )
    }
}

/// 前処理済みデータ
#[derive(Debug)]
pub struct PreparedData {
    pub train: TileDataset,
    pub validation: TileDataset,
    /// 学習データの正規化定数
    pub normalization: NormalizationStats,
    /// 検証データに使った正規化の方針
    pub normalization_policy: NormalizationPolicy,
    pub train_summary: SplitSummary,
    pub validation_summary: SplitSummary,
    /// データ拡張前の学習データ件数
    pub train_len_before_augmentation: usize,
}

/// ラベル位置のタイルだけを集める（検証データ用）
pub fn assemble_labeled<P: NoDataPolicy + ?Sized>(
    store: &SceneStore,
    labels: &[LabelRecord],
    half_window: usize,
    nodata: &P,
) -> (TileDataset, SplitSummary) {
    let mut dataset = TileDataset::new();
    let mut summary = SplitSummary {
        scenes: store.len(),
        ..SplitSummary::default()
    };

    for scene in store.iter() {
        let extraction = extract_labeled_tiles(scene, labels, half_window, nodata);
        summary.rejected_nodata += extraction.rejected_nodata;
        summary.out_of_bounds += extraction.out_of_bounds;
        dataset.extend(extraction.samples);
    }

    let (vessels, background) = dataset.class_counts();
    summary.vessels = vessels;
    summary.labeled_background = background;

    (dataset, summary)
}

/// ラベル位置のタイルを集め、背景タイルを追加してクラスを揃える（学習データ用）
///
/// 不均衡量はラベルから切り出した後の全シーン合計で求め、シーン数で等分します。
pub fn assemble_balanced<P, R>(
    store: &SceneStore,
    labels: &[LabelRecord],
    settings: &SamplingSettings,
    nodata: &P,
    rng: &mut R,
) -> crate::error::Result<(TileDataset, SplitSummary)>
where
    P: NoDataPolicy + ?Sized,
    R: Rng + ?Sized,
{
    let (mut dataset, mut summary) =
        assemble_labeled(store, labels, settings.half_window, nodata);

    let quota = balance_quota(summary.vessels, summary.labeled_background, store.len());
    if summary.vessels < summary.labeled_background {
        warn!(
            "船舶なしのタイルが多いため背景タイルは追加しません (船舶 {}, 船舶なし {})",
            summary.vessels, summary.labeled_background
        );
    }
    info!("バランス調整: シーンあたり {} 枚の背景タイルを追加します", quota);

    for scene in store.iter() {
        let draws = sample_background_tiles(scene, labels, quota, settings, nodata, rng)?;
        summary.sampled_background += draws.len();
        dataset.extend(draws.into_iter().map(TileSample::from));
    }

    Ok((dataset, summary))
}

/// 設定に従って学習・検証データを作る
pub fn prepare_datasets(config: &AppConfig) -> Result<PreparedData> {
    let scene_dir = config.scene_dir();
    let sampling = &config.sampling;
    let nodata = sampling.nodata_policy();
    let mut rng = StdRng::seed_from_u64(config.training.seed);

    // 学習データ
    let train_labels = read_split_labels(
        Path::new(&config.data.train_labels),
        &config.data.train_scenes,
    )?;
    let train_store = SceneStore::load(&scene_dir, &config.data.train_scenes, config.data.polarization)
        .context("学習シーンの読み込みに失敗しました")?;
    let (mut train, train_summary) =
        assemble_balanced(&train_store, &train_labels, sampling, &nodata, &mut rng)?;
    // シーン全体は大きいのでタイル抽出後すぐに解放する
    drop(train_store);
    info!("学習データ: {}", train_summary);

    let (mut validation, validation_summary) = prepare_validation_tiles(config)?;

    if train.is_empty() {
        return Err(DetectorError::EmptyDataset("学習タイルが1枚もありません".to_string()).into());
    }

    let normalization = normalize_splits(&mut train, &mut validation, config.normalization)?;

    let train_len_before_augmentation = train.len();
    if config.augmentation.enabled {
        let mut augmenter = Augmenter::new(config.augmentation.clone(), config.training.seed);
        train = augmenter.augment_dataset(train);
        info!(
            "データ拡張: {} 枚 -> {} 枚",
            train_len_before_augmentation,
            train.len()
        );
    }

    Ok(PreparedData {
        train,
        validation,
        normalization,
        normalization_policy: config.normalization,
        train_summary,
        validation_summary,
        train_len_before_augmentation,
    })
}

/// 検証データ（正規化前）を作る
///
/// 検証データはラベル位置のタイルだけで、バランス調整は行いません。
pub fn prepare_validation_tiles(config: &AppConfig) -> Result<(TileDataset, SplitSummary)> {
    let validation_labels = read_split_labels(
        Path::new(&config.data.validation_labels),
        &config.data.validation_scenes,
    )?;
    let validation_store = SceneStore::load(
        &config.scene_dir(),
        &config.data.validation_scenes,
        config.data.polarization,
    )
    .context("検証シーンの読み込みに失敗しました")?;
    let (validation, validation_summary) = assemble_labeled(
        &validation_store,
        &validation_labels,
        config.sampling.half_window,
        &config.sampling.nodata_policy(),
    );
    drop(validation_store);
    info!("検証データ: {}", validation_summary);

    Ok((validation, validation_summary))
}

fn read_split_labels(path: &Path, scene_ids: &[String]) -> Result<Vec<LabelRecord>> {
    let labels = load_labels(path)?;
    let total = labels.len();
    let labels = filter_scenes(labels, scene_ids);
    let (vessels, background) = class_counts(&labels);
    info!(
        "{}: {} 件中 {} 件のラベルを使用します (船舶 {}, 船舶なし {})",
        path.display(),
        total,
        labels.len(),
        vessels,
        background
    );
    Ok(labels)
}
