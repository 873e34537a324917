//! CLIの各サブコマンドの処理
//!
//! 設定の上書き → 前処理 → 学習/評価 → 保存・可視化 を順に実行します。

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::dataset::{prepare_datasets, PreparedData, TileDataset};
use crate::model::{AppConfig, DeviceType};
use crate::report::{preview_indices, render_tile_grid, GridLayout};
use crate::types::{ClassifierVariant, CLASS_NAMES};

#[cfg(feature = "ml")]
use log::{info, warn};

#[cfg(feature = "ml")]
use crate::dataset::prepare_validation_tiles;
#[cfg(feature = "ml")]
use crate::ml::{train_classifier, wgpu_device, InferenceEngine};
#[cfg(feature = "ml")]
use crate::model::{print_metadata_info, save_model_with_metadata};
#[cfg(feature = "ml")]
use crate::report::{random_indices, render_history_curves, EvaluationReport, TrainingHistory};

/// プレビューで何枚ごとにタイルを選ぶか
const PREVIEW_STEP: usize = 20;

/// `train` サブコマンドのオプション
#[derive(Debug, Clone, Default)]
pub struct TrainOptions {
    pub variant: ClassifierVariant,
    pub epochs: Option<usize>,
    pub output: Option<PathBuf>,
    pub pretrained: Option<PathBuf>,
    pub cpu: bool,
}

impl TrainOptions {
    /// CLIの指定で設定を上書きする
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(epochs) = self.epochs {
            config.training.num_epochs = epochs;
        }
        if let Some(ref output) = self.output {
            config.model.model_path = output.to_string_lossy().to_string();
        }
        if let Some(ref pretrained) = self.pretrained {
            config.model.pretrained_weights = Some(pretrained.to_string_lossy().to_string());
        }
        if self.cpu {
            config.device_type = DeviceType::Cpu;
        }
    }
}

fn print_class_counts(split: &str, dataset: &TileDataset) {
    let (vessels, background) = dataset.class_counts();
    println!(
        "{}: {} tiles ({} = {}, {} = {})",
        split,
        dataset.len(),
        CLASS_NAMES[1],
        vessels,
        CLASS_NAMES[0],
        background
    );
}

/// 前処理だけを実行し、クラスごとの件数を表示する
pub fn run_prepare(config: &AppConfig, preview: Option<&Path>) -> Result<PreparedData> {
    let data = prepare_datasets(config)?;

    println!("\n=== データセット ===");
    println!("学習データ (拡張前): {}", data.train_summary);
    println!("検証データ: {}", data.validation_summary);
    print_class_counts("Train", &data.train);
    print_class_counts("Validation", &data.validation);
    println!(
        "正規化定数: min = {}, max = {}",
        data.normalization.min, data.normalization.max
    );

    if let Some(path) = preview {
        let indices = preview_indices(data.train.len(), PREVIEW_STEP, GridLayout::default().capacity());
        render_tile_grid(&data.train, &indices, None, GridLayout::default(), path)?;
    }

    Ok(data)
}

/// 予測グリッドの出力先
#[cfg(feature = "ml")]
fn prediction_grid_path(config: &AppConfig, variant: ClassifierVariant) -> PathBuf {
    config.output_dir().join(format!("predictions_{}.png", variant))
}

/// 学習履歴（CSV, PNG）の出力先
#[cfg(feature = "ml")]
fn history_paths(config: &AppConfig, variant: ClassifierVariant) -> (PathBuf, PathBuf) {
    let dir = config.output_dir();
    (
        dir.join(format!("history_{}.csv", variant)),
        dir.join(format!("history_{}.png", variant)),
    )
}

#[cfg(feature = "ml")]
fn write_history(history: &TrainingHistory, config: &AppConfig, variant: ClassifierVariant) -> Result<()> {
    if history.is_empty() {
        return Ok(());
    }
    println!("\n=== 学習履歴 ===\n{}", history);
    let (csv_path, png_path) = history_paths(config, variant);
    history.write_csv(&csv_path)?;
    render_history_curves(history, &png_path)
}

/// 学習 → 学習/検証データでの評価 → 保存 → 予測グリッド出力
#[cfg(feature = "ml")]
pub fn run_train(config: &AppConfig, options: &TrainOptions) -> Result<PathBuf> {
    let mut config = config.clone();
    options.apply(&mut config);

    let data = prepare_datasets(&config)?;
    let trained = train_classifier(&config, options.variant, &data, options.pretrained.as_deref())?;

    let saved_path = save_model_with_metadata(
        Path::new(&config.model.model_path),
        &trained.metadata,
        &trained.model_binary,
    )?;

    write_history(&trained.history, &config, options.variant)?;

    let engine = InferenceEngine::new(
        trained.model,
        trained.metadata,
        wgpu_device(&config.device_type),
    )
    .with_batch_size(config.training.batch_size);

    let train_report = engine.evaluate_normalized(&data.train)?;
    println!("{}", train_report.accuracy_line("Train"));
    info!("学習データ: {}", train_report);

    let (grid_dataset, grid_report) = if data.validation.is_empty() {
        (&data.train, train_report)
    } else {
        let validation_report = engine.evaluate_normalized(&data.validation)?;
        println!("{}", validation_report.accuracy_line("Validation"));
        info!("検証データ: {}", validation_report);
        (&data.validation, validation_report)
    };

    write_prediction_grid(
        grid_dataset,
        &grid_report,
        &prediction_grid_path(&config, options.variant),
        config.training.seed,
    )?;

    println!("学習完了: {} に保存しました", saved_path.display());
    Ok(saved_path)
}

#[cfg(feature = "ml")]
fn write_prediction_grid(
    dataset: &TileDataset,
    report: &EvaluationReport,
    path: &Path,
    seed: u64,
) -> Result<()> {
    let layout = GridLayout::default();
    let indices = random_indices(dataset.len(), layout.capacity(), seed);
    render_tile_grid(dataset, &indices, Some(&report.predictions), layout, path)
}

/// 保存済みモデルを検証データで評価する
#[cfg(feature = "ml")]
pub fn run_evaluate(
    config: &AppConfig,
    model_path: &Path,
    grid: Option<&Path>,
    cpu: bool,
) -> Result<EvaluationReport> {
    let device_type = if cpu { DeviceType::Cpu } else { config.device_type.clone() };
    let engine = InferenceEngine::load(model_path, &device_type)
        .with_context(|| format!("モデルを読み込めません: {}", model_path.display()))?
        .with_batch_size(config.training.batch_size);
    print_metadata_info(engine.metadata());
    if config.normalization != engine.metadata().normalization_policy {
        warn!(
            "設定の正規化方針 ({}) ではなく学習時の方針 ({}) を使います",
            config.normalization,
            engine.metadata().normalization_policy
        );
    }

    if (engine.metadata().tile_size as usize) != config.sampling.tile_size() {
        anyhow::bail!(
            "設定のタイルサイズ {} がモデル ({}) と一致しません",
            config.sampling.tile_size(),
            engine.metadata().tile_size
        );
    }
    let (validation, summary) = prepare_validation_tiles(config)?;
    info!("検証データ: {}", summary);

    let report = engine.evaluate(&validation)?;
    println!("{}", report.accuracy_line("Validation"));
    println!("{}", report);

    let grid_path = grid
        .map(Path::to_path_buf)
        .unwrap_or_else(|| prediction_grid_path(config, engine.metadata().variant));
    write_prediction_grid(&validation, &report, &grid_path, config.training.seed)?;

    Ok(report)
}

/// デフォルト設定をファイルに書き出す
pub fn run_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "設定ファイルは既に存在します: {} (上書きするには --force)",
            path.display()
        );
    }
    AppConfig::default()
        .save(path)
        .with_context(|| format!("設定ファイルを書き込めません: {}", path.display()))?;
    println!("デフォルト設定を書き出しました: {}", path.display());
    Ok(())
}
