//! 学習履歴（エポックごとの損失・正解率）
//!
//! burnの `LearnerBuilder` が作業ディレクトリに書き出すメトリクスログ
//! (`<dir>/train/epoch-N/Loss.log` など) を読み込み、CSVと折れ線グラフに出力します。

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const TRAIN_SPLIT: &str = "train";
const VALID_SPLIT: &str = "valid";
const EPOCH_PREFIX: &str = "epoch-";

const PANEL_WIDTH: u32 = 360;
const PANEL_HEIGHT: u32 = 240;
const MARGIN: u32 = 24;

const TRAIN_COLOR: Rgb<u8> = Rgb([31, 119, 180]);
const VALID_COLOR: Rgb<u8> = Rgb([255, 127, 14]);
const AXIS_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const GRID_COLOR: Rgb<u8> = Rgb([225, 225, 225]);
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// 1エポック分のメトリクス
///
/// 正解率はburnのログと同じくパーセント (0〜100) です。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: Option<f64>,
    pub train_accuracy: Option<f64>,
    pub valid_loss: Option<f64>,
    pub valid_accuracy: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MetricKind {
    Loss,
    Accuracy,
}

impl MetricKind {
    fn from_file_stem(stem: &str) -> Option<Self> {
        match stem.to_ascii_lowercase().as_str() {
            "loss" => Some(Self::Loss),
            "accuracy" => Some(Self::Accuracy),
            _ => None,
        }
    }
}

/// エポック順の学習履歴
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// 学習の作業ディレクトリからメトリクスログを読み込む
    ///
    /// ログがなければ空の履歴を返します。
    pub fn from_metric_logs(artifact_dir: &Path) -> Result<Self> {
        let train = read_split(&artifact_dir.join(TRAIN_SPLIT))?;
        let valid = read_split(&artifact_dir.join(VALID_SPLIT))?;

        let mut epochs: BTreeMap<usize, EpochMetrics> = BTreeMap::new();
        for (epoch, metrics) in train {
            let entry = epochs.entry(epoch).or_insert_with(|| EpochMetrics {
                epoch,
                ..EpochMetrics::default()
            });
            entry.train_loss = metrics.get(&MetricKind::Loss).copied();
            entry.train_accuracy = metrics.get(&MetricKind::Accuracy).copied();
        }
        for (epoch, metrics) in valid {
            let entry = epochs.entry(epoch).or_insert_with(|| EpochMetrics {
                epoch,
                ..EpochMetrics::default()
            });
            entry.valid_loss = metrics.get(&MetricKind::Loss).copied();
            entry.valid_accuracy = metrics.get(&MetricKind::Accuracy).copied();
        }

        Ok(Self {
            epochs: epochs.into_values().collect(),
        })
    }

    /// 1エポック1行のCSVに書き出す
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        create_parent(path)?;
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("CSVを作成できません: {}", path.display()))?;
        for epoch in &self.epochs {
            writer.serialize(epoch)?;
        }
        writer.flush()?;
        info!("学習履歴を保存しました: {}", path.display());
        Ok(())
    }
}

impl std::fmt::Display for TrainingHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = |v: Option<f64>| v.map(|v| format!("{:.4}", v)).unwrap_or_else(|| "-".to_string());
        writeln!(f, "epoch  train_loss  train_acc  valid_loss  valid_acc")?;
        for e in &self.epochs {
            writeln!(
                f,
                "{:>5}  {:>10}  {:>9}  {:>10}  {:>9}",
                e.epoch,
                value(e.train_loss),
                value(e.train_accuracy),
                value(e.valid_loss),
                value(e.valid_accuracy)
            )?;
        }
        Ok(())
    }
}

/// `<split>/…/epoch-N/*.log` をエポックごとの平均値にまとめる
fn read_split(split_dir: &Path) -> Result<BTreeMap<usize, BTreeMap<MetricKind, f64>>> {
    let mut result = BTreeMap::new();
    if !split_dir.is_dir() {
        return Ok(result);
    }

    let mut epoch_dirs = Vec::new();
    find_epoch_dirs(split_dir, 2, &mut epoch_dirs)?;

    for (epoch, dir) in epoch_dirs {
        let metrics: &mut BTreeMap<MetricKind, f64> = result.entry(epoch).or_default();
        for entry in fs::read_dir(&dir).with_context(|| format!("読み込めません: {}", dir.display()))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("log") {
                continue;
            }
            let Some(kind) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(MetricKind::from_file_stem)
            else {
                continue;
            };
            if let Some(mean) = mean_of_log(&path)? {
                metrics.insert(kind, mean);
            }
        }
    }

    Ok(result)
}

fn epoch_number(name: &str) -> Option<usize> {
    name.strip_prefix(EPOCH_PREFIX)?.parse().ok()
}

fn find_epoch_dirs(dir: &Path, depth: usize, found: &mut Vec<(usize, PathBuf)>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("読み込めません: {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        match path.file_name().and_then(|n| n.to_str()).and_then(epoch_number) {
            Some(epoch) => found.push((epoch, path)),
            None if depth > 0 => find_epoch_dirs(&path, depth - 1, found)?,
            None => {}
        }
    }
    Ok(())
}

/// ログ1ファイルの平均値
///
/// 各行は `value` または `value,count`（集計済みの値と件数）です。
fn mean_of_log(path: &Path) -> Result<Option<f64>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("読み込めません: {}", path.display()))?;

    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for line in content.lines() {
        let mut fields = line.trim().split(',');
        let Some(Ok(value)) = fields.next().map(|v| v.trim().parse::<f64>()) else {
            continue;
        };
        let weight = fields
            .next()
            .and_then(|c| c.trim().parse::<f64>().ok())
            .unwrap_or(1.0);
        if !value.is_finite() || weight <= 0.0 {
            debug!("{}: 無効な行をスキップ: {}", path.display(), line);
            continue;
        }
        weighted_sum += value * weight;
        total_weight += weight;
    }

    Ok((total_weight > 0.0).then(|| weighted_sum / total_weight))
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("出力ディレクトリを作成できません: {}", parent.display()))?;
    }
    Ok(())
}

/// 損失（左）と正解率（右）の学習曲線をPNGに描く
///
/// 学習データは青、検証データはオレンジの線です。
pub fn render_history_curves(history: &TrainingHistory, path: &Path) -> Result<()> {
    if history.is_empty() {
        anyhow::bail!("学習履歴が空です");
    }

    let width = 2 * PANEL_WIDTH + 3 * MARGIN;
    let height = PANEL_HEIGHT + 2 * MARGIN;
    let mut canvas = RgbImage::from_pixel(width, height, BACKGROUND);

    let loss_max = history
        .epochs
        .iter()
        .flat_map(|e| [e.train_loss, e.valid_loss])
        .flatten()
        .fold(0.0f64, f64::max);
    let loss_panel = Panel {
        x: MARGIN,
        y: MARGIN,
        y_max: if loss_max > 0.0 { loss_max * 1.05 } else { 1.0 },
        epochs: history.len(),
    };
    let accuracy_panel = Panel {
        x: 2 * MARGIN + PANEL_WIDTH,
        y: MARGIN,
        y_max: 100.0,
        epochs: history.len(),
    };

    for panel in [&loss_panel, &accuracy_panel] {
        panel.draw_frame(&mut canvas);
    }

    let series = |f: fn(&EpochMetrics) -> Option<f64>| -> Vec<Option<f64>> {
        history.epochs.iter().map(f).collect()
    };
    loss_panel.draw_series(&mut canvas, &series(|e| e.train_loss), TRAIN_COLOR);
    loss_panel.draw_series(&mut canvas, &series(|e| e.valid_loss), VALID_COLOR);
    accuracy_panel.draw_series(&mut canvas, &series(|e| e.train_accuracy), TRAIN_COLOR);
    accuracy_panel.draw_series(&mut canvas, &series(|e| e.valid_accuracy), VALID_COLOR);

    create_parent(path)?;
    canvas
        .save(path)
        .with_context(|| format!("学習曲線を保存できません: {}", path.display()))?;
    info!("学習曲線を描画しました ({} エポック): {}", history.len(), path.display());
    Ok(())
}

/// 1つのグラフ領域（y は 0〜`y_max`）
struct Panel {
    x: u32,
    y: u32,
    y_max: f64,
    epochs: usize,
}

impl Panel {
    fn point(&self, index: usize, value: f64) -> (f64, f64) {
        let span = (self.epochs.max(2) - 1) as f64;
        let px = self.x as f64 + index as f64 / span * (PANEL_WIDTH - 1) as f64;
        let ratio = (value / self.y_max).clamp(0.0, 1.0);
        let py = (self.y + PANEL_HEIGHT - 1) as f64 - ratio * (PANEL_HEIGHT - 1) as f64;
        (px, py)
    }

    fn draw_frame(&self, canvas: &mut RgbImage) {
        for step in 1..4 {
            let gy = self.y + step * PANEL_HEIGHT / 4;
            for gx in self.x..self.x + PANEL_WIDTH {
                canvas.put_pixel(gx, gy, GRID_COLOR);
            }
        }
        for gy in self.y..self.y + PANEL_HEIGHT {
            canvas.put_pixel(self.x, gy, AXIS_COLOR);
        }
        for gx in self.x..self.x + PANEL_WIDTH {
            canvas.put_pixel(gx, self.y + PANEL_HEIGHT - 1, AXIS_COLOR);
        }
    }

    fn draw_series(&self, canvas: &mut RgbImage, values: &[Option<f64>], color: Rgb<u8>) {
        let points: Vec<(f64, f64)> = values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| self.point(i, v)))
            .collect();

        for pair in points.windows(2) {
            draw_line(canvas, pair[0], pair[1], color);
        }
        for &(px, py) in &points {
            draw_marker(canvas, px, py, color);
        }
    }
}

fn put(canvas: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
        canvas.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_line(canvas: &mut RgbImage, from: (f64, f64), to: (f64, f64), color: Rgb<u8>) {
    let steps = (to.0 - from.0).abs().max((to.1 - from.1).abs()).ceil().max(1.0) as usize;
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let x = from.0 + (to.0 - from.0) * t;
        let y = from.1 + (to.1 - from.1) * t;
        put(canvas, x.round() as i64, y.round() as i64, color);
    }
}

fn draw_marker(canvas: &mut RgbImage, x: f64, y: f64, color: Rgb<u8>) {
    let (cx, cy) = (x.round() as i64, y.round() as i64);
    for dy in -2..=2 {
        for dx in -2..=2 {
            put(canvas, cx + dx, cy + dy, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_log(dir: &Path, split: &str, epoch: usize, name: &str, content: &str) {
        let epoch_dir = dir.join(split).join(format!("epoch-{}", epoch));
        fs::create_dir_all(&epoch_dir).unwrap();
        fs::write(epoch_dir.join(format!("{}.log", name)), content).unwrap();
    }

    fn history() -> TrainingHistory {
        TrainingHistory {
            epochs: (1..=3)
                .map(|epoch| EpochMetrics {
                    epoch,
                    train_loss: Some(1.0 / epoch as f64),
                    train_accuracy: Some(50.0 + 10.0 * epoch as f64),
                    valid_loss: Some(1.2 / epoch as f64),
                    valid_accuracy: (epoch > 1).then(|| 45.0 + 10.0 * epoch as f64),
                })
                .collect(),
        }
    }

    #[test]
    fn test_history_from_metric_logs() {
        let dir = std::env::temp_dir().join(format!("vessel_history_{}", std::process::id()));
        write_log(&dir, "train", 1, "Loss", "0.9,4\n0.7,4\n");
        write_log(&dir, "train", 1, "Accuracy", "50,2\n80,6\n");
        write_log(&dir, "train", 2, "Loss", "0.5\n0.3\n");
        write_log(&dir, "train", 2, "Accuracy", "90\n");
        write_log(&dir, "valid", 1, "Loss", "0.8,3\n");
        write_log(&dir, "valid", 2, "Loss", "0.6,3\n");
        write_log(&dir, "valid", 2, "Accuracy", "75,3\n");
        // 関係のないファイル
        write_log(&dir, "train", 1, "LearningRate", "0.001\n");

        let history = TrainingHistory::from_metric_logs(&dir).unwrap();
        fs::remove_dir_all(&dir).ok();

        assert_eq!(history.len(), 2);
        let first = &history.epochs[0];
        assert_eq!(first.epoch, 1);
        assert!((first.train_loss.unwrap() - 0.8).abs() < 1e-9);
        assert!((first.train_accuracy.unwrap() - 72.5).abs() < 1e-9);
        assert!((first.valid_loss.unwrap() - 0.8).abs() < 1e-9);
        assert_eq!(first.valid_accuracy, None);

        let second = &history.epochs[1];
        assert_eq!(second.epoch, 2);
        assert!((second.train_loss.unwrap() - 0.4).abs() < 1e-9);
        assert_eq!(second.valid_accuracy, Some(75.0));
    }

    #[test]
    fn test_missing_artifact_dir_gives_empty_history() {
        let history = TrainingHistory::from_metric_logs(Path::new("/nonexistent/vessel_training")).unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn test_write_csv() {
        let path = std::env::temp_dir().join(format!("vessel_history_{}.csv", std::process::id()));
        history().write_csv(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).ok();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "epoch,train_loss,train_accuracy,valid_loss,valid_accuracy");
        assert!(lines[1].starts_with("1,1.0,60.0,1.2,"));
        assert!(lines[1].ends_with(','));
    }

    #[test]
    fn test_render_history_curves() {
        let path = std::env::temp_dir().join(format!("vessel_history_{}.png", std::process::id()));
        render_history_curves(&history(), &path).unwrap();

        let image = image::open(&path).unwrap().to_rgb8();
        fs::remove_file(&path).ok();
        assert_eq!(image.dimensions(), (2 * PANEL_WIDTH + 3 * MARGIN, PANEL_HEIGHT + 2 * MARGIN));
        assert!(image.pixels().any(|p| *p == TRAIN_COLOR));
        assert!(image.pixels().any(|p| *p == VALID_COLOR));
    }

    #[test]
    fn test_render_empty_history_is_error() {
        let path = std::env::temp_dir().join("vessel_history_empty.png");
        assert!(render_history_curves(&TrainingHistory::default(), &path).is_err());
    }
}
