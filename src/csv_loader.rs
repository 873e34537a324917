//! ラベルCSVの読み込み
//!
//! xView3形式のCSVから `scene_id`, `detect_scene_row`, `detect_scene_column`,
//! `is_vessel` の4列だけを取り出します。その他の列（confidence, is_fishing など）は無視します。

use csv::{ReaderBuilder, StringRecord};
use log::{debug, warn};
use std::path::Path;

use crate::error::{DetectorError, Result};
use crate::types::{LabelRecord, SceneId};

const COL_SCENE_ID: &str = "scene_id";
const COL_ROW: &str = "detect_scene_row";
const COL_COLUMN: &str = "detect_scene_column";
const COL_IS_VESSEL: &str = "is_vessel";

/// 必要な列のインデックス
struct ColumnIndex {
    scene_id: usize,
    row: usize,
    col: usize,
    is_vessel: usize,
}

impl ColumnIndex {
    fn from_headers(headers: &StringRecord, path: &Path) -> Result<Self> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| DetectorError::LabelLoad {
                    path: path.to_path_buf(),
                    reason: format!("列 '{}' がありません", name),
                })
        };

        Ok(Self {
            scene_id: find(COL_SCENE_ID)?,
            row: find(COL_ROW)?,
            col: find(COL_COLUMN)?,
            is_vessel: find(COL_IS_VESSEL)?,
        })
    }
}

/// ラベルCSVを読み込む
///
/// `is_vessel` が空またはNaNの行は除外します。
/// 列数が合わない行や数値として読めない行は警告を出して読み飛ばします。
pub fn load_labels(path: &Path) -> Result<Vec<LabelRecord>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .quoting(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| DetectorError::LabelLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let headers = reader
        .headers()
        .map_err(|e| DetectorError::LabelLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .clone();
    let columns = ColumnIndex::from_headers(&headers, path)?;

    let mut labels = Vec::new();
    let mut skipped = 0usize;
    let mut unlabeled = 0usize;

    for (line, result) in reader.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!("{}: {}行目を読み飛ばします: {}", path.display(), line + 2, e);
                skipped += 1;
                continue;
            }
        };

        match parse_record(&record, &columns) {
            Ok(Some(label)) => labels.push(label),
            Ok(None) => unlabeled += 1,
            Err(reason) => {
                warn!("{}: {}行目を読み飛ばします: {}", path.display(), line + 2, reason);
                skipped += 1;
            }
        }
    }

    debug!(
        "{}: {} 件のラベルを読み込みました (is_vessel欠損: {}, 不正行: {})",
        path.display(),
        labels.len(),
        unlabeled,
        skipped
    );

    Ok(labels)
}

/// 1行をラベルに変換（is_vessel欠損なら `Ok(None)`）
fn parse_record(
    record: &StringRecord,
    columns: &ColumnIndex,
) -> std::result::Result<Option<LabelRecord>, String> {
    let field = |index: usize, name: &str| {
        record
            .get(index)
            .map(str::trim)
            .ok_or_else(|| format!("列 '{}' がありません", name))
    };

    let is_vessel = match parse_bool(field(columns.is_vessel, COL_IS_VESSEL)?)? {
        Some(value) => value,
        None => return Ok(None),
    };

    let scene_id = field(columns.scene_id, COL_SCENE_ID)?;
    if scene_id.is_empty() {
        return Err("scene_id が空です".to_string());
    }

    Ok(Some(LabelRecord {
        scene_id: scene_id.to_string(),
        row: parse_pixel(field(columns.row, COL_ROW)?)?,
        col: parse_pixel(field(columns.col, COL_COLUMN)?)?,
        is_vessel,
    }))
}

fn parse_bool(value: &str) -> std::result::Result<Option<bool>, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "1.0" => Ok(Some(true)),
        "false" | "0" | "0.0" => Ok(Some(false)),
        "" | "nan" | "none" | "null" => Ok(None),
        other => Err(format!("is_vessel の値が不正です: {}", other)),
    }
}

/// ピクセル座標を読む（pandas経由で "1234.0" 形式になっている場合も受け付ける）
fn parse_pixel(value: &str) -> std::result::Result<i64, String> {
    if let Ok(v) = value.parse::<i64>() {
        return Ok(v);
    }
    let v: f64 = value
        .parse()
        .map_err(|_| format!("座標の値が不正です: {}", value))?;
    if !v.is_finite() {
        return Err(format!("座標の値が不正です: {}", value));
    }
    Ok(v.round() as i64)
}

/// 指定したシーンのラベルだけを残す
pub fn filter_scenes(labels: Vec<LabelRecord>, scene_ids: &[SceneId]) -> Vec<LabelRecord> {
    labels
        .into_iter()
        .filter(|label| scene_ids.contains(&label.scene_id))
        .collect()
}

/// 1シーン分のラベルを取り出す
pub fn labels_for_scene<'a>(labels: &'a [LabelRecord], scene_id: &str) -> Vec<&'a LabelRecord> {
    labels.iter().filter(|l| l.scene_id == scene_id).collect()
}

/// (船舶あり, 船舶なし) の件数
pub fn class_counts(labels: &[LabelRecord]) -> (usize, usize) {
    let vessels = labels.iter().filter(|l| l.is_vessel).count();
    (vessels, labels.len() - vessels)
}
