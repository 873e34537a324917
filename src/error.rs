//! ライブラリ共通のエラー型
//!
//! 前処理（ラスタ読み込み・タイル抽出・正規化）で発生する失敗を区別して返します。
//! 学習やCLIなどのアプリケーション層では `anyhow` で包んで扱います。

use std::path::PathBuf;

use thiserror::Error;

/// 前処理パイプラインのエラー
#[derive(Error, Debug)]
pub enum DetectorError {
    /// ラスタファイルが開けない、またはデコードできない
    #[error("シーン '{scene_id}' の読み込みに失敗しました ({path}): {reason}")]
    SceneLoad {
        scene_id: String,
        path: PathBuf,
        reason: String,
    },

    /// 対応していないTIFFのサンプル形式
    #[error("未対応のラスタ形式です ({path}): {format}")]
    UnsupportedRaster { path: PathBuf, format: String },

    /// ラベルCSVの読み込みエラー
    #[error("ラベルファイルの読み込みに失敗しました ({path}): {reason}")]
    LabelLoad { path: PathBuf, reason: String },

    /// ネガティブサンプリングが試行上限に達した
    #[error(
        "シーン '{scene_id}' のネガティブサンプリングが試行上限 {attempts} 回に達しました ({accepted}/{quota} 枚取得済み)"
    )]
    RetryCapExhausted {
        scene_id: String,
        attempts: usize,
        accepted: usize,
        quota: usize,
    },

    /// シーンがタイル1枚分より小さい
    #[error("シーン '{scene_id}' ({rows}x{cols}) はウィンドウ半径 {half_window} に対して小さすぎます")]
    SceneTooSmall {
        scene_id: String,
        rows: usize,
        cols: usize,
        half_window: usize,
    },

    /// 最小値と最大値が一致し正規化できない
    #[error("画素値の分散がゼロのため正規化できません (min = max = {value})")]
    ZeroVariance { value: f32 },

    /// サンプルが必要な処理に空のデータセットが渡された
    #[error("データセットが空です: {0}")]
    EmptyDataset(String),
}

/// 前処理用のResult型
pub type Result<T> = std::result::Result<T, DetectorError>;
