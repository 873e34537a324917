//! アプリケーション設定管理モジュール
//!
//! データの場所・サンプリング・学習パラメータなどをJSON形式で保存・読み込みします。

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::dataset::{AugmentationSettings, NormalizationPolicy};
use crate::sampler::SamplingSettings;
use crate::types::{Polarization, SceneId};

/// 計算デバイスの種類
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// WGPU の CPU デバイス
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "WGPU (CPU)"),
        }
    }
}

/// 学習データの場所
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// シーンディレクトリ（`<scene_dir>/<scene_id>/VH_dB.tif`）
    pub scene_dir: String,
    /// 学習ラベルCSV
    pub train_labels: String,
    /// 検証ラベルCSV
    pub validation_labels: String,
    /// 学習に使うシーン
    pub train_scenes: Vec<SceneId>,
    /// 検証に使うシーン
    pub validation_scenes: Vec<SceneId>,
    /// 使用する偏波
    #[serde(default)]
    pub polarization: Polarization,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            scene_dir: "data".to_string(),
            train_labels: "data/train.csv".to_string(),
            validation_labels: "data/validation.csv".to_string(),
            train_scenes: [
                "2899cfb18883251bt",
                "72dba3e82f782f67t",
                "e98ca5aba8849b06t",
                "cbe4ad26fe73f118t",
                "05bc615a9b0e1159t",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            validation_scenes: ["590dd08f71056cacv", "b1844cde847a3942v"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            polarization: Polarization::Vh,
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// 学習済みモデルの保存先
    pub model_path: String,
    /// 転移学習用の事前学習済みバックボーン重み（burnのレコードファイル）
    #[serde(default)]
    pub pretrained_weights: Option<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: "models/vessel_classifier.tar.gz".to_string(),
            pretrained_weights: None,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// ワーカー数
    pub num_workers: usize,
    /// 学習率（独自CNN）
    pub learning_rate: f64,
    /// 学習率（転移学習）
    pub transfer_learning_rate: f64,
    /// エポックごとにシャッフルするか
    pub shuffle: bool,
    /// ランダムシード
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 20,
            batch_size: 32,
            num_workers: 1,
            learning_rate: 1e-3,
            transfer_learning_rate: 5e-4,
            shuffle: true,
            seed: 42,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// データの場所
    pub data: DataSettings,
    /// タイル切り出し設定
    #[serde(default)]
    pub sampling: SamplingSettings,
    /// データ拡張設定
    #[serde(default)]
    pub augmentation: AugmentationSettings,
    /// 正規化の方針
    #[serde(default)]
    pub normalization: NormalizationPolicy,
    /// モデル設定
    pub model: ModelSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// 可視化の出力ディレクトリ
    #[serde(default)]
    pub output_dir: Option<String>,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 設定を読み込む、存在しない場合はデフォルト設定を返す
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}",
                        path.display(),
                        e
                    );
                    warn!("デフォルト設定を使用します");
                    Self::default()
                }
            }
        } else {
            info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn scene_dir(&self) -> PathBuf {
        PathBuf::from(&self.data.scene_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("output"))
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== アプリケーション設定 ===");
        println!("計算デバイス: {}", self.device_type);
        println!("シーンディレクトリ: {} ({})", self.data.scene_dir, self.data.polarization);
        println!("学習シーン: {}", self.data.train_scenes.join(", "));
        println!("検証シーン: {}", self.data.validation_scenes.join(", "));
        println!("\n--- サンプリング設定 ---");
        println!("ウィンドウ半径: {}", self.sampling.half_window);
        println!("欠損値: {}", self.sampling.nodata_value);
        println!("最大試行回数: {}", self.sampling.max_retries);
        println!("\n--- トレーニング設定 ---");
        println!("エポック数: {}", self.training.num_epochs);
        println!("バッチサイズ: {}", self.training.batch_size);
        println!("学習率: {} (転移学習: {})", self.training.learning_rate, self.training.transfer_learning_rate);
        println!("シード: {}", self.training.seed);
        println!("モデルパス: {}", self.model.model_path);
        if let Some(ref weights) = self.model.pretrained_weights {
            println!("事前学習済み重み: {}", weights);
        }
        println!("========================\n");
    }
}
