use serde::{Deserialize, Serialize};

/// シーン識別子（xView3のscene_id）
pub type SceneId = String;

/// 分類クラス数
pub const NUM_CLASSES: usize = 2;

/// クラス名（インデックスがクラスID）
pub const CLASS_NAMES: [&str; NUM_CLASSES] = ["no_vessel", "vessel"];

/// 船舶なしのクラスID
pub const LABEL_NO_VESSEL: usize = 0;

/// 船舶ありのクラスID
pub const LABEL_VESSEL: usize = 1;

/// ラベル1件（CSVの1行に対応）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub scene_id: SceneId,
    /// シーン内の行（ピクセル）
    pub row: i64,
    /// シーン内の列（ピクセル）
    pub col: i64,
    pub is_vessel: bool,
}

impl LabelRecord {
    /// クラスID (1 = 船舶, 0 = 船舶なし)
    pub fn class_id(&self) -> usize {
        if self.is_vessel {
            LABEL_VESSEL
        } else {
            LABEL_NO_VESSEL
        }
    }
}

/// 使用するSAR偏波
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Polarization {
    #[default]
    Vh,
    Vv,
}

impl Polarization {
    /// シーンディレクトリ内のラスタファイル名
    pub fn file_name(&self) -> &'static str {
        match self {
            Polarization::Vh => "VH_dB.tif",
            Polarization::Vv => "VV_dB.tif",
        }
    }
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::Vh => write!(f, "VH"),
            Polarization::Vv => write!(f, "VV"),
        }
    }
}

/// 分類器の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierVariant {
    /// 1チャンネル入力の独自CNN
    #[default]
    Custom,
    /// 凍結したバックボーン + 学習可能なヘッド（3チャンネル入力）
    Transfer,
}

impl ClassifierVariant {
    /// モデルへの入力チャンネル数
    pub fn input_channels(&self) -> usize {
        match self {
            ClassifierVariant::Custom => 1,
            ClassifierVariant::Transfer => 3,
        }
    }
}

impl std::fmt::Display for ClassifierVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifierVariant::Custom => write!(f, "custom"),
            ClassifierVariant::Transfer => write!(f, "transfer"),
        }
    }
}
