//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（分類器の種類、正規化定数など）
//! - model.bin       - モデルの重み（burnのBinBytesRecorder、フル精度）

#[cfg(feature = "ml")]
use anyhow::{Context, Result};
#[cfg(feature = "ml")]
use flate2::read::GzDecoder;
#[cfg(feature = "ml")]
use flate2::write::GzEncoder;
#[cfg(feature = "ml")]
use flate2::Compression;
#[cfg(feature = "ml")]
use log::info;
#[cfg(feature = "ml")]
use std::fs::File;
#[cfg(feature = "ml")]
use std::io::Read;
#[cfg(feature = "ml")]
use std::path::{Path, PathBuf};
#[cfg(feature = "ml")]
use tar::{Archive, Builder};

#[cfg(feature = "ml")]
use crate::model::model_metadata::ModelMetadata;

#[cfg(feature = "ml")]
const METADATA_ENTRY: &str = "metadata.json";
#[cfg(feature = "ml")]
const MODEL_ENTRY: &str = "model.bin";

/// 保存先のパス（`.gz` で終わっていなければ `.tar.gz` を付ける）
#[cfg(feature = "ml")]
pub fn archive_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

#[cfg(feature = "ml")]
fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, bytes)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 戻り値は実際に書き込んだパスです。
#[cfg(feature = "ml")]
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = archive_path(output_path);

    if let Some(parent) = tar_gz_path.parent() {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .context(format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;
    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    // gzipストリームまで閉じる
    tar_builder
        .into_inner()
        .context("Failed to finalize tar.gz archive")?
        .finish()
        .context("Failed to finalize tar.gz archive")?;

    info!(
        "モデルを保存しました: {} ({:.2} MB)",
        tar_gz_path.display(),
        model_binary.len() as f64 / 1024.0 / 1024.0
    );
    Ok(tar_gz_path)
}

/// アーカイブを走査し、必要なエントリだけ読み込む
#[cfg(feature = "ml")]
fn read_entries(
    tar_gz_path: &Path,
    want_metadata: bool,
    want_model: bool,
) -> Result<(Option<ModelMetadata>, Option<Vec<u8>>)> {
    let tar_gz_file = File::open(tar_gz_path)
        .context(format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;
    let mut archive = Archive::new(GzDecoder::new(tar_gz_file));

    let mut metadata = None;
    let mut model_binary = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();

        match name.as_str() {
            METADATA_ENTRY if want_metadata => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            MODEL_ENTRY if want_model => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary = Some(buffer);
            }
            _ => {}
        }

        if (!want_metadata || metadata.is_some()) && (!want_model || model_binary.is_some()) {
            break;
        }
    }

    Ok((metadata, model_binary))
}

/// Tar.gzからモデルメタデータを読み込む
#[cfg(feature = "ml")]
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    read_entries(tar_gz_path, true, false)?
        .0
        .ok_or_else(|| anyhow::anyhow!("metadata.json not found in tar.gz archive"))
}

/// Tar.gzからモデルバイナリを読み込む
#[cfg(feature = "ml")]
pub fn load_model_binary(tar_gz_path: &Path) -> Result<Vec<u8>> {
    read_entries(tar_gz_path, false, true)?
        .1
        .ok_or_else(|| anyhow::anyhow!("model.bin not found in tar.gz archive"))
}

/// メタデータとモデルバイナリを共に読み込む
#[cfg(feature = "ml")]
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    match read_entries(tar_gz_path, true, true)? {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
        (_, None) => Err(anyhow::anyhow!("model.bin not found in tar.gz archive")),
    }
}

/// メタデータをコンソールに表示
#[cfg(feature = "ml")]
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("分類器: {}", metadata.variant);
    println!("クラス: {}", metadata.class_labels.join(", "));
    println!(
        "入力: {}ch x {}x{}",
        metadata.input_channels, metadata.tile_size, metadata.tile_size
    );
    println!(
        "正規化定数: min = {}, max = {}",
        metadata.normalization.min, metadata.normalization.max
    );
    println!("正規化の方針: {}", metadata.normalization_policy);
    println!("学習エポック数: {}", metadata.num_epochs);
    println!("学習率: {}", metadata.learning_rate);
    println!(
        "サンプル数: 学習 {} / 検証 {}",
        metadata.train_samples, metadata.validation_samples
    );
    println!("学習日時: {}", metadata.trained_at);
    println!("========================");
}

#[cfg(all(test, feature = "ml"))]
mod tests {
    use super::*;
    use crate::dataset::NormalizationStats;
    use crate::types::ClassifierVariant;

    fn metadata() -> ModelMetadata {
        ModelMetadata::new(
            ClassifierVariant::Custom,
            256,
            NormalizationStats::new(-35.5, 12.0).unwrap(),
            3,
            0.001,
            64,
            16,
        )
    }

    #[test]
    fn test_archive_path() {
        assert_eq!(archive_path(Path::new("m/model.tar.gz")), PathBuf::from("m/model.tar.gz"));
        assert_eq!(archive_path(Path::new("m/model")), PathBuf::from("m/model.tar.gz"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("vessel_storage_{}", std::process::id()));
        let binary: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let metadata = metadata();

        let path = save_model_with_metadata(&dir.join("model"), &metadata, &binary).unwrap();
        assert!(path.ends_with("model.tar.gz"));

        assert_eq!(load_metadata(&path).unwrap(), metadata);
        assert_eq!(load_model_binary(&path).unwrap(), binary);

        let (loaded_metadata, loaded_binary) = load_model_with_metadata(&path).unwrap();
        assert_eq!(loaded_metadata.normalization, metadata.normalization);
        assert_eq!(loaded_binary.len(), 4096);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_archive_is_error() {
        assert!(load_metadata(Path::new("/nonexistent/model.tar.gz")).is_err());
    }
}
