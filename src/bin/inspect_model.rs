//! 保存済みモデルアーカイブのメタデータ表示

use env_logger::{Builder, Env};
use std::path::PathBuf;
use std::process::ExitCode;

use vessel_detector_lib::model::{load_metadata, load_model_binary, print_metadata_info};

fn main() -> ExitCode {
    Builder::from_env(Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().collect();
    let model_path = if args.len() > 1 {
        PathBuf::from(&args[1])
    } else {
        PathBuf::from("models/vessel_classifier.tar.gz")
    };

    println!("=== {} ===", model_path.display());

    match load_metadata(&model_path) {
        Ok(metadata) => {
            println!("✓ メタデータ読み込み成功");
            print_metadata_info(&metadata);
        }
        Err(e) => {
            eprintln!("✗ エラー: {:#}", e);
            return ExitCode::FAILURE;
        }
    }

    match load_model_binary(&model_path) {
        Ok(binary) => {
            println!(
                "✓ モデル重み: {} バイト ({:.2} MB)",
                binary.len(),
                binary.len() as f64 / 1024.0 / 1024.0
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ エラー: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
