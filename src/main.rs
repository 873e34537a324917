use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::{Builder, Env};
use std::path::PathBuf;

use vessel_detector_lib::commands;
#[cfg(feature = "ml")]
use vessel_detector_lib::commands::TrainOptions;
use vessel_detector_lib::model::AppConfig;
use vessel_detector_lib::types::ClassifierVariant;

#[derive(Parser, Debug)]
#[command(name = "vessel_detector", version, about = "Vessel / no-vessel tile classifier for SAR scenes")]
struct Cli {
    /// 設定ファイル（存在しなければデフォルト設定）
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 学習・検証データを作成してクラスごとの件数を表示する
    Prepare {
        /// 学習タイルのプレビュー画像（PNG）
        #[arg(long)]
        preview: Option<PathBuf>,
    },
    /// 分類器を学習して保存する
    Train {
        #[arg(long, value_enum, default_value_t = ClassifierVariant::Custom)]
        variant: ClassifierVariant,
        #[arg(long)]
        epochs: Option<usize>,
        /// モデルの保存先（.tar.gz）
        #[arg(long)]
        output: Option<PathBuf>,
        /// 転移学習用のバックボーン重み
        #[arg(long)]
        pretrained: Option<PathBuf>,
        /// WGPUのCPUデバイスを使う
        #[arg(long)]
        cpu: bool,
    },
    /// 保存済みモデルを検証データで評価する
    Evaluate {
        #[arg(long)]
        model: PathBuf,
        /// 予測グリッドの出力先（PNG）
        #[arg(long)]
        grid: Option<PathBuf>,
        #[arg(long)]
        cpu: bool,
    },
    /// デフォルト設定を書き出す
    InitConfig {
        path: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    builder.init();

    let cli = Cli::parse();

    if let Command::InitConfig { path, force } = &cli.command {
        let path = path.clone().unwrap_or_else(AppConfig::default_path);
        return commands::run_init_config(&path, *force);
    }

    let config = AppConfig::load_or_default_from(&cli.config);
    config.display();

    match cli.command {
        Command::Prepare { preview } => {
            commands::run_prepare(&config, preview.as_deref())?;
        }
        #[cfg(feature = "ml")]
        Command::Train {
            variant,
            epochs,
            output,
            pretrained,
            cpu,
        } => {
            let options = TrainOptions {
                variant,
                epochs,
                output,
                pretrained,
                cpu,
            };
            commands::run_train(&config, &options)?;
        }
        #[cfg(feature = "ml")]
        Command::Evaluate { model, grid, cpu } => {
            commands::run_evaluate(&config, &model, grid.as_deref(), cpu)?;
        }
        #[cfg(not(feature = "ml"))]
        Command::Train { .. } | Command::Evaluate { .. } => {
            anyhow::bail!("このビルドは ml フィーチャーなしでビルドされています");
        }
        Command::InitConfig { .. } => {}
    }

    Ok(())
}
