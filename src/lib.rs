//! SARシーンの船舶あり/なしタイル分類
//!
//! GeoTIFFシーンとラベルCSVから学習用タイルを切り出し、クラスを揃え、
//! 正規化・データ拡張したうえでburnのCNNを学習します。
#![recursion_limit = "256"]

pub mod types;
pub mod error;
pub mod csv_loader;

// 前処理
pub mod raster;
pub mod sampler;
pub mod dataset;

pub mod model;
pub mod report;
pub mod commands;
#[cfg(feature = "ml")]
pub mod ml;

pub use error::{DetectorError, Result};
