//! SARシーン（単バンドGeoTIFF）の読み込み
//!
//! シーンは `ndarray::Array2<f32>` として全体をメモリに展開します。
//! 1つの分割（学習/検証）のシーンは [`SceneStore`] が所有し、
//! タイル抽出が終わったら呼び出し側で破棄します。

use log::info;
use ndarray::Array2;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult, Limits};

use crate::error::{DetectorError, Result};
use crate::types::{Polarization, SceneId};

/// 1シーン分の強度グリッド（読み込み後は不変）
#[derive(Debug, Clone)]
pub struct Scene {
    id: SceneId,
    data: Array2<f32>,
}

impl Scene {
    pub fn new(id: impl Into<SceneId>, data: Array2<f32>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }
}

/// シーンIDからシーンへの対応表
///
/// シーンを所有するのはストアで、切り出したタイルは独立したコピーです。
#[derive(Debug, Default)]
pub struct SceneStore {
    scenes: BTreeMap<SceneId, Scene>,
}

impl SceneStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `<scene_dir>/<scene_id>/<VH_dB.tif|VV_dB.tif>` を順に読み込む
    pub fn load(scene_dir: &Path, scene_ids: &[SceneId], polarization: Polarization) -> Result<Self> {
        let mut store = Self::new();
        for id in scene_ids {
            let path = scene_path(scene_dir, id, polarization);
            let scene = read_scene(id, &path)?;
            info!(
                "シーン {} を読み込みました: {}x{} ({})",
                id,
                scene.rows(),
                scene.cols(),
                polarization
            );
            store.insert(scene);
        }
        Ok(store)
    }

    pub fn insert(&mut self, scene: Scene) {
        self.scenes.insert(scene.id.clone(), scene);
    }

    pub fn get(&self, id: &str) -> Option<&Scene> {
        self.scenes.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scene> {
        self.scenes.values()
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

/// シーンのラスタファイルパス
pub fn scene_path(scene_dir: &Path, scene_id: &str, polarization: Polarization) -> PathBuf {
    scene_dir.join(scene_id).join(polarization.file_name())
}

/// 単バンドTIFFを読み込んで `f32` のグリッドにする
pub fn read_scene(scene_id: &str, path: &Path) -> Result<Scene> {
    let load_error = |reason: String| DetectorError::SceneLoad {
        scene_id: scene_id.to_string(),
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| load_error(e.to_string()))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| load_error(e.to_string()))?
        .with_limits(Limits::unlimited());

    let (width, height) = decoder.dimensions().map_err(|e| load_error(e.to_string()))?;
    let (width, height) = (width as usize, height as usize);

    let pixels: Vec<f32> = match decoder.read_image().map_err(|e| load_error(e.to_string()))? {
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => {
            return Err(DetectorError::UnsupportedRaster {
                path: path.to_path_buf(),
                format: "64bit整数".to_string(),
            })
        }
    };

    // 複数バンドのTIFFは長さが合わない
    if pixels.len() != width * height {
        return Err(DetectorError::UnsupportedRaster {
            path: path.to_path_buf(),
            format: format!(
                "単バンドではありません ({} 値, 期待 {}x{})",
                pixels.len(),
                height,
                width
            ),
        });
    }

    let data = Array2::from_shape_vec((height, width), pixels)
        .map_err(|e| load_error(e.to_string()))?;

    Ok(Scene::new(scene_id, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiff::encoder::{colortype, TiffEncoder};

    #[test]
    fn test_read_float_scene() {
        let dir = std::env::temp_dir().join(format!("vessel_detector_raster_{}", std::process::id()));
        let scene_dir = dir.join("abc");
        std::fs::create_dir_all(&scene_dir).unwrap();
        let path = scene_dir.join("VH_dB.tif");

        let (width, height) = (6u32, 4u32);
        let data: Vec<f32> = (0..width * height).map(|v| v as f32 - 10.0).collect();
        {
            let file = File::create(&path).unwrap();
            let mut encoder = TiffEncoder::new(file).unwrap();
            encoder
                .write_image::<colortype::Gray32Float>(width, height, &data)
                .unwrap();
        }

        let store = SceneStore::load(&dir, &["abc".to_string()], Polarization::Vh).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        let scene = store.get("abc").unwrap();
        assert_eq!(scene.rows(), 4);
        assert_eq!(scene.cols(), 6);
        assert_eq!(scene.data()[[0, 0]], -10.0);
        assert_eq!(scene.data()[[1, 0]], -4.0);
        assert_eq!(scene.data()[[3, 5]], 13.0);
    }

    #[test]
    fn test_missing_raster_is_scene_load_error() {
        let result = SceneStore::load(
            Path::new("/nonexistent/vessel_detector"),
            &["missing".to_string()],
            Polarization::Vh,
        );
        assert!(matches!(result, Err(DetectorError::SceneLoad { .. })));
    }

    #[test]
    fn test_scene_path_uses_polarization() {
        let path = scene_path(Path::new("data"), "xyz", Polarization::Vv);
        assert_eq!(path, PathBuf::from("data/xyz/VV_dB.tif"));
    }
}
