//! バックエンドとデバイスの選択

use burn::backend::Wgpu;
use burn_autodiff::Autodiff;
use burn_wgpu::WgpuDevice;
use log::info;

use crate::model::DeviceType;

/// 推論・検証用バックエンド
pub type InferenceBackend = Wgpu;

/// 学習用バックエンド（自動微分付き）
pub type TrainBackend = Autodiff<InferenceBackend>;

/// 設定のデバイス種別から WGPU デバイスを選ぶ
pub fn wgpu_device(device_type: &DeviceType) -> WgpuDevice {
    let device = match device_type {
        DeviceType::Wgpu => WgpuDevice::DiscreteGpu(0),
        DeviceType::Cpu => WgpuDevice::Cpu,
    };
    info!("使用デバイス: {} ({:?})", device_type, device);
    device
}
