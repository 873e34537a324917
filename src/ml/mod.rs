pub mod backend;
pub mod inference;
pub mod ml_model;
pub mod training;
pub mod transfer;

pub use backend::{wgpu_device, InferenceBackend, TrainBackend};
pub use inference::{evaluate_dataset, predict_scores, ClassifierModel, InferenceEngine};
pub use ml_model::{TileClassifier, VesselCnn, VesselCnnConfig};
pub use training::{train_classifier, TileBatch, TileBatcher, TileItem, TrainedClassifier};
pub use transfer::{FeatureExtractor, FeatureExtractorConfig, TransferClassifier, TransferClassifierConfig};
