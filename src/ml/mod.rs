pub mod dataset;
pub mod ml_model;
pub mod preprocess;
#[cfg(feature = "ml")]
pub mod inference;
#[cfg(feature = "ml")]
pub mod training;

pub use ml_model::{CLASS_NAMES, NUM_CLASSES};
#[cfg(feature = "ml")]
pub use ml_model::{ModelConfig, SkinClassifier};
pub use preprocess::{CHANNELS, IMAGE_SIZE};
#[cfg(feature = "ml")]
pub use inference::{BurnModelLoader, BurnScoreModel};
#[cfg(feature = "ml")]
pub use training::{train_model, TrainingOptions, TrainingReport};
