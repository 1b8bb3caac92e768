pub mod config;
pub mod labels;
pub mod model_metadata;
pub mod model_storage;

pub use config::{AppConfig, ClassifierBackend, ClassifierSettings, DeviceType, TrainingSettings};
pub use labels::{load_labels, parse_labels, write_labels};
pub use model_metadata::ModelMetadata;
pub use model_storage::{describe_metadata, load_metadata, load_model_with_metadata, save_model_with_metadata};
