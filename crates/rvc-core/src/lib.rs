pub mod config;
pub mod error;
pub mod model;

pub use config::{FrameLayout, PipelineConfig, PitchMethod};
pub use error::{Result, RvcError};
pub use model::{available_models, ConversionModel, IdentityModel, ModelConfig, OutputSink};
