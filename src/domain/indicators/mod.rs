pub mod config;
pub mod engine;

pub use config::{IndicatorCategory, IndicatorConfig, IndicatorSpec};
pub use engine::IndicatorEngine;
