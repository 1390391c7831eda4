pub mod encoder;
pub mod types;

pub use encoder::{ScreenVision, VisionEncoder};
