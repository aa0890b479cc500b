pub mod plate_detection;
pub mod setup;
pub mod utils;
