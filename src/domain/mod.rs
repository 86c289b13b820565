// Domain layer - Plain data types shared by the pipeline
pub mod geometry;
pub mod progress;
pub mod telemetry;
