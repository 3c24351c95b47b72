pub mod cache;
pub mod device;
pub mod dispatch;
pub mod geometry;
pub mod metrics;
pub mod pipelines;
pub mod shaders;
pub mod transfer;
