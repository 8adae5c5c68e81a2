pub mod engine;
pub mod forest;
pub mod kmeans;
pub mod scaler;
