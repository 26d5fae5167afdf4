mod inference_service;
mod ort_service;
mod routes;
mod server;
mod telemetry;

pub mod app;
pub mod cnn;
pub mod config;
pub mod model_service;
pub mod prediction;
pub mod preprocess;

pub use app::start_app;
