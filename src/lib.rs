pub mod data;
pub mod dispatch;
pub mod render;
pub mod reporting;
pub mod runner;
pub mod settings;
