pub mod pipeline;
pub mod subsystems;

pub use pipeline::{process, status, ProcessReport, ProcessSettings, StatusReport};
