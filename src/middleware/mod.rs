pub mod telemetry;

pub use telemetry::Telemetry;
