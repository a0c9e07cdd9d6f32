pub mod identity;
pub mod telemetry;

pub use identity::*;
pub use telemetry::*;
