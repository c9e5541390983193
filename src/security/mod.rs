pub mod access_control;
pub mod gate;

pub use access_control::AccessControl;
pub use gate::{ExecutionGate, GateDecision};
