//! Backend health tracking and outcome-driven cost weighting

mod adaptive;
mod health;
mod recorder;

pub use adaptive::{WeightAdjuster, WeightChange};
pub use health::{Counters, HealthMonitor, HealthTransition, WindowStats};
pub use recorder::OutcomeRecorder;
