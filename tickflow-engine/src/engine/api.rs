//! Engine services visible to nodes and hosts.

use crate::runtime::Runtime;
use tickflow_core::{EngineTime, EvaluationMode, Result};

/// A callback run at a tick boundary.
pub type Notification = Box<dyn FnOnce(&mut Runtime) -> Result<()> + Send>;

/// Clock bounds and tick-boundary hooks of the running engine.
pub trait EvaluationEngineApi {
    /// First evaluation time.
    fn start_time(&self) -> EngineTime;

    /// Last evaluation time.
    fn end_time(&self) -> EngineTime;

    /// Current time: the wall clock in real-time modes, else the evaluation time.
    fn now(&self) -> EngineTime;

    /// Time of the tick being evaluated.
    fn evaluation_time(&self) -> EngineTime;

    /// Run mode.
    fn evaluation_mode(&self) -> EvaluationMode;

    /// Run `notification` just before the next tick's node sweep.
    fn add_before_evaluation_notification(&mut self, notification: Notification);

    /// Run `notification` just after the current (or next) tick's node sweep.
    fn add_after_evaluation_notification(&mut self, notification: Notification);

    /// Ask the loop to stop at the next tick boundary.
    fn request_stop(&mut self);

    /// Whether a stop has been requested.
    fn is_stop_requested(&self) -> bool;
}
