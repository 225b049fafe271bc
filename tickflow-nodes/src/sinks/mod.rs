//! Sink nodes.

mod recording;

pub use recording::{Recording, RecordingSink};
