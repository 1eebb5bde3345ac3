//! Domain value objects.
//!
//! Value objects are immutable and defined by their attributes.

mod job_id;
mod pitch_shift;
mod task_handle;

pub use job_id::JobId;
pub use pitch_shift::PitchShift;
pub use task_handle::TaskHandle;
