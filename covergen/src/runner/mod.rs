//! Stage runners.
//!
//! The pipeline talks to the outside world only through [`StageRunner`].
//! [`CommandRunner`] implements it with ffmpeg/ffprobe and the GPT-SoVITS
//! helper scripts, each invoked with an argument list.

mod command;
mod config;
mod process;
mod traits;

pub use command::CommandRunner;
pub use config::{InferConfig, MixConfig, NormalizeConfig, RunnerConfig, SeparateConfig};
pub use process::{CommandOutput, OUTPUT_TAIL_CHARS, run_captured};
pub use traits::{NormalizedSong, SeparatedStems, StageRunner};
