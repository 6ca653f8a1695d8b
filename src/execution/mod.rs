//! Pipeline execution: subprocess supervision, steps, per-project pipelines
//! and the bounded scheduler

pub mod command;
pub mod pipeline;
pub mod scheduler;
pub mod step;

pub use command::{
    CommandError, CommandOutput, CommandRunner, CommandSpec, TokioCommandRunner,
};
pub use pipeline::PipelineRunner;
pub use scheduler::{RunOptions, Scheduler};
pub use step::{build_pipeline, StepOptions, StepPlan};
