#![allow(dead_code)]

mod fakes;
mod fixtures;
pub use fakes::*;
pub use fixtures::*;

pub use visual_search::config::{AnnounceMode, AppConfig};
pub use visual_search::models::Collaborators;
pub use visual_search::pipeline::{PipelineRunner, PipelineSettings, RunOutcome};
pub use visual_search::store::{NewTask, Task, TaskStore};
