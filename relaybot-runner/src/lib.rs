//! Process supervision and container-engine wrappers for the relay bot.

pub mod container;
mod output;
pub mod process;
mod supervisor;
pub mod terminate;

pub use container::{ContainerEngine, ContainerEntry};
pub use process::ProcessConfig;
pub use supervisor::{Supervisor, DEFAULT_GRACE_PERIOD};
