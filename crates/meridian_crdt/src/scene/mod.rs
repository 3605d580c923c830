//! # Scene Layer
//!
//! Host-side pipeline, scene thread and their configuration.

mod config;
mod host;
mod runner;
mod tick;

pub use config::SceneConfig;
pub use host::SceneHost;
pub use runner::{HostRequest, HostWorker, SceneHandle, SceneLink, SceneRunner, SceneScript};
pub use tick::{TickLoop, TickStats};
