//! boxsmith provisions LXC service containers: it creates a container,
//! drives a fixed sequence of setup steps against it, and tears the
//! container down again if any step fails. On success the container is
//! kept and a JSON summary of names, addresses and credentials is the
//! only thing written to stdout.

pub mod backend;
pub mod error;
pub mod orchestrator;
pub mod password;
pub mod recipes;
pub mod release;
pub mod runner;
pub mod step;

pub use backend::{ContainerBackend, DistroImage};
pub use error::{ProvisionError, Result};
pub use orchestrator::{provision, ProvisionSpec, Report, RunContext};
pub use step::{ConfigEdit, HostFile, Plan, Step, StepMode};
