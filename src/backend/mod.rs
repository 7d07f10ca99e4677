//! Container backend abstraction.
//!
//! The orchestrator talks to the container runtime only through the
//! [`ContainerBackend`] trait, so the whole provisioning pipeline can be
//! exercised against an in-memory fake in tests. The one production
//! implementation shells out to the `lxc-*` command line tools.

use std::io;
use std::process::ChildStdout;
use std::time::Duration;

pub mod lxc;

pub use lxc::LxcBackend;

/// Parameters for the `download` template: which image to build the
/// container's root filesystem from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistroImage {
    pub dist: String,
    pub release: String,
    pub arch: String,
}

impl DistroImage {
    /// A Debian amd64 image for the given release codename.
    pub fn debian(release: &str) -> Self {
        Self {
            dist: "debian".to_string(),
            release: release.to_string(),
            arch: "amd64".to_string(),
        }
    }
}

/// Operations the orchestrator needs from a container runtime.
///
/// Lifecycle and config operations report plain success/failure as `bool`,
/// mirroring liblxc; the orchestrator attaches the step description to a
/// failure. `attach_run` is the only operation whose I/O errors carry more
/// detail, because spawn failures are diagnosed separately from the attached
/// command's own exit status.
pub trait ContainerBackend {
    /// Whether a container with this name is defined at all.
    fn exists(&self, name: &str) -> bool;

    /// Whether the container is currently running.
    fn is_running(&self, name: &str) -> bool;

    /// Build the container's root filesystem from the given image.
    fn create(&self, name: &str, image: &DistroImage) -> bool;

    fn start(&self, name: &str) -> bool;

    fn stop(&self, name: &str) -> bool;

    fn destroy(&self, name: &str) -> bool;

    /// Block until the container has a network address, up to `timeout`.
    /// Polling cadence is the backend's concern; the bound is the caller's.
    fn get_address(&self, name: &str, timeout: Duration) -> Option<String>;

    /// Run `argv` inside the container and wait for it.
    ///
    /// The environment is cleared except for `TERM=xterm`. When `stdin` is
    /// given it becomes the command's standard input, otherwise stdin is
    /// inherited. Stdout/stderr go to the null sink unless `debug`. Returns
    /// the command's exit status; `Err` means the attach itself failed.
    fn attach_run(
        &self,
        name: &str,
        argv: &[String],
        stdin: Option<ChildStdout>,
        debug: bool,
    ) -> io::Result<i32>;

    /// Drop every config entry for `key`.
    fn clear_config_item(&self, name: &str, key: &str) -> bool;

    /// Add a config entry for `key`, keeping existing entries.
    fn append_config_item(&self, name: &str, key: &str, value: &str) -> bool;

    /// Replace all config entries for `key` with one value.
    fn set_config_item(&self, name: &str, key: &str, value: &str) -> bool;

    /// Persist buffered config edits to the container's config file.
    fn save_config(&self, name: &str) -> bool;
}
