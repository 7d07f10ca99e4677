use std::collections::BTreeMap;
use std::path::PathBuf;

/// How a step's command receives its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepMode {
    /// Run the command inside the container with inherited stdin.
    Direct,
    /// Spawn `producer` on the host and pipe its stdout into the
    /// in-container command's stdin. Used to stream secrets or downloads
    /// into the container without staging them on disk.
    Piped { producer: Vec<String> },
}

/// One ordered provisioning action executed against a running container.
///
/// Steps have no identity beyond their position in the recipe; none is ever
/// retried or skipped. Commands are opaque, fully formed argument vectors;
/// quoting of templated values is the recipe's responsibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub description: String,
    pub command: Vec<String>,
    pub mode: StepMode,
    /// Let the command's stdout/stderr through instead of discarding them.
    pub debug: bool,
}

impl Step {
    /// A direct in-container command.
    pub fn run<S: Into<String>>(description: S, command: &[&str]) -> Self {
        Self {
            description: description.into(),
            command: to_argv(command),
            mode: StepMode::Direct,
            debug: false,
        }
    }

    /// A host-producer piped into an in-container consumer.
    pub fn piped<S: Into<String>>(description: S, producer: &[&str], command: &[&str]) -> Self {
        Self {
            description: description.into(),
            command: to_argv(command),
            mode: StepMode::Piped {
                producer: to_argv(producer),
            },
            debug: false,
        }
    }
}

fn to_argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

/// A mutation of the container's configuration, applied between creation and
/// first start and persisted with `save_config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEdit {
    /// Drop every entry for the key.
    Clear(String),
    /// Add one more entry for the key, keeping existing ones.
    Append(String, String),
    /// Replace all entries for the key with a single value.
    Set(String, String),
}

impl ConfigEdit {
    pub fn clear(key: &str) -> Self {
        Self::Clear(key.to_string())
    }

    pub fn append(key: &str, value: &str) -> Self {
        Self::Append(key.to_string(), value.to_string())
    }

    pub fn set(key: &str, value: &str) -> Self {
        Self::Set(key.to_string(), value.to_string())
    }
}

/// A host-side artifact written after the step sequence succeeds, e.g. the
/// pydev launcher script.
#[derive(Debug, Clone)]
pub struct HostFile {
    pub description: String,
    pub path: PathBuf,
    pub contents: String,
    /// Unix permission bits applied after writing.
    pub mode: u32,
}

/// Everything a recipe wants done once the container is up: the ordered step
/// sequence, host artifacts, and the recipe-specific result fields.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub steps: Vec<Step>,
    pub host_files: Vec<HostFile>,
    pub fields: BTreeMap<String, String>,
}
