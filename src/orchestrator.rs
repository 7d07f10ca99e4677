//! The provisioning pipeline: container lifecycle, rollback, step driving.
//!
//! A run is strictly sequential. The container advances monotonically
//! through create -> configure -> start -> provisioned, and the first
//! failure anywhere after creation triggers a full stop + destroy via a
//! scope guard, so no half-provisioned container ever survives a failed
//! run.

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::backend::{ContainerBackend, DistroImage};
use crate::error::{ProvisionError, Result};
use crate::runner::StepRunner;
use crate::step::{ConfigEdit, HostFile, Plan};

/// Upper bound on waiting for the container's network address.
pub const ADDRESS_TIMEOUT: Duration = Duration::from_secs(120);

/// Everything the orchestrator needs to run one recipe.
///
/// `build_plan` runs once the container is up and addressable, so the step
/// sequence can reference the assigned address; the sequence itself is fixed
/// at that point and runs in strict order.
pub struct ProvisionSpec<F>
where
    F: FnOnce(&RunContext) -> Plan,
{
    /// Caller-supplied container name prefix.
    pub prefix: String,
    /// Role tag spliced into the container name, e.g. `postgresql`.
    pub role: &'static str,
    pub image: DistroImage,
    /// Config mutations applied between creation and first start.
    pub config_edits: Vec<ConfigEdit>,
    /// Stop the container again once provisioning succeeds ("prepared but
    /// not running" end state).
    pub stop_when_done: bool,
    /// Let every step's command output through.
    pub debug: bool,
    pub build_plan: F,
}

/// Environment-dependent values resolved during the run and handed to the
/// recipe's plan builder.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub container_name: String,
    pub container_address: String,
}

/// The terminal success artifact: a flat, key-sorted record of names,
/// addresses and credentials. Produced only on full success.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct Report {
    fields: BTreeMap<String, String>,
}

impl Report {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Pretty-printed JSON with keys in sorted order.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Stop-and-destroy scope guard for the container being provisioned.
///
/// Armed immediately after creation and disarmed only once the run has fully
/// succeeded, so every other exit path, including errors raised long after
/// creation, tears the container down. Exactly one of {guard fires, report
/// returned} happens per run.
struct CleanupGuard<'a, B: ContainerBackend> {
    backend: &'a B,
    name: &'a str,
    armed: bool,
}

impl<'a, B: ContainerBackend> CleanupGuard<'a, B> {
    fn arm(backend: &'a B, name: &'a str) -> Self {
        Self {
            backend,
            name,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<B: ContainerBackend> Drop for CleanupGuard<'_, B> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        info!("Cleaning up container {}...", self.name);
        if !self.backend.stop(self.name) {
            warn!("could not stop container {}", self.name);
        }
        if !self.backend.destroy(self.name) {
            warn!("could not destroy container {}", self.name);
        }
    }
}

/// Provision one container end to end.
///
/// On success the container is left in the recipe's end state and the report
/// is returned; on any failure after creation the container is stopped and
/// destroyed before the error propagates.
pub fn provision<B, F>(backend: &B, spec: ProvisionSpec<F>) -> Result<Report>
where
    B: ContainerBackend,
    F: FnOnce(&RunContext) -> Plan,
{
    let name = format!("{}_{}_{}", spec.prefix, spec.role, spec.image.release);

    // Precondition, checked before anything is created: the name must be free.
    if backend.exists(&name) {
        return Err(ProvisionError::AlreadyExists { name });
    }

    info!("Creating filesystem...");
    if !backend.create(&name, &spec.image) {
        return Err(ProvisionError::provider(
            "Failed to create the container filesystem",
        ));
    }

    // From here on the container exists; everything below runs under the
    // guard so a failure on any path rolls the creation back.
    let mut guard = CleanupGuard::arm(backend, &name);

    apply_config_edits(backend, &name, &spec.config_edits)?;

    info!("Starting container...");
    if !backend.start(&name) {
        return Err(ProvisionError::provider("Failed to start the container"));
    }

    info!("Getting IP address...");
    let address = backend
        .get_address(&name, ADDRESS_TIMEOUT)
        .ok_or(ProvisionError::AddressTimeout {
            timeout_secs: ADDRESS_TIMEOUT.as_secs(),
        })?;

    let context = RunContext {
        container_name: name.clone(),
        container_address: address,
    };
    let plan = (spec.build_plan)(&context);

    let runner = StepRunner::new(backend, &name, spec.debug);
    for step in &plan.steps {
        runner.run(step)?;
    }

    for host_file in &plan.host_files {
        write_host_file(host_file)?;
    }

    if spec.stop_when_done {
        info!("Stopping container...");
        if !backend.stop(&name) {
            return Err(ProvisionError::provider("Failed to stop the container"));
        }
    }

    // Full success: the container is the caller's now.
    guard.disarm();

    let mut fields = plan.fields;
    fields.insert("container_name".to_string(), context.container_name);
    fields.insert("container_address".to_string(), context.container_address);
    Ok(Report { fields })
}

fn apply_config_edits<B: ContainerBackend>(
    backend: &B,
    name: &str,
    edits: &[ConfigEdit],
) -> Result<()> {
    if edits.is_empty() {
        return Ok(());
    }
    for edit in edits {
        info!("{}...", edit_description(edit));
        let ok = match edit {
            ConfigEdit::Clear(key) => backend.clear_config_item(name, key),
            ConfigEdit::Append(key, value) => backend.append_config_item(name, key, value),
            ConfigEdit::Set(key, value) => backend.set_config_item(name, key, value),
        };
        if !ok {
            return Err(ProvisionError::provider(edit_description(edit)));
        }
    }
    info!("Saving configuration...");
    if !backend.save_config(name) {
        return Err(ProvisionError::provider("Saving configuration"));
    }
    Ok(())
}

fn edit_description(edit: &ConfigEdit) -> String {
    match edit {
        ConfigEdit::Clear(key) => format!("Clearing {key} entries"),
        ConfigEdit::Append(key, _) => format!("Appending {key} entry"),
        ConfigEdit::Set(key, _) => format!("Setting {key} entry"),
    }
}

fn write_host_file(host_file: &HostFile) -> Result<()> {
    info!("{}...", host_file.description);
    let write = || -> std::io::Result<()> {
        if let Some(parent) = host_file.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&host_file.path, &host_file.contents)?;
        std::fs::set_permissions(
            &host_file.path,
            std::fs::Permissions::from_mode(host_file.mode),
        )
    };
    write().map_err(|err| ProvisionError::HostFile {
        description: host_file.description.clone(),
        source: err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_json_is_key_sorted() {
        let mut fields = BTreeMap::new();
        fields.insert("database_user".to_string(), "acme_user".to_string());
        fields.insert("container_name".to_string(), "acme_pg".to_string());
        let report = Report { fields };

        let json = report.to_json().expect("report serializes");
        let name_pos = json.find("container_name").unwrap();
        let user_pos = json.find("database_user").unwrap();
        assert!(name_pos < user_pos);
    }

    #[test]
    fn test_edit_descriptions() {
        assert_eq!(
            edit_description(&ConfigEdit::clear("lxc.id_map")),
            "Clearing lxc.id_map entries"
        );
        assert_eq!(
            edit_description(&ConfigEdit::append("lxc.mount.entry", "x")),
            "Appending lxc.mount.entry entry"
        );
        assert_eq!(
            edit_description(&ConfigEdit::set("lxc.utsname", "box")),
            "Setting lxc.utsname entry"
        );
    }
}
