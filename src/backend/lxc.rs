//! `ContainerBackend` implementation backed by the LXC command line tools.
//!
//! Every lifecycle operation shells out to the corresponding `lxc-*` binary;
//! config items are edited against the container's `config` file under the
//! LXC data directory and flushed by `save_config`, matching liblxc's
//! set-then-save semantics.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::{ContainerBackend, DistroImage};

/// Cadence of the address polling loop.
const ADDRESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// LXC backend driving the `lxc-*` tools on the host.
///
/// Not `Sync`: config edits are buffered in a `RefCell` until `save_config`.
/// A provisioning run is strictly single threaded, so nothing else ever
/// observes the buffer.
pub struct LxcBackend {
    data_dir: PathBuf,
    /// Pending config lines per container, loaded lazily from disk.
    configs: RefCell<HashMap<String, Vec<String>>>,
}

impl LxcBackend {
    /// Backend using the invoking user's LXC data directory.
    pub fn new() -> Self {
        Self::with_data_dir(default_data_dir())
    }

    /// Backend rooted at an explicit data directory. Used by tests.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            configs: RefCell::new(HashMap::new()),
        }
    }

    fn config_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name).join("config")
    }

    /// Run an `lxc-*` tool with its output discarded, returning success.
    fn lxc(&self, program: &str, args: &[&str]) -> bool {
        trace!("running {program} {args:?}");
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Run an `lxc-*` tool and capture stdout, or `None` on any failure.
    fn lxc_output(&self, program: &str, args: &[&str]) -> Option<String> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Load the container's config lines, from the pending buffer if present.
    fn load_config(&self, name: &str) -> io::Result<Vec<String>> {
        if let Some(lines) = self.configs.borrow().get(name) {
            return Ok(lines.clone());
        }
        let text = std::fs::read_to_string(self.config_path(name))?;
        Ok(text.lines().map(|line| line.to_string()).collect())
    }

    fn edit_config<F>(&self, name: &str, edit: F) -> bool
    where
        F: FnOnce(&mut Vec<String>),
    {
        let mut lines = match self.load_config(name) {
            Ok(lines) => lines,
            Err(err) => {
                debug!("cannot load config for {name}: {err}");
                return false;
            }
        };
        edit(&mut lines);
        self.configs.borrow_mut().insert(name.to_string(), lines);
        true
    }
}

impl Default for LxcBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerBackend for LxcBackend {
    fn exists(&self, name: &str) -> bool {
        self.lxc("lxc-info", &["-n", name])
    }

    fn is_running(&self, name: &str) -> bool {
        self.lxc_output("lxc-info", &["-n", name, "-sH"])
            .map(|state| state.trim() == "RUNNING")
            .unwrap_or(false)
    }

    fn create(&self, name: &str, image: &DistroImage) -> bool {
        self.lxc(
            "lxc-create",
            &[
                "-q",
                "-n",
                name,
                "-t",
                "download",
                "--",
                "--dist",
                image.dist.as_str(),
                "--release",
                image.release.as_str(),
                "--arch",
                image.arch.as_str(),
            ],
        )
    }

    fn start(&self, name: &str) -> bool {
        self.lxc("lxc-start", &["-n", name, "-d"])
    }

    fn stop(&self, name: &str) -> bool {
        self.lxc("lxc-stop", &["-n", name])
    }

    fn destroy(&self, name: &str) -> bool {
        self.lxc("lxc-destroy", &["-n", name])
    }

    fn get_address(&self, name: &str, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(output) = self.lxc_output("lxc-info", &["-n", name, "-iH"]) {
                if let Some(address) = output.lines().next().map(str::trim) {
                    if !address.is_empty() {
                        return Some(address.to_string());
                    }
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(ADDRESS_POLL_INTERVAL);
        }
    }

    fn attach_run(
        &self,
        name: &str,
        argv: &[String],
        stdin: Option<ChildStdout>,
        debug: bool,
    ) -> io::Result<i32> {
        let mut cmd = Command::new("lxc-attach");
        cmd.arg("--clear-env")
            .args(["-n", name])
            .args(["--set-var", "TERM=xterm"])
            .arg("--")
            .args(argv);
        match stdin {
            Some(pipe) => {
                cmd.stdin(Stdio::from(pipe));
            }
            None => {
                cmd.stdin(Stdio::inherit());
            }
        }
        if debug {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let status = cmd.status()?;
        Ok(status.code().unwrap_or(-1))
    }

    fn clear_config_item(&self, name: &str, key: &str) -> bool {
        self.edit_config(name, |lines| {
            lines.retain(|line| config_key(line) != Some(key));
        })
    }

    fn append_config_item(&self, name: &str, key: &str, value: &str) -> bool {
        self.edit_config(name, |lines| {
            lines.push(format!("{key} = {value}"));
        })
    }

    fn set_config_item(&self, name: &str, key: &str, value: &str) -> bool {
        self.edit_config(name, |lines| {
            lines.retain(|line| config_key(line) != Some(key));
            lines.push(format!("{key} = {value}"));
        })
    }

    fn save_config(&self, name: &str) -> bool {
        let Some(lines) = self.configs.borrow_mut().remove(name) else {
            // Nothing was edited; the on-disk config is already current.
            return true;
        };
        let mut text = lines.join("\n");
        text.push('\n');
        match std::fs::write(self.config_path(name), text) {
            Ok(()) => true,
            Err(err) => {
                debug!("cannot save config for {name}: {err}");
                false
            }
        }
    }
}

/// The key of an LXC `key = value` config line, if it is one.
fn config_key(line: &str) -> Option<&str> {
    let key = line.split('=').next()?.trim();
    if key.is_empty() || key.starts_with('#') {
        return None;
    }
    Some(key)
}

/// System containers live under `/var/lib/lxc`; unprivileged ones under
/// `~/.local/share/lxc`. `lxc-create` picks based on the invoking user, so we
/// mirror that choice here.
pub fn default_data_dir() -> PathBuf {
    if std::env::var_os("USER").is_some_and(|user| user == "root") {
        return PathBuf::from("/var/lib/lxc");
    }
    match std::env::var_os("HOME") {
        Some(home) => Path::new(&home).join(".local/share/lxc"),
        None => PathBuf::from("/var/lib/lxc"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn backend_with_config(lines: &str) -> (tempfile::TempDir, LxcBackend) {
        let dir = tempdir().expect("Failed to create temp dir");
        let container_dir = dir.path().join("box");
        std::fs::create_dir_all(&container_dir).expect("Failed to create container dir");
        std::fs::write(container_dir.join("config"), lines).expect("Failed to write config");
        let backend = LxcBackend::with_data_dir(dir.path());
        (dir, backend)
    }

    #[test]
    fn test_clear_and_append_round_trip() {
        let (dir, backend) = backend_with_config(
            "# template config\nlxc.id_map = u 0 100000 65536\nlxc.id_map = g 0 100000 65536\nlxc.rootfs = /x\n",
        );

        assert!(backend.clear_config_item("box", "lxc.id_map"));
        assert!(backend.append_config_item("box", "lxc.id_map", "u 0 100000 1000"));
        assert!(backend.save_config("box"));

        let saved = std::fs::read_to_string(dir.path().join("box/config")).unwrap();
        assert_eq!(
            saved,
            "# template config\nlxc.rootfs = /x\nlxc.id_map = u 0 100000 1000\n"
        );
    }

    #[test]
    fn test_set_replaces_existing_entries() {
        let (dir, backend) = backend_with_config("lxc.utsname = old\n");

        assert!(backend.set_config_item("box", "lxc.utsname", "new"));
        assert!(backend.save_config("box"));

        let saved = std::fs::read_to_string(dir.path().join("box/config")).unwrap();
        assert_eq!(saved, "lxc.utsname = new\n");
    }

    #[test]
    fn test_save_without_edits_is_noop() {
        let (dir, backend) = backend_with_config("lxc.rootfs = /x\n");
        assert!(backend.save_config("box"));
        let saved = std::fs::read_to_string(dir.path().join("box/config")).unwrap();
        assert_eq!(saved, "lxc.rootfs = /x\n");
    }

    #[test]
    fn test_edit_missing_container_fails() {
        let dir = tempdir().expect("Failed to create temp dir");
        let backend = LxcBackend::with_data_dir(dir.path());
        assert!(!backend.clear_config_item("ghost", "lxc.id_map"));
    }

    #[test]
    fn test_config_key_parsing() {
        assert_eq!(config_key("lxc.id_map = u 0 1 2"), Some("lxc.id_map"));
        assert_eq!(config_key("# comment"), None);
        assert_eq!(config_key(""), None);
    }
}
