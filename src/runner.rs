//! Step execution against a running container.

use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::backend::ContainerBackend;
use crate::error::{ProvisionError, Result};
use crate::step::{Step, StepMode};

/// Runs individual steps against one container.
///
/// The runner treats every non-zero exit status as fatal and reports it with
/// the step's description; it never inspects or retries a command. `debug_all`
/// lets the command output of every step through, regardless of the per-step
/// flag.
pub struct StepRunner<'a, B: ContainerBackend> {
    backend: &'a B,
    name: &'a str,
    debug_all: bool,
}

impl<'a, B: ContainerBackend> StepRunner<'a, B> {
    pub fn new(backend: &'a B, name: &'a str, debug_all: bool) -> Self {
        Self {
            backend,
            name,
            debug_all,
        }
    }

    /// Execute one step, returning `Err` on the first sign of trouble.
    ///
    /// Precondition: the container exists and is running. Violating that is
    /// a distinct error from the step's command failing.
    pub fn run(&self, step: &Step) -> Result<()> {
        if !self.backend.exists(self.name) || !self.backend.is_running(self.name) {
            return Err(ProvisionError::NotRunning);
        }
        if step.command.is_empty() {
            return Err(ProvisionError::InvalidCommand {
                description: step.description.clone(),
            });
        }

        info!("{}...", step.description);
        let debug = step.debug || self.debug_all;

        let status = match &step.mode {
            StepMode::Direct => self
                .backend
                .attach_run(self.name, &step.command, None, debug)
                .map_err(|err| self.attach_failed(step, err)),
            StepMode::Piped { producer } => self.run_piped(step, producer, debug),
        }?;

        if status != 0 {
            debug!("step {:?} exited with status {status}", step.description);
            return Err(ProvisionError::StepFailed {
                description: step.description.clone(),
            });
        }
        Ok(())
    }

    /// Spawn the host-side producer and feed its stdout to the attached
    /// command. Waits for both processes so nothing is leaked.
    fn run_piped(&self, step: &Step, producer: &[String], debug: bool) -> Result<i32> {
        let program = producer.first().cloned().unwrap_or_default();
        let mut cmd = Command::new(&program);
        cmd.args(producer.get(1..).unwrap_or_default())
            .stdout(Stdio::piped());
        if !debug {
            cmd.stderr(Stdio::null());
        }

        let mut child = cmd.spawn().map_err(|err| ProvisionError::HostCommand {
            program: program.clone(),
            source: err,
        })?;
        // The pipe write end belongs to the child; taking the read end here
        // hands it to lxc-attach as stdin.
        let pipe = child.stdout.take();
        let status = self
            .backend
            .attach_run(self.name, &step.command, pipe, debug)
            .map_err(|err| self.attach_failed(step, err));
        let _ = child.wait();
        status
    }

    fn attach_failed(&self, step: &Step, err: std::io::Error) -> ProvisionError {
        debug!("attach failed for {:?}: {err}", step.description);
        ProvisionError::StepFailed {
            description: step.description.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DistroImage;
    use std::cell::RefCell;
    use std::process::ChildStdout;
    use std::time::Duration;

    /// Minimal backend: a container that exists and runs, recording attaches.
    struct RunningBackend {
        attached: RefCell<Vec<Vec<String>>>,
        exit_status: i32,
    }

    impl RunningBackend {
        fn new(exit_status: i32) -> Self {
            Self {
                attached: RefCell::new(Vec::new()),
                exit_status,
            }
        }
    }

    impl ContainerBackend for RunningBackend {
        fn exists(&self, _name: &str) -> bool {
            true
        }
        fn is_running(&self, _name: &str) -> bool {
            true
        }
        fn create(&self, _name: &str, _image: &DistroImage) -> bool {
            true
        }
        fn start(&self, _name: &str) -> bool {
            true
        }
        fn stop(&self, _name: &str) -> bool {
            true
        }
        fn destroy(&self, _name: &str) -> bool {
            true
        }
        fn get_address(&self, _name: &str, _timeout: Duration) -> Option<String> {
            Some("10.0.3.2".to_string())
        }
        fn attach_run(
            &self,
            _name: &str,
            argv: &[String],
            stdin: Option<ChildStdout>,
            _debug: bool,
        ) -> std::io::Result<i32> {
            if let Some(mut pipe) = stdin {
                let mut sink = Vec::new();
                let _ = std::io::Read::read_to_end(&mut pipe, &mut sink);
            }
            self.attached.borrow_mut().push(argv.to_vec());
            Ok(self.exit_status)
        }
        fn clear_config_item(&self, _name: &str, _key: &str) -> bool {
            true
        }
        fn append_config_item(&self, _name: &str, _key: &str, _value: &str) -> bool {
            true
        }
        fn set_config_item(&self, _name: &str, _key: &str, _value: &str) -> bool {
            true
        }
        fn save_config(&self, _name: &str) -> bool {
            true
        }
    }

    #[test]
    fn test_direct_step_success() {
        let backend = RunningBackend::new(0);
        let runner = StepRunner::new(&backend, "box", false);
        runner
            .run(&Step::run("Updating apt", &["apt-get", "update"]))
            .expect("step should succeed");
        assert_eq!(backend.attached.borrow().len(), 1);
    }

    #[test]
    fn test_nonzero_exit_is_step_failure() {
        let backend = RunningBackend::new(100);
        let runner = StepRunner::new(&backend, "box", false);
        let err = runner
            .run(&Step::run("Installing packages", &["apt-get", "install"]))
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::StepFailed { ref description } if description == "Installing packages"
        ));
    }

    #[test]
    fn test_empty_command_rejected() {
        let backend = RunningBackend::new(0);
        let runner = StepRunner::new(&backend, "box", false);
        let err = runner.run(&Step::run("Doing nothing", &[])).unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidCommand { .. }));
    }

    #[test]
    fn test_piped_step_feeds_stdin() {
        let backend = RunningBackend::new(0);
        let runner = StepRunner::new(&backend, "box", false);
        runner
            .run(&Step::piped(
                "Setting user password",
                &["echo", "user:secret"],
                &["chpasswd"],
            ))
            .expect("piped step should succeed");
        assert_eq!(backend.attached.borrow()[0], vec!["chpasswd"]);
    }

    #[test]
    fn test_missing_host_program_is_fatal() {
        let backend = RunningBackend::new(0);
        let runner = StepRunner::new(&backend, "box", false);
        let err = runner
            .run(&Step::piped(
                "Downloading archive",
                &["boxsmith-no-such-tool"],
                &["tar", "xz"],
            ))
            .unwrap_err();
        assert!(matches!(err, ProvisionError::HostCommand { .. }));
    }
}
