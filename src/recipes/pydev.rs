//! PyDev container: an Eclipse/PyDev IDE installation that runs against the
//! host's X11 socket, plus a host-side launcher script. The container is
//! provisioned and then stopped; the launcher starts it on demand.

use std::collections::BTreeMap;
use std::path::Path;

use crate::backend::{ContainerBackend, DistroImage};
use crate::error::Result;
use crate::orchestrator::{provision, ProvisionSpec, Report, RunContext};
use crate::password;
use crate::step::{ConfigEdit, HostFile, Plan, Step};

use super::{id_map_edits, RecipeOptions};

const DEBIAN_PACKAGES: &[&str] = &[
    "python3",
    "python3-pip",
    "python3-psycopg2",
    "adduser",
    "sudo",
    "curl",
    "git",
];

/// Just enough GTK to run Eclipse; installed without recommends to keep the
/// image small.
const GUI_PACKAGES: &[&str] = &["libgtk2.0-0", "libxtst6"];

const PYTHON_PACKAGES: &[&str] = &["Django==1.10"];

const ECLIPSE_REPOS: &[&str] = &[
    "http://pydev.org/updates",
    "http://download.eclipse.org/releases/neon",
    "http://eclipse.kacprzak.org/updates",
];

const ECLIPSE_PACKAGES: &[&str] = &[
    "org.python.pydev.feature.feature.group",
    "org.eclipse.egit.feature.group",
    "org.eclipse.tm.terminal.feature.feature.group",
    "org.kacprzak.eclipse.django.feature.feature.group",
];

// TODO: look up the latest Java and Eclipse releases instead of pinning.
const JAVA_URL: &str =
    "https://edelivery.oracle.com/otn-pub/java/jdk/8u102-b14/jdk-8u102-linux-x64.tar.gz";
const ECLIPSE_URL: &str = "http://download.eclipse.org/eclipse/downloads/drops4/R-4.6-201606061100/eclipse-platform-4.6-linux-gtk-x86_64.tar.gz";

/// Host-side bind mount exposing the X11 socket to the container.
const X11_MOUNT_ENTRY: &str = "/tmp/.X11-unix tmp/.X11-unix none bind,optional,create=dir";

/// Launcher written next to the container's config on the host: starts the
/// container if needed, attaches the IDE with the host's DISPLAY, and stops
/// the container again if this launch started it.
fn launcher_script(container_name: &str, user_name: &str) -> String {
    format!(
        "#!/bin/sh\n\
         CONTAINER={container_name}\n\
         CMD_LINE=\"eclipse/eclipse $*\"\n\
         \n\
         STARTED=false\n\
         \n\
         if ! lxc-wait -n $CONTAINER -s RUNNING -t 0; then\n\
         \x20   lxc-start -n $CONTAINER -d\n\
         \x20   lxc-wait -n $CONTAINER -s RUNNING\n\
         \x20   STARTED=true\n\
         fi\n\
         \n\
         lxc-attach --clear-env -n $CONTAINER -- sudo -u {user_name} -i env DISPLAY=$DISPLAY $CMD_LINE\n\
         \n\
         if [ \"$STARTED\" = \"true\" ]; then\n\
         \x20   lxc-stop -n $CONTAINER -t 10\n\
         fi\n"
    )
}

/// Create a new container with the PyDev IDE installed.
pub fn run<B: ContainerBackend>(backend: &B, options: &RecipeOptions) -> Result<Report> {
    let user_name = format!("{}_user", options.prefix);
    let user_info = options.user_info();
    let user_password = password::generate(password::DEFAULT_LENGTH);
    let user_home = format!("/home/{user_name}");
    let script_dir = options.lxc_data_dir.clone();

    let mut config_edits = vec![ConfigEdit::append("lxc.mount.entry", X11_MOUNT_ENTRY)];
    config_edits.extend(id_map_edits());

    let spec = ProvisionSpec {
        prefix: options.prefix.clone(),
        role: "pydev",
        image: DistroImage::debian(&options.release),
        config_edits,
        stop_when_done: true,
        debug: options.debug,
        build_plan: |context: &RunContext| {
            build_plan(
                context,
                &user_name,
                &user_info,
                &user_password,
                &user_home,
                &script_dir,
            )
        },
    };
    provision(backend, spec)
}

fn build_plan(
    context: &RunContext,
    user_name: &str,
    user_info: &str,
    user_password: &str,
    user_home: &str,
    script_dir: &Path,
) -> Plan {
    let install_debian: Vec<&str> = ["apt-get", "install", "-y"]
        .into_iter()
        .chain(DEBIAN_PACKAGES.iter().copied())
        .collect();
    let install_gui: Vec<&str> = ["apt-get", "install", "--no-install-recommends", "-y"]
        .into_iter()
        .chain(GUI_PACKAGES.iter().copied())
        .collect();
    let install_python: Vec<&str> = ["pip3", "install"]
        .into_iter()
        .chain(PYTHON_PACKAGES.iter().copied())
        .collect();

    let chpasswd_line = format!("{user_name}:{user_password}");
    // Squashes the sudo "unable to resolve host" warning inside the container.
    let etc_hosts = format!(
        "echo \"127.0.1.1       {}\" >> /etc/hosts",
        context.container_name
    );
    let fetch_java = format!(
        "curl -L -H \"Cookie: oraclelicense=accept-securebackup-cookie\" -k \"{JAVA_URL}\""
    );
    let unpack_java = "mkdir jdk && tar xz -C jdk --strip-components 1".to_string();
    let fetch_eclipse = format!("curl -L -k \"{ECLIPSE_URL}\"");
    // The \n sequences are interpreted by sed, splicing workspace and JVM
    // settings in front of -vmargs.
    let eclipse_ini = format!(
        "sed -i \"/-vmargs/i-data\\n{user_home}/workspace\\n-vm\\n{user_home}/jdk/bin/java\" \
         eclipse/eclipse.ini"
    );
    let install_pydev = format!(
        "eclipse/eclipse -application org.eclipse.equinox.p2.director -noSplash \
         -repository {} -installIU {}",
        ECLIPSE_REPOS.join(","),
        ECLIPSE_PACKAGES.join(",")
    );

    let steps = vec![
        // The bind mount is only needed at IDE runtime; keep it out of the
        // way while apt and the installers run.
        Step::run("Unmounting X11 directory", &["umount", "/tmp/.X11-unix"]),
        Step::run("Updating apt", &["apt-get", "update"]),
        Step::run("Installing debian packages", &install_debian),
        Step::run("Installing GUI packages", &install_gui),
        Step::run("Installing python packages", &install_python),
        Step::run(
            "Adding user",
            &[
                "adduser",
                "--disabled-password",
                "--gecos",
                user_info,
                user_name,
            ],
        ),
        Step::piped(
            "Setting user password",
            &["echo", chpasswd_line.as_str()],
            &["chpasswd"],
        ),
        Step::run("Appending container name to /etc/hosts", &["bash", "-c", etc_hosts.as_str()]),
        Step::piped(
            "Downloading and extracting Java JDK",
            &["bash", "-c", fetch_java.as_str()],
            &["su", "-", user_name, "-c", unpack_java.as_str()],
        ),
        Step::piped(
            "Downloading and extracting Eclipse IDE",
            &["bash", "-c", fetch_eclipse.as_str()],
            &["su", "-", user_name, "-c", "tar xz"],
        ),
        Step::run(
            "Updating Eclipse configuration",
            &["su", "-", user_name, "-c", eclipse_ini.as_str()],
        ),
        Step::run(
            "Installing PyDev",
            &["su", "-", user_name, "-c", install_pydev.as_str()],
        ),
    ];

    let script_path = script_dir
        .join(&context.container_name)
        .join("start-pydev");
    let host_files = vec![HostFile {
        description: "Writing startup script".to_string(),
        path: script_path.clone(),
        contents: launcher_script(&context.container_name, user_name),
        mode: 0o744,
    }];

    let mut fields = BTreeMap::new();
    fields.insert("user_name".to_string(), user_name.to_string());
    fields.insert("user_password".to_string(), user_password.to_string());
    fields.insert(
        "startup_script".to_string(),
        script_path.to_string_lossy().into_owned(),
    );

    Plan {
        steps,
        host_files,
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepMode;
    use std::path::PathBuf;

    fn plan() -> Plan {
        let context = RunContext {
            container_name: "acme_pydev_bookworm".to_string(),
            container_address: "10.0.3.90".to_string(),
        };
        build_plan(
            &context,
            "acme_user",
            "Acme User",
            "s3cretXY",
            "/home/acme_user",
            &PathBuf::from("/tmp/lxc"),
        )
    }

    #[test]
    fn test_downloads_are_streamed_into_container() {
        let plan = plan();
        let downloads: Vec<&Step> = plan
            .steps
            .iter()
            .filter(|step| step.description.starts_with("Downloading"))
            .collect();
        assert_eq!(downloads.len(), 2);
        for step in downloads {
            match &step.mode {
                StepMode::Piped { producer } => assert_eq!(producer[0], "bash"),
                StepMode::Direct => panic!("downloads must be piped, not staged on disk"),
            }
        }
    }

    #[test]
    fn test_launcher_script_targets_container_and_user() {
        let script = launcher_script("acme_pydev_bookworm", "acme_user");
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("CONTAINER=acme_pydev_bookworm"));
        assert!(script.contains("sudo -u acme_user -i env DISPLAY=$DISPLAY"));
    }

    #[test]
    fn test_host_file_location_and_mode() {
        let plan = plan();
        assert_eq!(plan.host_files.len(), 1);
        let script = &plan.host_files[0];
        assert_eq!(
            script.path,
            PathBuf::from("/tmp/lxc/acme_pydev_bookworm/start-pydev")
        );
        assert_eq!(script.mode, 0o744);
        assert_eq!(
            plan.fields.get("startup_script").unwrap(),
            "/tmp/lxc/acme_pydev_bookworm/start-pydev"
        );
    }

    #[test]
    fn test_x11_unmount_comes_first() {
        let plan = plan();
        assert_eq!(plan.steps[0].description, "Unmounting X11 directory");
        assert_eq!(
            plan.steps.last().unwrap().description,
            "Installing PyDev"
        );
    }
}
