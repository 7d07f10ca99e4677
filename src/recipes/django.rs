//! Django container: nginx fronting a uWSGI emperor serving a freshly
//! generated Django project, owned by an unprivileged user.

use std::collections::BTreeMap;

use crate::backend::{ContainerBackend, DistroImage};
use crate::error::Result;
use crate::orchestrator::{provision, ProvisionSpec, Report, RunContext};
use crate::password;
use crate::step::{Plan, Step};

use super::{id_map_edits, RecipeOptions};

const DEBIAN_PACKAGES: &[&str] = &[
    "python3",
    "python3-pip",
    "python3-psycopg2",
    "nginx",
    "adduser",
    "openssh-server",
];

/// Pinned so the generated project keeps working when upstream moves on.
const PYTHON_PACKAGES: &[&str] = &["uWSGI==2.0.13.1", "Django==1.10", "openpyxl==2.4.1"];

/// nginx site config: a unix-socket upstream for uWSGI, static/media served
/// directly, everything else passed to Django.
fn nginx_site(project_socket: &str, server_name: &str, project_dir: &str) -> String {
    format!(
        "\n\
         # the upstream component nginx needs to connect to\n\
         upstream django {{\n\
         \x20   server unix://{project_socket}.sock; # for a file socket\n\
         }}\n\
         \n\
         # configuration of the server\n\
         server {{\n\
         \x20   listen      80;\n\
         \x20   server_name {server_name};\n\
         \x20   charset     utf-8;\n\
         \n\
         \x20   # max upload size\n\
         \x20   client_max_body_size 75M;\n\
         \n\
         \x20   location = /favicon.ico {{ access_log off; log_not_found off; }}\n\
         \n\
         \x20   # Django media\n\
         \x20   location /media  {{\n\
         \x20       alias {project_dir}media;\n\
         \x20   }}\n\
         \n\
         \x20   location /static {{\n\
         \x20       alias {project_dir}static;\n\
         \x20   }}\n\
         \n\
         \x20   # Finally, send all non-media requests to the Django server.\n\
         \x20   location / {{\n\
         \x20       uwsgi_pass  django;\n\
         \x20       include     {project_dir}uwsgi_params;\n\
         \x20   }}\n\
         }}\n"
    )
}

/// uWSGI vassal config. The %(...) references are uWSGI's own magic
/// variables, expanded by uWSGI itself, not by us.
fn uwsgi_ini(project_name: &str, user_home: &str) -> String {
    format!(
        "\n\
         [uwsgi]\n\
         project         = {project_name}\n\
         base            = {user_home}\n\
         \n\
         # the base directory (full path)\n\
         chdir           = %(base)/%(project)\n\
         # Django's wsgi file\n\
         module          = %(project).wsgi\n\
         \n\
         # master\n\
         master          = true\n\
         # maximum number of worker processes\n\
         processes       = 5\n\
         # the socket (use the full path to be safe)\n\
         socket          = %(base)/%(project)/%(project).sock\n\
         chmod-socket    = 666\n\
         # clear environment on exit\n\
         vacuum          = true\n\
         daemonize       = /var/log/uwsgi-emperor.log\n"
    )
}

/// systemd unit for the uWSGI emperor.
const UWSGI_SERVICE: &str = "\n\
    [Unit]\n\
    Description=uWSGI Emperor\n\
    After=syslog.target\n\
    \n\
    [Service]\n\
    ExecStart=/usr/local/bin/uwsgi --emperor /etc/uwsgi/vassals\n\
    Restart=always\n\
    KillSignal=SIGQUIT\n\
    Type=notify\n\
    StandardError=syslog\n\
    NotifyAccess=all\n\
    \n\
    [Install]\n\
    WantedBy=multi-user.target\n";

/// Create and start a new container running a barebones Django site.
pub fn run<B: ContainerBackend>(backend: &B, options: &RecipeOptions) -> Result<Report> {
    let user_name = format!("{}_user", options.prefix);
    let user_info = options.user_info();
    let user_password = password::generate(password::DEFAULT_LENGTH);
    let user_home = format!("/home/{user_name}");
    let project_name = format!("{}_project", options.prefix);
    let project_path = format!("{user_home}/{project_name}");

    let spec = ProvisionSpec {
        prefix: options.prefix.clone(),
        role: "django",
        image: DistroImage::debian(&options.release),
        config_edits: id_map_edits(),
        stop_when_done: false,
        debug: options.debug,
        build_plan: |context: &RunContext| {
            build_plan(
                context,
                &user_name,
                &user_info,
                &user_password,
                &user_home,
                &project_name,
                &project_path,
            )
        },
    };
    provision(backend, spec)
}

#[allow(clippy::too_many_arguments)]
fn build_plan(
    context: &RunContext,
    user_name: &str,
    user_info: &str,
    user_password: &str,
    user_home: &str,
    project_name: &str,
    project_path: &str,
) -> Plan {
    let project_dir = format!("{project_path}/");
    let nginx_conf_path = format!("{project_dir}{project_name}_nginx.conf");
    let uwsgi_ini_path = format!("{project_dir}{project_name}_uwsgi.ini");

    let install_debian: Vec<&str> = ["apt-get", "install", "-y"]
        .into_iter()
        .chain(DEBIAN_PACKAGES.iter().copied())
        .collect();
    let install_python: Vec<&str> = ["pip3", "install"]
        .into_iter()
        .chain(PYTHON_PACKAGES.iter().copied())
        .collect();

    let chpasswd_line = format!("{user_name}:{user_password}");
    let start_project = format!("django-admin.py startproject {project_name}");
    let static_root = format!(
        "echo \"STATIC_ROOT = os.path.join(BASE_DIR, 'static') + os.sep\" \
         >> {project_dir}{project_name}/settings.py"
    );
    let collectstatic = format!("cd {project_name} && python3 manage.py collectstatic --noinput");
    let make_media = format!("mkdir {project_dir}media");
    let write_nginx_conf = format!(
        "echo \"{}\" > {nginx_conf_path}",
        nginx_site(
            &format!("{project_dir}{project_name}"),
            &context.container_address,
            &project_dir,
        )
    );
    let copy_uwsgi_params = format!("cp /etc/nginx/uwsgi_params {project_dir}");
    let write_uwsgi_ini = format!(
        "echo \"{}\" > {uwsgi_ini_path}",
        uwsgi_ini(project_name, user_home)
    );
    let write_uwsgi_service =
        format!("echo \"{UWSGI_SERVICE}\" > /lib/systemd/system/uwsgi.service;");

    let steps = vec![
        Step::run("Updating apt", &["apt-get", "update"]),
        Step::run("Installing debian packages", &install_debian),
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
        Step::run(
            "Creating Django project",
            &["su", "-", user_name, "-c", start_project.as_str()],
        ),
        Step::run(
            "Appending configuration to settings.py",
            &["su", "-", user_name, "-c", static_root.as_str()],
        ),
        Step::run(
            "Updating static files configuration",
            &["su", "-", user_name, "-c", collectstatic.as_str()],
        ),
        Step::run(
            "Creating media directory",
            &["su", "-", user_name, "-c", make_media.as_str()],
        ),
        Step::run(
            "Creating nginx configuration file",
            &["su", "-", user_name, "-c", write_nginx_conf.as_str()],
        ),
        Step::run(
            "Copying nginx uwsgi parameter file",
            &["su", "-", user_name, "-c", copy_uwsgi_params.as_str()],
        ),
        Step::run(
            "Removing default site",
            &["rm", "-f", "/etc/nginx/sites-enabled/default"],
        ),
        Step::run(
            "Setting site status to active",
            &["ln", "-s", nginx_conf_path.as_str(), "/etc/nginx/sites-enabled/"],
        ),
        Step::run("Restarting nginx", &["systemctl", "restart", "nginx"]),
        Step::run(
            "Creating uwsgi configuration file",
            &["su", "-", user_name, "-c", write_uwsgi_ini.as_str()],
        ),
        Step::run(
            "Creating uwsgi configuration directory",
            &["mkdir", "-p", "/etc/uwsgi/vassals"],
        ),
        Step::run(
            "Linking uwsgi configuration",
            &["ln", "-s", uwsgi_ini_path.as_str(), "/etc/uwsgi/vassals/"],
        ),
        Step::run("Creating uwsgi service", &["bash", "-c", write_uwsgi_service.as_str()]),
        Step::run("Activating uwsgi service", &["systemctl", "enable", "uwsgi"]),
        Step::run("Starting uwsgi service", &["systemctl", "start", "uwsgi"]),
    ];

    let mut fields = BTreeMap::new();
    fields.insert("user_name".to_string(), user_name.to_string());
    fields.insert("user_password".to_string(), user_password.to_string());
    fields.insert("project_path".to_string(), project_path.to_string());

    Plan {
        steps,
        host_files: Vec::new(),
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepMode;

    fn plan() -> Plan {
        let context = RunContext {
            container_name: "acme_django_bookworm".to_string(),
            container_address: "10.0.3.77".to_string(),
        };
        build_plan(
            &context,
            "acme_user",
            "Acme User",
            "s3cretXY",
            "/home/acme_user",
            "acme_project",
            "/home/acme_user/acme_project",
        )
    }

    #[test]
    fn test_password_is_piped_not_argv() {
        let plan = plan();
        let password_step = plan
            .steps
            .iter()
            .find(|step| step.description == "Setting user password")
            .expect("password step present");
        match &password_step.mode {
            StepMode::Piped { producer } => {
                assert_eq!(producer[0], "echo");
                assert!(producer[1].contains("acme_user:s3cretXY"));
            }
            StepMode::Direct => panic!("password must be streamed via a pipe"),
        }
        assert_eq!(password_step.command, vec!["chpasswd"]);
    }

    #[test]
    fn test_nginx_conf_references_address_and_socket() {
        let conf = nginx_site(
            "/home/acme_user/acme_project/acme_project",
            "10.0.3.77",
            "/home/acme_user/acme_project/",
        );
        assert!(conf.contains("server unix:///home/acme_user/acme_project/acme_project.sock"));
        assert!(conf.contains("server_name 10.0.3.77"));
        assert!(conf.contains("alias /home/acme_user/acme_project/static"));
    }

    #[test]
    fn test_uwsgi_ini_keeps_magic_variables() {
        let ini = uwsgi_ini("acme_project", "/home/acme_user");
        assert!(ini.contains("project         = acme_project"));
        assert!(ini.contains("base            = /home/acme_user"));
        // uWSGI expands these itself; they must survive templating verbatim.
        assert!(ini.contains("socket          = %(base)/%(project)/%(project).sock"));
    }

    #[test]
    fn test_service_steps_come_last() {
        let plan = plan();
        let descriptions: Vec<&str> = plan
            .steps
            .iter()
            .map(|step| step.description.as_str())
            .collect();
        assert_eq!(descriptions.first(), Some(&"Updating apt"));
        assert_eq!(
            &descriptions[descriptions.len() - 3..],
            &[
                "Creating uwsgi service",
                "Activating uwsgi service",
                "Starting uwsgi service",
            ]
        );
        assert_eq!(plan.fields.get("project_path").unwrap(), "/home/acme_user/acme_project");
    }
}
