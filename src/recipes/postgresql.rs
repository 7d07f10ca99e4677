//! PostgreSQL container: the database server plus a ready-made database,
//! owner user and generated password, reachable from the host's subnet.

use std::collections::BTreeMap;

use crate::backend::{ContainerBackend, DistroImage};
use crate::error::Result;
use crate::orchestrator::{provision, ProvisionSpec, Report, RunContext};
use crate::password;
use crate::step::{Plan, Step};

use super::RecipeOptions;

/// Where the packaged server keeps its config. The version segment tracks
/// the Debian release the recipes were validated against.
const PG_CONF_DIR: &str = "/etc/postgresql/9.4/main";

/// Create and start a new container running a PostgreSQL database.
pub fn run<B: ContainerBackend>(backend: &B, options: &RecipeOptions) -> Result<Report> {
    let database_name = format!("{}_db", options.prefix);
    let database_user = format!("{}_user", options.prefix);
    let database_password = password::generate(password::DEFAULT_LENGTH);
    let host_name = options.host_name.clone();

    let spec = ProvisionSpec {
        prefix: options.prefix.clone(),
        role: "postgresql",
        image: DistroImage::debian(&options.release),
        config_edits: Vec::new(),
        stop_when_done: false,
        debug: options.debug,
        build_plan: |context: &RunContext| {
            build_plan(
                context,
                &database_name,
                &database_user,
                &database_password,
                &host_name,
            )
        },
    };
    provision(backend, spec)
}

fn build_plan(
    context: &RunContext,
    database_name: &str,
    database_user: &str,
    database_password: &str,
    host_name: &str,
) -> Plan {
    // Clients anywhere on the container's /24 may authenticate with md5.
    let subnet = context
        .container_address
        .trim_end_matches(|c: char| c.is_ascii_digit());
    let hba_line = format!(
        "echo \"host\t\t{database_name}\t\t{database_user}\t\t{subnet}0/24\t\tmd5\" >> {PG_CONF_DIR}/pg_hba.conf"
    );

    // Replace the commented-out listen_addresses line so both the container
    // and the host can connect. A missing marker line fails the step, since
    // the substitution would otherwise silently change nothing.
    let listen = format!(
        "grep -q '^#listen_addresses' {PG_CONF_DIR}/postgresql.conf && \
         sed -i \"s|^#listen_addresses.*|listen_addresses = '{container_name},{host_name}'|\" \
         {PG_CONF_DIR}/postgresql.conf",
        container_name = context.container_name,
    );

    let create_user = format!(
        "psql -c \"CREATE USER {database_user} WITH PASSWORD '{database_password}';\""
    );
    let create_db =
        format!("psql -c \"CREATE DATABASE {database_name} OWNER {database_user};\"");

    let steps = vec![
        Step::run("Updating apt", &["apt-get", "update"]),
        Step::run(
            "Installing packages",
            &["apt-get", "install", "-y", "postgresql", "postgresql-client"],
        ),
        Step::run("Configuring pg_hba.conf", &["bash", "-c", hba_line.as_str()]),
        Step::run("Configuring postgresql.conf", &["bash", "-c", listen.as_str()]),
        Step::run(
            "Restarting PostgreSQL daemon",
            &["systemctl", "restart", "postgresql"],
        ),
        Step::run(
            "Creating database user",
            &["su", "-", "postgres", "-c", create_user.as_str()],
        ),
        Step::run(
            "Creating database",
            &["su", "-", "postgres", "-c", create_db.as_str()],
        ),
    ];

    let mut fields = BTreeMap::new();
    fields.insert("database_name".to_string(), database_name.to_string());
    fields.insert("database_user".to_string(), database_user.to_string());
    fields.insert(
        "database_password".to_string(),
        database_password.to_string(),
    );

    Plan {
        steps,
        host_files: Vec::new(),
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RunContext {
        RunContext {
            container_name: "acme_postgresql_bookworm".to_string(),
            container_address: "10.0.3.151".to_string(),
        }
    }

    #[test]
    fn test_step_order_is_fixed() {
        let plan = build_plan(&context(), "acme_db", "acme_user", "s3cretXY", "buildhost");
        let descriptions: Vec<&str> = plan
            .steps
            .iter()
            .map(|step| step.description.as_str())
            .collect();
        assert_eq!(
            descriptions,
            vec![
                "Updating apt",
                "Installing packages",
                "Configuring pg_hba.conf",
                "Configuring postgresql.conf",
                "Restarting PostgreSQL daemon",
                "Creating database user",
                "Creating database",
            ]
        );
    }

    #[test]
    fn test_hba_entry_uses_container_subnet() {
        let plan = build_plan(&context(), "acme_db", "acme_user", "s3cretXY", "buildhost");
        let hba = &plan.steps[2].command[2];
        assert!(hba.contains("10.0.3.0/24"), "got: {hba}");
        assert!(hba.contains("acme_db"));
        assert!(hba.contains("acme_user"));
    }

    #[test]
    fn test_listen_addresses_names_container_and_host() {
        let plan = build_plan(&context(), "acme_db", "acme_user", "s3cretXY", "buildhost");
        let listen = &plan.steps[3].command[2];
        assert!(listen.contains("listen_addresses = 'acme_postgresql_bookworm,buildhost'"));
    }

    #[test]
    fn test_result_fields() {
        let plan = build_plan(&context(), "acme_db", "acme_user", "s3cretXY", "buildhost");
        assert_eq!(plan.fields.get("database_name").unwrap(), "acme_db");
        assert_eq!(plan.fields.get("database_user").unwrap(), "acme_user");
        assert_eq!(plan.fields.get("database_password").unwrap(), "s3cretXY");
        assert!(plan.host_files.is_empty());
    }
}
