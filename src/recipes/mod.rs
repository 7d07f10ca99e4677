//! The provisioning recipes: fixed step sequences and templated
//! configuration for each supported service container.

use std::path::PathBuf;

use crate::step::ConfigEdit;

pub mod django;
pub mod postgresql;
pub mod pydev;

/// UID/GID mapping used by the desktop-ish recipes: root maps to an
/// unprivileged host range, while container uid/gid 1000 maps straight
/// through so the container user can own host-shared resources (the X11
/// socket in particular).
pub(crate) fn id_map_edits() -> Vec<ConfigEdit> {
    vec![
        ConfigEdit::clear("lxc.id_map"),
        ConfigEdit::append("lxc.id_map", "u 0 100000 1000"),
        ConfigEdit::append("lxc.id_map", "g 0 100000 1000"),
        ConfigEdit::append("lxc.id_map", "u 1000 1000 1"),
        ConfigEdit::append("lxc.id_map", "g 1000 1000 1"),
        ConfigEdit::append("lxc.id_map", "u 1001 101001 64535"),
        ConfigEdit::append("lxc.id_map", "g 1001 101001 64535"),
    ]
}

/// Resolved inputs shared by every recipe.
///
/// The release codename and host name are environment-dependent; they are
/// resolved once by the caller (with fallbacks) and passed in explicitly so
/// the recipes stay testable against fake backends.
#[derive(Debug, Clone)]
pub struct RecipeOptions {
    /// Container name prefix; also the stem of generated user and database
    /// names.
    pub prefix: String,
    /// Debian release codename the container image is built from.
    pub release: String,
    /// Name of the machine hosting the containers.
    pub host_name: String,
    /// The host's LXC data directory; host-side launcher artifacts are
    /// written next to the container's own config there.
    pub lxc_data_dir: PathBuf,
    /// Pass step command output through instead of discarding it.
    pub debug: bool,
}

impl RecipeOptions {
    /// GECOS-style full name derived from the prefix, e.g. `acme` ->
    /// `Acme User`.
    pub(crate) fn user_info(&self) -> String {
        let mut chars = self.prefix.chars();
        let capitalized = match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
            None => String::new(),
        };
        format!("{capitalized} User")
    }
}
