use std::time::Duration;

use tracing::debug;

/// Debian archive metadata describing the current stable release.
const RELEASE_URL: &str = "http://ftp.debian.org/debian/dists/stable/Release";

/// Codename substituted when the archive cannot be reached or parsed.
///
/// Pinned to the release the recipes were originally validated against;
/// override with `--fallback-release` to track something newer.
pub const FALLBACK_CODENAME: &str = "jessie";

/// Fetch the codename of the latest Debian stable release.
///
/// Best effort only: a single GET with a short timeout, no retries, no
/// caching. Every transport, status, or parse problem maps to `None` so the
/// caller can substitute its fallback codename; resolution failure is never
/// fatal.
pub fn stable_codename() -> Option<String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .ok()?;
    let body = client
        .get(RELEASE_URL)
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.text())
        .map_err(|err| debug!("release lookup failed: {err}"))
        .ok()?;
    parse_codename(&body)
}

/// Extract the codename from the body of a Debian `Release` file.
///
/// The file is RFC822-style; the fifth line is `Codename: <name>`. Quote
/// wrapping is stripped since the value is spliced into container names.
fn parse_codename(body: &str) -> Option<String> {
    let line = body.lines().nth(4)?;
    let token = line.split_whitespace().nth(1)?;
    let codename = token.trim_matches(|c| c == '\'' || c == '"');
    if codename.is_empty() {
        return None;
    }
    Some(codename.to_string())
}
