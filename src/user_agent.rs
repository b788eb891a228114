//! Shared User-Agent string for probe and RPC HTTP clients.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/smartdl";

/// Default User-Agent for outgoing requests (identifies the tool).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("smartdl/{version} (+{PROJECT_UA_URL})")
}
