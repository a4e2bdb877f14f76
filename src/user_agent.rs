//! User-Agent string for API calls.
//!
//! Format: `{app}/{version} ({os}; module: {submodule}; {arch}) modrepo-broker/{crate version}`.
//! The module comment is omitted when no submodule is given.

/// Builds the User-Agent for one call.
#[must_use]
pub(crate) fn api_user_agent(
    application_name: &str,
    application_version: &str,
    submodule: Option<&str>,
) -> String {
    build(
        application_name,
        application_version,
        submodule,
        std::env::consts::OS,
        std::env::consts::ARCH,
    )
}

fn build(
    application_name: &str,
    application_version: &str,
    submodule: Option<&str>,
    os: &str,
    arch: &str,
) -> String {
    let mut comments = vec![os_family(os)];
    if let Some(submodule) = submodule.map(str::trim).filter(|s| !s.is_empty()) {
        comments.push(format!("module: {submodule}"));
    }
    comments.push(arch_label(arch).to_string());

    format!(
        "{application_name}/{application_version} ({}) modrepo-broker/{}",
        comments.join("; "),
        env!("CARGO_PKG_VERSION")
    )
}

fn os_family(os: &str) -> String {
    match os {
        "windows" => "Windows_NT".to_string(),
        "macos" => "Darwin".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => "Unknown".to_string(),
            }
        }
    }
}

fn arch_label(arch: &str) -> &str {
    match arch {
        "x86_64" => "x64",
        "x86" => "x86",
        other => other,
    }
}
