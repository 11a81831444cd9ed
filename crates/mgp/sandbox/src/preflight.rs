//! Static checks on a manifest before any process exists.

use serde::{Deserialize, Serialize};

use crate::manifest::SandboxManifest;
use crate::policy::SandboxPolicy;

pub const DISALLOWED_COMMAND_FRAGMENTS: [&str; 9] =
    ["&&", "||", ";", "|", "`", "$(", "${", ">", "<"];

pub const DISALLOWED_ENV_KEYS: [&str; 3] = ["LD_PRELOAD", "LD_LIBRARY_PATH", "PYTHONINSPECT"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub ok: bool,
    /// `ok` or the first violation.
    pub reason: String,
    pub violations: Vec<String>,
}

/// Normalise a relative POSIX path: drop `.` and empty segments, refuse `..`
/// that would climb above the root.
pub fn normalize_path(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            s => parts.push(s),
        }
    }
    let joined = parts.join("/");
    Some(if path.starts_with('/') { format!("/{joined}") } else { joined })
}

/// True when `path` equals a root or sits beneath one.
pub fn path_within(path: &str, roots: &[String]) -> bool {
    let Some(path) = normalize_path(path) else {
        return false;
    };
    roots.iter().filter_map(|r| normalize_path(r)).any(|root| {
        !root.is_empty() && (path == root || path.starts_with(&format!("{root}/")))
    })
}

pub fn analyze_execution_plan(manifest: &SandboxManifest, policy: &SandboxPolicy) -> PreflightReport {
    let mut violations = Vec::new();

    if manifest.command.is_empty() {
        violations.push("missing_command".to_string());
    }
    for token in &manifest.command {
        if DISALLOWED_COMMAND_FRAGMENTS.iter().any(|f| token.contains(f)) {
            violations.push(format!("disallowed_command_token:{token}"));
        }
    }
    for key in manifest.env.keys() {
        if DISALLOWED_ENV_KEYS.contains(&key.as_str()) {
            violations.push(format!("disallowed_env_key:{key}"));
        }
    }
    for mount in &manifest.mounts {
        if !path_within(mount, &policy.write_path_allowlist) {
            violations.push(format!("mount_outside_write_allowlist:{mount}"));
        }
    }
    for path in &manifest.allowed_write_paths {
        if !path_within(path, &policy.write_path_allowlist) {
            violations.push(format!("write_path_outside_policy:{path}"));
        }
    }
    for host in &manifest.allowed_network_hosts {
        if !policy.network_egress_allowlist.contains(host) {
            violations.push(format!("network_host_outside_policy:{host}"));
        }
    }

    PreflightReport {
        ok: violations.is_empty(),
        reason: violations.first().cloned().unwrap_or_else(|| "ok".into()),
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ReplaySeed;

    fn make_manifest(command: &[&str]) -> SandboxManifest {
        SandboxManifest::for_policy(
            "mut-1",
            "e1",
            ReplaySeed::from_u64(7),
            command.iter().copied(),
            &SandboxPolicy::default_v1(),
        )
    }

    fn check(m: &SandboxManifest) -> PreflightReport {
        analyze_execution_plan(m, &SandboxPolicy::default_v1())
    }

    #[test]
    fn clean_plan_passes() {
        let r = check(&make_manifest(&["pytest", "-x", "tests/unit"]).with_mount("reports/run-1"));
        assert!(r.ok, "{:?}", r.violations);
        assert_eq!(r.reason, "ok");
    }

    #[test]
    fn shell_metacharacters_rejected() {
        let r = check(&make_manifest(&["pytest", "&&", "curl", "x|sh", "$(id)"]));
        assert!(!r.ok);
        assert_eq!(r.reason, "disallowed_command_token:&&");
        assert_eq!(r.violations.len(), 3);
    }

    #[test]
    fn missing_command() {
        assert_eq!(check(&make_manifest(&[])).reason, "missing_command");
    }

    #[test]
    fn dangerous_env_keys_rejected() {
        let r = check(&make_manifest(&["pytest"]).with_env("LD_PRELOAD", "/tmp/x.so"));
        assert_eq!(r.reason, "disallowed_env_key:LD_PRELOAD");
    }

    #[test]
    fn mounts_must_sit_in_write_roots() {
        let r = check(&make_manifest(&["pytest"]).with_mount("/etc"));
        assert_eq!(r.reason, "mount_outside_write_allowlist:/etc");
        let r = check(&make_manifest(&["pytest"]).with_mount("reports/../../etc"));
        assert!(!r.ok);
        let r = check(&make_manifest(&["pytest"]).with_mount("reportsX"));
        assert!(!r.ok);
    }

    #[test]
    fn manifest_cannot_widen_policy() {
        let mut m = make_manifest(&["pytest"]);
        m.allowed_write_paths.push("/home".into());
        m.allowed_network_hosts.push("evil.example".into());
        let r = check(&m);
        assert_eq!(
            r.violations,
            vec![
                "write_path_outside_policy:/home".to_string(),
                "network_host_outside_policy:evil.example".to_string(),
            ]
        );
    }

    #[test]
    fn path_normalization() {
        assert_eq!(normalize_path("./reports//a/"), Some("reports/a".into()));
        assert_eq!(normalize_path("a/../b"), Some("b".into()));
        assert_eq!(normalize_path("../x"), None);
    }
}
