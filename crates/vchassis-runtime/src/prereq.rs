use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[allow(unsafe_code)]
fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() }
}

/// Check prerequisites for provisioning on the real host with `engine`.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_host_prereqs(engine: &str) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("ip") {
        missing.push(MissingPrereq {
            name: "ip".to_owned(),
            purpose: "namespace, bridge and veth management",
            install_hint: "part of iproute2: apt install iproute2 | dnf install iproute | zypper install iproute2",
        });
    }

    if !command_exists(engine) {
        missing.push(MissingPrereq {
            name: engine.to_owned(),
            purpose: "running instance process groups",
            install_hint: "install docker or podman, or pass --engine",
        });
    }

    if effective_uid() != 0 {
        missing.push(MissingPrereq {
            name: "root".to_owned(),
            purpose: "creating network namespaces and moving links between them",
            install_hint: "run as root or via sudo",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nvchassis needs these to build topologies on this host.");
    msg
}
