use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Everything needed to launch one instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct InstanceLaunch {
    /// Process-group handle, unique per topology (`<instance>.<topology>`).
    pub name: String,
    pub hostname: String,
    pub image: String,
    /// Static-config directory, mounted read-write so the wiring artifact is visible.
    pub config_dir: PathBuf,
    pub source_mount: Option<PathBuf>,
}

/// One host-side operation. Namespace-scoped commands address links by the
/// name they carry in the topology namespace; instance-scoped commands by the
/// name they carry inside the instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostCommand {
    AddNamespace {
        namespace: String,
    },
    DeleteNamespace {
        namespace: String,
    },
    AddBridge {
        namespace: String,
        bridge: String,
    },
    DeleteBridge {
        namespace: String,
        bridge: String,
    },
    SetLinkState {
        namespace: String,
        link: String,
        up: bool,
    },
    AddVethPair {
        namespace: String,
        local: String,
        peer: String,
    },
    AttachToBridge {
        namespace: String,
        link: String,
        bridge: String,
    },
    MoveToInstance {
        namespace: String,
        link: String,
        instance: String,
    },
    RenameInInstance {
        instance: String,
        link: String,
        new_name: String,
    },
    SetInstanceLinkState {
        instance: String,
        link: String,
        up: bool,
    },
    /// Operational state of a link as seen by the instance; stdout is the
    /// kernel `operstate` string.
    InstanceLinkState {
        instance: String,
        link: String,
    },
    StartInstance(InstanceLaunch),
    StopInstance {
        instance: String,
    },
    InstanceExec {
        instance: String,
        argv: Vec<String>,
    },
    InstanceLogs {
        instance: String,
    },
}

impl HostCommand {
    /// Whether the command changes host or instance state. Verification only
    /// issues non-mutating commands.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            HostCommand::InstanceLinkState { .. }
                | HostCommand::InstanceExec { .. }
                | HostCommand::InstanceLogs { .. }
        )
    }
}

fn updown(up: bool) -> &'static str {
    if up {
        "up"
    } else {
        "down"
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostCommand::AddNamespace { namespace } => write!(f, "add namespace {namespace}"),
            HostCommand::DeleteNamespace { namespace } => {
                write!(f, "delete namespace {namespace}")
            }
            HostCommand::AddBridge { namespace, bridge } => {
                write!(f, "add bridge {bridge} in {namespace}")
            }
            HostCommand::DeleteBridge { namespace, bridge } => {
                write!(f, "delete bridge {bridge} in {namespace}")
            }
            HostCommand::SetLinkState {
                namespace,
                link,
                up,
            } => write!(f, "set {link} {} in {namespace}", updown(*up)),
            HostCommand::AddVethPair {
                namespace,
                local,
                peer,
            } => write!(f, "add veth pair {local}/{peer} in {namespace}"),
            HostCommand::AttachToBridge {
                namespace,
                link,
                bridge,
            } => write!(f, "attach {link} to {bridge} in {namespace}"),
            HostCommand::MoveToInstance {
                link, instance, ..
            } => write!(f, "move {link} into {instance}"),
            HostCommand::RenameInInstance {
                instance,
                link,
                new_name,
            } => write!(f, "rename {link} to {new_name} in {instance}"),
            HostCommand::SetInstanceLinkState { instance, link, up } => {
                write!(f, "set {link} {} in {instance}", updown(*up))
            }
            HostCommand::InstanceLinkState { instance, link } => {
                write!(f, "read state of {link} in {instance}")
            }
            HostCommand::StartInstance(launch) => write!(f, "start instance {}", launch.name),
            HostCommand::StopInstance { instance } => write!(f, "stop instance {instance}"),
            HostCommand::InstanceExec { instance, argv } => {
                write!(f, "exec in {instance}: {}", argv.join(" "))
            }
            HostCommand::InstanceLogs { instance } => write!(f, "read logs of {instance}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn stdout(s: impl Into<String>) -> Self {
        Self {
            stdout: s.into(),
            stderr: String::new(),
        }
    }
}

/// Classified command failure. `AlreadyExists` and `Absent` are the expected
/// outcomes of idempotent steps; everything else is `Failed` or `Spawn`.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}: resource already exists")]
    AlreadyExists(String),
    #[error("{0}: resource not found")]
    Absent(String),
    #[error("{command} failed (exit {code:?}): {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    pub fn failed(command: &HostCommand, stderr: impl Into<String>) -> Self {
        CommandError::Failed {
            command: command.to_string(),
            code: None,
            stderr: stderr.into(),
        }
    }
}
