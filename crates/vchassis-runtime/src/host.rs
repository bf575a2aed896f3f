use crate::command::{CommandError, CommandOutput, HostCommand};
use crate::runner::CommandRunner;
use std::process::Command;
use tracing::{debug, trace};

/// Mount point of an instance's static-config directory.
pub const CONFIG_MOUNT: &str = "/usr/share/sonic/virtual_chassis";
/// Mount point of the optional alternate source tree.
pub const SOURCE_MOUNT: &str = "/src";

const EXISTS_MARKERS: &[&str] = &["File exists", "already exists", "is already in use"];
const ABSENT_MARKERS: &[&str] = &[
    "Cannot find device",
    "No such file or directory",
    "does not exist",
    "No such container",
    "No such object",
    "Cannot open network namespace",
];
const INSTANCE_ABSENT_MARKERS: &[&str] = &["No such container", "No such object", "is not running"];

fn shell_quote(s: &str) -> String {
    // POSIX single quoting: close, escaped quote, reopen.
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn to_strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_owned()).collect()
}

/// Runs commands against the real host with `ip` (iproute2) and a
/// Docker-compatible container engine.
pub struct HostRunner {
    engine: String,
}

impl Default for HostRunner {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl HostRunner {
    pub fn new(engine: &str) -> Self {
        Self {
            engine: engine.to_owned(),
        }
    }

    /// The exact argv executed for `command`.
    pub fn argv(&self, command: &HostCommand) -> Vec<String> {
        let engine = self.engine.as_str();
        match command {
            HostCommand::AddNamespace { namespace } => to_strings(&["ip", "netns", "add", namespace]),
            HostCommand::DeleteNamespace { namespace } => {
                to_strings(&["ip", "netns", "delete", namespace])
            }
            HostCommand::AddBridge { namespace, bridge } => to_strings(&[
                "ip", "-n", namespace, "link", "add", "name", bridge, "type", "bridge",
            ]),
            HostCommand::DeleteBridge { namespace, bridge } => to_strings(&[
                "ip", "-n", namespace, "link", "delete", "dev", bridge, "type", "bridge",
            ]),
            HostCommand::SetLinkState {
                namespace,
                link,
                up,
            } => to_strings(&[
                "ip",
                "-n",
                namespace,
                "link",
                "set",
                "dev",
                link,
                if *up { "up" } else { "down" },
            ]),
            HostCommand::AddVethPair {
                namespace,
                local,
                peer,
            } => to_strings(&[
                "ip", "-n", namespace, "link", "add", "name", local, "type", "veth", "peer",
                "name", peer,
            ]),
            HostCommand::AttachToBridge {
                namespace,
                link,
                bridge,
            } => to_strings(&["ip", "-n", namespace, "link", "set", "dev", link, "master", bridge]),
            HostCommand::MoveToInstance {
                namespace,
                link,
                instance,
            } => {
                // The instance's network namespace is only reachable through its pid.
                let script = format!(
                    "pid=$({} inspect --format '{{{{.State.Pid}}}}' {}) || exit 1; ip -n {} link set dev {} netns \"$pid\"",
                    shell_quote(engine),
                    shell_quote(instance),
                    shell_quote(namespace),
                    shell_quote(link),
                );
                vec!["sh".to_owned(), "-c".to_owned(), script]
            }
            HostCommand::RenameInInstance {
                instance,
                link,
                new_name,
            } => to_strings(&[
                engine, "exec", instance, "ip", "link", "set", "dev", link, "name", new_name,
            ]),
            HostCommand::SetInstanceLinkState { instance, link, up } => to_strings(&[
                engine,
                "exec",
                instance,
                "ip",
                "link",
                "set",
                "dev",
                link,
                if *up { "up" } else { "down" },
            ]),
            HostCommand::InstanceLinkState { instance, link } => {
                let path = format!("/sys/class/net/{link}/operstate");
                to_strings(&[engine, "exec", instance, "cat", &path])
            }
            HostCommand::StartInstance(launch) => {
                let config_volume = format!("{}:{CONFIG_MOUNT}", launch.config_dir.display());
                let mut argv = to_strings(&[
                    engine,
                    "run",
                    "-d",
                    "--privileged",
                    "--network",
                    "none",
                    "--name",
                    &launch.name,
                    "--hostname",
                    &launch.hostname,
                    "-v",
                    &config_volume,
                ]);
                if let Some(src) = &launch.source_mount {
                    argv.push("-v".to_owned());
                    argv.push(format!("{}:{SOURCE_MOUNT}:ro", src.display()));
                }
                argv.push(launch.image.clone());
                argv
            }
            HostCommand::StopInstance { instance } => to_strings(&[engine, "rm", "-f", instance]),
            HostCommand::InstanceExec { instance, argv } => {
                let mut full = to_strings(&[engine, "exec", instance]);
                full.extend(argv.iter().cloned());
                full
            }
            HostCommand::InstanceLogs { instance } => to_strings(&[engine, "logs", instance]),
        }
    }
}

/// Map a finished process to a classified result. This is the only place
/// where stderr text decides the outcome.
pub(crate) fn classify(
    command: &HostCommand,
    success: bool,
    code: Option<i32>,
    stdout: String,
    stderr: String,
) -> Result<CommandOutput, CommandError> {
    if success {
        return Ok(CommandOutput { stdout, stderr });
    }

    let instance_scoped = matches!(
        command,
        HostCommand::InstanceExec { .. } | HostCommand::InstanceLogs { .. }
    );
    let absent_markers = if instance_scoped {
        INSTANCE_ABSENT_MARKERS
    } else {
        ABSENT_MARKERS
    };

    if !instance_scoped && EXISTS_MARKERS.iter().any(|m| stderr.contains(m)) {
        return Err(CommandError::AlreadyExists(command.to_string()));
    }
    if absent_markers.iter().any(|m| stderr.contains(m)) {
        return Err(CommandError::Absent(command.to_string()));
    }
    Err(CommandError::Failed {
        command: command.to_string(),
        code,
        stderr: stderr.trim().to_owned(),
    })
}

impl CommandRunner for HostRunner {
    fn name(&self) -> &'static str {
        "host"
    }

    fn available(&self) -> bool {
        let works = |program: &str, arg: &str| {
            Command::new(program)
                .arg(arg)
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        };
        works("ip", "-V") && works(&self.engine, "--version")
    }

    fn run(&self, command: &HostCommand) -> Result<CommandOutput, CommandError> {
        let argv = self.argv(command);
        debug!("{command}");
        trace!("exec: {}", argv.join(" "));

        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .output()
            .map_err(|source| CommandError::Spawn {
                command: argv[0].clone(),
                source,
            })?;

        let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if matches!(command, HostCommand::InstanceLogs { .. }) {
            // The engine replays the instance's stderr on its own stderr.
            stdout.push_str(&stderr);
        }
        classify(
            command,
            output.status.success(),
            output.status.code(),
            stdout,
            stderr,
        )
    }
}
