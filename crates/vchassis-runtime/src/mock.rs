use crate::command::{CommandError, CommandOutput, HostCommand, InstanceLaunch};
use crate::resource::{ResourceHandle, ResourceKind, ResourceState};
use crate::runner::CommandRunner;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Location {
    Namespace(String),
    Instance(String),
}

type LinkRef = (Location, String);

#[derive(Debug, Clone)]
struct Link {
    peer: LinkRef,
    up: bool,
    master: Option<String>,
}

#[derive(Debug, Default)]
struct Model {
    namespaces: BTreeSet<String>,
    /// (namespace, bridge) -> administratively up
    bridges: BTreeMap<(String, String), bool>,
    links: BTreeMap<LinkRef, Link>,
    instances: BTreeMap<String, InstanceLaunch>,
    logs: HashMap<String, String>,
    exec_scripts: HashMap<(String, Vec<String>), Result<String, String>>,
    /// (instance, link) -> bring-up commands still to be ignored
    link_up_delays: HashMap<(String, String), u32>,
    /// command -> remaining injected failures (`None` = always)
    failures: Vec<(HostCommand, Option<u32>)>,
    history: Vec<HostCommand>,
}

/// In-memory host used by tests and the `mock` runner.
///
/// Follows the Linux behaviours provisioning relies on: deleting either end
/// of a veth pair deletes its peer, removing an instance destroys the links
/// inside it, a bridge must be down before it can be deleted, and deleting a
/// namespace destroys everything in it. Moving a link into an instance
/// detaches it from its bridge and brings it down.
#[derive(Default)]
pub struct SimulatedHost {
    model: Mutex<Model>,
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Model> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Script the result of `argv` executed inside `instance`.
    /// `Ok` is stdout, `Err` is stderr of a failing run.
    pub fn script_exec(&self, instance: &str, argv: &[&str], result: Result<&str, &str>) {
        let key = (
            instance.to_owned(),
            argv.iter().map(|s| (*s).to_owned()).collect(),
        );
        let value = result.map(str::to_owned).map_err(str::to_owned);
        self.lock().exec_scripts.insert(key, value);
    }

    pub fn set_logs(&self, instance: &str, logs: &str) {
        self.lock().logs.insert(instance.to_owned(), logs.to_owned());
    }

    /// Ignore the first `attempts` bring-up commands for `link` inside
    /// `instance`, as if the instance could not see the link yet.
    pub fn delay_link_up(&self, instance: &str, link: &str, attempts: u32) {
        self.lock()
            .link_up_delays
            .insert((instance.to_owned(), link.to_owned()), attempts);
    }

    pub fn fail_once(&self, command: HostCommand) {
        self.lock().failures.push((command, Some(1)));
    }

    pub fn fail_always(&self, command: HostCommand) {
        self.lock().failures.push((command, None));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Every command received, in order, including failed ones.
    pub fn history(&self) -> Vec<HostCommand> {
        self.lock().history.clone()
    }

    pub fn running_instances(&self) -> Vec<String> {
        self.lock().instances.keys().cloned().collect()
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.lock().namespaces.contains(namespace)
    }

    pub fn has_bridge(&self, namespace: &str, bridge: &str) -> bool {
        self.lock()
            .bridges
            .contains_key(&(namespace.to_owned(), bridge.to_owned()))
    }

    /// Namespace-side links enslaved to `bridge`, sorted.
    pub fn bridge_members(&self, namespace: &str, bridge: &str) -> Vec<String> {
        self.lock()
            .links
            .iter()
            .filter(|((loc, _), link)| {
                *loc == Location::Namespace(namespace.to_owned())
                    && link.master.as_deref() == Some(bridge)
            })
            .map(|((_, name), _)| name.clone())
            .collect()
    }

    /// Link names inside `instance`, sorted.
    pub fn instance_links(&self, instance: &str) -> Vec<String> {
        self.lock()
            .links
            .keys()
            .filter(|(loc, _)| *loc == Location::Instance(instance.to_owned()))
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Administrative state of a link inside `instance`.
    pub fn instance_link_up(&self, instance: &str, link: &str) -> Option<bool> {
        self.lock()
            .links
            .get(&(Location::Instance(instance.to_owned()), link.to_owned()))
            .map(|l| l.up)
    }

    /// Present resources. Interface pairs are reported once, under the end
    /// that lives in a namespace.
    pub fn resources(&self) -> BTreeSet<ResourceHandle> {
        let model = self.lock();
        let mut out = BTreeSet::new();
        for ns in &model.namespaces {
            out.insert(present(ResourceKind::Namespace, ns, None));
        }
        for (ns, bridge) in model.bridges.keys() {
            out.insert(present(ResourceKind::Bridge, bridge, Some(ns)));
        }
        for ((loc, name), link) in &model.links {
            let Location::Namespace(ns) = loc else {
                continue;
            };
            let canonical = match &link.peer.0 {
                Location::Instance(_) => true,
                Location::Namespace(_) => (loc, name) < (&link.peer.0, &link.peer.1),
            };
            if canonical {
                out.insert(present(ResourceKind::IfPair, name, Some(ns)));
            }
        }
        for name in model.instances.keys() {
            out.insert(present(ResourceKind::Instance, name, None));
        }
        out
    }
}

fn present(kind: ResourceKind, name: &str, ns: Option<&str>) -> ResourceHandle {
    ResourceHandle::new(kind, name, ns).with_state(ResourceState::Present)
}

impl Model {
    fn take_injected_failure(&mut self, command: &HostCommand) -> bool {
        let Some(pos) = self.failures.iter().position(|(c, _)| c == command) else {
            return false;
        };
        if let Some(remaining) = &mut self.failures[pos].1 {
            *remaining -= 1;
            if *remaining == 0 {
                self.failures.remove(pos);
            }
        }
        true
    }

    fn require_namespace(&self, command: &HostCommand, ns: &str) -> Result<(), CommandError> {
        if self.namespaces.contains(ns) {
            Ok(())
        } else {
            Err(CommandError::Absent(command.to_string()))
        }
    }

    fn require_instance(&self, command: &HostCommand, instance: &str) -> Result<(), CommandError> {
        if self.instances.contains_key(instance) {
            Ok(())
        } else {
            Err(CommandError::Absent(command.to_string()))
        }
    }

    fn name_taken(&self, ns: &str, name: &str) -> bool {
        self.bridges.contains_key(&(ns.to_owned(), name.to_owned()))
            || self
                .links
                .contains_key(&(Location::Namespace(ns.to_owned()), name.to_owned()))
    }

    /// Remove a link and its veth peer.
    fn remove_pair(&mut self, at: &LinkRef) {
        if let Some(link) = self.links.remove(at) {
            self.links.remove(&link.peer);
        }
    }

    /// Re-key a link, keeping its peer's back-reference intact.
    fn relocate(&mut self, from: &LinkRef, to: LinkRef) {
        if let Some(link) = self.links.remove(from) {
            if let Some(peer) = self.links.get_mut(&link.peer) {
                peer.peer = to.clone();
            }
            self.links.insert(to, link);
        }
    }

    fn oper_up(&self, at: &LinkRef) -> bool {
        self.links.get(at).is_some_and(|link| {
            link.up && self.links.get(&link.peer).is_some_and(|peer| peer.up)
        })
    }

    #[allow(clippy::too_many_lines)]
    fn apply(&mut self, command: &HostCommand) -> Result<CommandOutput, CommandError> {
        let absent = || CommandError::Absent(command.to_string());
        let exists = || CommandError::AlreadyExists(command.to_string());

        match command {
            HostCommand::AddNamespace { namespace } => {
                if !self.namespaces.insert(namespace.clone()) {
                    return Err(exists());
                }
            }
            HostCommand::DeleteNamespace { namespace } => {
                if !self.namespaces.remove(namespace) {
                    return Err(absent());
                }
                self.bridges.retain(|(ns, _), _| ns != namespace);
                let inside: Vec<LinkRef> = self
                    .links
                    .keys()
                    .filter(|(loc, _)| *loc == Location::Namespace(namespace.clone()))
                    .cloned()
                    .collect();
                for at in inside {
                    self.remove_pair(&at);
                }
            }
            HostCommand::AddBridge { namespace, bridge } => {
                self.require_namespace(command, namespace)?;
                if self.name_taken(namespace, bridge) {
                    return Err(exists());
                }
                self.bridges.insert((namespace.clone(), bridge.clone()), false);
            }
            HostCommand::DeleteBridge { namespace, bridge } => {
                let key = (namespace.clone(), bridge.clone());
                match self.bridges.get(&key) {
                    None => return Err(absent()),
                    Some(true) => {
                        return Err(CommandError::failed(
                            command,
                            "bridge is administratively up",
                        ))
                    }
                    Some(false) => {}
                }
                self.bridges.remove(&key);
                for ((loc, _), link) in &mut self.links {
                    if *loc == Location::Namespace(namespace.clone())
                        && link.master.as_deref() == Some(bridge.as_str())
                    {
                        link.master = None;
                    }
                }
            }
            HostCommand::SetLinkState {
                namespace,
                link,
                up,
            } => {
                let bridge_key = (namespace.clone(), link.clone());
                if let Some(state) = self.bridges.get_mut(&bridge_key) {
                    *state = *up;
                } else if let Some(l) = self
                    .links
                    .get_mut(&(Location::Namespace(namespace.clone()), link.clone()))
                {
                    l.up = *up;
                } else {
                    return Err(absent());
                }
            }
            HostCommand::AddVethPair {
                namespace,
                local,
                peer,
            } => {
                self.require_namespace(command, namespace)?;
                if self.name_taken(namespace, local) || self.name_taken(namespace, peer) {
                    return Err(exists());
                }
                let a = (Location::Namespace(namespace.clone()), local.clone());
                let b = (Location::Namespace(namespace.clone()), peer.clone());
                self.links.insert(
                    a.clone(),
                    Link {
                        peer: b.clone(),
                        up: false,
                        master: None,
                    },
                );
                self.links.insert(
                    b,
                    Link {
                        peer: a,
                        up: false,
                        master: None,
                    },
                );
            }
            HostCommand::AttachToBridge {
                namespace,
                link,
                bridge,
            } => {
                if !self
                    .bridges
                    .contains_key(&(namespace.clone(), bridge.clone()))
                {
                    return Err(absent());
                }
                let l = self
                    .links
                    .get_mut(&(Location::Namespace(namespace.clone()), link.clone()))
                    .ok_or_else(absent)?;
                l.master = Some(bridge.clone());
            }
            HostCommand::MoveToInstance {
                namespace,
                link,
                instance,
            } => {
                self.require_instance(command, instance)?;
                let from = (Location::Namespace(namespace.clone()), link.clone());
                if !self.links.contains_key(&from) {
                    return Err(absent());
                }
                let to = (Location::Instance(instance.clone()), link.clone());
                if self.links.contains_key(&to) {
                    return Err(exists());
                }
                self.relocate(&from, to.clone());
                if let Some(l) = self.links.get_mut(&to) {
                    l.up = false;
                    l.master = None;
                }
            }
            HostCommand::RenameInInstance {
                instance,
                link,
                new_name,
            } => {
                self.require_instance(command, instance)?;
                let from = (Location::Instance(instance.clone()), link.clone());
                if !self.links.contains_key(&from) {
                    return Err(absent());
                }
                let to = (Location::Instance(instance.clone()), new_name.clone());
                if self.links.contains_key(&to) {
                    return Err(exists());
                }
                self.relocate(&from, to);
            }
            HostCommand::SetInstanceLinkState { instance, link, up } => {
                self.require_instance(command, instance)?;
                let at = (Location::Instance(instance.clone()), link.clone());
                if !self.links.contains_key(&at) {
                    return Err(absent());
                }
                if *up {
                    if let Some(remaining) = self
                        .link_up_delays
                        .get_mut(&(instance.clone(), link.clone()))
                    {
                        if *remaining > 0 {
                            *remaining -= 1;
                            return Ok(CommandOutput::default());
                        }
                    }
                }
                if let Some(l) = self.links.get_mut(&at) {
                    l.up = *up;
                }
            }
            HostCommand::InstanceLinkState { instance, link } => {
                self.require_instance(command, instance)?;
                let at = (Location::Instance(instance.clone()), link.clone());
                if !self.links.contains_key(&at) {
                    return Err(absent());
                }
                let state = if self.oper_up(&at) { "up" } else { "down" };
                return Ok(CommandOutput::stdout(format!("{state}\n")));
            }
            HostCommand::StartInstance(launch) => {
                if self.instances.contains_key(&launch.name) {
                    return Err(exists());
                }
                self.instances.insert(launch.name.clone(), launch.clone());
            }
            HostCommand::StopInstance { instance } => {
                if self.instances.remove(instance).is_none() {
                    return Err(absent());
                }
                let inside: Vec<LinkRef> = self
                    .links
                    .keys()
                    .filter(|(loc, _)| *loc == Location::Instance(instance.clone()))
                    .cloned()
                    .collect();
                for at in inside {
                    self.remove_pair(&at);
                }
            }
            HostCommand::InstanceExec { instance, argv } => {
                self.require_instance(command, instance)?;
                return match self.exec_scripts.get(&(instance.clone(), argv.clone())) {
                    Some(Ok(stdout)) => Ok(CommandOutput::stdout(stdout.clone())),
                    Some(Err(stderr)) => Err(CommandError::Failed {
                        command: command.to_string(),
                        code: Some(1),
                        stderr: stderr.clone(),
                    }),
                    None => Err(CommandError::Failed {
                        command: command.to_string(),
                        code: Some(127),
                        stderr: format!("{}: command not scripted", argv.join(" ")),
                    }),
                };
            }
            HostCommand::InstanceLogs { instance } => {
                self.require_instance(command, instance)?;
                let logs = self.logs.get(instance).cloned().unwrap_or_default();
                return Ok(CommandOutput::stdout(logs));
            }
        }
        Ok(CommandOutput::default())
    }
}

impl CommandRunner for SimulatedHost {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn run(&self, command: &HostCommand) -> Result<CommandOutput, CommandError> {
        let mut model = self.lock();
        model.history.push(command.clone());
        if model.take_injected_failure(command) {
            return Err(CommandError::failed(command, "injected failure"));
        }
        model.apply(command)
    }
}
