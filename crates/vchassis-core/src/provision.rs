use crate::concurrency::shutdown_requested;
use crate::context::{TopologyContext, CONTROL_INTERFACE, INBAND_INTERFACE};
use crate::poll::{poll, PollingConfig};
use crate::report::{ProvisionReport, RunningInstance, StepOutcome};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vchassis_runtime::{
    CommandError, CommandOutput, CommandRunner, HostCommand, ResourceHandle, ResourceKind,
    ResourceState,
};
use vchassis_schema::{parse_port_index, InstanceSpec, InterfacePair, TopologySpec, WiringArtifact};

pub const DEFAULT_LINK_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_LINK_POLL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepKind {
    /// Brings a resource into existence; `AlreadyExists` is success.
    Create,
    /// Changes link state or membership.
    Configure,
    /// Moves or renames a link; `Absent` means an earlier run already did it.
    Relocate,
    /// Takes a resource down before removal; `Absent` is success.
    Quiesce,
    Destroy,
}

fn outcome_of(kind: StepKind, result: Result<CommandOutput, CommandError>) -> StepOutcome {
    match (kind, result) {
        (StepKind::Create, Ok(_)) => StepOutcome::Created,
        (StepKind::Destroy, Ok(_)) => StepOutcome::Removed,
        (_, Ok(_)) => StepOutcome::Applied,
        (StepKind::Create, Err(CommandError::AlreadyExists(_)))
        | (StepKind::Relocate, Err(CommandError::Absent(_) | CommandError::AlreadyExists(_))) => {
            StepOutcome::AlreadyPresent
        }
        (StepKind::Quiesce | StepKind::Destroy, Err(CommandError::Absent(_))) => {
            StepOutcome::AlreadyAbsent
        }
        (_, Err(e)) => StepOutcome::Failed {
            reason: e.to_string(),
        },
    }
}

/// Builds and tears down topologies through an injected `CommandRunner`.
///
/// Both directions run a fixed sequence of idempotent steps. A failing step
/// is logged, recorded as `StepOutcome::Failed` and the sequence continues,
/// so running `create` again against a partially built topology converges
/// it. Neither direction returns an error; inspect the report instead.
pub struct Provisioner {
    runner: Arc<dyn CommandRunner>,
    link_polling: PollingConfig,
    stop_requested: fn() -> bool,
}

impl Provisioner {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            link_polling: PollingConfig::new(
                DEFAULT_LINK_POLL_INTERVAL,
                DEFAULT_LINK_POLL_TIMEOUT,
                true,
            ),
            stop_requested: shutdown_requested,
        }
    }

    /// Polling used while waiting for the inband link to come up.
    #[must_use]
    pub fn with_link_polling(mut self, polling: PollingConfig) -> Self {
        self.link_polling = polling;
        self
    }

    /// Replace the check consulted between instances and edges.
    #[must_use]
    pub fn with_stop_check(mut self, check: fn() -> bool) -> Self {
        self.stop_requested = check;
        self
    }

    pub fn create(&self, ctx: &TopologyContext, spec: &TopologySpec) -> ProvisionReport {
        let mut run = Run::new(self, ctx);
        run.create(spec);
        run.report
    }

    pub fn delete(&self, ctx: &TopologyContext, spec: &TopologySpec) -> ProvisionReport {
        let mut run = Run::new(self, ctx);
        run.delete(spec);
        run.report
    }
}

struct Run<'a> {
    runner: &'a dyn CommandRunner,
    ctx: &'a TopologyContext,
    link_polling: PollingConfig,
    stop_requested: fn() -> bool,
    report: ProvisionReport,
}

impl<'a> Run<'a> {
    fn new(provisioner: &'a Provisioner, ctx: &'a TopologyContext) -> Self {
        Self {
            runner: provisioner.runner.as_ref(),
            ctx,
            link_polling: provisioner.link_polling,
            stop_requested: provisioner.stop_requested,
            report: ProvisionReport::new(ctx.name()),
        }
    }

    fn ns(&self) -> String {
        self.ctx.namespace().to_owned()
    }

    fn handle(&self, kind: ResourceKind, name: &str) -> ResourceHandle {
        let owner = match kind {
            ResourceKind::Bridge | ResourceKind::IfPair => Some(self.ctx.namespace()),
            ResourceKind::Namespace | ResourceKind::Instance => None,
        };
        ResourceHandle::new(kind, name, owner)
    }

    /// Run one command and record its outcome. Returns whether the resource
    /// is now in the state the step aimed for.
    fn step(&mut self, command: &HostCommand, kind: StepKind, resource: Option<ResourceHandle>) -> bool {
        let outcome = outcome_of(kind, self.runner.run(command));
        let ok = !outcome.is_failed();
        match &outcome {
            StepOutcome::Failed { reason } => warn!("{command}: {reason}"),
            other => debug!("{command}: {other}"),
        }
        let resource = resource.map(|handle| {
            let state = match (kind, ok) {
                (StepKind::Destroy, true) => ResourceState::Absent,
                (StepKind::Destroy, false) => ResourceState::Destroying,
                (_, true) => ResourceState::Present,
                (_, false) => ResourceState::Creating,
            };
            handle.with_state(state)
        });
        self.report.record(command.to_string(), resource, outcome);
        ok
    }

    fn fail(&mut self, step: String, reason: String) {
        warn!("{step}: {reason}");
        self.report
            .record(step, None, StepOutcome::Failed { reason });
    }

    fn interrupted(&mut self) -> bool {
        if (self.stop_requested)() {
            warn!("shutdown requested, stopping '{}' early", self.ctx.name());
            self.report.interrupted = true;
            return true;
        }
        false
    }

    fn mark_ready(&mut self, instance: &str, ifname: &str, bridge: Option<String>) {
        if let Some(running) = self.report.instances.get_mut(instance) {
            let slot = running
                .ready_interfaces
                .entry(ifname.to_owned())
                .or_insert(None);
            if bridge.is_some() {
                *slot = bridge;
            }
        }
    }

    fn create(&mut self, spec: &TopologySpec) {
        let ns = self.ns();
        let shared = self.ctx.shared_bridge();
        info!("creating topology '{}' in {ns}", self.ctx.name());

        self.step(
            &HostCommand::AddNamespace {
                namespace: ns.clone(),
            },
            StepKind::Create,
            Some(self.handle(ResourceKind::Namespace, &ns)),
        );
        self.step(
            &HostCommand::AddBridge {
                namespace: ns.clone(),
                bridge: shared.to_owned(),
            },
            StepKind::Create,
            Some(self.handle(ResourceKind::Bridge, shared)),
        );
        self.step(
            &HostCommand::SetLinkState {
                namespace: ns.clone(),
                link: shared.to_owned(),
                up: true,
            },
            StepKind::Configure,
            None,
        );

        let required: BTreeMap<String, BTreeSet<String>> = spec
            .all_instances()
            .map(|inst| (inst.id.clone(), self.ctx.required_interfaces(spec, inst)))
            .collect();

        info!("starting {} instances", required.len());
        for inst in spec.all_instances() {
            if self.interrupted() {
                return;
            }
            self.start_instance(inst);
        }

        for inst in spec.all_instances() {
            if self.interrupted() {
                return;
            }
            if !self.report.instances.contains_key(&inst.id) {
                warn!("instance '{}' is not running, skipping its interfaces", inst.id);
                continue;
            }
            info!("wiring instance '{}'", inst.id);
            self.wire_control(inst);
            self.reserve_pool(inst);
            if inst.config.has_inband() {
                self.wire_inband(inst);
            }
        }

        for (edge, members) in &spec.neighbor_connections {
            if self.interrupted() {
                return;
            }
            self.wire_edge(edge, members);
        }

        for inst in spec.all_instances() {
            if let Some(required) = required.get(&inst.id) {
                self.write_wiring(spec, inst, required);
            }
        }
    }

    fn start_instance(&mut self, inst: &InstanceSpec) {
        let launch = self.ctx.launch(inst);
        let name = launch.name.clone();
        let handle = Some(self.handle(ResourceKind::Instance, &name));
        if self.step(&HostCommand::StartInstance(launch), StepKind::Create, handle) {
            self.report
                .instances
                .entry(inst.id.clone())
                .or_insert_with(|| RunningInstance {
                    instance_id: inst.id.clone(),
                    process_handle: name,
                    ready_interfaces: BTreeMap::new(),
                });
        }
    }

    /// Create a pair in the namespace and return whether it exists.
    fn add_pair(&mut self, host: &str, peer: &str) -> bool {
        let handle = Some(self.handle(ResourceKind::IfPair, host));
        self.step(
            &HostCommand::AddVethPair {
                namespace: self.ns(),
                local: host.to_owned(),
                peer: peer.to_owned(),
            },
            StepKind::Create,
            handle,
        )
    }

    fn attach(&mut self, link: &str, bridge: &str) -> bool {
        self.step(
            &HostCommand::AttachToBridge {
                namespace: self.ns(),
                link: link.to_owned(),
                bridge: bridge.to_owned(),
            },
            StepKind::Configure,
            None,
        )
    }

    fn host_link_up(&mut self, link: &str) -> bool {
        self.step(
            &HostCommand::SetLinkState {
                namespace: self.ns(),
                link: link.to_owned(),
                up: true,
            },
            StepKind::Configure,
            None,
        )
    }

    fn instance_link_up(&mut self, container: &str, link: &str) -> bool {
        self.step(
            &HostCommand::SetInstanceLinkState {
                instance: container.to_owned(),
                link: link.to_owned(),
                up: true,
            },
            StepKind::Configure,
            None,
        )
    }

    /// Move `link` into the instance and give it its final name.
    fn move_into(&mut self, container: &str, link: &str, new_name: &str) -> bool {
        let moved = self.step(
            &HostCommand::MoveToInstance {
                namespace: self.ns(),
                link: link.to_owned(),
                instance: container.to_owned(),
            },
            StepKind::Relocate,
            None,
        );
        let renamed = self.step(
            &HostCommand::RenameInInstance {
                instance: container.to_owned(),
                link: link.to_owned(),
                new_name: new_name.to_owned(),
            },
            StepKind::Relocate,
            None,
        );
        moved && renamed
    }

    fn wire_control(&mut self, inst: &InstanceSpec) {
        let container = self.ctx.instance_name(&inst.id);
        let shared = self.ctx.shared_bridge();
        let (host, peer) = self.ctx.control_pair(&inst.id);

        let mut ok = self.add_pair(&host, &peer);
        ok &= self.attach(&host, shared);
        ok &= self.host_link_up(&host);
        ok &= self.move_into(&container, &peer, CONTROL_INTERFACE);
        ok &= self.instance_link_up(&container, CONTROL_INTERFACE);
        if ok {
            self.mark_ready(&inst.id, CONTROL_INTERFACE, Some(shared.to_owned()));
        }
    }

    fn reserve_pool(&mut self, inst: &InstanceSpec) {
        let container = self.ctx.instance_name(&inst.id);
        for index in 1..=self.ctx.port_count() {
            let (host, peer) = self.ctx.pool_pair(&inst.id, index);
            let ifname = format!("eth{index}");

            let mut ok = self.add_pair(&host, &peer);
            ok &= self.move_into(&container, &peer, &ifname);
            ok &= self.instance_link_up(&container, &ifname);
            ok &= self.host_link_up(&host);
            if ok {
                self.mark_ready(&inst.id, &ifname, None);
            }
        }
        debug!(
            "reserved {} ports for '{}'",
            self.ctx.port_count(),
            inst.id
        );
    }

    fn wire_inband(&mut self, inst: &InstanceSpec) {
        let container = self.ctx.instance_name(&inst.id);
        let shared = self.ctx.shared_bridge();
        let (host, peer) = self.ctx.inband_pair(&inst.id);

        let mut ok = self.add_pair(&host, &peer);
        ok &= self.attach(&host, shared);
        ok &= self.host_link_up(&host);
        ok &= self.move_into(&container, &peer, INBAND_INTERFACE);
        ok &= self.instance_link_up(&container, INBAND_INTERFACE);
        ok &= self.wait_link_up(&container, INBAND_INTERFACE);
        if ok {
            self.mark_ready(&inst.id, INBAND_INTERFACE, Some(shared.to_owned()));
        }
    }

    /// Poll the instance's view of `link` until it is operationally up. The
    /// instance may not see a freshly moved link yet, so every failed
    /// attempt issues the bring-up command again.
    fn wait_link_up(&mut self, container: &str, link: &str) -> bool {
        let read = HostCommand::InstanceLinkState {
            instance: container.to_owned(),
            link: link.to_owned(),
        };
        let bring_up = HostCommand::SetInstanceLinkState {
            instance: container.to_owned(),
            link: link.to_owned(),
            up: true,
        };
        let runner = self.runner;
        let reissue = || {
            if let Err(e) = runner.run(&bring_up) {
                debug!("{bring_up}: {e}");
            }
        };

        let result = poll(&self.link_polling, || match runner.run(&read) {
            Ok(out) => {
                let state = out.stdout.trim().to_owned();
                if state == "up" {
                    return Ok((true, state));
                }
                reissue();
                Ok((false, state))
            }
            Err(CommandError::Absent(_)) => {
                reissue();
                Ok((false, "absent".to_owned()))
            }
            Err(e) => Err(e),
        });

        let step = format!("wait for {link} up in {container}");
        match result {
            Ok(polled) if polled.converged => {
                debug!("{step}: up after {} attempts", polled.attempts);
                self.report.record(step, None, StepOutcome::Applied);
                true
            }
            Ok(polled) => {
                self.fail(
                    step,
                    format!("still {} after {:?}", polled.value, polled.elapsed),
                );
                false
            }
            Err(e) => {
                self.fail(step, e.to_string());
                false
            }
        }
    }

    fn wire_edge(&mut self, edge: &str, members: &BTreeMap<String, String>) {
        let ns = self.ns();
        let bridge = self.ctx.edge_bridge(edge);
        info!("wiring edge '{edge}' on {bridge}");

        let handle = Some(self.handle(ResourceKind::Bridge, &bridge));
        self.step(
            &HostCommand::AddBridge {
                namespace: ns.clone(),
                bridge: bridge.clone(),
            },
            StepKind::Create,
            handle,
        );
        self.host_link_up(&bridge);

        for (id, ifname) in members {
            let step = format!("attach {ifname} of '{id}' to {bridge}");
            let Some(index) = parse_port_index(ifname) else {
                self.fail(step, "not a reserved port interface".to_owned());
                continue;
            };
            let assigned = self
                .report
                .instances
                .get(id)
                .and_then(|running| running.ready_interfaces.get(ifname))
                .cloned();
            match assigned {
                None => self.fail(step, "interface is not ready".to_owned()),
                Some(Some(other)) if other != bridge => {
                    self.fail(step, format!("interface is already attached to {other}"));
                }
                Some(_) => {
                    let (host, _) = self.ctx.pool_pair(id, index);
                    if self.attach(&host, &bridge) {
                        self.mark_ready(id, ifname, Some(bridge.clone()));
                    }
                }
            }
        }
    }

    fn write_wiring(&mut self, spec: &TopologySpec, inst: &InstanceSpec, required: &BTreeSet<String>) {
        let container = self.ctx.instance_name(&inst.id);
        let Some(running) = self.report.instances.get(&inst.id) else {
            return;
        };
        let missing: Vec<String> = required
            .iter()
            .filter(|ifname| !running.ready_interfaces.contains_key(*ifname))
            .cloned()
            .collect();
        for ifname in missing {
            self.fail(
                format!("provide {ifname} in {container}"),
                "interface was not wired".to_owned(),
            );
        }

        let artifact = WiringArtifact {
            topology: self.ctx.name().to_owned(),
            namespace: self.ns(),
            shared_bridge: self.ctx.shared_bridge().to_owned(),
            instance: container,
            control_interface: CONTROL_INTERFACE.to_owned(),
            inband_pair: inst.config.has_inband().then(|| {
                let (host, _) = self.ctx.inband_pair(&inst.id);
                InterfacePair {
                    host,
                    instance: INBAND_INTERFACE.to_owned(),
                }
            }),
            neighbor_bridges: spec
                .edges_for(&inst.id)
                .map(|(edge, ifname)| (ifname.to_owned(), self.ctx.edge_bridge(edge)))
                .collect(),
            interfaces: required.clone(),
            generated_at: chrono::Utc::now().to_rfc3339(),
        };

        let step = format!("write {}", WiringArtifact::path_in(&inst.dir).display());
        match artifact.write_to_dir(&inst.dir) {
            Ok(_) => {
                debug!("{step}");
                self.report.record(step, None, StepOutcome::Applied);
            }
            Err(e) => self.fail(step, e.to_string()),
        }
    }

    fn delete(&mut self, spec: &TopologySpec) {
        let ns = self.ns();
        let shared = self.ctx.shared_bridge();
        info!("deleting topology '{}' from {ns}", self.ctx.name());

        // Stopping an instance destroys the interface ends inside it and,
        // with them, their peers in the namespace.
        for inst in spec.all_instances() {
            if self.interrupted() {
                return;
            }
            let container = self.ctx.instance_name(&inst.id);
            let handle = Some(self.handle(ResourceKind::Instance, &container));
            self.step(
                &HostCommand::StopInstance {
                    instance: container,
                },
                StepKind::Destroy,
                handle,
            );

            let step = format!("remove {}", WiringArtifact::path_in(&inst.dir).display());
            match WiringArtifact::remove_from_dir(&inst.dir) {
                Ok(true) => self.report.record(step, None, StepOutcome::Removed),
                Ok(false) => self.report.record(step, None, StepOutcome::AlreadyAbsent),
                Err(e) => self.fail(step, e.to_string()),
            }
        }

        for edge in spec.neighbor_connections.keys() {
            if self.interrupted() {
                return;
            }
            let bridge = self.ctx.edge_bridge(edge);
            self.remove_bridge(&bridge);
        }

        self.remove_bridge(shared);
        let handle = Some(self.handle(ResourceKind::Namespace, &ns));
        self.step(
            &HostCommand::DeleteNamespace { namespace: ns },
            StepKind::Destroy,
            handle,
        );
    }

    /// Bridges must be administratively down before they can be deleted.
    fn remove_bridge(&mut self, bridge: &str) {
        self.step(
            &HostCommand::SetLinkState {
                namespace: self.ns(),
                link: bridge.to_owned(),
                up: false,
            },
            StepKind::Quiesce,
            None,
        );
        let handle = Some(self.handle(ResourceKind::Bridge, bridge));
        self.step(
            &HostCommand::DeleteBridge {
                namespace: self.ns(),
                bridge: bridge.to_owned(),
            },
            StepKind::Destroy,
            handle,
        );
    }
}
