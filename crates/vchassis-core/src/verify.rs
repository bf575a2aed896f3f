use crate::config::Settings;
use crate::context::TopologyContext;
use crate::poll::PollingConfig;
use crate::state::{ConvergenceAssertions, Database, KeyedStateView, RedisCliConnector};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use vchassis_runtime::{CommandRunner, HostCommand};
use vchassis_schema::{InstanceRole, TopologySpec};

/// Chassis-wide table every line card publishes its ports into.
pub const SYSTEM_INTERFACE_TABLE: &str = "SYSTEM_INTERFACE";
pub const CRASH_SIGNATURES: &[&str] = &["Segmentation fault", "core dumped", "terminate called"];
pub const DEFAULT_PROBE_COUNT: u32 = 5;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    PortKeys,
    Reachability,
    CrashScan,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckKind::PortKeys => write!(f, "port keys"),
            CheckKind::Reachability => write!(f, "reachability"),
            CheckKind::CrashScan => write!(f, "crash scan"),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckResult {
    pub kind: CheckKind,
    /// Instance or edge the check is about.
    pub subject: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct VerificationReport {
    pub topology: String,
    pub checks: Vec<CheckResult>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    fn push(&mut self, kind: CheckKind, subject: String, passed: bool, detail: String) {
        debug!(
            "{kind} {subject}: {} ({detail})",
            if passed { "pass" } else { "fail" }
        );
        self.checks.push(CheckResult {
            kind,
            subject,
            passed,
            detail,
        });
    }
}

/// `(transmitted, received)` from a ping summary line, accepting both
/// `5 received` and `5 packets received`.
fn parse_ping_summary(output: &str) -> Option<(u32, u32)> {
    let line = output
        .lines()
        .find(|l| l.contains("packets transmitted"))?;
    let mut parts = line.split(',');
    let first_number = |part: &str| -> Option<u32> { part.split_whitespace().next()?.parse().ok() };
    let transmitted = first_number(parts.next()?)?;
    let received = first_number(parts.next()?)?;
    Some((transmitted, received))
}

/// Read-only health checks of a provisioned topology.
///
/// Every check runs regardless of earlier failures, and only non-mutating
/// commands are issued. The port-key check waits for the chassis table to
/// settle using the polling config, always leniently: a table that never
/// reaches the expected size is a failed check, not an error.
pub struct Verifier {
    runner: Arc<dyn CommandRunner>,
    probe_count: u32,
    polling: PollingConfig,
}

impl Verifier {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            probe_count: DEFAULT_PROBE_COUNT,
            polling: PollingConfig::default(),
        }
    }

    /// Probe count and state polling taken from the settings file.
    pub fn from_settings(runner: Arc<dyn CommandRunner>, settings: &Settings) -> Self {
        Self::new(runner)
            .with_probe_count(settings.probe_count)
            .with_polling(settings.polling.to_config())
    }

    #[must_use]
    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    #[must_use]
    pub fn with_probe_count(mut self, probe_count: u32) -> Self {
        self.probe_count = probe_count;
        self
    }

    pub fn verify(&self, ctx: &TopologyContext, spec: &TopologySpec) -> VerificationReport {
        info!("verifying topology '{}'", ctx.name());
        let mut report = VerificationReport {
            topology: ctx.name().to_owned(),
            checks: Vec::new(),
        };

        let expected_keys = spec.chassis_port_total();
        for inst in &spec.instances {
            self.check_port_keys(ctx, &inst.id, expected_keys, &mut report);
        }
        for (edge, members) in &spec.neighbor_connections {
            self.check_reachability(ctx, spec, edge, members, &mut report);
        }
        for inst in spec.all_instances() {
            self.check_crashes(ctx, &inst.id, &mut report);
        }
        report
    }

    fn check_port_keys(
        &self,
        ctx: &TopologyContext,
        instance: &str,
        expected: usize,
        report: &mut VerificationReport,
    ) {
        let container = ctx.instance_name(instance);
        let connector = Arc::new(RedisCliConnector::new(self.runner.clone(), &container));
        let view = KeyedStateView::new(connector, Database::CHASSIS_APP, SYSTEM_INTERFACE_TABLE);
        let waits = ConvergenceAssertions::new(view).with_polling(self.polling.lenient());
        let (passed, detail) = match waits.wait_for_n_keys(expected) {
            Ok(polled) if polled.converged => (true, format!("{expected} keys")),
            Ok(polled) => (
                false,
                format!(
                    "expected {expected} keys, found {} after {} reads",
                    polled.value.len(),
                    polled.attempts
                ),
            ),
            Err(e) => (false, e.to_string()),
        };
        report.push(CheckKind::PortKeys, instance.to_owned(), passed, detail);
    }

    fn check_reachability(
        &self,
        ctx: &TopologyContext,
        spec: &TopologySpec,
        edge: &str,
        members: &BTreeMap<String, String>,
        report: &mut VerificationReport,
    ) {
        let participants: Vec<(&String, &String)> = members.iter().collect();
        if participants.len() != 2 {
            report.push(
                CheckKind::Reachability,
                edge.to_owned(),
                false,
                format!("edge has {} participants", participants.len()),
            );
            return;
        }

        // Probe the neighbor from the chassis side; between two chassis
        // instances, probe the second in id order.
        let target = participants
            .iter()
            .position(|(id, _)| {
                spec.instance(id)
                    .is_some_and(|i| i.role == InstanceRole::Neighbor)
            })
            .unwrap_or(1);
        let (target_id, target_if) = participants[target];
        let (source_id, _) = participants[1 - target];

        let Some(address) = spec
            .instance(target_id)
            .and_then(|i| i.config.address_of(target_if))
        else {
            report.push(
                CheckKind::Reachability,
                edge.to_owned(),
                false,
                format!("no address configured for {target_if} on '{target_id}'"),
            );
            return;
        };

        let count = self.probe_count.to_string();
        let probe = HostCommand::InstanceExec {
            instance: ctx.instance_name(source_id),
            argv: ["ping", "-c", count.as_str(), "-W", "1", "-q", address]
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        };
        let (passed, detail) = match self.runner.run(&probe) {
            Ok(out) => match parse_ping_summary(&out.stdout) {
                Some((sent, received)) => (
                    sent == self.probe_count && received == self.probe_count,
                    format!("{source_id} -> {target_id} {address}: {received}/{sent} replies"),
                ),
                None => (false, format!("unrecognised ping output: {}", out.stdout.trim())),
            },
            Err(e) => (false, format!("{source_id} -> {target_id} {address}: {e}")),
        };
        report.push(CheckKind::Reachability, edge.to_owned(), passed, detail);
    }

    fn check_crashes(&self, ctx: &TopologyContext, instance: &str, report: &mut VerificationReport) {
        let logs = HostCommand::InstanceLogs {
            instance: ctx.instance_name(instance),
        };
        let (passed, detail) = match self.runner.run(&logs) {
            Ok(out) => match out
                .stdout
                .lines()
                .find(|line| CRASH_SIGNATURES.iter().any(|sig| line.contains(sig)))
            {
                Some(line) => (false, line.trim().to_owned()),
                None => (true, "no crash signatures".to_owned()),
            },
            Err(e) => (false, format!("could not read logs: {e}")),
        };
        report.push(CheckKind::CrashScan, instance.to_owned(), passed, detail);
    }
}
