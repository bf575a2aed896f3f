use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use vchassis_core::{PollingConfig, Provisioner, Settings, StepOutcome, TopologyContext, Verifier};
use vchassis_runtime::{HostCommand, ResourceKind, SimulatedHost};
use vchassis_schema::{load_topology, TopologySpec, WiringArtifact};

const PORTS: u32 = 4;

fn write_topology(dir: &Path, body: &str) -> TopologySpec {
    let path = dir.join("topology.json");
    fs::write(&path, body).unwrap();
    load_topology(&path).unwrap()
}

fn write_instance(dir: &Path, id: &str, body: &str) {
    let d = dir.join(id);
    fs::create_dir_all(&d).unwrap();
    fs::write(d.join("instance.json"), body).unwrap();
}

fn two_chassis(dir: &Path) -> TopologySpec {
    write_instance(dir, "sup", r#"{ "hostname": "sup", "port_count": 0 }"#);
    write_instance(dir, "lc1", r#"{ "hostname": "lc1", "port_count": 2 }"#);
    write_topology(dir, r#"{ "chassis_instances": ["sup", "lc1"] }"#)
}

fn chassis_and_neighbor(dir: &Path, inband: bool) -> TopologySpec {
    let lc1 = if inband {
        r#"{ "hostname": "lc1", "port_count": 2, "inband_address": "10.8.1.200/24",
             "interface_addresses": { "eth1": "10.0.0.1/31" } }"#
    } else {
        r#"{ "hostname": "lc1", "port_count": 2,
             "interface_addresses": { "eth1": "10.0.0.1/31" } }"#
    };
    write_instance(dir, "lc1", lc1);
    write_instance(
        dir,
        "R1",
        r#"{ "hostname": "R1", "interface_addresses": { "eth1": "10.0.0.0/31" } }"#,
    );
    write_topology(
        dir,
        r#"{
            "chassis_instances": ["lc1"],
            "neighbor_instances": ["R1"],
            "neighbor_connections": { "e1": { "lc1": "eth1", "R1": "eth1" } }
        }"#,
    )
}

fn fast_link_polling() -> PollingConfig {
    PollingConfig::new(Duration::from_millis(1), Duration::from_millis(500), true)
}

fn fast_state_polling() -> PollingConfig {
    PollingConfig::new(Duration::from_millis(2), Duration::from_millis(50), true)
}

fn setup(name: &str) -> (Arc<SimulatedHost>, Provisioner, TopologyContext) {
    let host = Arc::new(SimulatedHost::new());
    let provisioner = Provisioner::new(host.clone()).with_link_polling(fast_link_polling());
    let ctx = TopologyContext::new(name).unwrap().with_port_count(PORTS);
    (host, provisioner, ctx)
}

#[test]
fn two_chassis_without_edges() {
    let dir = tempfile::tempdir().unwrap();
    let spec = two_chassis(dir.path());
    let (host, provisioner, ctx) = setup("t1");

    let report = provisioner.create(&ctx, &spec);
    assert!(report.is_clean(), "{:?}", report.failures().collect::<Vec<_>>());

    assert_eq!(host.running_instances(), vec!["lc1.t1", "sup.t1"]);
    assert!(host.has_namespace("vct-t1"));
    let members = host.bridge_members("vct-t1", "br4chs");
    assert_eq!(members.len(), 2);
    let mut expected = vec![ctx.control_pair("sup").0, ctx.control_pair("lc1").0];
    expected.sort();
    assert_eq!(members, expected);

    let resources = host.resources();
    let count = |kind| resources.iter().filter(|h| h.kind == kind).count();
    assert_eq!(count(ResourceKind::Namespace), 1);
    assert_eq!(count(ResourceKind::Bridge), 1);
    assert_eq!(count(ResourceKind::Instance), 2);

    let report = provisioner.delete(&ctx, &spec);
    assert!(report.is_clean(), "{:?}", report.failures().collect::<Vec<_>>());
    assert!(host.resources().is_empty());
}

#[test]
fn edge_bridge_joins_both_participants() {
    let dir = tempfile::tempdir().unwrap();
    let spec = chassis_and_neighbor(dir.path(), false);
    let (host, provisioner, ctx) = setup("t2");

    let report = provisioner.create(&ctx, &spec);
    assert!(report.is_clean(), "{:?}", report.failures().collect::<Vec<_>>());

    let bridge = ctx.edge_bridge("e1");
    assert!(host.has_bridge("vct-t2", &bridge));
    let mut expected = vec![ctx.pool_pair("lc1", 1).0, ctx.pool_pair("R1", 1).0];
    expected.sort();
    assert_eq!(host.bridge_members("vct-t2", &bridge), expected);

    let lc1 = &report.instances["lc1"];
    assert_eq!(lc1.ready_interfaces["eth1"].as_deref(), Some(bridge.as_str()));
    assert_eq!(lc1.ready_interfaces["eth2"], None);
    assert_eq!(lc1.ready_interfaces["eth0"].as_deref(), Some("br4chs"));
}

#[test]
fn instances_get_renamed_pool_interfaces() {
    let dir = tempfile::tempdir().unwrap();
    let spec = two_chassis(dir.path());
    let host = Arc::new(SimulatedHost::new());
    let provisioner = Provisioner::new(host.clone());
    let ctx = TopologyContext::new("pool").unwrap();

    let report = provisioner.create(&ctx, &spec);
    assert!(report.is_clean());
    // eth0 plus the default 32 reserved ports.
    assert_eq!(report.instances["sup"].ready_interfaces.len(), 33);
    let links = host.instance_links("sup.pool");
    assert!(links.contains(&"eth0".to_owned()));
    assert!(links.contains(&"eth32".to_owned()));
    assert!(!links.iter().any(|l| l.starts_with(&ctx.instance_tag("sup"))));
    assert_eq!(host.instance_link_up("sup.pool", "eth7"), Some(true));
}

#[test]
fn create_twice_yields_same_resources() {
    let dir = tempfile::tempdir().unwrap();
    let spec = chassis_and_neighbor(dir.path(), true);
    let (host, provisioner, ctx) = setup("idem");

    let first = provisioner.create(&ctx, &spec);
    assert!(first.is_clean(), "{:?}", first.failures().collect::<Vec<_>>());
    let after_first = host.resources();

    let second = provisioner.create(&ctx, &spec);
    assert!(second.is_clean(), "{:?}", second.failures().collect::<Vec<_>>());
    assert_eq!(host.resources(), after_first);
    assert_eq!(second.tally().created, 0);
    assert!(second.tally().unchanged > 0);
    assert_eq!(second.instances, first.instances);
}

#[test]
fn delete_removes_everything_create_made() {
    let dir = tempfile::tempdir().unwrap();
    let spec = chassis_and_neighbor(dir.path(), true);
    let (host, provisioner, ctx) = setup("sym");

    provisioner.create(&ctx, &spec);
    assert!(!host.resources().is_empty());

    let report = provisioner.delete(&ctx, &spec);
    assert!(report.is_clean(), "{:?}", report.failures().collect::<Vec<_>>());
    assert!(host.resources().is_empty());

    // Deleting again finds nothing and still succeeds.
    let again = provisioner.delete(&ctx, &spec);
    assert!(again.is_clean());
    assert_eq!(again.tally().removed, 0);
}

#[test]
fn delete_stops_instances_before_removing_bridges() {
    let dir = tempfile::tempdir().unwrap();
    let spec = chassis_and_neighbor(dir.path(), false);
    let (host, provisioner, ctx) = setup("order");
    provisioner.create(&ctx, &spec);
    let before = host.history().len();
    provisioner.delete(&ctx, &spec);

    let history = host.history();
    let history = &history[before..];
    let last_stop = history
        .iter()
        .rposition(|c| matches!(c, HostCommand::StopInstance { .. }))
        .unwrap();
    let first_bridge_delete = history
        .iter()
        .position(|c| matches!(c, HostCommand::DeleteBridge { .. }))
        .unwrap();
    assert!(last_stop < first_bridge_delete);
    assert!(matches!(
        history.last(),
        Some(HostCommand::DeleteNamespace { .. })
    ));
}

#[test]
fn inband_link_is_reissued_until_up() {
    let dir = tempfile::tempdir().unwrap();
    let spec = chassis_and_neighbor(dir.path(), true);
    let (host, provisioner, ctx) = setup("ib");
    host.delay_link_up("lc1.ib", "ib0", 3);

    let report = provisioner.create(&ctx, &spec);
    assert!(report.is_clean(), "{:?}", report.failures().collect::<Vec<_>>());
    assert_eq!(host.instance_link_up("lc1.ib", "ib0"), Some(true));

    let bring_ups = host
        .history()
        .iter()
        .filter(|c| {
            matches!(c, HostCommand::SetInstanceLinkState { link, up: true, .. } if link == "ib0")
        })
        .count();
    assert!(bring_ups >= 4, "expected re-issued bring-ups, saw {bring_ups}");

    assert!(host
        .bridge_members("vct-ib", "br4chs")
        .contains(&ctx.inband_pair("lc1").0));
    assert_eq!(
        report.instances["lc1"].ready_interfaces["ib0"].as_deref(),
        Some("br4chs")
    );
}

#[test]
fn inband_timeout_is_recorded_and_create_continues() {
    let dir = tempfile::tempdir().unwrap();
    let spec = chassis_and_neighbor(dir.path(), true);
    let host = Arc::new(SimulatedHost::new());
    let provisioner = Provisioner::new(host.clone()).with_link_polling(PollingConfig::new(
        Duration::from_millis(1),
        Duration::from_millis(20),
        true,
    ));
    let ctx = TopologyContext::new("ibto").unwrap().with_port_count(PORTS);
    host.delay_link_up("lc1.ibto", "ib0", u32::MAX);

    let report = provisioner.create(&ctx, &spec);
    assert!(!report.is_clean());
    assert!(report
        .failures()
        .any(|s| s.step.starts_with("wait for ib0 up in lc1.ibto")));
    assert!(!report.instances["lc1"].ready_interfaces.contains_key("ib0"));

    // Later phases still ran.
    assert_eq!(host.bridge_members("vct-ibto", &ctx.edge_bridge("e1")).len(), 2);
    assert!(WiringArtifact::read_from_dir(&spec.instances[0].dir).is_ok());
}

#[test]
fn failed_step_is_recorded_and_rerun_converges() {
    let dir = tempfile::tempdir().unwrap();
    let spec = chassis_and_neighbor(dir.path(), false);
    let (host, provisioner, ctx) = setup("retry");
    let (p2, i2) = ctx.pool_pair("lc1", 2);
    let broken = HostCommand::AddVethPair {
        namespace: "vct-retry".to_owned(),
        local: p2,
        peer: i2,
    };
    host.fail_once(broken.clone());

    let first = provisioner.create(&ctx, &spec);
    assert!(!first.is_clean());
    let failed: Vec<_> = first.failures().collect();
    assert_eq!(failed[0].step, broken.to_string());
    let resource = failed[0].resource.as_ref().unwrap();
    assert_eq!(resource.state, vchassis_runtime::ResourceState::Creating);
    assert!(!first.instances["lc1"].ready_interfaces.contains_key("eth2"));
    // Steps after the failure ran.
    assert!(first.instances["lc1"].ready_interfaces.contains_key("eth3"));
    assert!(first.instances["R1"].ready_interfaces.contains_key("eth1"));

    let second = provisioner.create(&ctx, &spec);
    assert!(second.is_clean(), "{:?}", second.failures().collect::<Vec<_>>());
    assert!(second.instances["lc1"].ready_interfaces.contains_key("eth2"));
}

#[test]
fn every_failure_carries_a_reason() {
    let dir = tempfile::tempdir().unwrap();
    let spec = two_chassis(dir.path());
    let (host, provisioner, ctx) = setup("reason");
    host.fail_always(HostCommand::AddNamespace {
        namespace: "vct-reason".to_owned(),
    });

    let report = provisioner.create(&ctx, &spec);
    assert!(!report.is_clean());
    for step in report.failures() {
        match &step.outcome {
            StepOutcome::Failed { reason } => assert!(!reason.is_empty()),
            other => panic!("not a failure: {other:?}"),
        }
    }
}

#[test]
fn wiring_artifact_written_and_removed() {
    let dir = tempfile::tempdir().unwrap();
    let spec = chassis_and_neighbor(dir.path(), true);
    let (_host, provisioner, ctx) = setup("wire");

    provisioner.create(&ctx, &spec);
    let lc1_dir = dir.path().join("lc1");
    let artifact = WiringArtifact::read_from_dir(&lc1_dir).unwrap();
    assert_eq!(artifact.topology, "wire");
    assert_eq!(artifact.namespace, "vct-wire");
    assert_eq!(artifact.shared_bridge, "br4chs");
    assert_eq!(artifact.instance, "lc1.wire");
    assert_eq!(artifact.control_interface, "eth0");
    let inband = artifact.inband_pair.unwrap();
    assert_eq!(inband.host, ctx.inband_pair("lc1").0);
    assert_eq!(inband.instance, "ib0");
    assert_eq!(artifact.neighbor_bridges["eth1"], ctx.edge_bridge("e1"));
    assert_eq!(
        artifact.interfaces.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["eth0", "eth1", "ib0"]
    );
    assert!(chrono::DateTime::parse_from_rfc3339(&artifact.generated_at).is_ok());

    let r1 = WiringArtifact::read_from_dir(&dir.path().join("R1")).unwrap();
    assert!(r1.inband_pair.is_none());

    provisioner.delete(&ctx, &spec);
    assert!(!WiringArtifact::path_in(&lc1_dir).exists());
}

#[test]
fn edge_beyond_reserved_pool_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_instance(dir.path(), "lc1", r#"{ "hostname": "lc1" }"#);
    write_instance(dir.path(), "lc2", r#"{ "hostname": "lc2" }"#);
    let spec = write_topology(
        dir.path(),
        r#"{
            "chassis_instances": ["lc1", "lc2"],
            "neighbor_connections": { "fab": { "lc1": "eth9", "lc2": "eth1" } }
        }"#,
    );
    let (_host, provisioner, ctx) = setup("big");

    let report = provisioner.create(&ctx, &spec);
    let failed: Vec<&str> = report.failures().map(|s| s.step.as_str()).collect();
    assert!(failed.iter().any(|s| s.contains("eth9 of 'lc1'")), "{failed:?}");
    assert!(failed.iter().any(|s| s.contains("provide eth9 in lc1.big")), "{failed:?}");
    assert_eq!(
        report.instances["lc2"].ready_interfaces["eth1"].as_deref(),
        Some(ctx.edge_bridge("fab").as_str())
    );
}

#[test]
fn interrupted_create_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let spec = two_chassis(dir.path());
    let host = Arc::new(SimulatedHost::new());
    let ctx = TopologyContext::new("intr").unwrap().with_port_count(PORTS);

    let stopping = Provisioner::new(host.clone()).with_stop_check(|| true);
    let report = stopping.create(&ctx, &spec);
    assert!(report.interrupted);
    assert!(!report.is_clean());
    assert!(host.running_instances().is_empty());
    assert!(host.has_namespace("vct-intr"));

    let report = Provisioner::new(host.clone())
        .with_stop_check(|| false)
        .create(&ctx, &spec);
    assert!(report.is_clean());
    assert_eq!(host.running_instances().len(), 2);
}

#[test]
fn distinct_topologies_are_independent() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let spec_a = chassis_and_neighbor(dir_a.path(), true);
    let spec_b = chassis_and_neighbor(dir_b.path(), true);
    let host = Arc::new(SimulatedHost::new());
    let provisioner = Provisioner::new(host.clone()).with_link_polling(fast_link_polling());
    let a = TopologyContext::new("a").unwrap().with_port_count(PORTS);
    let b = TopologyContext::new("b").unwrap().with_port_count(PORTS);

    assert!(provisioner.create(&a, &spec_a).is_clean());
    assert!(provisioner.create(&b, &spec_b).is_clean());
    let both = host.resources();
    provisioner.delete(&a, &spec_a);

    let remaining = host.resources();
    assert!(!remaining.is_empty());
    assert!(remaining.iter().all(|h| {
        h.owning_namespace.as_deref() == Some("vct-b") || h.name.ends_with(".b") || h.name == "vct-b"
    }));
    assert!(remaining.is_subset(&both));
    assert!(remaining.len() < both.len());
}

fn script_healthy(host: &SimulatedHost, ctx: &TopologyContext, keys: usize) {
    let lines: String = (0..keys)
        .map(|i| format!("SYSTEM_INTERFACE|lc1|Asic0|Ethernet{}\n", i * 4))
        .collect();
    host.script_exec(
        &ctx.instance_name("lc1"),
        &["redis-cli", "-n", "12", "KEYS", "SYSTEM_INTERFACE|*"],
        Ok(lines.as_str()),
    );
    host.script_exec(
        &ctx.instance_name("lc1"),
        &["ping", "-c", "5", "-W", "1", "-q", "10.0.0.0"],
        Ok("--- 10.0.0.0 ping statistics ---\n5 packets transmitted, 5 received, 0% packet loss, time 4004ms\n"),
    );
    host.set_logs(&ctx.instance_name("lc1"), "orchagent started\n");
    host.set_logs(&ctx.instance_name("R1"), "bgpd started\n");
}

#[test]
fn verify_passes_on_healthy_topology() {
    let dir = tempfile::tempdir().unwrap();
    let spec = chassis_and_neighbor(dir.path(), false);
    let (host, provisioner, ctx) = setup("vok");
    provisioner.create(&ctx, &spec);
    script_healthy(&host, &ctx, 2);

    let report = Verifier::new(host.clone()).verify(&ctx, &spec);
    assert!(report.passed(), "{:?}", report.failures());
    // One key count, one probe, two log scans.
    assert_eq!(report.checks.len(), 4);
}

#[test]
fn verify_collects_every_failure() {
    let dir = tempfile::tempdir().unwrap();
    let spec = chassis_and_neighbor(dir.path(), false);
    let (host, provisioner, ctx) = setup("vbad");
    provisioner.create(&ctx, &spec);
    script_healthy(&host, &ctx, 3);
    host.script_exec(
        "lc1.vbad",
        &["ping", "-c", "5", "-W", "1", "-q", "10.0.0.0"],
        Ok("5 packets transmitted, 4 received, 20% packet loss\n"),
    );
    host.set_logs("R1.vbad", "bgpd: Segmentation fault (core dumped)\n");

    let report = Verifier::new(host.clone())
        .with_polling(fast_state_polling())
        .verify(&ctx, &spec);
    assert!(!report.passed());
    let failed: Vec<_> = report
        .failures()
        .iter()
        .map(|c| (c.kind.to_string(), c.subject.clone()))
        .collect();
    assert_eq!(
        failed,
        vec![
            ("port keys".to_owned(), "lc1".to_owned()),
            ("reachability".to_owned(), "e1".to_owned()),
            ("crash scan".to_owned(), "R1".to_owned()),
        ]
    );
}

fn port_key_reads(host: &SimulatedHost, from: usize) -> usize {
    let history = host.history();
    history[from..]
        .iter()
        .filter(|c| matches!(c, HostCommand::InstanceExec { argv, .. } if argv.iter().any(|a| a == "KEYS")))
        .count()
}

#[test]
fn verify_waits_for_late_port_keys_using_settings_polling() {
    let dir = tempfile::tempdir().unwrap();
    let spec = chassis_and_neighbor(dir.path(), false);
    let (host, provisioner, ctx) = setup("vlate");
    provisioner.create(&ctx, &spec);
    script_healthy(&host, &ctx, 1);

    let config = dir.path().join("config.toml");
    fs::write(&config, "[polling]\ninterval_ms = 5\ntimeout_ms = 5000\n").unwrap();
    let settings = Settings::load(&config).unwrap();

    let late = host.clone();
    let instance = ctx.instance_name("lc1");
    let publisher = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(40));
        late.script_exec(
            &instance,
            &["redis-cli", "-n", "12", "KEYS", "SYSTEM_INTERFACE|*"],
            Ok("SYSTEM_INTERFACE|lc1|Asic0|Ethernet0\nSYSTEM_INTERFACE|lc1|Asic0|Ethernet4\n"),
        );
    });

    let before = host.history().len();
    let report = Verifier::from_settings(host.clone(), &settings).verify(&ctx, &spec);
    publisher.join().unwrap();

    assert!(report.passed(), "{:?}", report.failures());
    assert!(port_key_reads(&host, before) > 1);
}

#[test]
fn verify_gives_up_after_settings_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let spec = chassis_and_neighbor(dir.path(), false);
    let (host, provisioner, ctx) = setup("vslow");
    provisioner.create(&ctx, &spec);
    script_healthy(&host, &ctx, 3);

    let config = dir.path().join("config.toml");
    fs::write(&config, "[polling]\ninterval_ms = 5\ntimeout_ms = 60\n").unwrap();
    let settings = Settings::load(&config).unwrap();

    let before = host.history().len();
    let started = std::time::Instant::now();
    let report = Verifier::from_settings(host.clone(), &settings).verify(&ctx, &spec);

    // A strict [polling] section still yields a failed check, not an abort.
    assert_eq!(report.checks.len(), 4);
    let keys = &report.checks[0];
    assert!(!keys.passed);
    assert!(keys.detail.contains("found 3"), "{}", keys.detail);
    assert!(port_key_reads(&host, before) > 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn verify_issues_no_mutating_commands() {
    let dir = tempfile::tempdir().unwrap();
    let spec = chassis_and_neighbor(dir.path(), false);
    let (host, provisioner, ctx) = setup("vro");
    provisioner.create(&ctx, &spec);
    let before = host.history().len();
    let resources = host.resources();

    Verifier::new(host.clone()).verify(&ctx, &spec);

    assert!(host.history()[before..].iter().all(|c| !c.is_mutating()));
    assert_eq!(host.resources(), resources);
}

#[test]
fn verify_reports_unreadable_state_as_failures() {
    let dir = tempfile::tempdir().unwrap();
    let spec = chassis_and_neighbor(dir.path(), false);
    let host = Arc::new(SimulatedHost::new());
    let ctx = TopologyContext::new("down").unwrap();

    // Nothing was provisioned, so every check fails but none aborts.
    let report = Verifier::new(host.clone()).verify(&ctx, &spec);
    assert_eq!(report.checks.len(), 4);
    assert_eq!(report.failures().len(), 4);
}
