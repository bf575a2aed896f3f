use crate::CoreError;
use std::collections::BTreeSet;
use std::path::PathBuf;
use vchassis_runtime::InstanceLaunch;
use vchassis_schema::{validate_topology_name, InstanceSpec, TopologySpec};

pub const SHARED_BRIDGE: &str = "br4chs";
pub const CONTROL_INTERFACE: &str = "eth0";
pub const INBAND_INTERFACE: &str = "ib0";
pub const DEFAULT_IMAGE: &str = "docker-sonic-vs:latest";
/// Switch-facing ports reserved per instance.
pub const DEFAULT_PORT_COUNT: u32 = 32;
/// Largest pool an instance can reserve while `<tag>p<index>` still fits
/// the 15-byte link name limit with room to spare.
pub const MAX_PORT_COUNT: u32 = 1024;

const NAMESPACE_PREFIX: &str = "vct-";

fn short_hash(input: &str, len: usize) -> String {
    let hex = blake3::hash(input.as_bytes()).to_hex();
    hex.as_str()[..len].to_owned()
}

/// Everything that identifies one provisioned topology on the host.
///
/// All resource names are derived from the unique topology name, so two
/// contexts with different names never address the same namespace, bridge,
/// interface pair or instance. The context is built once by the caller and
/// passed to every provisioning and verification call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyContext {
    name: String,
    namespace: String,
    image: String,
    source_mount: Option<PathBuf>,
    port_count: u32,
}

impl TopologyContext {
    pub fn new(name: &str) -> Result<Self, CoreError> {
        validate_topology_name(name)?;
        Ok(Self {
            name: name.to_owned(),
            namespace: format!("{NAMESPACE_PREFIX}{name}"),
            image: DEFAULT_IMAGE.to_owned(),
            source_mount: None,
            port_count: DEFAULT_PORT_COUNT,
        })
    }

    #[must_use]
    pub fn with_image(mut self, image: &str) -> Self {
        image.clone_into(&mut self.image);
        self
    }

    #[must_use]
    pub fn with_source_mount(mut self, mount: Option<PathBuf>) -> Self {
        self.source_mount = mount;
        self
    }

    #[must_use]
    pub fn with_port_count(mut self, port_count: u32) -> Self {
        self.port_count = port_count;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn shared_bridge(&self) -> &'static str {
        SHARED_BRIDGE
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn source_mount(&self) -> Option<&PathBuf> {
        self.source_mount.as_ref()
    }

    pub fn port_count(&self) -> u32 {
        self.port_count
    }

    /// Container name of an instance: `<instance>.<topology>`.
    pub fn instance_name(&self, instance: &str) -> String {
        format!("{instance}.{}", self.name)
    }

    /// Eight hex characters that prefix every host-side link of `instance`.
    /// Kernel link names are limited to 15 bytes, so the ids themselves
    /// cannot be used.
    pub fn instance_tag(&self, instance: &str) -> String {
        short_hash(&format!("{}/{instance}", self.name), 8)
    }

    pub fn edge_bridge(&self, edge: &str) -> String {
        format!("e{}", short_hash(edge, 10))
    }

    /// `(namespace end, instance end)` of the control pair.
    pub fn control_pair(&self, instance: &str) -> (String, String) {
        let tag = self.instance_tag(instance);
        (format!("{tag}c"), format!("{tag}ci"))
    }

    /// `(namespace end, instance end)` of reserved pool pair `index`.
    pub fn pool_pair(&self, instance: &str, index: u32) -> (String, String) {
        let tag = self.instance_tag(instance);
        (format!("{tag}p{index}"), format!("{tag}i{index}"))
    }

    pub fn inband_pair(&self, instance: &str) -> (String, String) {
        let tag = self.instance_tag(instance);
        (format!("{tag}b"), format!("{tag}bi"))
    }

    /// Interfaces an instance must end up with: the control interface, one
    /// per edge naming it, and the inband port when configured.
    pub fn required_interfaces(&self, spec: &TopologySpec, instance: &InstanceSpec) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        set.insert(CONTROL_INTERFACE.to_owned());
        for (_, ifname) in spec.edges_for(&instance.id) {
            set.insert(ifname.to_owned());
        }
        if instance.config.has_inband() {
            set.insert(INBAND_INTERFACE.to_owned());
        }
        set
    }

    pub fn launch(&self, instance: &InstanceSpec) -> InstanceLaunch {
        InstanceLaunch {
            name: self.instance_name(&instance.id),
            hostname: instance.config.hostname.clone(),
            image: self.image.clone(),
            config_dir: instance.dir.clone(),
            source_mount: self.source_mount.clone(),
        }
    }
}
