use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Namespace,
    Bridge,
    IfPair,
    Instance,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    Absent,
    /// A create step was attempted but did not confirm the resource.
    Creating,
    Present,
    /// A destroy step was attempted but did not confirm removal.
    Destroying,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Namespace => write!(f, "namespace"),
            ResourceKind::Bridge => write!(f, "bridge"),
            ResourceKind::IfPair => write!(f, "ifpair"),
            ResourceKind::Instance => write!(f, "instance"),
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceState::Absent => write!(f, "absent"),
            ResourceState::Creating => write!(f, "creating"),
            ResourceState::Present => write!(f, "present"),
            ResourceState::Destroying => write!(f, "destroying"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub name: String,
    pub owning_namespace: Option<String>,
    pub state: ResourceState,
}

impl ResourceHandle {
    pub fn new(kind: ResourceKind, name: impl Into<String>, owning_namespace: Option<&str>) -> Self {
        Self {
            kind,
            name: name.into(),
            owning_namespace: owning_namespace.map(str::to_owned),
            state: ResourceState::Absent,
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: ResourceState) -> Self {
        self.state = state;
        self
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owning_namespace {
            Some(ns) => write!(f, "{} {}@{} ({})", self.kind, self.name, ns, self.state),
            None => write!(f, "{} {} ({})", self.kind, self.name, self.state),
        }
    }
}
