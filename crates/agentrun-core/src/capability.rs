//! Endpoint and task capabilities.
//!
//! A task declares the capabilities it requires; an endpoint (or worker)
//! declares the capabilities it provides. Routing always demands a
//! superset match; a required capability is never silently dropped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A single capability an endpoint can provide or a task can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Plain text generation.
    Text,
    /// Image understanding.
    Vision,
    /// Video understanding.
    Video,
    /// Structured tool/function invocation.
    ToolUse,
    /// Extended internal reasoning.
    ExtendedReasoning,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Text => "text",
            Capability::Vision => "vision",
            Capability::Video => "video",
            Capability::ToolUse => "tool_use",
            Capability::ExtendedReasoning => "extended_reasoning",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Capability::Text),
            "vision" => Ok(Capability::Vision),
            "video" => Ok(Capability::Video),
            "tool_use" => Ok(Capability::ToolUse),
            "extended_reasoning" => Ok(Capability::ExtendedReasoning),
            other => Err(format!("unknown capability: {other}")),
        }
    }
}

/// An ordered set of capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// Create an empty capability set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A set containing only [`Capability::Text`].
    pub fn text_only() -> Self {
        Self::from_iter([Capability::Text])
    }

    /// Add a capability.
    pub fn insert(&mut self, cap: Capability) {
        self.0.insert(cap);
    }

    /// Builder-style insert.
    pub fn with(mut self, cap: Capability) -> Self {
        self.insert(cap);
        self
    }

    /// Check membership.
    pub fn contains(&self, cap: Capability) -> bool {
        self.0.contains(&cap)
    }

    /// True when `self` provides every capability in `required`.
    pub fn is_superset_of(&self, required: &CapabilitySet) -> bool {
        required.0.is_subset(&self.0)
    }

    /// True when the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of capabilities in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the capabilities in order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let caps: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "[{}]", caps.join(", "))
    }
}
