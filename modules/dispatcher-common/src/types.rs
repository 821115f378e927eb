use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vocab;

// --- Identifiers ---

/// Stable identifier (IRI) of an entity in the store. The store owns all of
/// its attributes; this is only the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    pub fn new(iri: impl Into<String>) -> Self {
        Self(iri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Subject {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Subject {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a store partition (named graph).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphId(String);

impl GraphId {
    pub fn new(iri: impl Into<String>) -> Self {
        Self(iri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GraphId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// --- Rule classification ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationClass {
    /// The single public graph.
    Public,
    /// Organization graphs, derived per organizational unit.
    Org,
}

impl fmt::Display for DestinationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Org => write!(f, "org"),
        }
    }
}

/// Target graphs of one copy, tagged with the class they belong to. A copy
/// only retracts from graphs of its own class: a public copy leaves
/// organization graphs alone and an organization copy leaves the public graph
/// alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destinations {
    pub class: DestinationClass,
    pub graphs: BTreeSet<GraphId>,
}

impl Destinations {
    pub fn public(graph: GraphId) -> Self {
        Self {
            class: DestinationClass::Public,
            graphs: BTreeSet::from([graph]),
        }
    }

    pub fn org(graphs: BTreeSet<GraphId>) -> Self {
        Self {
            class: DestinationClass::Org,
            graphs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }
}

/// Enrichments inserted into the store before a subject is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DerivedFactKind {
    /// Marks a representative organ as an administrative unit with its own
    /// classification, so it gets an organization graph.
    RepresentativeOrganMarker,
    /// Copies the KBO number of an administrative unit onto `dct:identifier`,
    /// which the login provider requires.
    ExternalIdentifier,
}

impl DerivedFactKind {
    pub const ALL: [DerivedFactKind; 2] = [Self::RepresentativeOrganMarker, Self::ExternalIdentifier];
}

impl fmt::Display for DerivedFactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RepresentativeOrganMarker => write!(f, "representative-organ-marker"),
            Self::ExternalIdentifier => write!(f, "external-identifier"),
        }
    }
}

// --- Job audit trail ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Scheduled,
    Busy,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_iri(&self) -> &'static str {
        match self {
            Self::Scheduled => vocab::STATUS_SCHEDULED,
            Self::Busy => vocab::STATUS_BUSY,
            Self::Success => vocab::STATUS_SUCCESS,
            Self::Failed => vocab::STATUS_FAILED,
        }
    }

    pub fn from_iri(iri: &str) -> Option<Self> {
        match iri {
            vocab::STATUS_SCHEDULED => Some(Self::Scheduled),
            vocab::STATUS_BUSY => Some(Self::Busy),
            vocab::STATUS_SUCCESS => Some(Self::Success),
            vocab::STATUS_FAILED => Some(Self::Failed),
            _ => None,
        }
    }

    /// Status only moves forward: Scheduled → Busy → {Success, Failed}.
    /// Terminal states never change.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Scheduled, Self::Busy) => true,
            (Self::Scheduled | Self::Busy, Self::Success | Self::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Busy => write!(f, "busy"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A job record of the audit trail, with the IRIs of its tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub uri: String,
    pub id: Uuid,
    pub operation: String,
    pub creator: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub tasks: Vec<String>,
}

// --- Operator alerts ---

/// Operator-visible failure report, written to the error graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub message: String,
    pub detail: Option<String>,
    pub reference: Option<String>,
}

impl Alert {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
            reference: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}
