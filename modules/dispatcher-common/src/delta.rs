//! Delta notifications: batches of inserted and deleted triples.

use std::collections::HashSet;

use serde::Deserialize;

use crate::types::Subject;
use crate::vocab;

/// Deleting one of these links can revoke an organization's view of a unit,
/// so both ends of the link are re-evaluated. Every other delete is ignored.
pub const VISIBILITY_PREDICATES: [&str; 2] = [vocab::ORG_LINKED_TO, vocab::ORG_ORGANIZATION];

#[derive(Debug, Clone, Deserialize)]
pub struct Term {
    #[serde(rename = "type", default)]
    pub term_type: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Triple {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub inserts: Vec<Triple>,
    #[serde(default)]
    pub deletes: Vec<Triple>,
}

impl Term {
    pub fn is_uri(&self) -> bool {
        self.term_type == "uri"
    }
}

/// Distinct subjects affected by a delta, in order of first appearance.
///
/// Inserts contribute their subject. A deleted visibility link contributes
/// its subject and, right after it, the unit it pointed at.
pub fn subjects_to_process(changesets: &[ChangeSet]) -> Vec<Subject> {
    let inserted = changesets
        .iter()
        .flat_map(|c| c.inserts.iter())
        .map(|t| t.subject.value.as_str());
    let deleted = changesets
        .iter()
        .flat_map(|c| c.deletes.iter())
        .filter(|t| VISIBILITY_PREDICATES.contains(&t.predicate.value.as_str()))
        .flat_map(|t| {
            let object = t.object.is_uri().then_some(t.object.value.as_str());
            std::iter::once(t.subject.value.as_str()).chain(object)
        });

    let mut seen = HashSet::new();
    inserted
        .chain(deleted)
        .filter(|s| seen.insert(*s))
        .map(Subject::from)
        .collect()
}
