//! Declarative routing rules, loaded once from TOML.
//!
//! Graph patterns use two variables: `?subject` is the subject the rule is
//! about, `?anchor` is the other end of the path (the owning organizational
//! unit for org rules, the subject that was just dispatched for cascade
//! triggers).

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::{DispatchError, DispatchResult};
use crate::types::{DerivedFactKind, DestinationClass, GraphId};

/// One routing rule. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEntry {
    pub subject_type: String,
    pub destination_class: DestinationClass,
    /// Extra graph pattern the subject must satisfy. `None` admits every
    /// subject of the type.
    pub eligibility_filter: Option<String>,
    /// Org rules: path from `?subject` to its organizational unit `?anchor`.
    pub path_to_unit: Option<String>,
    /// Paths from the dispatched subject `?anchor` to `?subject`s that must
    /// be re-evaluated once this subject moved.
    pub cascade_triggers: Vec<String>,
    pub derived_facts: Vec<DerivedFactKind>,
}

/// How an organizational unit maps onto its organization graphs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationRule {
    /// Pattern binding `?uuid` for every organization allowed to see `?unit`.
    pub path: String,
    pub graph_prefix: String,
    #[serde(default)]
    pub graph_suffix: String,
}

impl DestinationRule {
    pub fn graph_for(&self, uuid: &str) -> GraphId {
        GraphId::new(format!("{}{}{}", self.graph_prefix, uuid, self.graph_suffix))
    }
}

#[derive(Debug, Clone)]
pub struct RuleTable {
    public: Vec<RuleEntry>,
    org: Vec<RuleEntry>,
    destinations: DestinationRule,
}

impl RuleTable {
    pub fn new(
        public: Vec<RuleEntry>,
        org: Vec<RuleEntry>,
        destinations: DestinationRule,
    ) -> DispatchResult<Self> {
        let table = Self {
            public,
            org,
            destinations,
        };
        table.validate()?;
        Ok(table)
    }

    pub fn from_toml_str(content: &str) -> DispatchResult<Self> {
        let file: RuleFile =
            toml::from_str(content).map_err(|e| DispatchError::Config(e.to_string()))?;

        let public = file
            .public
            .into_iter()
            .map(|r| r.into_entry(DestinationClass::Public))
            .collect();
        let org = file
            .org
            .into_iter()
            .map(|r| r.into_entry(DestinationClass::Org))
            .collect();

        Self::new(public, org, file.destinations)
    }

    /// All rules of `class` whose subject type is among `types`.
    pub fn rules_for_types(
        &self,
        types: &BTreeSet<String>,
        class: DestinationClass,
    ) -> Vec<&RuleEntry> {
        self.rules(class)
            .iter()
            .filter(|r| types.contains(&r.subject_type))
            .collect()
    }

    pub fn rules(&self, class: DestinationClass) -> &[RuleEntry] {
        match class {
            DestinationClass::Public => &self.public,
            DestinationClass::Org => &self.org,
        }
    }

    pub fn destinations(&self) -> &DestinationRule {
        &self.destinations
    }

    pub fn len(&self) -> usize {
        self.public.len() + self.org.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self) -> DispatchResult<()> {
        if self.is_empty() {
            return Err(DispatchError::Config("rule table has no rules".into()));
        }

        for rule in &self.org {
            let path = rule.path_to_unit.as_deref().ok_or_else(|| {
                DispatchError::Config(format!(
                    "org rule for {} has no path_to_unit",
                    rule.subject_type
                ))
            })?;
            require_vars(&rule.subject_type, "path_to_unit", path, &["?subject", "?anchor"])?;
        }

        for rule in self.public.iter().chain(&self.org) {
            for trigger in &rule.cascade_triggers {
                require_vars(
                    &rule.subject_type,
                    "cascade_triggers",
                    trigger,
                    &["?subject", "?anchor"],
                )?;
            }
        }

        require_vars("destinations", "path", &self.destinations.path, &["?unit", "?uuid"])?;

        Ok(())
    }
}

fn require_vars(owner: &str, field: &str, pattern: &str, vars: &[&str]) -> DispatchResult<()> {
    for var in vars {
        if !pattern.contains(var) {
            return Err(DispatchError::Config(format!(
                "{field} of {owner} does not mention {var}"
            )));
        }
    }
    Ok(())
}

// --- File format ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleFile {
    #[serde(default)]
    public: Vec<RawRule>,
    #[serde(default)]
    org: Vec<RawRule>,
    destinations: DestinationRule,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    #[serde(rename = "type")]
    subject_type: String,
    #[serde(default)]
    filter: Option<String>,
    #[serde(default)]
    path_to_unit: Option<String>,
    #[serde(default)]
    cascade_triggers: Vec<String>,
    #[serde(default)]
    derived_facts: Vec<DerivedFactKind>,
}

impl RawRule {
    fn into_entry(self, destination_class: DestinationClass) -> RuleEntry {
        RuleEntry {
            subject_type: self.subject_type,
            destination_class,
            eligibility_filter: self.filter.filter(|f| !f.trim().is_empty()),
            path_to_unit: self.path_to_unit,
            cascade_triggers: self.cascade_triggers,
            derived_facts: self.derived_facts,
        }
    }
}

/// Load and validate the rule table from a TOML file.
pub fn load_rules(path: &Path) -> DispatchResult<RuleTable> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DispatchError::Config(format!("failed to read rule file {}: {e}", path.display()))
    })?;
    let table = RuleTable::from_toml_str(&content)?;
    info!(
        path = %path.display(),
        public = table.public.len(),
        org = table.org.len(),
        "Loaded dispatch rules"
    );
    Ok(table)
}
