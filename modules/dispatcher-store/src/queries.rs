//! SPARQL query builders. Pure string construction, no I/O.
//!
//! Rule patterns are spliced in verbatim; every IRI and literal coming from
//! data goes through `escape`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use dispatcher_common::{
    vocab, Alert, DestinationClass, DestinationRule, Destinations, GraphId, JobStatus, RuleEntry,
    Subject,
};

use crate::escape::{escape_datetime, escape_string, escape_uri};

pub const PREFIXES: &str = "\
PREFIX mu: <http://mu.semte.ch/vocabularies/core/>
PREFIX task: <http://redpencil.data.gift/vocabularies/tasks/>
PREFIX dct: <http://purl.org/dc/terms/>
PREFIX oslc: <http://open-services.net/ns/core#>
PREFIX cogs: <http://vocab.deri.ie/cogs#>
PREFIX adms: <http://www.w3.org/ns/adms#>
PREFIX org: <http://www.w3.org/ns/org#>
PREFIX besluit: <http://data.vlaanderen.be/ns/besluit#>
";

const CLASSIFICATION_MUNICIPALITY: &str =
    "http://data.vlaanderen.be/id/concept/BestuurseenheidClassificatieCode/5ab0e9b8a3b2ca7c5e000001";
const CLASSIFICATION_PROVINCE: &str =
    "http://data.vlaanderen.be/id/concept/BestuurseenheidClassificatieCode/5ab0e9b8a3b2ca7c5e000000";
const CLASSIFICATION_REPRESENTATIVE_ORGAN: &str =
    "http://data.vlaanderen.be/id/concept/BestuurseenheidClassificatieCode/36372fad-0358-499c-a4e3-f412d2eae213";
const REPRESENTATIVE_ORGAN_TYPE: &str =
    "http://data.lblod.info/vocabularies/erediensten/RepresentatiefOrgaan";

fn graph_list(graphs: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    graphs
        .into_iter()
        .map(|g| escape_uri(g.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// SPARQL conditions on `?g` that select the graphs of each destination
/// class. Retraction never reaches outside the class being copied to.
#[derive(Debug, Clone)]
pub struct ClassScope {
    public: String,
    org: String,
}

impl ClassScope {
    pub fn new(public_graph: &GraphId, org: &DestinationRule) -> Self {
        let mut org_condition = format!("STRSTARTS(STR(?g), {})", escape_string(&org.graph_prefix));
        if !org.graph_suffix.is_empty() {
            org_condition.push_str(&format!(
                " && STRENDS(STR(?g), {})",
                escape_string(&org.graph_suffix)
            ));
        }
        Self {
            public: format!("?g = {}", escape_uri(public_graph.as_str())),
            org: org_condition,
        }
    }

    pub fn condition(&self, class: DestinationClass) -> &str {
        match class {
            DestinationClass::Public => &self.public,
            DestinationClass::Org => &self.org,
        }
    }
}

// =========================================================================
// Liveness
// =========================================================================

pub fn ping() -> String {
    "ASK { ?s ?p ?o }".to_string()
}

// =========================================================================
// Per-subject lookups
// =========================================================================

pub fn types_of(subject: &Subject) -> String {
    format!(
        "SELECT DISTINCT ?type WHERE {{\n  {} a ?type .\n}}",
        escape_uri(subject.as_str())
    )
}

/// ASK whether the subject satisfies the rule's filter. Callers skip the
/// query when the rule has none.
pub fn passes_filter(subject: &Subject, rule: &RuleEntry) -> String {
    format!(
        "{PREFIXES}ASK {{\n  BIND({} AS ?subject)\n  ?subject a {} .\n  {}\n}}",
        escape_uri(subject.as_str()),
        escape_uri(&rule.subject_type),
        rule.eligibility_filter.as_deref().unwrap_or_default(),
    )
}

pub fn owning_unit(subject: &Subject, rule: &RuleEntry) -> String {
    format!(
        "{PREFIXES}SELECT DISTINCT ?anchor WHERE {{\n  BIND({} AS ?subject)\n  ?subject a {} .\n  {}\n}}\nLIMIT 1",
        escape_uri(subject.as_str()),
        escape_uri(&rule.subject_type),
        rule.path_to_unit.as_deref().unwrap_or_default(),
    )
}

/// Organization uuids allowed to see the unit; graphs are built from them
/// with `DestinationRule::graph_for`.
pub fn destination_uuids(unit: &Subject, destinations: &DestinationRule) -> String {
    format!(
        "{PREFIXES}SELECT DISTINCT ?uuid WHERE {{\n  BIND({} AS ?unit)\n  {}\n}}",
        escape_uri(unit.as_str()),
        destinations.path,
    )
}

/// Subjects reached from `anchor` through `path`.
///
/// With `placed_in`, only subjects that still need work are returned: those
/// with statements in a graph of the same class outside `placed_in`, and
/// those whose source statements are missing from one of its graphs.
pub fn related_subjects(
    anchor: &Subject,
    subject_type: Option<&str>,
    path: &str,
    placed_in: Option<&Destinations>,
    scope: &ClassScope,
    source_graph: &GraphId,
) -> String {
    let type_clause = subject_type
        .map(|t| format!("  ?subject a {} .\n", escape_uri(t)))
        .unwrap_or_default();

    let placement_clause = match placed_in {
        Some(destinations) if !destinations.is_empty() => {
            let keep = keep_list(destinations, source_graph);
            let present: String = destinations
                .graphs
                .iter()
                .map(|g| format!("      GRAPH {} {{ ?subject ?p ?o . }}\n", escape_uri(g.as_str())))
                .collect();
            format!(
                "  {{\n    GRAPH ?g {{ ?subject ?p ?o . }}\n    FILTER (?g NOT IN ({keep}))\n    FILTER ({})\n  }}\n  UNION\n  {{\n    GRAPH {} {{ ?subject ?p ?o . }}\n    MINUS {{\n{present}    }}\n  }}\n",
                scope.condition(destinations.class),
                escape_uri(source_graph.as_str()),
            )
        }
        _ => String::new(),
    };

    format!(
        "{PREFIXES}SELECT DISTINCT ?subject WHERE {{\n  BIND({} AS ?anchor)\n{type_clause}  {path}\n{placement_clause}}}",
        escape_uri(anchor.as_str()),
    )
}

// =========================================================================
// Copy and retract
// =========================================================================

/// Copy every source statement about the subject into each destination.
pub fn copy_into_graphs(
    subject: &Subject,
    destinations: &BTreeSet<GraphId>,
    source_graph: &GraphId,
) -> String {
    let targets: String = destinations
        .iter()
        .map(|g| format!("  GRAPH {} {{ ?s ?p ?o . }}\n", escape_uri(g.as_str())))
        .collect();
    format!(
        "INSERT {{\n{targets}}}\nWHERE {{\n  BIND({} AS ?s)\n  GRAPH {} {{ ?s ?p ?o . }}\n}}",
        escape_uri(subject.as_str()),
        escape_uri(source_graph.as_str()),
    )
}

/// Remove the subject's statements from the graphs of the destination class
/// it should no longer be in.
pub fn retract_elsewhere(
    subject: &Subject,
    destinations: &Destinations,
    scope: &ClassScope,
    source_graph: &GraphId,
) -> String {
    format!(
        "DELETE {{\n  GRAPH ?g {{ ?s ?p ?o . }}\n}}\nWHERE {{\n  BIND({} AS ?s)\n  GRAPH ?g {{ ?s ?p ?o . }}\n  FILTER (?g NOT IN ({}))\n  FILTER ({})\n}}",
        escape_uri(subject.as_str()),
        keep_list(destinations, source_graph),
        scope.condition(destinations.class),
    )
}

fn keep_list(destinations: &Destinations, source_graph: &GraphId) -> String {
    graph_list(
        destinations
            .graphs
            .iter()
            .map(GraphId::as_str)
            .chain(std::iter::once(source_graph.as_str())),
    )
}

// =========================================================================
// Derived facts
// =========================================================================

/// Mark representative organs as administrative units with their own
/// classification, in whichever graph they live. Restricted to `subject`
/// when given.
pub fn representative_organ_marker(subject: Option<&Subject>) -> String {
    let bind = subject
        .map(|s| format!("  BIND({} AS ?ro)\n", escape_uri(s.as_str())))
        .unwrap_or_default();
    format!(
        "{PREFIXES}INSERT {{\n  GRAPH ?g {{\n    ?ro a besluit:Bestuurseenheid ;\n      org:classification {} .\n  }}\n}}\nWHERE {{\n{bind}  GRAPH ?g {{ ?ro a {} . }}\n}}",
        escape_uri(CLASSIFICATION_REPRESENTATIVE_ORGAN),
        escape_uri(REPRESENTATIVE_ORGAN_TYPE),
    )
}

/// Copy the KBO number of municipalities, provinces and representative
/// organs onto `dct:identifier`, next to their `adms:identifier`.
pub fn external_identifier(subject: Option<&Subject>) -> String {
    let bind = subject
        .map(|s| format!("  BIND({} AS ?bestuur)\n", escape_uri(s.as_str())))
        .unwrap_or_default();
    format!(
        "{PREFIXES}INSERT {{\n  GRAPH ?g {{ ?bestuur dct:identifier ?kbo . }}\n}}\nWHERE {{\n{bind}  GRAPH ?g {{ ?bestuur adms:identifier ?id . }}\n  ?id <https://data.vlaanderen.be/ns/generiek#gestructureerdeIdentificator>/<https://data.vlaanderen.be/ns/generiek#lokaleIdentificator> ?kbo ;\n    <http://www.w3.org/2004/02/skos/core#notation> \"KBO nummer\" .\n  ?bestuur org:classification ?classification .\n  FILTER (?classification IN ({}))\n}}",
        graph_list([
            CLASSIFICATION_MUNICIPALITY,
            CLASSIFICATION_PROVINCE,
            CLASSIFICATION_REPRESENTATIVE_ORGAN,
        ]),
    )
}

// =========================================================================
// Bulk dispatch
// =========================================================================

pub fn dispatch_all_public(rule: &RuleEntry, source_graph: &GraphId, public_graph: &GraphId) -> String {
    format!(
        "{PREFIXES}INSERT {{\n  GRAPH {} {{ ?subject ?p ?o . }}\n}}\nWHERE {{\n  GRAPH {} {{\n    ?subject a {} ;\n      ?p ?o .\n  }}\n  {}\n}}",
        escape_uri(public_graph.as_str()),
        escape_uri(source_graph.as_str()),
        escape_uri(&rule.subject_type),
        rule.eligibility_filter.as_deref().unwrap_or_default(),
    )
}

/// Copy every subject of the rule's type into the organization graphs of
/// the unit its path leads to.
pub fn dispatch_all_org(
    rule: &RuleEntry,
    destinations: &DestinationRule,
    source_graph: &GraphId,
) -> String {
    format!(
        "{PREFIXES}INSERT {{\n  GRAPH ?graph {{ ?subject ?p ?o . }}\n}}\nWHERE {{\n  GRAPH {} {{\n    ?subject a {} ;\n      ?p ?o .\n  }}\n  {}\n  BIND(?anchor AS ?unit)\n  {}\n  BIND(IRI(CONCAT({}, STR(?uuid), {})) AS ?graph)\n}}",
        escape_uri(source_graph.as_str()),
        escape_uri(&rule.subject_type),
        rule.path_to_unit.as_deref().unwrap_or_default(),
        destinations.path,
        escape_string(&destinations.graph_prefix),
        escape_string(&destinations.graph_suffix),
    )
}

// =========================================================================
// Job audit trail
// =========================================================================

pub fn insert_job(
    jobs_graph: &str,
    uri: &str,
    id: &str,
    operation: &str,
    creator: &str,
    status: JobStatus,
    created: &DateTime<Utc>,
) -> String {
    format!(
        "{PREFIXES}INSERT DATA {{\n  GRAPH {} {{\n    {} a {} ;\n      mu:uuid {} ;\n      dct:creator {} ;\n      adms:status {} ;\n      dct:created {} ;\n      dct:modified {} ;\n      task:operation {} .\n  }}\n}}",
        escape_uri(jobs_graph),
        escape_uri(uri),
        escape_uri(vocab::JOB_TYPE),
        escape_string(id),
        escape_uri(creator),
        escape_uri(status.as_iri()),
        escape_datetime(created),
        escape_datetime(created),
        escape_uri(operation),
    )
}

#[allow(clippy::too_many_arguments)]
pub fn insert_task(
    jobs_graph: &str,
    uri: &str,
    id: &str,
    job_uri: &str,
    index: &str,
    operation: &str,
    status: JobStatus,
    created: &DateTime<Utc>,
) -> String {
    format!(
        "{PREFIXES}INSERT DATA {{\n  GRAPH {} {{\n    {} a {} ;\n      mu:uuid {} ;\n      dct:isPartOf {} ;\n      dct:created {} ;\n      dct:modified {} ;\n      adms:status {} ;\n      task:index {} ;\n      task:operation {} .\n  }}\n}}",
        escape_uri(jobs_graph),
        escape_uri(uri),
        escape_uri(vocab::TASK_TYPE),
        escape_string(id),
        escape_uri(job_uri),
        escape_datetime(created),
        escape_datetime(created),
        escape_uri(status.as_iri()),
        escape_string(index),
        escape_uri(operation),
    )
}

/// Replace the status and modification time of a job or task, in whatever
/// graph it lives.
pub fn update_status(uri: &str, status: JobStatus, modified: &DateTime<Utc>) -> String {
    format!(
        "{PREFIXES}DELETE {{\n  GRAPH ?g {{\n    ?subject adms:status ?status .\n    ?subject dct:modified ?modified .\n  }}\n}}\nINSERT {{\n  GRAPH ?g {{\n    ?subject adms:status {} ;\n      dct:modified {} .\n  }}\n}}\nWHERE {{\n  BIND({} AS ?subject)\n  GRAPH ?g {{\n    ?subject adms:status ?status .\n    OPTIONAL {{ ?subject dct:modified ?modified . }}\n  }}\n}}",
        escape_uri(status.as_iri()),
        escape_datetime(modified),
        escape_uri(uri),
    )
}

pub fn latest_job(operation: &str, creator: &str) -> String {
    format!(
        "{PREFIXES}SELECT DISTINCT ?job ?uuid ?status ?created WHERE {{\n  ?job a {} ;\n    mu:uuid ?uuid ;\n    task:operation {} ;\n    dct:creator {} ;\n    adms:status ?status ;\n    dct:created ?created .\n}}\nORDER BY DESC(?created)\nLIMIT 1",
        escape_uri(vocab::JOB_TYPE),
        escape_uri(operation),
        escape_uri(creator),
    )
}

pub fn tasks_of(job_uri: &str) -> String {
    format!(
        "{PREFIXES}SELECT DISTINCT ?task WHERE {{\n  ?task dct:isPartOf {} .\n}}",
        escape_uri(job_uri),
    )
}

pub fn has_successful_job(operation: &str) -> String {
    format!(
        "{PREFIXES}ASK {{\n  ?job a {} ;\n    task:operation {} ;\n    adms:status {} .\n}}",
        escape_uri(vocab::JOB_TYPE),
        escape_uri(operation),
        escape_uri(vocab::STATUS_SUCCESS),
    )
}

pub fn insert_job_error(jobs_graph: &str, uri: &str, id: &str, job_uri: &str, message: &str) -> String {
    format!(
        "{PREFIXES}INSERT DATA {{\n  GRAPH {} {{\n    {} a {}, {} ;\n      mu:uuid {} ;\n      oslc:message {} .\n    {} task:error {} .\n  }}\n}}",
        escape_uri(jobs_graph),
        escape_uri(uri),
        escape_uri(vocab::ERROR_TYPE),
        escape_uri(vocab::DISPATCH_ERROR_TYPE),
        escape_string(id),
        escape_string(message),
        escape_uri(job_uri),
        escape_uri(uri),
    )
}

// =========================================================================
// Operator alerts
// =========================================================================

pub fn insert_alert(
    error_graph: &str,
    uri: &str,
    id: &str,
    creator: &str,
    alert: &Alert,
    created: &DateTime<Utc>,
) -> String {
    let mut extra = String::new();
    if let Some(reference) = &alert.reference {
        extra.push_str(&format!(
            "    {} dct:references {} .\n",
            escape_uri(uri),
            escape_uri(reference)
        ));
    }
    if let Some(detail) = &alert.detail {
        extra.push_str(&format!(
            "    {} oslc:largePreview {} .\n",
            escape_uri(uri),
            escape_string(detail)
        ));
    }

    format!(
        "{PREFIXES}INSERT DATA {{\n  GRAPH {} {{\n    {} a oslc:Error ;\n      mu:uuid {} ;\n      dct:subject {} ;\n      oslc:message {} ;\n      dct:created {} ;\n      dct:creator {} .\n{extra}  }}\n}}",
        escape_uri(error_graph),
        escape_uri(uri),
        escape_string(id),
        escape_string("Dispatch worship positions"),
        escape_string(&alert.message),
        escape_datetime(created),
        escape_uri(creator),
    )
}
