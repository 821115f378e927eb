//! Query builders: the right variables bound, the right graphs touched.

use std::collections::BTreeSet;

use chrono::{TimeZone, Utc};
use dispatcher_common::{
    Alert, DestinationClass, DestinationRule, Destinations, GraphId, JobStatus, RuleEntry, Subject,
};
use dispatcher_store::queries::{self, ClassScope};

const SOURCE: &str = "http://mu.semte.ch/graphs/ingest";
const PUBLIC: &str = "http://mu.semte.ch/graphs/public";
const ORG_SCOPE: &str = r#"STRSTARTS(STR(?g), """http://mu.semte.ch/graphs/organizations/""") && STRENDS(STR(?g), """/view""")"#;

fn source() -> GraphId {
    GraphId::new(SOURCE)
}

fn public_rule(filter: Option<&str>) -> RuleEntry {
    RuleEntry {
        subject_type: "http://ex.org/Unit".into(),
        destination_class: DestinationClass::Public,
        eligibility_filter: filter.map(String::from),
        path_to_unit: None,
        cascade_triggers: vec![],
        derived_facts: vec![],
    }
}

fn org_rule() -> RuleEntry {
    RuleEntry {
        subject_type: "http://ex.org/Mandate".into(),
        destination_class: DestinationClass::Org,
        eligibility_filter: None,
        path_to_unit: Some("?anchor <http://ex.org/hasMandate> ?subject .".into()),
        cascade_triggers: vec![],
        derived_facts: vec![],
    }
}

fn destinations() -> DestinationRule {
    DestinationRule {
        path: "?v <http://ex.org/sees> ?unit ; <http://ex.org/uuid> ?uuid .".into(),
        graph_prefix: "http://mu.semte.ch/graphs/organizations/".into(),
        graph_suffix: "/view".into(),
    }
}

fn graphs(list: &[&str]) -> BTreeSet<GraphId> {
    list.iter().map(|g| GraphId::from(*g)).collect()
}

fn scope() -> ClassScope {
    ClassScope::new(&GraphId::new(PUBLIC), &destinations())
}

// =========================================================================
// Lookups
// =========================================================================

#[test]
fn filter_query_binds_subject_and_splices_the_pattern() {
    let q = queries::passes_filter(
        &Subject::from("http://ex.org/U1"),
        &public_rule(Some("?subject <http://ex.org/kind> <http://ex.org/Municipality> .")),
    );

    assert!(q.contains("ASK {"));
    assert!(q.contains("BIND(<http://ex.org/U1> AS ?subject)"));
    assert!(q.contains("?subject a <http://ex.org/Unit> ."));
    assert!(q.contains("?subject <http://ex.org/kind> <http://ex.org/Municipality> ."));
}

#[test]
fn unit_lookup_selects_the_anchor() {
    let q = queries::owning_unit(&Subject::from("http://ex.org/M1"), &org_rule());

    assert!(q.contains("SELECT DISTINCT ?anchor"));
    assert!(q.contains("BIND(<http://ex.org/M1> AS ?subject)"));
    assert!(q.contains("?anchor <http://ex.org/hasMandate> ?subject ."));
    assert!(q.trim_end().ends_with("LIMIT 1"));
}

#[test]
fn destination_query_binds_the_unit() {
    let q = queries::destination_uuids(&Subject::from("http://ex.org/UNIT"), &destinations());

    assert!(q.contains("SELECT DISTINCT ?uuid"));
    assert!(q.contains("BIND(<http://ex.org/UNIT> AS ?unit)"));
}

#[test]
fn related_query_without_exclusion_has_no_graph_clauses() {
    let q = queries::related_subjects(
        &Subject::from("http://ex.org/U3"),
        None,
        "?subject <http://ex.org/partOf> ?anchor .",
        None,
        &scope(),
        &source(),
    );

    assert!(q.contains("BIND(<http://ex.org/U3> AS ?anchor)"));
    assert!(!q.contains("?subject a "));
    assert!(!q.contains("MINUS"));
    assert!(!q.contains("NOT IN"));
}

#[test]
fn related_query_with_exclusion_finds_misplaced_and_missing_subjects() {
    let dest = Destinations::org(graphs(&["http://ex.org/g1", "http://ex.org/g2"]));
    let q = queries::related_subjects(
        &Subject::from("http://ex.org/UNIT"),
        Some("http://ex.org/Mandate"),
        "?anchor <http://ex.org/hasMandate> ?subject .",
        Some(&dest),
        &scope(),
        &source(),
    );

    assert!(q.contains("?subject a <http://ex.org/Mandate> ."));
    assert!(q.contains(&format!(
        "FILTER (?g NOT IN (<http://ex.org/g1>, <http://ex.org/g2>, <{SOURCE}>))"
    )));
    assert!(q.contains(&format!("FILTER ({ORG_SCOPE})")));
    assert!(q.contains("UNION"));
    assert!(q.contains(&format!("GRAPH <{SOURCE}> {{ ?subject ?p ?o . }}")));
    assert!(q.contains("MINUS"));
    assert!(q.contains("GRAPH <http://ex.org/g2> { ?subject ?p ?o . }"));
}

// =========================================================================
// Copy and retract
// =========================================================================

#[test]
fn copy_reads_from_the_source_graph_into_every_destination() {
    let q = queries::copy_into_graphs(
        &Subject::from("http://ex.org/U1"),
        &graphs(&["http://ex.org/g1", "http://ex.org/g2"]),
        &source(),
    );

    assert!(q.contains("GRAPH <http://ex.org/g1> { ?s ?p ?o . }"));
    assert!(q.contains("GRAPH <http://ex.org/g2> { ?s ?p ?o . }"));
    assert!(q.contains(&format!("GRAPH <{SOURCE}> {{ ?s ?p ?o . }}")));
    assert!(q.contains("BIND(<http://ex.org/U1> AS ?s)"));
}

#[test]
fn public_retract_stays_inside_the_public_graph() {
    let q = queries::retract_elsewhere(
        &Subject::from("http://ex.org/U1"),
        &Destinations::public(GraphId::new(PUBLIC)),
        &scope(),
        &source(),
    );

    assert!(q.starts_with("DELETE {"));
    assert!(q.contains(&format!("FILTER (?g NOT IN (<{PUBLIC}>, <{SOURCE}>))")));
    assert!(q.contains(&format!("FILTER (?g = <{PUBLIC}>)")));
    assert!(!q.contains("organizations"));
}

#[test]
fn org_retract_only_touches_organization_graphs() {
    let q = queries::retract_elsewhere(
        &Subject::from("http://ex.org/M1"),
        &Destinations::org(graphs(&["http://mu.semte.ch/graphs/organizations/o1/view"])),
        &scope(),
        &source(),
    );

    assert!(q.contains(&format!(
        "FILTER (?g NOT IN (<http://mu.semte.ch/graphs/organizations/o1/view>, <{SOURCE}>))"
    )));
    assert!(q.contains(&format!("FILTER ({ORG_SCOPE})")));
    assert!(!q.contains(PUBLIC));
}

#[test]
fn org_scope_without_suffix_only_checks_the_prefix() {
    let rule = DestinationRule {
        graph_suffix: String::new(),
        ..destinations()
    };
    let scope = ClassScope::new(&GraphId::new(PUBLIC), &rule);

    assert_eq!(
        scope.condition(DestinationClass::Org),
        r#"STRSTARTS(STR(?g), """http://mu.semte.ch/graphs/organizations/""")"#
    );
    assert_eq!(scope.condition(DestinationClass::Public), format!("?g = <{PUBLIC}>"));
}

#[test]
fn hostile_subject_iri_stays_inside_its_brackets() {
    let q = queries::types_of(&Subject::from("http://ex.org/x> } ; DROP ALL ; {<y"));
    assert!(q.contains("<http://ex.org/x\\> } ; DROP ALL ; {\\<y>"));
}

// =========================================================================
// Derived facts and bulk
// =========================================================================

#[test]
fn derived_facts_are_scoped_to_one_subject_or_the_whole_store() {
    let ro = Subject::from("http://ex.org/RO");

    let one = queries::representative_organ_marker(Some(&ro));
    assert!(one.contains("BIND(<http://ex.org/RO> AS ?ro)"));

    let all = queries::representative_organ_marker(None);
    assert!(!all.contains("BIND("));
    assert!(all.contains("besluit:Bestuurseenheid"));

    let kbo = queries::external_identifier(Some(&Subject::from("http://ex.org/B")));
    assert!(kbo.contains("BIND(<http://ex.org/B> AS ?bestuur)"));
    assert!(kbo.contains("\"KBO nummer\""));
    assert!(kbo.contains("?bestuur dct:identifier ?kbo"));
}

#[test]
fn bulk_public_dispatch_applies_the_filter() {
    let q = queries::dispatch_all_public(
        &public_rule(Some("?subject <http://ex.org/kind> ?k .")),
        &source(),
        &GraphId::new("http://mu.semte.ch/graphs/public"),
    );

    assert!(q.contains("GRAPH <http://mu.semte.ch/graphs/public> { ?subject ?p ?o . }"));
    assert!(q.contains("?subject a <http://ex.org/Unit> ;"));
    assert!(q.contains("?subject <http://ex.org/kind> ?k ."));
}

#[test]
fn bulk_org_dispatch_joins_unit_path_and_destinations() {
    let q = queries::dispatch_all_org(&org_rule(), &destinations(), &source());

    assert!(q.contains("?anchor <http://ex.org/hasMandate> ?subject ."));
    assert!(q.contains("BIND(?anchor AS ?unit)"));
    assert!(q.contains("?v <http://ex.org/sees> ?unit"));
    assert!(q.contains(
        "BIND(IRI(CONCAT(\"\"\"http://mu.semte.ch/graphs/organizations/\"\"\", STR(?uuid), \"\"\"/view\"\"\")) AS ?graph)"
    ));
}

// =========================================================================
// Jobs and alerts
// =========================================================================

#[test]
fn job_insert_carries_status_and_operation() {
    let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let q = queries::insert_job(
        "http://mu.semte.ch/graphs/dispatcher-jobs",
        "http://redpencil.data.gift/id/jobs/abc",
        "abc",
        "http://ex.org/op",
        "http://ex.org/creator",
        JobStatus::Busy,
        &at,
    );

    assert!(q.contains("GRAPH <http://mu.semte.ch/graphs/dispatcher-jobs>"));
    assert!(q.contains("adms:status <http://redpencil.data.gift/id/concept/JobStatus/busy>"));
    assert!(q.contains("task:operation <http://ex.org/op>"));
    assert!(q.contains("mu:uuid \"\"\"abc\"\"\""));
}

#[test]
fn status_update_replaces_the_previous_status() {
    let q = queries::update_status(
        "http://ex.org/job",
        JobStatus::Failed,
        &Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    );

    assert!(q.contains("DELETE {"));
    assert!(q.contains("?subject adms:status ?status ."));
    assert!(q.contains("adms:status <http://redpencil.data.gift/id/concept/JobStatus/failed>"));
    assert!(q.contains("BIND(<http://ex.org/job> AS ?subject)"));
}

#[test]
fn alert_optional_fields_only_when_present() {
    let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let bare = queries::insert_alert(
        "http://mu.semte.ch/graphs/error",
        "http://data.lblod.info/errors/1",
        "1",
        "http://ex.org/creator",
        &Alert::new("boom"),
        &at,
    );
    assert!(bare.contains("oslc:message \"\"\"boom\"\"\""));
    assert!(!bare.contains("dct:references"));
    assert!(!bare.contains("oslc:largePreview"));

    let full = queries::insert_alert(
        "http://mu.semte.ch/graphs/error",
        "http://data.lblod.info/errors/2",
        "2",
        "http://ex.org/creator",
        &Alert::new("boom")
            .with_detail("stack \"trace\"")
            .with_reference("http://ex.org/U1"),
        &at,
    );
    assert!(full.contains("dct:references <http://ex.org/U1>"));
    assert!(full.contains("oslc:largePreview \"\"\"stack \\\"trace\\\"\"\"\""));
}
