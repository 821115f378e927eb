use std::collections::BTreeSet;

use async_trait::async_trait;
use dispatcher_common::{
    DerivedFactKind, DestinationClass, DestinationRule, Destinations, DispatchResult, GraphId,
    RuleEntry, Subject,
};
use dispatcher_engine::StoreGateway;
use tracing::{debug, info};

use crate::client::{values, SparqlClient};
use crate::queries::{self, ClassScope};

/// `StoreGateway` over the SPARQL endpoint.
///
/// Live dispatch goes through `client`. Store-wide work (bulk dispatch and
/// store-wide enrichment) goes through `bulk`, which may point straight at
/// the database.
pub struct SparqlGateway {
    client: SparqlClient,
    bulk: SparqlClient,
    source_graph: GraphId,
    public_graph: GraphId,
    destinations: DestinationRule,
    scope: ClassScope,
}

impl SparqlGateway {
    pub fn new(
        client: SparqlClient,
        bulk: SparqlClient,
        source_graph: GraphId,
        public_graph: GraphId,
        destinations: DestinationRule,
    ) -> Self {
        let scope = ClassScope::new(&public_graph, &destinations);
        Self {
            client,
            bulk,
            source_graph,
            public_graph,
            destinations,
            scope,
        }
    }
}

#[async_trait]
impl StoreGateway for SparqlGateway {
    async fn is_reachable(&self) -> bool {
        match self.client.ask(&queries::ping()).await {
            Ok(_) => true,
            Err(e) => {
                debug!(endpoint = %self.client.endpoint(), error = %e, "Store ping failed");
                false
            }
        }
    }

    async fn types_of(&self, subject: &Subject) -> DispatchResult<BTreeSet<String>> {
        let bindings = self.client.select(&queries::types_of(subject)).await?;
        Ok(values(&bindings, "type").into_iter().collect())
    }

    async fn evaluate_filter(&self, subject: &Subject, rule: &RuleEntry) -> DispatchResult<bool> {
        if rule.eligibility_filter.is_none() {
            return Ok(true);
        }
        Ok(self.client.ask(&queries::passes_filter(subject, rule)).await?)
    }

    async fn owning_unit(
        &self,
        subject: &Subject,
        rule: &RuleEntry,
    ) -> DispatchResult<Option<Subject>> {
        let bindings = self.client.select(&queries::owning_unit(subject, rule)).await?;
        Ok(values(&bindings, "anchor").into_iter().next().map(Subject::from))
    }

    async fn resolve_related(
        &self,
        anchor: &Subject,
        subject_type: Option<&str>,
        path: &str,
        placed_in: Option<&Destinations>,
    ) -> DispatchResult<BTreeSet<Subject>> {
        let query = queries::related_subjects(
            anchor,
            subject_type,
            path,
            placed_in,
            &self.scope,
            &self.source_graph,
        );
        let bindings = self.client.select(&query).await?;
        Ok(values(&bindings, "subject")
            .into_iter()
            .map(Subject::from)
            .collect())
    }

    async fn destination_graphs_for(&self, unit: &Subject) -> DispatchResult<BTreeSet<GraphId>> {
        let query = queries::destination_uuids(unit, &self.destinations);
        let bindings = self.client.select(&query).await?;
        Ok(values(&bindings, "uuid")
            .iter()
            .map(|uuid| self.destinations.graph_for(uuid))
            .collect())
    }

    async fn copy_subject_data(
        &self,
        subject: &Subject,
        destinations: &Destinations,
    ) -> DispatchResult<()> {
        if !destinations.is_empty() {
            let copy = queries::copy_into_graphs(subject, &destinations.graphs, &self.source_graph);
            self.client.update(&copy).await?;
        }
        let retract =
            queries::retract_elsewhere(subject, destinations, &self.scope, &self.source_graph);
        self.client.update(&retract).await?;
        debug!(
            subject = %subject,
            class = %destinations.class,
            graphs = destinations.len(),
            "Copied subject"
        );
        Ok(())
    }

    async fn insert_derived_facts(
        &self,
        subject: Option<&Subject>,
        kind: DerivedFactKind,
    ) -> DispatchResult<()> {
        let update = match kind {
            DerivedFactKind::RepresentativeOrganMarker => {
                queries::representative_organ_marker(subject)
            }
            DerivedFactKind::ExternalIdentifier => queries::external_identifier(subject),
        };
        let client = if subject.is_some() { &self.client } else { &self.bulk };
        client.update(&update).await?;
        Ok(())
    }

    async fn dispatch_all(&self, rule: &RuleEntry) -> DispatchResult<()> {
        let update = match rule.destination_class {
            DestinationClass::Public => {
                queries::dispatch_all_public(rule, &self.source_graph, &self.public_graph)
            }
            DestinationClass::Org => {
                queries::dispatch_all_org(rule, &self.destinations, &self.source_graph)
            }
        };
        self.bulk.update(&update).await?;
        info!(rule = %rule.subject_type, class = %rule.destination_class, "Bulk dispatched rule");
        Ok(())
    }
}
