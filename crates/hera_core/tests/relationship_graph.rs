use hera_core::repo::relationship_repo::RelationshipListQuery;
use hera_core::service::entity_service::NewEntity;
use hera_core::service::organization_service::NewOrganization;
use hera_core::service::relationship_service::RelationshipInput;
use hera_core::{
    open_db, open_db_in_memory, EngineError, EntityService, OrganizationService,
    RelationshipGraph, SmartCode, SmartCodeRegistry,
};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::sync::{Arc, Barrier};
use std::thread;
use uuid::Uuid;

const STATUS_CODE: &str = "HERA.SALON.APPOINTMENT.WORKFLOW.STATUS.v1";

fn create_org(conn: &Connection, code: &str) -> Uuid {
    OrganizationService::new(conn)
        .create(NewOrganization {
            organization_name: format!("{code} Salon"),
            organization_code: code.to_string(),
            organization_type: None,
            industry: Some("beauty".to_string()),
            parent_organization_id: None,
            settings: Value::Null,
        })
        .unwrap()
        .id
}

fn create_entity(conn: &Connection, org: Uuid, entity_type: &str, name: &str) -> Uuid {
    let registry = SmartCodeRegistry::default();
    let smart_code = SmartCode::parse("HERA.SALON.ENTITY.v1").unwrap();
    EntityService::new(conn, &registry)
        .create(org, None, NewEntity::new(entity_type, name, smart_code), &[], Vec::new())
        .unwrap()
        .entity
        .id
}

fn status_edge(from: Uuid, to: Uuid) -> RelationshipInput {
    RelationshipInput::new(from, to, "HAS_STATUS")
        .with_smart_code(SmartCode::parse(STATUS_CODE).unwrap())
}

fn active_edge_count(conn: &Connection, from: Uuid, relationship_type: &str) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM relationships
         WHERE from_entity_id = ?1 AND relationship_type = ?2 AND is_active = 1;",
        [from.to_string(), relationship_type.to_string()],
        |row| row.get(0),
    )
    .unwrap()
}

#[test]
fn workflow_upsert_swaps_the_active_edge() {
    let conn = open_db_in_memory().unwrap();
    let registry = SmartCodeRegistry::default();
    let graph = RelationshipGraph::new(&conn, &registry);
    let org = create_org(&conn, "SALON");
    let appointment = create_entity(&conn, org, "appointment", "Cut & colour");
    let booked = create_entity(&conn, org, "workflow_status", "Booked");
    let done = create_entity(&conn, org, "workflow_status", "Completed");

    let first = graph.upsert(org, status_edge(appointment, booked)).unwrap();
    let second = graph.upsert(org, status_edge(appointment, done)).unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(active_edge_count(&conn, appointment, "HAS_STATUS"), 1);
    let previous = graph.get(org, first.id).unwrap();
    assert!(!previous.is_active);
    assert!(previous.ended_at.is_some());

    let current = graph
        .current_state(org, appointment, "HAS_STATUS")
        .unwrap()
        .expect("current status");
    assert_eq!(current.id, done);
    assert_eq!(current.entity_name, "Completed");
}

#[test]
fn same_target_upsert_merges_data_in_place() {
    let conn = open_db_in_memory().unwrap();
    let registry = SmartCodeRegistry::default();
    let graph = RelationshipGraph::new(&conn, &registry);
    let org = create_org(&conn, "SALON");
    let customer = create_entity(&conn, org, "customer", "Jane");
    let stylist = create_entity(&conn, org, "employee", "Sam");

    let mut input = RelationshipInput::new(customer, stylist, "PREFERS");
    input.relationship_data = json!({ "since": "2025" });
    let first = graph.upsert(org, input).unwrap();

    let mut again = RelationshipInput::new(customer, stylist, "PREFERS");
    again.relationship_data = json!({ "rank": 1 });
    let merged = graph.upsert(org, again).unwrap();

    assert_eq!(merged.id, first.id);
    assert_eq!(merged.relationship_data, json!({ "since": "2025", "rank": 1 }));
}

#[test]
fn plain_edges_refuse_to_be_replaced_by_upsert() {
    let conn = open_db_in_memory().unwrap();
    let registry = SmartCodeRegistry::default();
    let graph = RelationshipGraph::new(&conn, &registry);
    let org = create_org(&conn, "SALON");
    let customer = create_entity(&conn, org, "customer", "Jane");
    let sam = create_entity(&conn, org, "employee", "Sam");
    let alex = create_entity(&conn, org, "employee", "Alex");

    graph
        .upsert(org, RelationshipInput::new(customer, sam, "PREFERS"))
        .unwrap();
    let err = graph
        .upsert(org, RelationshipInput::new(customer, alex, "PREFERS"))
        .expect_err("single active edge");
    assert_eq!(err.code(), "ACTIVE_EDGE_CONFLICT");

    let moved = graph
        .transition(org, RelationshipInput::new(customer, alex, "PREFERS"), Some(sam))
        .unwrap();
    assert_eq!(moved.to_entity_id, alex);
    assert_eq!(active_edge_count(&conn, customer, "PREFERS"), 1);
}

#[test]
fn transition_with_stale_expectation_conflicts() {
    let conn = open_db_in_memory().unwrap();
    let registry = SmartCodeRegistry::default();
    let graph = RelationshipGraph::new(&conn, &registry);
    let org = create_org(&conn, "SALON");
    let appointment = create_entity(&conn, org, "appointment", "Trim");
    let booked = create_entity(&conn, org, "workflow_status", "Booked");
    let arrived = create_entity(&conn, org, "workflow_status", "Arrived");
    let done = create_entity(&conn, org, "workflow_status", "Completed");

    graph.upsert(org, status_edge(appointment, booked)).unwrap();
    graph
        .transition(org, status_edge(appointment, arrived), Some(booked))
        .unwrap();

    let err = graph
        .transition(org, status_edge(appointment, done), Some(booked))
        .expect_err("stale expectation");
    assert!(matches!(err, EngineError::ActiveEdgeConflict(_)));

    let noop = graph
        .transition(org, status_edge(appointment, arrived), None)
        .unwrap();
    assert_eq!(noop.to_entity_id, arrived);
    assert_eq!(active_edge_count(&conn, appointment, "HAS_STATUS"), 1);
}

#[test]
fn invalid_edges_are_rejected() {
    let conn = open_db_in_memory().unwrap();
    let registry = SmartCodeRegistry::default();
    let graph = RelationshipGraph::new(&conn, &registry);
    let org = create_org(&conn, "SALON");
    let jane = create_entity(&conn, org, "customer", "Jane");

    let err = graph
        .upsert(org, RelationshipInput::new(jane, jane, "KNOWS"))
        .expect_err("self loop");
    assert_eq!(err.code(), "VALIDATION_ERROR");

    let err = graph
        .upsert(org, RelationshipInput::new(jane, Uuid::new_v4(), "KNOWS"))
        .expect_err("missing target");
    assert_eq!(err.code(), "NOT_FOUND");

    let other = create_entity(&conn, org, "customer", "Joe");
    let mut window = RelationshipInput::new(jane, other, "KNOWS");
    window.effective_date = Some(2_000);
    window.expiration_date = Some(1_000);
    assert_eq!(
        graph.upsert(org, window).expect_err("window").code(),
        "VALIDATION_ERROR"
    );
}

#[test]
fn deactivate_keeps_history_and_list_filters_it() {
    let conn = open_db_in_memory().unwrap();
    let registry = SmartCodeRegistry::default();
    let graph = RelationshipGraph::new(&conn, &registry);
    let org = create_org(&conn, "SALON");
    let jane = create_entity(&conn, org, "customer", "Jane");
    let sam = create_entity(&conn, org, "employee", "Sam");

    let edge = graph
        .upsert(org, RelationshipInput::new(jane, sam, "PREFERS"))
        .unwrap();
    let ended = graph.deactivate(org, edge.id).unwrap();
    assert!(!ended.is_active);
    assert!(ended.ended_at.is_some());
    assert_eq!(graph.deactivate(org, edge.id).unwrap(), ended);

    let query = RelationshipListQuery {
        from_entity_id: Some(jane),
        ..RelationshipListQuery::default()
    };
    assert!(graph.list(org, &query).unwrap().is_empty());
    let history = RelationshipListQuery {
        include_inactive: true,
        ..query
    };
    assert_eq!(graph.list(org, &history).unwrap().len(), 1);
    assert!(graph.current_state(org, jane, "PREFERS").unwrap().is_none());
}

#[test]
fn edges_stay_inside_their_organization() {
    let conn = open_db_in_memory().unwrap();
    let registry = SmartCodeRegistry::default();
    let graph = RelationshipGraph::new(&conn, &registry);
    let org_a = create_org(&conn, "ALPHA");
    let org_b = create_org(&conn, "BRAVO");
    let appointment = create_entity(&conn, org_a, "appointment", "Trim");
    let booked = create_entity(&conn, org_a, "workflow_status", "Booked");
    let foreign = create_entity(&conn, org_b, "workflow_status", "Elsewhere");

    let edge = graph.upsert(org_a, status_edge(appointment, booked)).unwrap();

    assert!(matches!(
        graph.get(org_b, edge.id),
        Err(EngineError::NotFound { .. })
    ));
    let query = RelationshipListQuery {
        from_entity_id: Some(appointment),
        include_inactive: true,
        ..RelationshipListQuery::default()
    };
    assert!(graph.list(org_b, &query).unwrap().is_empty());
    assert!(graph.list(org_b, &RelationshipListQuery::default()).unwrap().is_empty());
    assert!(graph
        .current_state(org_b, appointment, "HAS_STATUS")
        .unwrap()
        .is_none());
    assert!(matches!(
        graph.deactivate(org_b, edge.id),
        Err(EngineError::NotFound { .. })
    ));

    let err = graph
        .upsert(org_a, status_edge(appointment, foreign))
        .expect_err("target from another organization");
    assert_eq!(err.code(), "NOT_FOUND");
    let err = graph
        .transition(org_b, status_edge(appointment, foreign), Some(booked))
        .expect_err("source from another organization");
    assert_eq!(err.code(), "NOT_FOUND");

    let current = graph
        .current_state(org_a, appointment, "HAS_STATUS")
        .unwrap()
        .expect("status unchanged");
    assert_eq!(current.id, booked);
    assert!(graph.get(org_a, edge.id).unwrap().is_active);
}

#[test]
fn concurrent_transitions_leave_exactly_one_active_edge() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.db");
    let conn = open_db(&path).unwrap();
    let org = create_org(&conn, "SALON");
    let appointment = create_entity(&conn, org, "appointment", "Colour");
    let targets: Vec<Uuid> = (0..6)
        .map(|index| create_entity(&conn, org, "workflow_status", &format!("Status {index}")))
        .collect();
    drop(conn);

    let barrier = Arc::new(Barrier::new(targets.len()));
    let handles: Vec<_> = targets
        .iter()
        .copied()
        .map(|target| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                let registry = SmartCodeRegistry::default();
                let graph = RelationshipGraph::new(&conn, &registry);
                barrier.wait();
                graph
                    .transition(org, status_edge(appointment, target), None)
                    .unwrap()
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    assert_eq!(results.len(), targets.len());

    let conn = open_db(&path).unwrap();
    assert_eq!(active_edge_count(&conn, appointment, "HAS_STATUS"), 1);
    let total: i64 = conn
        .query_row("SELECT COUNT(*) FROM relationships;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(total, targets.len() as i64);
}
