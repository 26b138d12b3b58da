use hera_core::{open_db_in_memory, Noun, Orchestrator, ResponseEnvelope, SmartCodeRegistry};
use rusqlite::Connection;
use serde_json::{json, Value};

struct Harness {
    conn: Connection,
    registry: SmartCodeRegistry,
}

impl Harness {
    fn new() -> Self {
        Self {
            conn: open_db_in_memory().unwrap(),
            registry: SmartCodeRegistry::default(),
        }
    }

    fn call(&self, noun: Noun, request: Value) -> ResponseEnvelope {
        Orchestrator::new(&self.conn, &self.registry).dispatch_json(noun, &request.to_string())
    }

    fn ok(&self, noun: Noun, request: Value) -> Value {
        let response = self.call(noun, request);
        assert!(response.success, "unexpected failure: {response:?}");
        response.data.expect("data")
    }

    fn create_org(&self, code: &str) -> String {
        let data = self.ok(
            Noun::Organization,
            json!({
                "action": "CREATE",
                "payload": { "organization": {
                    "organization_name": format!("{code} Org"),
                    "organization_code": code
                } }
            }),
        );
        data["id"].as_str().unwrap().to_string()
    }

    fn create_entity(&self, org: &str, entity_type: &str, name: &str, dynamic: Value) -> String {
        let data = self.ok(
            Noun::Entity,
            json!({
                "action": "CREATE",
                "organization_id": org,
                "payload": {
                    "entity": {
                        "entity_type": entity_type,
                        "entity_name": name,
                        "smart_code": "HERA.RETAIL.PRODUCT.ITEM.v1"
                    },
                    "dynamic": dynamic
                }
            }),
        );
        data["id"].as_str().unwrap().to_string()
    }
}

#[test]
fn widget_scenario_archives_referenced_and_removes_unreferenced_entities() {
    let harness = Harness::new();
    let org = harness.create_org("SHOP");

    let widget = harness.create_entity(&org, "product", "Widget", json!({ "price": 10 }));
    let read = harness.ok(
        Noun::Entity,
        json!({ "action": "READ", "organization_id": org, "options": { "where": { "id": widget } } }),
    );
    assert_eq!(read["dynamic"]["price"], json!(10));
    assert_eq!(read["entity_name"], json!("Widget"));

    harness.ok(
        Noun::Transaction,
        json!({
            "action": "CREATE",
            "organization_id": org,
            "payload": {
                "header": { "transaction_type": "sale", "smart_code": "HERA.RETAIL.POS.SALE.v1" },
                "lines": [ { "line_type": "item", "entity_id": widget, "quantity": 2, "unit_amount": 10 } ]
            }
        }),
    );

    let deleted = harness.ok(
        Noun::Entity,
        json!({ "action": "DELETE", "organization_id": org, "options": { "where": { "id": widget } } }),
    );
    assert_eq!(deleted["action_performed"], json!("ARCHIVE"));
    assert_eq!(deleted["entity"]["status"], json!("archived"));

    let audit = harness.ok(
        Noun::Entity,
        json!({
            "action": "READ",
            "organization_id": org,
            "options": { "where": { "id": widget }, "include_deleted": true }
        }),
    );
    assert_eq!(audit["status"], json!("archived"));

    let gadget = harness.create_entity(&org, "product", "Gadget", json!({}));
    let deleted = harness.ok(
        Noun::Entity,
        json!({ "action": "DELETE", "organization_id": org, "options": { "where": gadget } }),
    );
    assert_eq!(deleted["action_performed"], json!("DELETE"));

    let gone = harness.call(
        Noun::Entity,
        json!({
            "action": "READ",
            "organization_id": org,
            "options": { "where": { "id": gadget }, "include_deleted": true }
        }),
    );
    assert!(!gone.success);
    assert_eq!(gone.error_code(), Some("NOT_FOUND"));
}

#[test]
fn update_response_matches_the_next_read() {
    let harness = Harness::new();
    let org = harness.create_org("SHOP");

    let created = harness.ok(
        Noun::Transaction,
        json!({
            "action": "CREATE",
            "organization_id": org,
            "payload": {
                "header": {
                    "transaction_type": "journal_entry",
                    "smart_code": "HERA.FIN.GL.JOURNAL.v1",
                    "status": "draft",
                    "metadata": { "source": "import" }
                },
                "lines": [
                    { "line_type": "GL", "line_amount": 25, "line_data": { "side": "dr" } },
                    { "line_type": "GL", "line_amount": 25, "line_data": { "side": "cr" } }
                ]
            }
        }),
    );
    let id = created["header"]["id"].as_str().unwrap().to_string();

    let updated = harness.ok(
        Noun::Transaction,
        json!({
            "action": "UPDATE",
            "organization_id": org,
            "options": { "where": { "id": id } },
            "payload": { "patch": { "status": "approved", "metadata": { "reviewed": true } } }
        }),
    );
    let read = harness.ok(
        Noun::Transaction,
        json!({ "action": "READ", "organization_id": org, "options": { "where": id } }),
    );

    for field in ["status", "metadata", "updated_at"] {
        assert_eq!(updated["header"][field], read["header"][field], "{field} is stale");
    }
    assert_eq!(read["header"]["status"], json!("approved"));
    assert_eq!(
        read["header"]["metadata"],
        json!({ "source": "import", "reviewed": true })
    );
    assert_eq!(read["lines"].as_array().map(Vec::len), Some(2));
}

#[test]
fn unbalanced_envelope_reports_error_code() {
    let harness = Harness::new();
    let org = harness.create_org("SHOP");

    let response = harness.call(
        Noun::Transaction,
        json!({
            "action": "CREATE",
            "organization_id": org,
            "payload": {
                "header": { "transaction_type": "journal_entry", "smart_code": "HERA.FIN.GL.JOURNAL.v1" },
                "lines": [
                    { "line_type": "GL", "line_amount": 100, "line_data": { "side": "DR" } },
                    { "line_type": "GL", "line_amount": 90, "line_data": { "side": "CR" } }
                ]
            }
        }),
    );
    assert!(!response.success);
    assert_eq!(response.action, "CREATE");
    assert_eq!(response.error_code(), Some("UNBALANCED_ENTRY"));
    assert!(response.data.is_none());
}

#[test]
fn smart_code_casing_is_enforced_through_the_envelope() {
    let harness = Harness::new();
    let org = harness.create_org("CRM");

    let request = |smart_code: &str| {
        json!({
            "action": "CREATE",
            "organization_id": org,
            "payload": { "entity": {
                "entity_type": "customer",
                "entity_name": "Jane",
                "smart_code": smart_code
            } }
        })
    };
    let rejected = harness.call(Noun::Entity, request("HERA.CRM.CUSTOMER.ENTITY.V1"));
    assert_eq!(rejected.error_code(), Some("ERR_SMART_CODE_FORMAT"));

    let accepted = harness.call(Noun::Entity, request("HERA.CRM.CUSTOMER.ENTITY.v1"));
    assert!(accepted.success);
}

#[test]
fn missing_or_unknown_organization_is_rejected() {
    let harness = Harness::new();

    let missing = harness.call(Noun::Entity, json!({ "action": "LIST" }));
    assert_eq!(missing.error_code(), Some("VALIDATION_ERROR"));

    let unknown = harness.call(
        Noun::Entity,
        json!({ "action": "LIST", "organization_id": uuid::Uuid::new_v4() }),
    );
    assert_eq!(unknown.error_code(), Some("ORG_NOT_FOUND"));
}

#[test]
fn relationship_envelopes_track_current_state() {
    let harness = Harness::new();
    let org = harness.create_org("SALON");
    let appointment = harness.create_entity(&org, "appointment", "Trim", json!({}));
    let booked = harness.create_entity(&org, "workflow_status", "Booked", json!({}));
    let done = harness.create_entity(&org, "workflow_status", "Completed", json!({}));

    let edge = |to: &str| {
        json!({
            "from_entity_id": appointment,
            "to_entity_id": to,
            "relationship_type": "HAS_STATUS",
            "smart_code": "HERA.SALON.APPOINTMENT.WORKFLOW.STATUS.v1"
        })
    };
    harness.ok(
        Noun::Relationship,
        json!({ "action": "CREATE", "organization_id": org, "payload": { "relationship": edge(&booked) } }),
    );
    let mut transition = edge(&done);
    transition["expected_to_entity_id"] = json!(booked);
    harness.ok(
        Noun::Relationship,
        json!({ "action": "UPDATE", "organization_id": org, "payload": { "relationship": transition } }),
    );

    let state = harness.ok(
        Noun::Relationship,
        json!({
            "action": "READ",
            "organization_id": org,
            "options": { "where": { "from_entity_id": appointment, "relationship_type": "HAS_STATUS" } }
        }),
    );
    assert_eq!(state["current_state"]["id"], json!(done));

    let history = harness.ok(
        Noun::Relationship,
        json!({
            "action": "LIST",
            "organization_id": org,
            "options": { "where": { "from_entity_id": appointment }, "include_deleted": true }
        }),
    );
    assert_eq!(history["count"], json!(2));
    let active = harness.ok(
        Noun::Relationship,
        json!({
            "action": "LIST",
            "organization_id": org,
            "options": { "where": { "from_entity_id": appointment } }
        }),
    );
    assert_eq!(active["count"], json!(1));
}

#[test]
fn list_paginates_with_default_and_capped_limits() {
    let harness = Harness::new();
    let org = harness.create_org("SHOP");
    for index in 0..3 {
        harness.create_entity(&org, "product", &format!("Item {index}"), json!({}));
    }

    let page = harness.ok(
        Noun::Entity,
        json!({ "action": "LIST", "organization_id": org, "options": { "limit": 2, "offset": 1 } }),
    );
    assert_eq!(page["count"], json!(2));
    assert_eq!(page["limit"], json!(2));
    assert_eq!(page["offset"], json!(1));

    let capped = harness.ok(
        Noun::Entity,
        json!({ "action": "LIST", "organization_id": org, "options": { "limit": 10_000 } }),
    );
    assert_eq!(capped["limit"], json!(500));
    assert_eq!(capped["count"], json!(3));
}

#[test]
fn void_via_envelope_then_update_is_immutable() {
    let harness = Harness::new();
    let org = harness.create_org("SHOP");
    let created = harness.ok(
        Noun::Transaction,
        json!({
            "action": "CREATE",
            "organization_id": org,
            "payload": { "header": { "transaction_type": "sale", "smart_code": "HERA.RETAIL.POS.SALE.v1" } }
        }),
    );
    let id = created["header"]["id"].as_str().unwrap().to_string();

    let voided = harness.ok(
        Noun::Transaction,
        json!({
            "action": "VOID",
            "organization_id": org,
            "options": { "where": id },
            "payload": { "reason": "customer cancelled" }
        }),
    );
    assert_eq!(voided["header"]["status"], json!("voided"));

    let update = harness.call(
        Noun::Transaction,
        json!({
            "action": "UPDATE",
            "organization_id": org,
            "options": { "where": id },
            "payload": { "patch": { "description": "edit" } }
        }),
    );
    assert_eq!(update.error_code(), Some("TRANSACTION_IMMUTABLE"));

    let archive = harness.call(
        Noun::Transaction,
        json!({ "action": "ARCHIVE", "organization_id": org, "options": { "where": id } }),
    );
    assert_eq!(archive.error_code(), Some("INVALID_REQUEST"));
}

#[test]
fn misspelled_where_keys_are_rejected_instead_of_widening_the_match() {
    let harness = Harness::new();
    let org = harness.create_org("CRM");
    let alice = harness.create_entity(&org, "customer", "Alice", json!({}));
    harness.create_entity(&org, "product", "Widget", json!({}));

    let read = harness.call(
        Noun::Entity,
        json!({ "action": "READ", "organization_id": org, "options": { "where": { "entity_nme": "Nobody" } } }),
    );
    assert!(!read.success);
    assert_eq!(read.error_code(), Some("VALIDATION_ERROR"));
    assert!(read.data.is_none());

    let list = harness.call(
        Noun::Entity,
        json!({ "action": "LIST", "organization_id": org, "options": { "where": { "entity_typ": "product" } } }),
    );
    assert_eq!(list.error_code(), Some("VALIDATION_ERROR"));

    let by_id = harness.ok(
        Noun::Entity,
        json!({ "action": "LIST", "organization_id": org, "options": { "where": { "id": alice } } }),
    );
    assert_eq!(by_id["count"], json!(1));
    assert_eq!(by_id["items"][0]["entity_name"], json!("Alice"));

    let transactions = harness.call(
        Noun::Transaction,
        json!({ "action": "LIST", "organization_id": org, "options": { "where": { "transaction_typ": "sale" } } }),
    );
    assert_eq!(transactions.error_code(), Some("VALIDATION_ERROR"));

    let relationships = harness.call(
        Noun::Relationship,
        json!({ "action": "LIST", "organization_id": org, "options": { "where": { "from_entity": alice } } }),
    );
    assert_eq!(relationships.error_code(), Some("VALIDATION_ERROR"));

    let organizations = harness.call(
        Noun::Organization,
        json!({ "action": "LIST", "options": { "where": { "parent_id": org } } }),
    );
    assert_eq!(organizations.error_code(), Some("VALIDATION_ERROR"));
}
