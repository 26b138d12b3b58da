use hera_core::model::status::RecordStatus;
use hera_core::service::organization_service::{NewOrganization, OrganizationPatch};
use hera_core::{
    open_db_in_memory, DeleteOutcome, EngineError, EntityService, OrganizationService, SmartCode,
    SmartCodeRegistry,
};
use hera_core::service::entity_service::NewEntity;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn new_org(code: &str) -> NewOrganization {
    NewOrganization {
        organization_name: format!("{code} Ltd"),
        organization_code: code.to_string(),
        organization_type: None,
        industry: Some("retail".to_string()),
        parent_organization_id: None,
        settings: json!({ "currency": "USD" }),
    }
}

fn create_entity(conn: &Connection, org: Uuid) -> Result<(), EngineError> {
    let registry = SmartCodeRegistry::default();
    let smart_code = SmartCode::parse("HERA.RETAIL.PRODUCT.ITEM.v1").unwrap();
    EntityService::new(conn, &registry)
        .create(org, None, NewEntity::new("product", "Widget", smart_code), &[], Vec::new())
        .map(|_| ())
}

#[test]
fn create_normalizes_code_and_defaults_type() {
    let conn = open_db_in_memory().unwrap();
    let service = OrganizationService::new(&conn);

    let org = service.create(new_org("acme")).unwrap();
    assert_eq!(org.organization_code, "ACME");
    assert_eq!(org.organization_type, "business");
    assert_eq!(org.status, RecordStatus::Active);
    assert_eq!(org.settings, json!({ "currency": "USD" }));
}

#[test]
fn duplicate_organization_code_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let service = OrganizationService::new(&conn);

    service.create(new_org("ACME")).unwrap();
    let err = service.create(new_org("acme")).expect_err("duplicate code");
    assert_eq!(err.code(), "DUPLICATE_CODE");
}

#[test]
fn unknown_organization_fails_with_org_not_found() {
    let conn = open_db_in_memory().unwrap();

    let err = create_entity(&conn, Uuid::new_v4()).expect_err("unknown org");
    assert!(matches!(err, EngineError::OrgNotFound(_)));
    assert_eq!(err.code(), "ORG_NOT_FOUND");
}

#[test]
fn inactive_organization_fails_with_org_inactive_and_writes_nothing() {
    let conn = open_db_in_memory().unwrap();
    let service = OrganizationService::new(&conn);
    let org = service.create(new_org("ACME")).unwrap();
    service
        .update(
            org.id,
            OrganizationPatch {
                status: Some(RecordStatus::Inactive),
                ..OrganizationPatch::default()
            },
        )
        .unwrap();

    let err = create_entity(&conn, org.id).expect_err("inactive org");
    assert_eq!(err.code(), "ORG_INACTIVE");

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM entities;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn update_merges_settings() {
    let conn = open_db_in_memory().unwrap();
    let service = OrganizationService::new(&conn);
    let org = service.create(new_org("ACME")).unwrap();

    let updated = service
        .update(
            org.id,
            OrganizationPatch {
                organization_name: Some("Acme Holdings".to_string()),
                settings: Some(json!({ "fiscal_year_start": "01-01" })),
                ..OrganizationPatch::default()
            },
        )
        .unwrap();
    assert_eq!(updated.organization_name, "Acme Holdings");
    assert_eq!(
        updated.settings,
        json!({ "currency": "USD", "fiscal_year_start": "01-01" })
    );
}

#[test]
fn delete_removes_unreferenced_and_archives_referenced_organizations() {
    let conn = open_db_in_memory().unwrap();
    let service = OrganizationService::new(&conn);

    let empty = service.create(new_org("EMPTY")).unwrap();
    let deletion = service.delete(empty.id).unwrap();
    assert_eq!(deletion.action_performed, DeleteOutcome::Deleted);
    assert!(matches!(
        service.get(empty.id, true),
        Err(EngineError::NotFound { .. })
    ));

    let busy = service.create(new_org("BUSY")).unwrap();
    create_entity(&conn, busy.id).unwrap();
    let deletion = service.delete(busy.id).unwrap();
    assert_eq!(deletion.action_performed, DeleteOutcome::Archived);
    assert_eq!(deletion.organization.status, RecordStatus::Archived);

    assert!(service.get(busy.id, false).is_err());
    assert_eq!(service.get(busy.id, true).unwrap().status, RecordStatus::Archived);
    assert_eq!(
        create_entity(&conn, busy.id).expect_err("archived org").code(),
        "ORG_INACTIVE"
    );
}
