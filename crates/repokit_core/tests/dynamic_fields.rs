mod common;

use common::{customer, dec, fixture, order, Customer, Order, OrderLine};
use repokit_core::{get_field, has_field, set_field, RepoError, Value};
use uuid::Uuid;

#[test]
fn has_field_knows_persisted_fields_only() {
    assert!(has_field::<Order>("total"));
    assert!(has_field::<Order>("note"));
    assert!(!has_field::<Order>("customer"));
    assert!(!has_field::<Order>("Total"));
}

#[test]
fn set_field_assigns_typed_values() {
    let mut placed = order(&customer("Ada"), "1", "open");

    set_field(&mut placed, "total", dec("42.5")).unwrap();
    set_field(&mut placed, "status", "shipped").unwrap();
    set_field(&mut placed, "note", "leave at door").unwrap();

    assert_eq!(placed.total, dec("42.5"));
    assert_eq!(placed.status, "shipped");
    assert_eq!(placed.note.as_deref(), Some("leave at door"));
    assert_eq!(
        get_field(&placed, "status").unwrap(),
        Value::Text("shipped".to_string())
    );
}

#[test]
fn set_field_with_null_is_a_no_op() {
    let mut placed = order(&customer("Ada"), "1", "open");
    placed.note = Some("keep".to_string());

    set_field(&mut placed, "note", Value::Null).unwrap();
    set_field(&mut placed, "does_not_exist", Value::Null).unwrap();

    assert_eq!(placed.note.as_deref(), Some("keep"));
}

#[test]
fn uuid_text_is_assigned_as_a_parsed_uuid() {
    let mut item = OrderLine::default();
    let order_id = Uuid::new_v4();

    set_field(&mut item, "order_id", order_id.hyphenated().to_string().to_uppercase()).unwrap();
    assert_eq!(item.order_id, order_id);
}

#[test]
fn uuid_like_text_in_a_text_field_is_kept_verbatim() {
    let mut item = OrderLine::default();

    set_field(&mut item, "sku", "123E4567E89B12D3A456426614174000").unwrap();
    assert_eq!(item.sku, "123E4567E89B12D3A456426614174000");

    set_field(&mut item, "sku", "urn:uuid:123e4567-e89b-12d3-a456-426614174000").unwrap();
    assert_eq!(item.sku, "urn:uuid:123e4567-e89b-12d3-a456-426614174000");

    let mut placed = order(&customer("Ada"), "1", "open");
    set_field(&mut placed, "note", " {123e4567-e89b-12d3-a456-426614174000} ").unwrap();
    assert_eq!(
        placed.note.as_deref(),
        Some(" {123e4567-e89b-12d3-a456-426614174000} ")
    );
}

#[test]
fn unknown_field_is_reported_before_assignment() {
    let mut ada = customer("Ada");
    let err = set_field(&mut ada, "nickname", "Countess").unwrap_err();
    assert!(matches!(
        err,
        RepoError::UnknownField { entity: "Customer", field } if field == "nickname"
    ));
    assert_eq!(ada.name, "Ada");
}

#[test]
fn type_mismatch_is_an_invalid_value() {
    let mut item = OrderLine::default();
    let err = set_field(&mut item, "quantity", "many").unwrap_err();
    assert!(matches!(err, RepoError::InvalidValue { field, .. } if field == "quantity"));

    let sku = Uuid::new_v4();
    set_field(&mut item, "sku", sku).unwrap();
    assert_eq!(item.sku, sku.hyphenated().to_string());
}

#[test]
fn repository_exposes_field_access_and_persists_changes() {
    let fx = fixture();
    let ada = customer("Ada");
    let unit = fx.factory.unit_of_work().unwrap();
    let customers = unit.repository::<Customer>().unwrap();
    customers.add(&ada).unwrap();
    unit.save().unwrap();

    let mut edited = ada.clone();
    assert!(customers.has_field("email"));
    customers
        .set_field(&mut edited, "email", "ada@example.com")
        .unwrap();
    customers.set_field(&mut edited, "active", false).unwrap();
    customers.update(&edited).unwrap();
    assert_eq!(unit.save().unwrap(), 1);

    let stored = customers
        .single(repokit_core::Criteria::field("email").eq("ada@example.com"))
        .unwrap();
    assert_eq!(
        customers.get_field(&stored, "active").unwrap(),
        Value::Bool(false)
    );
}
