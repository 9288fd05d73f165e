mod common;

use common::{customer, dec, fixture, order, shop_model, Customer, Order};
use repokit_core::{Criteria, EntryState, RepoError, UnitOfWork};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

fn sample_orders() -> Vec<Order> {
    let ada = customer("Ada");
    let rows = [
        ("4.999", "open", None),
        ("5", "open", Some("gift wrap")),
        ("12.25", "paid", Some("GIFT card")),
        ("120", "shipped", None),
        ("0.0005", "paid", Some("50% off")),
        ("-3", "refunded", Some("500 off")),
    ];
    rows.into_iter()
        .map(|(total, status, note)| Order {
            note: note.map(str::to_string),
            ..order(&ada, total, status)
        })
        .collect()
}

fn ids(orders: &[Order]) -> BTreeSet<Uuid> {
    orders.iter().map(|order| order.id).collect()
}

fn parity_cases() -> Vec<Criteria> {
    vec![
        Criteria::all(),
        Criteria::field("status").eq("open"),
        Criteria::field("total").gt(10),
        Criteria::field("total").le(dec("0.001")),
        Criteria::field("note").is_null(),
        Criteria::field("note").is_not_null(),
        !Criteria::field("note").eq("gift wrap"),
        Criteria::field("note").like("%gift%"),
        Criteria::field("note").contains("50%"),
        Criteria::field("status").one_of(["open", "paid"]),
        Criteria::field("status").one_of(Vec::<String>::new()),
        Criteria::field("total")
            .ge(5)
            .and(Criteria::field("note").is_null().or(Criteria::field("status").ne("open"))),
        !(Criteria::field("note").starts_with("gift").or(Criteria::field("total").lt(0))),
    ]
}

#[test]
fn store_and_in_process_evaluation_select_the_same_rows() {
    let orders = sample_orders();

    let fx = fixture();
    {
        let unit = fx.factory.unit_of_work().unwrap();
        unit.repository::<Order>().unwrap().add_range(&orders).unwrap();
        unit.save().unwrap();
    }
    let persisted = fx.factory.unit_of_work().unwrap();
    let staged = UnitOfWork::in_memory(Arc::new(shop_model())).unwrap();
    staged.repository::<Order>().unwrap().add_range(&orders).unwrap();

    for criteria in parity_cases() {
        let from_store = persisted
            .repository::<Order>()
            .unwrap()
            .query_where(criteria.clone())
            .no_tracking()
            .to_vec()
            .unwrap();
        let in_process = staged
            .repository::<Order>()
            .unwrap()
            .query_where(criteria.clone())
            .to_vec()
            .unwrap();
        assert_eq!(ids(&from_store), ids(&in_process), "{criteria:?}");
    }
}

#[test]
fn null_semantics_follow_three_valued_logic() {
    let unit = UnitOfWork::in_memory(Arc::new(shop_model())).unwrap();
    let orders = unit.repository::<Order>().unwrap();
    orders.add_range(&sample_orders()).unwrap();
    unit.save().unwrap();

    let not_gift = orders
        .count_where(!Criteria::field("note").eq("gift wrap"))
        .unwrap();
    assert_eq!(not_gift, 3);
    assert_eq!(orders.count_where(Criteria::field("note").eq(None::<String>)).unwrap(), 0);
    assert_eq!(orders.count_where(Criteria::field("note").is_null()).unwrap(), 2);
}

#[test]
fn queries_are_lazy_and_restartable() {
    let unit = UnitOfWork::in_memory(Arc::new(shop_model())).unwrap();
    let orders = unit.repository::<Order>().unwrap();
    let open = orders.query_where(Criteria::field("status").eq("open"));

    assert_eq!(open.count().unwrap(), 0);
    orders.add_range(&sample_orders()).unwrap();
    assert_eq!(open.count().unwrap(), 2);

    let cheap_open = open.clone().filter(Criteria::field("total").lt(5));
    assert_eq!(cheap_open.to_vec().unwrap().len(), 1);
    assert_eq!(open.to_vec().unwrap().len(), 2);
    assert!(cheap_open.any().unwrap());
    assert_eq!(
        cheap_open.first().unwrap().map(|order| order.total),
        Some(dec("4.999"))
    );
}

#[test]
fn single_lookups_report_zero_and_many() {
    let unit = UnitOfWork::in_memory(Arc::new(shop_model())).unwrap();
    let orders = unit.repository::<Order>().unwrap();
    orders.add_range(&sample_orders()).unwrap();
    unit.save().unwrap();

    assert!(matches!(
        orders.single(Criteria::field("status").eq("lost")),
        Err(RepoError::NotFound { entity: "Order" })
    ));
    assert!(matches!(
        orders.single(Criteria::field("status").eq("paid")),
        Err(RepoError::MultipleMatches { entity: "Order", count: 2 })
    ));
    assert!(orders
        .single_or_default(Criteria::field("status").eq("lost"))
        .unwrap()
        .is_none());
    assert!(matches!(
        orders.single_or_default(Criteria::field("status").eq("paid")),
        Err(RepoError::MultipleMatches { .. })
    ));
    assert_eq!(
        orders
            .single(Criteria::field("status").eq("shipped"))
            .unwrap()
            .total,
        dec("120")
    );
    assert!(orders.find_one(Criteria::field("status").eq("lost")).unwrap().is_none());
    assert_eq!(orders.find(Criteria::field("status").eq("lost")).count().unwrap(), 0);
}

#[test]
fn invalid_criteria_are_rejected() {
    let unit = UnitOfWork::in_memory(Arc::new(shop_model())).unwrap();
    let orders = unit.repository::<Order>().unwrap();

    assert!(matches!(
        orders.count_where(Criteria::field("colour").eq("red")),
        Err(RepoError::UnknownField { entity: "Order", field }) if field == "colour"
    ));
    assert!(matches!(
        orders.count_where(Criteria::field("total").like("1%")),
        Err(RepoError::InvalidCriteria(_))
    ));
    assert!(matches!(
        orders.count_where(Criteria::field("customer_id").eq("not-a-uuid")),
        Err(RepoError::InvalidValue { field, .. }) if field == "customer_id"
    ));
}

#[test]
fn tracking_queries_attach_rows_and_no_tracking_queries_do_not() {
    let fx = fixture();
    let ada = customer("Ada");
    {
        let unit = fx.factory.unit_of_work().unwrap();
        unit.repository::<Customer>().unwrap().add(&ada).unwrap();
        unit.save().unwrap();
    }

    let unit = fx.factory.unit_of_work().unwrap();
    let customers = unit.repository::<Customer>().unwrap();
    let detached = customers.query().no_tracking().to_vec().unwrap();
    assert_eq!(detached, vec![ada.clone()]);
    assert_eq!(customers.entry_state(&ada).unwrap(), None);

    customers.query().to_vec().unwrap();
    assert_eq!(customers.entry_state(&ada).unwrap(), Some(EntryState::Unchanged));
}

#[test]
fn criteria_survive_a_json_round_trip_and_still_match() {
    let unit = UnitOfWork::in_memory(Arc::new(shop_model())).unwrap();
    let orders = unit.repository::<Order>().unwrap();
    orders.add_range(&sample_orders()).unwrap();

    let criteria = Criteria::field("status")
        .one_of(["paid", "shipped"])
        .and(Criteria::field("total").gt(dec("1")));
    let json = serde_json::to_string(&criteria).unwrap();
    let restored: Criteria = serde_json::from_str(&json).unwrap();

    assert_eq!(restored, criteria);
    assert_eq!(orders.count_where(restored).unwrap(), 2);
}
