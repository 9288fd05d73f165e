#![allow(dead_code)]

use repokit_core::query::QueryTracking;
use repokit_core::{
    entity, Criteria, Model, PersistenceSession, RepoResult, SessionFactory, StoreConfig,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use tempfile::TempDir;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub active: bool,
}

entity! {
    Customer in "customers" {
        key: id,
        fields: { id: Uuid, name: String, email: Option<String>, active: bool },
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub total: Decimal,
    pub status: String,
    pub note: Option<String>,
    pub customer: Option<Customer>,
    pub lines: Vec<OrderLine>,
}

entity! {
    Order in "orders" {
        key: id,
        fields: {
            id: Uuid,
            customer_id: Uuid,
            total: Decimal,
            status: String,
            note: Option<String>,
        },
        relations: {
            "customer" => load_order_customer,
            "lines" => load_order_lines,
        },
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderLine {
    pub id: Uuid,
    pub order_id: Uuid,
    pub sku: String,
    pub quantity: i64,
    pub unit_price: Decimal,
}

entity! {
    OrderLine in "order_lines" {
        key: id,
        fields: {
            id: Uuid,
            order_id: Uuid,
            sku: String,
            quantity: i64,
            unit_price: Decimal,
        },
    }
}

fn load_order_customer(session: &mut PersistenceSession, order: &mut Order) -> RepoResult<()> {
    order.customer = session.find_first::<Customer>(
        &Criteria::field("id").eq(order.customer_id),
        QueryTracking::Tracking,
    )?;
    Ok(())
}

fn load_order_lines(session: &mut PersistenceSession, order: &mut Order) -> RepoResult<()> {
    order.lines = session.fetch::<OrderLine>(
        &Criteria::field("order_id").eq(order.id),
        QueryTracking::Tracking,
    )?;
    Ok(())
}

pub fn shop_model() -> Model {
    Model::builder()
        .entity::<Customer>()
        .entity::<Order>()
        .entity::<OrderLine>()
        .build()
        .unwrap()
}

/// A file-backed store in a private temp directory.
pub struct Fixture {
    pub dir: TempDir,
    pub factory: SessionFactory,
}

impl Fixture {
    pub fn config(&self) -> StoreConfig {
        self.factory.config().clone()
    }
}

pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::for_path(dir.path().join("shop.sqlite3"));
    config.busy_timeout_ms = 2_000;
    let factory = SessionFactory::new(config, shop_model()).unwrap();
    Fixture { dir, factory }
}

pub fn dec(text: &str) -> Decimal {
    Decimal::from_str(text).unwrap()
}

pub fn customer(name: &str) -> Customer {
    Customer {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email: None,
        active: true,
    }
}

pub fn order(customer: &Customer, total: &str, status: &str) -> Order {
    Order {
        id: Uuid::new_v4(),
        customer_id: customer.id,
        total: dec(total),
        status: status.to_string(),
        ..Order::default()
    }
}

pub fn line(order: &Order, sku: &str, quantity: i64, unit_price: &str) -> OrderLine {
    OrderLine {
        id: Uuid::new_v4(),
        order_id: order.id,
        sku: sku.to_string(),
        quantity,
        unit_price: dec(unit_price),
    }
}
