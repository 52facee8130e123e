//! Shared fixtures for the integration suites: record models covering every
//! index kind, and store constructors over the in-memory KV engine.

use lamina_core::schema::index::{IndexConfig, TimeWindow, VectorMetric, VectorMode, VectorOptions};
use lamina_core::{
    Database, DirSegment, FieldExtractor, FieldKind, IndexDescriptor, IndexKind, Persistable, RecordStore, TypeDescriptor, Value,
};
use lamina_kv::memory::MemoryKv;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn store() -> RecordStore { RecordStore::new(Database::new(Arc::new(MemoryKv::new()))).unwrap() }

pub fn store_over(kv: MemoryKv) -> RecordStore { RecordStore::new(Database::new(Arc::new(kv))).unwrap() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub category: String,
    pub tag: String,
    pub status: String,
    pub customer_id: String,
    pub created_at: i64,
}

impl User {
    pub fn sample(id: &str, email: &str) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            name: format!("user {id}"),
            category: "general".into(),
            tag: "none".into(),
            status: "active".into(),
            customer_id: format!("c-{id}"),
            created_at: 0,
        }
    }
}

impl Persistable for User {
    fn type_name() -> &'static str { "User" }

    fn vtable() -> &'static [FieldExtractor<Self>] {
        const VTABLE: &[FieldExtractor<User>] = &[
            FieldExtractor { name: "id", get: |u| Value::String(u.id.clone()) },
            FieldExtractor { name: "email", get: |u| Value::String(u.email.clone()) },
            FieldExtractor { name: "name", get: |u| Value::String(u.name.clone()) },
            FieldExtractor { name: "category", get: |u| Value::String(u.category.clone()) },
            FieldExtractor { name: "tag", get: |u| Value::String(u.tag.clone()) },
            FieldExtractor { name: "status", get: |u| Value::String(u.status.clone()) },
            FieldExtractor { name: "customerId", get: |u| Value::String(u.customer_id.clone()) },
            FieldExtractor { name: "created_at", get: |u| Value::Int(u.created_at) },
        ];
        VTABLE
    }

    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new("User")
            .field("id", FieldKind::String)
            .field("email", FieldKind::String)
            .field("name", FieldKind::String)
            .field("category", FieldKind::String)
            .field("tag", FieldKind::String)
            .field("status", FieldKind::String)
            .field("customerId", FieldKind::String)
            .field("created_at", FieldKind::Int)
            .primary_key(["id"])
            .directory([DirSegment::Static("users".into())])
            .index(IndexDescriptor::unique("User_email", ["email"]).storing(["name"]))
            .index(IndexDescriptor::ordered("User_category", ["category"]))
            .index(IndexDescriptor::ordered("User_tag", ["tag"]))
            .index(IndexDescriptor::ordered("User_customer", ["customerId"]))
            .index(IndexDescriptor::ordered("User_status", ["status"]))
            .index(IndexDescriptor::ordered("User_created", ["created_at"]))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub tenant_id: String,
    pub amount: i64,
}

impl Persistable for Order {
    fn type_name() -> &'static str { "Order" }

    fn vtable() -> &'static [FieldExtractor<Self>] {
        const VTABLE: &[FieldExtractor<Order>] = &[
            FieldExtractor { name: "id", get: |o| Value::String(o.id.clone()) },
            FieldExtractor { name: "tenantId", get: |o| Value::String(o.tenant_id.clone()) },
            FieldExtractor { name: "amount", get: |o| Value::Int(o.amount) },
        ];
        VTABLE
    }

    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new("Order")
            .field("id", FieldKind::String)
            .field("tenantId", FieldKind::String)
            .field("amount", FieldKind::Int)
            .primary_key(["id"])
            .directory([
                DirSegment::Static("tenants".into()),
                DirSegment::Field("tenantId".into()),
                DirSegment::Static("orders".into()),
            ])
            .index(IndexDescriptor::ordered("Order_amount", ["amount"]))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub id: String,
    pub points: i64,
}

impl Persistable for Score {
    fn type_name() -> &'static str { "Score" }

    fn vtable() -> &'static [FieldExtractor<Self>] {
        const VTABLE: &[FieldExtractor<Score>] = &[
            FieldExtractor { name: "id", get: |s| Value::String(s.id.clone()) },
            FieldExtractor { name: "points", get: |s| Value::Int(s.points) },
        ];
        VTABLE
    }

    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new("Score")
            .field("id", FieldKind::String)
            .field("points", FieldKind::Int)
            .primary_key(["id"])
            .directory([DirSegment::Static("scores".into())])
            .index(IndexDescriptor::new("Score_rank", IndexKind::Ranked, ["points"]))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: String,
    pub region: String,
    pub amount: i64,
}

impl Sale {
    pub fn new(id: &str, region: &str, amount: i64) -> Self { Self { id: id.into(), region: region.into(), amount } }
}

impl Persistable for Sale {
    fn type_name() -> &'static str { "Sale" }

    fn vtable() -> &'static [FieldExtractor<Self>] {
        const VTABLE: &[FieldExtractor<Sale>] = &[
            FieldExtractor { name: "id", get: |s| Value::String(s.id.clone()) },
            FieldExtractor { name: "region", get: |s| Value::String(s.region.clone()) },
            FieldExtractor { name: "amount", get: |s| Value::Int(s.amount) },
        ];
        VTABLE
    }

    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new("Sale")
            .field("id", FieldKind::String)
            .field("region", FieldKind::String)
            .field("amount", FieldKind::Int)
            .primary_key(["id"])
            .directory([DirSegment::Static("sales".into())])
            .index(IndexDescriptor::ordered("Sale_amount", ["region", "amount"]))
            .index(IndexDescriptor::new("Sale_count", IndexKind::Count, ["region"]))
            .index(IndexDescriptor::new("Sale_sum", IndexKind::Sum, ["region", "amount"]))
            .index(IndexDescriptor::new("Sale_avg", IndexKind::Average, ["region", "amount"]))
            .index(IndexDescriptor::new("Sale_max", IndexKind::Max, ["region", "amount"]).with_config(IndexConfig {
                backing_index: Some("Sale_amount".into()),
                ..IndexConfig::default()
            }))
            .index(IndexDescriptor::new("Sale_distinct", IndexKind::Distinct, ["region", "amount"]))
            .index(IndexDescriptor::new("Sale_p", IndexKind::Percentile, ["region", "amount"]))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub body: String,
}

impl Persistable for Article {
    fn type_name() -> &'static str { "Article" }

    fn vtable() -> &'static [FieldExtractor<Self>] {
        const VTABLE: &[FieldExtractor<Article>] = &[
            FieldExtractor { name: "id", get: |a| Value::String(a.id.clone()) },
            FieldExtractor { name: "body", get: |a| Value::String(a.body.clone()) },
        ];
        VTABLE
    }

    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new("Article")
            .field("id", FieldKind::String)
            .field("body", FieldKind::String)
            .primary_key(["id"])
            .directory([DirSegment::Static("articles".into())])
            .index(IndexDescriptor::new("Article_body", IndexKind::Text, ["body"]))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub id: String,
    pub vector: Vec<u8>,
}

impl Embedding {
    pub fn new(id: &str, components: &[f32]) -> Self {
        Self { id: id.into(), vector: components.iter().flat_map(|c| c.to_le_bytes()).collect() }
    }
}

impl Persistable for Embedding {
    fn type_name() -> &'static str { "Embedding" }

    fn vtable() -> &'static [FieldExtractor<Self>] {
        const VTABLE: &[FieldExtractor<Embedding>] = &[
            FieldExtractor { name: "id", get: |e| Value::String(e.id.clone()) },
            FieldExtractor { name: "vector", get: |e| Value::Bytes(e.vector.clone()) },
        ];
        VTABLE
    }

    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new("Embedding")
            .field("id", FieldKind::String)
            .field("vector", FieldKind::Bytes)
            .primary_key(["id"])
            .directory([DirSegment::Static("embeddings".into())])
            .index(IndexDescriptor::new("Embedding_flat", IndexKind::Vector, ["vector"]).with_config(IndexConfig {
                vector: Some(VectorOptions { dimensions: 3, metric: VectorMetric::L2, mode: VectorMode::Flat }),
                ..IndexConfig::default()
            }))
            .index(IndexDescriptor::new("Embedding_graph", IndexKind::Vector, ["vector"]).with_config(IndexConfig {
                vector: Some(VectorOptions {
                    dimensions: 3,
                    metric: VectorMetric::L2,
                    mode: VectorMode::Hnsw { m: 4, ef_construction: 16, ef_search: 16 },
                }),
                ..IndexConfig::default()
            }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
}

impl Persistable for Place {
    fn type_name() -> &'static str { "Place" }

    fn vtable() -> &'static [FieldExtractor<Self>] {
        const VTABLE: &[FieldExtractor<Place>] = &[
            FieldExtractor { name: "id", get: |p| Value::String(p.id.clone()) },
            FieldExtractor { name: "lat", get: |p| Value::Float(p.lat) },
            FieldExtractor { name: "lng", get: |p| Value::Float(p.lng) },
        ];
        VTABLE
    }

    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new("Place")
            .field("id", FieldKind::String)
            .field("lat", FieldKind::Float)
            .field("lng", FieldKind::Float)
            .primary_key(["id"])
            .directory([DirSegment::Static("places".into())])
            .index(IndexDescriptor::new("Place_geo", IndexKind::Spatial, ["lat", "lng"]).with_config(IndexConfig {
                spatial_levels: vec![8, 12],
                ..IndexConfig::default()
            }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Follow {
    pub id: String,
    pub from: String,
    pub label: String,
    pub to: String,
    pub since: i64,
}

impl Persistable for Follow {
    fn type_name() -> &'static str { "Follow" }

    fn vtable() -> &'static [FieldExtractor<Self>] {
        const VTABLE: &[FieldExtractor<Follow>] = &[
            FieldExtractor { name: "id", get: |f| Value::String(f.id.clone()) },
            FieldExtractor { name: "from", get: |f| Value::String(f.from.clone()) },
            FieldExtractor { name: "label", get: |f| Value::String(f.label.clone()) },
            FieldExtractor { name: "to", get: |f| Value::String(f.to.clone()) },
            FieldExtractor { name: "since", get: |f| Value::Int(f.since) },
        ];
        VTABLE
    }

    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new("Follow")
            .field("id", FieldKind::String)
            .field("from", FieldKind::String)
            .field("label", FieldKind::String)
            .field("to", FieldKind::String)
            .field("since", FieldKind::Int)
            .primary_key(["id"])
            .directory([DirSegment::Static("follows".into())])
            .index(
                IndexDescriptor::new("Follow_edges", IndexKind::Graph, ["from", "label", "to"])
                    .storing(["since"])
                    .with_config(IndexConfig { hexastore: true, ..IndexConfig::default() }),
            )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub balance: i64,
}

impl Persistable for Account {
    fn type_name() -> &'static str { "Account" }

    fn vtable() -> &'static [FieldExtractor<Self>] {
        const VTABLE: &[FieldExtractor<Account>] = &[
            FieldExtractor { name: "id", get: |a| Value::String(a.id.clone()) },
            FieldExtractor { name: "balance", get: |a| Value::Int(a.balance) },
        ];
        VTABLE
    }

    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new("Account")
            .field("id", FieldKind::String)
            .field("balance", FieldKind::Int)
            .primary_key(["id"])
            .directory([DirSegment::Static("accounts".into())])
            .index(IndexDescriptor::new("Account_history", IndexKind::History, Vec::<String>::new()).storing(["balance"]))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub pool: String,
    pub number: i64,
}

impl Persistable for Ticket {
    fn type_name() -> &'static str { "Ticket" }

    fn vtable() -> &'static [FieldExtractor<Self>] {
        const VTABLE: &[FieldExtractor<Ticket>] = &[
            FieldExtractor { name: "id", get: |t| Value::String(t.id.clone()) },
            FieldExtractor { name: "pool", get: |t| Value::String(t.pool.clone()) },
            FieldExtractor { name: "number", get: |t| Value::Int(t.number) },
        ];
        VTABLE
    }

    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new("Ticket")
            .field("id", FieldKind::String)
            .field("pool", FieldKind::String)
            .field("number", FieldKind::Int)
            .primary_key(["id"])
            .directory([DirSegment::Static("tickets".into())])
            .index(IndexDescriptor::new("Ticket_numbers", IndexKind::Bitmap, ["pool", "number"]))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Play {
    pub id: String,
    pub at: f64,
    pub points: i64,
}

impl Persistable for Play {
    fn type_name() -> &'static str { "Play" }

    fn vtable() -> &'static [FieldExtractor<Self>] {
        const VTABLE: &[FieldExtractor<Play>] = &[
            FieldExtractor { name: "id", get: |p| Value::String(p.id.clone()) },
            FieldExtractor { name: "at", get: |p| Value::Timestamp(p.at) },
            FieldExtractor { name: "points", get: |p| Value::Int(p.points) },
        ];
        VTABLE
    }

    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new("Play")
            .field("id", FieldKind::String)
            .field("at", FieldKind::Timestamp)
            .field("points", FieldKind::Int)
            .primary_key(["id"])
            .directory([DirSegment::Static("plays".into())])
            .index(IndexDescriptor::new("Play_daily", IndexKind::Leaderboard, ["at", "points"]).with_config(IndexConfig {
                window: Some(TimeWindow::Daily),
                ..IndexConfig::default()
            }))
    }
}
