//! Entity fixtures shared by the engine integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex, OnceLock};

use rowmap_engine::{
    children_from_row, children_to_value, Column, ColumnType, DatabaseAdminTemplate, Entity, EntityDescriptor, Fetch,
    InMemoryStore, MemStoreConfig, Row, StoreError, Template, TemplateEvent, TemplateListener,
};

pub fn setup() -> (Template, InMemoryStore) {
    setup_with(MemStoreConfig::default())
}

pub fn setup_with(config: MemStoreConfig) -> (Template, InMemoryStore) {
    let store = InMemoryStore::with_config(config);
    (Template::new(Arc::new(store.clone())), store)
}

pub fn admin(store: &InMemoryStore) -> DatabaseAdminTemplate {
    DatabaseAdminTemplate::new(Arc::new(store.clone()))
}

pub fn props(names: &[&str]) -> std::collections::BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

// -----------------------
// Traders and trades
// -----------------------

#[derive(Clone, Debug, PartialEq)]
pub struct Trader {
    pub trader_id: String,
    pub first_name: String,
    pub last_name: Option<String>,
}

impl Trader {
    pub fn new(id: &str, first: &str, last: &str) -> Self {
        Self { trader_id: id.into(), first_name: first.into(), last_name: Some(last.into()) }
    }
}

impl Entity for Trader {
    fn descriptor() -> &'static EntityDescriptor {
        static DESC: OnceLock<EntityDescriptor> = OnceLock::new();
        DESC.get_or_init(|| {
            EntityDescriptor::builder("traders")
                .key(Column::new("trader_id", ColumnType::String))
                .column(Column::new("first_name", ColumnType::String).property("firstName").not_null())
                .column(Column::new("last_name", ColumnType::String).property("lastName"))
                .build()
                .expect("traders descriptor")
        })
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("trader_id", self.trader_id.as_str())
            .with("first_name", self.first_name.as_str())
            .with("last_name", self.last_name.clone())
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            trader_id: row.get("trader_id")?,
            first_name: row.get("first_name")?,
            last_name: row.get("last_name")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Trade {
    pub trader_id: String,
    pub trade_id: String,
    pub action: String,
    pub price: f64,
    pub shares: f64,
    pub symbol: String,
    pub curve: Vec<f64>,
}

impl Trade {
    pub fn new(trader_id: &str, trade_id: &str, action: &str, shares: f64) -> Self {
        Self {
            trader_id: trader_id.into(),
            trade_id: trade_id.into(),
            action: action.into(),
            price: 100.0,
            shares,
            symbol: "STOCK1".into(),
            curve: vec![99.0, 101.0],
        }
    }
}

impl Entity for Trade {
    fn descriptor() -> &'static EntityDescriptor {
        static DESC: OnceLock<EntityDescriptor> = OnceLock::new();
        DESC.get_or_init(|| {
            EntityDescriptor::builder("trades")
                .key(Column::new("trader_id", ColumnType::String))
                .key(Column::new("trade_id", ColumnType::String))
                .column(Column::new("action", ColumnType::String))
                .column(Column::new("price", ColumnType::Float64))
                .column(Column::new("shares", ColumnType::Float64))
                .column(Column::new("symbol", ColumnType::String))
                .column(Column::new("curve", ColumnType::Array(Box::new(ColumnType::Float64))))
                .build()
                .expect("trades descriptor")
        })
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("trader_id", self.trader_id.as_str())
            .with("trade_id", self.trade_id.as_str())
            .with("action", self.action.as_str())
            .with("price", self.price)
            .with("shares", self.shares)
            .with("symbol", self.symbol.as_str())
            .with("curve", self.curve.clone())
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            trader_id: row.get("trader_id")?,
            trade_id: row.get("trade_id")?,
            action: row.get("action")?,
            price: row.get("price")?,
            shares: row.get("shares")?,
            symbol: row.get("symbol")?,
            curve: row.get("curve")?,
        })
    }
}

/// Trades table seen through a row filter.
#[derive(Clone, Debug, PartialEq)]
pub struct LargeTrade {
    pub trader_id: String,
    pub trade_id: String,
    pub shares: f64,
}

impl Entity for LargeTrade {
    fn descriptor() -> &'static EntityDescriptor {
        static DESC: OnceLock<EntityDescriptor> = OnceLock::new();
        DESC.get_or_init(|| {
            EntityDescriptor::builder("trades")
                .key(Column::new("trader_id", ColumnType::String))
                .key(Column::new("trade_id", ColumnType::String))
                .column(Column::new("shares", ColumnType::Float64))
                .where_clause("shares >= 100")
                .build()
                .expect("large trades descriptor")
        })
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("trader_id", self.trader_id.as_str())
            .with("trade_id", self.trade_id.as_str())
            .with("shares", self.shares)
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self { trader_id: row.get("trader_id")?, trade_id: row.get("trade_id")?, shares: row.get("shares")? })
    }
}

// -----------------------
// Eager hierarchy: singers > albums > songs
// -----------------------

#[derive(Clone, Debug, PartialEq)]
pub struct Song {
    pub singer_id: i64,
    pub album_id: i64,
    pub track: i64,
    pub title: String,
}

impl Entity for Song {
    fn descriptor() -> &'static EntityDescriptor {
        static DESC: OnceLock<EntityDescriptor> = OnceLock::new();
        DESC.get_or_init(|| {
            EntityDescriptor::builder("songs")
                .key(Column::new("singer_id", ColumnType::Int64))
                .key(Column::new("album_id", ColumnType::Int64))
                .key(Column::new("track", ColumnType::Int64))
                .column(Column::new("title", ColumnType::String))
                .build()
                .expect("songs descriptor")
        })
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("singer_id", self.singer_id)
            .with("album_id", self.album_id)
            .with("track", self.track)
            .with("title", self.title.as_str())
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            singer_id: row.get("singer_id")?,
            album_id: row.get("album_id")?,
            track: row.get("track")?,
            title: row.get("title")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Album {
    pub singer_id: i64,
    pub album_id: i64,
    pub title: String,
    pub songs: Vec<Song>,
}

impl Entity for Album {
    fn descriptor() -> &'static EntityDescriptor {
        static DESC: OnceLock<EntityDescriptor> = OnceLock::new();
        DESC.get_or_init(|| {
            EntityDescriptor::builder("albums")
                .key(Column::new("singer_id", ColumnType::Int64))
                .key(Column::new("album_id", ColumnType::Int64))
                .column(Column::new("title", ColumnType::String))
                .interleaved("songs", Song::descriptor(), Fetch::Eager)
                .build()
                .expect("albums descriptor")
        })
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("singer_id", self.singer_id)
            .with("album_id", self.album_id)
            .with("title", self.title.as_str())
            .with("songs", children_to_value(&self.songs))
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            singer_id: row.get("singer_id")?,
            album_id: row.get("album_id")?,
            title: row.get("title")?,
            songs: children_from_row(row, "songs")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Singer {
    pub singer_id: i64,
    pub name: String,
    pub albums: Vec<Album>,
}

impl Entity for Singer {
    fn descriptor() -> &'static EntityDescriptor {
        static DESC: OnceLock<EntityDescriptor> = OnceLock::new();
        DESC.get_or_init(|| {
            EntityDescriptor::builder("singers")
                .key(Column::new("singer_id", ColumnType::Int64))
                .column(Column::new("name", ColumnType::String))
                .interleaved("albums", Album::descriptor(), Fetch::Eager)
                .build()
                .expect("singers descriptor")
        })
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("singer_id", self.singer_id)
            .with("name", self.name.as_str())
            .with("albums", children_to_value(&self.albums))
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            singer_id: row.get("singer_id")?,
            name: row.get("name")?,
            albums: children_from_row(row, "albums")?,
        })
    }
}

pub fn singer_with_albums(id: i64) -> Singer {
    let song = |album_id: i64, track: i64| Song { singer_id: id, album_id, track, title: format!("song {album_id}.{track}") };
    Singer {
        singer_id: id,
        name: format!("singer {id}"),
        albums: vec![
            Album { singer_id: id, album_id: 1, title: "first".into(), songs: vec![song(1, 1), song(1, 2)] },
            Album { singer_id: id, album_id: 2, title: "second".into(), songs: vec![song(2, 1)] },
        ],
    }
}

// -----------------------
// Lazy relation: portfolios > holdings
// -----------------------

#[derive(Clone, Debug, PartialEq)]
pub struct Holding {
    pub owner: String,
    pub symbol: String,
    pub quantity: i64,
}

impl Entity for Holding {
    fn descriptor() -> &'static EntityDescriptor {
        static DESC: OnceLock<EntityDescriptor> = OnceLock::new();
        DESC.get_or_init(|| {
            EntityDescriptor::builder("holdings")
                .key(Column::new("owner", ColumnType::String))
                .key(Column::new("symbol", ColumnType::String))
                .column(Column::new("quantity", ColumnType::Int64).not_null())
                .where_clause("quantity > 0")
                .build()
                .expect("holdings descriptor")
        })
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("owner", self.owner.as_str())
            .with("symbol", self.symbol.as_str())
            .with("quantity", self.quantity)
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self { owner: row.get("owner")?, symbol: row.get("symbol")?, quantity: row.get("quantity")? })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Portfolio {
    pub owner: String,
    pub label: String,
    pub holdings: Vec<Holding>,
}

impl Entity for Portfolio {
    fn descriptor() -> &'static EntityDescriptor {
        static DESC: OnceLock<EntityDescriptor> = OnceLock::new();
        DESC.get_or_init(|| {
            EntityDescriptor::builder("portfolios")
                .key(Column::new("owner", ColumnType::String))
                .column(Column::new("label", ColumnType::String))
                .interleaved("holdings", Holding::descriptor(), Fetch::Lazy)
                .build()
                .expect("portfolios descriptor")
        })
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("owner", self.owner.as_str())
            .with("label", self.label.as_str())
            .with("holdings", children_to_value(&self.holdings))
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self { owner: row.get("owner")?, label: row.get("label")?, holdings: children_from_row(row, "holdings")? })
    }
}

// -----------------------
// Events
// -----------------------

/// Records event names in firing order.
#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn names(&self) -> Vec<String> {
        self.events.lock().expect("events poisoned").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("events poisoned").clear();
    }
}

impl TemplateListener for RecordingListener {
    fn on_event(&self, event: &TemplateEvent<'_>) {
        let detail = match event {
            TemplateEvent::BeforeSave { table, mutations }
            | TemplateEvent::AfterSave { table, mutations }
            | TemplateEvent::BeforeDelete { table, mutations }
            | TemplateEvent::AfterDelete { table, mutations } => format!("{table}:{}", mutations.len()),
            TemplateEvent::AfterRead { table, rows, .. } => format!("{table}:{rows}"),
            TemplateEvent::AfterQuery { rows, .. } => rows.to_string(),
            TemplateEvent::BeforeExecuteDml { .. } => String::new(),
            TemplateEvent::AfterExecuteDml { rows_affected, .. } => rows_affected.to_string(),
        };
        self.events.lock().expect("events poisoned").push(format!("{}({detail})", event.name()));
    }
}
