//! Interleaved child tables: eager loading, lazy loading, cascades and DDL.

mod common;

use common::*;
use rowmap_engine::{key, Entity, KeySet, QueryOptions, ReadOptions, SchemaUtils, Statement, StoreError};

#[test]
fn eager_children_are_written_and_loaded_with_the_parent() {
    let (template, store) = setup();
    admin(&store).create_tables_if_missing(Singer::descriptor()).unwrap();

    let singer = singer_with_albums(7);
    template.insert(&singer).unwrap();
    assert_eq!(template.count::<Album>().unwrap(), 2);
    assert_eq!(template.count::<Song>().unwrap(), 3);

    let read: Option<Singer> = template.read(&key!(7)).unwrap();
    assert_eq!(read, Some(singer.clone()));

    let all: Vec<Singer> = template.query_all(None).unwrap();
    assert_eq!(all, vec![singer.clone()]);

    let queried: Vec<Singer> = template.query(&Statement::new("SELECT * FROM singers"), None).unwrap();
    assert_eq!(queried, vec![singer]);
}

#[test]
fn excluded_relation_is_not_loaded() {
    let (template, _) = setup();
    template.insert(&singer_with_albums(1)).unwrap();

    let options = ReadOptions::new().exclude(["albums"]);
    let read: Singer = template.read_with(&key!(1), Some(&options)).unwrap().unwrap();
    assert!(read.albums.is_empty());
    assert_eq!(read.name, "singer 1");

    let options = QueryOptions::new().include(["name"]);
    let queried: Vec<Singer> = template.query(&Statement::new("SELECT singer_id, name FROM singers"), Some(&options)).unwrap();
    assert!(queried[0].albums.is_empty());
}

#[test]
fn deleting_a_parent_removes_its_children() {
    let (template, _) = setup();
    template.insert_all(&[singer_with_albums(1), singer_with_albums(2)]).unwrap();

    template.delete::<Singer>(&key!(1)).unwrap();
    assert_eq!(template.read::<Singer>(&key!(1)).unwrap(), None);
    assert_eq!(template.count::<Album>().unwrap(), 2);
    assert_eq!(template.count::<Song>().unwrap(), 3);
    assert!(template.read_all::<Song>(None).unwrap().iter().all(|s| s.singer_id == 2));

    template.delete_key_set::<Singer>(&KeySet::all()).unwrap();
    assert_eq!(template.count::<Song>().unwrap(), 0);
}

#[test]
fn child_key_must_extend_parent_key() {
    let (template, _) = setup();
    let mut singer = singer_with_albums(1);
    singer.albums[0].singer_id = 99;
    let err = template.insert(&singer).unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)), "{err:?}");
    assert_eq!(template.count::<Singer>().unwrap(), 0);
}

#[test]
fn interleaved_insert_without_parent_row_fails_when_declared() {
    let (template, store) = setup();
    admin(&store).create_tables_if_missing(Singer::descriptor()).unwrap();
    let orphan = Album { singer_id: 5, album_id: 1, title: "orphan".into(), songs: Vec::new() };
    let err = template.insert(&orphan).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)), "{err:?}");
}

#[test]
fn lazy_children_load_on_demand() {
    let (template, _) = setup();
    let portfolio = Portfolio {
        owner: "ann".into(),
        label: "retirement".into(),
        holdings: vec![
            Holding { owner: "ann".into(), symbol: "AAA".into(), quantity: 10 },
            Holding { owner: "ann".into(), symbol: "BBB".into(), quantity: 0 },
            Holding { owner: "ann".into(), symbol: "CCC".into(), quantity: 5 },
        ],
    };
    template.insert(&portfolio).unwrap();

    let read: Portfolio = template.read(&key!("ann")).unwrap().unwrap();
    assert!(read.holdings.is_empty());

    let holdings: Vec<Holding> = template.read_interleaved(&read, "holdings").unwrap();
    let symbols: Vec<&str> = holdings.iter().map(|h| h.symbol.as_str()).collect();
    // the child's where clause still applies
    assert_eq!(symbols, vec!["AAA", "CCC"]);

    let err = template.read_interleaved::<Portfolio, Holding>(&read, "positions").unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
    let err = template.read_interleaved::<Portfolio, Trade>(&read, "holdings").unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
}

#[test]
fn create_ddl_follows_the_hierarchy() {
    let statements = SchemaUtils::create_table_ddl_cascade(Singer::descriptor());
    assert_eq!(
        statements,
        vec![
            "CREATE TABLE singers ( singer_id INT64 NOT NULL , name STRING(MAX) ) PRIMARY KEY ( singer_id )",
            "CREATE TABLE albums ( singer_id INT64 NOT NULL , album_id INT64 NOT NULL , title STRING(MAX) ) \
             PRIMARY KEY ( singer_id , album_id ), INTERLEAVE IN PARENT singers ON DELETE CASCADE",
            "CREATE TABLE songs ( singer_id INT64 NOT NULL , album_id INT64 NOT NULL , track INT64 NOT NULL , \
             title STRING(MAX) ) PRIMARY KEY ( singer_id , album_id , track ), \
             INTERLEAVE IN PARENT albums ON DELETE CASCADE",
        ]
    );
    assert_eq!(
        SchemaUtils::create_table_ddl(Trade::descriptor()),
        "CREATE TABLE trades ( trader_id STRING(MAX) NOT NULL , trade_id STRING(MAX) NOT NULL , \
         action STRING(MAX) , price FLOAT64 , shares FLOAT64 , symbol STRING(MAX) , curve ARRAY<FLOAT64> ) \
         PRIMARY KEY ( trader_id , trade_id )"
    );
    assert_eq!(
        SchemaUtils::drop_table_ddl_cascade(Singer::descriptor()),
        vec!["DROP TABLE songs", "DROP TABLE albums", "DROP TABLE singers"]
    );
    assert_eq!(SchemaUtils::drop_table_ddl(Trader::descriptor()), "DROP TABLE traders");
}

#[test]
fn admin_creates_only_missing_tables_and_drops_cascade() {
    let (_, store) = setup();
    let admin = admin(&store);
    assert!(!admin.table_exists("singers").unwrap());

    admin.execute_ddl_strings(&[SchemaUtils::create_table_ddl(Singer::descriptor())]).unwrap();
    let created = admin.create_tables_if_missing(Singer::descriptor()).unwrap();
    assert_eq!(created, vec!["albums".to_string(), "songs".to_string()]);
    assert!(admin.create_tables_if_missing(Singer::descriptor()).unwrap().is_empty());

    let schema = store.table_schema("songs").unwrap();
    assert_eq!(schema.parent.as_deref(), Some("albums"));
    assert!(schema.on_delete_cascade);

    // the parent cannot go while children are declared
    let err = admin.execute_ddl_strings(&[SchemaUtils::drop_table_ddl(Singer::descriptor())]).unwrap_err();
    assert!(matches!(err, StoreError::InvalidState(_)), "{err:?}");

    admin.execute_ddl_strings(&SchemaUtils::drop_table_ddl_cascade(Singer::descriptor())).unwrap();
    assert!(!admin.table_exists("albums").unwrap());
    assert!(!admin.table_exists("singers").unwrap());
}
