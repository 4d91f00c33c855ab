//! Ambient CRUD through the template over the in-memory store.

mod common;

use std::thread;
use std::time::Duration;

use common::*;
use rowmap_engine::{
    key, Entity, KeyRange, KeySet, PageableQueryOptions, QueryOptions, ReadOptions, Sort, Statement, StoreError,
    TimestampBound, Value,
};

#[test]
fn insert_then_read_round_trips() {
    let (template, _) = setup();
    let trader = Trader::new("t1", "John", "Doe");
    template.insert(&trader).unwrap();

    let read: Option<Trader> = template.read(&key!("t1")).unwrap();
    assert_eq!(read, Some(trader.clone()));

    let err = template.insert(&trader).unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)), "{err:?}");
}

#[test]
fn absent_keys_read_as_none_and_delete_quietly() {
    let (template, _) = setup();
    assert_eq!(template.read::<Trader>(&key!("nobody")).unwrap(), None);
    assert!(!template.exists_by_id::<Trader>(&key!("nobody")).unwrap());
    template.delete::<Trader>(&key!("nobody")).unwrap();

    template.insert(&Trader::new("t1", "John", "Doe")).unwrap();
    assert!(template.exists_by_id::<Trader>(&key!("t1")).unwrap());
}

#[test]
fn malformed_keys_are_invalid_arguments() {
    let (template, _) = setup();
    let empty = template.read::<Trade>(&key!()).unwrap_err();
    assert!(matches!(empty, StoreError::InvalidArgument(_)));

    let arity = template.read::<Trade>(&key!("t1")).unwrap_err();
    assert!(matches!(arity, StoreError::InvalidArgument(_)));

    let nested = template.exists_by_id::<Trader>(&key!(Value::Array(vec![Value::Int(1)]))).unwrap_err();
    assert!(matches!(nested, StoreError::InvalidArgument(_)));
}

#[test]
fn update_requires_existing_row_but_upsert_does_not() {
    let (template, _) = setup();
    let trader = Trader::new("t9", "Ann", "Lee");

    let err = template.update(&trader).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)), "{err:?}");

    template.upsert(&trader).unwrap();
    assert_eq!(template.read::<Trader>(&key!("t9")).unwrap(), Some(trader.clone()));

    let renamed = Trader { first_name: "Anna".into(), ..trader };
    template.update(&renamed).unwrap();
    assert_eq!(template.read::<Trader>(&key!("t9")).unwrap(), Some(renamed));
}

#[test]
fn update_with_empty_include_set_changes_nothing() {
    let (template, _) = setup();
    let trader = Trader::new("t1", "John", "Doe");
    template.insert(&trader).unwrap();

    let changed = Trader { first_name: "Jack".into(), last_name: None, ..trader.clone() };
    template.update_with(&changed, Some(&props(&[]))).unwrap();
    assert_eq!(template.read::<Trader>(&key!("t1")).unwrap(), Some(trader));

    // still checks existence
    let missing = Trader::new("t2", "X", "Y");
    let err = template.update_with(&missing, Some(&props(&[]))).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn include_set_restricts_written_properties() {
    let (template, _) = setup();
    template.insert(&Trader::new("t1", "John", "Doe")).unwrap();

    let changed = Trader { first_name: "Jack".into(), last_name: Some("Smith".into()), ..Trader::new("t1", "", "") };
    template.update_with(&changed, Some(&props(&["firstName"]))).unwrap();
    assert_eq!(template.read::<Trader>(&key!("t1")).unwrap(), Some(Trader::new("t1", "Jack", "Doe")));

    template.upsert_with(&changed, Some(&props(&["lastName"]))).unwrap();
    assert_eq!(template.read::<Trader>(&key!("t1")).unwrap(), Some(Trader::new("t1", "Jack", "Smith")));

    let err = template.update_with(&changed, Some(&props(&["nickname"]))).unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
}

#[test]
fn traders_and_trades_scenario() {
    let (template, store) = setup();
    let trades = Trade::descriptor();
    let admin = admin(&store);
    admin.create_tables_if_missing(Trader::descriptor()).unwrap();
    admin.create_tables_if_missing(trades).unwrap();

    template.delete_key_set::<Trader>(&KeySet::all()).unwrap();
    template.delete_key_set::<Trade>(&KeySet::all()).unwrap();

    template.insert(&Trader::new("template_trader1", "John", "Doe")).unwrap();

    let mut trade = Trade::new("template_trader1", "1", "BUY", 50.0);
    template.insert(&trade).unwrap();
    trade.trade_id = "2".into();
    trade.action = "SELL".into();
    template.insert(&trade).unwrap();
    trade.trade_id = "1".into();
    trade.trader_id = "template_trader2".into();
    template.insert(&trade).unwrap();

    let all: Vec<Trade> = template.read_all(None).unwrap();
    let ids: Vec<(&str, &str, &str)> =
        all.iter().map(|t| (t.trader_id.as_str(), t.trade_id.as_str(), t.action.as_str())).collect();
    assert_eq!(
        ids,
        vec![("template_trader1", "1", "BUY"), ("template_trader1", "2", "SELL"), ("template_trader2", "1", "SELL")]
    );
    assert!(all.iter().all(|t| t.price == 100.0 && t.shares == 50.0 && t.curve == vec![99.0, 101.0]));
    assert_eq!(template.count::<Trade>().unwrap(), 3);
}

#[test]
fn batch_insert_is_all_or_nothing() {
    let (template, _) = setup();
    template.insert(&Trade::new("t1", "2", "BUY", 1.0)).unwrap();

    let batch = vec![Trade::new("t1", "1", "BUY", 1.0), Trade::new("t1", "2", "SELL", 1.0)];
    let err = template.insert_all(&batch).unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));
    assert_eq!(template.read::<Trade>(&key!("t1", "1")).unwrap(), None);

    template.upsert_all(&batch).unwrap();
    assert_eq!(template.count::<Trade>().unwrap(), 2);

    let sold: Vec<Trade> = batch.iter().map(|t| Trade { action: "HOLD".into(), ..t.clone() }).collect();
    template.update_all(&sold).unwrap();
    let all: Vec<Trade> = template.read_all(None).unwrap();
    assert!(all.iter().all(|t| t.action == "HOLD"));
}

#[test]
fn deletes_by_entity_key_set_and_range() {
    let (template, _) = setup();
    let trades: Vec<Trade> = (1..=5).map(|i| Trade::new("t1", &i.to_string(), "BUY", 1.0)).collect();
    template.insert_all(&trades).unwrap();

    template.delete_entity(&trades[0]).unwrap();
    template.delete_all(&trades[1..2]).unwrap();
    template
        .delete_key_set::<Trade>(&KeySet::range(KeyRange::closed_open(key!("t1", "3"), key!("t1", "5"))))
        .unwrap();

    let left: Vec<Trade> = template.read_all(None).unwrap();
    assert_eq!(left, vec![trades[4].clone()]);
}

#[test]
fn key_set_reads_skip_missing_keys_and_honor_ranges() {
    let (template, _) = setup();
    let trades: Vec<Trade> = (1..=4).map(|i| Trade::new("t1", &i.to_string(), "BUY", 1.0)).collect();
    template.insert_all(&trades).unwrap();

    let keys = KeySet::from_keys([key!("t1", "3"), key!("t1", "9"), key!("t1", "1")]);
    let found: Vec<Trade> = template.read_key_set(&keys, None).unwrap();
    assert_eq!(found, vec![trades[0].clone(), trades[2].clone()]);

    let range = KeySet::range(KeyRange::prefix(key!("t1")));
    let limited: Vec<Trade> = template.read_key_set(&range, Some(&ReadOptions::new().limit(2))).unwrap();
    assert_eq!(limited, trades[..2].to_vec());

    let none: Vec<Trade> = template.read_key_set(&KeySet::default(), None).unwrap();
    assert!(none.is_empty());
}

#[test]
fn partial_reads_default_unselected_properties() {
    let (template, _) = setup();
    template.insert(&Trader::new("t1", "John", "Doe")).unwrap();

    let options = ReadOptions::new().include(["firstName"]);
    let read: Option<Trader> = template.read_with(&key!("t1"), Some(&options)).unwrap();
    assert_eq!(read, Some(Trader { last_name: None, ..Trader::new("t1", "John", "") }));

    let options = ReadOptions::new().exclude(["firstName"]);
    let read: Option<Trader> = template.read_with(&key!("t1"), Some(&options)).unwrap();
    assert_eq!(read, Some(Trader { first_name: String::new(), ..Trader::new("t1", "", "Doe") }));

    let options = ReadOptions::new().include(["middleName"]);
    let err = template.read_with::<Trader>(&key!("t1"), Some(&options)).unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
}

#[test]
fn queries_map_rows_in_store_order() {
    let (template, _) = setup();
    for (i, shares) in [(1, 10.0), (2, 300.0), (3, 150.0)] {
        template.insert(&Trade::new("t1", &i.to_string(), "BUY", shares)).unwrap();
    }

    let statement = Statement::new("SELECT trade_id, shares FROM trades WHERE shares > @min ORDER BY shares DESC")
        .bind("min", 100.0);
    let ids = template.query_map(|row| row.get::<String>("trade_id"), &statement, None).unwrap();
    assert_eq!(ids, vec!["2", "3"]);

    let statement = Statement::new("SELECT * FROM trades WHERE trade_id = @id").bind("id", "3");
    let trades: Vec<Trade> = template.query(&statement, Some(&QueryOptions::new())).unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].shares, 150.0);
}

#[test]
fn query_all_sorts_and_pages() {
    let (template, _) = setup();
    for (i, shares) in [(1, 40.0), (2, 10.0), (3, 30.0), (4, 20.0)] {
        template.insert(&Trade::new("t1", &i.to_string(), "BUY", shares)).unwrap();
    }

    let page = PageableQueryOptions::page(1, 2).sort(Sort::asc("shares"));
    let trades: Vec<Trade> = template.query_all(Some(&page)).unwrap();
    let shares: Vec<f64> = trades.iter().map(|t| t.shares).collect();
    assert_eq!(shares, vec![30.0, 40.0]);

    let desc = PageableQueryOptions::new().sort(Sort::desc("shares")).limit(1);
    let top: Vec<Trade> = template.query_all(Some(&desc)).unwrap();
    assert_eq!(top[0].trade_id, "1");

    let bad = PageableQueryOptions::new().sort(Sort::asc("volume"));
    assert!(matches!(template.query_all::<Trade>(Some(&bad)), Err(StoreError::InvalidArgument(_))));
}

#[test]
fn where_clause_filters_reads_queries_but_not_count() {
    let (template, _) = setup();
    template.insert(&Trade::new("t1", "1", "BUY", 50.0)).unwrap();
    template.insert(&Trade::new("t1", "2", "BUY", 500.0)).unwrap();

    let large: Vec<LargeTrade> = template.read_all(None).unwrap();
    assert_eq!(large.len(), 1);
    assert_eq!(large[0].trade_id, "2");

    assert_eq!(template.read::<LargeTrade>(&key!("t1", "1")).unwrap(), None);
    assert!(template.exists_by_id::<LargeTrade>(&key!("t1", "1")).unwrap());

    let queried: Vec<LargeTrade> = template.query_all(None).unwrap();
    assert_eq!(queried.len(), 1);
    assert_eq!(template.count::<LargeTrade>().unwrap(), 2);
}

#[test]
fn stale_reads_see_older_versions() {
    let (template, store) = setup();
    template.insert(&Trader::new("t1", "John", "Doe")).unwrap();
    let first_commit = store.last_commit_timestamp();
    template.update(&Trader::new("t1", "Jack", "Doe")).unwrap();

    let options = ReadOptions::new().timestamp_bound(TimestampBound::ReadTimestamp(first_commit));
    let old: Option<Trader> = template.read_with(&key!("t1"), Some(&options)).unwrap();
    assert_eq!(old.map(|t| t.first_name), Some("John".to_string()));

    thread::sleep(Duration::from_millis(20));
    let options = ReadOptions::new().timestamp_bound(TimestampBound::ExactStaleness(Duration::from_secs(3600)));
    assert_eq!(template.read_with::<Trader>(&key!("t1"), Some(&options)).unwrap(), None);

    let options = ReadOptions::new().timestamp_bound(TimestampBound::ExactStaleness(Duration::from_millis(1)));
    let current: Option<Trader> = template.read_with(&key!("t1"), Some(&options)).unwrap();
    assert_eq!(current.map(|t| t.first_name), Some("Jack".to_string()));
}

#[test]
fn ambient_dml_and_partitioned_dml_report_counts() {
    let (template, _) = setup();
    for i in 1..=3 {
        template.insert(&Trade::new("t1", &i.to_string(), "BUY", i as f64)).unwrap();
    }

    let update = Statement::new("UPDATE trades SET action = 'SELL' WHERE shares >= @min").bind("min", 2.0);
    assert_eq!(template.execute_dml_statement(&update).unwrap(), 2);

    let delete = Statement::new("DELETE FROM trades WHERE action = 'SELL'");
    assert!(template.execute_partitioned_dml_statement(&delete).unwrap() >= 2);
    assert_eq!(template.count::<Trade>().unwrap(), 1);
}
