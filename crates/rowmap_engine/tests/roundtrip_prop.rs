//! Property tests: whatever is written reads back the same.

mod common;

use std::collections::BTreeMap;

use common::*;
use proptest::prelude::*;
use rowmap_engine::{key, KeySet, StoreError};

fn arb_trade() -> impl Strategy<Value = Trade> {
    (
        "[a-c]{1,2}",
        "[0-9]{1,3}",
        prop_oneof![Just("BUY"), Just("SELL")],
        -1.0e6..1.0e6f64,
        0.0..1.0e4f64,
        "[A-Z]{0,5}",
        prop::collection::vec(-1.0e3..1.0e3f64, 0..4),
    )
        .prop_map(|(trader_id, trade_id, action, price, shares, symbol, curve)| Trade {
            trader_id,
            trade_id,
            action: action.to_string(),
            price,
            shares,
            symbol,
            curve,
        })
}

fn arb_trader() -> impl Strategy<Value = Trader> {
    ("[a-z]{1,6}", ".{0,8}", proptest::option::of("[A-Za-z' ]{0,8}"))
        .prop_map(|(trader_id, first_name, last_name)| Trader { trader_id, first_name, last_name })
}

proptest! {
    #[test]
    fn insert_then_read_returns_equal_entity(trade in arb_trade(), trader in arb_trader()) {
        let (template, _) = setup();
        template.insert(&trade).unwrap();
        template.insert(&trader).unwrap();

        let read = template.read::<Trade>(&key!(trade.trader_id.as_str(), trade.trade_id.as_str())).unwrap();
        prop_assert_eq!(read, Some(trade.clone()));
        let read = template.read::<Trader>(&key!(trader.trader_id.as_str())).unwrap();
        prop_assert_eq!(read, Some(trader));

        prop_assert!(matches!(template.insert(&trade), Err(StoreError::AlreadyExists(_))));
    }

    #[test]
    fn upserts_keep_the_last_write_per_key(trades in prop::collection::vec(arb_trade(), 0..12)) {
        let (template, _) = setup();
        let mut expected = BTreeMap::new();
        for trade in &trades {
            template.upsert(trade).unwrap();
            expected.insert((trade.trader_id.clone(), trade.trade_id.clone()), trade.clone());
        }

        let all: Vec<Trade> = template.read_all(None).unwrap();
        prop_assert_eq!(all, expected.values().cloned().collect::<Vec<_>>());
        prop_assert_eq!(template.count::<Trade>().unwrap(), expected.len() as u64);

        template.delete_key_set::<Trade>(&KeySet::all()).unwrap();
        prop_assert_eq!(template.count::<Trade>().unwrap(), 0);
    }
}
