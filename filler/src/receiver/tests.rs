use std::str::FromStr;
use std::sync::Arc;

use atomic_common::chain::{
    ActionTrace, Block, BlockPosition, Name, TableDeltaRow, TransactionTrace,
};
use serde_json::json;

use super::StateReceiver;
use crate::{
    abi_cache::ABI_TABLE,
    db::{DbTx as _, DbValue, MemoryStore, ROLLBACK_TABLE},
    handlers::{
        atomicassets::{AtomicAssetsArgs, AtomicAssetsHandler, OfferState},
        atomicmarket::{AtomicMarketArgs, AtomicMarketHandler, SaleState},
        ContractHandler,
    },
    notification::{test_support::CollectingPublisher, NotificationBus},
};

// ===== binary payload builders =====

fn enc_name(s: &str) -> [u8; 8] {
    Name::from_str(s).unwrap().as_u64().to_le_bytes()
}

fn enc_str(s: &str) -> Vec<u8> {
    let mut out = vec![s.len() as u8];
    out.extend_from_slice(s.as_bytes());
    out
}

// "8,WAX" as a raw symbol word
fn enc_symbol(precision: u8, code: &str) -> [u8; 8] {
    let mut value = precision as u64;
    for (i, c) in code.bytes().enumerate() {
        value |= (c as u64) << (8 * (i + 1));
    }
    value.to_le_bytes()
}

const ASSETS_ABI: &str = r#"{
    "version": "eosio::abi/1.1",
    "structs": [
        {"name": "logmint", "base": "", "fields": [
            {"name": "asset_id", "type": "uint64"},
            {"name": "collection_name", "type": "name"},
            {"name": "schema_name", "type": "name"},
            {"name": "template_id", "type": "int32"},
            {"name": "new_asset_owner", "type": "name"}
        ]},
        {"name": "logtransfer", "base": "", "fields": [
            {"name": "collection_name", "type": "name"},
            {"name": "from", "type": "name"},
            {"name": "to", "type": "name"},
            {"name": "asset_ids", "type": "uint64[]"},
            {"name": "memo", "type": "string"}
        ]},
        {"name": "acceptoffer", "base": "", "fields": [
            {"name": "offer_id", "type": "uint64"}
        ]}
    ],
    "actions": [
        {"name": "logmint", "type": "logmint", "ricardian_contract": ""},
        {"name": "logtransfer", "type": "logtransfer", "ricardian_contract": ""},
        {"name": "acceptoffer", "type": "acceptoffer", "ricardian_contract": ""}
    ]
}"#;

const MARKET_ABI: &str = r#"{
    "version": "eosio::abi/1.1",
    "structs": [
        {"name": "sale_row", "base": "", "fields": [
            {"name": "sale_id", "type": "uint64"},
            {"name": "seller", "type": "name"},
            {"name": "asset_ids", "type": "uint64[]"},
            {"name": "offer_id", "type": "int64"},
            {"name": "listing_price", "type": "asset"},
            {"name": "settlement_symbol", "type": "symbol"},
            {"name": "maker_marketplace", "type": "name"},
            {"name": "collection_name", "type": "name"},
            {"name": "collection_fee", "type": "float64"}
        ]}
    ],
    "tables": [
        {"name": "sales", "type": "sale_row", "index_type": "", "key_names": [], "key_types": []}
    ]
}"#;

fn enc_logmint(asset_id: u64, owner: &str) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&asset_id.to_le_bytes());
    data.extend_from_slice(&enc_name("frogs"));
    data.extend_from_slice(&enc_name("base"));
    data.extend_from_slice(&3i32.to_le_bytes());
    data.extend_from_slice(&enc_name(owner));
    data
}

fn enc_logtransfer(asset_ids: &[u64], from: &str, to: &str) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&enc_name("frogs"));
    data.extend_from_slice(&enc_name(from));
    data.extend_from_slice(&enc_name(to));
    data.push(asset_ids.len() as u8);
    for id in asset_ids {
        data.extend_from_slice(&id.to_le_bytes());
    }
    data.extend(enc_str("gift"));
    data
}

fn enc_acceptoffer(offer_id: u64) -> Vec<u8> {
    offer_id.to_le_bytes().to_vec()
}

fn enc_sale_row(sale_id: u64, seller: &str, offer_id: i64) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&sale_id.to_le_bytes());
    data.extend_from_slice(&enc_name(seller));
    data.push(1);
    data.extend_from_slice(&42u64.to_le_bytes());
    data.extend_from_slice(&offer_id.to_le_bytes());
    data.extend_from_slice(&100_000i64.to_le_bytes()); // 10.0000 WAX
    data.extend_from_slice(&enc_symbol(4, "WAX"));
    data.extend_from_slice(&enc_symbol(4, "WAX"));
    data.extend_from_slice(&enc_name(""));
    data.extend_from_slice(&enc_name("frogs"));
    data.extend_from_slice(&0.05f64.to_le_bytes());
    data
}

// ===== block builders =====

fn trace(seq: u64, account: &str, name: &str, data: Vec<u8>) -> ActionTrace {
    ActionTrace {
        global_sequence: seq,
        action_ordinal: seq as u32,
        creator_action_ordinal: 0,
        receiver: Name::from_str(account).unwrap(),
        account: Name::from_str(account).unwrap(),
        name: Name::from_str(name).unwrap(),
        authorization: vec![],
        data,
    }
}

fn block(block_num: u32, last_irreversible: u32, traces: Vec<ActionTrace>) -> Block {
    Block {
        block_num,
        block_id: format!("{:08x}aa", block_num),
        prev_id: format!("{:08x}aa", block_num - 1),
        head: BlockPosition {
            block_num: block_num + 10,
            block_id: "head".to_string(),
        },
        last_irreversible: BlockPosition {
            block_num: last_irreversible,
            block_id: "lib".to_string(),
        },
        timestamp: "2020-01-01T00:00:00.000".to_string(),
        producer: Name::from_str("producer").unwrap(),
        transactions: vec![TransactionTrace {
            id: "abcd".repeat(16),
            cpu_usage_us: 100,
            net_usage_words: 10,
            traces,
        }],
        deltas: vec![],
    }
}

fn sales_delta(sale_id: u64, value: Vec<u8>) -> TableDeltaRow {
    TableDeltaRow {
        code: Name::from_str("atomicmarket").unwrap(),
        scope: Name::from_str("atomicmarket").unwrap(),
        table: Name::from_str("sales").unwrap(),
        primary_key: sale_id,
        payer: Name::from_str("atomicmarket").unwrap(),
        present: true,
        value,
    }
}

struct Fixture {
    store: MemoryStore,
    collector: CollectingPublisher,
    receiver: StateReceiver,
}

fn fixture(handlers: Vec<Box<dyn ContractHandler>>) -> Fixture {
    let store = MemoryStore::new();
    let collector = CollectingPublisher::new();
    let bus = NotificationBus::new(Box::new(collector.clone()), "testchain", "test-reader");
    let mut receiver = StateReceiver::new(Arc::new(store.clone()), bus, handlers, "test-reader");

    receiver.abi_cache.install(
        Name::from_str("atomicassets").unwrap(),
        1,
        Arc::new(atomic_common::abi::Abi::from_json(ASSETS_ABI).unwrap()),
    );
    receiver.abi_cache.install(
        Name::from_str("atomicmarket").unwrap(),
        1,
        Arc::new(atomic_common::abi::Abi::from_json(MARKET_ABI).unwrap()),
    );

    Fixture {
        store,
        collector,
        receiver,
    }
}

fn assets_handler() -> Box<dyn ContractHandler> {
    Box::new(AtomicAssetsHandler::new(
        serde_json::from_value::<AtomicAssetsArgs>(json!({})).unwrap(),
    ))
}

fn market_handler() -> Box<dyn ContractHandler> {
    Box::new(AtomicMarketHandler::new(
        serde_json::from_value::<AtomicMarketArgs>(json!({})).unwrap(),
    ))
}

fn find_row<'a>(
    rows: &'a [crate::db::DbRow],
    column: &str,
    value: i64,
) -> Option<&'a crate::db::DbRow> {
    rows.iter()
        .find(|row| row.get(column).and_then(DbValue::as_i64) == Some(value))
}

#[tokio::test]
async fn test_mint_then_transfer() {
    let mut fx = fixture(vec![assets_handler()]);

    let b = block(
        100,
        50,
        vec![
            trace(200, "atomicassets", "logmint", enc_logmint(42, "alice")),
            trace(
                201,
                "atomicassets",
                "logtransfer",
                enc_logtransfer(&[42], "alice", "bob"),
            ),
        ],
    );
    fx.receiver.process_block(&b).await.unwrap();

    // asset 42 ends up owned by bob
    let assets = fx.store.dump("atomicassets_assets");
    let asset = find_row(&assets, "asset_id", 42).expect("asset row");
    assert_eq!(asset.get("owner"), Some(&DbValue::Text("bob".to_string())));

    // two log rows for the asset, in order
    let logs = fx.store.dump("atomicassets_logs");
    let names: Vec<&str> = logs
        .iter()
        .filter(|row| {
            row.get("relation_id").and_then(|v| v.as_str()) == Some("42")
                && row.get("relation_name").and_then(|v| v.as_str()) == Some("asset")
        })
        .filter_map(|row| row.get("name").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(names, vec!["logmint", "logtransfer"]);

    // notifications released after commit: mint first, then the update
    let messages = fx.collector.messages();
    assert!(messages.len() >= 2);
    let first: serde_json::Value = serde_json::from_str(&messages[0].1).unwrap();
    let second: serde_json::Value = serde_json::from_str(&messages[1].1).unwrap();
    assert_eq!(first["action"], "mint");
    assert_eq!(second["action"], "update");
}

#[tokio::test]
async fn test_offer_accept_updates_sale_in_same_block() {
    let mut fx = fixture(vec![assets_handler(), market_handler()]);

    // offer 7 exists from an earlier block, still pending
    {
        let mut tx = crate::db::DbStore::begin(&fx.store).await.unwrap();
        tx.insert(
            "atomicassets_offers",
            &[crate::db_row! {
                "contract" => "atomicassets",
                "offer_id" => 7u64,
                "sender" => "alice",
                "recipient" => "bob",
                "memo" => "",
                "state" => OfferState::Pending.as_i64(),
            }],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    // one block carries both the sale row delta and the offer acceptance;
    // the delta job must land before the state reconciliation job
    let mut b = block(
        200,
        150,
        vec![trace(300, "atomicassets", "acceptoffer", enc_acceptoffer(7))],
    );
    b.deltas.push(sales_delta(5, enc_sale_row(5, "alice", 7)));

    fx.receiver.process_block(&b).await.unwrap();

    let offers = fx.store.dump("atomicassets_offers");
    let offer = find_row(&offers, "offer_id", 7).expect("offer row");
    assert_eq!(
        offer.get("state"),
        Some(&DbValue::Int(OfferState::Accepted.as_i64()))
    );

    let sales = fx.store.dump("atomicmarket_sales");
    let sale = find_row(&sales, "sale_id", 5).expect("sale row");
    assert_eq!(
        sale.get("state"),
        Some(&DbValue::Int(SaleState::Sold.as_i64()))
    );
}

#[tokio::test]
async fn test_fork_rollback_restores_state() {
    let mut fx = fixture(vec![assets_handler()]);

    for (block_num, asset_id) in [(300u32, 1u64), (301, 2), (302, 3)] {
        let b = block(
            block_num,
            299,
            vec![trace(
                block_num as u64 * 10,
                "atomicassets",
                "logmint",
                enc_logmint(asset_id, "alice"),
            )],
        );
        fx.receiver.process_block(&b).await.unwrap();
    }
    assert_eq!(fx.store.dump("atomicassets_assets").len(), 3);

    fx.receiver.handle_fork(301).await.unwrap();

    // the alternative branch mints a different asset
    let b = block(
        301,
        299,
        vec![trace(
            4000,
            "atomicassets",
            "logmint",
            enc_logmint(4, "carol"),
        )],
    );
    fx.receiver.process_block(&b).await.unwrap();

    let assets = fx.store.dump("atomicassets_assets");
    let ids: Vec<i64> = assets
        .iter()
        .filter_map(|row| row.get("asset_id").and_then(DbValue::as_i64))
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&1));
    assert!(ids.contains(&4));

    // log rows of the rolled back blocks are gone
    let logs = fx.store.dump("atomicassets_logs");
    assert!(logs
        .iter()
        .all(|row| row.get("relation_id").and_then(|v| v.as_str()) != Some("2")));
    assert!(logs
        .iter()
        .all(|row| row.get("relation_id").and_then(|v| v.as_str()) != Some("3")));

    // the fork itself was announced on the chain channel
    let messages = fx.collector.messages();
    let fork_message = messages
        .iter()
        .find(|(channel, _)| channel.ends_with(":chain"))
        .expect("fork notification");
    let payload: serde_json::Value = serde_json::from_str(&fork_message.1).unwrap();
    assert_eq!(payload["action"], "fork");
    assert_eq!(payload["data"]["block_num"], 301);
}

#[tokio::test]
async fn test_reversibility_gate_suppresses_notifications() {
    let mut fx = fixture(vec![assets_handler()]);

    // block_num == last irreversible: the row is written, nothing is
    // published and no rollback row is recorded
    let b = block(
        400,
        400,
        vec![trace(500, "atomicassets", "logmint", enc_logmint(9, "dave"))],
    );
    fx.receiver.process_block(&b).await.unwrap();

    assert_eq!(fx.store.dump("atomicassets_assets").len(), 1);
    assert!(fx.collector.messages().is_empty());
    assert!(fx.store.dump(ROLLBACK_TABLE).is_empty());
}

#[tokio::test]
async fn test_setabi_installs_and_persists() {
    let mut fx = fixture(vec![assets_handler()]);

    // binary abi_def with one action "noop"
    let mut abi_bin = Vec::new();
    abi_bin.extend(enc_str("eosio::abi/1.1"));
    abi_bin.push(0); // types
    abi_bin.push(1); // structs
    abi_bin.extend(enc_str("noop"));
    abi_bin.extend(enc_str(""));
    abi_bin.push(0); // no fields
    abi_bin.push(1); // actions
    abi_bin.extend_from_slice(&enc_name("noop"));
    abi_bin.extend(enc_str("noop"));
    abi_bin.extend(enc_str(""));
    abi_bin.push(0); // tables
    abi_bin.push(0); // ricardian_clauses
    abi_bin.push(0); // error_messages
    abi_bin.push(0); // abi_extensions

    let mut setabi_data = Vec::new();
    setabi_data.extend_from_slice(&enc_name("atomicassets"));
    setabi_data.push(abi_bin.len() as u8);
    setabi_data.extend_from_slice(&abi_bin);

    let b = block(500, 450, vec![trace(600, "eosio", "setabi", setabi_data)]);
    fx.receiver.process_block(&b).await.unwrap();

    // the new ABI is active from block 500 on, the old one before it
    let contract = Name::from_str("atomicassets").unwrap();
    let at_500 = fx.receiver.abi_cache.abi_for(&contract, 500).unwrap();
    assert!(at_500.action_type("noop").is_some());
    let at_499 = fx.receiver.abi_cache.abi_for(&contract, 499).unwrap();
    assert!(at_499.action_type("logmint").is_some());

    assert_eq!(fx.store.dump(ABI_TABLE).len(), 1);
}

#[tokio::test]
async fn test_reader_position_advances() {
    let mut fx = fixture(vec![assets_handler()]);

    let b = block(
        700,
        650,
        vec![trace(800, "atomicassets", "logmint", enc_logmint(1, "alice"))],
    );
    fx.receiver.process_block(&b).await.unwrap();

    let position = fx.receiver.load_position().await.unwrap();
    assert_eq!(position, Some(700));
    assert_eq!(fx.receiver.last_committed(), Some(700));
}
