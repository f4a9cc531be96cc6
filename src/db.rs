use eyre::{eyre, Result};
use rusqlite::{params, types::ValueRef, Connection};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::models::{Transfer, WalletSnapshot};
use crate::parser;

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS wallets (
  address           TEXT PRIMARY KEY,
  ens               TEXT,
  eth_balance       TEXT, -- wei, decimal string
  transaction_count INTEGER,
  updated_at        TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS token_balances (
  wallet_address   TEXT NOT NULL,
  contract_address TEXT NOT NULL,
  raw_balance      TEXT, -- hex quantity as reported
  PRIMARY KEY (wallet_address, contract_address),
  FOREIGN KEY (wallet_address) REFERENCES wallets(address)
);

CREATE TABLE IF NOT EXISTS transactions (
  transfer_id      TEXT PRIMARY KEY,
  hash             TEXT NOT NULL,
  wallet_address   TEXT NOT NULL,
  block_number     INTEGER,
  from_address     TEXT,
  to_address       TEXT,
  category         TEXT NOT NULL,
  asset            TEXT,
  value            TEXT,
  contract_address TEXT,
  raw_data         TEXT NOT NULL, -- full transfer JSON
  FOREIGN KEY (wallet_address) REFERENCES wallets(address)
);

CREATE TABLE IF NOT EXISTS nfts (
  wallet_address   TEXT NOT NULL,
  contract_address TEXT NOT NULL,
  token_id         TEXT NOT NULL,
  name             TEXT,
  collection_name  TEXT,
  raw_metadata     TEXT NOT NULL, -- full NFT JSON
  PRIMARY KEY (wallet_address, contract_address, token_id),
  FOREIGN KEY (wallet_address) REFERENCES wallets(address)
);
"#;

/// Connect to SQLite (with WAL mode for performance)
pub fn connect(path: &str) -> Result<Connection> {
    let path = path.strip_prefix("sqlite://").unwrap_or(path);
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(conn)
}

/// Create the wallet schema
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(INIT_SQL)?;
    Ok(())
}

/// Rows written by one `store_snapshot` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoredCounts {
    pub token_balances: usize,
    pub transactions: usize,
    pub nfts: usize,
}

/// Provider id when present, otherwise a key built from the transfer's identity.
fn transfer_id(transfer: &Transfer, hash: &str) -> String {
    if let Some(id) = transfer.extra.get("uniqueId").and_then(Value::as_str) {
        return id.to_string();
    }
    format!(
        "{hash}:{}:{}:{}:{}",
        transfer.category.as_str(),
        transfer.from.as_deref().unwrap_or_default(),
        transfer.to.as_deref().unwrap_or_default(),
        transfer.raw_contract.address.as_deref().unwrap_or_default(),
    )
}

fn str_at<'a>(value: &'a Value, pointers: &[&str]) -> Option<&'a str> {
    pointers
        .iter()
        .find_map(|p| value.pointer(p).and_then(Value::as_str))
}

/// Upsert a wallet snapshot. Reloading the same wallet refreshes rows in place.
pub fn store_snapshot(conn: &Connection, snapshot: &WalletSnapshot) -> Result<StoredCounts> {
    let db_tx = conn.unchecked_transaction()?;
    let meta = &snapshot.metadata;
    let wallet = meta.address.as_str();
    let mut counts = StoredCounts::default();

    db_tx.execute(
        r#"
        INSERT INTO wallets (address, ens, eth_balance, transaction_count, updated_at)
        VALUES (?1, ?2, ?3, ?4, datetime('now'))
        ON CONFLICT(address) DO UPDATE SET
            ens               = excluded.ens,
            eth_balance       = excluded.eth_balance,
            transaction_count = excluded.transaction_count,
            updated_at        = excluded.updated_at
        "#,
        params![
            wallet,
            meta.ens,
            meta.eth_balance,
            i64::try_from(meta.transaction_count).unwrap_or(i64::MAX)
        ],
    )?;

    for balance in &snapshot.token_balances.token_balances {
        db_tx.execute(
            r#"
            INSERT INTO token_balances (wallet_address, contract_address, raw_balance)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(wallet_address, contract_address) DO UPDATE SET
                raw_balance = excluded.raw_balance
            "#,
            params![wallet, balance.contract_address, balance.token_balance],
        )?;
        counts.token_balances += 1;
    }

    for transfer in &snapshot.transfers {
        let Some(hash) = transfer.hash.as_deref().filter(|h| !h.is_empty()) else {
            continue;
        };
        let block_number = transfer
            .block_num
            .as_deref()
            .and_then(|b| parser::hex_to_u64(b).ok())
            .and_then(|n| i64::try_from(n).ok());
        let value = transfer.value.as_ref().map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });

        db_tx.execute(
            r#"
            INSERT INTO transactions (
                transfer_id, hash, wallet_address, block_number,
                from_address, to_address, category, asset,
                value, contract_address, raw_data
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(transfer_id) DO UPDATE SET
                block_number = excluded.block_number,
                value        = excluded.value,
                raw_data     = excluded.raw_data
            "#,
            params![
                transfer_id(transfer, hash),
                hash,
                wallet,
                block_number,
                transfer.from,
                transfer.to,
                transfer.category.as_str(),
                transfer.asset,
                value,
                transfer.raw_contract.address,
                serde_json::to_string(transfer)?
            ],
        )?;
        counts.transactions += 1;
    }

    let owned = snapshot.nfts.as_ref().map(|n| n.owned_nfts.as_slice()).unwrap_or_default();
    for nft in owned {
        let contract = str_at(nft, &["/contract/address"]);
        let token_id = str_at(nft, &["/tokenId", "/id/tokenId"]);
        let (Some(contract), Some(token_id)) = (contract, token_id) else {
            continue;
        };

        db_tx.execute(
            r#"
            INSERT INTO nfts (
                wallet_address, contract_address, token_id,
                name, collection_name, raw_metadata
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(wallet_address, contract_address, token_id) DO UPDATE SET
                name            = excluded.name,
                collection_name = excluded.collection_name,
                raw_metadata    = excluded.raw_metadata
            "#,
            params![
                wallet,
                contract,
                token_id,
                str_at(nft, &["/name", "/title"]),
                str_at(nft, &["/collection/name", "/contractMetadata/name"]),
                nft.to_string()
            ],
        )?;
        counts.nfts += 1;
    }

    db_tx.commit()?;
    info!(
        wallet,
        tokens = counts.token_balances,
        transfers = counts.transactions,
        nfts = counts.nfts,
        "stored wallet snapshot"
    );
    Ok(counts)
}

/// User tables, excluding SQLite internals.
pub fn table_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// `CREATE` statements of every user table, used as prompt context.
pub fn table_info(conn: &Connection) -> Result<String> {
    let mut stmt = conn.prepare(
        "SELECT sql FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND sql IS NOT NULL
         ORDER BY name",
    )?;
    let ddl = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ddl.join(";\n\n"))
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}

/// Run one statement. Row-returning statements yield one JSON object per row;
/// anything else yields `[{"affected_rows": n}]`.
pub fn execute(conn: &Connection, sql: &str) -> Result<Vec<Map<String, Value>>> {
    let mut stmt = conn.prepare(sql)?;
    if stmt.column_count() == 0 {
        let affected = stmt.execute([])?;
        let mut row = Map::new();
        row.insert("affected_rows".to_string(), Value::from(affected));
        return Ok(vec![row]);
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut obj = Map::new();
        for (i, name) in columns.iter().enumerate() {
            obj.insert(name.clone(), to_json(row.get_ref(i)?));
        }
        out.push(obj);
    }
    Ok(out)
}

/// Reject input carrying more than one statement. Semicolons inside quoted
/// literals or identifiers do not count.
pub fn ensure_single_statement(sql: &str) -> Result<()> {
    let trimmed = sql.trim();
    if trimmed.trim_end_matches(';').trim().is_empty() {
        return Err(eyre!("empty SQL statement"));
    }

    let mut quote: Option<char> = None;
    for (i, c) in trimmed.char_indices() {
        match quote {
            // doubled quotes ('a''b') close and reopen, which nets out
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                ';' => {
                    let rest = &trimmed[i + 1..];
                    if rest.chars().any(|c| c != ';' && !c.is_whitespace()) {
                        return Err(eyre!("only one SQL statement can be executed at a time"));
                    }
                    break;
                }
                _ => {}
            },
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::aggregator::derive_stats;
    use crate::models::{
        Category, NftCollection, RawContract, TokenBalance, TokenBalances, WalletMetadata,
    };
    use alloy::primitives::Address;
    use chrono::Utc;
    use serde_json::json;

    pub(crate) const SNAPSHOT_WALLET: &str = "0x1111111111111111111111111111111111111111";

    /// Wallet with one token, three transfers (one without hash) and two NFTs
    /// (one missing its token id).
    pub(crate) fn sample_snapshot(token_balance: &str) -> WalletSnapshot {
        let other = "0x2222222222222222222222222222222222222222";
        let mut with_id = Transfer {
            block_num: Some("0x10".to_string()),
            hash: Some("0xaa".to_string()),
            from: Some(other.to_string()),
            to: Some(SNAPSHOT_WALLET.to_string()),
            value: Some(json!(1.5)),
            asset: Some("ETH".to_string()),
            category: Category::External,
            ..Default::default()
        };
        with_id.extra.insert("uniqueId".to_string(), json!("0xaa:external"));
        let token = Transfer {
            hash: Some("0xbb".to_string()),
            from: Some(SNAPSHOT_WALLET.to_string()),
            to: Some(other.to_string()),
            value: Some(json!(10)),
            asset: Some("USDC".to_string()),
            category: Category::Erc20,
            raw_contract: RawContract {
                address: Some("0xusdc".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let transfers = vec![with_id, token, Transfer::default()];

        let address: Address = SNAPSHOT_WALLET.parse().unwrap();
        WalletSnapshot {
            metadata: WalletMetadata {
                address: SNAPSHOT_WALLET.to_string(),
                ens: Some("alice.eth".to_string()),
                eth_balance: "1000000000000000000".to_string(),
                eth_balance_formatted: "1".to_string(),
                transaction_count: 7,
            },
            derived_stats: derive_stats(&address, &transfers),
            transfers,
            token_balances: TokenBalances {
                address: SNAPSHOT_WALLET.to_string(),
                token_balances: vec![TokenBalance {
                    contract_address: "0xusdc".to_string(),
                    token_balance: Some(token_balance.to_string()),
                    error: None,
                }],
            },
            nfts: Some(NftCollection {
                owned_nfts: vec![
                    json!({
                        "contract": { "address": "0xpunks" },
                        "id": { "tokenId": "0x01" },
                        "title": "Punk #1",
                        "contractMetadata": { "name": "Punks" }
                    }),
                    json!({ "contract": { "address": "0xpunks" } }),
                ],
                fetched: 2,
                total_count: 2,
            }),
            fetched_at: Utc::now(),
        }
    }

    pub(crate) fn migrated() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    pub(crate) fn sample() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE wallets (address TEXT PRIMARY KEY, label TEXT, balance REAL, raw BLOB);
             INSERT INTO wallets VALUES ('0xabc', 'treasury', 12.5, x'beef');
             INSERT INTO wallets VALUES ('0xdef', NULL, 3, NULL);
             CREATE TABLE transfers (tx_hash TEXT, amount INTEGER);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn lists_tables_and_schema() {
        let conn = sample();
        assert_eq!(table_names(&conn).unwrap(), vec!["transfers", "wallets"]);
        let info = table_info(&conn).unwrap();
        assert!(info.contains("CREATE TABLE wallets"));
        assert!(info.contains("CREATE TABLE transfers"));
    }

    #[test]
    fn migrations_are_repeatable() {
        let conn = migrated();
        run_migrations(&conn).unwrap();
        assert_eq!(
            table_names(&conn).unwrap(),
            vec!["nfts", "token_balances", "transactions", "wallets"]
        );
    }

    #[test]
    fn snapshot_is_upserted() {
        let conn = migrated();
        let counts = store_snapshot(&conn, &sample_snapshot("0x01")).unwrap();
        assert_eq!(
            counts,
            StoredCounts {
                token_balances: 1,
                transactions: 2,
                nfts: 1,
            }
        );

        // reload with a new balance: rows are updated, not duplicated
        store_snapshot(&conn, &sample_snapshot("0x02")).unwrap();
        let rows = execute(&conn, "SELECT raw_balance FROM token_balances").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["raw_balance"], "0x02");

        let rows = execute(
            &conn,
            "SELECT transfer_id, block_number, value, contract_address FROM transactions ORDER BY hash",
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["transfer_id"], "0xaa:external");
        assert_eq!(rows[0]["block_number"], 16);
        assert_eq!(rows[0]["value"], "1.5");
        assert_eq!(rows[1]["contract_address"], "0xusdc");

        let rows = execute(&conn, "SELECT name, collection_name, token_id FROM nfts").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Punk #1");
        assert_eq!(rows[0]["collection_name"], "Punks");
        assert_eq!(rows[0]["token_id"], "0x01");

        let rows = execute(&conn, "SELECT ens, transaction_count FROM wallets").unwrap();
        assert_eq!(rows[0]["ens"], "alice.eth");
        assert_eq!(rows[0]["transaction_count"], 7);
    }

    #[test]
    fn rows_become_json_objects() {
        let conn = sample();
        let rows = execute(&conn, "SELECT * FROM wallets ORDER BY address").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["label"], "treasury");
        assert_eq!(rows[0]["balance"], 12.5);
        assert_eq!(rows[0]["raw"], "beef");
        assert_eq!(rows[1]["label"], Value::Null);
    }

    #[test]
    fn statements_without_rows_report_affected_count() {
        let conn = sample();
        let rows = execute(&conn, "UPDATE wallets SET label = 'x'").unwrap();
        assert_eq!(rows[0]["affected_rows"], 2);
    }

    #[test]
    fn rejects_multiple_statements() {
        assert!(ensure_single_statement("SELECT 1;").is_ok());
        assert!(ensure_single_statement("SELECT 1; DROP TABLE wallets").is_err());
        assert!(ensure_single_statement("  ").is_err());
        assert!(ensure_single_statement(";").is_err());
    }

    #[test]
    fn semicolons_inside_literals_are_allowed() {
        assert!(ensure_single_statement("SELECT * FROM wallets WHERE label = 'a;b'").is_ok());
        assert!(ensure_single_statement("SELECT 'it''s; fine' AS x;").is_ok());
        assert!(ensure_single_statement("SELECT \"odd;name\" FROM t").is_ok());
        assert!(ensure_single_statement("SELECT 'x;'; DELETE FROM wallets").is_err());
    }
}
