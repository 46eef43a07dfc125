//! Decentralized-exchange prices from the CNT index database.
//!
//! The indexer process keeps one row per observed pool price in a sqlite table:
//!
//! ```sql
//! CREATE TABLE price_data (
//!     pair      TEXT    NOT NULL,  -- e.g. "FACT-ADA"
//!     source    TEXT    NOT NULL,  -- DEX name
//!     price     REAL    NOT NULL,
//!     volume    REAL,
//!     timestamp INTEGER NOT NULL   -- unix seconds
//! );
//! ```
//!
//! For every requested pair the latest row of each DEX is reported as-is; no
//! aggregation happens here. The current chain tip from Ogmios is attached so the
//! validator can judge freshness.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::DexSource;
use crate::envelope::{format_timestamp, RawObservation};
use crate::utils::error::{Error, Result};

/// Latest quote for a pair on one DEX
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexQuote {
    pub source: String,
    pub price: f64,
    pub volume: Option<f64>,
    pub timestamp: i64,
}

/// Chain tip as reported by Ogmios
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTip {
    pub slot: u64,
    pub id: String,
}

/// Connection settings for the CNT indexer, passed explicitly instead of
/// being looked up ad hoc.
#[derive(Debug, Clone)]
pub struct CntIndexer {
    db_path: PathBuf,
    ogmios_url: String,
    timeout: Duration,
}

impl CntIndexer {
    pub fn new(db_path: impl Into<PathBuf>, ogmios_url: impl Into<String>, timeout: Duration) -> Self {
        Self { db_path: db_path.into(), ogmios_url: ogmios_url.into(), timeout }
    }

    /// Ask Ogmios for the current chain tip (`queryNetwork/tip`).
    pub async fn query_tip(&self) -> Result<ChainTip> {
        info!("connecting to ogmios");
        let (mut ws, _) = tokio::time::timeout(self.timeout, connect_async(self.ogmios_url.as_str()))
            .await
            .map_err(|_| Error::ConnectError(format!("ogmios connect timed out: {}", self.ogmios_url)))?
            .map_err(|e| Error::ConnectError(format!("ogmios: {}", e)))?;

        let request = json!({"jsonrpc": "2.0", "method": "queryNetwork/tip", "id": "collector-node"});
        ws.send(Message::Text(request.to_string()))
            .await
            .map_err(|e| Error::ConnectError(format!("ogmios send: {}", e)))?;

        let reply = loop {
            let next = tokio::time::timeout(self.timeout, ws.next())
                .await
                .map_err(|_| Error::DataError("ogmios did not answer tip query".into()))?;
            match next {
                | Some(Ok(Message::Text(txt))) => break txt,
                | Some(Ok(Message::Close(_))) | None => {
                    return Err(Error::DataError("ogmios closed before answering".into()))
                }
                | Some(Ok(_)) => continue,
                | Some(Err(e)) => return Err(Error::DataError(format!("ogmios: {}", e))),
            }
        };
        let _ = ws.close(None).await;
        parse_tip(&reply)
    }
}

/// Parse a JSON-RPC `queryNetwork/tip` response.
pub fn parse_tip(reply: &str) -> Result<ChainTip> {
    let v: Value = serde_json::from_str(reply)?;
    if let Some(err) = v.get("error") {
        return Err(Error::DataError(format!("ogmios error: {}", err)));
    }
    let result = v.get("result").ok_or_else(|| Error::DataError("ogmios reply has no result".into()))?;
    let slot = result.get("slot").and_then(Value::as_u64);
    let id = result.get("id").and_then(Value::as_str);
    match (slot, id) {
        | (Some(slot), Some(id)) => Ok(ChainTip { slot, id: id.to_string() }),
        | _ => Err(Error::DataError(format!("unexpected tip result: {}", result))),
    }
}

/// Latest quote per DEX for `pair`, newest first.
pub fn latest_quotes(conn: &Connection, pair: &str) -> Result<Vec<DexQuote>> {
    let mut stmt = conn.prepare(
        "SELECT source, price, volume, MAX(timestamp) AS ts
           FROM price_data
          WHERE pair = ?1
          GROUP BY source
          ORDER BY ts DESC",
    )?;
    let rows = stmt.query_map(params![pair], |row| {
        Ok(DexQuote {
            source: row.get(0)?,
            price: row.get(1)?,
            volume: row.get(2)?,
            timestamp: row.get(3)?,
        })
    })?;
    let mut quotes = Vec::new();
    for row in rows {
        quotes.push(row?);
    }
    Ok(quotes)
}

fn open_read_only(path: &Path) -> Result<Connection> {
    Ok(Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?)
}

/// Build one observation per pair that has quotes. Pairs without quotes, or whose
/// query fails, are logged and left out.
fn collect_observations(conn: &Connection, pairs: &[String], tip: Option<&ChainTip>) -> Vec<RawObservation> {
    let mut batch = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let quotes = match latest_quotes(conn, pair) {
            | Ok(q) if !q.is_empty() => q,
            | Ok(_) => {
                error!("no message returned for: '{}'", pair);
                continue;
            }
            | Err(e) => {
                error!("no message returned for: '{}': {}", pair, e);
                continue;
            }
        };
        let newest = quotes.iter().map(|q| q.timestamp).max().unwrap_or_default();
        let timestamp = Utc
            .timestamp_opt(newest, 0)
            .single()
            .map(format_timestamp)
            .unwrap_or_else(|| newest.to_string());

        let mut data = Map::new();
        data.insert("sources".into(), json!(quotes));
        if let Some(tip) = tip {
            data.insert("chain_tip".into(), json!(tip));
        }
        batch.push(RawObservation::new(pair.clone(), timestamp, data));
    }
    batch
}

#[async_trait]
impl DexSource for CntIndexer {
    async fn fetch_batch(&self, pairs: &[String]) -> Vec<RawObservation> {
        debug!("retrieving dex pairs");
        if pairs.is_empty() {
            return Vec::new();
        }
        let tip = match self.query_tip().await {
            | Ok(tip) => {
                debug!("chain tip: slot {} ({})", tip.slot, tip.id);
                Some(tip)
            }
            | Err(e) => {
                warn!("chain tip unavailable, continuing without it: {}", e);
                None
            }
        };

        info!("connecting to the cnt database");
        let db_path = self.db_path.clone();
        let pairs = pairs.to_vec();
        let joined = tokio::task::spawn_blocking(move || -> Result<Vec<RawObservation>> {
            let conn = open_read_only(&db_path)?;
            Ok(collect_observations(&conn, &pairs, tip.as_ref()))
        })
        .await;

        match joined {
            | Ok(Ok(batch)) => {
                info!("retrieved '{}' dex pairs", batch.len());
                batch
            }
            | Ok(Err(e)) => {
                error!("cnt database unavailable: {}", e);
                Vec::new()
            }
            | Err(e) => {
                error!("cnt query task failed: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    fn seeded_db() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cnt.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE price_data (
                 pair TEXT NOT NULL, source TEXT NOT NULL, price REAL NOT NULL,
                 volume REAL, timestamp INTEGER NOT NULL
             );
             INSERT INTO price_data VALUES ('FACT-ADA', 'minswap', 0.031, 1200.0, 1714521600);
             INSERT INTO price_data VALUES ('FACT-ADA', 'minswap', 0.032, 1300.0, 1714521660);
             INSERT INTO price_data VALUES ('FACT-ADA', 'sundae',  0.030, NULL,   1714521630);
             INSERT INTO price_data VALUES ('HOSKY-ADA', 'minswap', 0.0000001, 5.0, 1714521000);",
        )
        .unwrap();
        (dir, path)
    }

    #[test]
    fn test_latest_quotes_per_source() {
        let (_dir, path) = seeded_db();
        let conn = open_read_only(&path).unwrap();
        let quotes = latest_quotes(&conn, "FACT-ADA").unwrap();
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].source, "minswap");
        assert_eq!(quotes[0].price, 0.032);
        assert_eq!(quotes[0].timestamp, 1714521660);
        assert_eq!(quotes[1].volume, None);
        assert!(latest_quotes(&conn, "NOPE-ADA").unwrap().is_empty());
    }

    #[test]
    fn test_collect_drops_pairs_without_data() {
        let (_dir, path) = seeded_db();
        let conn = open_read_only(&path).unwrap();
        let tip = ChainTip { slot: 42, id: "abcd".into() };
        let pairs = vec!["FACT-ADA".to_string(), "NOPE-ADA".to_string(), "HOSKY-ADA".to_string()];
        let batch = collect_observations(&conn, &pairs, Some(&tip));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].feed, "FACT-ADA");
        assert_eq!(batch[0].timestamp, "2024-05-01T00:01:00Z");
        assert_eq!(batch[0].data["chain_tip"]["slot"], 42);
        assert_eq!(batch[1].feed, "HOSKY-ADA");
    }

    #[test]
    fn test_parse_tip() {
        let tip = parse_tip(r#"{"jsonrpc":"2.0","method":"queryNetwork/tip","result":{"slot":1234,"id":"ff00"},"id":"x"}"#)
            .unwrap();
        assert_eq!(tip, ChainTip { slot: 1234, id: "ff00".into() });
        assert!(parse_tip(r#"{"jsonrpc":"2.0","error":{"code":-32601}}"#).is_err());
        assert!(parse_tip(r#"{"jsonrpc":"2.0","result":"origin"}"#).is_err());
    }

    #[tokio::test]
    async fn test_fetch_batch_with_ogmios_tip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            if let Some(Ok(Message::Text(_))) = ws.next().await {
                let reply = r#"{"jsonrpc":"2.0","result":{"slot":99,"id":"beef"},"id":"collector-node"}"#;
                ws.send(Message::Text(reply.to_string())).await.unwrap();
            }
        });

        let (_dir, path) = seeded_db();
        let indexer = CntIndexer::new(path, format!("ws://{}", addr), Duration::from_secs(5));
        let batch = indexer.fetch_batch(&["FACT-ADA".to_string()]).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].data["chain_tip"]["id"], "beef");
    }

    #[tokio::test]
    async fn test_fetch_batch_survives_missing_ogmios_and_database() {
        let (_dir, path) = seeded_db();
        let indexer = CntIndexer::new(&path, "ws://127.0.0.1:1", Duration::from_secs(2));
        let batch = indexer.fetch_batch(&["FACT-ADA".to_string()]).await;
        assert_eq!(batch.len(), 1);
        assert!(!batch[0].data.contains_key("chain_tip"));

        let missing = CntIndexer::new("/nonexistent/cnt.db", "ws://127.0.0.1:1", Duration::from_secs(2));
        assert!(missing.fetch_batch(&["FACT-ADA".to_string()]).await.is_empty());
    }
}
