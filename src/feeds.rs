//! Feed definitions: the CER-feeds file and its split into CEX and DEX groups.

use std::path::Path;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::error::{Error, Result};
use crate::utils::read_json_file;

/// Where a feed's price comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedSource {
    Cex,
    Dex,
    #[serde(other)]
    Unknown,
}

/// One monitored market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSpec {
    pub pair: String,
    pub label: String,
    pub interval: u64,
    pub deviation: u32,
    pub source: FeedSource,
    pub calculation: String,
    pub status: String,
    #[serde(rename = "type", default = "default_feed_type")]
    pub feed_type: String,
}

fn default_feed_type() -> String {
    "CER".to_string()
}

/// Metadata block at the top of the feeds file
#[derive(Debug, Clone, Deserialize)]
pub struct FeedsMeta {
    #[serde(default)]
    pub description: Option<String>,
    pub version: Value,
    #[serde(default)]
    pub feed_count: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
struct FeedsFile {
    meta: FeedsMeta,
    feeds: Vec<FeedSpec>,
}

/// Feed labels split by source, in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedGroups {
    /// Normalised for the price-fetch tool (`ADA-USD` becomes `ADA/USD`)
    pub cex: Vec<String>,
    /// Pair names as the chain indexer knows them
    pub dex: Vec<String>,
}

/// Read the feeds file into memory.
pub fn read_feeds_file<P: AsRef<Path>>(path: P) -> Result<Vec<FeedSpec>> {
    debug!("reading feeds file");
    let file: FeedsFile = read_json_file(path).map_err(|e| Error::Feeds(e.to_string()))?;
    info!("cer-feeds version: {}", file.meta.version);
    info!("number of feeds: {}", file.feeds.len());
    if let Some(declared) = file.meta.feed_count {
        if declared != file.feeds.len() {
            warn!("feeds file declares {} feeds but lists {}", declared, file.feeds.len());
        }
    }
    debug!("feeds file successfully read");
    Ok(file.feeds)
}

/// Replace the first `-` in a CEX label with `/`.
pub fn cex_label(label: &str) -> String {
    label.replacen('-', "/", 1)
}

/// Split feeds by source kind. Unknown sources are dropped.
pub fn partition_feeds(feeds: &[FeedSpec]) -> FeedGroups {
    let mut groups = FeedGroups::default();
    for feed in feeds {
        match feed.source {
            | FeedSource::Cex => groups.cex.push(cex_label(&feed.label)),
            | FeedSource::Dex => groups.dex.push(feed.label.clone()),
            | FeedSource::Unknown => {
                warn!("feed '{}' has an unknown source, ignoring", feed.label)
            }
        }
    }
    debug!("len cex feeds: '{}'", groups.cex.len());
    debug!("len dex feeds: '{}'", groups.dex.len());
    groups
}
