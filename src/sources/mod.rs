//! Price sources: the centralized (gofer) and decentralized (CNT indexer) adapters.

pub mod cex;
pub mod dex;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use log::{info, warn};
use rand::seq::SliceRandom;

use crate::envelope::RawObservation;
use crate::utils::error::Result;

pub use cex::GoferSource;
pub use dex::CntIndexer;

/// Centralized-exchange source: one observation per feed label.
#[async_trait]
pub trait CexSource: Send + Sync {
    /// `Ok(None)` means the source had nothing for this label.
    async fn fetch(&self, label: &str) -> Result<Option<RawObservation>>;
}

/// Decentralized-exchange source: a completed batch for a set of pairs.
/// Pairs that fail are left out of the batch.
#[async_trait]
pub trait DexSource: Send + Sync {
    async fn fetch_batch(&self, pairs: &[String]) -> Vec<RawObservation>;
}

#[async_trait]
impl<T: CexSource + ?Sized> CexSource for &T {
    async fn fetch(&self, label: &str) -> Result<Option<RawObservation>> {
        (**self).fetch(label).await
    }
}

#[async_trait]
impl<T: DexSource + ?Sized> DexSource for &T {
    async fn fetch_batch(&self, pairs: &[String]) -> Vec<RawObservation> {
        (**self).fetch_batch(pairs).await
    }
}

/// The CEX labels of one run, bound to the source that resolves them.
pub struct CexFeeds<S> {
    source: S,
    labels: Vec<String>,
}

impl<S: CexSource> CexFeeds<S> {
    pub fn new(source: S, labels: Vec<String>) -> Self {
        Self { source, labels }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Lazily fetch every label once, in a fresh random order per call.
    ///
    /// Nothing is fetched until the stream is polled, and each poll fetches at
    /// most until the next observation. Dropping the stream stops fetching.
    /// Labels that yield nothing or fail are skipped with a warning.
    pub fn stream(&self) -> impl Stream<Item = RawObservation> + '_ {
        let mut order = self.labels.clone();
        order.shuffle(&mut rand::thread_rng());
        stream::iter(order).filter_map(move |label| async move {
            info!("feed: {}", label);
            match self.source.fetch(&label).await {
                | Ok(Some(observation)) => Some(observation),
                | Ok(None) => {
                    warn!("cannot retrieve data for: '{}'", label);
                    None
                }
                | Err(e) => {
                    warn!("cannot retrieve data for: '{}': {}", label, e);
                    None
                }
            }
        })
    }
}
