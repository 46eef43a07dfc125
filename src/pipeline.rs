//! Submission pipeline: stagger, identity, fetch, sign, send.
//!
//! One run walks `Idle → Staggering → LoadingIdentity → Fetching → Connected →
//! Submitting → Closed`. Per-feed problems (no data, ack timeout, rejection) are
//! counted and skipped. Transport failures end the run early but still return a
//! [`RunSummary`]. A missing or malformed identity is returned as an error.

use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;
use log::{debug, error, info};
use rand::Rng;

use crate::config::Config;
use crate::envelope::{Envelope, RawObservation};
use crate::feeds::{partition_feeds, FeedSpec};
use crate::identity::{read_identity, Identity};
use crate::signer::MessageSigner;
use crate::sources::{CexFeeds, CexSource, CntIndexer, DexSource, GoferSource};
use crate::utils::error::{Error, Result};
use crate::validator::{SendOutcome, ValidatorClient, ValidatorSettings};

/// Where a run is, or where it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stage {
    #[default]
    Idle,
    Staggering,
    LoadingIdentity,
    Fetching,
    Connected,
    Submitting,
    Closed,
    Aborted,
}

/// What happened during one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub stage: Stage,
    /// Payloads written to the validator
    pub sent: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub timed_out: usize,
    /// Feeds that produced nothing to send
    pub skipped: usize,
    /// Why submission stopped early, if it did
    pub aborted: Option<String>,
}

impl RunSummary {
    fn enter(&mut self, stage: Stage) {
        debug!("stage: {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }

    fn abort(&mut self, reason: &Error) {
        self.aborted = Some(reason.to_string());
        self.enter(Stage::Aborted);
    }

    pub fn log(&self) {
        info!(
            "run finished ({:?}): sent={} accepted={} rejected={} timed_out={} skipped={}",
            self.stage, self.sent, self.accepted, self.rejected, self.timed_out, self.skipped
        );
        if let Some(reason) = &self.aborted {
            error!("run ended early: {}", reason);
        }
    }
}

/// Uniform whole-second delay within `[min_secs, max_secs]`.
pub fn stagger_delay<R: Rng + ?Sized>(rng: &mut R, min_secs: u64, max_secs: u64) -> Duration {
    let (lo, hi) = if min_secs <= max_secs { (min_secs, max_secs) } else { (max_secs, min_secs) };
    Duration::from_secs(rng.gen_range(lo..=hi))
}

/// The composition root for one run.
pub struct Pipeline<C, D> {
    signer: MessageSigner,
    cex: C,
    /// `None` when the decentralized path is disabled
    dex: Option<D>,
    validator: ValidatorSettings,
    identity_loc: PathBuf,
    stagger_secs: (u64, u64),
    send_pause: Duration,
}

impl Pipeline<GoferSource, CntIndexer> {
    /// Wire the production adapters from configuration. Loads the signing key,
    /// so a malformed key fails here, before any network I/O.
    pub fn from_config(config: &Config) -> Result<Self> {
        let signer = MessageSigner::from_key_file(&config.node.signing_key)?;
        let cex = GoferSource::new(
            &config.cex.gofer,
            Duration::from_secs(config.cex.fetch_timeout_secs),
        );
        let dex = config.dex.as_ref().map(|dex| {
            CntIndexer::new(&dex.cnt_db_name, &dex.ogmios_url, Duration::from_secs(dex.timeout_secs))
        });
        let uri = config
            .pick_validator_uri(&mut rand::thread_rng())
            .ok_or_else(|| Error::ConfigError("no validator endpoint configured".into()))?
            .to_string();

        Ok(Self::new(signer, cex, dex, config.validator_settings(&uri), &config.node.identity_loc)
            .with_stagger(config.run.random_wait_min, config.run.random_wait_max)
            .with_send_pause(Duration::from_millis(config.run.send_pause_ms)))
    }
}

impl<C: CexSource, D: DexSource> Pipeline<C, D> {
    pub fn new(
        signer: MessageSigner,
        cex: C,
        dex: Option<D>,
        validator: ValidatorSettings,
        identity_loc: impl Into<PathBuf>,
    ) -> Self {
        Self {
            signer,
            cex,
            dex,
            validator,
            identity_loc: identity_loc.into(),
            stagger_secs: (1, 15),
            send_pause: Duration::from_millis(100),
        }
    }

    /// Inclusive stagger bounds in seconds.
    pub fn with_stagger(mut self, min_secs: u64, max_secs: u64) -> Self {
        self.stagger_secs = (min_secs, max_secs);
        self
    }

    pub fn with_send_pause(mut self, pause: Duration) -> Self {
        self.send_pause = pause;
        self
    }

    /// One full run over `feeds`.
    pub async fn run(&self, feeds: &[FeedSpec]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        // Desynchronise the many nodes that share a validator.
        summary.enter(Stage::Staggering);
        let (min, max) = self.stagger_secs;
        let delay = stagger_delay(&mut rand::thread_rng(), min, max);
        info!("run interval: {}s", delay.as_secs());
        tokio::time::sleep(delay).await;

        summary.enter(Stage::LoadingIdentity);
        let identity = read_identity(&self.identity_loc)?;

        self.fetch_and_send(feeds, &identity, summary).await
    }

    /// Fetch every feed and send it to the validator, CEX before DEX.
    pub async fn fetch_and_send(
        &self,
        feeds: &[FeedSpec],
        identity: &Identity,
        mut summary: RunSummary,
    ) -> Result<RunSummary> {
        debug!("in fetch and send for all feeds");
        summary.enter(Stage::Fetching);
        let groups = partition_feeds(feeds);
        let cex = CexFeeds::new(&self.cex, groups.cex);
        let dex_batch = match &self.dex {
            | Some(dex) if !groups.dex.is_empty() => {
                info!("retrieving: '{}' dex pairs", groups.dex.len());
                let batch = dex.fetch_batch(&groups.dex).await;
                summary.skipped += groups.dex.len().saturating_sub(batch.len());
                batch
            }
            | Some(_) => Vec::new(),
            | None => {
                debug!("cnt collection is not enabled");
                Vec::new()
            }
        };

        let mut client = match ValidatorClient::connect(&self.validator, &identity.node_id).await {
            | Ok(client) => client,
            | Err(e) if e.is_run_fatal() => {
                error!("cannot open validator connection: {}", e);
                summary.abort(&e);
                return Ok(summary);
            }
            | Err(e) => return Err(e),
        };
        summary.enter(Stage::Connected);

        let submitted = self.submit_all(&mut client, &cex, &dex_batch, identity, &mut summary).await;
        client.close().await;

        match submitted {
            | Ok(()) => summary.enter(Stage::Closed),
            | Err(e) if e.is_run_fatal() => {
                error!("connection closed unexpectedly: {}", e);
                summary.abort(&e);
            }
            | Err(e) => return Err(e),
        }
        Ok(summary)
    }

    async fn submit_all(
        &self,
        client: &mut ValidatorClient,
        cex: &CexFeeds<&C>,
        dex_batch: &[RawObservation],
        identity: &Identity,
        summary: &mut RunSummary,
    ) -> Result<()> {
        summary.enter(Stage::Submitting);

        let mut yielded = 0;
        let stream = cex.stream();
        futures::pin_mut!(stream);
        while let Some(observation) = stream.next().await {
            yielded += 1;
            debug!("sending to web-socket, then sleeping for '{:?}'", self.send_pause);
            self.submit(client, observation, identity, summary).await?;
        }
        summary.skipped += cex.labels().len().saturating_sub(yielded);

        if self.dex.is_none() {
            debug!("cnt collection is not enabled nothing to send to web-socket");
            return Ok(());
        }
        for observation in dex_batch {
            if observation.data.is_empty() {
                summary.skipped += 1;
                continue;
            }
            debug!("sending dex collection data");
            self.submit(client, observation.clone(), identity, summary).await?;
        }
        Ok(())
    }

    async fn submit(
        &self,
        client: &mut ValidatorClient,
        observation: RawObservation,
        identity: &Identity,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let envelope = Envelope::new(observation, identity);
        let feed = envelope.feed().to_string();
        info!(
            "sending message '{}' from id: {} with timestamp: {}",
            feed, identity.node_id, envelope.message.timestamp
        );
        let payload = match self.signer.sign(&envelope) {
            | Ok(payload) => payload,
            | Err(e) => {
                error!("cannot sign message for '{}': {}", feed, e);
                summary.skipped += 1;
                return Ok(());
            }
        };

        match client.send(&payload).await? {
            | SendOutcome::Accepted(reply) => {
                info!("websocket response: {} ({})", reply, feed);
                summary.accepted += 1;
            }
            | SendOutcome::Rejected(reply) => {
                error!("validator rejected submission: {} ({})", reply, feed);
                summary.rejected += 1;
            }
            | SendOutcome::TimedOut => {
                error!("websocket wait_for resp timeout for feed '{}'", feed);
                summary.timed_out += 1;
            }
        }
        summary.sent += 1;
        tokio::time::sleep(self.send_pause).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::init_test_logging;
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoCex;

    #[async_trait]
    impl CexSource for NoCex {
        async fn fetch(&self, _label: &str) -> Result<Option<RawObservation>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct CountingDex {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DexSource for CountingDex {
        async fn fetch_batch(&self, _pairs: &[String]) -> Vec<RawObservation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        }
    }

    #[rstest]
    #[case(1, 15)]
    #[case(15, 20)]
    #[case(0, 0)]
    #[case(3, 3)]
    fn test_stagger_within_inclusive_bounds(#[case] min: u64, #[case] max: u64) {
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen_min = false;
        let mut seen_max = false;
        for _ in 0..2_000 {
            let secs = stagger_delay(&mut rng, min, max).as_secs();
            assert!((min..=max).contains(&secs), "{} outside {}..={}", secs, min, max);
            seen_min |= secs == min;
            seen_max |= secs == max;
        }
        assert!(seen_min && seen_max, "both bounds should be reachable");
    }

    #[tokio::test]
    async fn test_missing_identity_aborts_before_connecting() {
        init_test_logging();
        let dir = tempfile::tempdir().unwrap();
        let dex = CountingDex::default();
        // Nothing listens here; a connection attempt would surface as a ConnectError summary.
        let pipeline = Pipeline::new(
            MessageSigner::from_seed(&[3u8; 32]),
            NoCex,
            Some(&dex),
            ValidatorSettings::new("ws://127.0.0.1:1"),
            dir.path().join("missing-identity.json"),
        )
        .with_stagger(0, 0);

        let err = pipeline.run(&[]).await.unwrap_err();
        assert!(matches!(err, Error::Identity(_)));
        assert_eq!(dex.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreachable_validator_ends_run_gracefully() {
        init_test_logging();
        let pipeline = Pipeline::<NoCex, CountingDex>::new(
            MessageSigner::from_seed(&[3u8; 32]),
            NoCex,
            None,
            ValidatorSettings::new("ws://127.0.0.1:1"),
            "/unused",
        );
        let summary = pipeline
            .fetch_and_send(&[], &Identity::new("node-1"), RunSummary::default())
            .await
            .unwrap();
        assert_eq!(summary.stage, Stage::Aborted);
        assert_eq!(summary.sent, 0);
        assert!(summary.aborted.is_some());
    }
}
