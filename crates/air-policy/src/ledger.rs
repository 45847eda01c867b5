use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use air_config::LedgerConfig;
use air_core::{AgentId, AirError, Episode, Result};

/// Aggregate of an agent's recorded episodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerAggregate {
    pub episodes: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub total_steps: u64,
}

impl LedgerAggregate {
    pub fn from_episodes(episodes: &[Episode]) -> Self {
        episodes.iter().fold(Self::default(), |mut agg, ep| {
            agg.episodes += 1;
            if ep.is_success() {
                agg.successes += 1;
            } else if ep.is_failure() {
                agg.failures += 1;
            }
            agg.total_cost_usd += ep.effective_cost_usd();
            agg.total_tokens += ep.total_tokens;
            agg.total_steps += ep.steps.len() as u64;
            agg
        })
    }

    pub fn avg_cost_usd(&self) -> f64 {
        if self.episodes == 0 {
            0.0
        } else {
            self.total_cost_usd / self.episodes as f64
        }
    }
}

/// Read access to the episode history of agents.
#[async_trait]
pub trait EpisodeLedger: Send + Sync {
    fn name(&self) -> &str;

    async fn aggregate(&self, agent_id: &str) -> Result<LedgerAggregate>;
}

// ── HTTP episode store ─────────────────────────────────────────

/// Client for the episode store's `GET /v1/episodes?agent_id=` listing.
pub struct HttpEpisodeLedger {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEpisodeLedger {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AirError::Config(format!("episode store client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl EpisodeLedger for HttpEpisodeLedger {
    fn name(&self) -> &str {
        "episode_store"
    }

    async fn aggregate(&self, agent_id: &str) -> Result<LedgerAggregate> {
        debug!(agent = agent_id, url = %self.base_url, "fetching episodes");

        let resp = self
            .client
            .get(format!("{}/v1/episodes", self.base_url))
            .query(&[("agent_id", agent_id)])
            .send()
            .await
            .map_err(|e| AirError::upstream(self.name(), format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AirError::upstream(
                self.name(),
                format!("HTTP {status}: {text}"),
            ));
        }

        let episodes: Vec<Episode> = resp
            .json()
            .await
            .map_err(|e| AirError::upstream(self.name(), format!("parse error: {e}")))?;

        // The store may ignore the filter; only count this agent's episodes.
        let own: Vec<Episode> = episodes
            .into_iter()
            .filter(|ep| ep.agent_id == agent_id)
            .collect();
        Ok(LedgerAggregate::from_episodes(&own))
    }
}

// ── In-process ledgers ─────────────────────────────────────────

/// Ledger backed by episodes held in memory.
#[derive(Default)]
pub struct StaticLedger {
    episodes: RwLock<HashMap<AgentId, Vec<Episode>>>,
}

impl StaticLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, episode: Episode) {
        self.episodes
            .write()
            .entry(episode.agent_id.clone())
            .or_default()
            .push(episode);
    }
}

#[async_trait]
impl EpisodeLedger for StaticLedger {
    fn name(&self) -> &str {
        "static"
    }

    async fn aggregate(&self, agent_id: &str) -> Result<LedgerAggregate> {
        let episodes = self.episodes.read();
        Ok(episodes
            .get(agent_id)
            .map(|eps| LedgerAggregate::from_episodes(eps))
            .unwrap_or_default())
    }
}

/// No history source. Every agent has an empty history.
pub struct NullLedger;

#[async_trait]
impl EpisodeLedger for NullLedger {
    fn name(&self) -> &str {
        "none"
    }

    async fn aggregate(&self, _agent_id: &str) -> Result<LedgerAggregate> {
        Ok(LedgerAggregate::default())
    }
}

/// Caches successful aggregates for a fixed time. Failures are not cached.
/// Expired entries are swept whenever a fresh aggregate is stored, so the
/// cache only holds agents looked up within the last `ttl`.
pub struct CachedLedger {
    inner: Arc<dyn EpisodeLedger>,
    ttl: Duration,
    entries: DashMap<AgentId, (Instant, LedgerAggregate)>,
}

impl CachedLedger {
    pub fn new(inner: Arc<dyn EpisodeLedger>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn invalidate(&self, agent_id: &str) {
        self.entries.remove(agent_id);
    }

    /// Number of cached agents, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sweep(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, (at, _)| at.elapsed() < ttl);
    }
}

#[async_trait]
impl EpisodeLedger for CachedLedger {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn aggregate(&self, agent_id: &str) -> Result<LedgerAggregate> {
        if let Some(entry) = self.entries.get(agent_id) {
            let (at, agg) = entry.value();
            if at.elapsed() < self.ttl {
                return Ok(agg.clone());
            }
        }
        let agg = self.inner.aggregate(agent_id).await?;
        self.sweep();
        self.entries
            .insert(agent_id.to_string(), (Instant::now(), agg.clone()));
        Ok(agg)
    }
}

/// Build the ledger described by `[ledger]`. An empty store URL disables
/// history lookups.
pub fn ledger_from_config(config: &LedgerConfig) -> Result<Arc<dyn EpisodeLedger>> {
    if config.episode_store_url.trim().is_empty() {
        return Ok(Arc::new(NullLedger));
    }
    let http: Arc<dyn EpisodeLedger> = Arc::new(HttpEpisodeLedger::new(
        &config.episode_store_url,
        Duration::from_millis(config.timeout_ms),
    )?);
    if config.cache_ttl_secs == 0 {
        return Ok(http);
    }
    Ok(Arc::new(CachedLedger::new(
        http,
        Duration::from_secs(config.cache_ttl_secs),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use air_core::EpisodeStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn episode(agent: &str, status: EpisodeStatus, cost: f64) -> Episode {
        Episode {
            agent_id: agent.into(),
            status,
            total_cost_usd: cost,
            ..Default::default()
        }
    }

    #[test]
    fn test_aggregate_counts() {
        let agg = LedgerAggregate::from_episodes(&[
            episode("a", EpisodeStatus::Success, 0.5),
            episode("a", EpisodeStatus::Failure, 1.5),
            episode("a", EpisodeStatus::Other, 1.0),
        ]);
        assert_eq!(agg.episodes, 3);
        assert_eq!(agg.successes, 1);
        assert_eq!(agg.failures, 1);
        assert_eq!(agg.avg_cost_usd(), 1.0);
        assert_eq!(LedgerAggregate::default().avg_cost_usd(), 0.0);
    }

    #[tokio::test]
    async fn test_static_ledger() {
        let ledger = StaticLedger::new();
        ledger.record(episode("a", EpisodeStatus::Success, 0.1));
        ledger.record(episode("b", EpisodeStatus::Failure, 0.1));
        assert_eq!(ledger.aggregate("a").await.unwrap().successes, 1);
        assert_eq!(ledger.aggregate("c").await.unwrap().episodes, 0);
    }

    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EpisodeLedger for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn aggregate(&self, _agent_id: &str) -> Result<LedgerAggregate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AirError::upstream("counting", "down"))
            } else {
                Ok(LedgerAggregate::default())
            }
        }
    }

    #[tokio::test]
    async fn test_cache_hits_and_skips_failures() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let cached = CachedLedger::new(inner.clone(), Duration::from_secs(60));
        cached.aggregate("a").await.unwrap();
        cached.aggregate("a").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        cached.invalidate("a");
        cached.aggregate("a").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);

        let failing = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let cached = CachedLedger::new(failing.clone(), Duration::from_secs(60));
        assert!(cached.aggregate("a").await.is_err());
        assert!(cached.aggregate("a").await.is_err());
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_drops_expired_agents() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let cached = CachedLedger::new(inner.clone(), Duration::from_millis(20));
        for agent in ["a", "b", "c"] {
            cached.aggregate(agent).await.unwrap();
        }
        assert_eq!(cached.len(), 3);

        tokio::time::sleep(Duration::from_millis(40)).await;
        cached.aggregate("d").await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_from_config_empty_url_is_null() {
        let config = LedgerConfig {
            episode_store_url: String::new(),
            ..Default::default()
        };
        assert_eq!(ledger_from_config(&config).unwrap().name(), "none");
    }
}
