//! Config & Pricing Resolver (§4.12): every tunable named throughout the
//! spec -- `chunking.size`, `search.hybrid_alpha`, `cache.query_ttl_seconds`,
//! per-(model, operation) tariffs, the current USD->XAF rate, and so on --
//! is resolved from `SystemConfig` at call time through a short-TTL
//! in-process snapshot, never compiled in or read from an env var.
//!
//! The snapshot is a read-mostly, copy-on-update `ArcSwap<HashMap<...>>`
//! refreshed by a background interval task, mirroring the shape of the
//! teacher's other periodic jobs (reconciler, cache sweeper) rather than a
//! per-request database round trip.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use arc_swap::ArcSwap;
use serde_json::Value;
use tracing::{info, warn};

use crate::database::Repository;

const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// A single validated range check applied before a write-through commit.
struct Bound {
    min: f64,
    max: f64,
}

fn known_bounds() -> HashMap<&'static str, Bound> {
    let mut m = HashMap::new();
    m.insert("search.hybrid_alpha", Bound { min: 0.0, max: 1.0 });
    m.insert("search.top_k", Bound { min: 1.0, max: 100.0 });
    m.insert("chunking.size", Bound { min: 50.0, max: 2048.0 });
    m.insert("chunking.overlap", Bound { min: 0.0, max: 1024.0 });
    m.insert("cache.similarity_threshold", Bound { min: 0.0, max: 1.0 });
    m.insert("cache.query_ttl_seconds", Bound { min: 1.0, max: 31_536_000.0 });
    m.insert("embedding.batch_size", Bound { min: 1.0, max: 256.0 });
    m.insert("models.reranking.top_k", Bound { min: 1.0, max: 50.0 });
    m.insert("models.generation.history_window", Bound { min: 0.0, max: 50.0 });
    m
}

/// Read-mostly resolver over `SystemConfig`. Construct one per process and
/// share it behind an `Arc`; call [`ConfigResolver::spawn_refresh_task`] once
/// at startup to keep the snapshot warm.
pub struct ConfigResolver {
    repository: Arc<Repository>,
    snapshot: ArcSwap<HashMap<String, Value>>,
}

impl ConfigResolver {
    pub async fn bootstrap(repository: Arc<Repository>) -> Result<Arc<Self>> {
        let resolver = Arc::new(Self {
            repository,
            snapshot: ArcSwap::from_pointee(HashMap::new()),
        });
        resolver.refresh().await?;
        Ok(resolver)
    }

    /// Pull every row from `rag_system_config` and replace the snapshot
    /// atomically. A failed refresh leaves the previous snapshot in place
    /// (stale-but-available over unavailable).
    pub async fn refresh(&self) -> Result<()> {
        let rows = self.repository.get_all_system_config().await?;
        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_str::<Value>(&row.config_value) {
                Ok(value) => {
                    map.insert(row.config_key, value);
                }
                Err(e) => {
                    warn!("skipping unparseable SystemConfig row {}: {}", row.config_key, e);
                }
            }
        }
        self.snapshot.store(Arc::new(map));
        Ok(())
    }

    /// Spawn the periodic background refresh. Returns the task handle so
    /// callers can abort it on shutdown if desired.
    pub fn spawn_refresh_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let resolver = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(DEFAULT_REFRESH_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(e) = resolver.refresh().await {
                    warn!("SystemConfig refresh failed: {}", e);
                }
            }
        })
    }

    fn raw(&self, key: &str) -> Option<Value> {
        self.snapshot.load().get(key).cloned()
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.raw(key).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.raw(key).and_then(|v| v.as_i64()).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.raw(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.raw(key)
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_else(|| default.to_string())
    }

    /// Per-million-token tariff for a (model, operation) pair, read from
    /// `pricing.<model>.<operation>` (e.g. `pricing.gpt-4o-mini.embedding`).
    /// Falls back to `default` when no tariff has been configured yet.
    pub fn tariff_per_mtok(&self, model: &str, operation: &str, default: f64) -> f64 {
        self.get_f64(&format!("pricing.{model}.{operation}"), default)
    }

    /// Current USD->XAF (or other currency) exchange rate, resolved through
    /// `ExchangeRate`, never a compiled-in constant.
    pub async fn current_exchange_rate(&self, currency_code: &str, default: f64) -> f64 {
        match self.repository.get_current_exchange_rate(currency_code).await {
            Ok(Some(rate)) => rate.rate_to_usd,
            Ok(None) => default,
            Err(e) => {
                warn!("failed to resolve exchange rate for {}: {}", currency_code, e);
                default
            }
        }
    }

    /// Write-through admin API: validate the range for known keys, then
    /// commit + append to the audit history in one transaction.
    pub async fn set(&self, key: &str, value: Value, updated_by: Option<&str>) -> Result<()> {
        if let Some(bound) = known_bounds().get(key) {
            let numeric = value.as_f64().ok_or_else(|| {
                anyhow::anyhow!("config key {} expects a numeric value, got {}", key, value)
            })?;
            if numeric < bound.min || numeric > bound.max {
                bail!(
                    "config key {} value {} out of range [{}, {}]",
                    key,
                    numeric,
                    bound.min,
                    bound.max
                );
            }
        }

        let serialized = serde_json::to_string(&value)?;
        self.repository
            .upsert_system_config(key, &serialized, None, updated_by)
            .await?;
        self.refresh().await?;
        info!("SystemConfig {} updated by {:?}", key, updated_by);
        Ok(())
    }

    pub async fn history(&self, key: &str) -> Result<Vec<crate::database::models::SystemConfigHistory>> {
        self.repository.get_system_config_history(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_reject_out_of_range_alpha() {
        let bounds = known_bounds();
        let b = bounds.get("search.hybrid_alpha").unwrap();
        assert!(1.5 > b.max);
        assert!(-0.1 < b.min);
    }

    #[test]
    fn bounds_accept_default_values() {
        let bounds = known_bounds();
        assert!((0.7_f64) <= bounds["search.hybrid_alpha"].max);
        assert!((1000.0_f64) >= bounds["chunking.size"].min);
    }
}
