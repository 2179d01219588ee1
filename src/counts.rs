//! The total-count cache: a background task walks every (database, table)
//! pair on an interval and stores the soft-delete-aware row count. List
//! requests without filters read the cached value instead of counting.

use crate::state::AppState;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct CountCache {
    inner: Arc<RwLock<HashMap<(String, String), i64>>>,
}

impl CountCache {
    pub fn get(&self, db_alias: &str, table_alias: &str) -> Option<i64> {
        self.inner
            .read()
            .ok()?
            .get(&(db_alias.to_string(), table_alias.to_string()))
            .copied()
    }

    pub fn set(&self, db_alias: &str, table_alias: &str, count: i64) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((db_alias.to_string(), table_alias.to_string()), count);
        }
    }
}

async fn refresh_all(state: &AppState) {
    let adapters: Vec<(String, crate::state::SharedAdapter)> = state.adapter_entries();
    for (db_alias, adapter) in adapters {
        let Some(db) = state.config.databases.get(&db_alias) else {
            continue;
        };
        for table in &db.tables {
            let counted = tokio::time::timeout(Duration::from_secs(10), adapter.count_all(table)).await;
            match counted {
                Ok(Ok(count)) => state.counts.set(&db_alias, &table.alias, count),
                Ok(Err(e)) => {
                    tracing::debug!(db = %db_alias, table = %table.alias, error = %e, "count refresh failed");
                }
                Err(_) => {
                    tracing::debug!(db = %db_alias, table = %table.alias, "count refresh timed out");
                }
            }
        }
    }
}

/// Run the refresher until cancelled. An interval of 0 disables it.
pub fn spawn_refresher(state: AppState, interval_secs: u64, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if interval_secs == 0 {
            return;
        }
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => refresh_all(&state).await,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_set_get() {
        let cache = CountCache::default();
        assert_eq!(cache.get("db", "t"), None);
        cache.set("db", "t", 42);
        assert_eq!(cache.get("db", "t"), Some(42));
        cache.set("db", "t", 43);
        assert_eq!(cache.get("db", "t"), Some(43));
        assert_eq!(cache.get("db", "other"), None);
    }
}
