//! Station catalog: fan out to every provider, keep whatever settles
//! successfully, then merge down to one record per canonical identity.

pub mod canonical;
pub mod providers;

use std::time::Duration;

use futures_util::future::{join_all, BoxFuture, FutureExt};
use tracing::{info, warn};

use airwave_proto::config::CatalogConfig;
use airwave_proto::protocol::StationRecord;

use crate::fetch::{Fetcher, MirrorPool};
pub use canonical::{AliasTable, Candidate, Origin};

pub struct CatalogBuilder {
    fetcher: Fetcher,
    pool: MirrorPool,
    list_queries: Vec<String>,
    curated_source: String,
    timeout: Duration,
    aliases: AliasTable,
}

impl CatalogBuilder {
    pub fn new(config: &CatalogConfig, fetcher: Fetcher) -> Self {
        Self {
            fetcher,
            pool: MirrorPool::new(config.mirrors.clone()),
            list_queries: config.list_queries.clone(),
            curated_source: config.curated_source.clone(),
            timeout: config.timeout(),
            aliases: AliasTable::builtin(),
        }
    }

    pub fn with_aliases(mut self, aliases: AliasTable) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Query every provider concurrently and merge the survivors.  Never
    /// fails: total failure is an empty catalog.
    pub async fn build(&self) -> Vec<StationRecord> {
        let mut branches: Vec<(String, BoxFuture<'_, anyhow::Result<Vec<Candidate>>>)> =
            Vec::new();

        if !self.pool.is_empty() {
            for query in &self.list_queries {
                let fut = providers::fetch_generic(&self.fetcher, &self.pool, query, self.timeout);
                branches.push((format!("list {query}"), fut.boxed()));
            }
        }
        if !self.curated_source.trim().is_empty() {
            let fut = providers::fetch_curated(&self.fetcher, &self.curated_source, self.timeout);
            branches.push(("curated".to_string(), fut.boxed()));
        }

        let (labels, futures): (Vec<String>, Vec<_>) = branches.into_iter().unzip();
        let settled = join_all(futures).await;

        let mut candidates = Vec::new();
        for (label, result) in labels.into_iter().zip(settled) {
            match result {
                Ok(batch) => {
                    info!("catalog: provider {} returned {} stations", label, batch.len());
                    candidates.extend(batch);
                }
                Err(e) => warn!("catalog: provider {} failed: {:#}", label, e),
            }
        }

        let total = candidates.len();
        let stations = canonical::merge(candidates, &self.aliases);
        if stations.is_empty() {
            warn!("catalog: every provider failed or returned nothing");
        } else {
            info!("catalog: {} raw records merged into {} stations", total, stations.len());
        }
        stations
    }
}
