use std::collections::BTreeMap;

use metering_client::domain::Series;
use time::{Date, PrimitiveDateTime};

use super::planner::Window;
use crate::{
    store::{Store, StoreError},
    upstream::{self, TransportError, UpstreamClient, UpstreamResponse},
};

/// Where the data of a window came from.
#[derive(Debug)]
pub enum WindowSource {
    /// Every finalized day was already stored; no request was made.
    Cache(BTreeMap<PrimitiveDateTime, f64>),
    Upstream(Result<UpstreamResponse, TransportError>),
}

/// Short-circuits windows the store already covers.
pub struct CacheGate<'a, S: ?Sized, U: ?Sized> {
    store: &'a S,
    upstream: &'a U,
}

impl<'a, S, U> CacheGate<'a, S, U>
where
    S: Store + ?Sized,
    U: UpstreamClient + ?Sized,
{
    pub fn new(store: &'a S, upstream: &'a U) -> Self {
        Self { store, upstream }
    }

    /// Days from `today` on are not finalized upstream, so only
    /// `[window.begin, min(window.end, today))` has to be stored for a hit.
    pub async fn resolve(
        &self,
        series: &Series,
        window: &Window,
        today: Date,
        upstream_cache: bool,
    ) -> Result<WindowSource, StoreError> {
        let settled_end = window.end.min(today).max(window.begin);
        let snapshot = self.store.get_range(series, window.begin, settled_end).await?;

        if !snapshot.missing_data {
            tracing::info!(
                %series,
                begin = %window.begin,
                end = %window.end,
                "window already in store"
            );
            metrics::counter!("sync_cache_hits_total").increment(1);
            return Ok(WindowSource::Cache(snapshot.records));
        }

        let endpoint = upstream::endpoint(series, window.begin, window.end, upstream_cache);
        tracing::info!(
            %series,
            begin = %window.begin,
            end = %window.end,
            "fetching window from metering api"
        );
        Ok(WindowSource::Upstream(self.upstream.get(&endpoint).await))
    }
}
