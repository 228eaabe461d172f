//! Parallel guide fetching
//!
//! One fetch per provider, all in flight at once, each into its own spill store.
//! Failures are logged and dropped; the caller only sees the stores that
//! succeeded, in the same order as the providers it passed in.

use std::path::PathBuf;

use futures::{StreamExt, stream};
use tracing::{debug, info, warn};

use crate::epg::spill::SpillStore;
use crate::models::ProviderEndpoint;
use crate::proxy::upstream::{FetchOutcome, FetchRequest, UpstreamClient, is_success_status};
use crate::utils::url::UrlUtils;

#[derive(Clone)]
pub struct GuideFetcher {
    client: UpstreamClient,
    spill_dir: Option<PathBuf>,
}

impl GuideFetcher {
    pub fn new(client: UpstreamClient, spill_dir: Option<PathBuf>) -> Self {
        Self { client, spill_dir }
    }

    /// Fetch every endpoint once and return the successful stores
    pub async fn fetch_all(&self, endpoints: &[ProviderEndpoint]) -> Vec<SpillStore> {
        let concurrency = endpoints.len().max(1);
        let stores: Vec<SpillStore> = stream::iter(endpoints.to_vec())
            .map(|endpoint| {
                let fetcher = self.clone();
                async move { fetcher.fetch_one(endpoint).await }
            })
            .buffered(concurrency)
            .filter_map(|store| async move { store })
            .collect()
            .await;

        info!(
            providers = endpoints.len(),
            succeeded = stores.len(),
            "Guide fetch complete"
        );
        stores
    }

    async fn fetch_one(self, endpoint: ProviderEndpoint) -> Option<SpillStore> {
        let url = endpoint.guide_url();
        let display_url = UrlUtils::obfuscate_credentials(&url);

        let store = match SpillStore::create(endpoint.id, self.spill_dir.as_deref()).await {
            Ok(store) => store,
            Err(e) => {
                warn!(provider_id = endpoint.id, error = %e, "Failed to create spill store");
                return None;
            }
        };
        let mut sink = match store.sink() {
            Ok(sink) => sink,
            Err(e) => {
                warn!(provider_id = endpoint.id, error = %e, "Failed to open spill store for writing");
                return None;
            }
        };

        match self.client.fetch_into(FetchRequest::get(url), &mut sink).await {
            Ok(FetchOutcome::Completed(summary)) if is_success_status(summary.status) => {
                debug!(
                    provider_id = endpoint.id,
                    status = summary.status.as_u16(),
                    bytes = summary.bytes,
                    "Guide fetched"
                );
                Some(store)
            }
            Ok(outcome) => {
                warn!(
                    provider_id = endpoint.id,
                    url = %display_url,
                    status = outcome.summary().status.as_u16(),
                    "Guide fetch returned unusable response"
                );
                None
            }
            Err(e) => {
                warn!(provider_id = endpoint.id, url = %display_url, error = %e, "Guide fetch failed");
                None
            }
        }
    }
}
