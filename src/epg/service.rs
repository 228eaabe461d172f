//! Guide endpoints: single-provider pass-through and multi-provider merge

use std::io;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::config::EpgConfig;
use crate::database::CatalogStore;
use crate::epg::allow_set::AllowSet;
use crate::epg::merge::GuideMerge;
use crate::epg::orchestrator::GuideFetcher;
use crate::errors::{AppError, AppResult, UpstreamResult};
use crate::models::UserId;
use crate::proxy::sink::ClientSink;
use crate::proxy::upstream::{FetchOutcome, FetchRequest, UpstreamClient, is_success_status};
use crate::utils::url::UrlUtils;

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

#[derive(Clone)]
pub struct GuideService {
    store: Arc<dyn CatalogStore>,
    client: UpstreamClient,
    fetcher: GuideFetcher,
    config: EpgConfig,
}

impl GuideService {
    pub fn new(store: Arc<dyn CatalogStore>, config: &EpgConfig) -> UpstreamResult<Self> {
        let client = UpstreamClient::new(&config.fetch)?;
        Ok(Self::with_client(store, client, config))
    }

    pub fn with_client(store: Arc<dyn CatalogStore>, client: UpstreamClient, config: &EpgConfig) -> Self {
        Self {
            store,
            fetcher: GuideFetcher::new(client.clone(), config.spill_dir.clone()),
            client,
            config: config.clone(),
        }
    }

    /// Stream one provider's guide to the client unmodified
    pub async fn single_provider(&self, user: UserId, provider_id: i64) -> AppResult<Response> {
        let endpoint = self
            .store
            .provider_for_user(user, provider_id)
            .await?
            .ok_or_else(|| AppError::not_found("Provider", provider_id))?;

        let url = endpoint.guide_url();
        let display_url = UrlUtils::obfuscate_credentials(&url);
        let (mut sink, stream) = ClientSink::channel(self.config.output_buffer, true);
        let client = self.client.clone();
        let task_url = display_url.clone();
        tokio::spawn(async move {
            match client.fetch_into(FetchRequest::get(url), &mut sink).await {
                Ok(FetchOutcome::Completed(summary)) => {
                    debug!(url = %task_url, bytes = summary.bytes, "Guide relayed");
                }
                Ok(FetchOutcome::Aborted(summary)) => {
                    debug!(url = %task_url, bytes = summary.bytes, "Guide relay stopped early");
                }
                Err(e) => {
                    warn!(url = %task_url, error = %e, "Guide relay failed");
                    sink.fail(e).await;
                }
            }
        });

        let head = match stream.head.await {
            Ok(Ok(head)) => head,
            Ok(Err(e)) => return Err(AppError::upstream_unavailable(e.to_string())),
            Err(_) => return Err(AppError::internal("guide task ended before a response head")),
        };
        if !is_success_status(head.status) {
            warn!(
                provider_id,
                url = %display_url,
                status = head.status.as_u16(),
                "Provider returned error status for guide"
            );
            return Err(AppError::upstream_unavailable(format!(
                "provider {provider_id} answered {}",
                head.status
            )));
        }

        self.guide_response(Body::from_stream(stream.body))
    }

    /// Fetch every provider of `user` in parallel and stream the merged guide
    pub async fn all_providers(&self, user: UserId) -> AppResult<Response> {
        let providers = self.store.providers_for_user(user).await?;
        if providers.is_empty() {
            return Err(AppError::not_found("Providers", user));
        }

        let catalog = self.store.active_streams(user).await?;
        let allow = AllowSet::from_catalog(&catalog);
        debug!(user_id = %user, providers = providers.len(), allow_entries = allow.len(), "Building merged guide");

        let stores = self.fetcher.fetch_all(&providers).await;
        if stores.is_empty() {
            return Err(AppError::upstream_unavailable(format!(
                "none of {} providers returned a guide",
                providers.len()
            )));
        }
        info!(
            user_id = %user,
            providers = providers.len(),
            succeeded = stores.len(),
            "Merging provider guides"
        );

        let merge = GuideMerge::new(stores, allow, self.config.generator_name.clone());
        self.guide_response(Body::from_stream(stream_merge(merge, self.config.output_buffer)))
    }

    fn guide_response(&self, body: Body) -> AppResult<Response> {
        let cache_control = format!("public, max-age={}", self.config.cache_max_age.as_secs());
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, XML_CONTENT_TYPE)
            .header(
                header::CACHE_CONTROL,
                HeaderValue::from_str(&cache_control)
                    .map_err(|e| AppError::internal(e.to_string()))?,
            )
            .header("X-Accel-Buffering", "no")
            .body(body)
            .map_err(|e| AppError::internal(format!("failed to build guide response: {e}")))
    }
}

/// Run the merge on the blocking pool, handing fragments over a bounded channel
///
/// The merge stops at the next fragment once the receiver is dropped.
fn stream_merge(merge: GuideMerge, buffer: usize) -> ReceiverStream<Result<Bytes, io::Error>> {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    tokio::task::spawn_blocking(move || {
        for fragment in merge {
            if tx.blocking_send(Ok(fragment)).is_err() {
                debug!("Client went away during guide merge");
                return;
            }
        }
    });
    ReceiverStream::new(rx)
}
