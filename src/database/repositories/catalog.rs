//! Storage collaborator for provider credentials and the stream catalog
//!
//! Rows are converted to the typed records in [`crate::models`] here, so callers
//! never see entity models.

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, QueryTrait, Set,
};
use tracing::debug;

use crate::entities::{prelude::*, stream_missing, stream_providers, streams};
use crate::errors::AppResult;
use crate::models::{MissingStream, ProviderEndpoint, StreamCatalogEntry, StreamRecord, UserId};

/// Rows per insert statement; keeps bind parameters under SQLite's limit
const INSERT_BATCH: usize = 100;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Credentials of one provider owned by `user`
    async fn provider_for_user(&self, user: UserId, provider_id: i64) -> AppResult<Option<ProviderEndpoint>>;

    /// Every provider owned by `user`, ordered by provider id
    async fn providers_for_user(&self, user: UserId) -> AppResult<Vec<ProviderEndpoint>>;

    /// Identifiers of the user's active streams
    async fn active_streams(&self, user: UserId) -> AppResult<Vec<StreamCatalogEntry>>;

    /// One page of stored streams for a provider, ordered by stream id
    async fn stream_page(
        &self,
        user: UserId,
        provider_id: i64,
        active_only: bool,
        limit: u64,
        offset: u64,
    ) -> AppResult<Vec<StreamRecord>>;

    /// Insert missing-stream records, ignoring ones already present.
    /// Returns the number of rows actually inserted.
    async fn record_missing(&self, records: &[MissingStream]) -> AppResult<u64>;
}

/// [`CatalogStore`] over a SeaORM connection
#[derive(Clone)]
pub struct SeaOrmCatalogStore {
    connection: Arc<DatabaseConnection>,
}

impl SeaOrmCatalogStore {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    fn provider_to_domain(model: stream_providers::Model) -> ProviderEndpoint {
        ProviderEndpoint {
            id: model.id,
            domain: model.sp_domain,
            username: model.sp_username,
            password: model.sp_password,
        }
    }
}

#[async_trait]
impl CatalogStore for SeaOrmCatalogStore {
    async fn provider_for_user(&self, user: UserId, provider_id: i64) -> AppResult<Option<ProviderEndpoint>> {
        let model = StreamProviders::find()
            .filter(stream_providers::Column::Id.eq(provider_id))
            .filter(stream_providers::Column::UId.eq(user.0))
            .one(&*self.connection)
            .await?;
        Ok(model.map(Self::provider_to_domain))
    }

    async fn providers_for_user(&self, user: UserId) -> AppResult<Vec<ProviderEndpoint>> {
        let models = StreamProviders::find()
            .filter(stream_providers::Column::UId.eq(user.0))
            .order_by_asc(stream_providers::Column::Id)
            .all(&*self.connection)
            .await?;
        Ok(models.into_iter().map(Self::provider_to_domain).collect())
    }

    async fn active_streams(&self, user: UserId) -> AppResult<Vec<StreamCatalogEntry>> {
        let rows: Vec<(Option<String>, Option<String>, Option<String>)> = Streams::find()
            .select_only()
            .column(streams::Column::STvgId)
            .column(streams::Column::SName)
            .column(streams::Column::SOrigName)
            .filter(streams::Column::UId.eq(user.0))
            .filter(streams::Column::SActive.eq(true))
            .into_tuple()
            .all(&*self.connection)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(tvg_id, name, orig_name)| StreamCatalogEntry {
                tvg_id,
                name,
                orig_name,
            })
            .collect())
    }

    async fn stream_page(
        &self,
        user: UserId,
        provider_id: i64,
        active_only: bool,
        limit: u64,
        offset: u64,
    ) -> AppResult<Vec<StreamRecord>> {
        let models = Streams::find()
            .filter(streams::Column::UId.eq(user.0))
            .filter(streams::Column::PId.eq(provider_id))
            .apply_if(active_only.then_some(true), |query, active| {
                query.filter(streams::Column::SActive.eq(active))
            })
            .order_by_asc(streams::Column::Id)
            .limit(limit)
            .offset(offset)
            .all(&*self.connection)
            .await?;

        Ok(models
            .into_iter()
            .map(|model| StreamRecord {
                id: model.id,
                name: model.s_orig_name.unwrap_or_default(),
                uri: model.s_stream_uri,
            })
            .collect())
    }

    async fn record_missing(&self, records: &[MissingStream]) -> AppResult<u64> {
        let mut inserted = 0;
        for batch in records.chunks(INSERT_BATCH) {
            let models = batch.iter().map(|record| stream_missing::ActiveModel {
                u_id: Set(record.user_id.0),
                p_id: Set(record.provider_id),
                stream_id: Set(record.stream_id),
                other_id: Set(record.other_id),
                created_at: Set(record.created_at),
                ..Default::default()
            });

            inserted += StreamMissing::insert_many(models)
                .on_conflict(
                    OnConflict::columns([
                        stream_missing::Column::UId,
                        stream_missing::Column::PId,
                        stream_missing::Column::StreamId,
                        stream_missing::Column::OtherId,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec_without_returning(&*self.connection)
                .await?;
        }

        debug!(
            requested = records.len(),
            inserted, "Recorded missing streams"
        );
        Ok(inserted)
    }
}
