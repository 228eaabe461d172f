use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_stream_providers_table(manager).await?;
        self.create_streams_table(manager).await?;
        self.create_stream_missing_table(manager).await?;
        self.create_indexes(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StreamMissing::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Streams::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(StreamProviders::Table).to_owned())
            .await?;
        Ok(())
    }
}

impl Migration {
    fn create_id_column(&self, column: impl IntoIden) -> ColumnDef {
        let mut col = ColumnDef::new(column);
        col.big_integer().not_null().auto_increment().primary_key();
        col
    }

    fn create_timestamp_column(&self, manager: &SchemaManager, column: impl IntoIden) -> ColumnDef {
        let mut col = ColumnDef::new(column);
        match manager.get_database_backend() {
            sea_orm::DatabaseBackend::Postgres => col.timestamp_with_time_zone().not_null(),
            _ => col.string().not_null(),
        };
        col
    }

    async fn create_stream_providers_table(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(StreamProviders::Table)
                    .if_not_exists()
                    .col(self.create_id_column(StreamProviders::Id))
                    .col(ColumnDef::new(StreamProviders::UId).big_integer().not_null())
                    .col(
                        ColumnDef::new(StreamProviders::SpName)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(StreamProviders::SpDomain).string().not_null())
                    .col(
                        ColumnDef::new(StreamProviders::SpUsername)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(StreamProviders::SpPassword)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(self.create_timestamp_column(manager, StreamProviders::CreatedAt))
                    .to_owned(),
            )
            .await
    }

    async fn create_streams_table(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Streams::Table)
                    .if_not_exists()
                    .col(self.create_id_column(Streams::Id))
                    .col(ColumnDef::new(Streams::UId).big_integer().not_null())
                    .col(ColumnDef::new(Streams::PId).big_integer().not_null())
                    .col(ColumnDef::new(Streams::STvgId).string())
                    .col(ColumnDef::new(Streams::SName).string())
                    .col(ColumnDef::new(Streams::SOrigName).string())
                    .col(
                        ColumnDef::new(Streams::SStreamUri)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Streams::SActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_streams_p_id")
                            .from(Streams::Table, Streams::PId)
                            .to(StreamProviders::Table, StreamProviders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn create_stream_missing_table(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(StreamMissing::Table)
                    .if_not_exists()
                    .col(self.create_id_column(StreamMissing::Id))
                    .col(ColumnDef::new(StreamMissing::UId).big_integer().not_null())
                    .col(ColumnDef::new(StreamMissing::PId).big_integer().not_null())
                    .col(ColumnDef::new(StreamMissing::StreamId).big_integer().not_null())
                    .col(
                        ColumnDef::new(StreamMissing::OtherId)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(self.create_timestamp_column(manager, StreamMissing::CreatedAt))
                    .to_owned(),
            )
            .await
    }

    async fn create_indexes(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_index(
                Index::create()
                    .name("idx_stream_providers_u_id")
                    .table(StreamProviders::Table)
                    .col(StreamProviders::UId)
                    .to_owned(),
            )
            .await?;

        // Active catalog lookups and paged scans
        manager
            .create_index(
                Index::create()
                    .name("idx_streams_u_id_s_active")
                    .table(Streams::Table)
                    .col(Streams::UId)
                    .col(Streams::SActive)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_streams_u_id_p_id")
                    .table(Streams::Table)
                    .col(Streams::UId)
                    .col(Streams::PId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_stream_missing_unique")
                    .table(StreamMissing::Table)
                    .col(StreamMissing::UId)
                    .col(StreamMissing::PId)
                    .col(StreamMissing::StreamId)
                    .col(StreamMissing::OtherId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum StreamProviders {
    Table,
    Id,
    UId,
    SpName,
    SpDomain,
    SpUsername,
    SpPassword,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Streams {
    Table,
    Id,
    UId,
    PId,
    STvgId,
    SName,
    SOrigName,
    SStreamUri,
    SActive,
}

#[derive(DeriveIden)]
enum StreamMissing {
    Table,
    Id,
    UId,
    PId,
    StreamId,
    OtherId,
    CreatedAt,
}
