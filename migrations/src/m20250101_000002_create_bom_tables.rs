use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Boms::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Boms::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Boms::ProductId).uuid().not_null())
                    .col(ColumnDef::new(Boms::Name).string().not_null())
                    .col(ColumnDef::new(Boms::Description).text().null())
                    .col(
                        ColumnDef::new(Boms::Quantity)
                            .double()
                            .not_null()
                            .default(1.0),
                    )
                    .col(
                        ColumnDef::new(Boms::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Boms::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Boms::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_boms_product_id")
                            .from(Boms::Table, Boms::ProductId)
                            .to(Products::Table, Products::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(BomLines::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(BomLines::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(BomLines::BomId).uuid().not_null())
                    .col(ColumnDef::new(BomLines::ProductId).uuid().not_null())
                    .col(ColumnDef::new(BomLines::Quantity).double().not_null())
                    .col(
                        ColumnDef::new(BomLines::OperationTime)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(BomLines::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bom_lines_bom_id")
                            .from(BomLines::Table, BomLines::BomId)
                            .to(Boms::Table, Boms::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bom_lines_product_id")
                            .from(BomLines::Table, BomLines::ProductId)
                            .to(Products::Table, Products::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_bom_lines_bom_id")
                    .table(BomLines::Table)
                    .col(BomLines::BomId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BomLines::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Boms::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Boms {
    Table,
    Id,
    ProductId,
    Name,
    Description,
    Quantity,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum BomLines {
    Table,
    Id,
    BomId,
    ProductId,
    Quantity,
    OperationTime,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Products {
    Table,
    Id,
}
