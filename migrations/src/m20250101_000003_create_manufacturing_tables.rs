use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ManufacturingOrders::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ManufacturingOrders::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ManufacturingOrders::Reference)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(ManufacturingOrders::ProductId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ManufacturingOrders::BomId).uuid().not_null())
                    .col(
                        ColumnDef::new(ManufacturingOrders::QuantityToProduce)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ManufacturingOrders::QuantityProduced)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ManufacturingOrders::State)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ManufacturingOrders::ScheduledDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ManufacturingOrders::AssigneeId)
                            .uuid()
                            .null(),
                    )
                    .col(ColumnDef::new(ManufacturingOrders::CreatedBy).uuid().null())
                    .col(
                        ColumnDef::new(ManufacturingOrders::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ManufacturingOrders::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ManufacturingOrders::CancelledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ManufacturingOrders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ManufacturingOrders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_manufacturing_orders_product_id")
                            .from(ManufacturingOrders::Table, ManufacturingOrders::ProductId)
                            .to(Products::Table, Products::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_manufacturing_orders_bom_id")
                            .from(ManufacturingOrders::Table, ManufacturingOrders::BomId)
                            .to(Boms::Table, Boms::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_manufacturing_orders_state")
                    .table(ManufacturingOrders::Table)
                    .col(ManufacturingOrders::State)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WorkOrders::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(WorkOrders::Id).uuid().primary_key().not_null())
                    .col(
                        ColumnDef::new(WorkOrders::ManufacturingOrderId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WorkOrders::WorkCenterId).uuid().not_null())
                    .col(ColumnDef::new(WorkOrders::OperationName).string().not_null())
                    .col(
                        ColumnDef::new(WorkOrders::EstimatedTime)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(ColumnDef::new(WorkOrders::ActualTime).double().null())
                    .col(ColumnDef::new(WorkOrders::State).string_len(20).not_null())
                    .col(ColumnDef::new(WorkOrders::AssigneeId).uuid().null())
                    .col(
                        ColumnDef::new(WorkOrders::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WorkOrders::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(WorkOrders::Notes).text().null())
                    .col(
                        ColumnDef::new(WorkOrders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WorkOrders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_work_orders_manufacturing_order_id")
                            .from(WorkOrders::Table, WorkOrders::ManufacturingOrderId)
                            .to(ManufacturingOrders::Table, ManufacturingOrders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_work_orders_work_center_id")
                            .from(WorkOrders::Table, WorkOrders::WorkCenterId)
                            .to(WorkCenters::Table, WorkCenters::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_work_orders_manufacturing_order_id")
                    .table(WorkOrders::Table)
                    .col(WorkOrders::ManufacturingOrderId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WorkOrders::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(ManufacturingOrders::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ManufacturingOrders {
    Table,
    Id,
    Reference,
    ProductId,
    BomId,
    QuantityToProduce,
    QuantityProduced,
    State,
    ScheduledDate,
    AssigneeId,
    CreatedBy,
    StartedAt,
    CompletedAt,
    CancelledAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum WorkOrders {
    Table,
    Id,
    ManufacturingOrderId,
    WorkCenterId,
    OperationName,
    EstimatedTime,
    ActualTime,
    State,
    AssigneeId,
    StartedAt,
    CompletedAt,
    Notes,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Products {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Boms {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum WorkCenters {
    Table,
    Id,
}
