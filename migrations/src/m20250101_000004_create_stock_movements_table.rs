use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Append-only ledger; rows are never updated after insert
        manager
            .create_table(
                Table::create()
                    .table(StockMovements::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StockMovements::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(StockMovements::ProductId).uuid().not_null())
                    .col(
                        ColumnDef::new(StockMovements::MovementType)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(ColumnDef::new(StockMovements::Quantity).double().not_null())
                    .col(
                        ColumnDef::new(StockMovements::UnitCost)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(ColumnDef::new(StockMovements::Reference).string().null())
                    .col(
                        ColumnDef::new(StockMovements::ManufacturingOrderId)
                            .uuid()
                            .null(),
                    )
                    .col(ColumnDef::new(StockMovements::CreatedBy).uuid().not_null())
                    .col(
                        ColumnDef::new(StockMovements::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_stock_movements_product_id")
                            .from(StockMovements::Table, StockMovements::ProductId)
                            .to(Products::Table, Products::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_stock_movements_manufacturing_order_id")
                            .from(StockMovements::Table, StockMovements::ManufacturingOrderId)
                            .to(ManufacturingOrders::Table, ManufacturingOrders::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_stock_movements_product_id")
                    .table(StockMovements::Table)
                    .col(StockMovements::ProductId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_stock_movements_manufacturing_order_id")
                    .table(StockMovements::Table)
                    .col(StockMovements::ManufacturingOrderId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StockMovements::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum StockMovements {
    Table,
    Id,
    ProductId,
    MovementType,
    Quantity,
    UnitCost,
    Reference,
    ManufacturingOrderId,
    CreatedBy,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Products {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum ManufacturingOrders {
    Table,
    Id,
}
