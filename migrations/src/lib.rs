pub use sea_orm_migration::prelude::*;

mod m20250101_000001_create_catalog_tables;
mod m20250101_000002_create_bom_tables;
mod m20250101_000003_create_manufacturing_tables;
mod m20250101_000004_create_stock_movements_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_catalog_tables::Migration),
            Box::new(m20250101_000002_create_bom_tables::Migration),
            Box::new(m20250101_000003_create_manufacturing_tables::Migration),
            Box::new(m20250101_000004_create_stock_movements_table::Migration),
        ]
    }
}
