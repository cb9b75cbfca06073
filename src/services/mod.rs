// Manufacturing core
pub mod bom;
pub mod manufacturing;
pub mod reference;
pub mod stock_ledger;
pub mod work_orders;

// Master data and reporting
pub mod catalog;
pub mod reports;
