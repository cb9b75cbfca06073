pub mod bom;
pub mod bom_line;
pub mod manufacturing_order;
pub mod product;
pub mod stock_movement;
pub mod work_center;
pub mod work_order;

pub use manufacturing_order::ManufacturingOrderState;
pub use stock_movement::MovementType;
pub use work_order::WorkOrderState;
