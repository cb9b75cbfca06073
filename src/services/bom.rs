use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    db,
    entities::{
        bom::{self, Entity as BomEntity},
        bom_line::{self, Entity as BomLineEntity},
        product::{self, Entity as ProductEntity},
    },
    errors::ServiceError,
};

/// A BOM line with its component name attached, as loaded from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomComponentLine {
    pub line_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    /// Component units per unit of output
    pub quantity: f64,
    /// Minutes per unit of output
    pub operation_time: f64,
}

/// Fully materialized BOM: header plus lines, no lazy relations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomDefinition {
    pub bom: bom::Model,
    pub lines: Vec<BomComponentLine>,
}

/// One BOM line scaled to an order quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedComponent {
    pub product_id: Uuid,
    pub product_name: String,
    pub required_quantity: f64,
    /// Estimated minutes for the whole order
    pub operation_time: f64,
}

impl ResolvedComponent {
    pub fn spawns_work_order(&self) -> bool {
        self.operation_time > 0.0
    }

    pub fn operation_name(&self) -> String {
        format!("Process {}", self.product_name)
    }
}

/// Quantity of one product to draw from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRequirement {
    pub product_id: Uuid,
    pub quantity: f64,
}

/// Scales every line of a single-level BOM to `quantity_to_produce`.
///
/// Nested BOMs of components are not exploded, and the BOM's own output
/// quantity is not applied.
pub fn resolve(lines: &[BomComponentLine], quantity_to_produce: f64) -> Vec<ResolvedComponent> {
    lines
        .iter()
        .map(|line| ResolvedComponent {
            product_id: line.product_id,
            product_name: line.product_name.clone(),
            required_quantity: line.quantity * quantity_to_produce,
            operation_time: line.operation_time * quantity_to_produce,
        })
        .collect()
}

/// Merges components listed more than once into one requirement per product,
/// keeping first-seen order.
pub fn aggregate_requirements(components: &[ResolvedComponent]) -> Vec<ComponentRequirement> {
    let mut index: HashMap<Uuid, usize> = HashMap::new();
    let mut requirements: Vec<ComponentRequirement> = Vec::new();

    for component in components {
        match index.get(&component.product_id).copied() {
            Some(pos) => requirements[pos].quantity += component.required_quantity,
            None => {
                index.insert(component.product_id, requirements.len());
                requirements.push(ComponentRequirement {
                    product_id: component.product_id,
                    quantity: component.required_quantity,
                });
            }
        }
    }

    requirements
}

/// Loads a BOM and its lines through any connection, including an open transaction.
pub async fn load_definition<C>(conn: &C, bom_id: Uuid) -> Result<BomDefinition, ServiceError>
where
    C: ConnectionTrait,
{
    let bom = BomEntity::find_by_id(bom_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("BOM {} not found", bom_id)))?;

    let lines = BomLineEntity::find()
        .filter(bom_line::Column::BomId.eq(bom_id))
        .order_by_asc(bom_line::Column::CreatedAt)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let component_ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
    let names: HashMap<Uuid, String> = ProductEntity::find()
        .filter(product::Column::Id.is_in(component_ids))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?
        .into_iter()
        .map(|p| (p.id, p.name))
        .collect();

    let lines = lines
        .into_iter()
        .map(|line| {
            let product_name = names.get(&line.product_id).cloned().ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Component product {} of BOM {} not found",
                    line.product_id, bom_id
                ))
            })?;
            Ok(BomComponentLine {
                line_id: line.id,
                product_id: line.product_id,
                product_name,
                quantity: line.quantity,
                operation_time: line.operation_time,
            })
        })
        .collect::<Result<Vec<_>, ServiceError>>()?;

    Ok(BomDefinition { bom, lines })
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBomInput {
    pub product_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub quantity: Option<f64>,
    pub lines: Vec<CreateBomLineInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBomLineInput {
    pub product_id: Uuid,
    pub quantity: f64,
    #[serde(default)]
    pub operation_time: f64,
}

/// Bill of Materials service for managing product recipes
#[derive(Clone)]
pub struct BomService {
    db: Arc<DatabaseConnection>,
}

impl BomService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Creates a BOM with its lines in one transaction
    #[instrument(skip(self, input), fields(product_id = %input.product_id))]
    pub async fn create_bom(&self, input: CreateBomInput) -> Result<BomDefinition, ServiceError> {
        validate_bom_input(&input)?;

        let txn = db::begin_write(&self.db).await?;

        ProductEntity::find_by_id(input.product_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        let component_ids: Vec<Uuid> = input.lines.iter().map(|l| l.product_id).collect();
        let known: HashMap<Uuid, product::Model> = ProductEntity::find()
            .filter(product::Column::Id.is_in(component_ids))
            .all(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        if let Some(missing) = input.lines.iter().find(|l| !known.contains_key(&l.product_id)) {
            return Err(ServiceError::NotFound(format!(
                "Component product {} not found",
                missing.product_id
            )));
        }

        let bom = bom::ActiveModel {
            product_id: Set(input.product_id),
            name: Set(input.name.trim().to_string()),
            description: Set(input.description.clone()),
            quantity: Set(input.quantity.unwrap_or(1.0)),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!("Failed to create BOM: {}", e);
            ServiceError::db_error(e)
        })?;

        for line in &input.lines {
            bom_line::ActiveModel {
                bom_id: Set(bom.id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                operation_time: Set(line.operation_time),
                ..Default::default()
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        }

        let definition = load_definition(&txn, bom.id).await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(
            bom_id = %definition.bom.id,
            lines = definition.lines.len(),
            "BOM created"
        );
        Ok(definition)
    }

    /// Gets a BOM with its lines
    #[instrument(skip(self))]
    pub async fn get_bom(&self, bom_id: Uuid) -> Result<BomDefinition, ServiceError> {
        load_definition(&*self.db, bom_id).await
    }

    /// Lists BOM headers, optionally for one finished product
    #[instrument(skip(self))]
    pub async fn list_boms(&self, product_id: Option<Uuid>) -> Result<Vec<bom::Model>, ServiceError> {
        let mut query = BomEntity::find().order_by_asc(bom::Column::Name);
        if let Some(product_id) = product_id {
            query = query.filter(bom::Column::ProductId.eq(product_id));
        }
        query.all(&*self.db).await.map_err(ServiceError::db_error)
    }

    /// Resolves a stored BOM for a production quantity without touching stock
    #[instrument(skip(self))]
    pub async fn explode(
        &self,
        bom_id: Uuid,
        quantity_to_produce: f64,
    ) -> Result<Vec<ResolvedComponent>, ServiceError> {
        if !(quantity_to_produce.is_finite() && quantity_to_produce > 0.0) {
            return Err(ServiceError::ValidationError(format!(
                "Quantity to produce must be positive, got: {}",
                quantity_to_produce
            )));
        }
        let definition = self.get_bom(bom_id).await?;
        Ok(resolve(&definition.lines, quantity_to_produce))
    }
}

fn validate_bom_input(input: &CreateBomInput) -> Result<(), ServiceError> {
    if input.name.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "BOM name cannot be empty".to_string(),
        ));
    }

    if let Some(quantity) = input.quantity {
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(ServiceError::ValidationError(format!(
                "BOM quantity must be positive, got: {}",
                quantity
            )));
        }
    }

    if input.lines.is_empty() {
        return Err(ServiceError::ValidationError(
            "BOM must have at least one line".to_string(),
        ));
    }

    for line in &input.lines {
        if line.product_id == input.product_id {
            return Err(ServiceError::ValidationError(format!(
                "BOM for product {} cannot list itself as a component",
                input.product_id
            )));
        }
        if !(line.quantity.is_finite() && line.quantity > 0.0) {
            return Err(ServiceError::ValidationError(format!(
                "Line quantity for component {} must be positive, got: {}",
                line.product_id, line.quantity
            )));
        }
        if !(line.operation_time.is_finite() && line.operation_time >= 0.0) {
            return Err(ServiceError::ValidationError(format!(
                "Operation time for component {} cannot be negative, got: {}",
                line.product_id, line.operation_time
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn line(name: &str, quantity: f64, operation_time: f64) -> BomComponentLine {
        BomComponentLine {
            line_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_name: name.to_string(),
            quantity,
            operation_time,
        }
    }

    #[test]
    fn resolves_wooden_table_for_five_units() {
        let lines = vec![line("Wooden Legs", 4.0, 10.0), line("Wooden Top", 1.0, 30.0)];

        let resolved = resolve(&lines, 5.0);

        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].required_quantity, 20.0);
        assert_eq!(resolved[0].operation_time, 50.0);
        assert_eq!(resolved[0].operation_name(), "Process Wooden Legs");
        assert_eq!(resolved[1].required_quantity, 5.0);
        assert_eq!(resolved[1].operation_time, 150.0);
    }

    #[test]
    fn zero_operation_time_does_not_spawn_work_order() {
        let resolved = resolve(&[line("Screws", 8.0, 0.0)], 2.0);
        assert_eq!(resolved[0].required_quantity, 16.0);
        assert!(!resolved[0].spawns_work_order());
    }

    #[test]
    fn duplicate_components_are_aggregated() {
        let legs = line("Wooden Legs", 4.0, 10.0);
        let mut spare = legs.clone();
        spare.line_id = Uuid::new_v4();
        spare.quantity = 1.0;
        let top = line("Wooden Top", 1.0, 30.0);

        let requirements = aggregate_requirements(&resolve(&[legs.clone(), top.clone(), spare], 2.0));

        assert_eq!(
            requirements,
            vec![
                ComponentRequirement {
                    product_id: legs.product_id,
                    quantity: 10.0
                },
                ComponentRequirement {
                    product_id: top.product_id,
                    quantity: 2.0
                },
            ]
        );
    }

    #[test]
    fn rejects_self_referencing_line() {
        let product_id = Uuid::new_v4();
        let input = CreateBomInput {
            product_id,
            name: "Loop".into(),
            description: None,
            quantity: None,
            lines: vec![CreateBomLineInput {
                product_id,
                quantity: 1.0,
                operation_time: 0.0,
            }],
        };
        assert_matches!(validate_bom_input(&input), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn rejects_empty_and_non_positive_lines() {
        let mut input = CreateBomInput {
            product_id: Uuid::new_v4(),
            name: "Table".into(),
            description: None,
            quantity: None,
            lines: vec![],
        };
        assert_matches!(validate_bom_input(&input), Err(ServiceError::ValidationError(_)));

        input.lines.push(CreateBomLineInput {
            product_id: Uuid::new_v4(),
            quantity: 0.0,
            operation_time: 5.0,
        });
        assert_matches!(validate_bom_input(&input), Err(ServiceError::ValidationError(_)));

        input.lines[0].quantity = 2.0;
        input.lines[0].operation_time = -1.0;
        assert_matches!(validate_bom_input(&input), Err(ServiceError::ValidationError(_)));

        input.lines[0].operation_time = 0.0;
        assert!(validate_bom_input(&input).is_ok());
    }
}
