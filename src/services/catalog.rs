use crate::{
    db::DbPool,
    entities::product::{self, Entity as Product},
    errors::ServiceError,
    events::{Event, EventSender},
};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() || price.is_zero() {
        let mut err = ValidationError::new("price");
        err.message = Some("Price must be greater than 0".into());
        return Err(err);
    }
    if price.scale() > 2 {
        let mut err = ValidationError::new("price");
        err.message = Some("Price can have at most 2 decimal places".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct NewProduct {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub sku: Option<String>,
    #[validate(length(max = 100))]
    pub category: Option<String>,
    #[validate(custom = "validate_price")]
    pub price: Decimal,
    #[validate(range(min = 0))]
    pub low_stock_threshold: Option<i32>,
}

/// Fields left as `None` keep their stored value.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, ToSchema)]
pub struct ProductUpdate {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    #[validate(length(max = 100))]
    pub category: Option<String>,
    #[validate(custom = "validate_price")]
    pub price: Option<Decimal>,
    #[validate(range(min = 0))]
    pub low_stock_threshold: Option<i32>,
}

/// Loads a product by id inside any connection or unit of work.
pub async fn find_product<C>(conn: &C, id: Uuid) -> Result<product::Model, ServiceError>
where
    C: ConnectionTrait,
{
    Product::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product not found with id: {}", id)))
}

/// Product catalog. Supplies prices and default low-stock thresholds to the
/// ledger and never touches stock quantities.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    default_low_stock_threshold: i32,
}

impl CatalogService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        default_low_stock_threshold: i32,
    ) -> Self {
        Self {
            db,
            event_sender,
            default_low_stock_threshold,
        }
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(&self, input: NewProduct) -> Result<product::Model, ServiceError> {
        input.validate()?;
        let db = self.db.as_ref();

        if let Some(sku) = &input.sku {
            let taken = Product::find()
                .filter(product::Column::Sku.eq(sku.as_str()))
                .one(db)
                .await?
                .is_some();
            if taken {
                return Err(ServiceError::Conflict(format!(
                    "Product with SKU '{}' already exists",
                    sku
                )));
            }
        }

        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            description: Set(input.description),
            sku: Set(input.sku),
            category: Set(input.category),
            price: Set(input.price.round_dp(2)),
            low_stock_threshold: Set(input
                .low_stock_threshold
                .unwrap_or(self.default_low_stock_threshold)),
            active: Set(true),
            ..Default::default()
        }
        .insert(db)
        .await?;

        info!(product_id = %model.id, "product created");
        self.event_sender.send_or_log(Event::ProductCreated(model.id));
        Ok(model)
    }

    pub async fn get_product(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        find_product(self.db.as_ref(), id).await
    }

    /// Active products ordered by name.
    pub async fn list_products(&self) -> Result<Vec<product::Model>, ServiceError> {
        Ok(Product::find()
            .filter(product::Column::Active.eq(true))
            .order_by_asc(product::Column::Name)
            .all(self.db.as_ref())
            .await?)
    }

    #[instrument(skip(self, changes))]
    pub async fn update_product(
        &self,
        id: Uuid,
        changes: ProductUpdate,
    ) -> Result<product::Model, ServiceError> {
        changes.validate()?;
        let db = self.db.as_ref();
        let existing = find_product(db, id).await?;

        let mut active: product::ActiveModel = existing.into();
        if let Some(name) = changes.name {
            active.name = Set(name);
        }
        if let Some(description) = changes.description {
            active.description = Set(Some(description));
        }
        if let Some(category) = changes.category {
            active.category = Set(Some(category));
        }
        if let Some(price) = changes.price {
            active.price = Set(price.round_dp(2));
        }
        if let Some(threshold) = changes.low_stock_threshold {
            active.low_stock_threshold = Set(threshold);
        }

        let updated = active.update(db).await?;
        info!(product_id = %id, "product updated");
        Ok(updated)
    }

    /// Hides a product from the catalog. Its balances and movements stay.
    #[instrument(skip(self))]
    pub async fn deactivate_product(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        let db = self.db.as_ref();
        let existing = find_product(db, id).await?;

        let mut active: product::ActiveModel = existing.into();
        active.active = Set(false);
        let updated = active.update(db).await?;

        info!(product_id = %id, "product deactivated");
        self.event_sender.send_or_log(Event::ProductDeactivated(id));
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_product(price: Decimal) -> NewProduct {
        NewProduct {
            name: "Widget".into(),
            description: None,
            sku: Some("W-1".into()),
            category: None,
            price,
            low_stock_threshold: None,
        }
    }

    #[test]
    fn price_must_be_positive() {
        assert!(new_product(dec!(15.99)).validate().is_ok());
        assert!(new_product(dec!(0)).validate().is_err());
        assert!(new_product(dec!(-1.00)).validate().is_err());
    }

    #[test]
    fn price_is_limited_to_cents() {
        assert!(new_product(dec!(1.005)).validate().is_err());
    }

    #[test]
    fn empty_update_is_valid() {
        assert!(ProductUpdate::default().validate().is_ok());
    }
}
