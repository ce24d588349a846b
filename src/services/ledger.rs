//! Inventory ledger: the only writer of stock balances and of the movement
//! log.
//!
//! Every mutating operation runs in a single database transaction that
//! covers balance reads, balance writes and movement appends, so no reader
//! ever observes a half-applied change. Balances are created lazily on the
//! first movement into a location.

use crate::{
    db::{self, DbPool},
    entities::{
        inventory::{self, Entity as Inventory},
        location::{self, Entity as Location},
        product::{self, Entity as Product},
        stock_movement::{self, Entity as StockMovement},
        MovementType,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{catalog::find_product, locations::find_active_location},
};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

pub const MAX_PAGE_SIZE: u64 = 100;

/// Manual stock correction. A positive `quantity` adds stock, a negative one
/// removes it; the sign must agree with the direction of `movement_type`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct AdjustStock {
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub quantity: i32,
    pub movement_type: MovementType,
    #[validate(length(max = 500))]
    pub reference: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    #[validate(length(max = 100))]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct TransferStock {
    pub product_id: Uuid,
    pub from_location_id: Uuid,
    pub to_location_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
    #[validate(length(max = 500))]
    pub reference: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    #[validate(length(max = 100))]
    pub created_by: Option<String>,
}

/// Balances on both sides of a completed transfer.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransferResult {
    pub from: inventory::Model,
    pub to: inventory::Model,
}

/// Stock effect of a completed financial transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEffect {
    Sale,
    Purchase,
    Return,
}

impl LedgerEffect {
    fn movement_type(self) -> MovementType {
        match self {
            LedgerEffect::Sale => MovementType::Sale,
            LedgerEffect::Purchase => MovementType::AdjustmentIn,
            LedgerEffect::Return => MovementType::Return,
        }
    }

    fn signed(self, quantity: i32) -> i32 {
        match self {
            LedgerEffect::Sale => -quantity,
            LedgerEffect::Purchase | LedgerEffect::Return => quantity,
        }
    }

    fn reference(self, transaction_number: &str) -> String {
        let label = match self {
            LedgerEffect::Sale => "Sale",
            LedgerEffect::Purchase => "Purchase",
            LedgerEffect::Return => "Return",
        };
        format!("{} - Transaction {}", label, transaction_number)
    }

    fn notes(self) -> &'static str {
        match self {
            LedgerEffect::Sale => "Product sold",
            LedgerEffect::Purchase => "Product purchased",
            LedgerEffect::Return => "Product returned",
        }
    }
}

/// One product line handed to [`InventoryLedger::apply_for_transaction`].
#[derive(Debug, Clone, Copy)]
pub struct LedgerLine<'a> {
    pub product: &'a product::Model,
    pub quantity: i32,
}

/// A balance write together with the movement that recorded it.
#[derive(Debug, Clone)]
pub struct AppliedMovement {
    pub balance: inventory::Model,
    pub movement: stock_movement::Model,
}

/// Audit fields shared by the movement rows of one operation.
#[derive(Debug, Clone, Default)]
struct MovementDetails {
    reference: Option<String>,
    notes: Option<String>,
    from_location_id: Option<Uuid>,
    to_location_id: Option<Uuid>,
    created_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LowStockItem {
    pub product_id: Uuid,
    pub product_name: String,
    pub product_sku: Option<String>,
    pub location_id: Uuid,
    pub location_name: String,
    pub current_stock: i32,
    pub threshold: i32,
    pub suggested_reorder: i32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LocationSummary {
    pub location_id: Uuid,
    pub location_name: String,
    pub total_items: u64,
    pub low_stock_items: u64,
    pub inventory_value: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InventoryOverview {
    pub total_products: u64,
    pub total_locations: u64,
    pub total_stock_units: i64,
    pub total_inventory_value: Decimal,
    pub low_stock_count: u64,
    pub location_summaries: Vec<LocationSummary>,
    pub low_stock_items: Vec<LowStockItem>,
}

/// Quantity suggested for reordering a low balance.
pub fn suggested_reorder(threshold: i32) -> i32 {
    threshold.saturating_mul(2).max(threshold.saturating_add(10))
}

fn stock_value(quantity: i32, price: Decimal) -> Decimal {
    Decimal::from(quantity) * price
}

async fn find_balance<C>(
    conn: &C,
    product_id: Uuid,
    location_id: Uuid,
) -> Result<Option<inventory::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let select = Inventory::find()
        .filter(inventory::Column::ProductId.eq(product_id))
        .filter(inventory::Column::LocationId.eq(location_id));
    Ok(db::for_update(select, conn).one(conn).await?)
}

/// Reads and locks the balances for `keys` in `(product_id, location_id)`
/// order. Units of work that touch several balances lock them through here,
/// so two of them never hold rows the other is waiting for.
async fn lock_balances<C, I>(
    conn: &C,
    keys: I,
) -> Result<HashMap<(Uuid, Uuid), inventory::Model>, ServiceError>
where
    C: ConnectionTrait,
    I: IntoIterator<Item = (Uuid, Uuid)>,
{
    let mut keys: Vec<(Uuid, Uuid)> = keys.into_iter().collect();
    keys.sort_unstable();
    keys.dedup();

    let mut locked = HashMap::with_capacity(keys.len());
    for (product_id, location_id) in keys {
        if let Some(balance) = find_balance(conn, product_id, location_id).await? {
            locked.insert((product_id, location_id), balance);
        }
    }
    Ok(locked)
}

/// Writes `previous + delta` to the balance (creating it at zero when absent)
/// and appends the movement that records the change.
async fn apply_delta<C>(
    conn: &C,
    product: &product::Model,
    location_id: Uuid,
    current: Option<inventory::Model>,
    delta: i32,
    movement_type: MovementType,
    details: MovementDetails,
) -> Result<AppliedMovement, ServiceError>
where
    C: ConnectionTrait,
{
    let previous = current.as_ref().map_or(0, |b| b.quantity);
    let new_quantity = previous
        .checked_add(delta)
        .ok_or_else(|| ServiceError::ValidationError("Quantity out of range".to_string()))?;

    if new_quantity < 0 {
        return Err(ServiceError::insufficient_stock(
            format!(
                "Insufficient stock. Current quantity: {}, Adjustment: {}",
                previous, delta
            ),
            previous,
            delta.saturating_abs(),
        ));
    }

    let balance = match current {
        Some(existing) => {
            let mut active: inventory::ActiveModel = existing.into();
            active.quantity = Set(new_quantity);
            active.update(conn).await?
        }
        None => {
            debug!(product_id = %product.id, %location_id, "creating balance");
            inventory::ActiveModel {
                id: Set(Uuid::new_v4()),
                product_id: Set(product.id),
                location_id: Set(location_id),
                quantity: Set(new_quantity),
                reserved_quantity: Set(0),
                low_stock_threshold: Set(product.low_stock_threshold),
                ..Default::default()
            }
            .insert(conn)
            .await?
        }
    };

    let movement = stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product.id),
        location_id: Set(location_id),
        movement_type: Set(movement_type),
        quantity: Set(delta.saturating_abs()),
        previous_quantity: Set(previous),
        new_quantity: Set(new_quantity),
        reference: Set(details.reference),
        notes: Set(details.notes),
        from_location_id: Set(details.from_location_id),
        to_location_id: Set(details.to_location_id),
        created_by: Set(details.created_by),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    Ok(AppliedMovement { balance, movement })
}

#[derive(Clone)]
pub struct InventoryLedger {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl InventoryLedger {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    pub async fn get_balance(
        &self,
        product_id: Uuid,
        location_id: Uuid,
    ) -> Result<inventory::Model, ServiceError> {
        Inventory::find()
            .filter(inventory::Column::ProductId.eq(product_id))
            .filter(inventory::Column::LocationId.eq(location_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Inventory not found for product {} at location {}",
                    product_id, location_id
                ))
            })
    }

    /// Reads the balances of `product_ids` at `location_id` inside the
    /// caller's unit of work, locking the rows where the backend supports it.
    /// Products without a balance there are absent from the map.
    pub async fn lock_balances_at<C>(
        &self,
        conn: &C,
        location_id: Uuid,
        product_ids: impl IntoIterator<Item = Uuid>,
    ) -> Result<HashMap<(Uuid, Uuid), inventory::Model>, ServiceError>
    where
        C: ConnectionTrait,
    {
        lock_balances(conn, product_ids.into_iter().map(|id| (id, location_id))).await
    }

    #[instrument(
        skip(self, command),
        fields(
            product_id = %command.product_id,
            location_id = %command.location_id,
            quantity = command.quantity,
            movement_type = %command.movement_type
        )
    )]
    pub async fn adjust(&self, command: AdjustStock) -> Result<inventory::Model, ServiceError> {
        command.validate()?;
        if command.quantity == 0 {
            return Err(ServiceError::ValidationError(
                "Adjustment quantity must not be zero".to_string(),
            ));
        }
        if command.movement_type.is_inbound() != (command.quantity > 0) {
            return Err(ServiceError::ValidationError(format!(
                "Movement type {} cannot record a change of {}",
                command.movement_type, command.quantity
            )));
        }

        let work = db::begin(&self.db).await?;
        let txn = work.conn();

        let product = find_product(txn, command.product_id).await?;
        find_active_location(txn, command.location_id).await?;

        let current = find_balance(txn, product.id, command.location_id).await?;
        let applied = apply_delta(
            txn,
            &product,
            command.location_id,
            current,
            command.quantity,
            command.movement_type,
            MovementDetails {
                reference: command.reference,
                notes: command.notes,
                created_by: command.created_by,
                ..Default::default()
            },
        )
        .await?;

        work.commit().await?;

        info!(
            previous = applied.movement.previous_quantity,
            new = applied.movement.new_quantity,
            "stock adjusted"
        );
        self.publish_applied(std::slice::from_ref(&applied));
        Ok(applied.balance)
    }

    #[instrument(
        skip(self, command),
        fields(
            product_id = %command.product_id,
            from = %command.from_location_id,
            to = %command.to_location_id,
            quantity = command.quantity
        )
    )]
    pub async fn transfer(&self, command: TransferStock) -> Result<TransferResult, ServiceError> {
        command.validate()?;
        if command.from_location_id == command.to_location_id {
            return Err(ServiceError::InvalidTransfer(
                "Cannot transfer to the same location".to_string(),
            ));
        }

        let work = db::begin(&self.db).await?;
        let txn = work.conn();

        let product = find_product(txn, command.product_id).await?;
        find_active_location(txn, command.from_location_id).await?;
        find_active_location(txn, command.to_location_id).await?;

        let source_key = (product.id, command.from_location_id);
        let destination_key = (product.id, command.to_location_id);
        let mut balances = lock_balances(txn, [source_key, destination_key]).await?;

        let source = balances.remove(&source_key).ok_or_else(|| {
            ServiceError::NotFound(format!(
                "Inventory not found for product {} at source location {}",
                product.id, command.from_location_id
            ))
        })?;

        if source.available_quantity() < command.quantity {
            return Err(ServiceError::insufficient_stock(
                format!(
                    "Insufficient stock at source location. Available: {}, Requested: {}",
                    source.available_quantity(),
                    command.quantity
                ),
                source.available_quantity(),
                command.quantity,
            ));
        }

        let details = MovementDetails {
            reference: command.reference,
            notes: command.notes,
            from_location_id: Some(command.from_location_id),
            to_location_id: Some(command.to_location_id),
            created_by: command.created_by,
        };

        let outgoing = apply_delta(
            txn,
            &product,
            command.from_location_id,
            Some(source),
            -command.quantity,
            MovementType::TransferOut,
            details.clone(),
        )
        .await?;

        let incoming = apply_delta(
            txn,
            &product,
            command.to_location_id,
            balances.remove(&destination_key),
            command.quantity,
            MovementType::TransferIn,
            details,
        )
        .await?;

        work.commit().await?;

        info!(
            from_quantity = outgoing.balance.quantity,
            to_quantity = incoming.balance.quantity,
            "stock transferred"
        );
        self.event_sender
            .send_or_log(Event::StockTransferred {
                product_id: product.id,
                from_location_id: command.from_location_id,
                to_location_id: command.to_location_id,
                quantity: command.quantity,
            });
        self.publish_low_stock(&outgoing);

        Ok(TransferResult {
            from: outgoing.balance,
            to: incoming.balance,
        })
    }

    /// Applies the stock effect of a transaction inside the caller's unit of
    /// work. Sales must have been checked for sufficiency by the caller; a
    /// line that would still drive a balance negative fails the whole
    /// transaction.
    #[instrument(skip(self, txn, lines), fields(lines = lines.len()))]
    pub async fn apply_for_transaction(
        &self,
        txn: &DatabaseTransaction,
        lines: &[LedgerLine<'_>],
        location_id: Uuid,
        effect: LedgerEffect,
        transaction_number: &str,
        actor: Option<&str>,
    ) -> Result<Vec<AppliedMovement>, ServiceError> {
        let mut balances = lock_balances(
            txn,
            lines.iter().map(|line| (line.product.id, location_id)),
        )
        .await?;
        let mut applied = Vec::with_capacity(lines.len());

        for line in lines {
            let key = (line.product.id, location_id);
            let current = balances.remove(&key);
            if effect == LedgerEffect::Sale && current.is_none() {
                return Err(ServiceError::insufficient_stock(
                    format!(
                        "Product {} is not available at this location",
                        line.product.name
                    ),
                    0,
                    line.quantity,
                ));
            }

            let result = apply_delta(
                txn,
                line.product,
                location_id,
                current,
                effect.signed(line.quantity),
                effect.movement_type(),
                MovementDetails {
                    reference: Some(effect.reference(transaction_number)),
                    notes: Some(effect.notes().to_string()),
                    created_by: actor.map(str::to_string),
                    ..Default::default()
                },
            )
            .await?;
            balances.insert(key, result.balance.clone());
            applied.push(result);
        }

        Ok(applied)
    }

    /// Publishes events for movements whose unit of work has committed.
    pub fn publish_applied(&self, applied: &[AppliedMovement]) {
        for entry in applied {
            self.event_sender
                .send_or_log(Event::StockAdjusted {
                    product_id: entry.movement.product_id,
                    location_id: entry.movement.location_id,
                    movement_type: entry.movement.movement_type,
                    previous_quantity: entry.movement.previous_quantity,
                    new_quantity: entry.movement.new_quantity,
                });
            self.publish_low_stock(entry);
        }
    }

    fn publish_low_stock(&self, entry: &AppliedMovement) {
        let decreased = entry.movement.net_change() < 0;
        if decreased && entry.balance.is_low_stock() {
            self.event_sender
                .send_or_log(Event::LowStockDetected {
                    product_id: entry.balance.product_id,
                    location_id: entry.balance.location_id,
                    available_quantity: entry.balance.available_quantity(),
                    threshold: entry.balance.low_stock_threshold,
                });
        }
    }

    pub async fn balances_for_product(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<inventory::Model>, ServiceError> {
        let db = self.db.as_ref();
        find_product(db, product_id).await?;
        Ok(Inventory::find()
            .filter(inventory::Column::ProductId.eq(product_id))
            .all(db)
            .await?)
    }

    pub async fn balances_for_location(
        &self,
        location_id: Uuid,
    ) -> Result<Vec<inventory::Model>, ServiceError> {
        let db = self.db.as_ref();
        find_active_location(db, location_id).await?;
        Ok(Inventory::find()
            .filter(inventory::Column::LocationId.eq(location_id))
            .all(db)
            .await?)
    }

    /// Balances whose available quantity is at or below their threshold.
    pub async fn low_stock(
        &self,
        location_id: Option<Uuid>,
    ) -> Result<Vec<LowStockItem>, ServiceError> {
        let db = self.db.as_ref();
        let mut query = Inventory::find();
        if let Some(location_id) = location_id {
            query = query.filter(inventory::Column::LocationId.eq(location_id));
        }
        let balances: Vec<_> = query
            .all(db)
            .await?
            .into_iter()
            .filter(inventory::Model::is_low_stock)
            .collect();

        let products = self.products_by_id(&balances).await?;
        let locations: HashMap<Uuid, location::Model> = Location::find()
            .all(db)
            .await?
            .into_iter()
            .map(|l| (l.id, l))
            .collect();

        Ok(balances
            .iter()
            .filter_map(|b| low_stock_item(b, &products, &locations))
            .collect())
    }

    /// Movement log, newest first. Pages start at 1.
    pub async fn movements(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<stock_movement::Model>, u64), ServiceError> {
        let per_page = per_page.clamp(1, MAX_PAGE_SIZE);
        let paginator = StockMovement::find()
            .order_by_desc(stock_movement::Column::CreatedAt)
            .paginate(self.db.as_ref(), per_page);

        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }

    pub async fn movements_for_product(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        Ok(StockMovement::find()
            .filter(stock_movement::Column::ProductId.eq(product_id))
            .order_by_desc(stock_movement::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn overview(&self) -> Result<InventoryOverview, ServiceError> {
        let db = self.db.as_ref();
        let balances = Inventory::find().all(db).await?;
        let products = self.products_by_id(&balances).await?;
        let active_locations = Location::find()
            .filter(location::Column::Active.eq(true))
            .order_by_asc(location::Column::Name)
            .all(db)
            .await?;
        let all_locations: HashMap<Uuid, location::Model> = Location::find()
            .all(db)
            .await?
            .into_iter()
            .map(|l| (l.id, l))
            .collect();

        let value_of = |b: &inventory::Model| {
            products
                .get(&b.product_id)
                .map(|p| stock_value(b.quantity, p.price))
                .unwrap_or_default()
        };

        let distinct_products: HashSet<Uuid> = balances.iter().map(|b| b.product_id).collect();
        let distinct_locations: HashSet<Uuid> = balances.iter().map(|b| b.location_id).collect();
        let total_stock_units = balances.iter().map(|b| i64::from(b.quantity)).sum();
        let total_inventory_value = balances.iter().map(value_of).sum::<Decimal>().round_dp(2);

        let location_summaries = active_locations
            .iter()
            .map(|location| {
                let here: Vec<&inventory::Model> = balances
                    .iter()
                    .filter(|b| b.location_id == location.id)
                    .collect();
                LocationSummary {
                    location_id: location.id,
                    location_name: location.name.clone(),
                    total_items: here.len() as u64,
                    low_stock_items: here.iter().filter(|b| b.is_low_stock()).count() as u64,
                    inventory_value: here.iter().map(|b| value_of(*b)).sum::<Decimal>().round_dp(2),
                }
            })
            .collect();

        let low_stock_items: Vec<LowStockItem> = balances
            .iter()
            .filter(|b| b.is_low_stock())
            .filter_map(|b| low_stock_item(b, &products, &all_locations))
            .collect();

        Ok(InventoryOverview {
            total_products: distinct_products.len() as u64,
            total_locations: distinct_locations.len() as u64,
            total_stock_units,
            total_inventory_value,
            low_stock_count: low_stock_items.len() as u64,
            location_summaries,
            low_stock_items,
        })
    }

    async fn products_by_id(
        &self,
        balances: &[inventory::Model],
    ) -> Result<HashMap<Uuid, product::Model>, ServiceError> {
        let ids: HashSet<Uuid> = balances.iter().map(|b| b.product_id).collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(Product::find()
            .filter(product::Column::Id.is_in(ids))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect())
    }
}

fn low_stock_item(
    balance: &inventory::Model,
    products: &HashMap<Uuid, product::Model>,
    locations: &HashMap<Uuid, location::Model>,
) -> Option<LowStockItem> {
    let product = products.get(&balance.product_id)?;
    let location = locations.get(&balance.location_id)?;
    Some(LowStockItem {
        product_id: product.id,
        product_name: product.name.clone(),
        product_sku: product.sku.clone(),
        location_id: location.id,
        location_name: location.name.clone(),
        current_stock: balance.available_quantity(),
        threshold: balance.low_stock_threshold,
        suggested_reorder: suggested_reorder(balance.low_stock_threshold),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn reorder_suggestion_uses_larger_of_double_or_plus_ten() {
        assert_eq!(suggested_reorder(0), 10);
        assert_eq!(suggested_reorder(5), 15);
        assert_eq!(suggested_reorder(10), 20);
        assert_eq!(suggested_reorder(25), 50);
    }

    #[test]
    fn effect_direction_and_tags() {
        assert_eq!(LedgerEffect::Sale.signed(3), -3);
        assert_eq!(LedgerEffect::Purchase.signed(3), 3);
        assert_eq!(LedgerEffect::Return.signed(3), 3);
        assert_eq!(LedgerEffect::Purchase.movement_type(), MovementType::AdjustmentIn);
        assert_eq!(
            LedgerEffect::Sale.reference("SALE-20240101120000-007"),
            "Sale - Transaction SALE-20240101120000-007"
        );
        assert_eq!(LedgerEffect::Return.notes(), "Product returned");
    }

    #[test]
    fn stock_value_multiplies_price() {
        assert_eq!(stock_value(3, dec!(15.99)), dec!(47.97));
        assert_eq!(stock_value(0, dec!(9.99)), dec!(0));
    }
}
