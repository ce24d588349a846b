//! Sale, purchase and return processing.
//!
//! Each call is one unit of work: the transaction row, its items and the
//! ledger effect are written together and committed once, or not at all.
//! A transaction is only ever visible as `COMPLETED`.

use crate::{
    db::{self, DbPool},
    entities::{
        product,
        transaction::{self, Entity as Transaction},
        transaction_item::{self, Entity as TransactionItem},
        PaymentMethod, ReturnReason, TransactionStatus, TransactionType,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        catalog::find_product,
        ledger::{InventoryLedger, LedgerEffect, LedgerLine, MAX_PAGE_SIZE},
        locations::find_active_location,
    },
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Produces human-readable transaction numbers.
///
/// Numbers are not guaranteed unique; the unique index on
/// `transactions.transaction_number` rejects a collision and the whole unit
/// of work fails with a conflict.
pub trait TransactionNumberGenerator: Send + Sync {
    fn next_number(&self, prefix: &str) -> String;
}

/// `{PREFIX}-{yyyyMMddHHmmss}-{000..999}`
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampNumberGenerator;

impl TransactionNumberGenerator for TimestampNumberGenerator {
    fn next_number(&self, prefix: &str) -> String {
        let suffix: u16 = rand::thread_rng().gen_range(0..1000);
        format!(
            "{}-{}-{:03}",
            prefix,
            Utc::now().format("%Y%m%d%H%M%S"),
            suffix
        )
    }
}

fn validate_non_negative(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        let mut err = ValidationError::new("amount");
        err.message = Some("Amount cannot be negative".into());
        return Err(err);
    }
    Ok(())
}

fn validate_positive(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_negative() || amount.is_zero() {
        let mut err = ValidationError::new("amount");
        err.message = Some("Amount must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct TransactionLine {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
    /// Overrides the catalog price when present
    #[validate(custom = "validate_positive")]
    pub unit_price: Option<Decimal>,
    #[validate(custom = "validate_non_negative")]
    pub discount: Option<Decimal>,
    #[validate(custom = "validate_non_negative")]
    pub tax_amount: Option<Decimal>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct SaleRequest {
    pub location_id: Uuid,
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<TransactionLine>,
    #[validate(custom = "validate_non_negative")]
    pub tax_amount: Option<Decimal>,
    #[validate(custom = "validate_non_negative")]
    pub discount_amount: Option<Decimal>,
    #[validate(length(max = 255))]
    pub customer_name: Option<String>,
    #[validate(email)]
    pub customer_email: Option<String>,
    #[validate(length(max = 50))]
    pub customer_phone: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    #[validate(length(max = 255))]
    pub payment_reference: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    #[validate(length(max = 100))]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct PurchaseRequest {
    pub location_id: Uuid,
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<TransactionLine>,
    #[validate(custom = "validate_non_negative")]
    pub tax_amount: Option<Decimal>,
    #[validate(custom = "validate_non_negative")]
    pub discount_amount: Option<Decimal>,
    #[validate(length(max = 255))]
    pub supplier_name: Option<String>,
    #[validate(email)]
    pub supplier_email: Option<String>,
    #[validate(length(max = 50))]
    pub supplier_phone: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    #[validate(length(max = 255))]
    pub payment_reference: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    #[validate(length(max = 100))]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct ReturnRequest {
    pub original_transaction_id: Uuid,
    pub location_id: Uuid,
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub return_quantity: i32,
    pub reason: ReturnReason,
    /// Defaults to the original unit price times the returned quantity
    #[validate(custom = "validate_non_negative")]
    pub refund_amount: Option<Decimal>,
    pub refund_method: Option<PaymentMethod>,
    #[validate(length(max = 255))]
    pub refund_reference: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    #[validate(length(max = 100))]
    pub created_by: Option<String>,
}

/// A transaction with its items.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransactionDetails {
    #[serde(flatten)]
    pub transaction: transaction::Model,
    pub items: Vec<transaction_item::Model>,
}

/// Rounds to cents and rejects amounts the `decimal(12, 2)` money columns
/// cannot hold. `None` is an arithmetic overflow.
fn checked_amount(amount: Option<Decimal>) -> Result<Decimal, ServiceError> {
    let limit = Decimal::new(999_999_999_999, 2);
    match amount.map(|a| a.round_dp(2)) {
        Some(a) if a.abs() <= limit => Ok(a),
        _ => Err(ServiceError::ValidationError(format!(
            "Amount exceeds the supported maximum of {}",
            limit
        ))),
    }
}

/// `unit_price × quantity − discount + tax`, rounded to cents.
pub fn line_total(
    unit_price: Decimal,
    quantity: i32,
    discount: Decimal,
    tax: Decimal,
) -> Result<Decimal, ServiceError> {
    checked_amount(
        unit_price
            .checked_mul(Decimal::from(quantity))
            .and_then(|gross| gross.checked_sub(discount))
            .and_then(|net| net.checked_add(tax)),
    )
}

/// `subtotal + tax − discount`, rounded to cents.
pub fn transaction_total(
    subtotal: Decimal,
    tax: Decimal,
    discount: Decimal,
) -> Result<Decimal, ServiceError> {
    checked_amount(
        subtotal
            .checked_add(tax)
            .and_then(|gross| gross.checked_sub(discount)),
    )
}

/// Counterparty and payment fields shared by sales and purchases.
struct Header {
    transaction_type: TransactionType,
    location_id: Uuid,
    tax_amount: Decimal,
    discount_amount: Decimal,
    contact_name: Option<String>,
    contact_email: Option<String>,
    contact_phone: Option<String>,
    payment_method: Option<PaymentMethod>,
    payment_reference: Option<String>,
    notes: Option<String>,
    created_by: Option<String>,
}

/// A request line resolved against the catalog.
struct PricedLine {
    product: product::Model,
    quantity: i32,
    unit_price: Decimal,
    discount: Decimal,
    tax_amount: Decimal,
    line_total: Decimal,
    notes: Option<String>,
}

#[derive(Clone)]
pub struct TransactionProcessor {
    db: Arc<DbPool>,
    ledger: InventoryLedger,
    event_sender: Arc<EventSender>,
    numbers: Arc<dyn TransactionNumberGenerator>,
}

impl TransactionProcessor {
    pub fn new(db: Arc<DbPool>, ledger: InventoryLedger, event_sender: Arc<EventSender>) -> Self {
        Self::with_number_generator(db, ledger, event_sender, Arc::new(TimestampNumberGenerator))
    }

    pub fn with_number_generator(
        db: Arc<DbPool>,
        ledger: InventoryLedger,
        event_sender: Arc<EventSender>,
        numbers: Arc<dyn TransactionNumberGenerator>,
    ) -> Self {
        Self {
            db,
            ledger,
            event_sender,
            numbers,
        }
    }

    #[instrument(skip(self, request), fields(location_id = %request.location_id, items = request.items.len()))]
    pub async fn process_sale(
        &self,
        request: SaleRequest,
    ) -> Result<TransactionDetails, ServiceError> {
        validate_lines(&request, &request.items)?;
        let work = db::begin(&self.db).await?;
        let txn = work.conn();

        find_active_location(txn, request.location_id).await?;
        let lines = price_lines(txn, &request.items).await?;
        self.ensure_sufficient_stock(txn, request.location_id, &lines)
            .await?;

        let header = Header {
            transaction_type: TransactionType::Sale,
            location_id: request.location_id,
            tax_amount: request.tax_amount.unwrap_or_default(),
            discount_amount: request.discount_amount.unwrap_or_default(),
            contact_name: request.customer_name,
            contact_email: request.customer_email,
            contact_phone: request.customer_phone,
            payment_method: request.payment_method,
            payment_reference: request.payment_reference,
            notes: request.notes,
            created_by: request.created_by,
        };

        self.complete_priced(work, header, lines, LedgerEffect::Sale)
            .await
    }

    #[instrument(skip(self, request), fields(location_id = %request.location_id, items = request.items.len()))]
    pub async fn process_purchase(
        &self,
        request: PurchaseRequest,
    ) -> Result<TransactionDetails, ServiceError> {
        validate_lines(&request, &request.items)?;
        let work = db::begin(&self.db).await?;
        let txn = work.conn();

        find_active_location(txn, request.location_id).await?;
        let lines = price_lines(txn, &request.items).await?;

        let header = Header {
            transaction_type: TransactionType::Purchase,
            location_id: request.location_id,
            tax_amount: request.tax_amount.unwrap_or_default(),
            discount_amount: request.discount_amount.unwrap_or_default(),
            contact_name: request.supplier_name,
            contact_email: request.supplier_email,
            contact_phone: request.supplier_phone,
            payment_method: request.payment_method,
            payment_reference: request.payment_reference,
            notes: request.notes,
            created_by: request.created_by,
        };

        self.complete_priced(work, header, lines, LedgerEffect::Purchase)
            .await
    }

    #[instrument(
        skip(self, request),
        fields(
            original = %request.original_transaction_id,
            product_id = %request.product_id,
            quantity = request.return_quantity
        )
    )]
    pub async fn process_return(
        &self,
        request: ReturnRequest,
    ) -> Result<TransactionDetails, ServiceError> {
        request.validate()?;
        let work = db::begin(&self.db).await?;
        let txn = work.conn();

        // Returns against one original queue on its row, so the returned
        // quantity read below stays current until commit.
        let find_original = Transaction::find_by_id(request.original_transaction_id);
        let original = db::for_update(find_original, txn)
            .one(txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Transaction not found with id: {}",
                    request.original_transaction_id
                ))
            })?;
        if original.transaction_type != TransactionType::Sale {
            return Err(ServiceError::InvalidReturn(format!(
                "Only sale transactions can be returned; {} is a {}",
                original.transaction_number, original.transaction_type
            )));
        }

        find_active_location(txn, request.location_id).await?;
        let product = find_product(txn, request.product_id).await?;

        let original_lines = TransactionItem::find()
            .filter(transaction_item::Column::TransactionId.eq(original.id))
            .filter(transaction_item::Column::ProductId.eq(request.product_id))
            .all(txn)
            .await?;
        let first_line = original_lines.first().ok_or_else(|| {
            ServiceError::NotFound(format!(
                "Product {} not found in transaction {}",
                request.product_id, original.transaction_number
            ))
        })?;
        let unit_price = first_line.unit_price;
        let sold: i64 = original_lines.iter().map(|l| i64::from(l.quantity)).sum();
        let requested = i64::from(request.return_quantity);

        if requested > sold {
            return Err(ServiceError::InvalidReturn(format!(
                "Return quantity ({}) cannot exceed original quantity ({})",
                request.return_quantity, sold
            )));
        }

        let already_returned = returned_so_far(txn, original.id, request.product_id).await?;
        if already_returned + requested > sold {
            return Err(ServiceError::InvalidReturn(format!(
                "Return quantity ({}) exceeds the {} unit(s) of product {} still returnable on transaction {}",
                request.return_quantity,
                sold - already_returned,
                product.name,
                original.transaction_number
            )));
        }

        let refund = checked_amount(
            request
                .refund_amount
                .or_else(|| unit_price.checked_mul(Decimal::from(request.return_quantity))),
        )?;
        let reason = request.reason.description();
        let notes = format!(
            "Return for transaction {}. Reason: {}. {}",
            original.transaction_number,
            reason,
            request.notes.as_deref().unwrap_or("")
        )
        .trim_end()
        .to_string();

        let number = self.numbers.next_number(TransactionType::Return.number_prefix());
        let pending = transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            transaction_number: Set(number.clone()),
            transaction_type: Set(TransactionType::Return),
            status: Set(TransactionStatus::Pending),
            location_id: Set(request.location_id),
            original_transaction_id: Set(Some(original.id)),
            subtotal: Set(refund),
            tax_amount: Set(Decimal::ZERO),
            discount_amount: Set(Decimal::ZERO),
            total_amount: Set(refund),
            contact_name: Set(original.contact_name.clone()),
            contact_email: Set(original.contact_email.clone()),
            contact_phone: Set(original.contact_phone.clone()),
            payment_method: Set(request.refund_method),
            payment_reference: Set(request.refund_reference),
            notes: Set(Some(notes)),
            created_by: Set(request.created_by.clone()),
            ..Default::default()
        }
        .insert(txn)
        .await?;

        let item = transaction_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            transaction_id: Set(pending.id),
            product_id: Set(product.id),
            quantity: Set(request.return_quantity),
            unit_price: Set(unit_price),
            discount: Set(Decimal::ZERO),
            tax_amount: Set(Decimal::ZERO),
            line_total: Set(refund),
            notes: Set(Some(format!("Return item - Reason: {}", reason))),
        }
        .insert(txn)
        .await?;

        let ledger_lines = [LedgerLine {
            product: &product,
            quantity: request.return_quantity,
        }];
        let applied = self
            .ledger
            .apply_for_transaction(
                txn,
                &ledger_lines,
                request.location_id,
                LedgerEffect::Return,
                &number,
                request.created_by.as_deref(),
            )
            .await?;

        let completed = mark_completed(txn, pending).await?;
        work.commit().await?;

        info!(transaction_number = %completed.transaction_number, refund = %refund, "return processed");
        self.ledger.publish_applied(&applied);
        self.publish_completed(&completed);

        Ok(TransactionDetails {
            transaction: completed,
            items: vec![item],
        })
    }

    pub async fn get_transaction(&self, id: Uuid) -> Result<TransactionDetails, ServiceError> {
        let db = self.db.as_ref();
        let transaction = Transaction::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Transaction not found with id: {}", id)))?;
        let items = TransactionItem::find()
            .filter(transaction_item::Column::TransactionId.eq(id))
            .all(db)
            .await?;
        Ok(TransactionDetails { transaction, items })
    }

    /// Transactions newest first. Pages start at 1.
    pub async fn list_transactions(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<transaction::Model>, u64), ServiceError> {
        let per_page = per_page.clamp(1, MAX_PAGE_SIZE);
        let paginator = Transaction::find()
            .order_by_desc(transaction::Column::CreatedAt)
            .paginate(self.db.as_ref(), per_page);

        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }

    /// Rejects the sale before anything is written if any product is short.
    /// Lines for the same product are checked against their combined quantity.
    async fn ensure_sufficient_stock(
        &self,
        txn: &DatabaseTransaction,
        location_id: Uuid,
        lines: &[PricedLine],
    ) -> Result<(), ServiceError> {
        let mut required: Vec<(&product::Model, i64)> = Vec::new();
        let mut index: HashMap<Uuid, usize> = HashMap::new();
        for line in lines {
            let quantity = i64::from(line.quantity);
            match index.get(&line.product.id) {
                Some(&i) => required[i].1 += quantity,
                None => {
                    index.insert(line.product.id, required.len());
                    required.push((&line.product, quantity));
                }
            }
        }

        let balances = self
            .ledger
            .lock_balances_at(txn, location_id, required.iter().map(|(p, _)| p.id).collect::<Vec<Uuid>>())
            .await?;

        for (product, quantity) in required {
            let requested = i32::try_from(quantity).unwrap_or(i32::MAX);
            match balances.get(&(product.id, location_id)) {
                None => {
                    return Err(ServiceError::insufficient_stock(
                        format!("Product {} is not available at this location", product.name),
                        0,
                        requested,
                    ))
                }
                Some(balance) if i64::from(balance.available_quantity()) < quantity => {
                    let available = balance.available_quantity();
                    return Err(ServiceError::insufficient_stock(
                        format!(
                            "Insufficient stock for product {}. Available: {}, Required: {}",
                            product.name, available, quantity
                        ),
                        available,
                        requested,
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Writes a priced sale or purchase, applies its stock effect and commits.
    async fn complete_priced(
        &self,
        work: db::UnitOfWork,
        header: Header,
        lines: Vec<PricedLine>,
        effect: LedgerEffect,
    ) -> Result<TransactionDetails, ServiceError> {
        let txn = work.conn();
        let mut subtotal = Decimal::ZERO;
        for line in &lines {
            subtotal = checked_amount(subtotal.checked_add(line.line_total))?;
        }
        let tax = checked_amount(Some(header.tax_amount))?;
        let discount = checked_amount(Some(header.discount_amount))?;
        let total = transaction_total(subtotal, tax, discount)?;

        let number = self
            .numbers
            .next_number(header.transaction_type.number_prefix());

        let pending = transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            transaction_number: Set(number.clone()),
            transaction_type: Set(header.transaction_type),
            status: Set(TransactionStatus::Pending),
            location_id: Set(header.location_id),
            original_transaction_id: Set(None),
            subtotal: Set(subtotal),
            tax_amount: Set(tax),
            discount_amount: Set(discount),
            total_amount: Set(total),
            contact_name: Set(header.contact_name),
            contact_email: Set(header.contact_email),
            contact_phone: Set(header.contact_phone),
            payment_method: Set(header.payment_method),
            payment_reference: Set(header.payment_reference),
            notes: Set(header.notes),
            created_by: Set(header.created_by.clone()),
            ..Default::default()
        }
        .insert(txn)
        .await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let item = transaction_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                transaction_id: Set(pending.id),
                product_id: Set(line.product.id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                discount: Set(line.discount),
                tax_amount: Set(line.tax_amount),
                line_total: Set(line.line_total),
                notes: Set(line.notes.clone()),
            }
            .insert(txn)
            .await?;
            items.push(item);
        }

        let ledger_lines: Vec<LedgerLine<'_>> = lines
            .iter()
            .map(|line| LedgerLine {
                product: &line.product,
                quantity: line.quantity,
            })
            .collect();
        let applied = self
            .ledger
            .apply_for_transaction(
                txn,
                &ledger_lines,
                header.location_id,
                effect,
                &number,
                header.created_by.as_deref(),
            )
            .await?;

        let completed = mark_completed(txn, pending).await?;
        work.commit().await?;

        info!(
            transaction_number = %completed.transaction_number,
            total = %completed.total_amount,
            "transaction completed"
        );
        self.ledger.publish_applied(&applied);
        self.publish_completed(&completed);

        Ok(TransactionDetails {
            transaction: completed,
            items,
        })
    }

    fn publish_completed(&self, transaction: &transaction::Model) {
        self.event_sender
            .send_or_log(Event::TransactionCompleted {
                transaction_id: transaction.id,
                transaction_number: transaction.transaction_number.clone(),
                transaction_type: transaction.transaction_type,
                location_id: transaction.location_id,
            });
    }
}

fn validate_lines<R: Validate>(request: &R, lines: &[TransactionLine]) -> Result<(), ServiceError> {
    request.validate()?;
    for line in lines {
        line.validate()?;
    }
    Ok(())
}

async fn price_lines<C>(conn: &C, lines: &[TransactionLine]) -> Result<Vec<PricedLine>, ServiceError>
where
    C: ConnectionTrait,
{
    let mut priced = Vec::with_capacity(lines.len());
    for line in lines {
        let product = find_product(conn, line.product_id).await?;
        let unit_price = checked_amount(Some(line.unit_price.unwrap_or(product.price)))?;
        let discount = checked_amount(Some(line.discount.unwrap_or_default()))?;
        let tax_amount = checked_amount(Some(line.tax_amount.unwrap_or_default()))?;
        priced.push(PricedLine {
            line_total: line_total(unit_price, line.quantity, discount, tax_amount)?,
            product,
            quantity: line.quantity,
            unit_price,
            discount,
            tax_amount,
            notes: line.notes.clone(),
        });
    }
    Ok(priced)
}

/// Quantity of `product_id` already given back against `original_id`.
async fn returned_so_far<C>(conn: &C, original_id: Uuid, product_id: Uuid) -> Result<i64, ServiceError>
where
    C: ConnectionTrait,
{
    let returns: Vec<Uuid> = Transaction::find()
        .filter(transaction::Column::OriginalTransactionId.eq(original_id))
        .filter(transaction::Column::TransactionType.eq(TransactionType::Return))
        .filter(transaction::Column::Status.eq(TransactionStatus::Completed))
        .all(conn)
        .await?
        .into_iter()
        .map(|t| t.id)
        .collect();
    if returns.is_empty() {
        return Ok(0);
    }

    let items = TransactionItem::find()
        .filter(transaction_item::Column::TransactionId.is_in(returns))
        .filter(transaction_item::Column::ProductId.eq(product_id))
        .all(conn)
        .await?;
    Ok(items.iter().map(|i| i64::from(i.quantity)).sum())
}

async fn mark_completed(
    txn: &DatabaseTransaction,
    model: transaction::Model,
) -> Result<transaction::Model, ServiceError> {
    let mut active: transaction::ActiveModel = model.into();
    active.status = Set(TransactionStatus::Completed);
    Ok(active.update(txn).await?)
}
