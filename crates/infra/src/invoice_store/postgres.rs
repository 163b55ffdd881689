//! Postgres-backed invoice store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation on `invoices_number_unique`) | `23505` | `DuplicateNumber` | Same number inserted twice |
//! | Database (other unique violation) | `23505` | `Conflict` | Idempotency key or id race |
//! | Database (foreign key violation) | `23503` | `NotFound` | Unknown customer / invoice |
//! | Database (other) | Any other | `Database` | Check constraints, etc. |
//! | PoolClosed / Io / Tls / PoolTimedOut | N/A | `Database` | Connectivity |
//!
//! ## Concurrency
//!
//! Writers use `UPDATE invoices ... WHERE id = $1 AND version = $expected`. Under READ
//! COMMITTED the second of two concurrent writers blocks on the row lock, then re-checks
//! the predicate against the committed row and matches zero rows, which surfaces as
//! `StoreError::Conflict`.
//!
//! `create_invoice` bumps the year counter and inserts the invoice in one transaction.
//! Multi-statement reads run in one `REPEATABLE READ, READ ONLY` snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::{Span, field, instrument};
use uuid::Uuid;

use forgebill_core::{
    CustomerId, ExpectedVersion, IdempotencyKey, InvoiceId, LineItemId, Money, PaymentId,
};
use forgebill_invoicing::{
    Invoice, InvoiceNumber, InvoiceSnapshot, InvoiceStatus, LineItem, Payment,
};

use super::r#trait::{
    InvoiceBuilder, InvoiceFilter, InvoiceLedger, InvoiceListing, InvoiceStore, StoreError,
};

/// Open a connection pool.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))
}

/// Postgres-backed invoice store.
///
/// Uses the SQLx connection pool, which is `Send + Sync`. Every multi-statement write
/// runs in one transaction.
#[derive(Debug, Clone)]
pub struct PostgresInvoiceStore {
    pool: Arc<PgPool>,
}

impl PostgresInvoiceStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl InvoiceStore for PostgresInvoiceStore {
    #[instrument(skip(self, build), fields(number = field::Empty), err)]
    async fn create_invoice(
        &self,
        year: i32,
        build: InvoiceBuilder,
    ) -> Result<Invoice, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // The upsert's row lock is held until commit, so concurrent creates for the same
        // year queue here and an aborted create releases its increment.
        let last_value: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_number_counters (year, last_value)
            VALUES ($1, 1)
            ON CONFLICT (year)
            DO UPDATE SET last_value = invoice_number_counters.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(year)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("increment_counter", e))?;

        let sequence = u32::try_from(last_value)
            .map_err(|_| StoreError::Corrupt(format!("counter for {year} is {last_value}")))?;
        let number =
            InvoiceNumber::new(year, sequence).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Span::current().record("number", field::display(number));

        let invoice = build(number).map_err(StoreError::Rejected)?;
        if invoice.number() != number {
            return Err(StoreError::Corrupt(format!(
                "invoice {} built with {} instead of {number}",
                invoice.invoice_id(),
                invoice.number()
            )));
        }

        let snapshot = invoice.snapshot();
        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, customer_id, invoice_number, number_year, number_sequence, status,
                discount, total, due_date, issued_date, notes, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(snapshot.id.as_uuid())
        .bind(snapshot.customer_id.as_uuid())
        .bind(snapshot.number.to_string())
        .bind(snapshot.number.year())
        .bind(sequence_param(snapshot.number)?)
        .bind(snapshot.status.as_str())
        .bind(snapshot.discount.amount())
        .bind(snapshot.total.amount())
        .bind(snapshot.due_date)
        .bind(snapshot.issued_date)
        .bind(snapshot.notes.as_deref())
        .bind(version_param(snapshot.version)?)
        .bind(snapshot.created_at)
        .bind(snapshot.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_number_violation(&e) {
                StoreError::DuplicateNumber(snapshot.number.to_string())
            } else {
                map_sqlx_error("insert_invoice", e)
            }
        })?;

        insert_line_items(&mut tx, snapshot.id, &snapshot.line_items).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(invoice)
    }

    #[instrument(skip(self), fields(invoice_id = %id, payment_count = field::Empty), err)]
    async fn load_ledger(&self, id: InvoiceId) -> Result<Option<InvoiceLedger>, StoreError> {
        // One snapshot for header, line items and payments.
        let mut tx = begin_snapshot(&self.pool).await?;

        let Some(invoice) = fetch_invoice(&mut tx, id).await? else {
            return Ok(None);
        };
        let payments = fetch_payments(&mut tx, id).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("payment_count", payments.len());
        Ok(Some(InvoiceLedger { invoice, payments }))
    }

    #[instrument(
        skip(self, invoice),
        fields(invoice_id = %invoice.invoice_id(), expected = ?expected),
        err
    )]
    async fn save_invoice(
        &self,
        invoice: &Invoice,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let snapshot = invoice.snapshot();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        update_header(&mut tx, &snapshot, expected).await?;

        sqlx::query("DELETE FROM invoice_line_items WHERE invoice_id = $1")
            .bind(snapshot.id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_line_items", e))?;
        insert_line_items(&mut tx, snapshot.id, &snapshot.line_items).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, invoice, payment),
        fields(
            invoice_id = %invoice.invoice_id(),
            payment_id = %payment.id,
            amount = %payment.amount,
            expected = ?expected
        ),
        err
    )]
    async fn commit_payment(
        &self,
        invoice: &Invoice,
        payment: &Payment,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        if payment.invoice_id != invoice.invoice_id() {
            return Err(StoreError::Corrupt(format!(
                "payment {} targets invoice {}, not {}",
                payment.id,
                payment.invoice_id,
                invoice.invoice_id()
            )));
        }

        let snapshot = invoice.snapshot();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        update_header(&mut tx, &snapshot, expected).await?;

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, invoice_id, amount, method, payment_date, notes, idempotency_key, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.invoice_id.as_uuid())
        .bind(payment.amount.amount())
        .bind(payment.method.as_str())
        .bind(payment.payment_date)
        .bind(payment.notes.as_deref())
        .bind(payment.idempotency_key.as_uuid())
        .bind(payment.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!(
                    "idempotency key {} already used on invoice {}",
                    payment.idempotency_key, payment.invoice_id
                ))
            } else {
                map_sqlx_error("insert_payment", e)
            }
        })?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(listed = field::Empty), err)]
    async fn list_invoices(
        &self,
        filter: InvoiceFilter,
    ) -> Result<Vec<InvoiceListing>, StoreError> {
        // Headers and line items must come from the same snapshot, or a concurrent draft
        // edit would pair an old total with new lines.
        let mut tx = begin_snapshot(&self.pool).await?;

        let rows = sqlx::query(
            r#"
            SELECT
                i.id, i.customer_id, i.invoice_number, i.status, i.discount, i.total,
                i.due_date, i.issued_date, i.notes, i.version, i.created_at, i.updated_at,
                COALESCE(
                    (SELECT SUM(p.amount) FROM payments p WHERE p.invoice_id = i.id),
                    0
                ) AS amount_paid
            FROM invoices i
            WHERE ($1::TEXT IS NULL OR i.status = $1)
              AND ($2::UUID IS NULL OR i.customer_id = $2)
            ORDER BY i.number_year ASC, i.number_sequence ASC
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.customer_id.map(|c| *c.as_uuid()))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("list_invoices", e))?;

        let headers = rows
            .iter()
            .map(|row| {
                let header =
                    InvoiceRow::from_row(row).map_err(|e| map_sqlx_error("decode_invoice", e))?;
                let paid: Decimal = row
                    .try_get("amount_paid")
                    .map_err(|e| map_sqlx_error("decode_invoice", e))?;
                Ok((header, Money::from(paid)))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let ids: Vec<Uuid> = headers.iter().map(|(h, _)| h.id).collect();
        let item_rows = sqlx::query(
            r#"
            SELECT id, invoice_id, description, quantity, unit_price, amount
            FROM invoice_line_items
            WHERE invoice_id = ANY($1)
            ORDER BY invoice_id, position ASC
            "#,
        )
        .bind(ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("list_line_items", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let mut items_by_invoice: HashMap<Uuid, Vec<LineItem>> = HashMap::new();
        for row in &item_rows {
            let item = LineItemRow::from_row(row)
                .map_err(|e| map_sqlx_error("decode_line_item", e))?;
            items_by_invoice
                .entry(item.invoice_id)
                .or_default()
                .push(item.into_line_item());
        }

        let mut listings = Vec::with_capacity(headers.len());
        for (header, amount_paid) in headers {
            let items = items_by_invoice.remove(&header.id).unwrap_or_default();
            listings.push(InvoiceListing {
                invoice: header.into_invoice(items)?,
                amount_paid,
            });
        }

        Span::current().record("listed", listings.len());
        Ok(listings)
    }
}

/// Read-only transaction with one consistent snapshot for all of its statements.
async fn begin_snapshot(pool: &PgPool) -> Result<Transaction<'static, Postgres>, StoreError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| map_sqlx_error("begin_transaction", e))?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("set_isolation", e))?;
    Ok(tx)
}

async fn fetch_invoice(
    conn: &mut PgConnection,
    id: InvoiceId,
) -> Result<Option<Invoice>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            id, customer_id, invoice_number, status, discount, total,
            due_date, issued_date, notes, version, created_at, updated_at
        FROM invoices
        WHERE id = $1
        "#,
    )
    .bind(id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_invoice", e))?;

    let Some(row) = row else {
        return Ok(None);
    };
    let header = InvoiceRow::from_row(&row).map_err(|e| map_sqlx_error("decode_invoice", e))?;

    let item_rows = sqlx::query(
        r#"
        SELECT id, invoice_id, description, quantity, unit_price, amount
        FROM invoice_line_items
        WHERE invoice_id = $1
        ORDER BY position ASC
        "#,
    )
    .bind(id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_line_items", e))?;

    let items = item_rows
        .iter()
        .map(|row| {
            LineItemRow::from_row(row)
                .map(LineItemRow::into_line_item)
                .map_err(|e| map_sqlx_error("decode_line_item", e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    header.into_invoice(items).map(Some)
}

async fn fetch_payments(
    conn: &mut PgConnection,
    invoice_id: InvoiceId,
) -> Result<Vec<Payment>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, invoice_id, amount, method, payment_date, notes, idempotency_key, created_at
        FROM payments
        WHERE invoice_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(invoice_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_payments", e))?;

    rows.iter()
        .map(|row| {
            PaymentRow::from_row(row)
                .map_err(|e| map_sqlx_error("decode_payment", e))?
                .into_payment()
        })
        .collect()
}

/// Versioned header write shared by `save_invoice` and `commit_payment`.
async fn update_header(
    conn: &mut PgConnection,
    snapshot: &InvoiceSnapshot,
    expected: ExpectedVersion,
) -> Result<(), StoreError> {
    let expected_param = match expected {
        ExpectedVersion::Any => None,
        ExpectedVersion::Exact(v) => Some(version_param(v)?),
    };

    let result = sqlx::query(
        r#"
        UPDATE invoices
        SET status = $3,
            discount = $4,
            total = $5,
            due_date = $6,
            issued_date = $7,
            notes = $8,
            version = $9,
            updated_at = $10
        WHERE id = $1 AND ($2::BIGINT IS NULL OR version = $2)
        "#,
    )
    .bind(snapshot.id.as_uuid())
    .bind(expected_param)
    .bind(snapshot.status.as_str())
    .bind(snapshot.discount.amount())
    .bind(snapshot.total.amount())
    .bind(snapshot.due_date)
    .bind(snapshot.issued_date)
    .bind(snapshot.notes.as_deref())
    .bind(version_param(snapshot.version)?)
    .bind(snapshot.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("update_invoice", e))?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let current: Option<i64> = sqlx::query_scalar("SELECT version FROM invoices WHERE id = $1")
        .bind(snapshot.id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("read_version", e))?;

    match current {
        None => Err(StoreError::NotFound(format!("invoice {}", snapshot.id))),
        Some(found) => Err(StoreError::Conflict(format!(
            "invoice {} expected {expected:?}, found {found}",
            snapshot.number
        ))),
    }
}

async fn insert_line_items(
    conn: &mut PgConnection,
    invoice_id: InvoiceId,
    items: &[LineItem],
) -> Result<(), StoreError> {
    for (position, item) in items.iter().enumerate() {
        let position = i32::try_from(position)
            .map_err(|_| StoreError::Database("too many line items".to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO invoice_line_items (
                id, invoice_id, position, description, quantity, unit_price, amount
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(invoice_id.as_uuid())
        .bind(position)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(item.unit_price.amount())
        .bind(item.amount.amount())
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("insert_line_item", e))?;
    }
    Ok(())
}

fn version_param(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version)
        .map_err(|_| StoreError::Corrupt(format!("version {version} out of range")))
}

fn sequence_param(number: InvoiceNumber) -> Result<i32, StoreError> {
    i32::try_from(number.sequence())
        .map_err(|_| StoreError::Corrupt(format!("sequence of {number} out of range")))
}

/// Map SQLx errors to StoreError with operation context.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("row not found in {operation}")),
        other @ (sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)) => {
            StoreError::Corrupt(format!("decode failure in {operation}: {other}"))
        }
        other => StoreError::Database(format!("{operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

fn is_number_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return is_unique_violation(err)
            && matches!(
                db_err.constraint(),
                Some("invoices_number_unique" | "invoices_year_sequence_unique")
            );
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct InvoiceRow {
    id: Uuid,
    customer_id: Uuid,
    invoice_number: String,
    status: String,
    discount: Decimal,
    total: Decimal,
    due_date: Option<NaiveDate>,
    issued_date: Option<DateTime<Utc>>,
    notes: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for InvoiceRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(InvoiceRow {
            id: row.try_get("id")?,
            customer_id: row.try_get("customer_id")?,
            invoice_number: row.try_get("invoice_number")?,
            status: row.try_get("status")?,
            discount: row.try_get("discount")?,
            total: row.try_get("total")?,
            due_date: row.try_get("due_date")?,
            issued_date: row.try_get("issued_date")?,
            notes: row.try_get("notes")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl InvoiceRow {
    fn into_invoice(self, line_items: Vec<LineItem>) -> Result<Invoice, StoreError> {
        let id = self.id;
        let corrupt =
            move |e: forgebill_core::DomainError| StoreError::Corrupt(format!("invoice {id}: {e}"));
        let number: InvoiceNumber = self.invoice_number.parse().map_err(corrupt)?;
        let status: InvoiceStatus = self.status.parse().map_err(corrupt)?;
        let version = u64::try_from(self.version)
            .map_err(|_| StoreError::Corrupt(format!("invoice {id}: negative version")))?;

        Invoice::rehydrate(InvoiceSnapshot {
            id: InvoiceId::from_uuid(self.id),
            customer_id: CustomerId::from_uuid(self.customer_id),
            number,
            status,
            line_items,
            discount: Money::from(self.discount),
            total: Money::from(self.total),
            due_date: self.due_date,
            issued_date: self.issued_date,
            notes: self.notes,
            version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
        .map_err(corrupt)
    }
}

#[derive(Debug)]
struct LineItemRow {
    id: Uuid,
    invoice_id: Uuid,
    description: String,
    quantity: Decimal,
    unit_price: Decimal,
    amount: Decimal,
}

impl<'r> FromRow<'r, PgRow> for LineItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LineItemRow {
            id: row.try_get("id")?,
            invoice_id: row.try_get("invoice_id")?,
            description: row.try_get("description")?,
            quantity: row.try_get("quantity")?,
            unit_price: row.try_get("unit_price")?,
            amount: row.try_get("amount")?,
        })
    }
}

impl LineItemRow {
    fn into_line_item(self) -> LineItem {
        LineItem {
            id: LineItemId::from_uuid(self.id),
            description: self.description,
            quantity: self.quantity,
            unit_price: Money::from(self.unit_price),
            amount: Money::from(self.amount),
        }
    }
}

#[derive(Debug)]
struct PaymentRow {
    id: Uuid,
    invoice_id: Uuid,
    amount: Decimal,
    method: String,
    payment_date: NaiveDate,
    notes: Option<String>,
    idempotency_key: Uuid,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for PaymentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PaymentRow {
            id: row.try_get("id")?,
            invoice_id: row.try_get("invoice_id")?,
            amount: row.try_get("amount")?,
            method: row.try_get("method")?,
            payment_date: row.try_get("payment_date")?,
            notes: row.try_get("notes")?,
            idempotency_key: row.try_get("idempotency_key")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl PaymentRow {
    fn into_payment(self) -> Result<Payment, StoreError> {
        let method = self
            .method
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("payment {}: {e}", self.id)))?;
        Ok(Payment {
            id: PaymentId::from_uuid(self.id),
            invoice_id: InvoiceId::from_uuid(self.invoice_id),
            amount: Money::from(self.amount),
            method,
            payment_date: self.payment_date,
            notes: self.notes,
            idempotency_key: IdempotencyKey::from_uuid(self.idempotency_key),
            created_at: self.created_at,
        })
    }
}
