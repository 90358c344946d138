//! Postgres-backed ledger store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::models::{
    CollectorPayment, Movement, NewPayment, Payment, PriorPayment, ReceiptToken, TaxRate,
    Vehicle, VehicleRef,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{LedgerStore, UnitOfWork};

/// `lock_not_available` and `serialization_failure`.
const RETRYABLE_CODES: [&str; 2] = ["55P03", "40001"];

fn db_error(operation: &str, e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err
            .code()
            .is_some_and(|code| RETRYABLE_CODES.contains(&code.as_ref()))
        {
            warn!(operation, error = %db_err, "Lock not acquired");
            return AppError::DatabaseError(anyhow::anyhow!(
                "Lock not available during {}: {}",
                operation,
                db_err
            ));
        }
    }
    AppError::DatabaseError(anyhow::anyhow!("Failed to {}: {}", operation, e))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "collection-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        lock_timeout_ms: u64,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            lock_timeout_ms = lock_timeout_ms,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self {
            pool,
            lock_timeout_ms,
        })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for Database {
    type Tx = PgUnitOfWork;

    async fn begin(&self) -> Result<PgUnitOfWork, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        // SET does not take bind parameters; the value is a plain integer.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout_ms
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("set lock timeout", e))?;

        Ok(PgUnitOfWork { tx })
    }
}

/// One Postgres transaction. Dropped without commit, sqlx rolls it back.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PgUnitOfWork {
    async fn fetch_vehicle(
        &mut self,
        vehicle: &VehicleRef,
        for_update: bool,
    ) -> Result<Option<Vehicle>, AppError> {
        let operation = if for_update { "lock_vehicle" } else { "find_vehicle" };
        let timer = DB_QUERY_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let lock = if for_update { " FOR UPDATE" } else { "" };
        let result = match vehicle {
            VehicleRef::Id(id) => {
                sqlx::query_as::<_, Vehicle>(&format!(
                    "SELECT id, plate_number, owner_name, car_type_id FROM vehicles WHERE id = $1{}",
                    lock
                ))
                .bind(*id)
                .fetch_optional(&mut *self.tx)
                .await
            }
            VehicleRef::Plate(plate) => {
                sqlx::query_as::<_, Vehicle>(&format!(
                    "SELECT id, plate_number, owner_name, car_type_id FROM vehicles \
                     WHERE UPPER(TRIM(plate_number)) = $1 ORDER BY id LIMIT 1{}",
                    lock
                ))
                .bind(plate)
                .fetch_optional(&mut *self.tx)
                .await
            }
        }
        .map_err(|e| db_error(operation, e))?;

        timer.observe_duration();
        Ok(result)
    }

    async fn fetch_token(
        &mut self,
        operation: &'static str,
        sql: &'static str,
        key: TokenKey<'_>,
    ) -> Result<Option<ReceiptToken>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let query = sqlx::query_as::<_, ReceiptToken>(sql);
        let query = match key {
            TokenKey::Id(id) => query.bind(id),
            TokenKey::Reference(reference) => query.bind(reference),
        };
        let token = query
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error(operation, e))?;

        timer.observe_duration();
        Ok(token)
    }

    async fn fetch_payment(
        &mut self,
        operation: &'static str,
        sql: &'static str,
        payment_id: i64,
    ) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(sql)
            .bind(payment_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error(operation, e))?;

        timer.observe_duration();
        Ok(payment)
    }
}

enum TokenKey<'a> {
    Id(i64),
    Reference(&'a str),
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    #[instrument(skip(self, vehicle), fields(vehicle = %vehicle))]
    async fn find_vehicle(&mut self, vehicle: &VehicleRef) -> Result<Option<Vehicle>, AppError> {
        self.fetch_vehicle(vehicle, false).await
    }

    #[instrument(skip(self, vehicle), fields(vehicle = %vehicle))]
    async fn lock_vehicle(&mut self, vehicle: &VehicleRef) -> Result<Option<Vehicle>, AppError> {
        self.fetch_vehicle(vehicle, true).await
    }

    async fn find_movement(&mut self, movement_id: i64) -> Result<Option<Movement>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_movement"])
            .start_timer();

        let movement =
            sqlx::query_as::<_, Movement>("SELECT id, name FROM movements WHERE id = $1")
                .bind(movement_id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| db_error("find_movement", e))?;

        timer.observe_duration();
        Ok(movement)
    }

    async fn find_tax_rate(
        &mut self,
        car_type_id: i64,
        movement_id: i64,
    ) -> Result<Option<TaxRate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_tax_rate"])
            .start_timer();

        let rate = sqlx::query_as::<_, TaxRate>(
            r#"
            SELECT car_type_id, movement_id, amount
            FROM tax_rates
            WHERE car_type_id = $1 AND movement_id = $2
            "#,
        )
        .bind(car_type_id)
        .bind(movement_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("find_tax_rate", e))?;

        timer.observe_duration();
        Ok(rate)
    }

    #[instrument(skip(self))]
    async fn lock_token_by_reference(
        &mut self,
        reference_number: &str,
    ) -> Result<Option<ReceiptToken>, AppError> {
        self.fetch_token(
            "lock_token_by_reference",
            r#"
            SELECT id, reference_number, status, used_by, used_at, vehicle_id,
                   cancelled_reason, cancelled_by, cancelled_at
            FROM receipt_tokens
            WHERE reference_number = $1
            FOR UPDATE
            "#,
            TokenKey::Reference(reference_number),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn lock_token(&mut self, token_id: i64) -> Result<Option<ReceiptToken>, AppError> {
        self.fetch_token(
            "lock_token",
            r#"
            SELECT id, reference_number, status, used_by, used_at, vehicle_id,
                   cancelled_reason, cancelled_by, cancelled_at
            FROM receipt_tokens
            WHERE id = $1
            FOR UPDATE
            "#,
            TokenKey::Id(token_id),
        )
        .await
    }

    async fn find_token_by_reference(
        &mut self,
        reference_number: &str,
    ) -> Result<Option<ReceiptToken>, AppError> {
        self.fetch_token(
            "find_token_by_reference",
            r#"
            SELECT id, reference_number, status, used_by, used_at, vehicle_id,
                   cancelled_reason, cancelled_by, cancelled_at
            FROM receipt_tokens
            WHERE reference_number = $1
            "#,
            TokenKey::Reference(reference_number),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn insert_token(
        &mut self,
        reference_number: &str,
    ) -> Result<Option<ReceiptToken>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_token"])
            .start_timer();

        let token = sqlx::query_as::<_, ReceiptToken>(
            r#"
            INSERT INTO receipt_tokens (reference_number, status)
            VALUES ($1, 'available')
            ON CONFLICT (reference_number) DO NOTHING
            RETURNING id, reference_number, status, used_by, used_at, vehicle_id,
                      cancelled_reason, cancelled_by, cancelled_at
            "#,
        )
        .bind(reference_number)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("insert_token", e))?;

        timer.observe_duration();
        Ok(token)
    }

    #[instrument(skip(self, token), fields(token_id = token.id, status = %token.status))]
    async fn save_token(&mut self, token: &ReceiptToken) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["save_token"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE receipt_tokens
            SET status = $2, used_by = $3, used_at = $4, vehicle_id = $5,
                cancelled_reason = $6, cancelled_by = $7, cancelled_at = $8,
                updated_utc = NOW()
            WHERE id = $1
            "#,
        )
        .bind(token.id)
        .bind(token.status.as_str())
        .bind(&token.used_by)
        .bind(token.used_at)
        .bind(token.vehicle_id)
        .bind(&token.cancelled_reason)
        .bind(&token.cancelled_by)
        .bind(token.cancelled_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("save_token", e))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn prior_payments(
        &mut self,
        vehicle_id: i64,
        movement_id: i64,
        amount: Decimal,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriorPayment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["prior_payments"])
            .start_timer();

        let last_exact = sqlx::query_as::<_, PriorPayment>(
            r#"
            SELECT id AS payment_id, movement_id, amount, paid_at, is_reverted
            FROM payments
            WHERE vehicle_id = $1 AND movement_id = $2 AND amount = $3 AND NOT is_reverted
            ORDER BY paid_at DESC
            LIMIT 1
            "#,
        )
        .bind(vehicle_id)
        .bind(movement_id)
        .bind(amount)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("prior_payments", e))?;

        let mut recent = sqlx::query_as::<_, PriorPayment>(
            r#"
            SELECT id AS payment_id, movement_id, amount, paid_at, is_reverted
            FROM payments
            WHERE vehicle_id = $1 AND paid_at >= $2 AND NOT is_reverted
            ORDER BY paid_at DESC
            "#,
        )
        .bind(vehicle_id)
        .bind(since)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("prior_payments", e))?;

        timer.observe_duration();

        if let Some(last) = last_exact {
            if !recent.iter().any(|p| p.payment_id == last.payment_id) {
                recent.push(last);
            }
        }
        Ok(recent)
    }

    #[instrument(skip(self, payment), fields(vehicle_id = payment.vehicle_id, movement_id = payment.movement_id))]
    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<Payment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_payment"])
            .start_timer();

        let row = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (vehicle_id, movement_id, movement_label, amount, paid_at,
                                  collector_id, receipt_token_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, vehicle_id, movement_id, movement_label, amount, paid_at, collector_id,
                      receipt_token_id, is_reverted, revert_reason, reverted_at, reverted_by_id
            "#,
        )
        .bind(payment.vehicle_id)
        .bind(payment.movement_id)
        .bind(&payment.movement_label)
        .bind(payment.amount)
        .bind(payment.paid_at)
        .bind(payment.collector_id)
        .bind(payment.receipt_token_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_error("insert_payment", e))?;

        timer.observe_duration();
        Ok(row)
    }

    async fn find_payment(&mut self, payment_id: i64) -> Result<Option<Payment>, AppError> {
        self.fetch_payment(
            "find_payment",
            r#"
            SELECT id, vehicle_id, movement_id, movement_label, amount, paid_at, collector_id,
                   receipt_token_id, is_reverted, revert_reason, reverted_at, reverted_by_id
            FROM payments
            WHERE id = $1
            "#,
            payment_id,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn lock_payment(&mut self, payment_id: i64) -> Result<Option<Payment>, AppError> {
        self.fetch_payment(
            "lock_payment",
            r#"
            SELECT id, vehicle_id, movement_id, movement_label, amount, paid_at, collector_id,
                   receipt_token_id, is_reverted, revert_reason, reverted_at, reverted_by_id
            FROM payments
            WHERE id = $1
            FOR UPDATE
            "#,
            payment_id,
        )
        .await
    }

    #[instrument(skip(self, payment), fields(payment_id = payment.id))]
    async fn save_payment_revert(&mut self, payment: &Payment) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["save_payment_revert"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE payments
            SET is_reverted = $2, revert_reason = $3, reverted_at = $4, reverted_by_id = $5
            WHERE id = $1
            "#,
        )
        .bind(payment.id)
        .bind(payment.is_reverted)
        .bind(&payment.revert_reason)
        .bind(payment.reverted_at)
        .bind(payment.reverted_by_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("save_payment_revert", e))?;

        timer.observe_duration();
        Ok(())
    }

    async fn payments_for_vehicle(&mut self, vehicle_id: i64) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["payments_for_vehicle"])
            .start_timer();

        let rows = sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, vehicle_id, movement_id, movement_label, amount, paid_at, collector_id,
                   receipt_token_id, is_reverted, revert_reason, reverted_at, reverted_by_id
            FROM payments
            WHERE vehicle_id = $1
            ORDER BY paid_at DESC, id DESC
            "#,
        )
        .bind(vehicle_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("payments_for_vehicle", e))?;

        timer.observe_duration();
        Ok(rows)
    }

    async fn payments_by_collector(
        &mut self,
        collector_id: i64,
    ) -> Result<Vec<CollectorPayment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["payments_by_collector"])
            .start_timer();

        let rows = sqlx::query_as::<_, CollectorPayment>(
            r#"
            SELECT p.id, p.vehicle_id, p.movement_id, p.movement_label, p.amount, p.paid_at,
                   p.collector_id, p.receipt_token_id, p.is_reverted, p.revert_reason,
                   p.reverted_at, p.reverted_by_id,
                   v.plate_number, v.owner_name,
                   t.reference_number, t.used_by AS collector_name
            FROM payments p
            JOIN vehicles v ON v.id = p.vehicle_id
            LEFT JOIN receipt_tokens t ON t.id = p.receipt_token_id
            WHERE p.collector_id = $1 AND NOT p.is_reverted
            ORDER BY p.paid_at DESC, p.id DESC
            "#,
        )
        .bind(collector_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("payments_by_collector", e))?;

        timer.observe_duration();
        Ok(rows)
    }

    async fn totals(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(i64, Decimal), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["totals"])
            .start_timer();

        let totals = sqlx::query_as::<_, (i64, Decimal)>(
            r#"
            SELECT COUNT(*), COALESCE(SUM(amount), 0)
            FROM payments
            WHERE paid_at >= $1 AND paid_at < $2 AND NOT is_reverted
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_error("totals", e))?;

        timer.observe_duration();
        Ok(totals)
    }

    async fn commit(self) -> Result<(), AppError> {
        self.tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })
    }

    async fn rollback(self) -> Result<(), AppError> {
        self.tx.rollback().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to roll back transaction: {}", e))
        })
    }
}
