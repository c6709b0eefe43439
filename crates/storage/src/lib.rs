use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::{
    migrate::MigrateError, sqlite::SqlitePoolOptions, Row, Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;

use venbill_core::types::{
    BillingNote, DocumentStatus, Job, PaymentVoucher, PendingCounts, Receipt, Role, User, Vendor,
};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Begins a transaction for multi-statement writes.
    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Returns a handle for interacting with vendors.
    pub fn vendors(&self) -> VendorRepository {
        VendorRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for interacting with user accounts.
    pub fn users(&self) -> UserRepository {
        UserRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for interacting with submitted jobs.
    pub fn jobs(&self) -> JobRepository {
        JobRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle to operate on billing notes.
    pub fn billing_notes(&self) -> BillingNoteRepository {
        BillingNoteRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle to operate on receipts.
    pub fn receipts(&self) -> ReceiptRepository {
        ReceiptRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle to operate on payment vouchers.
    pub fn payment_vouchers(&self) -> PaymentVoucherRepository {
        PaymentVoucherRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Raised when a persisted value cannot be decoded into its domain type.
#[derive(Debug, Error)]
#[error("corrupt {column} value: {value:?}")]
pub struct CorruptColumn {
    pub column: &'static str,
    pub value: String,
}

fn parse_decimal(column: &'static str, raw: &str) -> Result<Decimal, CorruptColumn> {
    Decimal::from_str(raw).map_err(|_| CorruptColumn {
        column,
        value: raw.to_string(),
    })
}

fn parse_status(raw: &str) -> Result<DocumentStatus, CorruptColumn> {
    DocumentStatus::from_str(raw).map_err(|_| CorruptColumn {
        column: "status",
        value: raw.to_string(),
    })
}

fn parse_role(raw: &str) -> Result<Role, CorruptColumn> {
    Role::from_str(raw).map_err(|_| CorruptColumn {
        column: "role",
        value: raw.to_string(),
    })
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Canonical persisted form for derived monetary values: two fixed
/// fractional digits.
fn money_text(value: Decimal) -> String {
    format!("{value:.2}")
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

const SQLITE_UNIQUE_VIOLATION: &str = "2067";
const SQLITE_FK_VIOLATION: &str = "787";

/// Repository used to query vendor records and live pending counts.
#[derive(Clone)]
pub struct VendorRepository {
    pool: SqlitePool,
}

impl VendorRepository {
    /// Inserts a new vendor.
    pub async fn insert(&self, record: &NewVendor<'_>) -> Result<(), VendorError> {
        sqlx::query(
            "INSERT INTO vendors \
             (id, company_name, tax_id, vat_rate_text, vat_inclusive, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(record.company_name)
        .bind(record.tax_id)
        .bind(&record.vat_rate_text)
        .bind(if record.vat_inclusive { 1 } else { 0 })
        .bind(to_rfc3339(record.created_at))
        .bind(to_rfc3339(record.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetches a single vendor by id.
    pub async fn fetch(&self, id: &str) -> Result<Option<Vendor>, VendorError> {
        let row = sqlx::query_as::<_, VendorRow>(
            "SELECT id, company_name, tax_id, vat_rate_text, vat_inclusive, created_at, updated_at \
             FROM vendors WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(VendorRow::into_domain))
    }

    /// Lists every vendor ordered by company name.
    pub async fn list(&self) -> Result<Vec<Vendor>, VendorError> {
        let rows = sqlx::query_as::<_, VendorRow>(
            "SELECT id, company_name, tax_id, vat_rate_text, vat_inclusive, created_at, updated_at \
             FROM vendors ORDER BY company_name, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(VendorRow::into_domain).collect())
    }

    /// Live counts of PENDING billing notes and receipts for a vendor.
    ///
    /// Always computed from the document tables so the values can never
    /// drift from the state machine.
    pub async fn pending_counts(&self, vendor_id: &str) -> Result<PendingCounts, VendorError> {
        let row = sqlx::query(
            "SELECT \
               (SELECT COUNT(*) FROM billing_notes WHERE vendor_id = ? AND status = 'PENDING') AS pending_billing, \
               (SELECT COUNT(*) FROM receipts WHERE vendor_id = ? AND status = 'PENDING') AS pending_receipts",
        )
        .bind(vendor_id)
        .bind(vendor_id)
        .fetch_one(&self.pool)
        .await?;

        let billing: i64 = row.get("pending_billing");
        let receipts: i64 = row.get("pending_receipts");
        Ok(PendingCounts {
            pending_billing_count: billing as u32,
            pending_receipt_count: receipts as u32,
        })
    }
}

/// Parameters required to insert a vendor.
pub struct NewVendor<'a> {
    pub id: String,
    pub company_name: &'a str,
    pub tax_id: &'a str,
    pub vat_rate_text: Option<String>,
    pub vat_inclusive: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct VendorRow {
    id: String,
    company_name: String,
    tax_id: String,
    vat_rate_text: Option<String>,
    vat_inclusive: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl VendorRow {
    fn into_domain(self) -> Vendor {
        Vendor {
            id: self.id,
            company_name: self.company_name,
            tax_id: self.tax_id,
            vat_rate_text: self.vat_rate_text,
            vat_inclusive: self.vat_inclusive != 0,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Errors that can occur while reading or writing vendors.
#[derive(Debug, Error)]
pub enum VendorError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository used to manage user accounts.
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Inserts a new user account.
    pub async fn insert(&self, record: &NewUser<'_>) -> Result<(), UserError> {
        let result = sqlx::query(
            "INSERT INTO users \
             (id, email, name, password_hash, role, vendor_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(record.email)
        .bind(record.name)
        .bind(record.password_hash)
        .bind(record.role.as_str())
        .bind(&record.vendor_id)
        .bind(to_rfc3339(record.created_at))
        .bind(to_rfc3339(record.updated_at))
        .execute(&self.pool)
        .await;

        map_user_write(result)
    }

    /// Fetches a user by id.
    pub async fn fetch(&self, id: &str) -> Result<Option<User>, UserError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, password_hash, role, vendor_id, created_at, updated_at \
             FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRow::into_domain).transpose()
    }

    /// Fetches a user by email for authentication.
    pub async fn fetch_by_email(&self, email: &str) -> Result<Option<User>, UserError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, password_hash, role, vendor_id, created_at, updated_at \
             FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRow::into_domain).transpose()
    }

    /// Lists every user account.
    pub async fn list_all(&self) -> Result<Vec<User>, UserError> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, password_hash, role, vendor_id, created_at, updated_at \
             FROM users ORDER BY email",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UserRow::into_domain).collect()
    }

    /// Lists the users attached to a vendor.
    pub async fn list_for_vendor(&self, vendor_id: &str) -> Result<Vec<User>, UserError> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, password_hash, role, vendor_id, created_at, updated_at \
             FROM users WHERE vendor_id = ? ORDER BY email",
        )
        .bind(vendor_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UserRow::into_domain).collect()
    }

    /// Writes the full mutable state of a user row.
    pub async fn update(&self, record: &UserUpdate<'_>) -> Result<(), UserError> {
        let result = sqlx::query(
            "UPDATE users \
             SET email = ?, name = ?, password_hash = ?, role = ?, vendor_id = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(record.email)
        .bind(record.name)
        .bind(record.password_hash)
        .bind(record.role.as_str())
        .bind(&record.vendor_id)
        .bind(to_rfc3339(record.updated_at))
        .bind(record.id)
        .execute(&self.pool)
        .await;

        map_user_write(result)
    }

    /// Deletes a user row, returning whether a row was removed.
    ///
    /// The ADMIN-protection rule is enforced by the caller before this is
    /// reached; the repository performs the plain delete.
    pub async fn delete(&self, id: &str) -> Result<bool, UserError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Total number of user accounts.
    pub async fn count(&self) -> Result<u64, UserError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as u64)
    }
}

fn map_user_write(
    result: Result<sqlx::sqlite::SqliteQueryResult, sqlx::Error>,
) -> Result<(), UserError> {
    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) => match db_err.code().as_deref() {
            Some(SQLITE_UNIQUE_VIOLATION) => Err(UserError::DuplicateEmail),
            Some(SQLITE_FK_VIOLATION) => Err(UserError::MissingVendor),
            _ => Err(UserError::Database(sqlx::Error::Database(db_err))),
        },
        Err(err) => Err(UserError::Database(err)),
    }
}

/// Parameters required to insert a user.
pub struct NewUser<'a> {
    pub id: String,
    pub email: &'a str,
    pub name: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
    pub vendor_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full mutable state written by [`UserRepository::update`].
pub struct UserUpdate<'a> {
    pub id: &'a str,
    pub email: &'a str,
    pub name: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
    pub vendor_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    name: String,
    password_hash: String,
    role: String,
    vendor_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_domain(self) -> Result<User, UserError> {
        let role = parse_role(&self.role)?;
        Ok(User {
            id: self.id,
            email: self.email,
            name: self.name,
            password_hash: self.password_hash,
            role,
            vendor_id: self.vendor_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Errors that can occur while reading or writing users.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("a user with the same email already exists")]
    DuplicateEmail,
    #[error("referenced vendor does not exist")]
    MissingVendor,
    #[error("corrupt row: {0}")]
    Corrupt(#[from] CorruptColumn),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for vendor-submitted jobs.
#[derive(Clone)]
pub struct JobRepository {
    pool: SqlitePool,
}

impl JobRepository {
    /// Inserts a new job.
    pub async fn insert(&self, record: &NewJob<'_>) -> Result<(), JobError> {
        let result = sqlx::query(
            "INSERT INTO jobs (id, vendor_id, title, amount, submitted_by, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(record.vendor_id)
        .bind(record.title)
        .bind(record.amount.to_string())
        .bind(record.submitted_by)
        .bind(to_rfc3339(record.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(SQLITE_FK_VIOLATION) =>
            {
                Err(JobError::MissingReference)
            }
            Err(err) => Err(JobError::Database(err)),
        }
    }

    /// Fetches the jobs with the provided ids, in id order.
    pub async fn fetch_many(&self, ids: &[String]) -> Result<Vec<Job>, JobError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, vendor_id, title, amount, submitted_by, created_at \
             FROM jobs WHERE id IN ({}) ORDER BY id",
            placeholders(ids.len())
        );
        let mut query = sqlx::query_as::<_, JobRow>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(JobRow::into_domain).collect()
    }

    /// Lists the jobs submitted by a vendor, newest first.
    pub async fn list_for_vendor(&self, vendor_id: &str) -> Result<Vec<Job>, JobError> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT id, vendor_id, title, amount, submitted_by, created_at \
             FROM jobs WHERE vendor_id = ? ORDER BY created_at DESC, id",
        )
        .bind(vendor_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(JobRow::into_domain).collect()
    }

    /// Lists every job, newest first.
    pub async fn list_all(&self) -> Result<Vec<Job>, JobError> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT id, vendor_id, title, amount, submitted_by, created_at \
             FROM jobs ORDER BY created_at DESC, id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(JobRow::into_domain).collect()
    }
}

/// Parameters required to insert a job.
pub struct NewJob<'a> {
    pub id: String,
    pub vendor_id: &'a str,
    pub title: &'a str,
    pub amount: Decimal,
    pub submitted_by: &'a str,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    vendor_id: String,
    title: String,
    amount: String,
    submitted_by: String,
    created_at: DateTime<Utc>,
}

impl JobRow {
    fn into_domain(self) -> Result<Job, JobError> {
        let amount = parse_decimal("amount", &self.amount)?;
        Ok(Job {
            id: self.id,
            vendor_id: self.vendor_id,
            title: self.title,
            amount,
            submitted_by: self.submitted_by,
            created_at: self.created_at,
        })
    }
}

/// Errors that can occur while reading or writing jobs.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("referenced vendor or user does not exist")]
    MissingReference,
    #[error("corrupt row: {0}")]
    Corrupt(#[from] CorruptColumn),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for billing notes.
#[derive(Clone)]
pub struct BillingNoteRepository {
    pool: SqlitePool,
}

impl BillingNoteRepository {
    /// Inserts a billing note together with its job links.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &NewBillingNote<'_>,
    ) -> Result<(), BillingNoteError> {
        let result = sqlx::query(
            "INSERT INTO billing_notes \
             (id, billing_ref, vendor_id, subtotal, vat_rate_text, price_before_vat, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(record.billing_ref)
        .bind(record.vendor_id)
        .bind(record.subtotal.to_string())
        .bind(record.vat_rate_text)
        .bind(record.price_before_vat.map(money_text))
        .bind(record.status.as_str())
        .bind(to_rfc3339(record.created_at))
        .bind(to_rfc3339(record.updated_at))
        .execute(&mut **tx)
        .await;

        map_document_write(result)?;

        for job_id in record.job_ids {
            sqlx::query("INSERT INTO billing_note_jobs (billing_note_id, job_id) VALUES (?, ?)")
                .bind(&record.id)
                .bind(job_id)
                .execute(&mut **tx)
                .await
                .map_err(map_link_error)?;
        }

        Ok(())
    }

    /// Fetches a billing note with its job references.
    pub async fn fetch(&self, id: &str) -> Result<Option<BillingNote>, BillingNoteError> {
        let row = sqlx::query_as::<_, BillingNoteRow>(
            "SELECT id, billing_ref, vendor_id, subtotal, vat_rate_text, price_before_vat, status, created_at, updated_at \
             FROM billing_notes WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let job_ids = self.job_ids_for(id).await?;
        Ok(Some(row.into_domain(job_ids)?))
    }

    /// Lists every billing note, newest first.
    pub async fn list_all(&self) -> Result<Vec<BillingNote>, BillingNoteError> {
        let rows = sqlx::query_as::<_, BillingNoteRow>(
            "SELECT id, billing_ref, vendor_id, subtotal, vat_rate_text, price_before_vat, status, created_at, updated_at \
             FROM billing_notes ORDER BY created_at DESC, id",
        )
        .fetch_all(&self.pool)
        .await?;
        self.attach_job_ids(rows).await
    }

    /// Lists the billing notes of a vendor, newest first.
    pub async fn list_for_vendor(
        &self,
        vendor_id: &str,
    ) -> Result<Vec<BillingNote>, BillingNoteError> {
        let rows = sqlx::query_as::<_, BillingNoteRow>(
            "SELECT id, billing_ref, vendor_id, subtotal, vat_rate_text, price_before_vat, status, created_at, updated_at \
             FROM billing_notes WHERE vendor_id = ? ORDER BY created_at DESC, id",
        )
        .bind(vendor_id)
        .fetch_all(&self.pool)
        .await?;
        self.attach_job_ids(rows).await
    }

    /// Owner and status of the provided billing notes, used to validate
    /// receipt creation.
    pub async fn fetch_states(
        &self,
        ids: &[String],
    ) -> Result<Vec<DocumentState>, BillingNoteError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, vendor_id, status FROM billing_notes WHERE id IN ({}) ORDER BY id",
            placeholders(ids.len())
        );
        let mut query = sqlx::query_as::<_, DocumentStateRow>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| row.into_domain().map_err(BillingNoteError::from))
            .collect()
    }

    /// Applies a validated status transition as an atomic compare-and-set.
    ///
    /// The row is only written when its current status still matches the
    /// status the transition was validated against, so two racing reviews
    /// cannot both succeed.
    pub async fn update_status(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
        expected: DocumentStatus,
        next: DocumentStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), BillingNoteError> {
        let result = sqlx::query(
            "UPDATE billing_notes SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(to_rfc3339(updated_at))
        .bind(id)
        .bind(expected.as_str())
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingNoteError::StatusConflict);
        }
        Ok(())
    }

    /// Billing notes whose derived price has not been computed yet, in
    /// insertion order starting after the provided rowid cursor.
    pub async fn list_unpriced(
        &self,
        after_rowid: i64,
        limit: u32,
    ) -> Result<Vec<UnpricedBillingNote>, BillingNoteError> {
        let rows = sqlx::query_as::<_, UnpricedBillingNote>(
            "SELECT b.rowid AS rowid, b.id, b.vendor_id, b.subtotal, b.vat_rate_text, v.vat_inclusive \
               FROM billing_notes AS b \
               JOIN vendors AS v ON v.id = b.vendor_id \
              WHERE b.price_before_vat IS NULL AND b.rowid > ? \
              ORDER BY b.rowid \
              LIMIT ?",
        )
        .bind(after_rowid)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Persists a derived price, guarding against overwriting a value that
    /// is already set. Safe to re-run and to race with normal traffic.
    pub async fn set_price_before_vat(
        &self,
        id: &str,
        price: Decimal,
        updated_at: DateTime<Utc>,
    ) -> Result<PriceWriteOutcome, BillingNoteError> {
        let result = sqlx::query(
            "UPDATE billing_notes SET price_before_vat = ?, updated_at = ? \
             WHERE id = ? AND price_before_vat IS NULL",
        )
        .bind(money_text(price))
        .bind(to_rfc3339(updated_at))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(PriceWriteOutcome::AlreadySet)
        } else {
            Ok(PriceWriteOutcome::Updated)
        }
    }

    async fn job_ids_for(&self, billing_note_id: &str) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT job_id FROM billing_note_jobs WHERE billing_note_id = ? ORDER BY job_id",
        )
        .bind(billing_note_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| row.get("job_id")).collect())
    }

    async fn attach_job_ids(
        &self,
        rows: Vec<BillingNoteRow>,
    ) -> Result<Vec<BillingNote>, BillingNoteError> {
        let mut notes = Vec::with_capacity(rows.len());
        for row in rows {
            let job_ids = self.job_ids_for(&row.id).await?;
            notes.push(row.into_domain(job_ids)?);
        }
        Ok(notes)
    }
}

/// Outcome of attempting to persist a derived price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceWriteOutcome {
    Updated,
    AlreadySet,
}

/// Parameters required to insert a billing note.
pub struct NewBillingNote<'a> {
    pub id: String,
    pub billing_ref: &'a str,
    pub vendor_id: &'a str,
    pub job_ids: &'a [String],
    pub subtotal: Decimal,
    pub vat_rate_text: Option<&'a str>,
    pub price_before_vat: Option<Decimal>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct BillingNoteRow {
    id: String,
    billing_ref: String,
    vendor_id: String,
    subtotal: String,
    vat_rate_text: Option<String>,
    price_before_vat: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BillingNoteRow {
    fn into_domain(self, job_ids: Vec<String>) -> Result<BillingNote, BillingNoteError> {
        let subtotal = parse_decimal("subtotal", &self.subtotal)?;
        let price_before_vat = self
            .price_before_vat
            .as_deref()
            .map(|raw| parse_decimal("price_before_vat", raw))
            .transpose()?;
        let status = parse_status(&self.status)?;
        Ok(BillingNote {
            id: self.id,
            billing_ref: self.billing_ref,
            vendor_id: self.vendor_id,
            job_ids,
            subtotal,
            vat_rate_text: self.vat_rate_text,
            price_before_vat,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Billing note row awaiting price derivation, joined with the owning
/// vendor's VAT configuration.
#[derive(Debug, sqlx::FromRow)]
pub struct UnpricedBillingNote {
    pub rowid: i64,
    pub id: String,
    pub vendor_id: String,
    pub subtotal: String,
    pub vat_rate_text: Option<String>,
    pub vat_inclusive: i64,
}

/// Owner and lifecycle status of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentState {
    pub id: String,
    pub vendor_id: String,
    pub status: DocumentStatus,
}

#[derive(Debug, sqlx::FromRow)]
struct DocumentStateRow {
    id: String,
    vendor_id: String,
    status: String,
}

impl DocumentStateRow {
    fn into_domain(self) -> Result<DocumentState, CorruptColumn> {
        let status = parse_status(&self.status)?;
        Ok(DocumentState {
            id: self.id,
            vendor_id: self.vendor_id,
            status,
        })
    }
}

/// Errors that can occur while reading or writing billing notes.
#[derive(Debug, Error)]
pub enum BillingNoteError {
    #[error("a document with the same reference already exists")]
    DuplicateRef,
    #[error("referenced vendor or job does not exist")]
    MissingReference,
    #[error("document status changed concurrently")]
    StatusConflict,
    #[error("corrupt row: {0}")]
    Corrupt(#[from] CorruptColumn),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn map_document_write(
    result: Result<sqlx::sqlite::SqliteQueryResult, sqlx::Error>,
) -> Result<(), BillingNoteError> {
    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) => match db_err.code().as_deref() {
            Some(SQLITE_UNIQUE_VIOLATION) => Err(BillingNoteError::DuplicateRef),
            Some(SQLITE_FK_VIOLATION) => Err(BillingNoteError::MissingReference),
            _ => Err(BillingNoteError::Database(sqlx::Error::Database(db_err))),
        },
        Err(err) => Err(BillingNoteError::Database(err)),
    }
}

fn map_link_error(err: sqlx::Error) -> BillingNoteError {
    match err {
        sqlx::Error::Database(db_err)
            if db_err.code().as_deref() == Some(SQLITE_FK_VIOLATION) =>
        {
            BillingNoteError::MissingReference
        }
        other => BillingNoteError::Database(other),
    }
}

/// Repository for receipts.
#[derive(Clone)]
pub struct ReceiptRepository {
    pool: SqlitePool,
}

impl ReceiptRepository {
    /// Inserts a receipt together with its billing note links.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &NewReceipt<'_>,
    ) -> Result<(), ReceiptError> {
        let result = sqlx::query(
            "INSERT INTO receipts (id, receipt_ref, vendor_id, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(record.receipt_ref)
        .bind(record.vendor_id)
        .bind(record.status.as_str())
        .bind(to_rfc3339(record.created_at))
        .bind(to_rfc3339(record.updated_at))
        .execute(&mut **tx)
        .await;

        map_receipt_write(result)?;

        for billing_note_id in record.billing_note_ids {
            sqlx::query(
                "INSERT INTO receipt_billing_notes (receipt_id, billing_note_id) VALUES (?, ?)",
            )
            .bind(&record.id)
            .bind(billing_note_id)
            .execute(&mut **tx)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db_err)
                    if db_err.code().as_deref() == Some(SQLITE_FK_VIOLATION) =>
                {
                    ReceiptError::MissingReference
                }
                other => ReceiptError::Database(other),
            })?;
        }

        Ok(())
    }

    /// Fetches a receipt with its billing note references.
    pub async fn fetch(&self, id: &str) -> Result<Option<Receipt>, ReceiptError> {
        let row = sqlx::query_as::<_, ReceiptRow>(
            "SELECT id, receipt_ref, vendor_id, status, created_at, updated_at \
             FROM receipts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let billing_note_ids = self.billing_note_ids_for(id).await?;
        Ok(Some(row.into_domain(billing_note_ids)?))
    }

    /// Lists every receipt, newest first.
    pub async fn list_all(&self) -> Result<Vec<Receipt>, ReceiptError> {
        let rows = sqlx::query_as::<_, ReceiptRow>(
            "SELECT id, receipt_ref, vendor_id, status, created_at, updated_at \
             FROM receipts ORDER BY created_at DESC, id",
        )
        .fetch_all(&self.pool)
        .await?;
        self.attach_billing_note_ids(rows).await
    }

    /// Lists the receipts of a vendor, newest first.
    pub async fn list_for_vendor(&self, vendor_id: &str) -> Result<Vec<Receipt>, ReceiptError> {
        let rows = sqlx::query_as::<_, ReceiptRow>(
            "SELECT id, receipt_ref, vendor_id, status, created_at, updated_at \
             FROM receipts WHERE vendor_id = ? ORDER BY created_at DESC, id",
        )
        .bind(vendor_id)
        .fetch_all(&self.pool)
        .await?;
        self.attach_billing_note_ids(rows).await
    }

    /// Owner and status of the provided receipts, used to validate
    /// payment voucher creation.
    pub async fn fetch_states(&self, ids: &[String]) -> Result<Vec<DocumentState>, ReceiptError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, vendor_id, status FROM receipts WHERE id IN ({}) ORDER BY id",
            placeholders(ids.len())
        );
        let mut query = sqlx::query_as::<_, DocumentStateRow>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| row.into_domain().map_err(ReceiptError::from))
            .collect()
    }

    /// Applies a validated status transition as an atomic compare-and-set.
    pub async fn update_status(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
        expected: DocumentStatus,
        next: DocumentStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), ReceiptError> {
        let result = sqlx::query(
            "UPDATE receipts SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(to_rfc3339(updated_at))
        .bind(id)
        .bind(expected.as_str())
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ReceiptError::StatusConflict);
        }
        Ok(())
    }

    async fn billing_note_ids_for(&self, receipt_id: &str) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT billing_note_id FROM receipt_billing_notes WHERE receipt_id = ? \
             ORDER BY billing_note_id",
        )
        .bind(receipt_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.get("billing_note_id"))
            .collect())
    }

    async fn attach_billing_note_ids(
        &self,
        rows: Vec<ReceiptRow>,
    ) -> Result<Vec<Receipt>, ReceiptError> {
        let mut receipts = Vec::with_capacity(rows.len());
        for row in rows {
            let billing_note_ids = self.billing_note_ids_for(&row.id).await?;
            receipts.push(row.into_domain(billing_note_ids)?);
        }
        Ok(receipts)
    }
}

fn map_receipt_write(
    result: Result<sqlx::sqlite::SqliteQueryResult, sqlx::Error>,
) -> Result<(), ReceiptError> {
    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) => match db_err.code().as_deref() {
            Some(SQLITE_UNIQUE_VIOLATION) => Err(ReceiptError::DuplicateRef),
            Some(SQLITE_FK_VIOLATION) => Err(ReceiptError::MissingReference),
            _ => Err(ReceiptError::Database(sqlx::Error::Database(db_err))),
        },
        Err(err) => Err(ReceiptError::Database(err)),
    }
}

/// Parameters required to insert a receipt.
pub struct NewReceipt<'a> {
    pub id: String,
    pub receipt_ref: &'a str,
    pub vendor_id: &'a str,
    pub billing_note_ids: &'a [String],
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ReceiptRow {
    id: String,
    receipt_ref: String,
    vendor_id: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ReceiptRow {
    fn into_domain(self, billing_note_ids: Vec<String>) -> Result<Receipt, ReceiptError> {
        let status = parse_status(&self.status)?;
        Ok(Receipt {
            id: self.id,
            receipt_ref: self.receipt_ref,
            vendor_id: self.vendor_id,
            billing_note_ids,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Errors that can occur while reading or writing receipts.
#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("a document with the same reference already exists")]
    DuplicateRef,
    #[error("referenced vendor or billing note does not exist")]
    MissingReference,
    #[error("document status changed concurrently")]
    StatusConflict,
    #[error("corrupt row: {0}")]
    Corrupt(#[from] CorruptColumn),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for payment vouchers. Vouchers are append-only settlement
/// records; there is no update or delete surface.
#[derive(Clone)]
pub struct PaymentVoucherRepository {
    pool: SqlitePool,
}

impl PaymentVoucherRepository {
    /// Inserts a payment voucher together with its receipt links. The
    /// referenced receipts are never touched.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &NewPaymentVoucher<'_>,
    ) -> Result<(), PaymentVoucherError> {
        let result = sqlx::query(
            "INSERT INTO payment_vouchers (id, voucher_ref, issued_by, issued_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(record.voucher_ref)
        .bind(record.issued_by)
        .bind(to_rfc3339(record.issued_at))
        .execute(&mut **tx)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) => match db_err.code().as_deref() {
                Some(SQLITE_UNIQUE_VIOLATION) => return Err(PaymentVoucherError::DuplicateRef),
                Some(SQLITE_FK_VIOLATION) => return Err(PaymentVoucherError::MissingReference),
                _ => {
                    return Err(PaymentVoucherError::Database(sqlx::Error::Database(db_err)));
                }
            },
            Err(err) => return Err(PaymentVoucherError::Database(err)),
        }

        for receipt_id in record.receipt_ids {
            sqlx::query(
                "INSERT INTO payment_voucher_receipts (voucher_id, receipt_id) VALUES (?, ?)",
            )
            .bind(&record.id)
            .bind(receipt_id)
            .execute(&mut **tx)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db_err)
                    if db_err.code().as_deref() == Some(SQLITE_FK_VIOLATION) =>
                {
                    PaymentVoucherError::MissingReference
                }
                other => PaymentVoucherError::Database(other),
            })?;
        }

        Ok(())
    }

    /// Fetches a payment voucher with its receipt references.
    pub async fn fetch(&self, id: &str) -> Result<Option<PaymentVoucher>, PaymentVoucherError> {
        let row = sqlx::query_as::<_, PaymentVoucherRow>(
            "SELECT id, voucher_ref, issued_by, issued_at FROM payment_vouchers WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let receipt_ids = self.receipt_ids_for(id).await?;
        Ok(Some(row.into_domain(receipt_ids)))
    }

    /// Lists every payment voucher, newest first.
    pub async fn list(&self) -> Result<Vec<PaymentVoucher>, PaymentVoucherError> {
        let rows = sqlx::query_as::<_, PaymentVoucherRow>(
            "SELECT id, voucher_ref, issued_by, issued_at \
             FROM payment_vouchers ORDER BY issued_at DESC, id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut vouchers = Vec::with_capacity(rows.len());
        for row in rows {
            let receipt_ids = self.receipt_ids_for(&row.id).await?;
            vouchers.push(row.into_domain(receipt_ids));
        }
        Ok(vouchers)
    }

    async fn receipt_ids_for(&self, voucher_id: &str) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT receipt_id FROM payment_voucher_receipts WHERE voucher_id = ? \
             ORDER BY receipt_id",
        )
        .bind(voucher_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| row.get("receipt_id")).collect())
    }
}

/// Parameters required to insert a payment voucher.
pub struct NewPaymentVoucher<'a> {
    pub id: String,
    pub voucher_ref: &'a str,
    pub receipt_ids: &'a [String],
    pub issued_by: &'a str,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentVoucherRow {
    id: String,
    voucher_ref: String,
    issued_by: String,
    issued_at: DateTime<Utc>,
}

impl PaymentVoucherRow {
    fn into_domain(self, receipt_ids: Vec<String>) -> PaymentVoucher {
        PaymentVoucher {
            id: self.id,
            voucher_ref: self.voucher_ref,
            receipt_ids,
            issued_by: self.issued_by,
            issued_at: self.issued_at,
        }
    }
}

/// Errors that can occur while reading or writing payment vouchers.
#[derive(Debug, Error)]
pub enum PaymentVoucherError {
    #[error("a voucher with the same reference already exists")]
    DuplicateRef,
    #[error("referenced user or receipt does not exist")]
    MissingReference,
    #[error("corrupt row: {0}")]
    Corrupt(#[from] CorruptColumn),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).expect("test decimal")
    }

    async fn setup_db() -> Database {
        let db = Database::connect("sqlite::memory:?cache=shared")
            .await
            .expect("connect");
        db.run_migrations().await.expect("migrations");
        db.vendors()
            .insert(&NewVendor {
                id: "v-1".into(),
                company_name: "Acme Logistics",
                tax_id: "TAX-1",
                vat_rate_text: Some("7".into()),
                vat_inclusive: true,
                created_at: ts(),
                updated_at: ts(),
            })
            .await
            .expect("insert vendor");
        db.users()
            .insert(&NewUser {
                id: "u-1".into(),
                email: "vendor@acme.test",
                name: "Acme Operator",
                password_hash: "hash",
                role: Role::Vendor,
                vendor_id: Some("v-1".into()),
                created_at: ts(),
                updated_at: ts(),
            })
            .await
            .expect("insert user");
        db
    }

    async fn insert_job(db: &Database, id: &str) {
        db.jobs()
            .insert(&NewJob {
                id: id.into(),
                vendor_id: "v-1",
                title: "Delivery run",
                amount: dec("107"),
                submitted_by: "u-1",
                created_at: ts(),
            })
            .await
            .expect("insert job");
    }

    async fn insert_note(db: &Database, id: &str, status: DocumentStatus, price: Option<Decimal>) {
        insert_job(db, &format!("job-for-{id}")).await;
        let mut tx = db.begin().await.expect("begin");
        db.billing_notes()
            .insert(
                &mut tx,
                &NewBillingNote {
                    id: id.into(),
                    billing_ref: &format!("BN-{}", Uuid::new_v4().simple()),
                    vendor_id: "v-1",
                    job_ids: &[format!("job-for-{id}")],
                    subtotal: dec("107"),
                    vat_rate_text: Some("7"),
                    price_before_vat: price,
                    status,
                    created_at: ts(),
                    updated_at: ts(),
                },
            )
            .await
            .expect("insert note");
        tx.commit().await.expect("commit");
    }

    #[tokio::test]
    async fn migrations_apply() {
        let db = Database::connect("sqlite::memory:?cache=shared")
            .await
            .expect("connect");
        db.run_migrations().await.expect("migrations");

        let tables: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
                .fetch_one(db.pool())
                .await
                .expect("fetch tables");
        assert!(tables.0 >= 8, "expected core tables to be created");
    }

    #[tokio::test]
    async fn duplicate_email_is_reported() {
        let db = setup_db().await;
        let err = db
            .users()
            .insert(&NewUser {
                id: "u-2".into(),
                email: "vendor@acme.test",
                name: "Duplicate",
                password_hash: "hash",
                role: Role::User,
                vendor_id: Some("v-1".into()),
                created_at: ts(),
                updated_at: ts(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::DuplicateEmail));
    }

    #[tokio::test]
    async fn user_insert_requires_existing_vendor() {
        let db = setup_db().await;
        let err = db
            .users()
            .insert(&NewUser {
                id: "u-3".into(),
                email: "orphan@acme.test",
                name: "Orphan",
                password_hash: "hash",
                role: Role::User,
                vendor_id: Some("missing".into()),
                created_at: ts(),
                updated_at: ts(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::MissingVendor));
    }

    #[tokio::test]
    async fn billing_note_round_trips_with_job_links() {
        let db = setup_db().await;
        insert_note(&db, "bn-1", DocumentStatus::Pending, None).await;

        let note = db
            .billing_notes()
            .fetch("bn-1")
            .await
            .expect("fetch")
            .expect("present");
        assert_eq!(note.subtotal, dec("107"));
        assert_eq!(note.job_ids, vec!["job-for-bn-1".to_string()]);
        assert_eq!(note.status, DocumentStatus::Pending);
        assert!(note.price_before_vat.is_none());
    }

    #[tokio::test]
    async fn status_update_is_a_compare_and_set() {
        let db = setup_db().await;
        insert_note(&db, "bn-1", DocumentStatus::Pending, None).await;

        let mut tx = db.begin().await.expect("begin");
        db.billing_notes()
            .update_status(
                &mut tx,
                "bn-1",
                DocumentStatus::Pending,
                DocumentStatus::Approved,
                ts(),
            )
            .await
            .expect("first transition");
        tx.commit().await.expect("commit");

        // A second actor that validated against PENDING must lose the race.
        let mut tx = db.begin().await.expect("begin");
        let err = db
            .billing_notes()
            .update_status(
                &mut tx,
                "bn-1",
                DocumentStatus::Pending,
                DocumentStatus::Rejected,
                ts(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BillingNoteError::StatusConflict));
    }

    #[tokio::test]
    async fn price_write_never_overwrites() {
        let db = setup_db().await;
        insert_note(&db, "bn-1", DocumentStatus::Pending, None).await;

        let outcome = db
            .billing_notes()
            .set_price_before_vat("bn-1", dec("100"), ts())
            .await
            .expect("first write");
        assert_eq!(outcome, PriceWriteOutcome::Updated);

        let outcome = db
            .billing_notes()
            .set_price_before_vat("bn-1", dec("999"), ts())
            .await
            .expect("second write");
        assert_eq!(outcome, PriceWriteOutcome::AlreadySet);

        let note = db
            .billing_notes()
            .fetch("bn-1")
            .await
            .expect("fetch")
            .expect("present");
        assert_eq!(note.price_before_vat, Some(dec("100.00")));
    }

    #[tokio::test]
    async fn unpriced_scan_skips_priced_rows_and_paginates() {
        let db = setup_db().await;
        insert_note(&db, "bn-1", DocumentStatus::Pending, None).await;
        insert_note(&db, "bn-2", DocumentStatus::Pending, Some(dec("50"))).await;
        insert_note(&db, "bn-3", DocumentStatus::Pending, None).await;

        let first = db
            .billing_notes()
            .list_unpriced(0, 1)
            .await
            .expect("first page");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, "bn-1");
        assert_eq!(first[0].vat_inclusive, 1);

        let rest = db
            .billing_notes()
            .list_unpriced(first[0].rowid, 10)
            .await
            .expect("second page");
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "bn-3");
    }

    #[tokio::test]
    async fn pending_counts_track_live_status() {
        let db = setup_db().await;
        insert_note(&db, "bn-1", DocumentStatus::Pending, None).await;
        insert_note(&db, "bn-2", DocumentStatus::Pending, None).await;

        let counts = db.vendors().pending_counts("v-1").await.expect("counts");
        assert_eq!(counts.pending_billing_count, 2);
        assert_eq!(counts.pending_receipt_count, 0);

        let mut tx = db.begin().await.expect("begin");
        db.billing_notes()
            .update_status(
                &mut tx,
                "bn-1",
                DocumentStatus::Pending,
                DocumentStatus::Approved,
                ts(),
            )
            .await
            .expect("approve");
        tx.commit().await.expect("commit");

        let counts = db.vendors().pending_counts("v-1").await.expect("counts");
        assert_eq!(counts.pending_billing_count, 1);
    }

    #[tokio::test]
    async fn receipt_round_trips_with_note_links() {
        let db = setup_db().await;
        insert_note(&db, "bn-1", DocumentStatus::Approved, Some(dec("100"))).await;

        let mut tx = db.begin().await.expect("begin");
        db.receipts()
            .insert(
                &mut tx,
                &NewReceipt {
                    id: "rc-1".into(),
                    receipt_ref: "RC-0001",
                    vendor_id: "v-1",
                    billing_note_ids: &["bn-1".to_string()],
                    status: DocumentStatus::Pending,
                    created_at: ts(),
                    updated_at: ts(),
                },
            )
            .await
            .expect("insert receipt");
        tx.commit().await.expect("commit");

        let receipt = db
            .receipts()
            .fetch("rc-1")
            .await
            .expect("fetch")
            .expect("present");
        assert_eq!(receipt.billing_note_ids, vec!["bn-1".to_string()]);
        assert_eq!(receipt.status, DocumentStatus::Pending);

        let counts = db.vendors().pending_counts("v-1").await.expect("counts");
        assert_eq!(counts.pending_receipt_count, 1);
    }

    #[tokio::test]
    async fn voucher_insert_keeps_receipts_untouched() {
        let db = setup_db().await;
        insert_note(&db, "bn-1", DocumentStatus::Approved, Some(dec("100"))).await;

        let mut tx = db.begin().await.expect("begin");
        db.receipts()
            .insert(
                &mut tx,
                &NewReceipt {
                    id: "rc-1".into(),
                    receipt_ref: "RC-0001",
                    vendor_id: "v-1",
                    billing_note_ids: &["bn-1".to_string()],
                    status: DocumentStatus::Approved,
                    created_at: ts(),
                    updated_at: ts(),
                },
            )
            .await
            .expect("insert receipt");
        tx.commit().await.expect("commit");

        let mut tx = db.begin().await.expect("begin");
        db.payment_vouchers()
            .insert(
                &mut tx,
                &NewPaymentVoucher {
                    id: "pv-1".into(),
                    voucher_ref: "PV-0001",
                    receipt_ids: &["rc-1".to_string()],
                    issued_by: "u-1",
                    issued_at: ts(),
                },
            )
            .await
            .expect("insert voucher");
        tx.commit().await.expect("commit");

        let voucher = db
            .payment_vouchers()
            .fetch("pv-1")
            .await
            .expect("fetch")
            .expect("present");
        assert_eq!(voucher.receipt_ids, vec!["rc-1".to_string()]);

        let receipt = db
            .receipts()
            .fetch("rc-1")
            .await
            .expect("fetch")
            .expect("present");
        assert_eq!(receipt.status, DocumentStatus::Approved);
    }

    #[tokio::test]
    async fn user_delete_reports_missing_rows() {
        let db = setup_db().await;
        assert!(db.users().delete("u-1").await.expect("delete"));
        assert!(!db.users().delete("u-1").await.expect("second delete"));
    }
}
