use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::categorize::TransactionType;
use crate::entities::{Sector, Vendor};
use crate::extractor::LineItem;

// ============================================================================
// RECORDS
// ============================================================================

/// Registered user. Created at sign-up, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Always stored lowercase
    pub email: String,
    /// Argon2id PHC string
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: &str, password_hash: String, first_name: &str, last_name: &str) -> Self {
        User {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.trim().to_lowercase(),
            password_hash,
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            created_at: Utc::now(),
        }
    }
}

/// A stored spending record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub vendor_id: Option<String>,
    pub vendor: String,
    pub date: NaiveDate,
    pub total: f64,
    pub currency: String,
    pub sector: Sector,
    pub uncertain_category: bool,
    pub transaction_type: TransactionType,
    #[serde(default)]
    pub items: Vec<LineItem>,
    pub raw_ocr_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Everything about a transaction except identity and ownership
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub vendor_id: Option<String>,
    pub vendor: String,
    pub date: NaiveDate,
    pub total: f64,
    pub currency: String,
    pub sector: Sector,
    pub uncertain_category: bool,
    pub transaction_type: TransactionType,
    pub items: Vec<LineItem>,
}

impl NewTransaction {
    pub fn into_transaction(self, user_id: &str, raw_ocr_id: Option<&str>) -> Transaction {
        Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            vendor_id: self.vendor_id,
            vendor: self.vendor,
            date: self.date,
            total: self.total,
            currency: self.currency,
            sector: self.sector,
            uncertain_category: self.uncertain_category,
            transaction_type: self.transaction_type,
            items: self.items,
            raw_ocr_id: raw_ocr_id.map(str::to_string),
            created_at: Utc::now(),
        }
    }
}

/// OCR and categorizer output for one upload, kept for audit. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOcrRecord {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub image_sha256: String,
    pub ocr_text: String,
    pub provider_payload: serde_json::Value,
    pub llm_response: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RawOcrRecord {
    pub fn new(
        user_id: &str,
        provider: &str,
        image_sha256: &str,
        ocr_text: &str,
        provider_payload: serde_json::Value,
        llm_response: Option<String>,
    ) -> Self {
        RawOcrRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            provider: provider.to_string(),
            image_sha256: image_sha256.to_string(),
            ocr_text: ocr_text.to_string(),
            provider_payload,
            llm_response,
            created_at: Utc::now(),
        }
    }
}

/// Dashboard filters; every field optional, all conditions ANDed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    /// Inclusive
    pub from: Option<NaiveDate>,
    /// Inclusive
    pub to: Option<NaiveDate>,
    pub sector: Option<Sector>,
    /// Case-insensitive substring of the vendor name
    pub vendor: Option<String>,
}

/// Event for audit trail (every write is an event)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Connection shared by request handlers. Never hold the guard across an `.await`.
pub type SharedConnection = Arc<Mutex<Connection>>;

pub fn shared(conn: Connection) -> SharedConnection {
    Arc::new(Mutex::new(conn))
}

pub fn lock(db: &SharedConnection) -> Result<MutexGuard<'_, Connection>> {
    db.lock().map_err(|_| anyhow::anyhow!("database connection mutex poisoned"))
}

/// Open (or create) the database file and make sure the schema exists
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS vendors (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS raw_ocr_records (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            provider TEXT NOT NULL,
            image_sha256 TEXT NOT NULL,
            ocr_text TEXT NOT NULL,
            provider_payload TEXT NOT NULL,
            llm_response TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            vendor_id TEXT REFERENCES vendors(id),
            vendor TEXT NOT NULL,
            date TEXT NOT NULL,
            total REAL NOT NULL CHECK (total >= 0),
            currency TEXT NOT NULL,
            sector TEXT NOT NULL,
            uncertain_category INTEGER NOT NULL DEFAULT 0,
            transaction_type TEXT NOT NULL,
            items TEXT NOT NULL DEFAULT '[]',
            raw_ocr_id TEXT REFERENCES raw_ocr_records(id),
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // Raw OCR output is evidence: never rewritten
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS raw_ocr_records_immutable
         BEFORE UPDATE ON raw_ocr_records
         BEGIN
            SELECT RAISE(ABORT, 'raw OCR records are immutable');
         END",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_user_date ON transactions(user_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_sector ON transactions(sector)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

/// Whether an error came from a UNIQUE / CHECK / FK constraint
pub fn is_constraint_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn conversion_error(index: usize, err: Box<dyn std::error::Error + Send + Sync>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, err)
}

fn parse_timestamp(index: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(index, e.into()))
}

// ============================================================================
// USERS
// ============================================================================

pub fn create_user(conn: &Connection, user: &User) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, email, password_hash, first_name, last_name, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user.id,
            user.email,
            user.password_hash,
            user.first_name,
            user.last_name,
            user.created_at.to_rfc3339(),
        ],
    )?;

    let event = Event::new(
        "user_registered",
        "user",
        &user.id,
        serde_json::json!({ "email": user.email }),
        "auth",
    );
    insert_event(conn, &event)?;

    Ok(())
}

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, created_at";

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    let created_at: String = row.get(5)?;

    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        created_at: parse_timestamp(5, &created_at)?,
    })
}

pub fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
            params![email.trim().to_lowercase()],
            user_from_row,
        )
        .optional()?;

    Ok(user)
}

pub fn get_user(conn: &Connection, id: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            params![id],
            user_from_row,
        )
        .optional()?;

    Ok(user)
}

// ============================================================================
// VENDORS
// ============================================================================

pub fn list_vendors(conn: &Connection) -> Result<Vec<Vendor>> {
    let mut stmt = conn.prepare("SELECT id, name, created_at FROM vendors ORDER BY created_at")?;

    let vendors = stmt
        .query_map([], |row| {
            let created_at: String = row.get(2)?;
            Ok(Vendor {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: parse_timestamp(2, &created_at)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(vendors)
}

pub fn insert_vendor(conn: &Connection, vendor: &Vendor) -> Result<()> {
    conn.execute(
        "INSERT INTO vendors (id, name, created_at) VALUES (?1, ?2, ?3)",
        params![vendor.id, vendor.name, vendor.created_at.to_rfc3339()],
    )?;
    Ok(())
}

// ============================================================================
// RAW OCR RECORDS
// ============================================================================

pub fn insert_raw_ocr_record(conn: &Connection, record: &RawOcrRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO raw_ocr_records (
            id, user_id, provider, image_sha256, ocr_text, provider_payload, llm_response, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.id,
            record.user_id,
            record.provider,
            record.image_sha256,
            record.ocr_text,
            serde_json::to_string(&record.provider_payload)?,
            record.llm_response,
            record.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_raw_ocr_record(conn: &Connection, id: &str) -> Result<Option<RawOcrRecord>> {
    let record = conn
        .query_row(
            "SELECT id, user_id, provider, image_sha256, ocr_text, provider_payload, llm_response, created_at
             FROM raw_ocr_records WHERE id = ?1",
            params![id],
            |row| {
                let payload: String = row.get(5)?;
                let created_at: String = row.get(7)?;

                Ok(RawOcrRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    provider: row.get(2)?,
                    image_sha256: row.get(3)?,
                    ocr_text: row.get(4)?,
                    provider_payload: serde_json::from_str(&payload).map_err(|e| conversion_error(5, e.into()))?,
                    llm_response: row.get(6)?,
                    created_at: parse_timestamp(7, &created_at)?,
                })
            },
        )
        .optional()?;

    Ok(record)
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

pub fn insert_transaction(conn: &Connection, tx: &Transaction) -> Result<()> {
    conn.execute(
        "INSERT INTO transactions (
            id, user_id, vendor_id, vendor, date, total, currency, sector,
            uncertain_category, transaction_type, items, raw_ocr_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            tx.id,
            tx.user_id,
            tx.vendor_id,
            tx.vendor,
            tx.date.format("%Y-%m-%d").to_string(),
            tx.total,
            tx.currency,
            tx.sector.as_str(),
            tx.uncertain_category,
            tx.transaction_type.as_str(),
            serde_json::to_string(&tx.items)?,
            tx.raw_ocr_id,
            tx.created_at.to_rfc3339(),
        ],
    )?;

    // Log event to audit trail
    let event = Event::new(
        "transaction_added",
        "transaction",
        &tx.id,
        serde_json::json!({
            "vendor": tx.vendor,
            "total": tx.total,
            "currency": tx.currency,
            "sector": tx.sector,
            "transaction_type": tx.transaction_type,
        }),
        &tx.user_id,
    );
    insert_event(conn, &event)?;

    Ok(())
}

/// Store one upload atomically: its raw OCR record, any vendors it
/// introduced, and its transactions.
pub fn insert_upload(
    conn: &mut Connection,
    record: &RawOcrRecord,
    new_vendors: &[Vendor],
    transactions: &[Transaction],
) -> Result<()> {
    let sql_tx = conn.transaction()?;

    insert_raw_ocr_record(&sql_tx, record)?;
    for vendor in new_vendors {
        insert_vendor(&sql_tx, vendor)?;
    }
    for tx in transactions {
        insert_transaction(&sql_tx, tx)?;
    }

    sql_tx.commit().context("Failed to commit upload")?;
    Ok(())
}

const TRANSACTION_COLUMNS: &str = "id, user_id, vendor_id, vendor, date, total, currency, sector,
     uncertain_category, transaction_type, items, raw_ocr_id, created_at";

fn transaction_from_row(row: &Row) -> rusqlite::Result<Transaction> {
    let date: String = row.get(4)?;
    let sector: String = row.get(7)?;
    let transaction_type: String = row.get(9)?;
    let items: String = row.get(10)?;
    let created_at: String = row.get(12)?;

    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        vendor_id: row.get(2)?,
        vendor: row.get(3)?,
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| conversion_error(4, e.into()))?,
        total: row.get(5)?,
        currency: row.get(6)?,
        sector: sector.parse().map_err(|e: crate::entities::UnknownSector| conversion_error(7, e.into()))?,
        uncertain_category: row.get(8)?,
        transaction_type: transaction_type
            .parse()
            .map_err(|e: anyhow::Error| conversion_error(9, e.into()))?,
        items: serde_json::from_str(&items).map_err(|e| conversion_error(10, e.into()))?,
        raw_ocr_id: row.get(11)?,
        created_at: parse_timestamp(12, &created_at)?,
    })
}

/// One of the user's transactions; other users' rows are invisible
pub fn get_transaction(conn: &Connection, user_id: &str, id: &str) -> Result<Option<Transaction>> {
    let tx = conn
        .query_row(
            &format!(
                "SELECT {} FROM transactions WHERE user_id = ?1 AND id = ?2",
                TRANSACTION_COLUMNS
            ),
            params![user_id, id],
            transaction_from_row,
        )
        .optional()?;

    Ok(tx)
}

/// The user's transactions matching `filter`, newest date first
pub fn query_transactions(conn: &Connection, user_id: &str, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
    let mut conditions = vec!["user_id = ?".to_string()];
    let mut values: Vec<String> = vec![user_id.to_string()];

    if let Some(from) = filter.from {
        conditions.push("date >= ?".to_string());
        values.push(from.format("%Y-%m-%d").to_string());
    }
    if let Some(to) = filter.to {
        conditions.push("date <= ?".to_string());
        values.push(to.format("%Y-%m-%d").to_string());
    }
    if let Some(sector) = filter.sector {
        conditions.push("sector = ?".to_string());
        values.push(sector.as_str().to_string());
    }
    if let Some(vendor) = filter.vendor.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        conditions.push("instr(lower(vendor), ?) > 0".to_string());
        values.push(vendor.to_lowercase());
    }

    let sql = format!(
        "SELECT {} FROM transactions WHERE {} ORDER BY date DESC, created_at DESC, id",
        TRANSACTION_COLUMNS,
        conditions.join(" AND ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let transactions = stmt
        .query_map(params_from_iter(values.iter()), transaction_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(transactions)
}

pub fn count_transactions(conn: &Connection, user_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transactions WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity
pub fn get_events_for_entity(conn: &Connection, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_timestamp(1, &timestamp_str)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| conversion_error(5, e.into()))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn test_user(conn: &Connection, email: &str) -> User {
        let user = User::new(email, "$argon2id$fake".to_string(), "Test", "User");
        create_user(conn, &user).unwrap();
        user
    }

    fn new_tx(vendor: &str, date: &str, total: f64, sector: Sector) -> NewTransaction {
        NewTransaction {
            vendor_id: None,
            vendor: vendor.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            total,
            currency: "BHD".to_string(),
            sector,
            uncertain_category: false,
            transaction_type: TransactionType::Manual,
            items: vec![],
        }
    }

    #[test]
    fn test_user_lookup_is_case_insensitive() {
        let conn = test_db();
        let user = test_user(&conn, "Sara@Example.com");

        let found = find_user_by_email(&conn, "  SARA@example.COM").unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.email, "sara@example.com");
        assert_eq!(get_user(&conn, &user.id).unwrap().unwrap().first_name, "Test");
        assert!(find_user_by_email(&conn, "nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_email_is_constraint_violation() {
        let conn = test_db();
        test_user(&conn, "sara@example.com");

        let again = User::new("SARA@example.com", "$argon2id$other".to_string(), "S", "U");
        let err = create_user(&conn, &again).unwrap_err();

        assert!(is_constraint_violation(&err));
    }

    #[test]
    fn test_insert_and_get_transaction() {
        let conn = test_db();
        let user = test_user(&conn, "a@example.com");

        let mut new = new_tx("Starbucks", "2025-02-01", 2.1, Sector::Dining);
        new.items = vec![LineItem {
            name: "Latte".to_string(),
            price: Some(2.1),
        }];
        let tx = new.into_transaction(&user.id, None);
        insert_transaction(&conn, &tx).unwrap();

        let loaded = get_transaction(&conn, &user.id, &tx.id).unwrap().unwrap();
        assert_eq!(loaded.vendor, "Starbucks");
        assert_eq!(loaded.sector, Sector::Dining);
        assert_eq!(loaded.transaction_type, TransactionType::Manual);
        assert_eq!(loaded.items.len(), 1);

        let events = get_events_for_entity(&conn, "transaction", &tx.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].actor, user.id);
    }

    #[test]
    fn test_transactions_are_scoped_to_user() {
        let conn = test_db();
        let alice = test_user(&conn, "alice@example.com");
        let bob = test_user(&conn, "bob@example.com");

        let tx = new_tx("IKEA", "2025-01-10", 45.0, Sector::Home).into_transaction(&alice.id, None);
        insert_transaction(&conn, &tx).unwrap();

        assert!(get_transaction(&conn, &bob.id, &tx.id).unwrap().is_none());
        assert!(query_transactions(&conn, &bob.id, &TransactionFilter::default()).unwrap().is_empty());
        assert_eq!(count_transactions(&conn, &alice.id).unwrap(), 1);
    }

    #[test]
    fn test_query_filters_and_order() {
        let conn = test_db();
        let user = test_user(&conn, "a@example.com");

        for (vendor, date, total, sector) in [
            ("LuLu Hypermarket", "2025-01-05", 12.5, Sector::Groceries),
            ("Starbucks Seef", "2025-01-20", 2.1, Sector::Dining),
            ("Carrefour", "2025-02-03", 30.0, Sector::Groceries),
            ("Costa Coffee", "2025-03-01", 1.9, Sector::Dining),
        ] {
            let tx = new_tx(vendor, date, total, sector).into_transaction(&user.id, None);
            insert_transaction(&conn, &tx).unwrap();
        }

        let all = query_transactions(&conn, &user.id, &TransactionFilter::default()).unwrap();
        let dates: Vec<String> = all.iter().map(|t| t.date.to_string()).collect();
        assert_eq!(dates, vec!["2025-03-01", "2025-02-03", "2025-01-20", "2025-01-05"]);

        let january = TransactionFilter {
            from: NaiveDate::from_ymd_opt(2025, 1, 1),
            to: NaiveDate::from_ymd_opt(2025, 1, 31),
            ..Default::default()
        };
        assert_eq!(query_transactions(&conn, &user.id, &january).unwrap().len(), 2);

        let groceries = TransactionFilter {
            sector: Some(Sector::Groceries),
            ..Default::default()
        };
        assert_eq!(query_transactions(&conn, &user.id, &groceries).unwrap().len(), 2);

        let vendor = TransactionFilter {
            vendor: Some("COFFEE".to_string()),
            ..Default::default()
        };
        let found = query_transactions(&conn, &user.id, &vendor).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].vendor, "Costa Coffee");
    }

    #[test]
    fn test_insert_upload_is_atomic() {
        let mut conn = test_db();
        let user = test_user(&conn, "a@example.com");

        let record = RawOcrRecord::new(&user.id, "static", "abc", "TALABAT 5.500", serde_json::json!({}), None);
        let vendor = Vendor::new("Talabat");
        let good = NewTransaction {
            vendor_id: Some(vendor.id.clone()),
            ..new_tx("Talabat", "2025-02-04", 5.5, Sector::Dining)
        }
        .into_transaction(&user.id, Some(&record.id));

        // Second row violates the total >= 0 check, so nothing is kept
        let mut bad = good.clone();
        bad.id = uuid::Uuid::new_v4().to_string();
        bad.total = -1.0;

        assert!(insert_upload(&mut conn, &record, &[vendor.clone()], &[good.clone(), bad]).is_err());
        assert!(get_raw_ocr_record(&conn, &record.id).unwrap().is_none());
        assert!(list_vendors(&conn).unwrap().is_empty());

        insert_upload(&mut conn, &record, &[vendor], &[good.clone()]).unwrap();
        let stored = get_raw_ocr_record(&conn, &record.id).unwrap().unwrap();
        assert_eq!(stored.ocr_text, "TALABAT 5.500");
        assert_eq!(list_vendors(&conn).unwrap().len(), 1);
        assert_eq!(
            get_transaction(&conn, &user.id, &good.id).unwrap().unwrap().raw_ocr_id,
            Some(record.id)
        );
    }

    #[test]
    fn test_raw_ocr_records_are_immutable() {
        let conn = test_db();
        let user = test_user(&conn, "a@example.com");
        let record = RawOcrRecord::new(&user.id, "tesseract", "abc", "text", serde_json::Value::Null, None);
        insert_raw_ocr_record(&conn, &record).unwrap();

        let result = conn.execute(
            "UPDATE raw_ocr_records SET ocr_text = 'changed' WHERE id = ?1",
            params![record.id],
        );

        assert!(result.is_err());
        assert_eq!(get_raw_ocr_record(&conn, &record.id).unwrap().unwrap().ocr_text, "text");
    }

    #[test]
    fn test_event_log() {
        let conn = test_db();

        let event = Event::new(
            "test_event",
            "transaction",
            "test_id_123",
            serde_json::json!({"test": "data"}),
            "test_actor",
        );

        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "transaction", "test_id_123").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "test_event");
        assert_eq!(events[0].actor, "test_actor");
    }
}
