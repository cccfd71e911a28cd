// 📊 Dashboard - filters, manual entry, chart summaries, CSV export
//
// Everything here works on already-loaded transactions or raw request
// input; the SQL lives in db.rs.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::categorize::TransactionType;
use crate::db::{NewTransaction, Transaction, TransactionFilter};
use crate::entities::Sector;
use crate::errors::Error;
use crate::extractor::LineItem;

// ============================================================================
// FILTERS
// ============================================================================

/// Query-string form of [`TransactionFilter`]; empty values are ignored
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterParams {
    pub from: Option<String>,
    pub to: Option<String>,
    pub sector: Option<String>,
    pub vendor: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_iso_date(field: &str, value: &str) -> Result<NaiveDate, Error> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| Error::bad_request(format!("{} must be a date in YYYY-MM-DD format", field)))
}

impl FilterParams {
    pub fn into_filter(self) -> Result<TransactionFilter, Error> {
        let from = present(&self.from).map(|v| parse_iso_date("from", v)).transpose()?;
        let to = present(&self.to).map(|v| parse_iso_date("to", v)).transpose()?;

        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(Error::bad_request("from must not be after to"));
            }
        }

        let sector = present(&self.sector)
            .map(|v| v.parse::<Sector>().map_err(|e| Error::bad_request(e.to_string())))
            .transpose()?;

        Ok(TransactionFilter {
            from,
            to,
            sector,
            vendor: present(&self.vendor).map(str::to_string),
        })
    }
}

// ============================================================================
// MANUAL ENTRY
// ============================================================================

/// A transaction typed in by the user, bypassing OCR and categorization
#[derive(Debug, Clone, Deserialize)]
pub struct ManualEntry {
    pub vendor: String,
    /// YYYY-MM-DD
    pub date: String,
    pub total: f64,
    pub currency: Option<String>,
    pub sector: String,
    #[serde(default)]
    pub items: Vec<LineItem>,
}

impl ManualEntry {
    /// Validate into a storable transaction (vendor not yet linked)
    pub fn validate(self, default_currency: &str) -> Result<NewTransaction, Error> {
        let vendor = self.vendor.trim();
        if vendor.is_empty() {
            return Err(Error::bad_request("vendor is required"));
        }

        let date = parse_iso_date("date", self.date.trim())?;

        if !self.total.is_finite() || self.total < 0.0 {
            return Err(Error::bad_request("total must be a non-negative number"));
        }

        let sector = self
            .sector
            .parse::<Sector>()
            .map_err(|e| Error::bad_request(e.to_string()))?;

        let currency = match present(&self.currency) {
            Some(code) if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) => code.to_uppercase(),
            Some(code) => return Err(Error::bad_request(format!("invalid currency code: {}", code))),
            None => default_currency.to_string(),
        };

        Ok(NewTransaction {
            vendor_id: None,
            vendor: vendor.to_string(),
            date,
            total: self.total,
            currency,
            sector,
            uncertain_category: false,
            transaction_type: TransactionType::Manual,
            items: self.items,
        })
    }
}

// ============================================================================
// SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectorTotal {
    pub sector: Sector,
    pub count: usize,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthTotal {
    /// YYYY-MM
    pub month: String,
    pub count: usize,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub transaction_count: usize,
    pub totals_by_currency: BTreeMap<String, f64>,
    /// Fixed sector order, sectors without spending omitted
    pub by_sector: Vec<SectorTotal>,
    /// Oldest month first
    pub by_month: Vec<MonthTotal>,
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Chart data for a set of transactions.
///
/// Sector and month totals add raw amounts across currencies; the
/// per-currency totals are exact.
pub fn summarize(transactions: &[Transaction]) -> Summary {
    let mut totals_by_currency: BTreeMap<String, f64> = BTreeMap::new();
    let mut sectors: BTreeMap<Sector, (usize, f64)> = BTreeMap::new();
    let mut months: BTreeMap<String, (usize, f64)> = BTreeMap::new();

    for tx in transactions {
        *totals_by_currency.entry(tx.currency.clone()).or_insert(0.0) += tx.total;

        let sector = sectors.entry(tx.sector).or_insert((0, 0.0));
        sector.0 += 1;
        sector.1 += tx.total;

        let month = months.entry(tx.date.format("%Y-%m").to_string()).or_insert((0, 0.0));
        month.0 += 1;
        month.1 += tx.total;
    }

    Summary {
        transaction_count: transactions.len(),
        totals_by_currency: totals_by_currency
            .into_iter()
            .map(|(currency, total)| (currency, round3(total)))
            .collect(),
        by_sector: Sector::ALL
            .iter()
            .filter_map(|sector| {
                sectors.get(sector).map(|(count, total)| SectorTotal {
                    sector: *sector,
                    count: *count,
                    total: round3(*total),
                })
            })
            .collect(),
        by_month: months
            .into_iter()
            .map(|(month, (count, total))| MonthTotal {
                month,
                count,
                total: round3(total),
            })
            .collect(),
    }
}

// ============================================================================
// CSV EXPORT
// ============================================================================

#[derive(Serialize)]
struct CsvRow<'a> {
    id: &'a str,
    date: String,
    vendor: &'a str,
    sector: &'a str,
    total: f64,
    currency: &'a str,
    transaction_type: &'a str,
    uncertain_category: bool,
    item_count: usize,
}

/// Render transactions as CSV, one row each, in the given order
pub fn export_csv(transactions: &[Transaction]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    if transactions.is_empty() {
        writer.write_record([
            "id",
            "date",
            "vendor",
            "sector",
            "total",
            "currency",
            "transaction_type",
            "uncertain_category",
            "item_count",
        ])?;
    }

    for tx in transactions {
        writer.serialize(CsvRow {
            id: &tx.id,
            date: tx.date.format("%Y-%m-%d").to_string(),
            vendor: &tx.vendor,
            sector: tx.sector.as_str(),
            total: tx.total,
            currency: &tx.currency,
            transaction_type: tx.transaction_type.as_str(),
            uncertain_category: tx.uncertain_category,
            item_count: tx.items.len(),
        })?;
    }

    let bytes = writer.into_inner().context("Failed to flush CSV writer")?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}
