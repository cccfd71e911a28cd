// 🧾 Field Extractor - OCR output → vendor / date / total / currency / items
//
// Structured provider fields win; heuristics over the raw text fill the gaps.
// Nothing here fails: a field that cannot be found is left as `None` and the
// pipeline decides whether the record is still usable.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::categorize::DocumentKind;
use crate::ocr::OcrOutput;

// ============================================================================
// EXTRACTED FIELDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub vendor: Option<String>,
    pub date: Option<NaiveDate>,
    pub total: Option<f64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub items: Vec<LineItem>,
}

impl ExtractedFields {
    /// Render the fields as the text hint passed to the categorizer
    pub fn description(&self) -> String {
        let mut out = Vec::new();

        if let Some(vendor) = &self.vendor {
            out.push(format!("Vendor: {}", vendor));
        }
        if let Some(date) = &self.date {
            out.push(format!("Date: {}", date.format("%Y-%m-%d")));
        }
        if let Some(total) = self.total {
            match &self.currency {
                Some(currency) => out.push(format!("Total: {:.3} {}", total, currency)),
                None => out.push(format!("Total: {:.3}", total)),
            }
        }
        if !self.items.is_empty() {
            out.push("Items:".to_string());
            for item in &self.items {
                match item.price {
                    Some(price) => out.push(format!("- {} {:.3}", item.name, price)),
                    None => out.push(format!("- {}", item.name)),
                }
            }
        }

        out.join("\n")
    }
}

// ============================================================================
// EXTRACTION
// ============================================================================

pub fn extract(output: &OcrOutput, kind: DocumentKind) -> ExtractedFields {
    let lines: Vec<&str> = output
        .text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let fields = &output.fields;

    let vendor = fields
        .vendor
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| match kind {
            DocumentKind::Receipt => guess_receipt_vendor(&lines),
            DocumentKind::Sms => guess_sms_vendor(&lines),
        });

    let date = fields
        .date
        .as_deref()
        .and_then(parse_date)
        .or_else(|| lines.iter().find_map(|line| parse_date(line)));

    let total = fields
        .total
        .as_deref()
        .and_then(parse_amount)
        .or_else(|| guess_total(&lines))
        .or_else(|| amount_after_currency(&output.text));

    let currency = fields
        .total
        .as_deref()
        .and_then(detect_currency)
        .or_else(|| detect_currency(&output.text));

    let items = fields
        .items
        .iter()
        .map(|item| LineItem {
            name: item.name.trim().to_string(),
            price: item.price.as_deref().and_then(parse_amount),
        })
        .collect();

    ExtractedFields {
        vendor,
        date,
        total,
        currency,
        items,
    }
}

// ============================================================================
// DATES
// ============================================================================

static ISO_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})\b").unwrap());

static NUMERIC_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})([./-])(\d{1,2})([./-])(\d{4}|\d{2})\b").unwrap());

static DAY_MONTH_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})[\s-]+([A-Za-z]{3,9})\.?[\s,-]+(\d{4})\b").unwrap());

static MONTH_NAME_DAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z]{3,9})\.?\s+(\d{1,2}),?\s+(\d{4})\b").unwrap());

/// Find and parse the first date in `text`
///
/// Numeric dates are day-first (`04.02.2025` is 4 February). When the second
/// part cannot be a month it is read month-first (`02/14/2025`).
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    if let Some(caps) = ISO_DATE_RE.captures(text) {
        let date = ymd(&caps[1], &caps[2], &caps[3]);
        if date.is_some() {
            return date;
        }
    }

    for caps in NUMERIC_DATE_RE.captures_iter(text) {
        // Mixed separators ("12.30-2") are not dates
        if caps[2] != caps[4] {
            continue;
        }

        let first: u32 = caps[1].parse().ok()?;
        let second: u32 = caps[3].parse().ok()?;
        let year = expand_year(&caps[5])?;

        let (day, month) = if second > 12 && first <= 12 {
            (second, first)
        } else {
            (first, second)
        };

        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date);
        }
    }

    if let Some(caps) = DAY_MONTH_NAME_RE.captures(text) {
        if let Some(month) = month_from_name(&caps[2]) {
            let day: u32 = caps[1].parse().ok()?;
            let year: i32 = caps[3].parse().ok()?;
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                return Some(date);
            }
        }
    }

    if let Some(caps) = MONTH_NAME_DAY_RE.captures(text) {
        if let Some(month) = month_from_name(&caps[1]) {
            let day: u32 = caps[2].parse().ok()?;
            let year: i32 = caps[3].parse().ok()?;
            return NaiveDate::from_ymd_opt(year, month, day);
        }
    }

    None
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn expand_year(year: &str) -> Option<i32> {
    let value: i32 = year.parse().ok()?;
    if year.len() == 2 {
        Some(2000 + value)
    } else {
        Some(value)
    }
}

fn month_from_name(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];

    let lower = name.to_lowercase();
    let prefix = lower.get(..3)?;
    MONTHS
        .iter()
        .position(|m| *m == prefix)
        .map(|index| index as u32 + 1)
}

// ============================================================================
// AMOUNTS
// ============================================================================

static AMOUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d[\d,.]*").unwrap());

/// Parse the last amount in `text`
///
/// Examples:
/// - "BHD 3.370" → 3.37
/// - "$1,234.50" → 1234.5
/// - "1.234,50" → 1234.5
/// - "3,370" → 3370.0 (three digit group = thousands)
/// - "12,50" → 12.5
pub fn parse_amount(text: &str) -> Option<f64> {
    let token = AMOUNT_RE.find_iter(text).last()?.as_str();
    let token = token.trim_end_matches(|c| c == '.' || c == ',');

    let normalized = match (token.rfind('.'), token.rfind(',')) {
        (Some(dot), Some(comma)) if dot > comma => token.replace(',', ""),
        (Some(_), Some(_)) => token.replace('.', "").replace(',', "."),
        (None, Some(comma)) => {
            let decimals = token.len() - comma - 1;
            if token.matches(',').count() == 1 && decimals != 3 {
                token.replace(',', ".")
            } else {
                token.replace(',', "")
            }
        }
        (Some(_), None) if token.matches('.').count() > 1 => token.replace('.', ""),
        _ => token.to_string(),
    };

    normalized
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
}

static TOTAL_KEYWORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(grand\s+total|total|gross|net|amount)\b").unwrap());

static SUBTOTAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(sub[\s-]?total|total\s+items?|total\s+qty|quantity)\b").unwrap());

/// Last TOTAL / GROSS / NET / AMOUNT line carrying an amount.
/// A keyword line without digits takes the amount from the next line.
fn guess_total(lines: &[&str]) -> Option<f64> {
    let mut found = None;

    for (index, line) in lines.iter().enumerate() {
        if !TOTAL_KEYWORD_RE.is_match(line) || SUBTOTAL_RE.is_match(line) {
            continue;
        }

        let amount = line_amount(line).or_else(|| {
            lines
                .get(index + 1)
                .filter(|next| !next.chars().any(char::is_alphabetic) || detect_currency(next).is_some())
                .and_then(|next| line_amount(next))
        });

        if amount.is_some() {
            found = amount;
        }
    }

    found
}

static CURRENCY_AMOUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\b(?:BHD|BD|USD|EUR|GBP|SAR|AED|KWD|QAR|OMR|INR)|[$€£₹])\s*(\d[\d,.]*)").unwrap()
});

static TIME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{1,2}:\d{2}(?::\d{2})?\b").unwrap());

static PERCENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d[\d,.]*\s*%").unwrap());

/// First amount written right after a currency code or symbol ("BHD 5.500", "$4.50")
fn amount_after_currency(text: &str) -> Option<f64> {
    CURRENCY_AMOUNT_RE
        .captures(text)
        .and_then(|caps| parse_amount(&caps[1]))
}

/// Amount on a single total line.
/// Dates, times and percentages around the amount are skipped.
fn line_amount(line: &str) -> Option<f64> {
    if let Some(amount) = amount_after_currency(line) {
        return Some(amount);
    }

    let skipped: Vec<(usize, usize)> = [&*ISO_DATE_RE, &*NUMERIC_DATE_RE, &*TIME_RE, &*PERCENT_RE]
        .into_iter()
        .flat_map(|re| re.find_iter(line).map(|m| (m.start(), m.end())))
        .collect();

    AMOUNT_RE
        .find_iter(line)
        .find(|m| !skipped.iter().any(|&(start, end)| m.start() < end && m.end() > start))
        .and_then(|m| parse_amount(m.as_str()))
}

// ============================================================================
// CURRENCY
// ============================================================================

static CURRENCY_CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(BHD|BD|USD|EUR|GBP|SAR|AED|KWD|QAR|OMR|INR)\b|([$€£₹])").unwrap()
});

/// First currency code or symbol in `text`, as a 3-letter code
pub fn detect_currency(text: &str) -> Option<String> {
    let caps = CURRENCY_CODE_RE.captures(text)?;

    if let Some(code) = caps.get(1) {
        let code = code.as_str().to_uppercase();
        return Some(if code == "BD" { "BHD".to_string() } else { code });
    }

    let code = match caps.get(2)?.as_str() {
        "$" => "USD",
        "€" => "EUR",
        "£" => "GBP",
        "₹" => "INR",
        _ => return None,
    };
    Some(code.to_string())
}

// ============================================================================
// VENDOR
// ============================================================================

const NOISE_WORDS: [&str; 10] = [
    "receipt", "invoice", "vat", "tax", "tel", "phone", "welcome", "cashier", "www", "http",
];

fn guess_receipt_vendor(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .find(|line| {
            let letters = line.chars().filter(|c| c.is_alphabetic()).count();
            let lower = line.to_lowercase();

            letters >= 2
                && parse_date(line).is_none()
                && !TOTAL_KEYWORD_RE.is_match(line)
                && !NOISE_WORDS.iter().any(|noise| lower.contains(noise))
        })
        .map(|line| clean_vendor(line))
}

static SMS_VENDOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bat\s+(.+?)(?:\s+on\s|\s+for\s|\s+dated\s|\.\s|\.$|,|;|$)").unwrap()
});

fn guess_sms_vendor(lines: &[&str]) -> Option<String> {
    lines.iter().find_map(|line| {
        SMS_VENDOR_RE
            .captures(line)
            .map(|caps| clean_vendor(&caps[1]))
            .filter(|vendor| vendor.chars().any(char::is_alphabetic))
    })
}

fn clean_vendor(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| !c.is_alphanumeric() && c != ')' && c != '\'')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// TESTS
// ============================================================================
