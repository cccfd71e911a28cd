// 🏷️ Sector Entity - The fixed set of spending sectors
//
// Every stored transaction carries exactly one of these 15 labels.
// Labels coming from OCR, the LLM, or a manual form are resolved through
// `Sector::from_str` (strict) or `Sector::resolve` (never fails).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// SECTOR
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "&'static str", try_from = "String")]
pub enum Sector {
    Groceries,
    Dining,
    Utilities,
    Transportation,
    Auto,
    Health,
    PersonalCare,
    Entertainment,
    Education,
    Apparel,
    Electronics,
    Home,
    Travel,
    Finance,
    Miscellaneous,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown sector: {0:?}")]
pub struct UnknownSector(pub String);

impl Sector {
    /// All sectors, in display order.
    pub const ALL: [Sector; 15] = [
        Sector::Groceries,
        Sector::Dining,
        Sector::Utilities,
        Sector::Transportation,
        Sector::Auto,
        Sector::Health,
        Sector::PersonalCare,
        Sector::Entertainment,
        Sector::Education,
        Sector::Apparel,
        Sector::Electronics,
        Sector::Home,
        Sector::Travel,
        Sector::Finance,
        Sector::Miscellaneous,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sector::Groceries => "Groceries & Household Supplies",
            Sector::Dining => "Dining & Cafés",
            Sector::Utilities => "Utilities & Bills",
            Sector::Transportation => "Transportation & Fuel",
            Sector::Auto => "Auto & Vehicle",
            Sector::Health => "Health & Pharma",
            Sector::PersonalCare => "Personal Care & Beauty",
            Sector::Entertainment => "Entertainment & Leisure",
            Sector::Education => "Education & Books",
            Sector::Apparel => "Apparel & Accessories",
            Sector::Electronics => "Electronics & Appliances",
            Sector::Home => "Home & Furnishings",
            Sector::Travel => "Travel & Accommodation",
            Sector::Finance => "Finance & Insurance",
            Sector::Miscellaneous => "Miscellaneous",
        }
    }

    /// Short label for narrow displays (chart axes, terminal columns)
    pub fn short_label(&self) -> &'static str {
        match self {
            Sector::Groceries => "Grocery",
            Sector::Dining => "Dining",
            Sector::Utilities => "Bills",
            Sector::Transportation => "Transport",
            Sector::Auto => "Auto",
            Sector::Health => "Health",
            Sector::PersonalCare => "Care",
            Sector::Entertainment => "Leisure",
            Sector::Education => "Books",
            Sector::Apparel => "Apparel",
            Sector::Electronics => "Tech",
            Sector::Home => "Home",
            Sector::Travel => "Travel",
            Sector::Finance => "Finance",
            Sector::Miscellaneous => "Misc",
        }
    }

    /// Resolve any label into the fixed set.
    ///
    /// Returns the sector and whether the label had to be guessed. Unknown
    /// labels fall back to `Miscellaneous` and are flagged as uncertain.
    pub fn resolve(label: &str) -> (Sector, bool) {
        match label.parse::<Sector>() {
            Ok(sector) => (sector, false),
            Err(_) => (Sector::Miscellaneous, true),
        }
    }

    /// Labels joined for use inside prompts: `"A", "B", ...`
    pub fn prompt_list() -> String {
        Sector::ALL
            .iter()
            .map(|s| format!("\"{}\"", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sector {
    type Err = UnknownSector;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();

        if let Some(sector) = Sector::ALL.iter().find(|sector| sector.as_str() == trimmed) {
            return Ok(*sector);
        }

        if let Some(sector) = Sector::ALL
            .iter()
            .find(|sector| sector.as_str().eq_ignore_ascii_case(trimmed))
        {
            return Ok(*sector);
        }

        let key = label_key(trimmed);
        if key.is_empty() {
            return Err(UnknownSector(s.to_string()));
        }

        Sector::ALL
            .iter()
            .find(|sector| label_key(sector.as_str()) == key)
            .copied()
            .ok_or_else(|| UnknownSector(s.to_string()))
    }
}

impl From<Sector> for &'static str {
    fn from(sector: Sector) -> Self {
        sector.as_str()
    }
}

impl TryFrom<String> for Sector {
    type Error = UnknownSector;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Comparison key: lowercase ASCII letters only, `&` spelled as "and",
/// accented or double-encoded `é` folded to `e`.
fn label_key(label: &str) -> String {
    let folded = label
        .replace("Ã©", "e")
        .replace(['é', 'É'], "e")
        .replace('&', " and ");

    folded
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
