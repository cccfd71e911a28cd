// Entity Models
//
// - Sector: the fixed 15-label spending classification
// - Vendor: shared vendor names with fuzzy matching

pub mod sector;
pub mod vendor;

pub use sector::{Sector, UnknownSector};
pub use vendor::{normalize_vendor_name, token_sort_ratio, Vendor, VendorMatcher};
