// Receipt Tracker - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod api;
pub mod auth;
pub mod categorize;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod entities;
pub mod errors;
pub mod extractor;
pub mod ocr;
pub mod pipeline;
pub mod rules;
pub mod telemetry;

// Re-export commonly used types
pub use api::{router, AppState};
pub use categorize::{
    build_categorizer, Categorization, Categorizer, DocumentKind, OpenAiCategorizer, RuleCategorizer,
    TransactionType,
};
pub use config::{Args, Config};
pub use dashboard::{export_csv, summarize, FilterParams, ManualEntry, Summary};
pub use db::{
    open_database, query_transactions, setup_database, Event, NewTransaction, RawOcrRecord, SharedConnection,
    Transaction, TransactionFilter, User,
};
pub use entities::{Sector, Vendor, VendorMatcher};
pub use errors::Error;
pub use extractor::{extract, ExtractedFields, LineItem};
pub use ocr::{build_provider, ImageUpload, OcrOutput, OcrProvider, StaticOcr};
pub use pipeline::{PipelineError, ReceiptPipeline, UploadResult};
pub use rules::{ClassificationResult, RuleEngine, SectorRule};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
