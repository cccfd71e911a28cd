// 🧾 Upload pipeline: image → OCR → extraction → categorization → storage
//
// Slow work (OCR, LLM calls, vendor verification) runs without the database
// lock; the lock is only taken to read vendors and to write the result.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::{info, warn};

use crate::categorize::{
    Categorization, CategorizationRequest, CategorizeError, Categorizer, DocumentKind,
};
use crate::dashboard::ManualEntry;
use crate::db::{self, NewTransaction, RawOcrRecord, SharedConnection, Transaction};
use crate::entities::{Vendor, VendorMatcher};
use crate::errors::Error;
use crate::extractor::{self, ExtractedFields};
use crate::ocr::{ImageUpload, OcrError, OcrProvider};

#[derive(Debug, ThisError)]
pub enum PipelineError {
    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error(transparent)]
    Categorize(#[from] CategorizeError),

    #[error("missing fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// What the client gets back for one upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub document_kind: DocumentKind,
    pub transactions: Vec<Transaction>,
    pub raw_data: RawData,
}

#[derive(Debug, Clone, Serialize)]
pub struct RawData {
    pub raw_ocr_id: String,
    pub ocr_text: String,
    pub llm_response: Option<String>,
}

pub struct ReceiptPipeline {
    ocr: Arc<dyn OcrProvider>,
    categorizer: Arc<dyn Categorizer>,
    vendors: VendorMatcher,
    default_currency: String,
}

impl ReceiptPipeline {
    pub fn new(ocr: Arc<dyn OcrProvider>, categorizer: Arc<dyn Categorizer>, default_currency: &str) -> Self {
        ReceiptPipeline {
            ocr,
            categorizer,
            vendors: VendorMatcher::new(),
            default_currency: default_currency.to_string(),
        }
    }

    pub fn ocr_name(&self) -> &str {
        self.ocr.name()
    }

    pub fn categorizer_name(&self) -> &str {
        self.categorizer.name()
    }

    /// Run one uploaded image through the whole pipeline and store the result
    pub async fn process(
        &self,
        db: &SharedConnection,
        user_id: &str,
        image: ImageUpload,
        kind: DocumentKind,
    ) -> Result<UploadResult, PipelineError> {
        info!(
            user_id,
            sha256 = %image.sha256,
            mime = image.format.mime_type(),
            provider = self.ocr.name(),
            kind = kind.as_str(),
            "Processing upload"
        );

        let output = self.ocr.recognize(&image).await?;
        let fields = extractor::extract(&output, kind);

        let request = CategorizationRequest {
            kind,
            ocr_text: output.text.clone(),
            fields: fields.clone(),
        };
        let outcome = self.categorizer.categorize(&request).await?;

        let drafts = self.merge(kind, &fields, &outcome.categorizations)?;

        // Vendor matching may call the LLM, so work on a snapshot
        let mut known = {
            let conn = db::lock(db)?;
            db::list_vendors(&conn)?
        };
        let mut new_vendors = Vec::new();
        let mut linked = Vec::with_capacity(drafts.len());

        for mut draft in drafts {
            match self
                .vendors
                .find_match(&draft.vendor, &known, self.categorizer.as_ref())
                .await
            {
                Some(vendor) => {
                    draft.vendor_id = Some(vendor.id);
                    draft.vendor = vendor.name;
                }
                None => {
                    let vendor = Vendor::new(&draft.vendor);
                    draft.vendor_id = Some(vendor.id.clone());
                    known.push(vendor.clone());
                    new_vendors.push(vendor);
                }
            }
            linked.push(draft);
        }

        let record = RawOcrRecord::new(
            user_id,
            &output.provider,
            &image.sha256,
            &output.text,
            output.payload.clone(),
            outcome.raw_response.clone(),
        );

        let transactions: Vec<Transaction> = linked
            .into_iter()
            .map(|draft| draft.into_transaction(user_id, Some(&record.id)))
            .collect();

        {
            let mut conn = db::lock(db)?;
            db::insert_upload(&mut conn, &record, &new_vendors, &transactions)?;
        }

        info!(
            user_id,
            raw_ocr_id = %record.id,
            transactions = transactions.len(),
            new_vendors = new_vendors.len(),
            "Upload stored"
        );

        Ok(UploadResult {
            document_kind: kind,
            transactions,
            raw_data: RawData {
                raw_ocr_id: record.id,
                ocr_text: record.ocr_text,
                llm_response: record.llm_response,
            },
        })
    }

    /// Combine categorizer output with extracted fields into storable drafts.
    ///
    /// A single categorization falls back to the extracted fields; when an
    /// SMS yields several, each must stand on its own and incomplete ones
    /// are dropped.
    fn merge(
        &self,
        kind: DocumentKind,
        fields: &ExtractedFields,
        categorizations: &[Categorization],
    ) -> Result<Vec<NewTransaction>, PipelineError> {
        let empty = ExtractedFields::default();
        let fallback = if categorizations.len() == 1 { fields } else { &empty };

        let mut drafts = Vec::new();
        let mut first_missing = None;

        for categorization in categorizations {
            match self.draft(kind, fallback, categorization) {
                Ok(draft) => drafts.push(draft),
                Err(missing) => {
                    warn!(missing = ?missing, "Dropping incomplete categorization");
                    first_missing.get_or_insert(missing);
                }
            }
        }

        if drafts.is_empty() {
            return Err(PipelineError::MissingFields(
                first_missing.unwrap_or_else(|| vec!["vendor", "date", "total"]),
            ));
        }

        Ok(drafts)
    }

    fn draft(
        &self,
        kind: DocumentKind,
        fields: &ExtractedFields,
        categorization: &Categorization,
    ) -> Result<NewTransaction, Vec<&'static str>> {
        let vendor = categorization
            .vendor
            .clone()
            .or_else(|| fields.vendor.clone())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let date = categorization.date.or(fields.date);
        let total = categorization.total.or(fields.total).filter(|t| t.is_finite() && *t >= 0.0);

        let (vendor, date, total) = match (vendor, date, total) {
            (Some(vendor), Some(date), Some(total)) => (vendor, date, total),
            (vendor, date, total) => {
                let mut missing = Vec::new();
                if vendor.is_none() {
                    missing.push("vendor");
                }
                if date.is_none() {
                    missing.push("date");
                }
                if total.is_none() {
                    missing.push("total");
                }
                return Err(missing);
            }
        };

        let currency = categorization
            .currency
            .clone()
            .or_else(|| fields.currency.clone())
            .unwrap_or_else(|| self.default_currency.clone())
            .to_uppercase();

        Ok(NewTransaction {
            vendor_id: None,
            vendor,
            date,
            total,
            currency,
            sector: categorization.sector,
            uncertain_category: categorization.uncertain_category,
            transaction_type: kind.transaction_type(),
            items: match kind {
                DocumentKind::Receipt => fields.items.clone(),
                DocumentKind::Sms => Vec::new(),
            },
        })
    }

    /// Store a manually entered transaction, linking it to a known vendor
    pub async fn record_manual(
        &self,
        db: &SharedConnection,
        user_id: &str,
        entry: ManualEntry,
    ) -> Result<Transaction, Error> {
        let mut draft = entry.validate(&self.default_currency)?;

        let known = {
            let conn = db::lock(db)?;
            db::list_vendors(&conn)?
        };
        let matched = self
            .vendors
            .find_match(&draft.vendor, &known, self.categorizer.as_ref())
            .await;

        let new_vendor = match matched {
            Some(vendor) => {
                draft.vendor_id = Some(vendor.id);
                draft.vendor = vendor.name;
                None
            }
            None => {
                let vendor = Vendor::new(&draft.vendor);
                draft.vendor_id = Some(vendor.id.clone());
                Some(vendor)
            }
        };

        let tx = draft.into_transaction(user_id, None);

        {
            let mut conn = db::lock(db)?;
            let sql_tx = conn.transaction().map_err(anyhow::Error::from)?;
            if let Some(vendor) = &new_vendor {
                db::insert_vendor(&sql_tx, vendor)?;
            }
            db::insert_transaction(&sql_tx, &tx)?;
            sql_tx.commit().map_err(anyhow::Error::from)?;
        }

        info!(user_id, transaction_id = %tx.id, "Manual transaction recorded");
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorize::{CategorizationOutcome, RuleCategorizer, TransactionType};
    use crate::db::{TransactionFilter, User};
    use crate::entities::Sector;
    use crate::ocr::StaticOcr;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rusqlite::Connection;

    const PNG: [u8; 12] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    const RECEIPT: &str = "STARBUCKS COFFEE\nSeef Mall\n12/03/2025\nCaffe Latte 1.900\nMuffin 1.200\nTOTAL BHD 3.100";

    fn setup() -> (SharedConnection, User) {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        let user = User::new("sara@example.com", "hash".to_string(), "Sara", "Ali");
        db::create_user(&conn, &user).unwrap();
        (db::shared(conn), user)
    }

    fn pipeline(text: &str) -> ReceiptPipeline {
        ReceiptPipeline::new(
            Arc::new(StaticOcr::from_text(text)),
            Arc::new(RuleCategorizer::new()),
            "BHD",
        )
    }

    /// Categorizer that always returns the same categorizations
    struct FixedCategorizer {
        categorizations: Vec<Categorization>,
    }

    #[async_trait]
    impl Categorizer for FixedCategorizer {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn categorize(
            &self,
            _request: &CategorizationRequest,
        ) -> Result<CategorizationOutcome, CategorizeError> {
            Ok(CategorizationOutcome {
                categorizations: self.categorizations.clone(),
                raw_response: Some("fixed response".to_string()),
            })
        }

        async fn same_vendor(&self, _candidate: &str, _existing: &str) -> Result<bool, CategorizeError> {
            Ok(false)
        }
    }

    fn categorization(vendor: Option<&str>, day: u32, total: Option<f64>) -> Categorization {
        Categorization {
            vendor: vendor.map(str::to_string),
            date: NaiveDate::from_ymd_opt(2025, 2, day),
            total,
            currency: None,
            sector: Sector::Dining,
            uncertain_category: false,
        }
    }

    const SMS: &str =
        "BBK Alert\nYour card ending 1234 was used for BHD 9.999 at FALLBACK STORE on 01/01/2025.";

    fn sms_pipeline(categorizations: Vec<Categorization>) -> ReceiptPipeline {
        ReceiptPipeline::new(
            Arc::new(StaticOcr::from_text(SMS)),
            Arc::new(FixedCategorizer { categorizations }),
            "BHD",
        )
    }

    fn image() -> ImageUpload {
        ImageUpload::from_bytes(PNG.to_vec(), Some("receipt.png".to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_receipt_upload_is_stored() {
        let (db, user) = setup();
        let result = pipeline(RECEIPT)
            .process(&db, &user.id, image(), DocumentKind::Receipt)
            .await
            .unwrap();

        assert_eq!(result.transactions.len(), 1);
        let tx = &result.transactions[0];
        assert_eq!(tx.vendor, "STARBUCKS COFFEE");
        assert_eq!(tx.date, NaiveDate::from_ymd_opt(2025, 3, 12).unwrap());
        assert_eq!(tx.total, 3.1);
        assert_eq!(tx.currency, "BHD");
        assert_eq!(tx.sector, Sector::Dining);
        assert_eq!(tx.transaction_type, TransactionType::Receipt);
        assert_eq!(tx.raw_ocr_id.as_deref(), Some(result.raw_data.raw_ocr_id.as_str()));

        let conn = db::lock(&db).unwrap();
        let stored = db::get_transaction(&conn, &user.id, &tx.id).unwrap().unwrap();
        assert_eq!(&stored, tx);
        let record = db::get_raw_ocr_record(&conn, &result.raw_data.raw_ocr_id).unwrap().unwrap();
        assert_eq!(record.ocr_text, result.raw_data.ocr_text);
        assert_eq!(db::list_vendors(&conn).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_repeat_vendor_is_linked() {
        let (db, user) = setup();
        let pipeline = pipeline(RECEIPT);

        let first = pipeline
            .process(&db, &user.id, image(), DocumentKind::Receipt)
            .await
            .unwrap();
        let second = pipeline
            .process(&db, &user.id, image(), DocumentKind::Receipt)
            .await
            .unwrap();

        assert_eq!(first.transactions[0].vendor_id, second.transactions[0].vendor_id);
        assert_eq!(db::list_vendors(&*db::lock(&db).unwrap()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_total_is_rejected() {
        let (db, user) = setup();
        let err = pipeline("CORNER SHOP\n12/03/2025\nthank you")
            .process(&db, &user.id, image(), DocumentKind::Receipt)
            .await
            .unwrap_err();

        match err {
            PipelineError::MissingFields(fields) => assert_eq!(fields, vec!["total"]),
            other => panic!("unexpected error: {other}"),
        }

        let conn = db::lock(&db).unwrap();
        assert_eq!(db::count_transactions(&conn, &user.id).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sms_with_several_transactions() {
        let (db, user) = setup();
        let pipeline = sms_pipeline(vec![
            categorization(Some("Talabat"), 4, Some(5.5)),
            // Would be completed from the extracted SMS fields if fallback applied
            categorization(None, 5, Some(1.0)),
            categorization(Some("TALABAT"), 6, Some(3.2)),
        ]);

        let result = pipeline
            .process(&db, &user.id, image(), DocumentKind::Sms)
            .await
            .unwrap();

        assert_eq!(result.document_kind, DocumentKind::Sms);
        assert_eq!(result.transactions.len(), 2);
        assert_eq!(result.raw_data.llm_response.as_deref(), Some("fixed response"));

        let raw_ocr_id = result.raw_data.raw_ocr_id.as_str();
        for tx in &result.transactions {
            assert_eq!(tx.raw_ocr_id.as_deref(), Some(raw_ocr_id));
            assert_eq!(tx.transaction_type, TransactionType::Sms);
            assert_eq!(tx.currency, "BHD");
            assert!(tx.items.is_empty());
            assert_ne!(tx.vendor, "FALLBACK STORE");
        }

        let totals: Vec<f64> = result.transactions.iter().map(|tx| tx.total).collect();
        assert_eq!(totals, vec![5.5, 3.2]);
        assert_eq!(result.transactions[0].vendor_id, result.transactions[1].vendor_id);
        assert_eq!(result.transactions[1].vendor, "Talabat");

        let conn = db::lock(&db).unwrap();
        assert_eq!(db::count_transactions(&conn, &user.id).unwrap(), 2);
        assert_eq!(db::list_vendors(&conn).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sms_with_only_incomplete_transactions_is_rejected() {
        let (db, user) = setup();
        let pipeline = sms_pipeline(vec![
            categorization(None, 4, Some(5.5)),
            categorization(Some("Talabat"), 5, None),
        ]);

        let err = pipeline
            .process(&db, &user.id, image(), DocumentKind::Sms)
            .await
            .unwrap_err();

        match err {
            PipelineError::MissingFields(fields) => assert_eq!(fields, vec!["vendor"]),
            other => panic!("unexpected error: {other}"),
        }

        let conn = db::lock(&db).unwrap();
        assert_eq!(db::count_transactions(&conn, &user.id).unwrap(), 0);
        assert!(db::list_vendors(&conn).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_ocr_is_low_confidence() {
        let (db, user) = setup();
        let err = pipeline("")
            .process(&db, &user.id, image(), DocumentKind::Receipt)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Ocr(OcrError::LowConfidence { .. })));
    }

    #[tokio::test]
    async fn test_manual_entry_is_retrievable() {
        let (db, user) = setup();
        let entry = ManualEntry {
            vendor: "Costa Coffee".to_string(),
            date: "2025-02-03".to_string(),
            total: 1.9,
            currency: None,
            sector: "Dining & Cafés".to_string(),
            items: vec![],
        };

        let tx = pipeline(RECEIPT).record_manual(&db, &user.id, entry).await.unwrap();
        assert_eq!(tx.transaction_type, TransactionType::Manual);
        assert!(tx.raw_ocr_id.is_none());
        assert!(tx.vendor_id.is_some());

        let conn = db::lock(&db).unwrap();
        let history = db::query_transactions(&conn, &user.id, &TransactionFilter::default()).unwrap();
        assert_eq!(history, vec![tx]);
    }

    #[tokio::test]
    async fn test_manual_entry_validation_error() {
        let (db, user) = setup();
        let entry = ManualEntry {
            vendor: "Costa".to_string(),
            date: "2025-02-03".to_string(),
            total: 1.0,
            currency: None,
            sector: "Space Travel".to_string(),
            items: vec![],
        };

        let err = pipeline(RECEIPT).record_manual(&db, &user.id, entry).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }
}
