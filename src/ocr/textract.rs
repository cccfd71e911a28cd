// AWS Textract AnalyzeExpense adapter.
//
// Summary fields we use:
//   VENDOR_NAME          → vendor
//   INVOICE_RECEIPT_DATE → date
//   TOTAL                → total
// Each line item's first field is its name, its last field the price.
//
// The SDK response is first converted into `ExpenseDocument` so the mapping
// can be exercised without AWS.

use serde::{Deserialize, Serialize};

use super::{OcrFields, OcrLine, OcrLineItem};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpenseField {
    /// Normalized Textract type (VENDOR_NAME, TOTAL, ITEM, PRICE, ...)
    pub kind: Option<String>,
    pub label: Option<String>,
    pub value: Option<String>,
    /// 0 - 100 as reported by Textract
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpenseDocument {
    pub summary_fields: Vec<ExpenseField>,
    pub line_items: Vec<Vec<ExpenseField>>,
}

/// Map the first expense document into structured fields
pub fn parse_expense(documents: &[ExpenseDocument]) -> OcrFields {
    let Some(doc) = documents.first() else {
        return OcrFields::default();
    };

    let summary = |kind: &str| -> Option<String> {
        doc.summary_fields
            .iter()
            .filter(|f| f.kind.as_deref() == Some(kind))
            .filter_map(|f| f.value.as_deref())
            .map(str::trim)
            .find(|v| !v.is_empty())
            .map(str::to_string)
    };

    let items = doc
        .line_items
        .iter()
        .filter_map(|fields| {
            let name = fields.first()?.value.as_deref()?.trim();
            if name.is_empty() {
                return None;
            }
            let price = if fields.len() > 1 {
                fields.last().and_then(|f| f.value.clone())
            } else {
                None
            };
            Some(OcrLineItem {
                name: name.to_string(),
                price,
            })
        })
        .collect();

    OcrFields {
        vendor: summary("VENDOR_NAME"),
        date: summary("INVOICE_RECEIPT_DATE"),
        total: summary("TOTAL"),
        items,
    }
}

/// Flatten every detected value into text lines, dropping unconfident ones
pub fn expense_lines(documents: &[ExpenseDocument], min_confidence: f32) -> Vec<OcrLine> {
    let mut lines = Vec::new();

    for doc in documents {
        for field in &doc.summary_fields {
            if let Some(line) = field_line(field, min_confidence) {
                lines.push(line);
            }
        }

        for item in &doc.line_items {
            let kept: Vec<(String, f32)> = item
                .iter()
                .filter_map(|f| {
                    let value = f.value.as_deref()?.trim();
                    let confidence = f.confidence.unwrap_or(0.0) / 100.0;
                    (!value.is_empty() && confidence > min_confidence)
                        .then(|| (value.to_string(), confidence))
                })
                .collect();

            if !kept.is_empty() {
                let confidence = kept.iter().map(|(_, c)| c).sum::<f32>() / kept.len() as f32;
                let text = kept.into_iter().map(|(v, _)| v).collect::<Vec<_>>().join(" ");
                lines.push(OcrLine { text, confidence });
            }
        }
    }

    lines
}

fn field_line(field: &ExpenseField, min_confidence: f32) -> Option<OcrLine> {
    let value = field.value.as_deref()?.trim();
    let confidence = field.confidence.unwrap_or(0.0) / 100.0;
    if value.is_empty() || confidence <= min_confidence {
        return None;
    }

    let text = match field.label.as_deref().map(str::trim) {
        Some(label) if !label.is_empty() => format!("{} {}", label, value),
        _ => value.to_string(),
    };

    Some(OcrLine { text, confidence })
}

#[cfg(feature = "textract")]
mod client {
    use async_trait::async_trait;
    use aws_sdk_textract::primitives::Blob;
    use aws_sdk_textract::types::Document;
    use tracing::debug;

    use super::{expense_lines, parse_expense, ExpenseDocument, ExpenseField};
    use crate::ocr::{ImageUpload, OcrError, OcrOutput, OcrProvider};

    pub struct TextractOcr {
        client: aws_sdk_textract::Client,
        min_confidence: f32,
    }

    impl TextractOcr {
        /// Client configured from the standard AWS environment (credentials, profile, region)
        pub async fn from_env(region: Option<String>, min_confidence: f32) -> Self {
            let mut loader = aws_config::from_env();
            if let Some(region) = region {
                loader = loader.region(aws_config::Region::new(region));
            }
            let config = loader.load().await;

            TextractOcr {
                client: aws_sdk_textract::Client::new(&config),
                min_confidence,
            }
        }
    }

    fn convert_field(field: &aws_sdk_textract::types::ExpenseField) -> ExpenseField {
        ExpenseField {
            kind: field.r#type().and_then(|t| t.text()).map(str::to_string),
            label: field.label_detection().and_then(|d| d.text()).map(str::to_string),
            value: field.value_detection().and_then(|d| d.text()).map(str::to_string),
            confidence: field.value_detection().and_then(|d| d.confidence()),
        }
    }

    fn convert_document(doc: &aws_sdk_textract::types::ExpenseDocument) -> ExpenseDocument {
        ExpenseDocument {
            summary_fields: doc.summary_fields().iter().map(convert_field).collect(),
            line_items: doc
                .line_item_groups()
                .iter()
                .flat_map(|group| group.line_items())
                .map(|item| item.line_item_expense_fields().iter().map(convert_field).collect())
                .collect(),
        }
    }

    #[async_trait]
    impl OcrProvider for TextractOcr {
        fn name(&self) -> &str {
            "textract"
        }

        async fn recognize(&self, image: &ImageUpload) -> Result<OcrOutput, OcrError> {
            let document = Document::builder().bytes(Blob::new(image.bytes.clone())).build();

            let response = self
                .client
                .analyze_expense()
                .document(document)
                .send()
                .await
                .map_err(|e| OcrError::provider("textract", e))?;

            let documents: Vec<ExpenseDocument> =
                response.expense_documents().iter().map(convert_document).collect();
            debug!(documents = documents.len(), sha256 = %image.sha256, "Textract analyzed expense");

            let fields = parse_expense(&documents);
            let lines = expense_lines(&documents, self.min_confidence);

            if lines.is_empty() && fields.total.is_none() {
                return Err(OcrError::LowConfidence {
                    min_confidence: self.min_confidence,
                });
            }

            let payload = serde_json::to_value(&documents).unwrap_or(serde_json::Value::Null);
            Ok(OcrOutput::from_lines("textract", lines, fields, payload))
        }
    }
}

#[cfg(feature = "textract")]
pub use client::TextractOcr;
