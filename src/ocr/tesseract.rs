// Local OCR through the `tesseract` command-line engine.
//
// The image is piped on stdin and word-level TSV is read back from stdout:
//   level page_num block_num par_num line_num word_num left top width height conf text
// Words are grouped into lines by (page, block, paragraph, line).

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{ImageUpload, OcrError, OcrFields, OcrLine, OcrOutput, OcrProvider};

pub struct TesseractOcr {
    binary: String,
    language: String,
    /// Words at or below this confidence (0.0 - 1.0) are dropped
    min_confidence: f32,
}

impl TesseractOcr {
    pub fn new(binary: &str, language: &str, min_confidence: f32) -> Self {
        TesseractOcr {
            binary: binary.to_string(),
            language: language.to_string(),
            min_confidence,
        }
    }

    async fn run(&self, image: &ImageUpload) -> anyhow::Result<String> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", &self.language, "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.binary))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("tesseract stdin unavailable"))?;
        stdin
            .write_all(&image.bytes)
            .await
            .context("Failed to write image to tesseract")?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for tesseract")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("tesseract exited with {}: {}", output.status, stderr.trim()));
        }

        String::from_utf8(output.stdout).context("tesseract produced non UTF-8 output")
    }
}

#[async_trait]
impl OcrProvider for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, image: &ImageUpload) -> Result<OcrOutput, OcrError> {
        let tsv = self.run(image).await.map_err(|e| OcrError::provider("tesseract", e))?;

        let lines = parse_tsv(&tsv, self.min_confidence).map_err(|e| OcrError::provider("tesseract", e))?;
        debug!(lines = lines.len(), sha256 = %image.sha256, "Tesseract recognized lines");

        if lines.is_empty() {
            return Err(OcrError::LowConfidence {
                min_confidence: self.min_confidence,
            });
        }

        let payload = serde_json::json!({
            "engine": "tesseract",
            "language": self.language,
            "min_confidence": self.min_confidence,
        });

        Ok(OcrOutput::from_lines("tesseract", lines, OcrFields::default(), payload))
    }
}

#[derive(Debug, Deserialize)]
struct TsvRow {
    level: u32,
    page_num: u32,
    block_num: u32,
    par_num: u32,
    line_num: u32,
    conf: f32,
    #[serde(default)]
    text: String,
}

/// Parse tesseract TSV into lines, keeping only confident words
pub fn parse_tsv(tsv: &str, min_confidence: f32) -> anyhow::Result<Vec<OcrLine>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .from_reader(tsv.as_bytes());

    let mut lines: Vec<OcrLine> = Vec::new();
    let mut current_key: Option<(u32, u32, u32, u32)> = None;
    let mut words: Vec<String> = Vec::new();
    let mut confidences: Vec<f32> = Vec::new();

    let mut flush = |words: &mut Vec<String>, confidences: &mut Vec<f32>| {
        if !words.is_empty() {
            let confidence = confidences.iter().sum::<f32>() / confidences.len() as f32;
            lines.push(OcrLine {
                text: words.join(" "),
                confidence,
            });
        }
        words.clear();
        confidences.clear();
    };

    for result in reader.deserialize() {
        let row: TsvRow = result.context("Failed to parse tesseract TSV row")?;

        // Level 5 rows are words; the rest are layout containers
        if row.level != 5 {
            continue;
        }

        let key = (row.page_num, row.block_num, row.par_num, row.line_num);
        if current_key != Some(key) {
            flush(&mut words, &mut confidences);
            current_key = Some(key);
        }

        let text = row.text.trim();
        let confidence = row.conf / 100.0;
        if text.is_empty() || confidence <= min_confidence {
            continue;
        }

        words.push(text.to_string());
        confidences.push(confidence);
    }
    flush(&mut words, &mut confidences);

    Ok(lines)
}
