//! Flat-file sink: one fully quoted CSV row per record.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use csv::{QuoteStyle, WriterBuilder};
use listingscout_shared::{ListingRecord, ListingScoutError, RECORD_COLUMNS, Result};
use tracing::{debug, info};

use crate::RecordSink;

/// Writes records as CSV with every field quoted, columns in [`RECORD_COLUMNS`] order.
pub struct CsvSink<W: Write = File> {
    writer: csv::Writer<W>,
}

impl CsvSink<File> {
    /// Create (or truncate) `path` and write the header row.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ListingScoutError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| ListingScoutError::io(path, e))?;
        info!(path = %path.display(), "writing CSV output");
        Self::from_writer(file)
    }
}

impl<W: Write> CsvSink<W> {
    /// Wrap any writer and emit the header row.
    pub fn from_writer(inner: W) -> Result<Self> {
        let mut writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .from_writer(inner);
        writer.write_record(RECORD_COLUMNS).map_err(csv_error)?;
        Ok(Self { writer })
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| ListingScoutError::Storage(format!("CSV flush failed: {}", e.error())))
    }

    fn write_rows(&mut self, records: &[ListingRecord]) -> Result<usize> {
        for record in records {
            self.writer.write_record(record.to_row()).map_err(csv_error)?;
        }
        self.writer
            .flush()
            .map_err(|e| ListingScoutError::Storage(format!("CSV flush failed: {e}")))?;
        debug!(rows = records.len(), "CSV rows written");
        Ok(records.len())
    }
}

#[async_trait]
impl<W: Write + Send> RecordSink for CsvSink<W> {
    async fn persist(&mut self, records: &[ListingRecord]) -> Result<usize> {
        self.write_rows(records)
    }
}

fn csv_error(e: csv::Error) -> ListingScoutError {
    ListingScoutError::Storage(format!("CSV write failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn header_and_quoted_rows() {
        let mut record = ListingRecord::empty("https://www.avito.ma/fr/maroc/a_1.htm");
        record.title = "Villa \"vue mer\"".into();
        record.equipments = vec!["Sécurité".into()];

        let mut sink = CsvSink::from_writer(Vec::new()).unwrap();
        assert_eq!(sink.persist(&[record.clone()]).await.unwrap(), 1);
        let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let mut lines = out.lines();

        assert_eq!(
            lines.next().unwrap(),
            r#""id","url","title","price","location","publication_time","seller","category","description","breadcrumb","properties","equipments","images""#
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with(&format!("\"{}\",", record.id)));
        assert!(row.contains(r#""Villa ""vue mer""""#));
        assert!(row.contains(r#""[""Sécurité""]""#));
        assert!(row.ends_with(r#""[]""#));
        assert!(lines.next().is_none());
    }

    #[tokio::test]
    async fn empty_batch_still_has_header() {
        let mut sink = CsvSink::from_writer(Vec::new()).unwrap();
        assert_eq!(sink.persist(&[]).await.unwrap(), 0);
        let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        assert_eq!(out.lines().count(), 1);
    }

    #[tokio::test]
    async fn create_writes_file() {
        let path = std::env::temp_dir().join(format!("ls_test_{}.csv", uuid::Uuid::now_v7()));
        let mut sink = CsvSink::create(&path).unwrap();
        sink.persist(&[ListingRecord::empty("https://www.avito.ma/fr/maroc/a_9.htm")])
            .await
            .unwrap();
        drop(sink);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("a_9.htm"));
        let _ = std::fs::remove_file(&path);
    }
}
