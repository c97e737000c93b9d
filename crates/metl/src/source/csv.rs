//! CSV row source.

use std::fs::File;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use super::RowSource;
use crate::core::RawRow;
use crate::error::{MetlError, Result};

/// Options for the `csv` parse engine.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CsvOptions {
    /// Preamble records to skip before the header or first data row.
    #[serde(default)]
    pub skip: usize,

    /// Use the first (post-skip) record as field names.
    #[serde(default)]
    pub header: bool,
}

/// CSV source. Fields are named from the header row when enabled, otherwise
/// (and for any fields beyond the header) by 1-based position.
pub struct CsvSource {
    options: CsvOptions,
    reader: Option<csv::Reader<File>>,
    header: Vec<String>,
    record: csv::ByteRecord,
    current: RawRow,
}

impl CsvSource {
    pub fn new(options: CsvOptions) -> Self {
        Self {
            options,
            reader: None,
            header: Vec::new(),
            record: csv::ByteRecord::new(),
            current: RawRow::new(),
        }
    }

    fn field_name(&self, index: usize) -> String {
        self.header
            .get(index)
            .cloned()
            .unwrap_or_else(|| (index + 1).to_string())
    }
}

/// Input is not required to be UTF-8; invalid sequences become U+FFFD.
fn decode(field: &[u8]) -> String {
    String::from_utf8_lossy(field).into_owned()
}

impl RowSource for CsvSource {
    fn open(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path).map_err(|e| {
            warn!(parser = "csv", file = %path.display(), error = %e, "Unable to open input");
            MetlError::transport(path.display().to_string(), e)
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        if self.options.skip > 0 {
            debug!(parser = "csv", rows = self.options.skip, "Skipping preamble rows");
            let mut scratch = csv::ByteRecord::new();
            for _ in 0..self.options.skip {
                match reader.read_byte_record(&mut scratch) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => warn!(parser = "csv", error = %e, "Unreadable preamble row"),
                }
            }
        }

        if self.options.header {
            debug!(parser = "csv", "Using first row as header input");
            let mut header = csv::ByteRecord::new();
            match reader.read_byte_record(&mut header) {
                Ok(true) => self.header = header.iter().map(decode).collect(),
                Ok(false) => {}
                Err(e) => warn!(parser = "csv", error = %e, "Unreadable header row"),
            }
        }

        self.reader = Some(reader);
        Ok(())
    }

    fn advance(&mut self) -> bool {
        let Some(reader) = self.reader.as_mut() else {
            return false;
        };

        match reader.read_byte_record(&mut self.record) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                warn!(parser = "csv", error = %e, "Stopping at unreadable record");
                return false;
            }
        }

        let mut row = RawRow::new();
        for (index, value) in self.record.iter().enumerate() {
            row.insert(self.field_name(index), decode(value));
        }
        self.current = row;
        true
    }

    fn row(&mut self) -> RawRow {
        std::mem::take(&mut self.current)
    }

    fn close(&mut self) {
        self.reader = None;
    }

    fn name(&self) -> &'static str {
        "csv"
    }
}
