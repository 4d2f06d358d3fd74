//! Artifact encodings.

use curator_types::Row;

/// Serializes rows into an artifact body and back.
pub trait RowEncoder: Send + Sync {
    /// File extension without the dot.
    fn extension(&self) -> &'static str;

    /// Encode `rows` under a header of `columns`.
    ///
    /// # Errors
    ///
    /// Returns a message describing the encoding failure.
    fn encode(&self, columns: &[String], rows: &[Row]) -> Result<Vec<u8>, String>;

    /// Decode an artifact body into its header and rows.
    ///
    /// # Errors
    ///
    /// Returns a message describing the decoding failure.
    fn decode(&self, body: &[u8]) -> Result<(Vec<String>, Vec<Row>), String>;
}

/// CSV with a header row. Nulls are written as empty fields and read back
/// as nulls.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvEncoder;

impl RowEncoder for CsvEncoder {
    fn extension(&self) -> &'static str {
        "csv"
    }

    fn encode(&self, columns: &[String], rows: &[Row]) -> Result<Vec<u8>, String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(columns).map_err(|e| e.to_string())?;
        for row in rows {
            writer
                .write_record(row.values().iter().map(|v| v.as_deref().unwrap_or("")))
                .map_err(|e| e.to_string())?;
        }
        writer.into_inner().map_err(|e| e.to_string())
    }

    fn decode(&self, body: &[u8]) -> Result<(Vec<String>, Vec<Row>), String> {
        let mut reader = csv::Reader::from_reader(body);
        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| e.to_string())?
            .iter()
            .map(str::to_string)
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| e.to_string())?;
            rows.push(Row::new(
                record
                    .iter()
                    .map(|v| (!v.is_empty()).then(|| v.to_string()))
                    .collect(),
            ));
        }
        Ok((columns, rows))
    }
}
