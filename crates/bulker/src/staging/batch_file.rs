//! In-memory batch file encoder.

use std::io::Write;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::Object;
use crate::error::{BulkerError, Result};

/// Row encoding of a batch file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Ndjson,
    Csv,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Ndjson => "ndjson",
            FileFormat::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCompression {
    #[default]
    None,
    Gzip,
}

enum Sink {
    Plain(Vec<u8>),
    Gzip(GzEncoder<Vec<u8>>),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Sink::Plain(v) => v.write(buf),
            Sink::Gzip(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Sink::Plain(v) => v.flush(),
            Sink::Gzip(e) => e.flush(),
        }
    }
}

/// Accumulates objects into one encoded, optionally compressed file.
///
/// CSV files carry a header row with the columns given at construction;
/// objects are written in that column order and unknown keys are dropped.
pub struct BatchFile {
    format: FileFormat,
    compression: FileCompression,
    columns: Vec<String>,
    sink: Sink,
    rows: u64,
}

impl BatchFile {
    pub fn new(format: FileFormat, compression: FileCompression, columns: Vec<String>) -> Result<Self> {
        if format == FileFormat::Csv && columns.is_empty() {
            return Err(BulkerError::Validation(
                "CSV batch files need at least one column".into(),
            ));
        }
        let sink = match compression {
            FileCompression::None => Sink::Plain(Vec::new()),
            FileCompression::Gzip => Sink::Gzip(GzEncoder::new(Vec::new(), Compression::default())),
        };
        let mut file = Self {
            format,
            compression,
            columns,
            sink,
            rows: 0,
        };
        if format == FileFormat::Csv {
            let header = file.columns.clone();
            file.write_csv_record(&header)?;
        }
        Ok(file)
    }

    /// Gzip-compressed NDJSON, the format HTTP import APIs accept.
    pub fn ndjson_gzip() -> Self {
        Self {
            format: FileFormat::Ndjson,
            compression: FileCompression::Gzip,
            columns: Vec::new(),
            sink: Sink::Gzip(GzEncoder::new(Vec::new(), Compression::default())),
            rows: 0,
        }
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn compression(&self) -> FileCompression {
        self.compression
    }

    /// Number of objects written so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// File name with the extensions matching format and compression.
    pub fn file_name(&self, base: &str) -> String {
        match self.compression {
            FileCompression::None => format!("{}.{}", base, self.format.extension()),
            FileCompression::Gzip => format!("{}.{}.gz", base, self.format.extension()),
        }
    }

    pub fn write(&mut self, object: &Object) -> Result<()> {
        match self.format {
            FileFormat::Ndjson => {
                serde_json::to_writer(&mut self.sink, object)?;
                self.sink.write_all(b"\n")?;
            }
            FileFormat::Csv => {
                let record: Vec<String> = self
                    .columns
                    .iter()
                    .map(|c| csv_cell(object.get(c)))
                    .collect();
                self.write_csv_record(&record)?;
            }
        }
        self.rows += 1;
        Ok(())
    }

    fn write_csv_record(&mut self, record: &[String]) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut self.sink);
        writer.write_record(record).map_err(std::io::Error::from)?;
        writer.flush()?;
        Ok(())
    }

    /// Close the encoder and return the file contents.
    pub fn finish(self) -> Result<Bytes> {
        let data = match self.sink {
            Sink::Plain(v) => v,
            Sink::Gzip(e) => e.finish()?,
        };
        Ok(Bytes::from(data))
    }
}

/// Nulls become empty cells; nested values are written as JSON.
fn csv_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use serde_json::json;
    use std::io::Read;

    fn object(value: Value) -> Object {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_ndjson_plain() {
        let mut file = BatchFile::new(FileFormat::Ndjson, FileCompression::None, vec![]).unwrap();
        file.write(&object(json!({"id": 1}))).unwrap();
        file.write(&object(json!({"id": 2, "name": "b"}))).unwrap();
        assert_eq!(file.rows(), 2);
        assert_eq!(file.file_name("batch"), "batch.ndjson");
        let bytes = file.finish().unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text, "{\"id\":1}\n{\"id\":2,\"name\":\"b\"}\n");
    }

    #[test]
    fn test_ndjson_gzip_decompresses() {
        let mut file = BatchFile::ndjson_gzip();
        file.write(&object(json!({"event": "signup"}))).unwrap();
        assert_eq!(file.file_name("batch"), "batch.ndjson.gz");
        let bytes = file.finish().unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);

        let mut decoded = String::new();
        GzDecoder::new(&bytes[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "{\"event\":\"signup\"}\n");
    }

    #[test]
    fn test_csv_header_and_cells() {
        let columns = vec!["id".to_string(), "name".to_string(), "tags".to_string()];
        let mut file = BatchFile::new(FileFormat::Csv, FileCompression::None, columns).unwrap();
        file.write(&object(json!({"id": 1, "name": "a, b", "tags": [1, 2]}))).unwrap();
        file.write(&object(json!({"id": 2, "name": null, "extra": true}))).unwrap();
        let text = String::from_utf8(file.finish().unwrap().to_vec()).unwrap();
        assert_eq!(text, "id,name,tags\n1,\"a, b\",\"[1,2]\"\n2,,\n");
    }

    #[test]
    fn test_csv_requires_columns() {
        let err = BatchFile::new(FileFormat::Csv, FileCompression::Gzip, vec![]).err().unwrap();
        assert!(matches!(err, BulkerError::Validation(_)));
    }
}
