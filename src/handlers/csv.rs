use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;

use csv::{ByteRecord, ReaderBuilder};

use crate::models::*;

/// Where a job's bytes come from. Every variant can be opened more than once,
/// which is what makes the pre-count pass possible.
#[derive(Debug, Clone)]
pub enum ImportSource {
    Path(PathBuf),
    Bytes { name: String, data: Arc<[u8]> },
}

impl ImportSource {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        ImportSource::Bytes { name: name.into(), data: data.into().into() }
    }

    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        match self {
            ImportSource::Path(path) => Ok(Box::new(BufReader::new(File::open(path)?))),
            ImportSource::Bytes { data, .. } => Ok(Box::new(Cursor::new(data.clone()))),
        }
    }

    pub fn file_name(&self) -> String {
        match self {
            ImportSource::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            ImportSource::Bytes { name, .. } => name.clone(),
        }
    }

    pub fn size_bytes(&self) -> Option<u64> {
        match self {
            ImportSource::Path(path) => std::fs::metadata(path).ok().map(|m| m.len()),
            ImportSource::Bytes { data, .. } => Some(data.len() as u64),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub delimiter: u8,
    /// Fail on the first malformed row instead of padding/truncating it.
    pub strict: bool,
    /// Hard cap on data rows; rows past it are never read.
    pub row_ceiling: Option<u64>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self { delimiter: b',', strict: false, row_ceiling: None }
    }
}

/// Lazy CSV row reader. Yields one [`RawRow`] per data line in file order.
pub struct CsvRowDecoder {
    reader: csv::Reader<Box<dyn Read + Send>>,
    headers: Arc<[String]>,
    options: DecodeOptions,
    record: ByteRecord,
    rows_read: u64,
    done: bool,
    truncated: bool,
}

impl CsvRowDecoder {
    pub fn open(source: &ImportSource, options: DecodeOptions) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(source.open()?);

        let headers: Vec<String> = reader
            .byte_headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let h = String::from_utf8_lossy(h);
                let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { &h };
                h.trim().to_string()
            })
            .collect();

        tracing::debug!(
            source = %source.file_name(),
            columns = headers.len(),
            strict = options.strict,
            "Opened CSV source"
        );

        Ok(Self {
            reader,
            headers: headers.into(),
            options,
            record: ByteRecord::new(),
            rows_read: 0,
            done: false,
            truncated: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Bytes consumed so far, used to extrapolate a row estimate.
    pub fn bytes_read(&self) -> u64 {
        self.reader.position().byte()
    }

    /// True once the ceiling has cut the stream short, i.e. a record exists past it.
    pub fn hit_ceiling(&self) -> bool {
        self.truncated
    }

    fn shape(&self, line: u64) -> Result<Vec<String>> {
        let width = self.headers.len();
        let mut values: Vec<String> =
            self.record.iter().map(|v| String::from_utf8_lossy(v).into_owned()).collect();

        if values.len() != width {
            if self.options.strict {
                return Err(ImportError::Decode {
                    line,
                    message: format!("expected {} fields, found {}", width, values.len()),
                });
            }
            values.resize(width, String::new());
        }
        Ok(values)
    }
}

impl Iterator for CsvRowDecoder {
    type Item = Result<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if matches!(self.options.row_ceiling, Some(max) if self.rows_read >= max) {
            self.done = true;
            self.truncated = matches!(self.reader.read_byte_record(&mut self.record), Ok(true));
            return None;
        }

        match self.reader.read_byte_record(&mut self.record) {
            Ok(false) => {
                self.done = true;
                None
            }
            Ok(true) => {
                self.rows_read += 1;
                let line = self.rows_read;
                Some(self.shape(line).map(|values| RawRow::new(line, self.headers.clone(), values)))
            }
            Err(e) => {
                // the reader cannot resync after an I/O failure
                self.done = true;
                Some(Err(ImportError::Decode { line: self.rows_read + 1, message: e.to_string() }))
            }
        }
    }
}

/// Count data rows without shaping them, bounded by the ceiling.
pub fn count_rows(source: &ImportSource, options: &DecodeOptions) -> Result<u64> {
    let mut reader = ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(source.open()?);

    let mut record = ByteRecord::new();
    let mut count = 0u64;
    while reader.read_byte_record(&mut record)? {
        count += 1;
        if matches!(options.row_ceiling, Some(max) if count >= max) {
            break;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(text: &str) -> ImportSource {
        ImportSource::from_bytes("test.csv", text.as_bytes().to_vec())
    }

    #[test]
    fn decodes_rows_in_order_and_strips_bom() {
        let src = source("\u{feff}ean,name\n123,Widget\n456,Gadget\n");
        let decoder = CsvRowDecoder::open(&src, DecodeOptions::default()).unwrap();
        assert_eq!(decoder.headers(), &["ean".to_string(), "name".to_string()]);

        let rows: Vec<RawRow> = decoder.map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].line, 1);
        assert_eq!(rows[1].get("name"), Some("Gadget"));
    }

    #[test]
    fn permissive_mode_pads_and_truncates() {
        let src = source("a,b,c\n1,2\n1,2,3,4\n");
        let rows: Vec<RawRow> =
            CsvRowDecoder::open(&src, DecodeOptions::default()).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rows[0].len(), 3);
        assert_eq!(rows[0].get("c"), Some(""));
        assert_eq!(rows[1].len(), 3);
        assert_eq!(rows[1].get("c"), Some("3"));
    }

    #[test]
    fn strict_mode_reports_line() {
        let src = source("a,b\n1,2\n3\n");
        let opts = DecodeOptions { strict: true, ..Default::default() };
        let results: Vec<Result<RawRow>> = CsvRowDecoder::open(&src, opts).unwrap().collect();
        assert!(results[0].is_ok());
        match &results[1] {
            Err(ImportError::Decode { line, .. }) => assert_eq!(*line, 2),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn ceiling_bounds_decode_and_count() {
        let src = source("a\n1\n2\n3\n4\n5\n");
        let opts = DecodeOptions { row_ceiling: Some(3), ..Default::default() };
        let mut decoder = CsvRowDecoder::open(&src, opts.clone()).unwrap();
        assert_eq!(decoder.by_ref().count(), 3);
        assert!(decoder.hit_ceiling());
        assert_eq!(count_rows(&src, &opts).unwrap(), 3);
        assert_eq!(count_rows(&src, &DecodeOptions::default()).unwrap(), 5);
    }

    #[test]
    fn ceiling_equal_to_row_count_is_not_a_cut() {
        let src = source("a\n1\n2\n3\n");
        let opts = DecodeOptions { row_ceiling: Some(3), ..Default::default() };
        let mut decoder = CsvRowDecoder::open(&src, opts).unwrap();
        assert_eq!(decoder.by_ref().count(), 3);
        assert!(!decoder.hit_ceiling());
    }

    #[test]
    fn source_can_be_reopened() {
        let src = source("a\n1\n");
        let first = CsvRowDecoder::open(&src, DecodeOptions::default()).unwrap().count();
        let second = CsvRowDecoder::open(&src, DecodeOptions::default()).unwrap().count();
        assert_eq!(first, second);
    }

    #[test]
    fn custom_delimiter() {
        let src = source("ean;cost\n1;2,50\n");
        let opts = DecodeOptions { delimiter: b';', ..Default::default() };
        let row = CsvRowDecoder::open(&src, opts).unwrap().next().unwrap().unwrap();
        assert_eq!(row.get("cost"), Some("2,50"));
    }
}
