use crate::handlers::CsvRowDecoder;
use crate::mapping::FieldMapper;
use crate::models::*;

/// Mapped records for one unit of work plus the rows that did not survive
/// decoding or mapping. Rows stay in file order.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub index: u64,
    pub records: Vec<MappedRecord>,
    pub rejected: Vec<JobError>,
    /// Source bytes consumed once this chunk was filled.
    pub bytes_read: u64,
}

impl Chunk {
    pub fn rows(&self) -> u64 {
        (self.records.len() + self.rejected.len()) as u64
    }
}

/// Pulls rows from the decoder, maps them and groups them into chunks of at
/// most `chunk_size` rows.
pub struct Chunker {
    decoder: CsvRowDecoder,
    mapper: FieldMapper,
    chunk_size: usize,
    strict: bool,
    next_index: u64,
    finished: bool,
}

impl Chunker {
    pub fn new(decoder: CsvRowDecoder, mapper: FieldMapper, chunk_size: usize, strict: bool) -> Self {
        Self { decoder, mapper, chunk_size: chunk_size.max(1), strict, next_index: 0, finished: false }
    }

    pub fn hit_ceiling(&self) -> bool {
        self.decoder.hit_ceiling()
    }
}

impl Iterator for Chunker {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut chunk = Chunk { index: self.next_index, ..Default::default() };
        while chunk.rows() < self.chunk_size as u64 {
            match self.decoder.next() {
                None => {
                    self.finished = true;
                    break;
                }
                Some(Ok(raw)) => match self.mapper.map(&raw) {
                    Ok(record) => chunk.records.push(record),
                    Err(e) => chunk
                        .rejected
                        .push(JobError::new(JobErrorKind::Validation, e.message.clone()).at_row(e.row)),
                },
                Some(Err(ImportError::Decode { line, message })) if !self.strict => {
                    chunk.rejected.push(JobError::new(JobErrorKind::Decode, message).at_row(line));
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }

        chunk.bytes_read = self.decoder.bytes_read();
        if chunk.rows() == 0 {
            return None;
        }
        for e in &mut chunk.rejected {
            e.chunk = Some(chunk.index);
        }
        self.next_index += 1;
        Some(Ok(chunk))
    }
}
