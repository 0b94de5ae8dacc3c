//! Streaming spreadsheet reader
//!
//! Rows are parsed on a blocking task and handed to the importer in batches
//! through a channel of capacity 1, so at most one batch is being filled
//! while another is being inserted. The first non-empty row is the heading
//! row; it names the columns and is never yielded as data.
//!
//! XLSX is read cell by cell. Legacy XLS has no streaming reader in
//! calamine and is loaded as a whole range.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use calamine::{open_workbook, open_workbook_auto, Data, DataRef, ExcelDateTime, Reader, Xlsx};
use chrono::NaiveTime;
use encoding_rs::WINDOWS_1252;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ImportError;
use crate::types::{canonical_column, RawRow, SpreadsheetFormat};

type BatchResult = Result<Vec<RawRow>, ImportError>;

/// Receives every row of the sheet, heading row first.
/// Returning `false` stops the reader.
trait RowSink {
    fn accept(&mut self, cells: Vec<String>) -> bool;
}

// =============================================================================
// Row counting
// =============================================================================

#[derive(Default)]
struct CountingSink {
    seen_heading: bool,
    rows: u64,
}

impl RowSink for CountingSink {
    fn accept(&mut self, _cells: Vec<String>) -> bool {
        if self.seen_heading {
            self.rows += 1;
        } else {
            self.seen_heading = true;
        }
        true
    }
}

/// Count data rows (heading excluded) without holding the file in memory.
/// Uses the same parser as the importer so the count matches what it reads.
pub async fn count_data_rows(path: PathBuf, format: SpreadsheetFormat) -> Result<u64, ImportError> {
    tokio::task::spawn_blocking(move || {
        let mut sink = CountingSink::default();
        read_rows(&path, format, &mut sink)?;
        Ok(sink.rows)
    })
    .await
    .map_err(|e| ImportError::ReaderAborted(e.to_string()))?
}

// =============================================================================
// Batched streaming
// =============================================================================

struct BatchSink<'a> {
    headings: Option<Vec<String>>,
    batch: Vec<RawRow>,
    batch_size: usize,
    tx: &'a mpsc::Sender<BatchResult>,
}

impl<'a> BatchSink<'a> {
    fn new(batch_size: usize, tx: &'a mpsc::Sender<BatchResult>) -> Self {
        Self {
            headings: None,
            batch: Vec::with_capacity(batch_size),
            batch_size,
            tx,
        }
    }

    fn send(&mut self) -> bool {
        if self.batch.is_empty() {
            return true;
        }
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        // Err means the importer dropped the stream
        self.tx.blocking_send(Ok(batch)).is_ok()
    }
}

impl RowSink for BatchSink<'_> {
    fn accept(&mut self, cells: Vec<String>) -> bool {
        let Some(headings) = &self.headings else {
            self.headings = Some(cells.iter().map(|h| canonical_column(h)).collect());
            return true;
        };

        let row: RawRow = headings
            .iter()
            .zip(cells)
            .filter(|(heading, _)| !heading.is_empty())
            .map(|(heading, value)| (heading.clone(), value))
            .collect();
        self.batch.push(row);

        if self.batch.len() >= self.batch_size {
            return self.send();
        }
        true
    }
}

/// Batches of data rows in file order
pub struct RowStream {
    rx: mpsc::Receiver<BatchResult>,
    reader: JoinHandle<()>,
}

impl RowStream {
    /// Start reading `path` on a blocking task
    pub fn spawn(path: PathBuf, format: SpreadsheetFormat, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        let (tx, rx) = mpsc::channel(1);

        let reader = tokio::task::spawn_blocking(move || {
            let mut sink = BatchSink::new(batch_size, &tx);
            let result = read_rows(&path, format, &mut sink).map(|completed| completed && sink.send());
            match result {
                Ok(true) => debug!("Finished reading {}", path.display()),
                Ok(false) => debug!("Reader for {} stopped early, stream dropped", path.display()),
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                }
            }
        });

        Self { rx, reader }
    }

    /// Next batch, or `None` once the file is exhausted
    pub async fn next_batch(&mut self) -> Option<BatchResult> {
        self.rx.recv().await
    }

    /// Wait for the reader task; reports a panicked reader as an error
    pub async fn finish(self) -> Result<(), ImportError> {
        drop(self.rx);
        self.reader
            .await
            .map_err(|e| ImportError::ReaderAborted(e.to_string()))
    }
}

// =============================================================================
// Format readers
// =============================================================================

/// Feed every row to `sink`. Returns `Ok(false)` when the sink asked to stop.
fn read_rows(path: &Path, format: SpreadsheetFormat, sink: &mut dyn RowSink) -> Result<bool, ImportError> {
    match format {
        SpreadsheetFormat::Csv => read_csv(path, sink),
        SpreadsheetFormat::Xlsx => read_xlsx(path, sink),
        SpreadsheetFormat::Xls => read_xls(path, sink),
    }
}

fn read_csv(path: &Path, sink: &mut dyn RowSink) -> Result<bool, ImportError> {
    let file = File::open(path).map_err(|e| ImportError::unreadable(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(file));

    let mut record = csv::ByteRecord::new();
    let mut legacy_cells = 0u64;
    while reader.read_byte_record(&mut record)? {
        let cells = record
            .iter()
            .map(|bytes| {
                let (cell, legacy) = decode_cell(bytes);
                legacy_cells += u64::from(legacy);
                cell
            })
            .collect();
        if !sink.accept(cells) {
            return Ok(false);
        }
    }
    if legacy_cells > 0 {
        warn!(
            "{}: {} cells were not UTF-8 and were read as Windows-1252",
            path.display(),
            legacy_cells
        );
    }
    Ok(true)
}

/// UTF-8 when valid, otherwise Windows-1252 (Excel's default CSV export).
/// The flag is set when the fallback was used.
fn decode_cell(bytes: &[u8]) -> (String, bool) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), false),
        Err(_) => {
            let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
            (text.into_owned(), true)
        }
    }
}

fn read_xlsx(path: &Path, sink: &mut dyn RowSink) -> Result<bool, ImportError> {
    let mut workbook: Xlsx<BufReader<File>> = open_workbook(path)?;
    let sheet = first_sheet(workbook.sheet_names())?;
    let mut cells = workbook.worksheet_cells_reader(&sheet)?;

    let mut current_row: Option<u32> = None;
    let mut row_cells: Vec<String> = Vec::new();

    while let Some(cell) = cells.next_cell()? {
        let (row, col) = cell.get_position();
        if current_row != Some(row) {
            if current_row.is_some() && !sink.accept(std::mem::take(&mut row_cells)) {
                return Ok(false);
            }
            current_row = Some(row);
        }
        let col = col as usize;
        if row_cells.len() <= col {
            row_cells.resize(col + 1, String::new());
        }
        row_cells[col] = data_ref_to_string(cell.get_value());
    }

    if current_row.is_some() {
        return Ok(sink.accept(row_cells));
    }
    Ok(true)
}

fn read_xls(path: &Path, sink: &mut dyn RowSink) -> Result<bool, ImportError> {
    let mut workbook = open_workbook_auto(path)?;
    let sheet = first_sheet(workbook.sheet_names())?;
    let range = workbook.worksheet_range(&sheet)?;

    for row in range.rows() {
        let cells = row.iter().map(data_to_string).collect();
        if !sink.accept(cells) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn first_sheet(names: Vec<String>) -> Result<String, ImportError> {
    names
        .into_iter()
        .next()
        .ok_or_else(|| ImportError::Spreadsheet("workbook has no sheets".to_string()))
}

/// Integers stored as floats are rendered without a fraction
fn float_to_string(f: f64) -> String {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        (f as i64).to_string()
    } else {
        f.to_string()
    }
}

/// Date cells render as `YYYY-MM-DD` when they carry no time of day
fn excel_datetime_to_string(dt: &ExcelDateTime) -> String {
    match dt.as_datetime() {
        Some(value) if value.time() == NaiveTime::MIN => value.date().to_string(),
        Some(value) => value.to_string(),
        None => float_to_string(dt.as_f64()),
    }
}

fn data_ref_to_string(cell: &DataRef<'_>) -> String {
    match cell {
        DataRef::String(s) => s.trim().to_string(),
        DataRef::SharedString(s) => s.trim().to_string(),
        DataRef::Float(f) => float_to_string(*f),
        DataRef::Int(i) => i.to_string(),
        DataRef::Bool(b) => b.to_string(),
        DataRef::DateTime(dt) => excel_datetime_to_string(dt),
        DataRef::DateTimeIso(s) => s.clone(),
        DataRef::DurationIso(s) => s.clone(),
        _ => String::new(),
    }
}

fn data_to_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => float_to_string(*f),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_datetime_to_string(dt),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        _ => String::new(),
    }
}
