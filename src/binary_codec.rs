// src/binary_codec.rs

//! Binary matrix layouts.
//!
//! Two layouts coexist on disk and are told apart by the sign of the first
//! header field:
//!
//! * **legacy**: header `(-ncol, -nrow, nnz)` as little-endian `i32`, then `nnz`
//!   records of `(i32 flat, f64 value)` where `flat = row + 1 + col * nrow`,
//!   then column labels in 12-byte fields and row labels in 20-byte fields,
//!   lower-case and space padded.
//! * **modern**: header `(ncol, nrow, nnz)`, then `nnz` records of
//!   `(i32 row, i32 col, f64 value)` with zero-based indices, then all labels
//!   in 200-byte fields.
//!
//! Each layout is a pure transform between bytes and [`LabeledEntries`].

use log::{debug, trace};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{normalize_label, ThreadSafeStdError};

pub const LEGACY_COL_LABEL_WIDTH: usize = 12;
pub const LEGACY_ROW_LABEL_WIDTH: usize = 20;
pub const MODERN_LABEL_WIDTH: usize = 200;

/// Labels plus coordinate entries; the storage-independent payload of a binary file.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledEntries {
    pub row_names: Vec<String>,
    pub col_names: Vec<String>,
    pub entries: Vec<(usize, usize, f64)>,
}

impl LabeledEntries {
    pub fn nrows(&self) -> usize {
        self.row_names.len()
    }

    pub fn ncols(&self) -> usize {
        self.col_names.len()
    }
}

/// On-disk layout version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryLayout {
    Legacy,
    Modern,
}

impl BinaryLayout {
    /// Reads the discriminator from the first header field.
    pub fn detect(bytes: &[u8]) -> Result<Self, ThreadSafeStdError> {
        let mut cursor = ByteCursor::new(bytes);
        let first = cursor.read_i32()?;
        if first < 0 {
            Ok(BinaryLayout::Legacy)
        } else {
            Ok(BinaryLayout::Modern)
        }
    }

    pub fn codec(self) -> &'static dyn BinaryCodec {
        match self {
            BinaryLayout::Legacy => &LegacyLayout,
            BinaryLayout::Modern => &ModernLayout,
        }
    }
}

/// A single binary layout.
pub trait BinaryCodec: Sync {
    fn layout(&self) -> BinaryLayout;
    fn encode(&self, matrix: &LabeledEntries) -> Result<Vec<u8>, ThreadSafeStdError>;
    fn decode(&self, bytes: &[u8]) -> Result<LabeledEntries, ThreadSafeStdError>;
}

#[derive(Debug, Default, Copy, Clone)]
pub struct LegacyLayout;

#[derive(Debug, Default, Copy, Clone)]
pub struct ModernLayout;

impl BinaryCodec for LegacyLayout {
    fn layout(&self) -> BinaryLayout {
        BinaryLayout::Legacy
    }

    fn encode(&self, matrix: &LabeledEntries) -> Result<Vec<u8>, ThreadSafeStdError> {
        let nrows = matrix.nrows();
        let ncols = matrix.ncols();
        let mut out = Vec::with_capacity(12 + matrix.entries.len() * 12);
        out.extend_from_slice(&(-to_i32(ncols, "column count")?).to_le_bytes());
        out.extend_from_slice(&(-to_i32(nrows, "row count")?).to_le_bytes());
        out.extend_from_slice(&to_i32(matrix.entries.len(), "entry count")?.to_le_bytes());

        let mut ordered: Vec<&(usize, usize, f64)> = matrix.entries.iter().collect();
        ordered.sort_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)));
        for &&(i, j, v) in &ordered {
            check_index(i, j, nrows, ncols)?;
            let flat = i + 1 + j * nrows;
            out.extend_from_slice(&to_i32(flat, "flat index")?.to_le_bytes());
            out.extend_from_slice(&v.to_le_bytes());
        }
        for name in &matrix.col_names {
            write_label(&mut out, name, LEGACY_COL_LABEL_WIDTH)?;
        }
        for name in &matrix.row_names {
            write_label(&mut out, name, LEGACY_ROW_LABEL_WIDTH)?;
        }
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<LabeledEntries, ThreadSafeStdError> {
        let mut cursor = ByteCursor::new(bytes);
        let ncol_field = cursor.read_i32()?;
        let nrow_field = cursor.read_i32()?;
        if ncol_field > 0 || nrow_field > 0 {
            return Err(format!(
                "Legacy binary header must carry negative dimensions, found ({}, {})",
                ncol_field, nrow_field
            )
            .into());
        }
        let ncols = ncol_field.unsigned_abs() as usize;
        let nrows = nrow_field.unsigned_abs() as usize;
        let nnz = read_count(&mut cursor, "entry count")?;
        trace!("Legacy binary: {} rows, {} cols, {} entries", nrows, ncols, nnz);

        let mut entries = Vec::with_capacity(nnz);
        for _ in 0..nnz {
            let flat = cursor.read_i32()?;
            let value = cursor.read_f64()?;
            if flat < 1 || nrows == 0 {
                return Err(format!("Legacy binary entry has invalid flat index {}", flat).into());
            }
            let zero_based = flat as usize - 1;
            let (i, j) = (zero_based % nrows, zero_based / nrows);
            check_index(i, j, nrows, ncols)?;
            entries.push((i, j, value));
        }
        let col_names = read_labels(&mut cursor, ncols, LEGACY_COL_LABEL_WIDTH)?;
        let row_names = read_labels(&mut cursor, nrows, LEGACY_ROW_LABEL_WIDTH)?;
        Ok(LabeledEntries { row_names, col_names, entries })
    }
}

impl BinaryCodec for ModernLayout {
    fn layout(&self) -> BinaryLayout {
        BinaryLayout::Modern
    }

    fn encode(&self, matrix: &LabeledEntries) -> Result<Vec<u8>, ThreadSafeStdError> {
        let nrows = matrix.nrows();
        let ncols = matrix.ncols();
        let mut out = Vec::with_capacity(12 + matrix.entries.len() * 16);
        out.extend_from_slice(&to_i32(ncols, "column count")?.to_le_bytes());
        out.extend_from_slice(&to_i32(nrows, "row count")?.to_le_bytes());
        out.extend_from_slice(&to_i32(matrix.entries.len(), "entry count")?.to_le_bytes());
        for &(i, j, v) in &matrix.entries {
            check_index(i, j, nrows, ncols)?;
            out.extend_from_slice(&to_i32(i, "row index")?.to_le_bytes());
            out.extend_from_slice(&to_i32(j, "column index")?.to_le_bytes());
            out.extend_from_slice(&v.to_le_bytes());
        }
        for name in &matrix.col_names {
            write_label(&mut out, name, MODERN_LABEL_WIDTH)?;
        }
        for name in &matrix.row_names {
            write_label(&mut out, name, MODERN_LABEL_WIDTH)?;
        }
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<LabeledEntries, ThreadSafeStdError> {
        let mut cursor = ByteCursor::new(bytes);
        let ncols = read_count(&mut cursor, "column count")?;
        let nrows = read_count(&mut cursor, "row count")?;
        let nnz = read_count(&mut cursor, "entry count")?;
        trace!("Modern binary: {} rows, {} cols, {} entries", nrows, ncols, nnz);

        let mut entries = Vec::with_capacity(nnz);
        for _ in 0..nnz {
            let i = cursor.read_i32()?;
            let j = cursor.read_i32()?;
            let value = cursor.read_f64()?;
            if i < 0 || j < 0 {
                return Err(format!("Modern binary entry has negative index ({}, {})", i, j).into());
            }
            check_index(i as usize, j as usize, nrows, ncols)?;
            entries.push((i as usize, j as usize, value));
        }
        let col_names = read_labels(&mut cursor, ncols, MODERN_LABEL_WIDTH)?;
        let row_names = read_labels(&mut cursor, nrows, MODERN_LABEL_WIDTH)?;
        Ok(LabeledEntries { row_names, col_names, entries })
    }
}

/// Decodes either layout, dispatching on the header discriminator.
pub fn decode_any(bytes: &[u8]) -> Result<(BinaryLayout, LabeledEntries), ThreadSafeStdError> {
    let layout = BinaryLayout::detect(bytes)?;
    let decoded = layout.codec().decode(bytes)?;
    Ok((layout, decoded))
}

pub fn write_binary_file<P: AsRef<Path>>(
    path: P,
    matrix: &LabeledEntries,
    layout: BinaryLayout,
) -> Result<(), ThreadSafeStdError> {
    let bytes = layout.codec().encode(matrix)?;
    let file = File::create(path.as_ref())
        .map_err(|e| format!("Failed to create binary matrix file {:?}: {}", path.as_ref(), e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(&bytes)
        .and_then(|_| writer.flush())
        .map_err(|e| format!("Failed to write binary matrix file {:?}: {}", path.as_ref(), e))?;
    debug!(
        "Wrote {:?} binary matrix {}x{} to {:?}",
        layout,
        matrix.nrows(),
        matrix.ncols(),
        path.as_ref()
    );
    Ok(())
}

pub fn read_binary_file<P: AsRef<Path>>(path: P) -> Result<(BinaryLayout, LabeledEntries), ThreadSafeStdError> {
    let file = File::open(path.as_ref())
        .map_err(|e| format!("Failed to open binary matrix file {:?}: {}", path.as_ref(), e))?;
    let mut bytes = Vec::new();
    BufReader::new(file)
        .read_to_end(&mut bytes)
        .map_err(|e| format!("Failed to read binary matrix file {:?}: {}", path.as_ref(), e))?;
    decode_any(&bytes).map_err(|e| format!("Malformed binary matrix file {:?}: {}", path.as_ref(), e).into())
}

struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ThreadSafeStdError> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(format!(
                "Unexpected end of binary data: needed {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.bytes.len()
            )
            .into());
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_i32(&mut self) -> Result<i32, ThreadSafeStdError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(i32::from_le_bytes(buf))
    }

    fn read_f64(&mut self) -> Result<f64, ThreadSafeStdError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(f64::from_le_bytes(buf))
    }
}

fn read_count(cursor: &mut ByteCursor<'_>, what: &str) -> Result<usize, ThreadSafeStdError> {
    let raw = cursor.read_i32()?;
    if raw < 0 {
        return Err(format!("Binary header {} is negative: {}", what, raw).into());
    }
    Ok(raw as usize)
}

fn read_labels(cursor: &mut ByteCursor<'_>, count: usize, width: usize) -> Result<Vec<String>, ThreadSafeStdError> {
    let mut labels = Vec::with_capacity(count);
    for _ in 0..count {
        let field = cursor.take(width)?;
        let text = String::from_utf8_lossy(field);
        labels.push(normalize_label(text.trim_matches(|c: char| c == '\0' || c.is_whitespace())));
    }
    Ok(labels)
}

fn write_label(out: &mut Vec<u8>, label: &str, width: usize) -> Result<(), ThreadSafeStdError> {
    let lowered = label.to_lowercase();
    let bytes = lowered.as_bytes();
    if bytes.len() > width {
        return Err(format!(
            "Label '{}' is {} bytes long, longer than the {}-byte binary field",
            label,
            bytes.len(),
            width
        )
        .into());
    }
    out.extend_from_slice(bytes);
    out.extend(std::iter::repeat(b' ').take(width - bytes.len()));
    Ok(())
}

fn check_index(i: usize, j: usize, nrows: usize, ncols: usize) -> Result<(), ThreadSafeStdError> {
    if i >= nrows || j >= ncols {
        return Err(format!("Binary entry ({}, {}) outside of {}x{} matrix", i, j, nrows, ncols).into());
    }
    Ok(())
}

fn to_i32(value: usize, what: &str) -> Result<i32, ThreadSafeStdError> {
    i32::try_from(value).map_err(|_| format!("{} {} does not fit the binary i32 field", what, value).into())
}
