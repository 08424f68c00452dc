// src/matrix_io.rs

//! Text layouts for labelled matrices: the PEST-style ascii matrix file and
//! label-keyed csv.

use log::{debug, trace};
use ndarray::{Array1, Array2, ArrayView2};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{normalize_label, ThreadSafeStdError};
use crate::named_matrix::{MatrixData, MatrixKind, NamedMatrix};
use crate::sparse::SparseMatrix;

/// Ascii type code: one shared label list, symmetric layout.
pub const ICODE_SHARED_NAMES: i32 = 1;
/// Ascii type code: separate row and column label lists.
pub const ICODE_SEPARATE_NAMES: i32 = 2;
/// Ascii type code: diagonal, only the diagonal values are listed.
pub const ICODE_DIAGONAL: i32 = -1;

/// Writes `matrix` in the ascii matrix layout.
pub fn write_ascii<P: AsRef<Path>>(matrix: &NamedMatrix, path: P) -> Result<(), ThreadSafeStdError> {
    let path = path.as_ref();
    let file = File::create(path)
        .map_err(|e| format!("Cannot open {:?} to write ascii matrix: {}", path, e))?;
    let mut out = BufWriter::new(file);
    let icode = match matrix.kind() {
        MatrixKind::Diagonal => ICODE_DIAGONAL,
        MatrixKind::SymmetricSparse => ICODE_SHARED_NAMES,
        MatrixKind::General => ICODE_SEPARATE_NAMES,
    };
    let io_err = |e: std::io::Error| -> ThreadSafeStdError { format!("Error writing ascii matrix {:?}: {}", path, e).into() };

    writeln!(out, "{:>6}{:>6}{:>6}", matrix.nrows(), matrix.ncols(), icode).map_err(io_err)?;
    match matrix.data() {
        MatrixData::Diagonal(diag) => {
            for v in diag.iter() {
                writeln!(out, " {:e}", v).map_err(io_err)?;
            }
        }
        MatrixData::General(sparse) | MatrixData::SymmetricSparse(sparse) => {
            let dense = sparse.to_dense();
            for row in dense.rows() {
                let line: Vec<String> = row.iter().map(|v| format!("{:e}", v)).collect();
                writeln!(out, " {}", line.join(" ")).map_err(io_err)?;
            }
        }
    }
    if icode == ICODE_SEPARATE_NAMES {
        writeln!(out, "* row names").map_err(io_err)?;
        for name in matrix.row_names() {
            writeln!(out, "{}", name).map_err(io_err)?;
        }
        writeln!(out, "* column names").map_err(io_err)?;
        for name in matrix.col_names() {
            writeln!(out, "{}", name).map_err(io_err)?;
        }
    } else {
        writeln!(out, "* row and column names").map_err(io_err)?;
        for name in matrix.row_names() {
            writeln!(out, "{}", name).map_err(io_err)?;
        }
    }
    out.flush().map_err(io_err)?;
    debug!("Wrote ascii matrix {}x{} (icode {}) to {:?}", matrix.nrows(), matrix.ncols(), icode, path);
    Ok(())
}

/// Reads an ascii matrix file.
pub fn read_ascii<P: AsRef<Path>>(path: P) -> Result<NamedMatrix, ThreadSafeStdError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| format!("Cannot open {:?} to read ascii matrix: {}", path, e))?;
    parse_ascii(&text).map_err(|e| format!("Error reading ascii matrix file {:?}: {}", path, e).into())
}

/// Parses the ascii matrix layout from an in-memory string.
pub fn parse_ascii(text: &str) -> Result<NamedMatrix, ThreadSafeStdError> {
    let mut lines = text.lines();
    let header = next_nonblank(&mut lines).ok_or("missing 'nrow ncol icode' header line")?;
    let fields: Vec<&str> = header.split_whitespace().collect();
    if fields.len() < 3 {
        return Err(format!("expected 'nrow ncol icode' on the first line, found '{}'", header.trim()).into());
    }
    let parse_int = |s: &str, what: &str| -> Result<i64, ThreadSafeStdError> {
        s.parse::<i64>().map_err(|e| format!("cannot parse {} from '{}': {}", what, s, e).into())
    };
    let nrow = parse_int(fields[0], "nrow")?;
    let ncol = parse_int(fields[1], "ncol")?;
    let icode = parse_int(fields[2], "icode")? as i32;
    if nrow < 0 || ncol < 0 {
        return Err(format!("negative dimensions {}x{}", nrow, ncol).into());
    }
    let (nrow, ncol) = (nrow as usize, ncol as usize);
    if icode != ICODE_SHARED_NAMES && icode != ICODE_SEPARATE_NAMES && icode != ICODE_DIAGONAL {
        return Err(format!("unsupported icode {}", icode).into());
    }
    if icode != ICODE_SEPARATE_NAMES && nrow != ncol {
        return Err(format!("nrow ({}) != ncol ({}) for icode {} matrix", nrow, ncol, icode).into());
    }

    let needed = if icode == ICODE_DIAGONAL { nrow } else { nrow * ncol };
    let mut values = Vec::with_capacity(needed);
    while values.len() < needed {
        let line = lines
            .next()
            .ok_or_else(|| format!("ran out of values at entry number {} of {}", values.len(), needed))?;
        for token in line.split_whitespace() {
            if values.len() == needed {
                return Err(format!("more than {} values before the name block", needed).into());
            }
            let entry_idx = values.len();
            let value = parse_fortran_float(token).map_err(|e| format!("entry number {}: {}", entry_idx, e))?;
            values.push(value);
        }
    }
    trace!("Parsed {} ascii matrix values (icode {})", values.len(), icode);

    let label_header = next_nonblank(&mut lines)
        .ok_or("missing row/column name header line")?
        .to_uppercase();
    let (row_names, col_names) = if icode == ICODE_SEPARATE_NAMES {
        if !label_header.contains("ROW") {
            return Err(format!("expecting row names header instead of: {}", label_header).into());
        }
        let rows = read_name_list(&mut lines, nrow)?;
        let col_header = next_nonblank(&mut lines)
            .ok_or("missing column name header line")?
            .to_uppercase();
        if !col_header.contains("COLUMN") {
            return Err(format!("expecting column names header instead of: {}", col_header).into());
        }
        let cols = read_name_list(&mut lines, ncol)?;
        (rows, cols)
    } else {
        if !(label_header.contains("ROW") && label_header.contains("COLUMN")) {
            return Err(format!("expecting row and column names header instead of: {}", label_header).into());
        }
        let names = read_name_list(&mut lines, nrow)?;
        (names.clone(), names)
    };

    let data = match icode {
        ICODE_DIAGONAL => MatrixData::Diagonal(Array1::from_vec(values)),
        _ => {
            let dense = Array2::from_shape_vec((nrow, ncol), values)
                .map_err(|e| format!("value block does not match {}x{}: {}", nrow, ncol, e))?;
            let sparse = SparseMatrix::from_dense(&dense.view());
            if icode == ICODE_SHARED_NAMES {
                MatrixData::SymmetricSparse(sparse)
            } else {
                MatrixData::General(sparse)
            }
        }
    };
    NamedMatrix::new(row_names, col_names, data)
}

fn next_nonblank<'a, I: Iterator<Item = &'a str>>(lines: &mut I) -> Option<&'a str> {
    lines.find(|l| !l.trim().is_empty())
}

fn read_name_list<'a, I: Iterator<Item = &'a str>>(lines: &mut I, count: usize) -> Result<Vec<String>, ThreadSafeStdError> {
    let mut names = Vec::with_capacity(count);
    let mut seen = HashSet::with_capacity(count);
    for i in 0..count {
        let raw = lines
            .next()
            .ok_or_else(|| format!("error reading name for entry {}", i))?;
        if raw.contains('*') {
            return Err(format!("'*' found in item name: {}, item number: {}", raw, i).into());
        }
        let name = normalize_label(raw);
        if !seen.insert(name.clone()) {
            return Err(format!("duplicate name: {} found in name list", name).into());
        }
        names.push(name);
    }
    Ok(names)
}

/// Parses a float, accepting Fortran `D` exponents.
pub fn parse_fortran_float(token: &str) -> Result<f64, ThreadSafeStdError> {
    let cleaned = token.trim().replace(['D', 'd'], "E");
    cleaned
        .parse::<f64>()
        .map_err(|e| format!("cannot convert '{}' to a number: {}", token, e).into())
}

/// Writes a dense labelled block as csv; `index_label` heads the label column.
pub fn write_labeled_csv<P: AsRef<Path>>(
    path: P,
    index_label: &str,
    row_names: &[String],
    col_names: &[String],
    values: &ArrayView2<f64>,
) -> Result<(), ThreadSafeStdError> {
    let path = path.as_ref();
    if values.dim() != (row_names.len(), col_names.len()) {
        return Err(format!(
            "csv writer: values are {:?} but labels are {}x{}",
            values.dim(),
            row_names.len(),
            col_names.len()
        )
        .into());
    }
    let mut writer = csv::Writer::from_path(path).map_err(|e| format!("Cannot open {:?} to write csv: {}", path, e))?;
    let mut header = Vec::with_capacity(col_names.len() + 1);
    header.push(index_label.to_string());
    header.extend(col_names.iter().map(|n| n.to_lowercase()));
    writer.write_record(&header).map_err(|e| format!("Error writing csv header to {:?}: {}", path, e))?;
    for (name, row) in row_names.iter().zip(values.rows()) {
        let mut record = Vec::with_capacity(col_names.len() + 1);
        record.push(name.to_lowercase());
        record.extend(row.iter().map(|v| format!("{:e}", v)));
        writer.write_record(&record).map_err(|e| format!("Error writing csv row to {:?}: {}", path, e))?;
    }
    writer.flush().map_err(|e| format!("Error flushing csv {:?}: {}", path, e))?;
    debug!("Wrote csv {}x{} to {:?}", row_names.len(), col_names.len(), path);
    Ok(())
}

/// Dense contents of a labelled csv file; labels are upper-cased.
#[derive(Debug, Clone)]
pub struct LabeledCsv {
    pub row_names: Vec<String>,
    pub col_names: Vec<String>,
    pub values: Array2<f64>,
}

/// Reads a labelled csv: the first header cell is dropped, the first field of each row is the row label.
pub fn read_labeled_csv<P: AsRef<Path>>(path: P) -> Result<LabeledCsv, ThreadSafeStdError> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| format!("Cannot open {:?} to read csv: {}", path, e))?;
    let headers = reader
        .headers()
        .map_err(|e| format!("Error reading header line from csv {:?}: {}", path, e))?
        .clone();
    let mut col_names: Vec<String> = headers.iter().skip(1).map(normalize_label).collect();
    if col_names.last().map_or(false, |n| n.is_empty()) {
        col_names.pop();
    }
    let ncols = col_names.len();

    let mut row_names = Vec::new();
    let mut flat = Vec::new();
    for (line_idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| format!("Error reading csv {:?} line {}: {}", path, line_idx + 2, e))?;
        let mut fields: Vec<&str> = record.iter().collect();
        if fields.last().map_or(false, |f| f.is_empty()) {
            fields.pop();
        }
        if fields.is_empty() {
            continue;
        }
        if fields.len() - 1 != ncols {
            return Err(format!(
                "wrong number of entries on line {} of {:?}: expecting {}, found {}",
                line_idx + 2,
                path,
                ncols,
                fields.len() - 1
            )
            .into());
        }
        row_names.push(normalize_label(fields[0]));
        for (j, field) in fields[1..].iter().enumerate() {
            let v = parse_fortran_float(field).map_err(|e| {
                format!("csv {:?} line {} column '{}': {}", path, line_idx + 2, col_names[j], e)
            })?;
            flat.push(v);
        }
    }
    let values = Array2::from_shape_vec((row_names.len(), ncols), flat)
        .map_err(|e| format!("csv {:?} value block is not rectangular: {}", path, e))?;
    trace!("Read csv {:?}: {} rows x {} cols", path, row_names.len(), ncols);
    Ok(LabeledCsv { row_names, col_names, values })
}

pub fn write_csv<P: AsRef<Path>>(matrix: &NamedMatrix, path: P) -> Result<(), ThreadSafeStdError> {
    let dense = matrix.to_dense();
    write_labeled_csv(path, "row_name", matrix.row_names(), matrix.col_names(), &dense.view())
}

pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<NamedMatrix, ThreadSafeStdError> {
    let parsed = read_labeled_csv(path)?;
    let sparse = SparseMatrix::from_dense(&parsed.values.view());
    NamedMatrix::new(parsed.row_names, parsed.col_names, MatrixData::General(sparse))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn parses_separate_names_layout() {
        let text = "     2     3     2\n 1.0 0.0 2.5\n -1.0D+00 3.0 0.0\n* row names\nr1\nr2\n* column names\na\nb\nc\n";
        let m = parse_ascii(text).unwrap();
        assert_eq!(m.kind(), MatrixKind::General);
        assert_eq!(m.row_names(), &["R1".to_string(), "R2".to_string()]);
        assert_eq!(m.col_names().len(), 3);
        assert_eq!(m.to_dense(), array![[1.0, 0.0, 2.5], [-1.0, 3.0, 0.0]]);
    }

    #[test]
    fn values_may_wrap_across_lines() {
        let text = "2 2 1\n4.0\n1.0 1.0\n9.0\n* row and column names\nx\ny\n";
        let m = parse_ascii(text).unwrap();
        assert_eq!(m.kind(), MatrixKind::SymmetricSparse);
        assert_eq!(m.to_dense(), array![[4.0, 1.0], [1.0, 9.0]]);
    }

    #[test]
    fn label_block_needs_keywords() {
        let text = "1 1 1\n2.0\n* names\nx\n";
        let err = parse_ascii(text).unwrap_err().to_string();
        assert!(err.contains("row and column names"));
    }

    #[test]
    fn star_and_duplicate_names_are_rejected() {
        assert!(parse_ascii("2 2 -1\n1.0\n2.0\n* row and column names\na*\nb\n").is_err());
        assert!(parse_ascii("2 2 -1\n1.0\n2.0\n* row and column names\na\nA\n").is_err());
    }

    #[test]
    fn short_value_block_is_an_error() {
        assert!(parse_ascii("2 2 2\n1.0 2.0 3.0\n").is_err());
    }

    #[test]
    fn fortran_exponent_is_accepted() {
        assert_eq!(parse_fortran_float("1.5d-1").unwrap(), 0.15);
        assert!(parse_fortran_float("abc").is_err());
    }
}
