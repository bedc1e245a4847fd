//! Row sources handed to the pairing driver.

use std::io::BufRead;

use ndarray::Array2;

use crate::tuple::Tuple;
use crate::{MatchError, Result};

/// Random-access supplier of match tuples.
pub trait RowSource: Sync {
    fn row_count(&self) -> usize;

    /// Tuple for row `irow`, which must be below [`RowSource::row_count`].
    fn tuple(&self, irow: usize) -> Tuple;
}

/// Rows held as ready-made tuples.
#[derive(Debug, Clone, Default)]
pub struct TupleTable {
    rows: Vec<Tuple>,
}

impl TupleTable {
    pub fn new(rows: Vec<Tuple>) -> Self {
        Self { rows }
    }
}

impl From<Vec<Tuple>> for TupleTable {
    fn from(rows: Vec<Tuple>) -> Self {
        Self::new(rows)
    }
}

impl RowSource for TupleTable {
    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn tuple(&self, irow: usize) -> Tuple {
        self.rows[irow].clone()
    }
}

/// Numeric table with a selection of columns forming each tuple.
#[derive(Debug, Clone)]
pub struct ArrayTable {
    data: Array2<f64>,
    columns: Vec<usize>,
}

impl ArrayTable {
    pub fn new(data: Array2<f64>, columns: Vec<usize>) -> Result<Self> {
        let ncols = data.ncols();
        if let Some(&bad) = columns.iter().find(|&&c| c >= ncols) {
            return Err(MatchError::DimensionMismatch {
                expected: ncols,
                actual: bad + 1,
            });
        }
        Ok(Self { data, columns })
    }

    /// Use every column, in order.
    pub fn all_columns(data: Array2<f64>) -> Self {
        let columns = (0..data.ncols()).collect();
        Self { data, columns }
    }

    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }
}

impl RowSource for ArrayTable {
    fn row_count(&self) -> usize {
        self.data.nrows()
    }

    fn tuple(&self, irow: usize) -> Tuple {
        let row = self.data.row(irow);
        let values: Vec<f64> = self.columns.iter().map(|&c| row[c]).collect();
        Tuple::from_f64s(&values)
    }
}

/// Read a numeric text table.
///
/// Fields are separated by whitespace or commas. Blank lines and lines
/// starting with `#` are skipped. `nan` and `null` read as NaN. Every row must
/// have as many fields as the first.
pub fn read_text_table<R: BufRead>(reader: R) -> Result<Array2<f64>> {
    let mut values = Vec::new();
    let mut ncols = None;
    let mut nrows = 0;
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let text = line.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        let before = values.len();
        for field in text
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|f| !f.is_empty())
        {
            values.push(parse_field(field).ok_or_else(|| MatchError::Parse {
                line: i + 1,
                message: format!("not a number: {field:?}"),
            })?);
        }
        let width = values.len() - before;
        match ncols {
            None => ncols = Some(width),
            Some(n) if n != width => {
                return Err(MatchError::Parse {
                    line: i + 1,
                    message: format!("expected {n} fields, found {width}"),
                });
            }
            Some(_) => {}
        }
        nrows += 1;
    }
    Array2::from_shape_vec((nrows, ncols.unwrap_or(0)), values).map_err(|e| MatchError::Parse {
        line: 0,
        message: e.to_string(),
    })
}

fn parse_field(field: &str) -> Option<f64> {
    if field.eq_ignore_ascii_case("null") || field.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    field.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn array_table_selects_columns() {
        let data = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let table = ArrayTable::new(data.clone(), vec![2, 0]).unwrap();
        assert_eq!(table.row_count(), 2);
        let t = table.tuple(1);
        assert_eq!(t.len(), 2);
        assert_eq!(t.f64_at(0), Some(6.0));
        assert_eq!(t.f64_at(1), Some(4.0));
        assert!(ArrayTable::new(data, vec![3]).is_err());
    }

    #[test]
    fn tuple_table_hands_out_rows() {
        let table = TupleTable::from(vec![Tuple::from_f64s(&[1.0]), Tuple::from_f64s(&[2.0])]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.tuple(1).f64_at(0), Some(2.0));
    }

    #[test]
    fn reads_mixed_separators() {
        let text = "# ra dec\n10.0, 20.0\n\n 11.5\t-3\n12,null\n";
        let data = read_text_table(text.as_bytes()).unwrap();
        assert_eq!(data.dim(), (3, 2));
        assert_eq!(data[[1, 1]], -3.0);
        assert!(data[[2, 1]].is_nan());
    }

    #[test]
    fn rejects_ragged_and_bad_rows() {
        let err = read_text_table("1 2\n3\n".as_bytes()).unwrap_err();
        assert!(matches!(err, MatchError::Parse { line: 2, .. }));
        let err = read_text_table("1 x\n".as_bytes()).unwrap_err();
        assert!(matches!(err, MatchError::Parse { line: 1, .. }));
    }

    #[test]
    fn empty_input_is_empty_table() {
        let data = read_text_table("# nothing\n".as_bytes()).unwrap();
        assert_eq!(data.nrows(), 0);
        let table = ArrayTable::all_columns(data);
        assert_eq!(table.row_count(), 0);
        assert!(table.columns().is_empty());
    }
}
