use std::{fmt, str::FromStr};

use anyhow::{anyhow, bail, Context, Result};

use crate::catalog::{column_letters, column_ordinal};
use crate::models::{blank_row, Row};

/// A rectangular cell range in A1 notation. Indices are zero-based; `None`
/// on a `last_*` bound means the range is open in that direction.
///
/// Writes only use the top-left corner as their anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub first_row: usize,
    pub first_col: usize,
    pub last_row: Option<usize>,
    pub last_col: Option<usize>,
}

impl RangeSpec {
    pub fn cell(row: usize, col: usize) -> Self {
        Self {
            first_row: row,
            first_col: col,
            last_row: Some(row),
            last_col: Some(col),
        }
    }

    /// Whole columns `first..=last`, every row.
    pub fn columns(first: usize, last: usize) -> Self {
        Self {
            first_row: 0,
            first_col: first,
            last_row: None,
            last_col: Some(last.max(first)),
        }
    }

    /// Whole rows `first..=last`, every column.
    pub fn rows(first: usize, last: usize) -> Self {
        Self {
            first_row: first,
            first_col: 0,
            last_row: Some(last.max(first)),
            last_col: None,
        }
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        row >= self.first_row
            && col >= self.first_col
            && self.last_row.map_or(true, |last| row <= last)
            && self.last_col.map_or(true, |last| col <= last)
    }

    /// Sheet-qualified form, e.g. `2026!A5`.
    pub fn qualified(&self, sheet: &str) -> String {
        format!("{sheet}!{self}")
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let first_col = column_letters(self.first_col);
        let first_row = self.first_row + 1;
        match (self.last_row, self.last_col) {
            (Some(last_row), Some(last_col)) => {
                if last_row == self.first_row && last_col == self.first_col {
                    write!(f, "{first_col}{first_row}")
                } else {
                    write!(f, "{first_col}{first_row}:{}{}", column_letters(last_col), last_row + 1)
                }
            }
            (None, Some(last_col)) if self.first_row == 0 => {
                write!(f, "{first_col}:{}", column_letters(last_col))
            }
            (None, Some(last_col)) => {
                write!(f, "{first_col}{first_row}:{}", column_letters(last_col))
            }
            (Some(last_row), None) if self.first_col == 0 => {
                write!(f, "{first_row}:{}", last_row + 1)
            }
            (Some(last_row), None) => write!(f, "{first_col}{first_row}:{}", last_row + 1),
            (None, None) => write!(f, "{first_col}{first_row}:"),
        }
    }
}

/// One endpoint of an A1 range: optional column letters, optional row number.
fn parse_endpoint(part: &str) -> Result<(Option<usize>, Option<usize>)> {
    let part = part.trim();
    let split = part
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(part.len());
    let (letters, digits) = part.split_at(split);

    let col = if letters.is_empty() {
        None
    } else {
        Some(column_ordinal(letters)?)
    };
    let row = if digits.is_empty() {
        None
    } else {
        let number: usize = digits
            .parse()
            .with_context(|| format!("invalid row number in '{part}'"))?;
        if number == 0 {
            bail!("row numbers start at 1 in '{part}'");
        }
        Some(number - 1)
    };

    if col.is_none() && row.is_none() {
        bail!("empty range endpoint");
    }
    Ok((col, row))
}

impl FromStr for RangeSpec {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        // Drop an optional `Sheet!` prefix.
        let body = value.rsplit_once('!').map_or(value, |(_, range)| range);

        match body.split_once(':') {
            None => {
                let (col, row) = parse_endpoint(body)?;
                match (col, row) {
                    (Some(col), Some(row)) => Ok(Self::cell(row, col)),
                    _ => Err(anyhow!("single-cell range '{value}' needs a column and a row")),
                }
            }
            // `B3:` is open to the right and downwards.
            Some((start, end)) if end.trim().is_empty() => match parse_endpoint(start)? {
                (Some(col), Some(row)) => Ok(Self {
                    first_row: row,
                    first_col: col,
                    last_row: None,
                    last_col: None,
                }),
                _ => Err(anyhow!("open range '{value}' needs a start cell")),
            },
            Some((start, end)) => {
                let (start_col, start_row) = parse_endpoint(start)?;
                let (end_col, end_row) = parse_endpoint(end)?;
                let range = Self {
                    first_row: start_row.unwrap_or(0),
                    first_col: start_col.unwrap_or(0),
                    last_row: end_row,
                    last_col: end_col,
                };
                if range.last_row.is_some_and(|last| last < range.first_row)
                    || range.last_col.is_some_and(|last| last < range.first_col)
                {
                    bail!("range '{value}' ends before it starts");
                }
                Ok(range)
            }
        }
    }
}

/// Assembles sparse `(row, col, value)` cells into the grid a `get-values`
/// call returns: rows from the range's first row through the last non-empty
/// row, each trimmed after its last non-empty cell. Empty interior rows are
/// kept as empty rows so the row count reflects the used height.
pub fn assemble_grid(
    range: &RangeSpec,
    cells: impl IntoIterator<Item = (usize, usize, String)>,
) -> Vec<Row> {
    let mut grid: Vec<Row> = Vec::new();
    for (row, col, value) in cells {
        if !range.contains(row, col) {
            continue;
        }
        let r = row - range.first_row;
        let c = col - range.first_col;
        if grid.len() <= r {
            grid.resize_with(r + 1, Vec::new);
        }
        let cells = &mut grid[r];
        if cells.len() <= c {
            cells.extend(blank_row(c + 1 - cells.len()));
        }
        cells[c] = Some(value);
    }
    grid
}
