//! Region catalog: parse a delimited bounds table into ordered regions.
//!
//! The bounds source has a header row naming at least the columns
//! `name`, `y0`, `y1`, `x0`, `x1` (any order; other columns are
//! ignored) followed by one row per crown. Blank lines are skipped and do
//! not count as rows.

use crate::types::{Bounds, Region};

/// Default column delimiter for bounds files.
pub const DEFAULT_DELIMITER: char = '|';

const COLUMNS: [&str; 5] = ["name", "y0", "y1", "x0", "x1"];

/// Errors raised while parsing a bounds table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoundsError {
    /// A required column is absent from the header.
    #[error("bounds header is missing column `{0}`")]
    MissingColumn(&'static str),

    /// A data row has fewer fields than the header requires.
    #[error("bounds row {row}: expected at least {expected} fields, found {found}")]
    FieldCount {
        /// Zero-based data row.
        row: usize,
        /// Fields needed to reach every required column.
        expected: usize,
        /// Fields present.
        found: usize,
    },

    /// A coordinate is not a non-negative integer.
    #[error("bounds row {row}: column `{column}` has invalid value {value:?}")]
    InvalidValue {
        /// Zero-based data row.
        row: usize,
        /// Column name.
        column: &'static str,
        /// Raw field text.
        value: String,
    },

    /// A region name would not stay a single visible file name.
    #[error("bounds row {row}: invalid region name {name:?}")]
    InvalidName {
        /// Zero-based data row.
        row: usize,
        /// Raw name.
        name: String,
    },
}

/// Ordered list of [`Region`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionCatalog {
    regions: Vec<Region>,
}

impl RegionCatalog {
    /// A catalog with no regions (e.g. no bounds file for a directory).
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    /// Build a catalog from regions already in order.
    #[must_use]
    pub const fn from_regions(regions: Vec<Region>) -> Self {
        Self { regions }
    }

    /// Parse bounds text using `delimiter` between fields.
    ///
    /// # Errors
    ///
    /// Returns [`BoundsError`] when the header lacks a required column, a
    /// row is short or holds a non-integer coordinate, or a name contains
    /// a path separator or starts with `.`.
    pub fn parse(text: &str, delimiter: char) -> Result<Self, BoundsError> {
        let mut lines = text
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty());

        let Some(header) = lines.next() else {
            return Ok(Self::empty());
        };
        let header: Vec<&str> = split_fields(header, delimiter).collect();

        let mut indices = [0_usize; 5];
        for (slot, column) in indices.iter_mut().zip(COLUMNS) {
            *slot = header
                .iter()
                .position(|h| h.eq_ignore_ascii_case(column))
                .ok_or(BoundsError::MissingColumn(column))?;
        }
        let needed = indices.iter().max().map_or(0, |m| m + 1);

        let mut regions = Vec::new();
        for (row, line) in lines.enumerate() {
            let fields: Vec<&str> = split_fields(line, delimiter).collect();
            if fields.len() < needed {
                return Err(BoundsError::FieldCount {
                    row,
                    expected: needed,
                    found: fields.len(),
                });
            }
            let coord = |i: usize| -> Result<usize, BoundsError> {
                let value = fields[indices[i]];
                value.parse().map_err(|_| BoundsError::InvalidValue {
                    row,
                    column: COLUMNS[i],
                    value: value.to_owned(),
                })
            };
            let name = fields[indices[0]];
            if !is_file_name_safe(name) {
                return Err(BoundsError::InvalidName {
                    row,
                    name: name.to_owned(),
                });
            }
            regions.push(Region {
                name: name.to_owned(),
                row,
                bounds: Bounds::new(coord(1)?, coord(2)?, coord(3)?, coord(4)?),
            });
        }

        Ok(Self { regions })
    }

    /// Regions in source order.
    pub fn iter(&self) -> std::slice::Iter<'_, Region> {
        self.regions.iter()
    }

    /// Number of regions.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.regions.len()
    }

    /// Returns `true` if there are no regions.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl<'a> IntoIterator for &'a RegionCatalog {
    type Item = &'a Region;
    type IntoIter = std::slice::Iter<'a, Region>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Region names become artifact file names: no separators, and no
/// leading dot (hidden files are skipped when listing sets).
fn is_file_name_safe(name: &str) -> bool {
    !name.starts_with('.') && !name.contains(['/', '\\', '\0'])
}

/// Split a line and strip whitespace and surrounding double quotes.
fn split_fields(line: &str, delimiter: char) -> impl Iterator<Item = &str> {
    line.split(delimiter).map(|f| {
        let f = f.trim();
        f.strip_prefix('"')
            .and_then(|f| f.strip_suffix('"'))
            .unwrap_or(f)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = "name|y0|y1|x0|x1\n\
                          Shorea Leprosula|30|60|9|21\n\
                          Macaranga Bancana|0|12|100|140\n\
                          Shorea Leprosula|5|25|5|25\n";

    #[test]
    fn parses_rows_in_order() {
        let catalog = RegionCatalog::parse(SAMPLE, '|').unwrap();
        assert_eq!(catalog.len(), 3);
        let keys: Vec<String> = catalog.iter().map(Region::key).collect();
        assert_eq!(
            keys,
            [
                "Shorea Leprosula_0",
                "Macaranga Bancana_1",
                "Shorea Leprosula_2"
            ]
        );
        assert_eq!(catalog.iter().next().unwrap().bounds, Bounds::new(30, 60, 9, 21));
    }

    #[test]
    fn header_columns_may_be_reordered() {
        let text = "x0,x1,name,y0,y1,extra\n1,2,Tree,3,4,ignored\n";
        let catalog = RegionCatalog::parse(text, ',').unwrap();
        let region = catalog.iter().next().unwrap();
        assert_eq!(region.name, "Tree");
        assert_eq!(region.bounds, Bounds::new(3, 4, 1, 2));
    }

    #[test]
    fn blank_lines_and_crlf_are_ignored() {
        let text = "name|y0|y1|x0|x1\r\n\r\nA|0|1|0|1\r\n\nB|1|2|1|2\r\n";
        let catalog = RegionCatalog::parse(text, '|').unwrap();
        let rows: Vec<usize> = catalog.iter().map(|r| r.row).collect();
        assert_eq!(rows, [0, 1]);
    }

    #[test]
    fn quoted_names_are_unwrapped() {
        let text = "name|y0|y1|x0|x1\n\"Ficus | sp\"|0|1|0|1\n";
        // Quoted delimiters are not supported: the fields shift out of line.
        assert!(RegionCatalog::parse(text, '|').is_err());
        let text = "name|y0|y1|x0|x1\n\"Ficus sp\"|0|1|0|1\n";
        let catalog = RegionCatalog::parse(text, '|').unwrap();
        assert_eq!(catalog.iter().next().unwrap().name, "Ficus sp");
    }

    #[test]
    fn missing_column_is_reported() {
        let err = RegionCatalog::parse("name|y0|y1|x0\nA|0|1|0\n", '|').unwrap_err();
        assert_eq!(err, BoundsError::MissingColumn("x1"));
    }

    #[test]
    fn negative_coordinate_is_invalid() {
        let err = RegionCatalog::parse("name|y0|y1|x0|x1\nA|-1|1|0|1\n", '|').unwrap_err();
        assert!(matches!(err, BoundsError::InvalidValue { row: 0, column: "y0", .. }));
    }

    #[test]
    fn short_row_is_reported() {
        let err = RegionCatalog::parse("name|y0|y1|x0|x1\nA|0|1\n", '|').unwrap_err();
        assert!(matches!(err, BoundsError::FieldCount { row: 0, expected: 5, found: 3 }));
    }

    #[test]
    fn path_like_names_are_rejected() {
        for name in ["../../escaped", "a/b", "a\\b", ".hidden"] {
            let text = format!("name|y0|y1|x0|x1\n{name}|0|1|0|1\n");
            let err = RegionCatalog::parse(&text, '|').unwrap_err();
            assert!(matches!(err, BoundsError::InvalidName { row: 0, .. }), "{name}");
        }
        assert!(RegionCatalog::parse("name|y0|y1|x0|x1\nFicus sp.|0|1|0|1\n", '|').is_ok());
    }

    #[test]
    fn empty_text_yields_empty_catalog() {
        assert!(RegionCatalog::parse("", '|').unwrap().is_empty());
    }
}
