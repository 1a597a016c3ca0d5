//! Conversion of text tables (CSV, spreadsheets) into feature collections.

use serde_json::{Map, Number, Value};

use crate::error::ImporterError;
use crate::importer::ImporterMonitor;
use crate::model::{
    AttributeDef, AttributeKind, Feature, FeatureCollection, FeatureSchema, Geometry, GeometryKind,
};

/// Number formats the user can choose from, written as a sample.
pub const NUMBER_FORMATS: &[&str] = &["1,234.56", "1.234,56", "1 234,56", "1234.56"];

const X_COLUMNS: &[&str] = &["x", "lon", "lng", "long", "longitude", "easting", "rechtswert"];
const Y_COLUMNS: &[&str] = &["y", "lat", "latitude", "northing", "hochwert"];

/// Decimal and grouping separators of a number format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberFormat {
    pub decimal: char,
    pub grouping: Option<char>,
}

impl NumberFormat {
    /// Parses a sample such as `1,234.56`.
    pub fn parse(pattern: &str) -> Option<NumberFormat> {
        let separators: Vec<char> = pattern.chars().filter(|c| !c.is_ascii_digit()).collect();
        match separators.as_slice() {
            [decimal] if *decimal == '.' || *decimal == ',' => Some(NumberFormat {
                decimal: *decimal,
                grouping: None,
            }),
            [grouping, decimal] if grouping != decimal => Some(NumberFormat {
                decimal: *decimal,
                grouping: Some(*grouping),
            }),
            _ => None,
        }
    }

    pub fn parse_integer(&self, text: &str) -> Option<i64> {
        let (sign, digits) = self.split_number(text)?;
        if digits.contains(self.decimal) {
            return None;
        }
        let plain = self.strip_grouping(digits)?;
        let value: i64 = plain.parse().ok()?;
        Some(if sign { -value } else { value })
    }

    pub fn parse_decimal(&self, text: &str) -> Option<f64> {
        let (sign, digits) = self.split_number(text)?;
        let (integer, fraction) = match digits.split_once(self.decimal) {
            Some((integer, fraction)) => (integer, Some(fraction)),
            None => (digits, None),
        };
        let integer = if integer.is_empty() {
            "0".to_string()
        } else {
            self.strip_grouping(integer)?
        };
        let mut plain = integer;
        if let Some(fraction) = fraction {
            if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            plain.push('.');
            plain.push_str(fraction);
        }
        let value: f64 = plain.parse().ok()?;
        Some(if sign { -value } else { value })
    }

    fn split_number<'a>(&self, text: &'a str) -> Option<(bool, &'a str)> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        })
    }

    /// Removes grouping separators, checking that groups have three digits.
    fn strip_grouping(&self, integer: &str) -> Option<String> {
        let groups: Vec<&str> = match self.grouping {
            Some(grouping) => integer.split(grouping).collect(),
            None => vec![integer],
        };
        let valid = groups.iter().enumerate().all(|(index, group)| {
            let digits = !group.is_empty() && group.chars().all(|c| c.is_ascii_digit());
            let sized = groups.len() == 1
                || (index == 0 && group.len() <= 3)
                || (index > 0 && group.len() == 3);
            digits && sized
        });
        valid.then(|| groups.concat())
    }
}

/// How rows of a table map to header and data.
#[derive(Debug, Clone, PartialEq)]
pub struct TableLayout {
    pub ignore_before_headline: usize,
    pub headlines: usize,
    pub ignore_after_headline: usize,
    pub number_format: NumberFormat,
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            ignore_before_headline: 0,
            headlines: 1,
            ignore_after_headline: 0,
            number_format: NumberFormat {
                decimal: '.',
                grouping: Some(','),
            },
        }
    }
}

/// Builds features from raw rows. Columns named like coordinates
/// (`lon`/`lat`, `x`/`y`, ...) become point geometries.
pub fn build_features(
    name: &str,
    rows: Vec<Vec<String>>,
    layout: &TableLayout,
    limit: usize,
    monitor: &ImporterMonitor,
) -> Result<FeatureCollection, ImporterError> {
    let mut rows = rows.into_iter().skip(layout.ignore_before_headline);
    let header_rows: Vec<Vec<String>> = rows.by_ref().take(layout.headlines).collect();
    let data: Vec<Vec<String>> = rows
        .skip(layout.ignore_after_headline)
        .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .collect();

    if data.len() > limit {
        return Err(ImporterError::LimitExceeded {
            limit,
            found: data.len(),
        });
    }

    let width = header_rows
        .iter()
        .chain(data.iter())
        .map(Vec::len)
        .max()
        .unwrap_or(0);
    let columns = column_names(&header_rows, width);
    let kinds: Vec<AttributeKind> = (0..width)
        .map(|index| column_kind(&data, index, &layout.number_format))
        .collect();

    let numeric = |index: &usize| {
        matches!(
            kinds[*index],
            AttributeKind::Integer | AttributeKind::Decimal
        )
    };
    let x_column = find_column(&columns, X_COLUMNS).filter(numeric);
    let y_column = find_column(&columns, Y_COLUMNS).filter(numeric);

    let mut schema = FeatureSchema::named(name);
    schema.attributes = columns
        .iter()
        .zip(&kinds)
        .map(|(column, kind)| AttributeDef {
            name: column.clone(),
            kind: *kind,
        })
        .collect();
    if x_column.is_some() && y_column.is_some() {
        schema.geometry = Some(GeometryKind::Point);
    }

    let mut collection = FeatureCollection::new(schema);
    for (row_index, row) in data.iter().enumerate() {
        if row_index % 1000 == 0 && monitor.is_canceled() {
            break;
        }
        let mut properties = Map::new();
        for (index, column) in columns.iter().enumerate() {
            let cell = row.get(index).map(String::as_str).unwrap_or("");
            properties.insert(
                column.clone(),
                cell_value(cell, kinds[index], &layout.number_format),
            );
        }
        let geometry = match (x_column, y_column) {
            (Some(x), Some(y)) => {
                let x = row.get(x).and_then(|c| layout.number_format.parse_decimal(c));
                let y = row.get(y).and_then(|c| layout.number_format.parse_decimal(c));
                x.zip(y).map(|(x, y)| Geometry::Point {
                    coordinates: [x, y],
                })
            }
            _ => None,
        };
        collection.features.push(Feature {
            id: format!("{}.{}", name, row_index + 1),
            geometry,
            properties,
        });
    }
    Ok(collection)
}

fn column_names(header_rows: &[Vec<String>], width: usize) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(width);
    for index in 0..width {
        let joined = header_rows
            .iter()
            .filter_map(|row| row.get(index))
            .map(|cell| cell.trim())
            .filter(|cell| !cell.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let base = if joined.is_empty() {
            format!("column{}", index + 1)
        } else {
            joined
        };
        let mut name = base.clone();
        let mut counter = 2;
        while names.contains(&name) {
            name = format!("{}_{}", base, counter);
            counter += 1;
        }
        names.push(name);
    }
    names
}

fn column_kind(data: &[Vec<String>], index: usize, format: &NumberFormat) -> AttributeKind {
    let mut cells = data
        .iter()
        .filter_map(|row| row.get(index))
        .map(|cell| cell.trim())
        .filter(|cell| !cell.is_empty())
        .peekable();
    if cells.peek().is_none() {
        return AttributeKind::String;
    }
    let mut kind = AttributeKind::Integer;
    for cell in cells {
        if kind == AttributeKind::Integer && format.parse_integer(cell).is_none() {
            kind = AttributeKind::Decimal;
        }
        if kind == AttributeKind::Decimal && format.parse_decimal(cell).is_none() {
            return AttributeKind::String;
        }
    }
    kind
}

fn find_column(columns: &[String], candidates: &[&str]) -> Option<usize> {
    columns
        .iter()
        .position(|column| candidates.iter().any(|c| c.eq_ignore_ascii_case(column.trim())))
}

fn cell_value(cell: &str, kind: AttributeKind, format: &NumberFormat) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    match kind {
        AttributeKind::Integer => format
            .parse_integer(trimmed)
            .map(Value::from)
            .unwrap_or_else(|| Value::String(trimmed.to_string())),
        AttributeKind::Decimal => format
            .parse_decimal(trimmed)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(trimmed.to_string())),
        _ => Value::String(cell.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(text: &str) -> Vec<Vec<String>> {
        text.lines()
            .map(|line| line.split(',').map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_number_format_parse() {
        let en = NumberFormat::parse("1,234.56").unwrap();
        assert_eq!(en.decimal, '.');
        assert_eq!(en.grouping, Some(','));
        let de = NumberFormat::parse("1.234,56").unwrap();
        assert_eq!(de.decimal, ',');
        assert_eq!(de.grouping, Some('.'));
        let plain = NumberFormat::parse("1234.56").unwrap();
        assert_eq!(plain.grouping, None);
        assert!(NumberFormat::parse("1234").is_none());
        for pattern in NUMBER_FORMATS {
            assert!(NumberFormat::parse(pattern).is_some(), "{}", pattern);
        }
    }

    #[test]
    fn test_parse_decimal_with_grouping() {
        let en = NumberFormat::parse("1,234.56").unwrap();
        assert_eq!(en.parse_decimal("1,234.5"), Some(1234.5));
        assert_eq!(en.parse_decimal("-13.4"), Some(-13.4));
        assert_eq!(en.parse_decimal(".5"), Some(0.5));
        assert_eq!(en.parse_decimal("1,5"), None);
        assert_eq!(en.parse_decimal("abc"), None);
        assert_eq!(en.parse_decimal("1e5"), None);

        let de = NumberFormat::parse("1.234,56").unwrap();
        assert_eq!(de.parse_decimal("1.234,5"), Some(1234.5));
        assert_eq!(de.parse_decimal("13,4"), Some(13.4));
    }

    #[test]
    fn test_parse_integer() {
        let en = NumberFormat::parse("1,234.56").unwrap();
        assert_eq!(en.parse_integer("1,234,567"), Some(1_234_567));
        assert_eq!(en.parse_integer("42"), Some(42));
        assert_eq!(en.parse_integer("4.2"), None);
        assert_eq!(en.parse_integer("12,34"), None);
    }

    #[test]
    fn test_build_points() {
        let table = rows("name,lon,lat\nA,13.4,52.5\nB,11.6,48.1\n");
        let collection = build_features(
            "points",
            table,
            &TableLayout::default(),
            100,
            &ImporterMonitor::new(),
        )
        .unwrap();

        assert_eq!(collection.len(), 2);
        assert_eq!(collection.schema.geometry, Some(GeometryKind::Point));
        let kinds: Vec<AttributeKind> =
            collection.schema.attributes.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AttributeKind::String,
                AttributeKind::Decimal,
                AttributeKind::Decimal
            ]
        );
        let first = &collection.features[0];
        assert_eq!(first.id, "points.1");
        assert_eq!(
            first.geometry,
            Some(Geometry::Point {
                coordinates: [13.4, 52.5]
            })
        );
        assert_eq!(first.properties["name"], json!("A"));
    }

    #[test]
    fn test_layout_skips_rows() {
        let table = rows("exported 2024\nid,value\nunit,kg\n1,10\n2,20\n");
        let layout = TableLayout {
            ignore_before_headline: 1,
            headlines: 1,
            ignore_after_headline: 1,
            ..TableLayout::default()
        };
        let collection =
            build_features("t", table, &layout, 100, &ImporterMonitor::new()).unwrap();
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.schema.attributes[0].name, "id");
        assert_eq!(collection.schema.attributes[1].kind, AttributeKind::Integer);
        assert!(collection.schema.geometry.is_none());
    }

    #[test]
    fn test_no_headline_generates_names() {
        let table = rows("1,2\n3,4\n");
        let layout = TableLayout {
            headlines: 0,
            ..TableLayout::default()
        };
        let collection =
            build_features("t", table, &layout, 100, &ImporterMonitor::new()).unwrap();
        let names: Vec<&str> = collection
            .schema
            .attributes
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["column1", "column2"]);
    }

    #[test]
    fn test_duplicate_header_names() {
        let table = rows("a,a,\n1,2,3\n");
        let collection = build_features(
            "t",
            table,
            &TableLayout::default(),
            100,
            &ImporterMonitor::new(),
        )
        .unwrap();
        let names: Vec<&str> = collection
            .schema
            .attributes
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "a_2", "column3"]);
    }

    #[test]
    fn test_limit_exceeded() {
        let table = rows("v\n1\n2\n3\n");
        let err = build_features(
            "t",
            table,
            &TableLayout::default(),
            2,
            &ImporterMonitor::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ImporterError::LimitExceeded { limit: 2, found: 3 }
        ));
    }
}
