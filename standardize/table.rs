//! # Tables
//!
//! A small column-oriented table that is both the input and the output of
//! standardization. Columns are typed the way a regression front end sees
//! them: numeric, logical, free text, or a factor with an explicit level set.
//!
//! Missing values are `NaN` in numeric columns and `None` everywhere else.

use ahash::{AHashMap, AHashSet};
use ndarray::{Array1, Array2};
use thiserror::Error;

/// Errors raised while building or querying a [`Table`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("The column '{0}' was not found in the table. Please check spelling and case.")]
    ColumnNotFound(String),

    #[error("Column '{name}' has {found} rows, but the table has {expected}.")]
    LengthMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("The column name '{0}' appears more than once.")]
    DuplicateColumn(String),

    #[error("Value '{value}' is not one of the declared factor levels {levels:?}.")]
    UnknownLevel { value: String, levels: Vec<String> },

    #[error("The factor level '{0}' is declared more than once.")]
    DuplicateLevel(String),
}

/// A categorical column: a level set plus one optional level index per row.
///
/// The level order is significant for ordered factors. A factor produced by
/// standardization also carries the contrast matrix it should be coded with.
#[derive(Debug, Clone, PartialEq)]
pub struct Factor {
    levels: Vec<String>,
    codes: Vec<Option<u32>>,
    ordered: bool,
    contrasts: Option<Array2<f64>>,
}

impl Factor {
    /// Builds a factor whose levels are the distinct non-missing values in
    /// order of first appearance.
    pub fn from_values<I, S>(values: I, ordered: bool) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        let mut levels: Vec<String> = Vec::new();
        let mut lookup: AHashMap<String, u32> = AHashMap::new();
        let codes = values
            .into_iter()
            .map(|value| {
                value.map(|v| {
                    let v = v.as_ref();
                    match lookup.get(v) {
                        Some(&code) => code,
                        None => {
                            let code = levels.len() as u32;
                            levels.push(v.to_string());
                            lookup.insert(v.to_string(), code);
                            code
                        }
                    }
                })
            })
            .collect();
        Self {
            levels,
            codes,
            ordered,
            contrasts: None,
        }
    }

    /// Builds a factor over a declared level set. Values outside the set are
    /// rejected.
    pub fn with_levels<I, S>(values: I, levels: Vec<String>, ordered: bool) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        let mut lookup: AHashMap<&str, u32> = AHashMap::with_capacity(levels.len());
        for (i, level) in levels.iter().enumerate() {
            if lookup.insert(level.as_str(), i as u32).is_some() {
                return Err(TableError::DuplicateLevel(level.clone()));
            }
        }
        let codes = values
            .into_iter()
            .map(|value| match value {
                None => Ok(None),
                Some(v) => lookup.get(v.as_ref()).copied().map(Some).ok_or_else(|| {
                    TableError::UnknownLevel {
                        value: v.as_ref().to_string(),
                        levels: levels.clone(),
                    }
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            levels,
            codes,
            ordered,
            contrasts: None,
        })
    }

    /// Attaches a contrast matrix (one row per level).
    pub fn with_contrasts(mut self, contrasts: Array2<f64>) -> Self {
        self.contrasts = Some(contrasts);
        self
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn codes(&self) -> &[Option<u32>] {
        &self.codes
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    pub fn contrasts(&self) -> Option<&Array2<f64>> {
        self.contrasts.as_ref()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// The level label of every row.
    pub fn labels(&self) -> impl Iterator<Item = Option<&str>> + '_ {
        self.codes
            .iter()
            .map(|code| code.map(|c| self.levels[c as usize].as_str()))
    }

    /// Declared levels that actually occur, in declared order.
    pub fn observed_levels(&self) -> Vec<String> {
        let mut seen = vec![false; self.levels.len()];
        for code in self.codes.iter().flatten() {
            seen[*code as usize] = true;
        }
        self.levels
            .iter()
            .zip(seen)
            .filter(|(_, used)| *used)
            .map(|(level, _)| level.clone())
            .collect()
    }
}

/// One typed column of a [`Table`].
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Array1<f64>),
    Logical(Vec<Option<bool>>),
    Text(Vec<Option<String>>),
    Factor(Factor),
}

impl Column {
    /// Convenience constructor for a numeric column.
    pub fn numeric(values: impl Into<Vec<f64>>) -> Self {
        Column::Numeric(Array1::from_vec(values.into()))
    }

    /// Convenience constructor for a text column without missing values.
    pub fn text<S: AsRef<str>>(values: &[S]) -> Self {
        Column::Text(values.iter().map(|v| Some(v.as_ref().to_string())).collect())
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(values) => values.len(),
            Column::Logical(values) => values.len(),
            Column::Text(values) => values.len(),
            Column::Factor(factor) => factor.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short human-readable name of the storage type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Column::Numeric(_) => "numeric",
            Column::Logical(_) => "logical",
            Column::Text(_) => "text",
            Column::Factor(factor) if factor.is_ordered() => "ordered factor",
            Column::Factor(_) => "factor",
        }
    }

    pub fn as_numeric(&self) -> Option<&Array1<f64>> {
        match self {
            Column::Numeric(values) => Some(values),
            _ => None,
        }
    }

    /// True when the observed values are categorical by nature.
    pub fn is_textual(&self) -> bool {
        !matches!(self, Column::Numeric(_))
    }

    /// True for a factor declared as ordered.
    pub fn is_ordered_factor(&self) -> bool {
        matches!(self, Column::Factor(factor) if factor.is_ordered())
    }

    /// The textual label of every row; `None` marks a missing value.
    ///
    /// Numbers use the shortest representation that round-trips, so the same
    /// value always yields the same label at fit and at prediction time.
    pub fn labels(&self) -> Vec<Option<String>> {
        match self {
            Column::Numeric(values) => values
                .iter()
                .map(|&v| if v.is_nan() { None } else { Some(format_number(v)) })
                .collect(),
            Column::Logical(values) => values
                .iter()
                .map(|v| v.map(|b| if b { "TRUE" } else { "FALSE" }.to_string()))
                .collect(),
            Column::Text(values) => values.clone(),
            Column::Factor(factor) => factor.labels().map(|v| v.map(str::to_string)).collect(),
        }
    }

    /// Distinct non-missing labels in order of first appearance, except for
    /// factors, which report their observed levels in declared order.
    pub fn distinct_labels(&self) -> Vec<String> {
        if let Column::Factor(factor) = self {
            return factor.observed_levels();
        }
        let mut seen = AHashSet::new();
        self.labels()
            .into_iter()
            .flatten()
            .filter(|label| seen.insert(label.clone()))
            .collect()
    }
}

/// Formats a number the way it is used as a level or group label.
pub fn format_number(value: f64) -> String {
    format!("{value}")
}

/// An ordered collection of equally long, uniquely named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from `(name, column)` pairs.
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Column)>) -> Result<Self, TableError> {
        let mut table = Self::new();
        for (name, column) in columns {
            table.push_column(name, column)?;
        }
        Ok(table)
    }

    /// Appends a column, enforcing unique names and a common height.
    pub fn push_column(&mut self, name: impl Into<String>, column: Column) -> Result<(), TableError> {
        let name = name.into();
        if self.names.iter().any(|n| n == &name) {
            return Err(TableError::DuplicateColumn(name));
        }
        if let Some(first) = self.columns.first() {
            if first.len() != column.len() {
                return Err(TableError::LengthMismatch {
                    name,
                    expected: first.len(),
                    found: column.len(),
                });
            }
        }
        self.names.push(name);
        self.columns.push(column);
        Ok(())
    }

    /// Builder-style variant of [`Table::push_column`].
    pub fn with_column(mut self, name: impl Into<String>, column: Column) -> Result<Self, TableError> {
        self.push_column(name, column)?;
        Ok(self)
    }

    /// Number of rows (zero for a table without columns).
    pub fn height(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
    }

    pub fn column(&self, name: &str) -> Result<&Column, TableError> {
        self.get(name)
            .ok_or_else(|| TableError::ColumnNotFound(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> + '_ {
        self.names.iter().map(String::as_str).zip(self.columns.iter())
    }

    /// A new table holding the named columns, in the order given.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Table, TableError> {
        let mut out = Table::new();
        for name in names {
            let name = name.as_ref();
            out.push_column(name, self.column(name)?.clone())?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_column_rejects_ragged_and_duplicate_columns() {
        let mut table = Table::new();
        table.push_column("x", Column::numeric(vec![1.0, 2.0])).unwrap();

        let err = table
            .push_column("y", Column::numeric(vec![1.0, 2.0, 3.0]))
            .unwrap_err();
        assert_eq!(
            err,
            TableError::LengthMismatch {
                name: "y".to_string(),
                expected: 2,
                found: 3
            }
        );

        let err = table.push_column("x", Column::numeric(vec![0.0, 0.0])).unwrap_err();
        assert_eq!(err, TableError::DuplicateColumn("x".to_string()));
        assert_eq!(table.height(), 2);
        assert_eq!(table.width(), 1);
    }

    #[test]
    fn test_numeric_labels_are_stable() {
        let column = Column::numeric(vec![1.0, 2.5, f64::NAN, -3.0]);
        assert_eq!(
            column.labels(),
            vec![
                Some("1".to_string()),
                Some("2.5".to_string()),
                None,
                Some("-3".to_string())
            ]
        );
        assert_eq!(column.distinct_labels(), vec!["1", "2.5", "-3"]);
    }

    #[test]
    fn test_distinct_labels_keep_first_appearance() {
        let column = Column::Text(vec![
            Some("b".to_string()),
            None,
            Some("a".to_string()),
            Some("b".to_string()),
            Some("c".to_string()),
            Some("a".to_string()),
        ]);
        assert_eq!(column.distinct_labels(), vec!["b", "a", "c"]);

        let logical = Column::Logical(vec![Some(false), Some(true), Some(false), None]);
        assert_eq!(logical.distinct_labels(), vec!["FALSE", "TRUE"]);
    }

    #[test]
    fn test_factor_with_levels_rejects_unknown_values() {
        let levels = vec!["low".to_string(), "high".to_string()];
        let err = Factor::with_levels([Some("low"), Some("mid")], levels, true).unwrap_err();
        match err {
            TableError::UnknownLevel { value, .. } => assert_eq!(value, "mid"),
            other => panic!("Expected UnknownLevel, got {:?}", other),
        }
    }

    #[test]
    fn test_factor_observed_levels_keep_declared_order() {
        let levels = vec!["low".to_string(), "mid".to_string(), "high".to_string()];
        let factor =
            Factor::with_levels([Some("high"), None, Some("low"), Some("high")], levels, true)
                .unwrap();
        assert_eq!(factor.observed_levels(), vec!["low", "high"]);
        assert_eq!(factor.codes(), &[Some(2), None, Some(0), Some(2)]);
        assert!(Column::Factor(factor).is_ordered_factor());
    }

    #[test]
    fn test_select_reorders_columns() {
        let table = Table::from_columns(vec![
            ("a", Column::numeric(vec![1.0])),
            ("b", Column::text(&["u"])),
        ])
        .unwrap();
        let selected = table.select(&["b", "a"]).unwrap();
        assert_eq!(selected.names(), &["b".to_string(), "a".to_string()]);
        assert!(matches!(
            table.select(&["c"]),
            Err(TableError::ColumnNotFound(name)) if name == "c"
        ));
    }
}
