//! Conversion between [`Table`] and `polars` data frames.
//!
//! Data usually arrives as a `DataFrame` loaded by some other component, and
//! standardized output is often handed on as one. Numeric columns become
//! `f64` with nulls as `NaN`, booleans stay logical, strings become text, and
//! categoricals become factors. Enum columns become ordered factors that keep
//! the declared category order.

use crate::table::{Column, Factor, Table, TableError};
use polars::prelude::{Column as PolarsColumn, *};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("The column '{column}' has the unsupported type {dtype}.")]
    UnsupportedType { column: String, dtype: String },
}

impl Table {
    /// Builds a table from every column of `df`.
    pub fn from_dataframe(df: &DataFrame) -> Result<Self, FrameError> {
        let mut table = Table::new();
        for column in df.get_columns() {
            let name = column.name().to_string();
            let series = column.as_materialized_series();
            let converted = internal::convert_series(&name, series)?;
            table.push_column(name, converted)?;
        }
        Ok(table)
    }

    /// Builds a data frame. Factors are written as string columns with their
    /// level labels.
    pub fn to_dataframe(&self) -> Result<DataFrame, FrameError> {
        let columns: Vec<PolarsColumn> = self
            .iter()
            .map(|(name, column)| PolarsColumn::from(internal::to_series(name, column)))
            .collect();
        Ok(DataFrame::new(columns)?)
    }
}

mod internal {
    use super::*;

    fn is_numeric(dtype: &DataType) -> bool {
        matches!(
            dtype,
            DataType::Float64
                | DataType::Float32
                | DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
        )
    }

    pub(super) fn convert_series(name: &str, series: &Series) -> Result<Column, FrameError> {
        let dtype = series.dtype();
        if is_numeric(dtype) {
            let casted = series.cast(&DataType::Float64)?;
            let values: Vec<f64> = casted
                .f64()?
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect();
            return Ok(Column::numeric(values));
        }

        match dtype {
            DataType::Boolean => Ok(Column::Logical(series.bool()?.into_iter().collect())),
            DataType::String => Ok(Column::Text(
                series
                    .str()?
                    .into_iter()
                    .map(|v| v.map(str::to_string))
                    .collect(),
            )),
            DataType::Categorical(..) | DataType::Enum(..) => {
                let ordered = matches!(dtype, DataType::Enum(..));
                let labels: Vec<Option<String>> = series
                    .cast(&DataType::String)?
                    .str()?
                    .into_iter()
                    .map(|v| v.map(str::to_string))
                    .collect();
                let codes: Vec<Option<u32>> = series
                    .to_physical_repr()
                    .cast(&DataType::UInt32)?
                    .u32()?
                    .into_iter()
                    .collect();

                // Levels in category order, restricted to those that occur.
                let mut coded: Vec<(u32, &str)> = codes
                    .iter()
                    .zip(&labels)
                    .filter_map(|(code, label)| Some(((*code)?, label.as_deref()?)))
                    .collect();
                coded.sort_unstable();
                coded.dedup();
                let levels: Vec<String> = coded.into_iter().map(|(_, l)| l.to_string()).collect();

                Ok(Column::Factor(Factor::with_levels(labels, levels, ordered)?))
            }
            other => Err(FrameError::UnsupportedType {
                column: name.to_string(),
                dtype: format!("{other:?}"),
            }),
        }
    }

    pub(super) fn to_series(name: &str, column: &Column) -> Series {
        match column {
            Column::Numeric(values) => {
                let values: Vec<Option<f64>> = values
                    .iter()
                    .map(|&v| if v.is_nan() { None } else { Some(v) })
                    .collect();
                Series::new(name.into(), values)
            }
            Column::Logical(values) => Series::new(name.into(), values.clone()),
            Column::Text(_) | Column::Factor(_) => Series::new(name.into(), column.labels()),
        }
    }
}
