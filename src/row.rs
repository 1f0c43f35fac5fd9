//! Result rows.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};

/// One row of a result set.
///
/// Column names are shared between all rows of the same result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row from shared column names and its values.
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Raw column values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value of a column by index or name.
    pub fn value<I: ColumnIndex>(&self, index: I) -> Option<&Value> {
        index
            .position(&self.columns)
            .and_then(|idx| self.values.get(idx))
    }

    /// Decode a column by index or name.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if the column does not exist or its value
    /// cannot be converted to `T`.
    pub fn get<T: FromValue, I: ColumnIndex>(&self, index: I) -> Result<T> {
        match self.value(&index) {
            Some(value) => T::from_value(value),
            None => Err(Error::Decode(format!("no such column: {}", index.describe()))),
        }
    }
}

/// A way to address a column: by position or by name.
pub trait ColumnIndex {
    /// Resolve to a column position.
    fn position(&self, columns: &[String]) -> Option<usize>;

    /// Human-readable form for error messages.
    fn describe(&self) -> String;
}

impl ColumnIndex for usize {
    fn position(&self, columns: &[String]) -> Option<usize> {
        (*self < columns.len()).then_some(*self)
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

impl ColumnIndex for str {
    fn position(&self, columns: &[String]) -> Option<usize> {
        columns.iter().position(|c| c == self)
    }

    fn describe(&self) -> String {
        format!("'{}'", self)
    }
}

impl<I: ColumnIndex + ?Sized> ColumnIndex for &I {
    fn position(&self, columns: &[String]) -> Option<usize> {
        (**self).position(columns)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Trait for decoding a row into a Rust type.
pub trait FromRow: Sized {
    /// Decode a row.
    fn from_row(row: &Row) -> Result<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(row.clone())
    }
}

macro_rules! impl_from_row_tuple {
    ($len:expr; $($idx:tt => $t:ident),+) => {
        impl<$($t: FromValue),+> FromRow for ($($t,)+) {
            fn from_row(row: &Row) -> Result<Self> {
                if row.len() < $len {
                    return Err(Error::Decode("not enough columns for tuple".into()));
                }
                Ok(($(row.get::<$t, usize>($idx)?,)+))
            }
        }
    };
}

impl_from_row_tuple!(1; 0 => T1);
impl_from_row_tuple!(2; 0 => T1, 1 => T2);
impl_from_row_tuple!(3; 0 => T1, 1 => T2, 2 => T3);
impl_from_row_tuple!(4; 0 => T1, 1 => T2, 2 => T3, 3 => T4);
impl_from_row_tuple!(5; 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5);
impl_from_row_tuple!(6; 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6);
