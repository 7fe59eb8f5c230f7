use std::collections::{BTreeMap, HashMap};

use crate::error::SqliteMiddlewareError;
use crate::types::RowValues;

/// Bound parameters for a single statement execution.
///
/// Either an ordered list bound to `?`/`?N` placeholders, or a keyed map bound
/// to `:name`/`@name`/`$name` placeholders.
///
/// ```rust
/// use sqlite_middleware::prelude::*;
///
/// let flat = params![1, 2, 3];
/// let aggregate = Params::from(vec![1, 2, 3]);
/// assert_eq!(flat, aggregate);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    #[default]
    None,
    Positional(Vec<RowValues>),
    Named(Vec<(String, RowValues)>),
}

impl Params {
    /// Build a named parameter set. Keys without a `:`, `@` or `$` prefix get `:`.
    pub fn named<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<RowValues>,
        I: IntoIterator<Item = (K, V)>,
    {
        Params::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (normalize_name(k.into()), v.into()))
                .collect(),
        )
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Positional(values) => values.is_empty(),
            Params::Named(pairs) => pairs.is_empty(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Params::None => 0,
            Params::Positional(values) => values.len(),
            Params::Named(pairs) => pairs.len(),
        }
    }

    /// Bind onto a freshly prepared (or freshly checked-out cached) statement.
    ///
    /// # Errors
    /// Returns `ParameterError` when there are more positional values than
    /// placeholders or a name does not exist in the statement.
    pub(crate) fn bind_to(
        &self,
        stmt: &mut rusqlite::Statement<'_>,
    ) -> Result<(), SqliteMiddlewareError> {
        let expected = stmt.parameter_count();
        match self {
            Params::None => Ok(()),
            Params::Positional(values) => {
                if values.len() > expected {
                    return Err(SqliteMiddlewareError::ParameterError(format!(
                        "statement takes {expected} parameters but {} were supplied",
                        values.len()
                    )));
                }
                for (idx, value) in values.iter().enumerate() {
                    stmt.raw_bind_parameter(idx + 1, value)?;
                }
                Ok(())
            }
            Params::Named(pairs) => {
                for (name, value) in pairs {
                    let idx = stmt.parameter_index(name)?.ok_or_else(|| {
                        SqliteMiddlewareError::ParameterError(format!(
                            "statement has no parameter named {name}"
                        ))
                    })?;
                    stmt.raw_bind_parameter(idx, value)?;
                }
                Ok(())
            }
        }
    }
}

fn normalize_name(name: String) -> String {
    if name.starts_with([':', '@', '$']) {
        name
    } else {
        format!(":{name}")
    }
}

impl From<()> for Params {
    fn from((): ()) -> Self {
        Params::None
    }
}

impl From<RowValues> for Params {
    fn from(value: RowValues) -> Self {
        Params::Positional(vec![value])
    }
}

macro_rules! impl_single_param {
    ($($t:ty),*) => {
        $(impl From<$t> for Params {
            fn from(value: $t) -> Self {
                Params::Positional(vec![RowValues::from(value)])
            }
        })*
    };
}

impl_single_param!(i32, i64, u32, f64, bool, String, &str);

impl<T: Into<RowValues>> From<Vec<T>> for Params {
    fn from(values: Vec<T>) -> Self {
        Params::Positional(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<RowValues>, const N: usize> From<[T; N]> for Params {
    fn from(values: [T; N]) -> Self {
        Params::Positional(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<RowValues> + Clone> From<&[T]> for Params {
    fn from(values: &[T]) -> Self {
        Params::Positional(values.iter().cloned().map(Into::into).collect())
    }
}

impl<K: Into<String>, V: Into<RowValues>> From<HashMap<K, V>> for Params {
    fn from(map: HashMap<K, V>) -> Self {
        Params::named(map)
    }
}

impl<K: Into<String>, V: Into<RowValues>> From<BTreeMap<K, V>> for Params {
    fn from(map: BTreeMap<K, V>) -> Self {
        Params::named(map)
    }
}

/// Build positional [`Params`] from a flat argument list.
///
/// `params![]` is [`Params::None`]; `params![a, b, c]` binds `a`, `b`, `c` in order.
#[macro_export]
macro_rules! params {
    () => {
        $crate::params::Params::None
    };
    ($($value:expr),+ $(,)?) => {
        $crate::params::Params::Positional(vec![$($crate::types::RowValues::from($value)),+])
    };
}

/// Build named [`Params`]: `named_params! { ":id" => 1, "name" => "alice" }`.
#[macro_export]
macro_rules! named_params {
    ($($name:expr => $value:expr),* $(,)?) => {
        $crate::params::Params::named(vec![$(($name, $crate::types::RowValues::from($value))),*])
    };
}
