//! Update operators.
//!
//! Each operator packs into its own array: `[op, field, args...]`, e.g.
//! `["=", 1, "new"]` or `[":", 2, 0, 3, "abc"]`.

use rmpv::Value;

use crate::codec::value_as_u32;
use crate::error::{IprotoError, Result};

/// One field modification applied by an update.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    /// `+`: numeric addition.
    Add { field: u32, value: Value },
    /// `-`: numeric subtraction.
    Sub { field: u32, value: Value },
    /// `&`: bitwise and.
    BitAnd { field: u32, value: u64 },
    /// `^`: bitwise xor.
    BitXor { field: u32, value: u64 },
    /// `|`: bitwise or.
    BitOr { field: u32, value: u64 },
    /// `#`: delete `count` fields starting at `field`.
    Delete { field: u32, count: u32 },
    /// `!`: insert a field before `field`.
    Insert { field: u32, value: Value },
    /// `=`: assign a field.
    Assign { field: u32, value: Value },
    /// `:`: string splice.
    Splice {
        field: u32,
        offset: i64,
        length: u32,
        replacement: String,
    },
}

impl Operator {
    pub fn assign(field: u32, value: impl Into<Value>) -> Self {
        Operator::Assign {
            field,
            value: value.into(),
        }
    }

    pub fn add(field: u32, value: impl Into<Value>) -> Self {
        Operator::Add {
            field,
            value: value.into(),
        }
    }

    pub fn sub(field: u32, value: impl Into<Value>) -> Self {
        Operator::Sub {
            field,
            value: value.into(),
        }
    }

    pub fn insert(field: u32, value: impl Into<Value>) -> Self {
        Operator::Insert {
            field,
            value: value.into(),
        }
    }

    pub fn delete(field: u32, count: u32) -> Self {
        Operator::Delete { field, count }
    }

    /// Operator symbol as sent on the wire.
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Add { .. } => "+",
            Operator::Sub { .. } => "-",
            Operator::BitAnd { .. } => "&",
            Operator::BitXor { .. } => "^",
            Operator::BitOr { .. } => "|",
            Operator::Delete { .. } => "#",
            Operator::Insert { .. } => "!",
            Operator::Assign { .. } => "=",
            Operator::Splice { .. } => ":",
        }
    }

    /// Target field number.
    pub fn field(&self) -> u32 {
        match self {
            Operator::Add { field, .. }
            | Operator::Sub { field, .. }
            | Operator::BitAnd { field, .. }
            | Operator::BitXor { field, .. }
            | Operator::BitOr { field, .. }
            | Operator::Delete { field, .. }
            | Operator::Insert { field, .. }
            | Operator::Assign { field, .. }
            | Operator::Splice { field, .. } => *field,
        }
    }

    /// Wire tuple for this operator.
    pub fn as_tuple(&self) -> Vec<Value> {
        let mut tuple = vec![Value::from(self.symbol()), Value::from(self.field())];
        match self {
            Operator::Add { value, .. }
            | Operator::Sub { value, .. }
            | Operator::Insert { value, .. }
            | Operator::Assign { value, .. } => tuple.push(value.clone()),
            Operator::BitAnd { value, .. }
            | Operator::BitXor { value, .. }
            | Operator::BitOr { value, .. } => tuple.push(Value::from(*value)),
            Operator::Delete { count, .. } => tuple.push(Value::from(*count)),
            Operator::Splice {
                offset,
                length,
                replacement,
                ..
            } => {
                tuple.push(Value::from(*offset));
                tuple.push(Value::from(*length));
                tuple.push(Value::from(replacement.as_str()));
            }
        }
        tuple
    }

    /// Parse an operator back from its wire tuple.
    pub fn from_tuple(tuple: &[Value]) -> Result<Self> {
        let (symbol, field, args) = match tuple {
            [symbol, field, args @ ..] => (symbol, field, args),
            _ => {
                return Err(IprotoError::Decode(format!(
                    "Operator tuple too short: {} fields",
                    tuple.len()
                )))
            }
        };
        let symbol = symbol
            .as_str()
            .ok_or_else(|| IprotoError::Decode(format!("Operator is not a string: {}", symbol)))?;
        let field = value_as_u32(field, "Operator field")?;

        let single = || match args {
            [value] => Ok(value.clone()),
            _ => Err(IprotoError::Decode(format!(
                "Operator '{}' takes one argument, got {}",
                symbol,
                args.len()
            ))),
        };
        let bits = || {
            single()?
                .as_u64()
                .ok_or_else(|| IprotoError::Decode(format!("Operator '{}' needs an unsigned", symbol)))
        };

        let op = match symbol {
            "+" => Operator::Add {
                field,
                value: single()?,
            },
            "-" => Operator::Sub {
                field,
                value: single()?,
            },
            "&" => Operator::BitAnd {
                field,
                value: bits()?,
            },
            "^" => Operator::BitXor {
                field,
                value: bits()?,
            },
            "|" => Operator::BitOr {
                field,
                value: bits()?,
            },
            "#" => Operator::Delete {
                field,
                count: value_as_u32(&single()?, "Delete count")?,
            },
            "!" => Operator::Insert {
                field,
                value: single()?,
            },
            "=" => Operator::Assign {
                field,
                value: single()?,
            },
            ":" => match args {
                [offset, length, replacement] => Operator::Splice {
                    field,
                    offset: offset.as_i64().ok_or_else(|| {
                        IprotoError::Decode(format!("Splice offset is not an integer: {}", offset))
                    })?,
                    length: value_as_u32(length, "Splice length")?,
                    replacement: replacement
                        .as_str()
                        .ok_or_else(|| {
                            IprotoError::Decode(format!(
                                "Splice replacement is not a string: {}",
                                replacement
                            ))
                        })?
                        .to_string(),
                },
                _ => {
                    return Err(IprotoError::Decode(format!(
                        "Splice takes three arguments, got {}",
                        args.len()
                    )))
                }
            },
            other => {
                return Err(IprotoError::Decode(format!("Unknown operator '{}'", other)));
            }
        };

        Ok(op)
    }
}
