//! Cell values as they come out of (and go into) the tabular store.
//!
//! Sheets are edited by hand, so every accessor here is lenient: a number typed
//! as text still reads as a number and an unparseable value reads as `None`
//! rather than failing the whole row.

use crate::utils::parse_timestamp;
use chrono::NaiveDateTime;
use rust_decimal::prelude::*;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Bool(bool),
    Number(Decimal),
    DateTime(NaiveDateTime),
    Text(String),
}

/// One row keyed by trimmed header text.
pub type Record = BTreeMap<String, Cell>;

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(value)
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Display form, trimmed. Empty cells yield an empty string.
    pub fn as_text(&self) -> String {
        match self {
            Cell::Text(s) => s.trim().to_string(),
            Cell::Empty => String::new(),
            other => other.to_string(),
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Text(s) => parse_decimal(s),
            Cell::Bool(_) | Cell::DateTime(_) | Cell::Empty => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_decimal().and_then(|d| d.trunc().to_i64())
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Cell::DateTime(dt) => Some(*dt),
            Cell::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Cell::Bool(b) => *b,
            Cell::Text(s) => matches!(
                s.trim().to_lowercase().as_str(),
                "true" | "si" | "sí" | "yes" | "x" | "1"
            ),
            Cell::Number(n) => !n.is_zero(),
            _ => false,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Bool(b) => write!(f, "{}", b),
            Cell::Number(n) => write!(f, "{}", n.normalize()),
            Cell::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            Cell::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<Decimal> for Cell {
    fn from(value: Decimal) -> Self {
        Cell::Number(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Number(Decimal::from(value))
    }
}

impl From<u32> for Cell {
    fn from(value: u32) -> Self {
        Cell::Number(Decimal::from(value))
    }
}

impl From<NaiveDateTime> for Cell {
    fn from(value: NaiveDateTime) -> Self {
        Cell::DateTime(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::text(value)
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::text(value)
    }
}

/// Parses amounts the way they show up in the sheet: optional currency
/// symbol, optional thousands separators, comma or dot as decimal mark.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches("US$")
        .trim_start_matches('$')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    if let Ok(value) = Decimal::from_str(&cleaned) {
        return Some(value);
    }

    let normalized = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        // "1.234,56"
        (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        // "1,234.56"
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        // "12,5"
        (None, Some(_)) => cleaned.replace(',', "."),
        _ => cleaned,
    };

    Decimal::from_str(&normalized).ok()
}
