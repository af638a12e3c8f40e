use crate::cell::{Cell, Record};
use crate::error::{BackOfficeError, Result};
use crate::repository::{RowStore, TableSchema};
use crate::schema::{CurrencyCode, MovementKind, MovementRequest};
use crate::store::TableStore;
use chrono::NaiveDateTime;
use log::info;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const MOVEMENT_COLUMNS: [&str; 10] = [
    "Fecha",
    "Detalle",
    "Tipo",
    "Categoría",
    "Monto",
    "Moneda",
    "Cuenta destino",
    "Comentarios",
    "Usuario",
    "ID",
];

/// One signed ledger entry against a single account/currency pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub date: NaiveDateTime,
    pub detail: String,
    pub kind: MovementKind,
    pub category: String,
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub destination_account: String,
    pub comments: String,
    pub actor: String,
    pub id: i64,
}

impl Movement {
    pub fn from_request(raw: &MovementRequest, id: i64, now: NaiveDateTime) -> Self {
        Self {
            date: raw.date.unwrap_or(now),
            detail: raw.detail.trim().to_string(),
            kind: MovementKind::parse(&raw.kind),
            category: raw.category.trim().to_string(),
            amount: raw.amount,
            currency: CurrencyCode::normalize(&raw.currency),
            destination_account: raw.destination_account.trim().to_string(),
            comments: raw.comments.trim().to_string(),
            actor: raw.actor.trim().to_string(),
            id,
        }
    }

    pub fn is_marketing(&self) -> bool {
        self.kind == MovementKind::AdSpend || self.category.eq_ignore_ascii_case("marketing")
    }
}

impl TableSchema for Movement {
    fn columns() -> &'static [&'static str] {
        &MOVEMENT_COLUMNS
    }

    fn date_column() -> Option<&'static str> {
        Some("Fecha")
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("Fecha".into(), Cell::from(self.date));
        record.insert("Detalle".into(), Cell::text(self.detail.clone()));
        record.insert("Tipo".into(), Cell::text(self.kind.label()));
        record.insert("Categoría".into(), Cell::text(self.category.clone()));
        record.insert("Monto".into(), Cell::from(self.amount));
        record.insert("Moneda".into(), Cell::text(self.currency.code()));
        record.insert(
            "Cuenta destino".into(),
            Cell::text(self.destination_account.clone()),
        );
        record.insert("Comentarios".into(), Cell::text(self.comments.clone()));
        record.insert("Usuario".into(), Cell::text(self.actor.clone()));
        record.insert("ID".into(), Cell::from(self.id));
        record
    }

    fn from_record(record: &Record) -> Result<Self> {
        let text = |column: &str| record.get(column).map(Cell::as_text).unwrap_or_default();

        let date = record
            .get("Fecha")
            .and_then(Cell::as_datetime)
            .ok_or_else(|| BackOfficeError::InvalidRecord {
                table: "movements".to_string(),
                details: format!("movement '{}' has no readable date", text("Detalle")),
            })?;

        Ok(Self {
            date,
            detail: text("Detalle"),
            kind: MovementKind::parse(&text("Tipo")),
            category: text("Categoría"),
            amount: record
                .get("Monto")
                .and_then(Cell::as_decimal)
                .unwrap_or_default(),
            currency: CurrencyCode::normalize(&text("Moneda")),
            destination_account: text("Cuenta destino"),
            comments: text("Comentarios"),
            actor: text("Usuario"),
            id: record.get("ID").and_then(Cell::as_i64).unwrap_or_default(),
        })
    }
}

pub fn record_movement<S: TableStore>(
    store: &mut RowStore<S>,
    raw: &MovementRequest,
    now: NaiveDateTime,
) -> Result<Movement> {
    let table = store.tables().movements.clone();
    store.ensure_table(&table, &MOVEMENT_COLUMNS)?;

    let id = store.next_id(&table, "ID")?;
    let movement = Movement::from_request(raw, id, now);
    store.insert(&table, &movement)?;

    info!(
        "Recorded movement #{} ({}, {} {})",
        movement.id, movement.kind, movement.amount, movement.currency
    );
    Ok(movement)
}
