use crate::cell::{Cell, Record};
use crate::error::Result;
use crate::repository::{RowStore, TableSchema};
use crate::schema::{CurrencyCode, StockItemRequest};
use crate::store::TableStore;
use chrono::NaiveDateTime;
use log::info;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const STOCK_COLUMNS: [&str; 13] = [
    "ID",
    "Fecha",
    "Tipo de producto",
    "Modelo",
    "Capacidad",
    "Color",
    "Estado",
    "IMEI",
    "Costo",
    "Moneda",
    "Proveedor",
    "Situación",
    "Comentarios",
];

pub const DEFAULT_STOCK_STATUS: &str = "Disponible";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockItem {
    pub id: i64,
    pub date: Option<NaiveDateTime>,
    pub product_type: String,
    pub model: String,
    pub capacity: String,
    pub color: String,
    pub condition: String,
    pub imei: String,
    pub cost: Decimal,
    pub currency: CurrencyCode,
    pub supplier: String,
    pub status: String,
    pub comments: String,
}

impl StockItem {
    pub fn from_request(raw: &StockItemRequest, id: i64, now: NaiveDateTime) -> Self {
        let status = raw
            .status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_STOCK_STATUS);

        Self {
            id,
            date: Some(now),
            product_type: raw.product_type.trim().to_string(),
            model: raw.model.trim().to_string(),
            capacity: raw.capacity.trim().to_string(),
            color: raw.color.trim().to_string(),
            condition: raw.condition.trim().to_string(),
            imei: raw.imei.trim().to_string(),
            cost: raw.cost,
            currency: CurrencyCode::normalize(&raw.currency),
            supplier: raw.supplier.trim().to_string(),
            status: status.to_string(),
            comments: raw.comments.trim().to_string(),
        }
    }
}

impl TableSchema for StockItem {
    fn columns() -> &'static [&'static str] {
        &STOCK_COLUMNS
    }

    fn date_column() -> Option<&'static str> {
        Some("Fecha")
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("ID".into(), Cell::from(self.id));
        record.insert("Fecha".into(), self.date.map_or(Cell::Empty, Cell::from));
        record.insert("Tipo de producto".into(), Cell::text(self.product_type.clone()));
        record.insert("Modelo".into(), Cell::text(self.model.clone()));
        record.insert("Capacidad".into(), Cell::text(self.capacity.clone()));
        record.insert("Color".into(), Cell::text(self.color.clone()));
        record.insert("Estado".into(), Cell::text(self.condition.clone()));
        record.insert("IMEI".into(), Cell::text(self.imei.clone()));
        record.insert("Costo".into(), Cell::from(self.cost));
        record.insert("Moneda".into(), Cell::text(self.currency.code()));
        record.insert("Proveedor".into(), Cell::text(self.supplier.clone()));
        record.insert("Situación".into(), Cell::text(self.status.clone()));
        record.insert("Comentarios".into(), Cell::text(self.comments.clone()));
        record
    }

    fn from_record(record: &Record) -> Result<Self> {
        let text = |column: &str| record.get(column).map(Cell::as_text).unwrap_or_default();
        let status = match text("Situación") {
            s if s.is_empty() => DEFAULT_STOCK_STATUS.to_string(),
            s => s,
        };

        Ok(Self {
            id: record.get("ID").and_then(Cell::as_i64).unwrap_or_default(),
            date: record.get("Fecha").and_then(Cell::as_datetime),
            product_type: text("Tipo de producto"),
            model: text("Modelo"),
            capacity: text("Capacidad"),
            color: text("Color"),
            condition: text("Estado"),
            imei: text("IMEI"),
            cost: record
                .get("Costo")
                .and_then(Cell::as_decimal)
                .unwrap_or_default(),
            currency: CurrencyCode::normalize(&text("Moneda")),
            supplier: text("Proveedor"),
            status,
            comments: text("Comentarios"),
        })
    }
}

pub fn record_stock_item<S: TableStore>(
    store: &mut RowStore<S>,
    raw: &StockItemRequest,
    now: NaiveDateTime,
) -> Result<StockItem> {
    let table = store.tables().stock.clone();
    store.ensure_table(&table, &STOCK_COLUMNS)?;

    let id = store.next_id(&table, "ID")?;
    let item = StockItem::from_request(raw, id, now);
    store.insert(&table, &item)?;

    info!("Added stock item #{} ({} {})", item.id, item.product_type, item.model);
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::repository::ReadOrder;
    use crate::store::{MemoryStore, Table};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    #[test]
    fn test_default_status() {
        let raw = StockItemRequest {
            product_type: "iPhone 12".to_string(),
            status: Some("  ".to_string()),
            cost: dec!(310),
            ..Default::default()
        };
        let item = StockItem::from_request(&raw, 1, now());
        assert_eq!(item.status, "Disponible");
        assert_eq!(item.currency, CurrencyCode::Usd);
    }

    #[test]
    fn test_round_trip() {
        let raw = StockItemRequest {
            product_type: "iPad".to_string(),
            model: "Air".to_string(),
            imei: "356789".to_string(),
            cost: dec!(420.5),
            currency: "USD".to_string(),
            supplier: "Mayorista Norte".to_string(),
            status: Some("Reservado".to_string()),
            ..Default::default()
        };
        let item = StockItem::from_request(&raw, 8, now());
        assert_eq!(StockItem::from_record(&item.to_record()).unwrap(), item);
    }

    #[test]
    fn test_record_into_legacy_table_adds_columns() {
        let mut mem = MemoryStore::new();
        mem.insert_table(
            "Stock",
            Table::new(vec!["ID".to_string(), "Modelo".to_string()]),
        );
        let mut store = RowStore::new(mem, StorageConfig::default());

        let raw = StockItemRequest {
            model: "13 mini".to_string(),
            ..Default::default()
        };
        let item = record_stock_item(&mut store, &raw, now()).unwrap();
        assert_eq!(item.id, 1);

        let table = store.inner().read_table("Stock").unwrap();
        assert_eq!(table.headers.len(), STOCK_COLUMNS.len());
        assert_eq!(&table.headers[..2], &["ID".to_string(), "Modelo".to_string()]);

        let items: Vec<StockItem> = store.find_all_typed("Stock", ReadOrder::Oldest).unwrap();
        assert_eq!(items, vec![item]);
    }
}
