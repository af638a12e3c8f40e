use crate::cell::{Cell, Record};
use crate::error::{BackOfficeError, Result};
use crate::repository::{RowStore, TableSchema};
use crate::schema::{CurrencyCode, SaleRequest};
use crate::store::TableStore;
use crate::utils::month_abbrev;
use chrono::NaiveDateTime;
use log::{info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Export columns of the sales table, in sheet order.
pub const SALE_COLUMNS: [&str; 29] = [
    // customer
    "ID",
    "Fecha",
    "Mes",
    "Cliente",
    "Canal",
    "Contacto",
    "Email",
    // product
    "Cantidad",
    "Tipo de producto",
    "Modelo",
    "Capacidad",
    "Color",
    "Estado",
    "IMEI",
    // transaction
    "Forma de entrega",
    "Monto",
    "Moneda",
    // trade-in
    "Parte de pago",
    "Modelo parte de pago",
    "Capacidad parte de pago",
    "IMEI parte de pago",
    "Valor parte de pago",
    // financial
    "Cotización",
    "Costo",
    "Ganancia",
    // totals per currency
    "Total ARS",
    "Total USD",
    // audit
    "Comentarios",
    "Usuario",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrencyTotals {
    pub ars: Decimal,
    pub usd: Decimal,
}

impl CurrencyTotals {
    pub fn add(&mut self, currency: CurrencyCode, amount: Decimal) {
        match currency {
            CurrencyCode::Ars => self.ars += amount,
            CurrencyCode::Usd => self.usd += amount,
        }
    }

    /// Dollars plus pesos converted at `exchange_rate` (ARS per USD). Pesos are
    /// left out when no usable rate is known.
    pub fn usd_equivalent(&self, exchange_rate: Decimal) -> Decimal {
        if exchange_rate <= Decimal::ZERO {
            return self.usd;
        }
        match self
            .ars
            .checked_div(exchange_rate)
            .and_then(|pesos| self.usd.checked_add(pesos))
        {
            Some(total) => total,
            None => {
                warn!(
                    "Exchange rate {} overflows the peso conversion; counting dollars only",
                    exchange_rate
                );
                self.usd
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIn {
    pub model: String,
    pub capacity: String,
    pub imei: String,
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: i64,
    pub date: NaiveDateTime,
    pub month: String,
    pub customer_name: String,
    pub channel: String,
    pub contact: String,
    pub email: String,
    pub quantity: u32,
    pub product_type: String,
    pub model: String,
    pub capacity: String,
    pub color: String,
    pub condition: String,
    pub imei: String,
    pub delivery_method: String,
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub trade_in: Option<TradeIn>,
    pub exchange_rate: Decimal,
    pub cost_of_goods: Decimal,
    pub gross_profit: Decimal,
    pub totals: CurrencyTotals,
    pub comments: String,
    pub actor: String,
}

/// Profit recorded for a sale. The computed margin is used when positive;
/// otherwise the caller-supplied fallback is recorded instead.
pub fn gross_profit(
    usd_total: Decimal,
    cost_of_goods: Decimal,
    quantity: u32,
    fallback: Decimal,
) -> Decimal {
    let computed = cost_of_goods
        .checked_mul(Decimal::from(quantity))
        .and_then(|cost| usd_total.checked_sub(cost));
    match computed {
        Some(margin) if margin > Decimal::ZERO => margin,
        _ => fallback,
    }
}

impl Sale {
    pub fn from_request(raw: &SaleRequest, id: i64, now: NaiveDateTime) -> Self {
        let quantity = raw.quantity.filter(|q| *q > 0).unwrap_or(1);
        let currency = CurrencyCode::normalize(&raw.currency);

        let mut totals = CurrencyTotals::default();
        if raw.payments.is_empty() {
            totals.add(currency, raw.amount);
        } else {
            for payment in &raw.payments {
                totals.add(CurrencyCode::normalize(&payment.currency), payment.amount);
            }
        }

        let usd_total = totals.usd_equivalent(raw.exchange_rate);
        let gross_profit = gross_profit(
            usd_total,
            raw.cost_of_goods,
            quantity,
            raw.fallback_profit.unwrap_or_default(),
        );

        let trade_in = raw.trade_in.then(|| TradeIn {
            model: raw.trade_in_model.trim().to_string(),
            capacity: raw.trade_in_capacity.trim().to_string(),
            imei: raw.trade_in_imei.trim().to_string(),
            value: raw.trade_in_value,
        });

        Self {
            id,
            date: now,
            month: month_abbrev(now.date()).to_string(),
            customer_name: raw.customer_name.trim().to_string(),
            channel: raw.channel.trim().to_string(),
            contact: raw.contact.trim().to_string(),
            email: raw.email.trim().to_string(),
            quantity,
            product_type: raw.product_type.trim().to_string(),
            model: raw.model.trim().to_string(),
            capacity: raw.capacity.trim().to_string(),
            color: raw.color.trim().to_string(),
            condition: raw.condition.trim().to_string(),
            imei: raw.imei.trim().to_string(),
            delivery_method: raw.delivery_method.trim().to_string(),
            amount: raw.amount,
            currency,
            trade_in,
            exchange_rate: raw.exchange_rate,
            cost_of_goods: raw.cost_of_goods,
            gross_profit,
            totals,
            comments: raw.comments.trim().to_string(),
            actor: raw.actor.trim().to_string(),
        }
    }

    pub fn usd_total(&self) -> Decimal {
        self.totals.usd_equivalent(self.exchange_rate)
    }

    /// `"{product_type} {model}"`, the key products are ranked by.
    pub fn product_label(&self) -> String {
        format!("{} {}", self.product_type, self.model)
            .trim()
            .to_string()
    }

    /// Leading word of the product type ("iPhone 13" -> "iPhone").
    pub fn category(&self) -> String {
        self.product_type
            .split_whitespace()
            .next()
            .unwrap_or("Otros")
            .to_string()
    }
}

impl TableSchema for Sale {
    fn columns() -> &'static [&'static str] {
        &SALE_COLUMNS
    }

    fn date_column() -> Option<&'static str> {
        Some("Fecha")
    }

    fn to_record(&self) -> Record {
        let trade_in = self.trade_in.as_ref();
        let mut record = Record::new();
        record.insert("ID".into(), Cell::from(self.id));
        record.insert("Fecha".into(), Cell::from(self.date));
        record.insert("Mes".into(), Cell::text(self.month.clone()));
        record.insert("Cliente".into(), Cell::text(self.customer_name.clone()));
        record.insert("Canal".into(), Cell::text(self.channel.clone()));
        record.insert("Contacto".into(), Cell::text(self.contact.clone()));
        record.insert("Email".into(), Cell::text(self.email.clone()));
        record.insert("Cantidad".into(), Cell::from(self.quantity));
        record.insert("Tipo de producto".into(), Cell::text(self.product_type.clone()));
        record.insert("Modelo".into(), Cell::text(self.model.clone()));
        record.insert("Capacidad".into(), Cell::text(self.capacity.clone()));
        record.insert("Color".into(), Cell::text(self.color.clone()));
        record.insert("Estado".into(), Cell::text(self.condition.clone()));
        record.insert("IMEI".into(), Cell::text(self.imei.clone()));
        record.insert("Forma de entrega".into(), Cell::text(self.delivery_method.clone()));
        record.insert("Monto".into(), Cell::from(self.amount));
        record.insert("Moneda".into(), Cell::text(self.currency.code()));
        record.insert(
            "Parte de pago".into(),
            Cell::text(if trade_in.is_some() { "Sí" } else { "No" }),
        );
        record.insert(
            "Modelo parte de pago".into(),
            trade_in.map_or(Cell::Empty, |t| Cell::text(t.model.clone())),
        );
        record.insert(
            "Capacidad parte de pago".into(),
            trade_in.map_or(Cell::Empty, |t| Cell::text(t.capacity.clone())),
        );
        record.insert(
            "IMEI parte de pago".into(),
            trade_in.map_or(Cell::Empty, |t| Cell::text(t.imei.clone())),
        );
        record.insert(
            "Valor parte de pago".into(),
            trade_in.map_or(Cell::Empty, |t| Cell::from(t.value)),
        );
        record.insert("Cotización".into(), Cell::from(self.exchange_rate));
        record.insert("Costo".into(), Cell::from(self.cost_of_goods));
        record.insert("Ganancia".into(), Cell::from(self.gross_profit));
        record.insert("Total ARS".into(), Cell::from(self.totals.ars));
        record.insert("Total USD".into(), Cell::from(self.totals.usd));
        record.insert("Comentarios".into(), Cell::text(self.comments.clone()));
        record.insert("Usuario".into(), Cell::text(self.actor.clone()));
        record
    }

    fn from_record(record: &Record) -> Result<Self> {
        let text = |column: &str| record.get(column).map(Cell::as_text).unwrap_or_default();
        let decimal = |column: &str| {
            record
                .get(column)
                .and_then(Cell::as_decimal)
                .unwrap_or_default()
        };

        let date = record
            .get("Fecha")
            .and_then(Cell::as_datetime)
            .ok_or_else(|| BackOfficeError::InvalidRecord {
                table: "sales".to_string(),
                details: format!("sale '{}' has no readable date", text("ID")),
            })?;

        let trade_in = record
            .get("Parte de pago")
            .is_some_and(Cell::as_bool)
            .then(|| TradeIn {
                model: text("Modelo parte de pago"),
                capacity: text("Capacidad parte de pago"),
                imei: text("IMEI parte de pago"),
                value: decimal("Valor parte de pago"),
            });

        let amount = decimal("Monto");
        let currency = CurrencyCode::normalize(&text("Moneda"));
        let mut totals = CurrencyTotals {
            ars: decimal("Total ARS"),
            usd: decimal("Total USD"),
        };
        // Rows typed by hand often skip the totals columns.
        if totals.ars.is_zero() && totals.usd.is_zero() {
            totals.add(currency, amount);
        }

        let month = match text("Mes") {
            m if m.is_empty() => month_abbrev(date.date()).to_string(),
            m => m,
        };

        let quantity = record
            .get("Cantidad")
            .and_then(Cell::as_i64)
            .and_then(|q| u32::try_from(q).ok())
            .filter(|q| *q > 0)
            .unwrap_or(1);

        Ok(Self {
            id: record.get("ID").and_then(Cell::as_i64).unwrap_or_default(),
            date,
            month,
            customer_name: text("Cliente"),
            channel: text("Canal"),
            contact: text("Contacto"),
            email: text("Email"),
            quantity,
            product_type: text("Tipo de producto"),
            model: text("Modelo"),
            capacity: text("Capacidad"),
            color: text("Color"),
            condition: text("Estado"),
            imei: text("IMEI"),
            delivery_method: text("Forma de entrega"),
            amount,
            currency,
            trade_in,
            exchange_rate: decimal("Cotización"),
            cost_of_goods: decimal("Costo"),
            gross_profit: decimal("Ganancia"),
            totals,
            comments: text("Comentarios"),
            actor: text("Usuario"),
        })
    }
}

/// Maps a sale payload, taking the id from `id_override` or allocating the
/// next one from the sales table.
pub fn build_sale<S: TableStore>(
    store: &RowStore<S>,
    raw: &SaleRequest,
    id_override: Option<i64>,
    now: NaiveDateTime,
) -> Result<Sale> {
    let id = match id_override {
        Some(id) => id,
        None => store.next_id(&store.tables().sales, "ID")?,
    };
    Ok(Sale::from_request(raw, id, now))
}

pub fn record_sale<S: TableStore>(
    store: &mut RowStore<S>,
    raw: &SaleRequest,
    id_override: Option<i64>,
    now: NaiveDateTime,
) -> Result<Sale> {
    let table = store.tables().sales.clone();
    store.ensure_table(&table, &SALE_COLUMNS)?;

    let sale = build_sale(store, raw, id_override, now)?;
    store.insert(&table, &sale)?;

    info!(
        "Recorded sale #{} ({} x{}) with gross profit {}",
        sale.id,
        sale.product_label(),
        sale.quantity,
        sale.gross_profit
    );
    Ok(sale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::repository::ReadOrder;
    use crate::schema::PaymentRequest;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 8, 14)
            .unwrap()
            .and_hms_opt(16, 45, 0)
            .unwrap()
    }

    fn request() -> SaleRequest {
        SaleRequest {
            customer_name: " Ana Pérez ".to_string(),
            product_type: "iPhone 13".to_string(),
            model: "Pro".to_string(),
            quantity: Some(1),
            amount: dec!(700),
            currency: "USD".to_string(),
            cost_of_goods: dec!(550),
            ..Default::default()
        }
    }

    #[test]
    fn test_profit_floor_applies_when_margin_not_positive() {
        assert_eq!(gross_profit(dec!(0), dec!(50), 2, dec!(5)), dec!(5));
        assert_eq!(gross_profit(dec!(100), dec!(50), 2, dec!(5)), dec!(5));
    }

    #[test]
    fn test_profit_uses_margin_when_positive() {
        assert_eq!(gross_profit(dec!(500), dec!(50), 2, dec!(5)), dec!(400));
    }

    #[test]
    fn test_overflowing_amounts_do_not_panic() {
        assert_eq!(gross_profit(dec!(10), Decimal::MAX, 3, dec!(5)), dec!(5));

        let totals = CurrencyTotals {
            ars: dec!(1000000),
            usd: dec!(40),
        };
        assert_eq!(totals.usd_equivalent(Decimal::new(1, 27)), dec!(40));
        assert_eq!(totals.usd_equivalent(dec!(1000)), dec!(1040));
    }

    #[test]
    fn test_from_request_basic_fields() {
        let sale = Sale::from_request(&request(), 12, now());

        assert_eq!(sale.id, 12);
        assert_eq!(sale.month, "Ago");
        assert_eq!(sale.customer_name, "Ana Pérez");
        assert_eq!(sale.totals, CurrencyTotals { ars: dec!(0), usd: dec!(700) });
        assert_eq!(sale.gross_profit, dec!(150));
        assert_eq!(sale.trade_in, None);
        assert_eq!(sale.category(), "iPhone");
        assert_eq!(sale.product_label(), "iPhone 13 Pro");
    }

    #[test]
    fn test_split_payments_bucket_by_currency() {
        let raw = SaleRequest {
            payments: vec![
                PaymentRequest { amount: dec!(400), currency: "usd".to_string() },
                PaymentRequest { amount: dec!(100000), currency: "Pesos".to_string() },
                PaymentRequest { amount: dec!(50000), currency: "UYU".to_string() },
            ],
            exchange_rate: dec!(1000),
            quantity: None,
            ..request()
        };
        let sale = Sale::from_request(&raw, 1, now());

        assert_eq!(sale.quantity, 1);
        assert_eq!(sale.totals.ars, dec!(150000));
        assert_eq!(sale.totals.usd, dec!(400));
        assert_eq!(sale.usd_total(), dec!(550));
        // 550 - 550 = 0, not positive
        assert_eq!(sale.gross_profit, dec!(0));
    }

    #[test]
    fn test_trade_in_only_carried_when_flagged() {
        let mut raw = request();
        raw.trade_in_model = "iPhone 11".to_string();
        raw.trade_in_value = dec!(200);

        let sale = Sale::from_request(&raw, 1, now());
        assert!(sale.trade_in.is_none());
        let row = sale.to_row();
        assert_eq!(row[18], Cell::Empty);
        assert_eq!(row[21], Cell::Empty);

        raw.trade_in = true;
        let sale = Sale::from_request(&raw, 1, now());
        let trade_in = sale.trade_in.as_ref().unwrap();
        assert_eq!(trade_in.model, "iPhone 11");
        assert_eq!(trade_in.value, dec!(200));
    }

    #[test]
    fn test_to_row_follows_export_columns() {
        let sale = Sale::from_request(&request(), 3, now());
        let row = sale.to_row();

        assert_eq!(row.len(), 29);
        assert_eq!(row[0], Cell::from(3i64));
        assert_eq!(row[1], Cell::from(now()));
        assert_eq!(row[3], Cell::text("Ana Pérez"));
        assert_eq!(row[16], Cell::text("USD"));
        assert_eq!(row[24], Cell::from(dec!(150)));
        assert_eq!(row[26], Cell::from(dec!(700)));
    }

    #[test]
    fn test_record_round_trip() {
        let mut raw = request();
        raw.trade_in = true;
        raw.trade_in_model = "iPhone 11".to_string();
        raw.trade_in_value = dec!(180);

        let sale = Sale::from_request(&raw, 9, now());
        let back = Sale::from_record(&sale.to_record()).unwrap();
        assert_eq!(back, sale);
    }

    #[test]
    fn test_from_record_requires_date() {
        let mut record = Sale::from_request(&request(), 1, now()).to_record();
        record.insert("Fecha".to_string(), Cell::text("sin fecha"));
        assert!(matches!(
            Sale::from_record(&record),
            Err(BackOfficeError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_record_sale_allocates_ids() {
        let mut store = RowStore::new(MemoryStore::new(), StorageConfig::default());

        let first = record_sale(&mut store, &request(), None, now()).unwrap();
        let second = record_sale(&mut store, &request(), None, now()).unwrap();
        let forced = record_sale(&mut store, &request(), Some(40), now()).unwrap();
        let after = build_sale(&store, &request(), None, now()).unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(forced.id, 40);
        assert_eq!(after.id, 41);

        let stored: Vec<Sale> = store
            .find_all_typed("Ventas", ReadOrder::StorageOrder)
            .unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[2], forced);
    }
}
