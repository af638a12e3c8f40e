use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema,
)]
pub enum CurrencyCode {
    #[serde(rename = "ARS")]
    #[schemars(description = "Argentine pesos. Also the bucket for any other peso (UYU)")]
    Ars,

    #[serde(rename = "USD")]
    #[schemars(description = "US dollars. Default for unrecognized currency tokens")]
    Usd,
}

impl CurrencyCode {
    /// Maps the free-text currency typed into a form or sheet onto a bucket.
    /// Unrecognized tokens (including blanks) are treated as dollars.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "ars" | "peso" | "pesos" | "uyu" | "$" | "$ars" => CurrencyCode::Ars,
            _ => CurrencyCode::Usd,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CurrencyCode::Ars => "ARS",
            CurrencyCode::Usd => "USD",
        }
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Ledger movement type. Credit kinds add to an account, debit kinds subtract
/// from it, anything else is kept verbatim and ignored by balances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MovementKind {
    Income,
    Sale,
    InitialFloat,
    DebtCancellation,
    Collection,
    Expense,
    GenericExpense,
    AdSpend,
    PartnerPayment,
    Refund,
    StockPurchase,
    Unknown(String),
}

impl MovementKind {
    pub fn parse(raw: &str) -> Self {
        match fold_label(raw).as_str() {
            "ingreso" => MovementKind::Income,
            "venta" => MovementKind::Sale,
            "saldo inicial" => MovementKind::InitialFloat,
            "cancelacion deuda" | "cancelacion de deuda" => MovementKind::DebtCancellation,
            "cobro" => MovementKind::Collection,
            "egreso" => MovementKind::Expense,
            "gasto" => MovementKind::GenericExpense,
            "publicidad" => MovementKind::AdSpend,
            "pago socio" | "pago a socio" => MovementKind::PartnerPayment,
            "devolucion" => MovementKind::Refund,
            "compra stock" | "compra de stock" => MovementKind::StockPurchase,
            _ => MovementKind::Unknown(raw.trim().to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            MovementKind::Income => "Ingreso",
            MovementKind::Sale => "Venta",
            MovementKind::InitialFloat => "Saldo inicial",
            MovementKind::DebtCancellation => "Cancelación deuda",
            MovementKind::Collection => "Cobro",
            MovementKind::Expense => "Egreso",
            MovementKind::GenericExpense => "Gasto",
            MovementKind::AdSpend => "Publicidad",
            MovementKind::PartnerPayment => "Pago socio",
            MovementKind::Refund => "Devolución",
            MovementKind::StockPurchase => "Compra stock",
            MovementKind::Unknown(label) => label,
        }
    }

    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            MovementKind::Income
                | MovementKind::Sale
                | MovementKind::InitialFloat
                | MovementKind::DebtCancellation
                | MovementKind::Collection
        )
    }

    pub fn is_debit(&self) -> bool {
        matches!(
            self,
            MovementKind::Expense
                | MovementKind::GenericExpense
                | MovementKind::AdSpend
                | MovementKind::PartnerPayment
                | MovementKind::Refund
                | MovementKind::StockPurchase
        )
    }

    /// +1 for credits, -1 for debits, 0 for unknown kinds.
    pub fn sign(&self) -> Decimal {
        if self.is_credit() {
            Decimal::ONE
        } else if self.is_debit() {
            Decimal::NEGATIVE_ONE
        } else {
            Decimal::ZERO
        }
    }
}

impl From<String> for MovementKind {
    fn from(value: String) -> Self {
        MovementKind::parse(&value)
    }
}

impl From<MovementKind> for String {
    fn from(value: MovementKind) -> Self {
        value.label().to_string()
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lowercase, trimmed, single-spaced and without Spanish accents.
fn fold_label(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            other => other,
        })
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PaymentRequest {
    #[schemars(description = "Amount paid in this currency")]
    pub amount: Decimal,
    #[schemars(description = "Free-text currency: ARS, Pesos, UYU, USD...")]
    pub currency: String,
}

/// Sale payload as submitted by the sales form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SaleRequest {
    pub customer_name: String,
    #[schemars(description = "Acquisition channel (Instagram, referral, store...)")]
    pub channel: String,
    pub contact: String,
    pub email: String,
    #[schemars(description = "Units sold. Missing or zero is read as 1")]
    pub quantity: Option<u32>,
    #[schemars(description = "Product family, e.g. 'iPhone 13'. Its first word is the sales category")]
    pub product_type: String,
    pub model: String,
    pub capacity: String,
    pub color: String,
    pub condition: String,
    pub imei: String,
    pub delivery_method: String,
    #[schemars(description = "Listed price of the sale")]
    pub amount: Decimal,
    pub currency: String,
    #[schemars(description = "Split payments. When empty, amount/currency is taken as a single payment")]
    pub payments: Vec<PaymentRequest>,
    #[schemars(description = "Whether a device was accepted as partial payment")]
    pub trade_in: bool,
    pub trade_in_model: String,
    pub trade_in_capacity: String,
    pub trade_in_imei: String,
    pub trade_in_value: Decimal,
    #[schemars(description = "ARS per USD used to convert peso payments")]
    pub exchange_rate: Decimal,
    #[schemars(description = "Unit cost in USD")]
    pub cost_of_goods: Decimal,
    #[schemars(description = "Profit to record when the computed profit is not positive")]
    pub fallback_profit: Option<Decimal>,
    pub comments: String,
    pub actor: String,
}

/// Ledger entry payload (expenses, incomes, partner payments...).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct MovementRequest {
    #[schemars(description = "When the movement happened. Defaults to the time of recording")]
    pub date: Option<NaiveDateTime>,
    pub detail: String,
    #[schemars(description = "Movement type label, e.g. 'Egreso', 'Publicidad', 'Ingreso'")]
    pub kind: String,
    pub category: String,
    pub amount: Decimal,
    pub currency: String,
    pub destination_account: String,
    pub comments: String,
    pub actor: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StockItemRequest {
    pub product_type: String,
    pub model: String,
    pub capacity: String,
    pub color: String,
    pub condition: String,
    pub imei: String,
    pub cost: Decimal,
    pub currency: String,
    pub supplier: String,
    #[schemars(description = "Availability label. Defaults to 'Disponible'")]
    pub status: Option<String>,
    pub comments: String,
}

impl SaleRequest {
    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = schemars::schema_for!(SaleRequest);
        serde_json::to_string_pretty(&schema)
    }
}
