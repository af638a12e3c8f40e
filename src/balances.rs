//! Account balances from two independent sources: a fold over the movement
//! ledger, and the per-account snapshot table kept up to date by hand.
//!
//! The dashboard always reports the snapshot ("live") figures. Nothing
//! reconciles the two.

use crate::cell::{Cell, Record};
use crate::error::Result;
use crate::movement::Movement;
use crate::repository::{ReadOrder, RowStore, TableSchema};
use crate::schema::CurrencyCode;
use crate::store::TableStore;
use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const BALANCE_COLUMNS: [&str; 3] = ["Cuenta", "Saldo ARS", "Saldo USD"];

/// currency -> account -> balance
pub type LedgerBalances = BTreeMap<CurrencyCode, BTreeMap<String, Decimal>>;

/// Folds signed movements into per-currency, per-account balances.
///
/// Movements of unknown kind are skipped entirely, so they neither change a
/// balance nor create an account entry. The fold only adds, so the result does
/// not depend on input order.
pub fn compute_balances<'a>(movements: impl IntoIterator<Item = &'a Movement>) -> LedgerBalances {
    let mut balances = LedgerBalances::new();

    for movement in movements {
        let sign = movement.kind.sign();
        if sign.is_zero() {
            continue;
        }

        *balances
            .entry(movement.currency)
            .or_default()
            .entry(movement.destination_account.clone())
            .or_default() += movement.amount * sign;
    }

    balances
}

/// One row of the snapshot table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account: String,
    pub ars: Decimal,
    pub usd: Decimal,
}

impl TableSchema for AccountBalance {
    fn columns() -> &'static [&'static str] {
        &BALANCE_COLUMNS
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("Cuenta".into(), Cell::text(self.account.clone()));
        record.insert("Saldo ARS".into(), Cell::from(self.ars));
        record.insert("Saldo USD".into(), Cell::from(self.usd));
        record
    }

    fn from_record(record: &Record) -> Result<Self> {
        let decimal = |column: &str| {
            record
                .get(column)
                .and_then(Cell::as_decimal)
                .unwrap_or_default()
        };
        Ok(Self {
            account: record.get("Cuenta").map(Cell::as_text).unwrap_or_default(),
            ars: decimal("Saldo ARS"),
            usd: decimal("Saldo USD"),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveBalances {
    pub total_ars: Decimal,
    pub total_usd: Decimal,
    pub accounts: Vec<AccountBalance>,
}

impl LiveBalances {
    pub fn from_accounts(accounts: Vec<AccountBalance>) -> Self {
        let total_ars = accounts.iter().map(|a| a.ars).sum();
        let total_usd = accounts.iter().map(|a| a.usd).sum();
        Self {
            total_ars,
            total_usd,
            accounts,
        }
    }
}

/// Reads the snapshot table in storage order. Rows without an account name
/// are ignored.
pub fn read_live_balances<S: TableStore>(store: &RowStore<S>) -> Result<LiveBalances> {
    let table = &store.tables().balances;
    let accounts: Vec<AccountBalance> = store
        .find_all_typed::<AccountBalance>(table, ReadOrder::StorageOrder)?
        .into_iter()
        .filter(|a| !a.account.is_empty())
        .collect();

    debug!("Read live balances for {} account(s)", accounts.len());
    Ok(LiveBalances::from_accounts(accounts))
}
