//! # Back-office Metrics
//!
//! Sales and finance aggregation over a spreadsheet-like row store.
//!
//! A small shop keeps everything in a handful of tables: sales, a signed
//! movement ledger (incomes and expenses), stock, a hand-maintained balance
//! snapshot per account, and a single-row dashboard cache. This crate maps
//! request payloads into rows, allocates ids, folds the ledger into balances and
//! builds the denormalized record the dashboard reads.
//!
//! ## Core Concepts
//!
//! - **Row store**: [`RowStore`] reads and writes header-keyed records over any
//!   [`TableStore`] backend. Columns are matched by header name, never position.
//! - **Typed rows**: [`Sale`], [`Movement`], [`StockItem`] and [`AccountBalance`]
//!   implement [`TableSchema`].
//! - **Live balances**: the snapshot table is ground truth and always overrides
//!   cached balance figures.
//! - **Dashboard cache**: [`DashboardService`] rebuilds and serves
//!   [`DashboardCacheRecord`], optionally behind a [`ChunkedCache`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use backoffice_metrics::*;
//! use rust_decimal_macros::dec;
//!
//! let config = BackOfficeConfig::default();
//! let mut office = BackOffice::new(MemoryStore::new(), &config)?;
//!
//! let sale = SaleRequest {
//!     customer_name: "Lucía".to_string(),
//!     product_type: "iPhone 13".to_string(),
//!     model: "Pro".to_string(),
//!     amount: dec!(950),
//!     currency: "USD".to_string(),
//!     cost_of_goods: dec!(780),
//!     ..Default::default()
//! };
//! office.record_sale_now(&sale)?;
//!
//! let stats = office.dashboard_stats_now()?;
//! println!("Profit this month: {}", stats.profit_this_month);
//! ```

pub mod balances;
pub mod cache;
pub mod cell;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod movement;
pub mod repository;
pub mod sale;
pub mod schema;
pub mod stock;
pub mod store;
pub mod utils;

pub use balances::{
    compute_balances, read_live_balances, AccountBalance, LedgerBalances, LiveBalances,
};
pub use cache::{ChunkedCache, KeyValueBackend, MemoryKv};
pub use cell::{Cell, Record};
pub use config::*;
pub use dashboard::{
    ActivityItem, ActivityKind, CategoryShare, DailyPoint, DashboardCacheRecord,
    DashboardService, ProductRanking,
};
pub use error::{BackOfficeError, Result};
pub use movement::{record_movement, Movement};
pub use repository::{ReadOrder, RowStore, TableSchema};
pub use sale::{record_sale, Sale};
pub use schema::*;
pub use stock::{record_stock_item, StockItem};
pub use store::{MemoryStore, Table, TableStore};

use chrono::{Local, NaiveDateTime};
use log::{debug, info};

/// Entry point tying the row store, the entity writers and the dashboard
/// together behind one owner.
pub struct BackOffice<S: TableStore> {
    dashboard: DashboardService<S>,
}

impl<S: TableStore> BackOffice<S> {
    pub fn new(store: S, config: &BackOfficeConfig) -> Result<Self> {
        config.validate()?;

        info!(
            "Opening back office over spreadsheet '{}'",
            config.storage.spreadsheet_id
        );
        debug!("Table names: {:?}", config.storage.tables);

        Ok(Self {
            dashboard: DashboardService::from_config(store, config),
        })
    }

    pub fn with_cache<B: KeyValueBackend + 'static>(
        store: S,
        config: &BackOfficeConfig,
        backend: B,
    ) -> Result<Self> {
        let office = Self::new(store, config)?;
        Ok(Self {
            dashboard: office.dashboard.with_cache(backend, &config.cache),
        })
    }

    pub fn store(&self) -> &RowStore<S> {
        self.dashboard.store()
    }

    pub fn store_mut(&mut self) -> &mut RowStore<S> {
        self.dashboard.store_mut()
    }

    pub fn into_store(self) -> RowStore<S> {
        self.dashboard.into_store()
    }

    pub fn record_sale(
        &mut self,
        raw: &SaleRequest,
        id_override: Option<i64>,
        now: NaiveDateTime,
    ) -> Result<Sale> {
        record_sale(self.dashboard.store_mut(), raw, id_override, now)
    }

    pub fn record_sale_now(&mut self, raw: &SaleRequest) -> Result<Sale> {
        self.record_sale(raw, None, Local::now().naive_local())
    }

    pub fn record_movement(&mut self, raw: &MovementRequest, now: NaiveDateTime) -> Result<Movement> {
        record_movement(self.dashboard.store_mut(), raw, now)
    }

    pub fn record_stock_item(
        &mut self,
        raw: &StockItemRequest,
        now: NaiveDateTime,
    ) -> Result<StockItem> {
        record_stock_item(self.dashboard.store_mut(), raw, now)
    }

    /// Newest first.
    pub fn recent_sales(&self, limit: usize) -> Result<Vec<Sale>> {
        let store = self.dashboard.store();
        store.find_recent_typed(&store.tables().sales, limit)
    }

    /// Balances folded from the whole movement ledger.
    pub fn ledger_balances(&self) -> Result<LedgerBalances> {
        let store = self.dashboard.store();
        let movements: Vec<Movement> =
            store.find_all_typed(&store.tables().movements, ReadOrder::StorageOrder)?;
        Ok(compute_balances(&movements))
    }

    pub fn live_balances(&self) -> Result<LiveBalances> {
        read_live_balances(self.dashboard.store())
    }

    pub fn rebuild_dashboard(&mut self, now: NaiveDateTime) -> Result<DashboardCacheRecord> {
        self.dashboard.rebuild_dashboard_cache(now)
    }

    pub fn dashboard_stats(&mut self, now: NaiveDateTime) -> Result<DashboardCacheRecord> {
        self.dashboard.get_dashboard_stats(now)
    }

    pub fn dashboard_stats_now(&mut self) -> Result<DashboardCacheRecord> {
        self.dashboard.get_dashboard_stats_now()
    }
}
