//! Dashboard metrics: aggregation over sales and the movement ledger, and the
//! single-row cache table the frontend reads them from.
//!
//! [`aggregate`] is pure and does all the arithmetic. [`DashboardService`] does
//! the I/O around it: loading rows, writing the cache row, and overriding the
//! cached balances with a live read on every request.

use crate::balances::{read_live_balances, AccountBalance, LiveBalances};
use crate::cache::{ChunkedCache, KeyValueBackend};
use crate::cell::{Cell, Record};
use crate::config::{BackOfficeConfig, CacheConfig, DashboardConfig};
use crate::error::{BackOfficeError, Result};
use crate::movement::Movement;
use crate::repository::{ReadOrder, RowStore};
use crate::sale::Sale;
use crate::schema::{CurrencyCode, MovementKind};
use crate::store::TableStore;
use crate::utils::{is_same_month, percentage_change, percentage_share, previous_month, window_start};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Columns of the cache table, in the order the frontend expects them.
pub const CACHE_COLUMNS: [&str; 14] = [
    "Actualizado",
    "Ganancia mes",
    "Gastos mes",
    "Saldo ARS",
    "Saldo USD",
    "Publicidad mes",
    "Pedidos mes",
    "Tendencia pedidos",
    "Serie diaria",
    "Gastos por categoría",
    "Ventas por categoría",
    "Top productos",
    "Saldos por cuenta",
    "Actividad reciente",
];

pub const CATEGORY_ADS: &str = "Publicidad";
pub const CATEGORY_STOCK: &str = "Stock";
pub const CATEGORY_OTHER: &str = "Otros";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub income: Decimal,
    pub expense: Decimal,
    pub profit: Decimal,
    pub ad_spend: Decimal,
    pub stock: Decimal,
    pub other: Decimal,
}

impl DailyPoint {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            income: Decimal::ZERO,
            expense: Decimal::ZERO,
            profit: Decimal::ZERO,
            ad_spend: Decimal::ZERO,
            stock: Decimal::ZERO,
            other: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryShare {
    pub name: String,
    pub amount: Decimal,
    pub percentage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRanking {
    pub product: String,
    pub profit: Decimal,
    pub units: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityKind {
    Sale,
    Movement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    pub kind: ActivityKind,
    pub id: i64,
    pub date: NaiveDateTime,
    pub description: String,
    pub amount: Decimal,
    pub currency: CurrencyCode,
}

/// The denormalized projection stored in the cache table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCacheRecord {
    pub updated_at: Option<NaiveDateTime>,
    pub profit_this_month: Decimal,
    pub expense_this_month: Decimal,
    pub balance_ars: Decimal,
    pub balance_usd: Decimal,
    pub ad_spend_this_month: Decimal,
    pub orders_this_month: usize,
    pub orders_trend: Decimal,
    pub daily_series: Vec<DailyPoint>,
    pub expense_categories: Vec<CategoryShare>,
    pub sales_categories: Vec<CategoryShare>,
    pub top_products: Vec<ProductRanking>,
    pub balance_breakdown: Vec<AccountBalance>,
    pub recent_activity: Vec<ActivityItem>,
}

impl DashboardCacheRecord {
    /// Replaces the balance fields with a fresh snapshot read.
    pub fn with_live_balances(mut self, live: LiveBalances) -> Self {
        self.balance_ars = live.total_ars;
        self.balance_usd = live.total_usd;
        self.balance_breakdown = live.accounts;
        self
    }

    pub fn to_cache_record(&self) -> Result<Record> {
        let mut record = Record::new();
        record.insert(
            "Actualizado".into(),
            self.updated_at.map_or(Cell::Empty, Cell::from),
        );
        record.insert("Ganancia mes".into(), Cell::from(self.profit_this_month));
        record.insert("Gastos mes".into(), Cell::from(self.expense_this_month));
        record.insert("Saldo ARS".into(), Cell::from(self.balance_ars));
        record.insert("Saldo USD".into(), Cell::from(self.balance_usd));
        record.insert("Publicidad mes".into(), Cell::from(self.ad_spend_this_month));
        record.insert(
            "Pedidos mes".into(),
            Cell::from(Decimal::from(self.orders_this_month)),
        );
        record.insert("Tendencia pedidos".into(), Cell::from(self.orders_trend));
        record.insert(
            "Serie diaria".into(),
            Cell::text(serde_json::to_string(&self.daily_series)?),
        );
        record.insert(
            "Gastos por categoría".into(),
            Cell::text(serde_json::to_string(&self.expense_categories)?),
        );
        record.insert(
            "Ventas por categoría".into(),
            Cell::text(serde_json::to_string(&self.sales_categories)?),
        );
        record.insert(
            "Top productos".into(),
            Cell::text(serde_json::to_string(&self.top_products)?),
        );
        record.insert(
            "Saldos por cuenta".into(),
            Cell::text(serde_json::to_string(&self.balance_breakdown)?),
        );
        record.insert(
            "Actividad reciente".into(),
            Cell::text(serde_json::to_string(&self.recent_activity)?),
        );
        Ok(record)
    }

    /// Never fails: unreadable scalars read as zero and unreadable JSON
    /// fields as empty lists.
    pub fn from_cache_record(record: &Record) -> Self {
        let decimal = |column: &str| {
            record
                .get(column)
                .and_then(Cell::as_decimal)
                .unwrap_or_default()
        };

        Self {
            updated_at: record.get("Actualizado").and_then(Cell::as_datetime),
            profit_this_month: decimal("Ganancia mes"),
            expense_this_month: decimal("Gastos mes"),
            balance_ars: decimal("Saldo ARS"),
            balance_usd: decimal("Saldo USD"),
            ad_spend_this_month: decimal("Publicidad mes"),
            orders_this_month: record
                .get("Pedidos mes")
                .and_then(Cell::as_i64)
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or_default(),
            orders_trend: decimal("Tendencia pedidos"),
            daily_series: json_field(record, "Serie diaria"),
            expense_categories: json_field(record, "Gastos por categoría"),
            sales_categories: json_field(record, "Ventas por categoría"),
            top_products: json_field(record, "Top productos"),
            balance_breakdown: json_field(record, "Saldos por cuenta"),
            recent_activity: json_field(record, "Actividad reciente"),
        }
    }
}

fn json_field<T: DeserializeOwned + Default>(record: &Record, column: &str) -> T {
    let raw = record.get(column).map(Cell::as_text).unwrap_or_default();
    if raw.is_empty() {
        return T::default();
    }
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!("Cache column '{}' is not valid JSON ({}); using empty default", column, e);
        T::default()
    })
}

fn coarse_category(movement: &Movement) -> &'static str {
    if movement.is_marketing() {
        CATEGORY_ADS
    } else if movement.kind == MovementKind::StockPurchase
        || movement.category.eq_ignore_ascii_case(CATEGORY_STOCK)
    {
        CATEGORY_STOCK
    } else {
        CATEGORY_OTHER
    }
}

/// Groups `(name, amount)` pairs preserving first-seen order, so that a later
/// stable sort breaks ties by appearance.
fn group_in_order(items: impl IntoIterator<Item = (String, Decimal, u32)>) -> Vec<(String, Decimal, u32)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Decimal, u32)> = Vec::new();

    for (name, amount, units) in items {
        match index.get(&name) {
            Some(&i) => {
                groups[i].1 += amount;
                groups[i].2 += units;
            }
            None => {
                index.insert(name.clone(), groups.len());
                groups.push((name, amount, units));
            }
        }
    }
    groups
}

/// Sales amount (USD equivalent) by leading word of the product type, top `n`
/// by amount, as percentages of the top-`n` total.
pub fn category_mix<'a>(sales: impl IntoIterator<Item = &'a Sale>, n: usize) -> Vec<CategoryShare> {
    let mut groups = group_in_order(sales.into_iter().map(|s| (s.category(), s.usd_total(), 0)));
    groups.sort_by(|a, b| b.1.cmp(&a.1));
    groups.truncate(n);

    let total: Decimal = groups.iter().map(|g| g.1).sum();
    groups
        .into_iter()
        .map(|(name, amount, _)| CategoryShare {
            percentage: percentage_share(amount, total),
            name,
            amount,
        })
        .collect()
}

/// Products ranked by summed gross profit, descending. Ties keep the order in
/// which the products first appear.
pub fn rank_top_products<'a>(
    sales: impl IntoIterator<Item = &'a Sale>,
    n: usize,
) -> Vec<ProductRanking> {
    let mut groups = group_in_order(
        sales
            .into_iter()
            .map(|s| (s.product_label(), s.gross_profit, s.quantity)),
    );
    groups.sort_by(|a, b| b.1.cmp(&a.1));
    groups.truncate(n);

    groups
        .into_iter()
        .map(|(product, profit, units)| ProductRanking {
            product,
            profit,
            units,
        })
        .collect()
}

/// Last `limit` sales and last `limit` movements by storage order, merged and
/// cut back to `limit`, newest first.
pub fn recent_activity(sales: &[Sale], movements: &[Movement], limit: usize) -> Vec<ActivityItem> {
    let sales_tail = &sales[sales.len().saturating_sub(limit)..];
    let movements_tail = &movements[movements.len().saturating_sub(limit)..];

    let mut feed: Vec<ActivityItem> = sales_tail
        .iter()
        .map(|s| ActivityItem {
            kind: ActivityKind::Sale,
            id: s.id,
            date: s.date,
            description: if s.customer_name.is_empty() {
                s.product_label()
            } else {
                format!("{} - {}", s.customer_name, s.product_label())
            },
            amount: s.amount,
            currency: s.currency,
        })
        .chain(movements_tail.iter().map(|m| ActivityItem {
            kind: ActivityKind::Movement,
            id: m.id,
            date: m.date,
            description: if m.detail.is_empty() {
                m.kind.label().to_string()
            } else {
                m.detail.clone()
            },
            amount: m.amount,
            currency: m.currency,
        }))
        .collect();

    feed.sort_by(|a, b| b.date.cmp(&a.date));
    feed.truncate(limit);
    feed
}

/// Builds the dashboard record from rows already in memory. `sales` and
/// `movements` must be in storage order; `now` is local wall-clock time.
pub fn aggregate(
    sales: &[Sale],
    movements: &[Movement],
    live: LiveBalances,
    now: NaiveDateTime,
    config: &DashboardConfig,
) -> DashboardCacheRecord {
    let today = now.date();
    let (year, month) = (today.year(), today.month());
    let (prev_year, prev_month) = previous_month(today);

    let mut series: BTreeMap<NaiveDate, DailyPoint> = BTreeMap::new();
    let mut profit_this_month = Decimal::ZERO;
    let mut orders_this_month = 0;
    let mut orders_prev_month = 0;
    let mut current_sales: Vec<&Sale> = Vec::new();

    for sale in sales {
        let day = sale.date.date();
        if is_same_month(day, year, month) {
            profit_this_month += sale.gross_profit;
            orders_this_month += 1;
            current_sales.push(sale);
        } else if is_same_month(day, prev_year, prev_month) {
            orders_prev_month += 1;
        }

        let point = series.entry(day).or_insert_with(|| DailyPoint::new(day));
        point.income += sale.usd_total();
        point.profit += sale.gross_profit;
    }

    let mut expense_this_month = Decimal::ZERO;
    let mut ad_spend_this_month = Decimal::ZERO;
    let mut expense_by_category: Vec<(String, Decimal, u32)> = Vec::new();

    for movement in movements
        .iter()
        .filter(|m| m.kind.is_debit() && m.currency == CurrencyCode::Usd)
    {
        let day = movement.date.date();
        let category = coarse_category(movement);

        if is_same_month(day, year, month) {
            expense_this_month += movement.amount;
            if movement.is_marketing() {
                ad_spend_this_month += movement.amount;
            }
            expense_by_category.push((category.to_string(), movement.amount, 0));
        }

        let point = series.entry(day).or_insert_with(|| DailyPoint::new(day));
        point.expense += movement.amount;
        match category {
            CATEGORY_ADS => point.ad_spend += movement.amount,
            CATEGORY_STOCK => point.stock += movement.amount,
            _ => point.other += movement.amount,
        }
    }

    let start = window_start(today, config.series_window_days);
    let daily_series: Vec<DailyPoint> = series.range(start..=today).map(|(_, p)| p.clone()).collect();

    let mut expense_groups = group_in_order(expense_by_category);
    expense_groups.sort_by(|a, b| b.1.cmp(&a.1));
    let expense_categories = expense_groups
        .into_iter()
        .map(|(name, amount, _)| CategoryShare {
            percentage: percentage_share(amount, expense_this_month),
            name,
            amount,
        })
        .collect();

    debug!(
        "Aggregated {} sale(s) and {} movement(s): {} order(s) this month, {} day(s) in series",
        sales.len(),
        movements.len(),
        orders_this_month,
        daily_series.len()
    );

    DashboardCacheRecord {
        updated_at: Some(now),
        profit_this_month,
        expense_this_month,
        balance_ars: Decimal::ZERO,
        balance_usd: Decimal::ZERO,
        ad_spend_this_month,
        orders_this_month,
        orders_trend: percentage_change(orders_this_month, orders_prev_month),
        daily_series,
        expense_categories,
        sales_categories: category_mix(current_sales.iter().copied(), config.top_n),
        top_products: rank_top_products(current_sales.iter().copied(), config.top_n),
        balance_breakdown: Vec::new(),
        recent_activity: recent_activity(sales, movements, config.recent_activity),
    }
    .with_live_balances(live)
}

pub struct DashboardService<S: TableStore> {
    store: RowStore<S>,
    config: DashboardConfig,
    cache: Option<ChunkedCache<Box<dyn KeyValueBackend>>>,
    cache_key: String,
}

impl<S: TableStore> DashboardService<S> {
    pub fn new(store: RowStore<S>, config: DashboardConfig) -> Self {
        Self {
            store,
            config,
            cache: None,
            cache_key: CacheConfig::default().dashboard_key,
        }
    }

    pub fn from_config(store: S, config: &BackOfficeConfig) -> Self {
        Self::new(
            RowStore::new(store, config.storage.clone()),
            config.dashboard.clone(),
        )
    }

    /// Puts a key/value cache in front of the cache table.
    pub fn with_cache<B: KeyValueBackend + 'static>(
        mut self,
        backend: B,
        config: &CacheConfig,
    ) -> Self {
        let backend: Box<dyn KeyValueBackend> = Box::new(backend);
        self.cache = Some(ChunkedCache::new(backend, config));
        self.cache_key = config.dashboard_key.clone();
        self
    }

    pub fn store(&self) -> &RowStore<S> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RowStore<S> {
        &mut self.store
    }

    pub fn into_store(self) -> RowStore<S> {
        self.store
    }

    /// Recomputes every metric and overwrites the cache row. Re-running over
    /// unchanged data yields the same record.
    pub fn rebuild_dashboard_cache(&mut self, now: NaiveDateTime) -> Result<DashboardCacheRecord> {
        let tables = self.store.tables().clone();

        let sales: Vec<Sale> = self
            .store
            .find_all_typed(&tables.sales, ReadOrder::StorageOrder)?;
        let movements: Vec<Movement> = self
            .store
            .find_all_typed(&tables.movements, ReadOrder::StorageOrder)?;
        let live = read_live_balances(&self.store)?;

        let record = aggregate(&sales, &movements, live, now, &self.config);

        if self.store.ensure_table(&tables.dashboard_cache, &CACHE_COLUMNS)? {
            info!("Created dashboard cache table '{}'", tables.dashboard_cache);
        }
        self.store
            .overwrite_single_row(&tables.dashboard_cache, &record.to_cache_record()?)?;
        self.cache_put(&record);

        info!(
            "Rebuilt dashboard cache: profit {} / expense {} this month, {} order(s)",
            record.profit_this_month, record.expense_this_month, record.orders_this_month
        );
        Ok(record)
    }

    /// Serves the cached record, rebuilding it first when the cache table is
    /// missing or empty. Balances always come from a fresh live read.
    pub fn get_dashboard_stats(&mut self, now: NaiveDateTime) -> Result<DashboardCacheRecord> {
        let cached = match self.cache_get() {
            Some(record) => record,
            None => {
                let record = match self.read_cache_table()? {
                    Some(record) => record,
                    None => {
                        info!("Dashboard cache is empty; rebuilding");
                        self.rebuild_dashboard_cache(now)?;
                        self.read_cache_table()?.ok_or_else(|| {
                            BackOfficeError::EmptyTable(self.store.tables().dashboard_cache.clone())
                        })?
                    }
                };
                self.cache_put(&record);
                record
            }
        };

        let live = read_live_balances(&self.store)?;
        Ok(cached.with_live_balances(live))
    }

    pub fn get_dashboard_stats_now(&mut self) -> Result<DashboardCacheRecord> {
        self.get_dashboard_stats(Local::now().naive_local())
    }

    fn read_cache_table(&self) -> Result<Option<DashboardCacheRecord>> {
        let table = &self.store.tables().dashboard_cache;
        if !self.store.has_table(table) {
            return Ok(None);
        }
        let records = self.store.find_all(table, ReadOrder::StorageOrder)?;
        Ok(records.first().map(DashboardCacheRecord::from_cache_record))
    }

    fn cache_get(&mut self) -> Option<DashboardCacheRecord> {
        let key = self.cache_key.clone();
        self.cache.as_mut()?.get(&key)
    }

    fn cache_put(&mut self, record: &DashboardCacheRecord) {
        let key = self.cache_key.clone();
        if let Some(cache) = self.cache.as_mut() {
            if let Err(e) = cache.put(&key, record) {
                warn!("Could not store dashboard record in cache: {}", e);
            }
        }
    }
}
