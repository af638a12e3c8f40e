//! Header-keyed access to the tables of a [`TableStore`].
//!
//! Every table has a header row that defines the canonical column names. Reads
//! return one [`Record`] per data row keyed by trimmed header text; writes align
//! a record to the current header row. Columns may be reordered in the sheet
//! without breaking anything, but renaming one detaches it.

use crate::cell::{Cell, Record};
use crate::config::{StorageConfig, TableNames};
use crate::error::{BackOfficeError, Result};
use crate::store::{Table, TableStore};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Order in which rows are returned by [`RowStore::find_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadOrder {
    /// Last stored row first.
    Newest,
    /// Ascending by the table's date column. Rows without a date keep their
    /// storage order after the dated ones. Tables without a date column fall
    /// back to storage order.
    Oldest,
    /// Exactly as stored.
    StorageOrder,
}

/// Static shape of a table: its ordered columns and how a typed row maps to
/// and from a header-keyed record.
pub trait TableSchema: Sized {
    fn columns() -> &'static [&'static str];

    fn date_column() -> Option<&'static str> {
        None
    }

    fn to_record(&self) -> Record;

    fn from_record(record: &Record) -> Result<Self>;

    /// Cells in `columns()` order.
    fn to_row(&self) -> Vec<Cell> {
        let record = self.to_record();
        Self::columns()
            .iter()
            .map(|c| record.get(*c).cloned().unwrap_or_default())
            .collect()
    }
}

pub struct RowStore<S: TableStore> {
    store: S,
    config: StorageConfig,
}

impl<S: TableStore> RowStore<S> {
    pub fn new(store: S, config: StorageConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn tables(&self) -> &TableNames {
        &self.config.tables
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.store.has_table(table)
    }

    /// Reads a table that must have a header row.
    fn read_with_headers(&self, table: &str) -> Result<Table> {
        let data = self.store.read_table(table)?;
        if data.headers.iter().all(|h| h.trim().is_empty()) {
            return Err(BackOfficeError::EmptyTable(table.to_string()));
        }
        Ok(data)
    }

    /// Creates `table` with `headers` if it does not exist yet.
    /// Returns whether the table was created.
    pub fn ensure_table(&mut self, table: &str, headers: &[&str]) -> Result<bool> {
        if self.store.has_table(table) {
            return Ok(false);
        }
        let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
        self.store.create_table(table, &headers)?;
        debug!("Created table '{}' with {} columns", table, headers.len());
        Ok(true)
    }

    /// Appends `record` as one row aligned to the current header row.
    /// Keys matching no header are dropped; unmatched columns stay blank.
    pub fn save(&mut self, table: &str, record: &Record) -> Result<()> {
        let data = self.read_with_headers(table)?;
        let row = align_to_headers(table, &data.headers, record);
        self.store.append_row(table, row)
    }

    /// Like [`save`](Self::save), but first appends every record key missing
    /// from the header row as a new trailing column.
    pub fn save_evolving(&mut self, table: &str, record: &Record) -> Result<()> {
        self.evolve_headers(table, record.keys().map(String::as_str))?;
        self.save(table, record)
    }

    fn evolve_headers<'k>(
        &mut self,
        table: &str,
        keys: impl IntoIterator<Item = &'k str>,
    ) -> Result<()> {
        let data = self.store.read_table(table)?;
        let mut headers = data.headers;
        let before = headers.len();

        for key in keys {
            let key = key.trim();
            if !key.is_empty() && !headers.iter().any(|h| h.trim() == key) {
                headers.push(key.to_string());
            }
        }

        if headers.len() > before {
            debug!(
                "Adding {} new column(s) to table '{}'",
                headers.len() - before,
                table
            );
            self.store.set_headers(table, &headers)?;
        }
        Ok(())
    }

    /// Writes `record` as the only meaningful data row (row 1), replacing
    /// whatever was there.
    pub fn overwrite_single_row(&mut self, table: &str, record: &Record) -> Result<()> {
        let data = self.read_with_headers(table)?;
        let row = align_to_headers(table, &data.headers, record);
        self.store.write_row(table, 0, row)
    }

    pub fn find_all(&self, table: &str, order: ReadOrder) -> Result<Vec<Record>> {
        self.find_all_by_date(table, order, None)
    }

    fn find_all_by_date(
        &self,
        table: &str,
        order: ReadOrder,
        date_column: Option<&str>,
    ) -> Result<Vec<Record>> {
        let data = self.read_with_headers(table)?;
        let mut records = to_records(&data);

        match order {
            ReadOrder::StorageOrder => {}
            ReadOrder::Newest => records.reverse(),
            ReadOrder::Oldest => {
                if let Some(column) = date_column {
                    // sort_by_key is stable, undated rows sort last in storage order
                    records.sort_by_key(|r| {
                        let date = r.get(column).and_then(Cell::as_datetime);
                        (date.is_none(), date)
                    });
                }
            }
        }

        Ok(records)
    }

    /// The trailing `limit` rows, newest first.
    pub fn find_recent(&self, table: &str, limit: usize) -> Result<Vec<Record>> {
        let data = self.read_with_headers(table)?;
        let mut records = to_records(&data);
        let start = records.len().saturating_sub(limit);
        let mut tail = records.split_off(start);
        tail.reverse();
        Ok(tail)
    }

    /// `max + 1` over the numeric cells of `id_column`, or 1 when there are none.
    ///
    /// Read-then-write with no locking: two concurrent writers can be handed
    /// the same id.
    pub fn next_id(&self, table: &str, id_column: &str) -> Result<i64> {
        let data = self.read_with_headers(table)?;
        let index =
            data.column_index(id_column)
                .ok_or_else(|| BackOfficeError::MissingColumn {
                    table: table.to_string(),
                    column: id_column.to_string(),
                })?;

        let max = data
            .rows
            .iter()
            .filter_map(|row| row.get(index))
            .filter_map(Cell::as_i64)
            .max();

        Ok(max.map_or(1, |m| m + 1))
    }

    /// Appends a typed row, creating the table or missing columns as needed.
    pub fn insert<T: TableSchema>(&mut self, table: &str, item: &T) -> Result<()> {
        self.ensure_table(table, T::columns())?;
        self.evolve_headers(table, T::columns().iter().copied())?;
        self.save(table, &item.to_record())
    }

    /// Rows that fail to map are skipped with a warning; only table-level
    /// problems are errors.
    pub fn find_all_typed<T: TableSchema>(&self, table: &str, order: ReadOrder) -> Result<Vec<T>> {
        let records = self.find_all_by_date(table, order, T::date_column())?;
        Ok(readable_rows(table, &records))
    }

    /// Newest first. Unreadable rows among the trailing `limit` are skipped,
    /// so fewer than `limit` items may come back.
    pub fn find_recent_typed<T: TableSchema>(&self, table: &str, limit: usize) -> Result<Vec<T>> {
        let records = self.find_recent(table, limit)?;
        Ok(readable_rows(table, &records))
    }
}

/// Maps one record of `table`, naming that table in any mapping error.
pub fn parse_record<T: TableSchema>(table: &str, record: &Record) -> Result<T> {
    T::from_record(record).map_err(|e| e.in_table(table))
}

fn readable_rows<T: TableSchema>(table: &str, records: &[Record]) -> Vec<T> {
    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        match parse_record(table, record) {
            Ok(row) => rows.push(row),
            Err(e) => warn!("Skipping row: {}", e),
        }
    }
    rows
}

fn align_to_headers(table: &str, headers: &[String], record: &Record) -> Vec<Cell> {
    let mut matched = 0;
    let row: Vec<Cell> = headers
        .iter()
        .map(|h| match record.get(h.trim()) {
            Some(cell) => {
                matched += 1;
                cell.clone()
            }
            None => Cell::Empty,
        })
        .collect();

    if matched == 0 {
        warn!(
            "Record with {} field(s) matched no column of table '{}'; appending a blank row",
            record.len(),
            table
        );
    }
    row
}

/// Data rows as header-keyed records. Fully blank rows are skipped.
fn to_records(data: &Table) -> Vec<Record> {
    data.rows
        .iter()
        .filter(|row| row.iter().any(|c| !c.is_empty()))
        .map(|row| {
            data.headers
                .iter()
                .enumerate()
                .filter(|(_, h)| !h.trim().is_empty())
                .map(|(i, h)| (h.trim().to_string(), row.get(i).cloned().unwrap_or_default()))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn store_with(table: &str, cols: &[&str], rows: Vec<Vec<Cell>>) -> RowStore<MemoryStore> {
        let mut mem = MemoryStore::new();
        mem.insert_table(
            table,
            Table {
                headers: headers(cols),
                rows,
            },
        );
        RowStore::new(mem, StorageConfig::default())
    }

    fn record(pairs: &[(&str, Cell)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_next_id_takes_max_plus_one() {
        let store = store_with(
            "Ventas",
            &["ID", "Cliente"],
            vec![
                vec![Cell::from(3i64), Cell::text("Ana")],
                vec![Cell::from(7i64), Cell::text("Luis")],
                vec![Cell::text("2"), Cell::text("Eva")],
            ],
        );
        assert_eq!(store.next_id("Ventas", "ID").unwrap(), 8);
    }

    #[test]
    fn test_next_id_on_empty_table_is_one() {
        let store = store_with("Ventas", &["ID"], vec![]);
        assert_eq!(store.next_id("Ventas", "ID").unwrap(), 1);
    }

    #[test]
    fn test_next_id_ignores_non_numeric_cells() {
        let store = store_with(
            "Ventas",
            &["ID"],
            vec![
                vec![Cell::text("pendiente")],
                vec![Cell::from(4i64)],
                vec![Cell::Empty],
            ],
        );
        assert_eq!(store.next_id("Ventas", "ID").unwrap(), 5);
    }

    #[test]
    fn test_next_id_missing_column() {
        let store = store_with("Ventas", &["Cliente"], vec![]);
        assert!(matches!(
            store.next_id("Ventas", "ID"),
            Err(BackOfficeError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_missing_and_headerless_tables() {
        let store = store_with("Ventas", &[], vec![]);
        assert!(matches!(
            store.find_all("Ventas", ReadOrder::Newest),
            Err(BackOfficeError::EmptyTable(_))
        ));
        assert!(matches!(
            store.find_all("Stock", ReadOrder::Newest),
            Err(BackOfficeError::TableNotFound(_))
        ));
    }

    #[test]
    fn test_save_aligns_to_headers() {
        let mut store = store_with("Movimientos", &["Fecha", " Monto ", "Detalle"], vec![]);
        store
            .save(
                "Movimientos",
                &record(&[("Detalle", Cell::text("Fundas")), ("Monto", Cell::from(10i64)), ("Extra", Cell::text("x"))]),
            )
            .unwrap();

        let table = store.inner().read_table("Movimientos").unwrap();
        assert_eq!(
            table.rows[0],
            vec![Cell::Empty, Cell::from(10i64), Cell::text("Fundas")]
        );
        assert_eq!(table.headers.len(), 3);
    }

    #[test]
    fn test_save_with_no_matching_columns_still_appends() {
        let mut store = store_with("Movimientos", &["Fecha"], vec![]);
        store
            .save("Movimientos", &record(&[("Otro", Cell::text("x"))]))
            .unwrap();

        let table = store.inner().read_table("Movimientos").unwrap();
        assert_eq!(table.rows, vec![vec![Cell::Empty]]);
    }

    #[test]
    fn test_save_evolving_adds_trailing_columns() {
        let mut store = store_with("Stock", &["ID"], vec![vec![Cell::from(1i64)]]);
        store
            .save_evolving(
                "Stock",
                &record(&[("ID", Cell::from(2i64)), ("Proveedor", Cell::text("Mayorista"))]),
            )
            .unwrap();

        let table = store.inner().read_table("Stock").unwrap();
        assert_eq!(table.headers, headers(&["ID", "Proveedor"]));
        assert_eq!(table.rows[1], vec![Cell::from(2i64), Cell::text("Mayorista")]);

        let records = store.find_all("Stock", ReadOrder::StorageOrder).unwrap();
        assert_eq!(records[0].get("Proveedor"), Some(&Cell::Empty));
    }

    #[test]
    fn test_read_orders() {
        let rows = vec![
            vec![Cell::from(1i64), Cell::text("2024-03-05")],
            vec![Cell::from(2i64), Cell::Empty],
            vec![Cell::from(3i64), Cell::text("2024-03-01")],
        ];
        let store = store_with("Ventas", &["ID", "Fecha"], rows);
        let ids = |records: Vec<Record>| -> Vec<i64> {
            records
                .iter()
                .filter_map(|r| r.get("ID").and_then(Cell::as_i64))
                .collect()
        };

        assert_eq!(ids(store.find_all("Ventas", ReadOrder::StorageOrder).unwrap()), vec![1, 2, 3]);
        assert_eq!(ids(store.find_all("Ventas", ReadOrder::Newest).unwrap()), vec![3, 2, 1]);
        // no date column known: storage order
        assert_eq!(ids(store.find_all("Ventas", ReadOrder::Oldest).unwrap()), vec![1, 2, 3]);
        assert_eq!(
            ids(store.find_all_by_date("Ventas", ReadOrder::Oldest, Some("Fecha")).unwrap()),
            vec![3, 1, 2]
        );
    }

    #[test]
    fn test_find_recent_is_newest_first() {
        let rows = (1..=5).map(|i| vec![Cell::from(i as i64)]).collect();
        let store = store_with("Ventas", &["ID"], rows);

        let recent = store.find_recent("Ventas", 2).unwrap();
        let ids: Vec<i64> = recent.iter().filter_map(|r| r["ID"].as_i64()).collect();
        assert_eq!(ids, vec![5, 4]);

        assert_eq!(store.find_recent("Ventas", 50).unwrap().len(), 5);
    }

    #[test]
    fn test_blank_rows_are_skipped() {
        let rows = vec![vec![Cell::from(1i64)], vec![Cell::Empty], vec![]];
        let store = store_with("Ventas", &["ID"], rows);
        assert_eq!(store.find_all("Ventas", ReadOrder::StorageOrder).unwrap().len(), 1);
    }

    #[derive(Debug, PartialEq)]
    struct Note {
        id: i64,
        date: chrono::NaiveDateTime,
        text: String,
    }

    impl TableSchema for Note {
        fn columns() -> &'static [&'static str] {
            &["ID", "Fecha", "Nota"]
        }

        fn date_column() -> Option<&'static str> {
            Some("Fecha")
        }

        fn to_record(&self) -> Record {
            record(&[
                ("ID", Cell::from(self.id)),
                ("Fecha", Cell::from(self.date)),
                ("Nota", Cell::text(self.text.clone())),
            ])
        }

        fn from_record(record: &Record) -> Result<Self> {
            Ok(Self {
                id: record.get("ID").and_then(Cell::as_i64).unwrap_or_default(),
                date: record
                    .get("Fecha")
                    .and_then(Cell::as_datetime)
                    .unwrap_or_default(),
                text: record.get("Nota").map(Cell::as_text).unwrap_or_default(),
            })
        }
    }

    #[test]
    fn test_typed_insert_creates_table_and_reads_back() {
        let mut store = RowStore::new(MemoryStore::new(), StorageConfig::default());
        let day = |d| {
            NaiveDate::from_ymd_opt(2024, 4, d)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap()
        };

        let late = Note { id: 1, date: day(20), text: "tarde".to_string() };
        let early = Note { id: 2, date: day(2), text: "temprano".to_string() };
        store.insert("Notas", &late).unwrap();
        store.insert("Notas", &early).unwrap();

        let oldest: Vec<Note> = store.find_all_typed("Notas", ReadOrder::Oldest).unwrap();
        assert_eq!(oldest, vec![early, late]);

        let recent: Vec<Note> = store.find_recent_typed("Notas", 1).unwrap();
        assert_eq!(recent[0].id, 2);
    }

    #[derive(Debug, PartialEq)]
    struct Dated(chrono::NaiveDateTime);

    impl TableSchema for Dated {
        fn columns() -> &'static [&'static str] {
            &["Fecha"]
        }

        fn to_record(&self) -> Record {
            record(&[("Fecha", Cell::from(self.0))])
        }

        fn from_record(record: &Record) -> Result<Self> {
            record
                .get("Fecha")
                .and_then(Cell::as_datetime)
                .map(Dated)
                .ok_or_else(|| BackOfficeError::InvalidRecord {
                    table: "dated".to_string(),
                    details: "no readable date".to_string(),
                })
        }
    }

    #[test]
    fn test_typed_reads_skip_unreadable_rows() {
        let day = NaiveDate::from_ymd_opt(2024, 4, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let rows = vec![
            vec![Cell::from(day)],
            vec![Cell::text("pendiente")],
            vec![Cell::text("02/04/2024")],
        ];
        let store = store_with("Gastos2024", &["Fecha"], rows);

        let all: Vec<Dated> = store
            .find_all_typed("Gastos2024", ReadOrder::StorageOrder)
            .unwrap();
        assert_eq!(all, vec![Dated(day), Dated(day)]);

        let recent: Vec<Dated> = store.find_recent_typed("Gastos2024", 2).unwrap();
        assert_eq!(recent, vec![Dated(day)]);
    }

    #[test]
    fn test_parse_record_names_the_table() {
        let bad = record(&[("Fecha", Cell::text("pendiente"))]);
        match parse_record::<Dated>("Gastos2024", &bad) {
            Err(BackOfficeError::InvalidRecord { table, .. }) => assert_eq!(table, "Gastos2024"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_overwrite_single_row() {
        let mut store = store_with("Cache", &["A", "B"], vec![]);
        store
            .overwrite_single_row("Cache", &record(&[("A", Cell::text("1"))]))
            .unwrap();
        store
            .overwrite_single_row("Cache", &record(&[("B", Cell::text("2"))]))
            .unwrap();

        let table = store.inner().read_table("Cache").unwrap();
        assert_eq!(table.rows, vec![vec![Cell::Empty, Cell::text("2")]]);
    }
}
