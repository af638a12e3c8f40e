//! Raw tabular backend: named tables made of a header row followed by data rows.
//!
//! `TableStore` is the seam to the hosted spreadsheet. It knows nothing about
//! column names; header mapping lives in [`crate::repository::RowStore`].

use crate::cell::{parse_decimal, Cell};
use crate::error::{BackOfficeError, Result};
use crate::utils::parse_timestamp;
use csv::{ReaderBuilder, WriterBuilder};
use log::debug;
use std::collections::HashMap;
use std::io::{Read, Write};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == column)
    }
}

pub trait TableStore {
    fn has_table(&self, table: &str) -> bool;

    /// Header row plus every data row, in storage order.
    fn read_table(&self, table: &str) -> Result<Table>;

    fn create_table(&mut self, table: &str, headers: &[String]) -> Result<()>;

    fn set_headers(&mut self, table: &str, headers: &[String]) -> Result<()>;

    fn append_row(&mut self, table: &str, row: Vec<Cell>) -> Result<()>;

    /// Replaces data row `index` (0-based, header excluded), padding the table
    /// with blank rows if it is shorter.
    fn write_row(&mut self, table: &str, index: usize, row: Vec<Cell>) -> Result<()>;

    fn clear_rows(&mut self, table: &str) -> Result<()>;
}

/// In-process table store, used for tests and for working on CSV exports of
/// the spreadsheet.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: HashMap<String, Table>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_table(&mut self, name: impl Into<String>, table: Table) {
        self.tables.insert(name.into(), table);
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| BackOfficeError::TableNotFound(table.to_string()))
    }

    /// Loads a CSV export (first line is the header row) as table `name`,
    /// replacing any table with the same name.
    pub fn load_csv<R: Read>(&mut self, name: &str, reader: R) -> Result<usize> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let mut table = Table::new(headers);

        for record in rdr.records() {
            let record = record?;
            table.rows.push(record.iter().map(cell_from_csv).collect());
        }

        let count = table.rows.len();
        debug!("Loaded {} rows into table '{}' from CSV", count, name);
        self.tables.insert(name.to_string(), table);
        Ok(count)
    }

    pub fn export_csv<W: Write>(&self, name: &str, writer: W) -> Result<()> {
        let table = self.read_table(name)?;
        let mut wrt = WriterBuilder::new().flexible(true).from_writer(writer);

        wrt.write_record(&table.headers)?;
        for row in &table.rows {
            wrt.write_record(row.iter().map(|c| c.to_string()))?;
        }
        wrt.flush()?;
        Ok(())
    }
}

fn cell_from_csv(raw: &str) -> Cell {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Cell::Empty;
    }
    // Only plain numbers become numeric cells; "$ 1.500" stays text and is
    // coerced on read.
    if trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == '-')
    {
        if let Some(value) = parse_decimal(trimmed) {
            return Cell::Number(value);
        }
    }
    if let Some(dt) = parse_timestamp(trimmed) {
        return Cell::DateTime(dt);
    }
    Cell::Text(raw.to_string())
}

impl TableStore for MemoryStore {
    fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    fn read_table(&self, table: &str) -> Result<Table> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| BackOfficeError::TableNotFound(table.to_string()))
    }

    fn create_table(&mut self, table: &str, headers: &[String]) -> Result<()> {
        self.tables
            .entry(table.to_string())
            .or_insert_with(|| Table::new(headers.to_vec()));
        Ok(())
    }

    fn set_headers(&mut self, table: &str, headers: &[String]) -> Result<()> {
        let t = self.table_mut(table)?;
        t.headers = headers.to_vec();
        Ok(())
    }

    fn append_row(&mut self, table: &str, row: Vec<Cell>) -> Result<()> {
        let t = self.table_mut(table)?;
        t.rows.push(row);
        Ok(())
    }

    fn write_row(&mut self, table: &str, index: usize, row: Vec<Cell>) -> Result<()> {
        let t = self.table_mut(table)?;
        while t.rows.len() <= index {
            t.rows.push(Vec::new());
        }
        t.rows[index] = row;
        Ok(())
    }

    fn clear_rows(&mut self, table: &str) -> Result<()> {
        let t = self.table_mut(table)?;
        t.rows.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_missing_table_is_not_found() {
        let mut store = MemoryStore::new();
        assert!(matches!(
            store.read_table("Ventas"),
            Err(BackOfficeError::TableNotFound(name)) if name == "Ventas"
        ));
        assert!(store.append_row("Ventas", vec![]).is_err());
    }

    #[test]
    fn test_create_table_keeps_existing() {
        let mut store = MemoryStore::new();
        store
            .create_table("Saldos", &["Cuenta".to_string()])
            .unwrap();
        store.append_row("Saldos", vec![Cell::text("Caja")]).unwrap();
        store
            .create_table("Saldos", &["Otra".to_string()])
            .unwrap();

        let table = store.read_table("Saldos").unwrap();
        assert_eq!(table.headers, vec!["Cuenta".to_string()]);
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_write_row_pads_table() {
        let mut store = MemoryStore::new();
        store.create_table("Cache", &["A".to_string()]).unwrap();
        store.write_row("Cache", 2, vec![Cell::text("x")]).unwrap();

        let table = store.read_table("Cache").unwrap();
        assert_eq!(table.rows.len(), 3);
        assert!(table.rows[0].is_empty());
        assert_eq!(table.rows[2], vec![Cell::text("x")]);
    }

    #[test]
    fn test_csv_import_export() {
        let csv = "ID,Fecha,Monto,Detalle\n1,2024-03-01 10:00:00,150.5,Fundas\n2,,$ 1200,Cargadores\n";
        let mut store = MemoryStore::new();
        let count = store.load_csv("Movimientos", csv.as_bytes()).unwrap();
        assert_eq!(count, 2);
        store.insert_table("Ventas", Table::new(vec!["ID".to_string()]));
        assert_eq!(store.table_names(), vec!["Movimientos", "Ventas"]);

        let table = store.read_table("Movimientos").unwrap();
        assert_eq!(table.rows[0][2], Cell::Number(dec!(150.5)));
        assert!(matches!(table.rows[0][1], Cell::DateTime(_)));
        assert_eq!(table.rows[1][1], Cell::Empty);
        assert_eq!(table.rows[1][2].as_decimal(), Some(dec!(1200)));

        let mut out = Vec::new();
        store.export_csv("Movimientos", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("ID,Fecha,Monto,Detalle\n"));
        assert!(text.contains("1,2024-03-01 10:00:00,150.5,Fundas"));
    }
}
