use crate::error::{BackOfficeError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Names of the tables the engine reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct TableNames {
    pub sales: String,
    pub movements: String,
    pub stock: String,
    pub balances: String,
    pub dashboard_cache: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            sales: "Ventas".to_string(),
            movements: "Movimientos".to_string(),
            stock: "Stock".to_string(),
            balances: "Saldos".to_string(),
            dashboard_cache: "DashboardCache".to_string(),
        }
    }
}

/// Where the data lives. Passed explicitly into every [`crate::RowStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct StorageConfig {
    #[schemars(description = "Identifier of the backing spreadsheet or workbook")]
    pub spreadsheet_id: String,
    pub tables: TableNames,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct DashboardConfig {
    #[schemars(description = "Length in days of the trailing daily series")]
    pub series_window_days: u32,
    #[schemars(description = "Size of the category mix and top product rankings")]
    pub top_n: usize,
    #[schemars(description = "Number of entries kept in the recent activity feed")]
    pub recent_activity: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            series_window_days: 30,
            top_n: 5,
            recent_activity: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct CacheConfig {
    #[schemars(description = "Largest value stored under a single key, in characters")]
    pub chunk_size: usize,
    #[schemars(description = "Expiry applied to every stored key, in seconds")]
    pub ttl_seconds: u64,
    #[schemars(description = "Key under which the dashboard record is cached")]
    pub dashboard_key: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            chunk_size: 90_000,
            ttl_seconds: 21_600,
            dashboard_key: "dashboard_stats".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct BackOfficeConfig {
    pub storage: StorageConfig,
    pub dashboard: DashboardConfig,
    pub cache: CacheConfig,
}

impl BackOfficeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let tables = &self.storage.tables;
        for (label, name) in [
            ("sales", &tables.sales),
            ("movements", &tables.movements),
            ("stock", &tables.stock),
            ("balances", &tables.balances),
            ("dashboard_cache", &tables.dashboard_cache),
        ] {
            if name.trim().is_empty() {
                return Err(BackOfficeError::InvalidConfig(format!(
                    "table name for '{}' must not be empty",
                    label
                )));
            }
        }

        if self.dashboard.series_window_days == 0 {
            return Err(BackOfficeError::InvalidConfig(
                "series_window_days must be at least 1".to_string(),
            ));
        }
        if self.dashboard.top_n == 0 {
            return Err(BackOfficeError::InvalidConfig(
                "top_n must be at least 1".to_string(),
            ));
        }
        if self.cache.chunk_size == 0 {
            return Err(BackOfficeError::InvalidConfig(
                "chunk_size must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = schemars::schema_for!(BackOfficeConfig);
        serde_json::to_string_pretty(&schema)
    }
}
