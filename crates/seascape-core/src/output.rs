//! Writers for the partition table handed to the mapping side.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RegimeError, RegimeResult};
use crate::partition::PartitionTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableFormat {
    #[default]
    Csv,
    Json,
}

impl TableFormat {
    /// Guess from a file extension, defaulting to CSV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(e) if e.eq_ignore_ascii_case("json") => TableFormat::Json,
            _ => TableFormat::Csv,
        }
    }
}

/// `lon,lat,k_2,k_3,...` with one line per cell.
pub fn write_csv<W: Write>(table: &PartitionTable, mut w: W) -> std::io::Result<()> {
    let mut header = vec!["lon".to_string(), "lat".to_string()];
    header.extend(table.column_names());
    writeln!(w, "{}", header.join(","))?;
    for (r, key) in table.keys.iter().enumerate() {
        write!(w, "{},{}", key.lon, key.lat)?;
        for p in &table.partitions {
            write!(w, ",{}", p.labels[r])?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// One JSON object per cell: `{"lon": .., "lat": .., "k_2": .., ...}`.
pub fn to_json_rows(table: &PartitionTable) -> Value {
    let names = table.column_names();
    let rows = table
        .keys
        .iter()
        .enumerate()
        .map(|(r, key)| {
            let mut obj = Map::new();
            obj.insert("lon".into(), Value::from(key.lon));
            obj.insert("lat".into(), Value::from(key.lat));
            for (name, p) in names.iter().zip(&table.partitions) {
                obj.insert(name.clone(), Value::from(p.labels[r]));
            }
            Value::Object(obj)
        })
        .collect();
    Value::Array(rows)
}

pub fn write_table(table: &PartitionTable, path: &Path, format: TableFormat) -> RegimeResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| RegimeError::io(parent, e))?;
    }
    match format {
        TableFormat::Csv => {
            let mut buf = Vec::new();
            write_csv(table, &mut buf).map_err(|e| RegimeError::io(path, e))?;
            fs::write(path, buf).map_err(|e| RegimeError::io(path, e))
        }
        TableFormat::Json => write_json(&to_json_rows(table), path),
    }
}

/// Pretty-print any serialisable artifact (dendrogram, report, summaries).
pub fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> RegimeResult<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| RegimeError::json(path, e))?;
    fs::write(path, json).map_err(|e| RegimeError::io(path, e))
}
