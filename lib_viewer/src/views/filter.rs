use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::connections::Record;

/// Which displayed column a search applies to. `id` is never displayed, so
/// it is never searched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterColumn {
    #[default]
    All,
    PlateNumber,
    CallSign,
}

impl FromStr for FilterColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match key.as_str() {
            "all" | "allcolumns" => Ok(FilterColumn::All),
            "plate" | "platenumber" => Ok(FilterColumn::PlateNumber),
            "callsign" => Ok(FilterColumn::CallSign),
            _ => Err(format!("unknown filter column '{}' (expected all, plate_number or call_sign)", s)),
        }
    }
}

impl fmt::Display for FilterColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FilterColumn::All => "All Columns",
            FilterColumn::PlateNumber => "Plate Number",
            FilterColumn::CallSign => "Call Sign",
        })
    }
}

/// Rows whose selected column contains `search`, ignoring case. A blank term
/// keeps every row. Null fields never match.
pub fn filter_records<'a>(records: &'a [Record], search: &str, column: FilterColumn) -> Vec<&'a Record> {
    let needle = search.trim().to_lowercase();
    if needle.is_empty() {
        return records.iter().collect();
    }

    let hit = |field: &Option<String>| field.as_deref().is_some_and(|v| v.to_lowercase().contains(&needle));

    records
        .iter()
        .filter(|r| match column {
            FilterColumn::All => hit(&r.plate_number) || hit(&r.call_sign),
            FilterColumn::PlateNumber => hit(&r.plate_number),
            FilterColumn::CallSign => hit(&r.call_sign),
        })
        .collect()
}
