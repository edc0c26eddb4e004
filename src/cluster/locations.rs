//! The cluster location table (`ALL.loc`).
//!
//! ```text
//! <partId>\t<location1>[\t<location2>...]
//! _EARLIEST\t<yyyy-MM-dd HH:mm:ss>
//! _LATEST\t<yyyy-MM-dd HH:mm:ss>
//! OFF
//! ```
//!
//! Tables are immutable once parsed. [`LiveLocations`] publishes a new
//! table by swapping an `Arc` under a write lock; resolvers clone the
//! current `Arc` and read from that snapshot.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::aggregator::LocationResolver;
use crate::error::Result;

use super::dates::{parse_control_date, DateRange};

/// First-field marker that disables the cluster.
pub const OFF_SENTINEL: &str = "OFF";
pub const EARLIEST_KEY: &str = "_EARLIEST";
pub const LATEST_KEY: &str = "_LATEST";

/// Parsed location file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationTable {
    parts: HashMap<String, Vec<String>>,
    disabled: bool,
    dates: DateRange,
}

impl LocationTable {
    pub fn parse(text: &str) -> Self {
        let mut table = Self::default();
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            let mut fields = line.split('\t');
            let Some(first) = fields.next().map(str::trim) else {
                continue;
            };
            if first.is_empty() {
                continue;
            }
            if first == OFF_SENTINEL {
                table.disabled = true;
                break;
            }
            match first {
                EARLIEST_KEY => table.dates.from = control_date(first, fields.next()),
                LATEST_KEY => table.dates.to = control_date(first, fields.next()),
                part => {
                    let locations: Vec<String> = fields
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string)
                        .collect();
                    if !locations.is_empty() {
                        table.parts.insert(part.to_string(), locations);
                    }
                }
            }
        }
        table
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    pub fn locations(&self, part_id: &str) -> Option<&[String]> {
        self.parts.get(part_id).map(Vec::as_slice)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn dates(&self) -> DateRange {
        self.dates
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Locations that `next` no longer lists for a part whose location
    /// list changed or disappeared. Sorted, without duplicates.
    pub fn stale_locations(&self, next: &LocationTable) -> Vec<String> {
        let mut stale = BTreeSet::new();
        for (part, old) in &self.parts {
            let new = next.locations(part).unwrap_or(&[]);
            if old.as_slice() == new {
                continue;
            }
            for location in old {
                if !new.contains(location) {
                    stale.insert(location.clone());
                }
            }
        }
        stale.into_iter().collect()
    }
}

fn control_date(name: &str, value: Option<&str>) -> Option<chrono::NaiveDateTime> {
    let value = value.unwrap_or("");
    let parsed = parse_control_date(value);
    if parsed.is_none() {
        warn!(field = name, value, "Unparseable control date, leaving bound open");
    }
    parsed
}

// ── Live Snapshot ──────────────────────────────────────────────────

/// The current location table, replaced wholesale on reload.
#[derive(Debug, Default)]
pub struct LiveLocations {
    current: RwLock<Arc<LocationTable>>,
}

impl LiveLocations {
    pub fn new(table: LocationTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
        }
    }

    pub fn snapshot(&self) -> Arc<LocationTable> {
        Arc::clone(&self.current.read().unwrap())
    }

    /// Swap in `table`, returning the table it replaced.
    pub fn publish(&self, table: LocationTable) -> Arc<LocationTable> {
        let mut current = self.current.write().unwrap();
        std::mem::replace(&mut *current, Arc::new(table))
    }
}

impl LocationResolver for LiveLocations {
    fn locations(&self, part_id: &str) -> Vec<String> {
        self.snapshot()
            .locations(part_id)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }
}
