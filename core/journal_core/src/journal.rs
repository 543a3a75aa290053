//! Application state and the operations that mutate it.

use chrono::NaiveDate;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{error, info, warn};

use crate::cell::{CellError, PersistOutcome, PersistentCell};
use crate::codec::{self, CodecError};
use crate::model::{new_entry_id, AttributeSet, Entry, ExportDocument, GainDelta};
use crate::store::KvStore;

pub const ENTRIES_KEY: &str = "allEntries";
pub const STATS_KEY: &str = "playerStats";

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("{0} must not be empty")]
    InvalidInput(&'static str),
}

/// Activity and reflection as typed into the add-entry form.
#[derive(Clone, Debug)]
pub struct NewEntry {
    pub activity: String,
    pub feeling: String,
}

impl NewEntry {
    /// Trim both fields and reject blanks.
    pub fn validated(activity: &str, feeling: &str) -> Result<Self, JournalError> {
        let activity = activity.trim();
        let feeling = feeling.trim();
        if activity.is_empty() {
            return Err(JournalError::InvalidInput("activity"));
        }
        if feeling.is_empty() {
            return Err(JournalError::InvalidInput("feeling"));
        }
        Ok(Self {
            activity: activity.to_string(),
            feeling: feeling.to_string(),
        })
    }

    /// Stamp the entry with an id, the local day and the creation time.
    pub fn into_entry(self, gains: GainDelta, now: OffsetDateTime, local_day: NaiveDate) -> Entry {
        let millis = (now.unix_timestamp_nanos() / 1_000_000) as i64;
        Entry {
            id: new_entry_id(millis),
            date: local_day,
            activity: self.activity,
            feeling: self.feeling,
            gains,
            created_at: now.format(&Rfc3339).ok(),
        }
    }
}

/// Append `entry` and fold its gains into `stats`. Earlier entries are left
/// untouched.
pub fn add_entry(mut entries: Vec<Entry>, mut stats: AttributeSet, entry: Entry) -> (Vec<Entry>, AttributeSet) {
    stats.absorb(&entry.gains);
    entries.push(entry);
    (entries, stats)
}

/// The single owner of the entry list and the attribute totals.
pub struct Journal {
    store: Box<dyn KvStore>,
    entries: PersistentCell<Vec<Entry>>,
    stats: PersistentCell<AttributeSet>,
}

impl Journal {
    pub fn open(mut store: Box<dyn KvStore>) -> Self {
        let entries = PersistentCell::load(&mut *store, ENTRIES_KEY, Vec::new());
        let stats = PersistentCell::load(&mut *store, STATS_KEY, AttributeSet::default());
        info!("journal loaded: {} entries", entries.get().len());
        Self {
            store,
            entries,
            stats,
        }
    }

    pub fn entries(&self) -> &[Entry] {
        self.entries.get()
    }

    pub fn stats(&self) -> &AttributeSet {
        self.stats.get()
    }

    /// Record a finished entry and persist both cells.
    pub fn record(&mut self, entry: Entry) -> PersistOutcome {
        let (entries, stats) = add_entry(self.entries.get().clone(), *self.stats.get(), entry);
        let outcome = self.commit(entries, stats);
        if outcome == PersistOutcome::Failed {
            warn!("entry kept in memory only until the next successful write");
        }
        outcome
    }

    pub fn export_document(&self, now: OffsetDateTime) -> ExportDocument {
        ExportDocument {
            all_entries: self.entries.get().clone(),
            player_stats: *self.stats.get(),
            export_date: now.format(&Rfc3339).unwrap_or_default(),
        }
    }

    /// Parse and shape-check `raw`, then overwrite both cells. Nothing changes
    /// unless the whole document is valid.
    pub fn import(&mut self, raw: &str) -> Result<ImportSummary, CodecError> {
        let (entries, stats) = codec::decode_import(raw)?;
        let summary = ImportSummary {
            entries: entries.len(),
        };

        self.commit(entries, stats);
        info!("imported {} entries", summary.entries);
        Ok(summary)
    }

    /// Swap in new values for both cells, then write them in one store call.
    fn commit(&mut self, entries: Vec<Entry>, stats: AttributeSet) -> PersistOutcome {
        self.entries.set_unpersisted(entries);
        self.stats.set_unpersisted(stats);

        let written = self.entries.encode().and_then(|entries| {
            let stats = self.stats.encode()?;
            self.store
                .put_many(&[(ENTRIES_KEY, entries.as_str()), (STATS_KEY, stats.as_str())])
                .map_err(CellError::from)
        });
        match written {
            Ok(()) => PersistOutcome::Written,
            Err(err) => {
                error!("persist journal state failed: {err}");
                PersistOutcome::Failed
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ImportSummary {
    pub entries: usize,
}
