//! Records persisted by the journal: attributes, gains, entries and the
//! export document that bundles them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Highest gain a single entry can award to one attribute.
pub const MAX_GAIN: u32 = 5;

/// Attribute points needed to advance one level on a progress bar.
pub const POINTS_PER_LEVEL: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attribute {
    Diligence,
    Knowledge,
    Courage,
    Understanding,
    Expression,
}

impl Attribute {
    pub const ALL: [Attribute; 5] = [
        Attribute::Diligence,
        Attribute::Knowledge,
        Attribute::Courage,
        Attribute::Understanding,
        Attribute::Expression,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Attribute::Diligence => "diligence",
            Attribute::Knowledge => "knowledge",
            Attribute::Courage => "courage",
            Attribute::Understanding => "understanding",
            Attribute::Expression => "expression",
        }
    }
}

/// Running totals per attribute (`playerStats` on disk).
///
/// Keys missing from stored or imported JSON read as zero, so the five
/// attributes are always present after a load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeSet {
    pub diligence: u32,
    pub knowledge: u32,
    pub courage: u32,
    pub understanding: u32,
    pub expression: u32,
}

impl AttributeSet {
    pub fn get(&self, attr: Attribute) -> u32 {
        match attr {
            Attribute::Diligence => self.diligence,
            Attribute::Knowledge => self.knowledge,
            Attribute::Courage => self.courage,
            Attribute::Understanding => self.understanding,
            Attribute::Expression => self.expression,
        }
    }

    fn slot_mut(&mut self, attr: Attribute) -> &mut u32 {
        match attr {
            Attribute::Diligence => &mut self.diligence,
            Attribute::Knowledge => &mut self.knowledge,
            Attribute::Courage => &mut self.courage,
            Attribute::Understanding => &mut self.understanding,
            Attribute::Expression => &mut self.expression,
        }
    }

    /// Fold one entry's gains into the totals.
    pub fn absorb(&mut self, gains: &GainDelta) {
        for attr in Attribute::ALL {
            let slot = self.slot_mut(attr);
            *slot = slot.saturating_add(gains.get(attr));
        }
    }

    pub fn levels(&self) -> Vec<StatLevel> {
        Attribute::ALL
            .iter()
            .map(|&attr| StatLevel::for_total(attr, self.get(attr)))
            .collect()
    }
}

/// Gains awarded by one entry, each in `0..=MAX_GAIN`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainDelta {
    pub diligence: u32,
    pub knowledge: u32,
    pub courage: u32,
    pub understanding: u32,
    pub expression: u32,
}

impl GainDelta {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn get(&self, attr: Attribute) -> u32 {
        match attr {
            Attribute::Diligence => self.diligence,
            Attribute::Knowledge => self.knowledge,
            Attribute::Courage => self.courage,
            Attribute::Understanding => self.understanding,
            Attribute::Expression => self.expression,
        }
    }

    /// Build a delta from raw model output, clamping each value into range.
    /// Returns the delta and whether any value had to be clamped.
    pub fn from_raw_clamped(raw: [i64; 5]) -> (Self, bool) {
        let mut clamped = false;
        let mut fix = |v: i64| {
            let c = v.clamp(0, MAX_GAIN as i64);
            if c != v {
                clamped = true;
            }
            c as u32
        };
        let delta = GainDelta {
            diligence: fix(raw[0]),
            knowledge: fix(raw[1]),
            courage: fix(raw[2]),
            understanding: fix(raw[3]),
            expression: fix(raw[4]),
        };
        (delta, clamped)
    }

    pub fn total(&self) -> u32 {
        Attribute::ALL.iter().map(|&a| self.get(a)).sum()
    }
}

/// One journal entry. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    /// Local calendar day the entry was written on.
    pub date: NaiveDate,
    pub activity: String,
    pub feeling: String,
    #[serde(default)]
    pub gains: GainDelta,
    /// RFC 3339 creation time. Older documents may lack it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Time-prefixed id: 13-digit unix millis, a dash, 8 random hex digits.
pub fn new_entry_id(unix_millis: i64) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{:013}-{}", unix_millis.max(0), &suffix[..8])
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatLevel {
    pub attribute: Attribute,
    pub total: u32,
    pub level: u32,
    /// Points into the current level, `0..POINTS_PER_LEVEL`.
    pub progress: u32,
    pub points_per_level: u32,
}

impl StatLevel {
    pub fn for_total(attribute: Attribute, total: u32) -> Self {
        Self {
            attribute,
            total,
            level: total / POINTS_PER_LEVEL + 1,
            progress: total % POINTS_PER_LEVEL,
            points_per_level: POINTS_PER_LEVEL,
        }
    }
}

/// Full-state snapshot written by export and consumed by import.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub all_entries: Vec<Entry>,
    pub player_stats: AttributeSet,
    pub export_date: String,
}
