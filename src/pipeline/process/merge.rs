use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::codec::fields::FieldKind;
use crate::model::{Row, ValidationError};

/// The three granularities the scoring engine reports at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputLevel {
    Top,
    AdSet,
    Ad,
}

impl OutputLevel {
    pub const ALL: [OutputLevel; 3] = [OutputLevel::Top, OutputLevel::AdSet, OutputLevel::Ad];

    pub fn key(&self) -> &'static str {
        match self {
            OutputLevel::Top => "topLevel",
            OutputLevel::AdSet => "adSetLevel",
            OutputLevel::Ad => "adLevel",
        }
    }

    pub fn file_prefix(&self) -> &'static str {
        match self {
            OutputLevel::Top => "julius_top_level",
            OutputLevel::AdSet => "julius_adset_level",
            OutputLevel::Ad => "julius_ad_level",
        }
    }
}

/// Engine output for one batch, or the merge of many.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessedOutput {
    pub top_level: Vec<Row>,
    pub ad_set_level: Vec<Row>,
    pub ad_level: Vec<Row>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelCounts {
    pub top_level: usize,
    pub ad_set_level: usize,
    pub ad_level: usize,
}

impl ProcessedOutput {
    pub fn level(&self, l: OutputLevel) -> &Vec<Row> {
        match l {
            OutputLevel::Top => &self.top_level,
            OutputLevel::AdSet => &self.ad_set_level,
            OutputLevel::Ad => &self.ad_level,
        }
    }

    fn level_mut(&mut self, l: OutputLevel) -> &mut Vec<Row> {
        match l {
            OutputLevel::Top => &mut self.top_level,
            OutputLevel::AdSet => &mut self.ad_set_level,
            OutputLevel::Ad => &mut self.ad_level,
        }
    }

    /// Append every level of `other` after the rows already held.
    pub fn merge(&mut self, other: ProcessedOutput) {
        let ProcessedOutput { top_level, ad_set_level, ad_level } = other;
        self.top_level.extend(top_level);
        self.ad_set_level.extend(ad_set_level);
        self.ad_level.extend(ad_level);
    }

    pub fn counts(&self) -> LevelCounts {
        LevelCounts { top_level: self.top_level.len(), ad_set_level: self.ad_set_level.len(), ad_level: self.ad_level.len() }
    }

    pub fn is_empty(&self) -> bool { OutputLevel::ALL.iter().all(|l| self.level(*l).is_empty()) }

    /// Collapse rows sharing the same key values, per level.
    pub fn reaggregate(&mut self, keys: &[String]) {
        for l in OutputLevel::ALL {
            let rows = std::mem::take(self.level_mut(l));
            *self.level_mut(l) = reaggregate_rows(rows, keys);
        }
    }
}

/// How batch outputs of one run are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Concatenate in batch order.
    #[default]
    Concat,
    /// Concatenate, then re-aggregate rows sharing key fields.
    Reaggregate,
}

impl MergePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergePolicy::Concat => "concat",
            MergePolicy::Reaggregate => "reaggregate",
        }
    }
}

impl FromStr for MergePolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "concat" => Ok(MergePolicy::Concat),
            "reaggregate" => Ok(MergePolicy::Reaggregate),
            other => Err(ValidationError::Invalid(format!("unknown merge policy: {}", other))),
        }
    }
}

struct Group {
    row: Row,
    // contributions per averaged field
    ratio_n: HashMap<String, u32>,
}

impl Group {
    fn open(row: Row) -> Self {
        let ratio_n = row
            .iter()
            .filter(|(k, v)| FieldKind::of(k) == FieldKind::Ratio && v.is_number())
            .map(|(k, _)| (k.clone(), 1))
            .collect();
        Self { row, ratio_n }
    }

    fn absorb(&mut self, incoming: Row, keys: &[String]) {
        for (k, v) in incoming {
            if keys.contains(&k) { continue; }
            let kind = FieldKind::of(&k);
            let numeric = kind.is_additive() || kind == FieldKind::Ratio;
            // a missing slot, or a null numeric slot, takes the first value that arrives
            let take = match self.row.get(&k) {
                None => true,
                Some(e) => numeric && !e.is_number() && v.is_number(),
            };
            if take {
                if kind == FieldKind::Ratio && v.is_number() { self.ratio_n.insert(k.clone(), 1); }
                self.row.insert(k, v);
                continue;
            }
            let Some(existing) = self.row.get(&k) else { continue };
            if kind.is_additive() {
                if let Some(sum) = add(existing, &v) { self.row.insert(k, sum); }
            } else if kind == FieldKind::Ratio {
                let (Some(old), Some(new)) = (existing.as_f64(), v.as_f64()) else { continue };
                let n = self.ratio_n.entry(k.clone()).or_insert(1);
                let mean = (old * f64::from(*n) + new) / f64::from(*n + 1);
                *n += 1;
                if let Some(num) = Number::from_f64(mean) { self.row.insert(k, Value::Number(num)); }
            }
        }
    }
}

fn add(a: &Value, b: &Value) -> Option<Value> {
    let (Value::Number(x), Value::Number(y)) = (a, b) else { return None };
    if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
        if let Some(s) = x.checked_add(y) { return Some(Value::from(s)); }
    }
    Number::from_f64(x.as_f64()? + y.as_f64()?).map(Value::Number)
}

fn reaggregate_rows(rows: Vec<Row>, keys: &[String]) -> Vec<Row> {
    let mut groups: Vec<Group> = Vec::with_capacity(rows.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for row in rows {
        if !keys.iter().any(|k| row.contains_key(k)) {
            groups.push(Group::open(row));
            continue;
        }
        let key_values: Vec<&Value> = keys.iter().map(|k| row.get(k).unwrap_or(&Value::Null)).collect();
        let key = serde_json::to_string(&key_values).unwrap_or_default();
        match index.get(&key) {
            Some(&i) => groups[i].absorb(row, keys),
            None => {
                index.insert(key, groups.len());
                groups.push(Group::open(row));
            }
        }
    }
    groups.into_iter().map(|g| g.row).collect()
}
