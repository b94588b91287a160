//! Dynamic filter table
//!
//! Maps filter text to the dynamic rule slots installed for it. A record is
//! shared by every owner that references the same text: subscriptions whose
//! diffs added it and the user sentinel. Slots are freed only when the last
//! owner lets go.
//!
//! # Slot allocation
//!
//! Rule ids start at 1 and are globally unique across records. Freed ids are
//! reused lowest-first before the id space grows.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::FilterError;
use crate::types::{FilterText, Owner, RuleId};

const FIRST_RULE_ID: u32 = 1;

/// Dynamic rules installed for one filter text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicFilterRecord {
    filter: FilterText,
    rule_ids: Vec<RuleId>,
    /// Reference count per owner. Never holds a zero count.
    owners: BTreeMap<Owner, u32>,
}

impl DynamicFilterRecord {
    pub fn filter(&self) -> &FilterText {
        &self.filter
    }

    pub fn rule_ids(&self) -> &[RuleId] {
        &self.rule_ids
    }

    pub fn owners(&self) -> impl Iterator<Item = (&Owner, u32)> + '_ {
        self.owners.iter().map(|(owner, count)| (owner, *count))
    }

    pub fn is_owned_by(&self, owner: &Owner) -> bool {
        self.owners.contains_key(owner)
    }
}

/// Result of taking a reference on a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquired {
    /// A record already existed; no slot was consumed
    Shared,
    /// A new record was created with these slots
    Allocated(Vec<RuleId>),
}

/// Result of dropping a reference on a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Released {
    /// The owner held no reference
    NotOwned,
    /// Other references keep the record alive
    Retained,
    /// Last reference dropped; these slots are free again
    Freed(Vec<RuleId>),
}

/// Filter text to dynamic rule slot table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicFilterTable {
    records: BTreeMap<FilterText, DynamicFilterRecord>,
    next_rule_id: u32,
    free_rule_ids: BTreeSet<RuleId>,
}

impl Default for DynamicFilterTable {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
            next_rule_id: FIRST_RULE_ID,
            free_rule_ids: BTreeSet::new(),
        }
    }
}

impl DynamicFilterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, filter: &FilterText) -> Option<&DynamicFilterRecord> {
        self.records.get(filter)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &DynamicFilterRecord> + '_ {
        self.records.values()
    }

    /// Number of dynamic rule slots in use.
    pub fn rule_count(&self) -> usize {
        self.records.values().map(|r| r.rule_ids.len()).sum()
    }

    /// Filters `owner` holds a reference on.
    pub fn filters_owned_by<'a>(
        &'a self,
        owner: &'a Owner,
    ) -> impl Iterator<Item = &'a FilterText> + 'a {
        self.records
            .values()
            .filter(move |r| r.is_owned_by(owner))
            .map(|r| &r.filter)
    }

    /// Take a reference on `filter` for `owner`.
    ///
    /// Lookup and creation are keyed by the filter text, so the first caller
    /// creates the record and every later caller shares it. `compile` runs only
    /// when a record has to be created and returns the number of slots needed.
    pub fn acquire(
        &mut self,
        filter: &FilterText,
        owner: Owner,
        compile: impl FnOnce(&FilterText) -> Result<usize, FilterError>,
    ) -> Result<Acquired, FilterError> {
        if let Some(record) = self.records.get_mut(filter) {
            *record.owners.entry(owner).or_insert(0) += 1;
            return Ok(Acquired::Shared);
        }

        let slots = compile(filter)?;
        if slots == 0 {
            return Err(FilterError::Uncompilable {
                filter: filter.to_string(),
                reason: "compiles to no rules".to_string(),
            });
        }

        let rule_ids: Vec<RuleId> = (0..slots).map(|_| self.next_free_id()).collect();
        let mut owners = BTreeMap::new();
        owners.insert(owner, 1);
        self.records.insert(
            filter.clone(),
            DynamicFilterRecord {
                filter: filter.clone(),
                rule_ids: rule_ids.clone(),
                owners,
            },
        );
        Ok(Acquired::Allocated(rule_ids))
    }

    /// Drop one reference `owner` holds on `filter`.
    pub fn release(&mut self, filter: &FilterText, owner: &Owner) -> Released {
        let Some(record) = self.records.get_mut(filter) else {
            return Released::NotOwned;
        };
        let Some(count) = record.owners.get_mut(owner) else {
            return Released::NotOwned;
        };

        *count -= 1;
        if *count == 0 {
            record.owners.remove(owner);
        }
        self.free_if_orphaned(filter)
    }

    /// Drop every reference `owner` holds, whatever the count.
    pub fn release_all(&mut self, owner: &Owner) -> Vec<(FilterText, Released)> {
        let owned: Vec<FilterText> = self.filters_owned_by(owner).cloned().collect();
        owned
            .into_iter()
            .map(|filter| {
                if let Some(record) = self.records.get_mut(&filter) {
                    record.owners.remove(owner);
                }
                let released = self.free_if_orphaned(&filter);
                (filter, released)
            })
            .collect()
    }

    fn free_if_orphaned(&mut self, filter: &FilterText) -> Released {
        match self.records.get(filter) {
            Some(record) if record.owners.is_empty() => {}
            Some(_) => return Released::Retained,
            None => return Released::NotOwned,
        }
        match self.records.remove(filter) {
            Some(record) => {
                self.free_rule_ids.extend(record.rule_ids.iter().copied());
                Released::Freed(record.rule_ids)
            }
            None => Released::NotOwned,
        }
    }

    fn next_free_id(&mut self) -> RuleId {
        if let Some(id) = self.free_rule_ids.pop_first() {
            return id;
        }
        let id = RuleId(self.next_rule_id);
        self.next_rule_id += 1;
        id
    }
}
