//! Quantity-bearing record model.

use crate::types::MERGE_CONDITION_THRESHOLD;

/// Per-unit metadata carried alongside a stack.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct UnitMeta {
    pub stolen: bool,
    pub origin: String,
    pub slot_hint: i32,
}

impl UnitMeta {
    pub fn new(stolen: bool, origin: impl Into<String>, slot_hint: i32) -> Self {
        Self {
            stolen,
            origin: origin.into(),
            slot_hint,
        }
    }
}

/// A stack of homogeneous units, optionally carrying nested child records.
///
/// The three per-unit lists always have exactly `stack_size` entries. They
/// are private so that every split and merge goes through methods that keep
/// them aligned.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Key into an external catalog; not interpreted here.
    pub identifier: String,

    /// Conventionally 0-100.
    pub condition: f32,

    /// Quality tier.
    pub quality: i32,

    /// Nested child records of a composite item.
    pub contained: Vec<Record>,

    stack_size: u32,
    stolen_flags: Vec<bool>,
    origin_tags: Vec<String>,
    slot_hints: Vec<i32>,
}

impl Record {
    /// A pristine stack: condition 100, quality 0, default unit metadata.
    pub fn new(identifier: impl Into<String>, stack_size: u32) -> Self {
        let stack_size = stack_size.max(1);
        let n = stack_size as usize;
        Self {
            identifier: identifier.into(),
            condition: 100.0,
            quality: 0,
            contained: Vec::new(),
            stack_size,
            stolen_flags: vec![false; n],
            origin_tags: vec![String::new(); n],
            slot_hints: vec![-1; n],
        }
    }

    /// Build a record from raw parts, rejecting misaligned per-unit lists.
    pub fn from_parts(
        identifier: impl Into<String>,
        condition: f32,
        quality: i32,
        stolen_flags: Vec<bool>,
        origin_tags: Vec<String>,
        slot_hints: Vec<i32>,
        contained: Vec<Record>,
    ) -> Option<Self> {
        let n = stolen_flags.len();
        if n == 0 || origin_tags.len() != n || slot_hints.len() != n || n > u32::MAX as usize {
            return None;
        }
        Some(Self {
            identifier: identifier.into(),
            condition,
            quality,
            contained,
            stack_size: n as u32,
            stolen_flags,
            origin_tags,
            slot_hints,
        })
    }

    pub fn with_condition(mut self, condition: f32) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_quality(mut self, quality: i32) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_children(mut self, children: Vec<Record>) -> Self {
        self.contained = children;
        self
    }

    /// Replace the per-unit metadata; the stack size follows the list length.
    pub fn with_units(mut self, units: Vec<UnitMeta>) -> Self {
        if units.is_empty() {
            return self;
        }
        self.stack_size = units.len() as u32;
        self.stolen_flags = units.iter().map(|u| u.stolen).collect();
        self.slot_hints = units.iter().map(|u| u.slot_hint).collect();
        self.origin_tags = units.into_iter().map(|u| u.origin).collect();
        self
    }

    pub fn stack_size(&self) -> u32 {
        self.stack_size
    }

    pub fn stolen_flags(&self) -> &[bool] {
        &self.stolen_flags
    }

    pub fn origin_tags(&self) -> &[String] {
        &self.origin_tags
    }

    pub fn slot_hints(&self) -> &[i32] {
        &self.slot_hints
    }

    /// Per-unit metadata, in stack order.
    pub fn units(&self) -> impl Iterator<Item = UnitMeta> + '_ {
        self.stolen_flags
            .iter()
            .zip(&self.origin_tags)
            .zip(&self.slot_hints)
            .map(|((stolen, origin), slot)| UnitMeta::new(*stolen, origin.clone(), *slot))
    }

    pub fn has_children(&self) -> bool {
        !self.contained.is_empty()
    }

    /// Pristine and childless records can be merged into another stack.
    pub fn is_mergeable(&self) -> bool {
        !self.has_children() && self.condition >= MERGE_CONDITION_THRESHOLD
    }

    /// Grouping key for stack merging.
    pub fn merge_key(&self) -> (&str, i32) {
        (&self.identifier, self.quality)
    }

    /// Units an extraction may take from this record. A composite record is
    /// indivisible and counts as a single unit.
    pub fn extractable_units(&self) -> u64 {
        if self.has_children() {
            1
        } else {
            self.stack_size as u64
        }
    }

    /// Recursive item count: `stack * (1 + count(children))`.
    pub fn item_count(&self) -> u64 {
        self.stack_size as u64 * (1 + item_count(&self.contained))
    }

    /// Whether this record and all descendants keep their per-unit lists aligned.
    pub fn is_consistent(&self) -> bool {
        let n = self.stack_size as usize;
        n >= 1
            && self.stolen_flags.len() == n
            && self.origin_tags.len() == n
            && self.slot_hints.len() == n
            && self.contained.iter().all(Record::is_consistent)
    }

    /// Split the first `k` units into a new record.
    ///
    /// Returns `None` when `k` is zero, when `k` would empty the stack, or when
    /// the record has children.
    pub fn split_front(&mut self, k: u32) -> Option<Record> {
        if k == 0 || k >= self.stack_size || self.has_children() {
            return None;
        }
        let k_usize = k as usize;
        let front = Record {
            identifier: self.identifier.clone(),
            condition: self.condition,
            quality: self.quality,
            contained: Vec::new(),
            stack_size: k,
            stolen_flags: self.stolen_flags.drain(..k_usize).collect(),
            origin_tags: self.origin_tags.drain(..k_usize).collect(),
            slot_hints: self.slot_hints.drain(..k_usize).collect(),
        };
        self.stack_size -= k;
        debug_assert!(self.is_consistent() && front.is_consistent());
        Some(front)
    }

    /// Append another stack's units after this one's.
    pub(crate) fn absorb(&mut self, other: Record) {
        debug_assert!(self.is_mergeable() && other.is_mergeable());
        self.stack_size = self.stack_size.saturating_add(other.stack_size);
        self.stolen_flags.extend(other.stolen_flags);
        self.origin_tags.extend(other.origin_tags);
        self.slot_hints.extend(other.slot_hints);
    }

    /// Case-insensitive identifier match against a keyword.
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        let keyword = keyword.trim();
        keyword.is_empty() || self.identifier.to_lowercase().contains(&keyword.to_lowercase())
    }
}

/// Recursive item count over a list of records.
pub fn item_count(records: &[Record]) -> u64 {
    records.iter().map(Record::item_count).sum()
}

/// Sum of stack sizes over a list of records.
pub fn total_stack(records: &[Record]) -> u64 {
    records.iter().map(|r| r.stack_size() as u64).sum()
}
