//! Virtual pagination over a session's working set.
//!
//! The working set (`source`) is the truth while a session is open. A sorted,
//! filtered list of positions (`view`) is packed greedily into pages that
//! remember which source positions they were drawn from, so an edited page
//! can be written back to the right slots.

use crate::records::{
    available_units, compact_snapshot, take_exact, Record, RecordFilter,
};
use crate::types::{Direction, SortKey, SortMode, TakePolicy};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Capacity of one page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageBudget {
    /// Slots per page.
    pub max_slots: u32,
    /// Top-level records per page.
    pub max_entries: usize,
    /// Units one slot holds.
    pub stack_per_slot: u32,
}

impl PageBudget {
    /// Slots a record occupies; a record is never split across pages.
    pub fn slot_cost(&self, record: &Record) -> u32 {
        record.stack_size().div_ceil(self.stack_per_slot.max(1)).max(1)
    }
}

impl Default for PageBudget {
    fn default() -> Self {
        Self {
            max_slots: 48,
            max_entries: 48,
            stack_per_slot: 63,
        }
    }
}

/// One packed page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Page {
    /// Source positions, in view order.
    pub source_indices: Vec<usize>,
    /// Slots used.
    pub slots: u32,
}

#[derive(Debug)]
pub struct Paginator {
    source: Vec<Record>,
    view: Vec<usize>,
    pages: Vec<Page>,
    current: usize,
    sort: SortMode,
    filter: String,
    budget: PageBudget,
}

impl Paginator {
    pub fn new(source: Vec<Record>, budget: PageBudget, sort: SortMode) -> Self {
        let mut paginator = Self {
            source,
            view: Vec::new(),
            pages: Vec::new(),
            current: 0,
            sort,
            filter: String::new(),
            budget,
        };
        paginator.rebuild();
        paginator
    }

    // --- Accessors ---

    pub fn source(&self) -> &[Record] {
        &self.source
    }

    pub fn view(&self) -> &[usize] {
        &self.view
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn budget(&self) -> PageBudget {
        self.budget
    }

    /// Clones of the records on page `index`.
    pub fn page_records(&self, index: usize) -> Vec<Record> {
        self.pages
            .get(index)
            .map(|page| {
                page.source_indices
                    .iter()
                    .map(|&i| self.source[i].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Source positions shown on the current page.
    pub fn protected(&self) -> &[usize] {
        self.pages
            .get(self.current)
            .map(|p| p.source_indices.as_slice())
            .unwrap_or(&[])
    }

    // --- View construction ---

    /// Recompute the view and pages from `source`, clamping the current page.
    pub fn rebuild(&mut self) {
        let filter = self.filter.clone();
        let mut view: Vec<usize> = (0..self.source.len())
            .filter(|&i| self.source[i].matches_keyword(&filter))
            .collect();

        let sort = self.sort;
        let source = &self.source;
        view.sort_by(|&a, &b| compare(sort, &source[a], &source[b]));

        self.view = view;
        self.pages = pack(&self.source, &self.view, &self.budget);
        self.current = self.current.min(self.pages.len() - 1);
    }

    // --- Mutations ---

    /// Write `captured` back over page `index`'s source positions and rebuild.
    ///
    /// Captured records are inserted where the lowest removed position was,
    /// or appended when the page was empty.
    pub fn replace_page(&mut self, index: usize, captured: Vec<Record>) {
        let mut removed: Vec<usize> = self
            .pages
            .get(index)
            .map(|p| p.source_indices.clone())
            .unwrap_or_default();
        removed.sort_unstable();
        removed.dedup();

        let insert_at = removed.first().copied().unwrap_or(self.source.len());
        for &i in removed.iter().rev() {
            self.source.remove(i);
        }

        let insert_at = insert_at.min(self.source.len());
        self.source.splice(insert_at..insert_at, captured);
        self.rebuild();
    }

    /// Move by `delta` pages, clamped to the valid range.
    pub fn change_page(&mut self, delta: isize) -> usize {
        let last = self.pages.len() as isize - 1;
        self.current = (self.current as isize + delta).clamp(0, last) as usize;
        self.current
    }

    pub fn set_current(&mut self, index: usize) -> usize {
        self.current = index.min(self.pages.len() - 1);
        self.current
    }

    /// Next page, searching in `direction` and wrapping, holding a keyword hit.
    ///
    /// The current page is checked last.
    pub fn find_match(&self, direction: Direction, keyword: &str) -> Option<usize> {
        if keyword.trim().is_empty() {
            return None;
        }
        let count = self.pages.len() as isize;
        (1..=count)
            .map(|step| (self.current as isize + step * direction.step()).rem_euclid(count) as usize)
            .find(|&page| {
                self.pages[page]
                    .source_indices
                    .iter()
                    .any(|&i| self.source[i].matches_keyword(keyword))
            })
    }

    pub fn resort(&mut self, sort: SortMode) {
        self.sort = sort;
        self.rebuild();
    }

    pub fn set_filter(&mut self, filter: impl Into<String>) {
        self.filter = filter.into();
        self.current = 0;
        self.rebuild();
    }

    /// Merge duplicate stacks across the whole working set and rebuild.
    pub fn compact(&mut self) {
        self.source = compact_snapshot(&self.source);
        self.rebuild();
    }

    // --- Automated extraction outside the current page ---

    pub fn available_unprotected(&self, filter: RecordFilter<'_>) -> u64 {
        let protected: HashSet<usize> = self.protected().iter().copied().collect();
        available_units(&self.source, filter, &|i| !protected.contains(&i))
    }

    /// Take exactly `amount` units from positions not on the current page.
    ///
    /// Pages keep their layout; positions are remapped around removed
    /// records so the current page still points at the same records.
    pub fn take_unprotected(
        &mut self,
        amount: u64,
        policy: TakePolicy,
        filter: RecordFilter<'_>,
    ) -> Option<Vec<Record>> {
        let protected: HashSet<usize> = self.protected().iter().copied().collect();
        let extraction = take_exact(&mut self.source, amount, policy, filter, &|i| {
            !protected.contains(&i)
        })?;
        self.remap_after_removal(&extraction.removed);
        Some(extraction.taken)
    }

    /// Shift view and page positions past records removed at `removed`
    /// (ascending, pre-removal positions).
    fn remap_after_removal(&mut self, removed: &[usize]) {
        if removed.is_empty() {
            return;
        }
        let remap = |i: usize| -> Option<usize> {
            match removed.binary_search(&i) {
                Ok(_) => None,
                Err(shift) => Some(i - shift),
            }
        };

        self.view = self.view.iter().filter_map(|&i| remap(i)).collect();
        for page in &mut self.pages {
            page.source_indices = page
                .source_indices
                .iter()
                .filter_map(|&i| remap(i))
                .collect();
            page.slots = page
                .source_indices
                .iter()
                .map(|&i| self.budget.slot_cost(&self.source[i]))
                .sum();
        }
    }

    /// Give up the working set.
    pub fn into_source(self) -> Vec<Record> {
        self.source
    }
}

/// Order two records under a sort mode. Ties fall back to identifier, then
/// quality, then condition, all ascending.
fn compare(sort: SortMode, a: &Record, b: &Record) -> Ordering {
    let primary = match sort.key {
        SortKey::Identifier => a.identifier.cmp(&b.identifier),
        SortKey::Condition => a.condition.total_cmp(&b.condition),
        SortKey::Quality => a.quality.cmp(&b.quality),
        SortKey::StackSize => a.stack_size().cmp(&b.stack_size()),
    };
    let primary = if sort.descending {
        primary.reverse()
    } else {
        primary
    };

    primary
        .then_with(|| a.identifier.cmp(&b.identifier))
        .then_with(|| a.quality.cmp(&b.quality))
        .then_with(|| a.condition.total_cmp(&b.condition))
}

/// Greedy packing. Always yields at least one page.
fn pack(source: &[Record], view: &[usize], budget: &PageBudget) -> Vec<Page> {
    let mut pages = Vec::new();
    let mut page = Page::default();

    for &i in view {
        let cost = budget.slot_cost(&source[i]);
        let over_slots = page.slots + cost > budget.max_slots;
        let over_entries = page.source_indices.len() + 1 > budget.max_entries;

        if !page.source_indices.is_empty() && (over_slots || over_entries) {
            pages.push(std::mem::take(&mut page));
        }
        page.slots += cost;
        page.source_indices.push(i);
    }

    pages.push(page);
    pages
}
