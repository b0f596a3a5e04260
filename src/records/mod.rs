//! Record model, take-policy resolution and stack compaction.
//!
//! Records are quantity-bearing stacks with per-unit metadata and optional
//! nested children. The resolver picks which stacks satisfy an extraction;
//! compaction merges pristine duplicates.

mod compaction;
mod record;
mod resolver;

pub use compaction::{chunk_stacks, compact_snapshot, merge_stacks};
pub use record::{item_count, total_stack, Record, UnitMeta};
pub use resolver::{
    any_position, available_units, best_candidate, extract_units, take_exact, Extraction,
    RecordFilter,
};
