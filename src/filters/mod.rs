pub mod eval;
pub mod sql;
pub mod version;

pub use eval::{FilterOutcome, apply_filters, evaluate};
pub use sql::{CompiledFilters, compile_set_clause};
pub use version::compute_filter_version;
