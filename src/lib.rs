// Leader Clusters - Core Library
// Progressive name normalization and clustering for leader rosters

pub mod clustering;
pub mod db;
pub mod error;
pub mod logging;
pub mod report;
pub mod rules;

// Only compile the reviewer when the TUI feature is enabled
#[cfg(feature = "tui")]
pub mod ui;

// Re-export commonly used types
pub use clustering::{
    records_from_pairs, Absorber, ClusterEngine, MergeEntry, NameRecord, Provenance, RunOutcome,
    StepReport,
};
pub use db::{
    get_aliases, insert_leaders, leader_count, leader_history, leader_records, load_csv,
    load_leaders, record_event, save_clusters, setup_database, LeaderEvent, LeaderRow,
};
pub use error::{ClusterError, Result};
pub use report::{format_step_report, format_summary, StepSink, TextReporter};
pub use rules::{
    default_rules, load_rules, non_ascii_chars, non_ascii_inventory, CompiledRule, MatchTransform,
    Replacement, Rule, RuleTable,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
