//! suzu_memory — working history, episodic memory, trait/impression
//! evolution, and the social energy simulation.
//!
//! The `MemoryStore` owns all conversational state in memory and writes
//! through to a `Repository`. The `ConsolidationEngine` folds old history
//! into episodic summaries and drives evolution behind its pity gate.

pub mod consolidation;
pub mod evolution;
pub mod repository;
pub mod social;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

pub use consolidation::{evolution_chance, ConsolidationEngine};
pub use evolution::{compress_list, evolve_impressions, evolve_traits, ListKind, COMPRESSED_LEN};
pub use repository::{
    CounterState, MemorySnapshot, NullRepository, Repository, SqliteMonitor, SqliteRepository,
};
pub use social::{SocialEnergyModel, SocialState};
pub use store::MemoryStore;
