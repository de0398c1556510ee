//! Served-request episodes
//!
//! An episode is created when a request completes: the context it was decided
//! on, the actions taken and the observed outcome. The learner consumes each
//! episode exactly once and then appends it to the archive, which offline
//! replay reads back.

mod archive;
mod record;

pub use archive::EpisodeArchive;
pub use record::Episode;
