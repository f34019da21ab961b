//! # pledge-feed
//!
//! Live feed reconciliation for the pledgewall contributor list and
//! support-message wall.
//!
//! This crate provides:
//! - Normalization of loosely shaped push and local notifications
//! - Identity, content-similarity and recent-key deduplication
//! - A newest-first visible list that prepends admissions
//! - A debounce gate that collapses near-simultaneous deliveries
//! - The bulk-load state machine, with events buffered during the load
//! - Mounted views that own all of the above in a single task
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pledge_feed::{FeedConfig, FeedView, OptimisticSubmitter};
//! use pledge_core::{EntityKind, FeedScope, LocalBroadcast, MemoryEntityService};
//!
//! let service = Arc::new(MemoryEntityService::new());
//! let bus = LocalBroadcast::default();
//!
//! let mut handle = FeedView::mount(
//!     FeedConfig::for_kind(EntityKind::Contribution),
//!     FeedScope::new("spring-drive", EntityKind::Contribution),
//!     service.clone(),
//!     &bus,
//! )?;
//!
//! // A sibling form submits; the view shows it once.
//! OptimisticSubmitter::new(service, bus).submit(submission).await?;
//!
//! let snapshot = handle.changed().await?;
//! println!("{} contributors", snapshot.items.len());
//!
//! handle.unmount().await?;
//! ```

pub mod config;
pub mod dedup;
pub mod feed;
pub mod gate;
pub mod merge;
pub mod normalizer;
pub mod optimistic;
pub mod reconciler;
pub mod view;

// Re-export core types
pub use pledge_core::*;

pub use config::FeedConfig;
pub use dedup::{Admission, DedupStore, RejectReason};
pub use feed::{Applied, Feed};
pub use gate::{gate_key, DebounceGate, GateDecision};
pub use merge::VisibleList;
pub use normalizer::{DecodeError, Normalizer};
pub use optimistic::OptimisticSubmitter;
pub use reconciler::{transition, Reconciler};
pub use view::{FeedHandle, FeedSnapshot, FeedView};
