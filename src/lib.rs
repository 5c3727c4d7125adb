//! livedoc: an embeddable document store with live, incrementally-maintained queries.
//!
//! Records are schemaless JSON-like documents stored under a named index. An
//! `IndexEngine` (a minimal inverted-index + query implementation, see
//! [`index_engine`]) answers ad-hoc searches; the interesting part of this
//! crate is the live-query machinery layered on top: a write goes through the
//! [`mutator::Mutator`], which updates the record and its index projections
//! under a per-record lock, then hands a change state to the
//! [`view_manager::ViewManager`]. The manager routes that state to every
//! [`view::View`] whose canonical (query, sort) key might be affected; each
//! view incrementally updates its sorted result set and fans the change out
//! to its [`subscriber::Subscriber`]s.
//!
//! ┌──────────┐   lock→put→index→notify   ┌──────────────┐  background queue  ┌────────┐
//! │ Mutator  │ ─────────────────────────▶ │ ViewManager  │ ──────────────────▶ │ View   │
//! └──────────┘                            └──────────────┘                    └───┬────┘
//!                                                                                   │ change
//!                                                                             ┌─────▼──────┐
//!                                                                             │ Subscriber │
//!                                                                             └────────────┘

pub mod core;
pub mod analysis;
pub mod index;
pub mod query;
pub mod index_engine;
pub mod schema;
pub mod record;
pub mod job;
pub mod mutator;
pub mod admin;
pub mod view;
pub mod summary_view;
pub mod subscriber;
pub mod view_manager;
pub mod store;

pub use core::config::Config;
pub use core::error::{Error, Result};
pub use core::value::Value;
pub use store::{SearchOptions, SearchResult, Stats, Store};
pub use subscriber::{Subscriber, SubscriberEvent};
pub use view_manager::SubscribeOptions;
