//! Multi-user sync engine for a collaborative canvas.
//!
//! Each client keeps a full local copy of a board's objects and reconciles it
//! with a persisted document store, an advisory lock store, and a
//! best-effort move-delta channel. Local edits apply immediately and are
//! written back throttled; remote changes stream in through change feeds.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`client`] | Async [`client::BoardClient`] event loop and store workers |
//! | [`sync`] | Synchronous [`sync::SyncCore`]: local ops, remote feeds, history replay, grouping |
//! | [`model`] | Canvas object types and payload conversion |
//! | [`geometry`] | Rectangles, rotation, affine matrices |
//! | [`index`] | Ordered object index and z-order planning |
//! | [`locks`] | Lock manager: selection tickets, rollback, interaction flags |
//! | [`delta`] | Move-delta broadcaster: coalescing and application |
//! | [`connectors`] | Connector endpoints, ports, and path maintenance |
//! | [`membership`] | Frame membership tracking |
//! | [`history`] | Undo/redo stacks of primitive actions |
//! | [`mutation`] | Mutation origin tokens and before/after diffs |
//! | [`throttle`] | Per-key trailing-edge throttle |
//! | [`latency`] | Write round-trip tracking |
//! | [`wire`] | Protobuf move-delta codec |
//! | [`store`] | Collaborator traits and the in-memory hub |
//! | [`config`] | Environment-driven tunables |
//! | [`error`] | Error types and stable error codes |

pub mod client;
pub mod config;
pub mod connectors;
pub mod delta;
pub mod error;
pub mod geometry;
pub mod history;
pub mod index;
pub mod latency;
pub mod locks;
pub mod membership;
pub mod model;
pub mod mutation;
pub mod store;
pub mod sync;
pub mod throttle;
pub mod wire;
