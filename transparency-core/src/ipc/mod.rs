//! Types surfaced to the control plane (status snapshots and notifications).
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so hosts can
//! forward them as JSON.

pub mod events;
