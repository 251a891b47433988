//! Physical door access authorization.
//!
//! This crate keeps groups (buildings), doors and users in a JSON-backed
//! store, decides whether a user may open a door, and records every decision
//! in a bounded audit log. Access is granted either by a direct door grant or
//! by a legacy grant on the door's group. Use [`Engine`] for every operation;
//! it serializes mutations behind one lock and persists each change before
//! returning.
//!
//! # Examples
//!
//! Basic flow using the in-memory store (enable `memory-store`):
//! ```no_run
//! # #[cfg(feature = "memory-store")]
//! # {
//! use door_access::{EngineBuilder, MemoryStore, NewDoor, NewGroup, NewUser, UserId};
//! let engine = EngineBuilder::new(MemoryStore::new()).build();
//! let group = engine.create_group(NewGroup::named("HQ"));
//! let door = engine.create_door(NewDoor::new("Lobby", group.id.clone())).unwrap();
//! let user = engine
//!     .create_user(NewUser::new(UserId::try_from("emp-1").unwrap(), "Ana"))
//!     .unwrap();
//! engine.authorize_user_for_doors(&user.id, vec![door.id.clone()]).unwrap();
//! assert!(engine.check_access(&user.id, &door.id).authorized);
//! # }
//! ```
//!
//! Persisting to a directory of JSON files:
//! ```no_run
//! use door_access::{EngineBuilder, JsonFileStore};
//! let store = JsonFileStore::open("Data/door_access").unwrap();
//! let engine = EngineBuilder::new(store).log_capacity(500).build();
//! # let _ = engine;
//! ```
#![forbid(unsafe_code)]

pub mod config;
mod controller;
mod engine;
mod error;
mod identity;
mod json_store;
mod model;
mod recorder;
mod resolver;
mod state;
mod store;
mod types;

#[cfg(any(test, feature = "memory-store"))]
mod memory_store;

#[cfg(feature = "axum")]
pub mod axum;

pub use crate::controller::{DoorController, DoorNotification, NoController, NotificationStatus};
pub use crate::engine::{
    DashboardStats, DoorOpenOutcome, Engine, EngineBuilder, RecognitionEvent, RecognitionOutcome,
};
pub use crate::error::{EntityKind, Error, Result, StoreError};
pub use crate::identity::{IdentityVerifier, Verification};
pub use crate::json_store::JsonFileStore;
pub use crate::model::{
    AccessLogEntry, Door, DoorPatch, Group, GroupPatch, NewDoor, NewGroup, NewUser, User,
    UserPatch,
};
pub use crate::recorder::{AccessLog, DEFAULT_LOG_CAPACITY, DEFAULT_QUERY_LIMIT, LogQuery};
pub use crate::resolver::{
    AccessDecision, AccessReason, Directory, DoorGrant, accessible_doors, check_access,
};
pub use crate::store::{Collection, Store};
pub use crate::types::{AccessEventKind, DoorId, DoorStatus, GroupId, LogId, UserId};

#[cfg(feature = "http")]
pub use crate::controller::HttpDoorController;

#[cfg(feature = "http")]
pub use crate::identity::HttpIdentityVerifier;

#[cfg(any(test, feature = "memory-store"))]
pub use crate::memory_store::MemoryStore;
