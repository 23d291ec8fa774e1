//! Deskform Core
//!
//! Core library for a declarative virtual desktop management tool: the
//! resource model, schemas, plan computation and the state waiter shared by
//! every provider.

pub mod differ;
pub mod effect;
pub mod interpreter;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod schema;
pub mod waiter;
