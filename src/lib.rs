//! Timetable generation: a validated room/period assignment model, lock
//! handling, and a step-wise protocol for refining the table with an
//! external optimizer.

pub mod config;
pub mod data;
pub mod error;
pub mod geometry;
pub mod lock;
pub mod optimizer;
pub mod protocol;
pub mod score;
pub mod server;
pub mod session;
pub mod validate;
