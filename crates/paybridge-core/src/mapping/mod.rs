//! The payload mapping engine (component B): dotted-path addressing, the
//! expression language, and the clause-ordered apply engine.

pub mod engine;
pub mod expr;
pub mod path;

pub use engine::MappingEngine;
