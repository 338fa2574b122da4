//! Transient values passed between the conversion stages.
//!
//! Nothing here is persisted; every value lives for one request.

pub mod conversion;
