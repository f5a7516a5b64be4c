//! Reference-data cache & search.
//!
//! Keeps a local, searchable copy of the broker instrument catalog fresh
//! within 24 hours and answers search/expiry/option-chain queries without
//! calling upstream per request. The catalog and its refresh log are the
//! only durable state in the system; persistence goes through
//! [`InstrumentRepositoryTrait`].

pub mod instruments_model;
pub mod instruments_service;
pub mod instruments_traits;

pub use instruments_model::{
    Instrument, OptionChain, OptionChainStrike, OptionSide, RefreshLogEntry, RefreshStatus,
    RefreshSummary, SearchFilters,
};
pub use instruments_service::{InstrumentService, InstrumentServiceConfig};
pub use instruments_traits::InstrumentRepositoryTrait;
