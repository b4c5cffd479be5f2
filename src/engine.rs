//! Request engine: options, per-attempt reporting, and the attempt loop.

pub mod lifecycle;
pub mod options;
pub mod report;

pub use lifecycle::RequestEngine;
pub use options::{
	Protocol, RequestOptions, RequestOptionsBuilder, TransactionLogLoader, TrialMode,
};
pub use report::{
	AttemptResult, ErrorLogEntry, ErrorLogType, RequestReport, SuccessLogEntry,
};
