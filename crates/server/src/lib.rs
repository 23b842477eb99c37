pub mod api;
pub mod bootstrap;
pub mod health;
pub mod pdf;
pub mod service;

#[cfg(test)]
mod testing;

pub use bootstrap::{bootstrap, bootstrap_with_config, Application, BootstrapError};
pub use service::{FinalizeOutcome, FinalizeRequest, QuotationService, RequestContext};
