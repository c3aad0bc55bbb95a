pub mod aggregate;
pub mod pin_service;
pub mod portfolio_service;
pub mod snapshot_service;
pub mod valuation;
