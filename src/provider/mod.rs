pub mod fees;
pub mod rates;
pub mod timeouts;
