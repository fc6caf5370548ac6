pub mod chain;
pub mod config;
pub mod currency;
pub mod error;
pub mod event;
pub mod lightning;
pub mod logging;
pub mod pairs;
pub mod provider;
pub mod referral;
pub mod service;
pub mod swap;
pub mod wallet;
