pub mod calldata;
pub mod chain;
pub mod config;
pub mod events;
pub mod format;
pub mod notifier;
pub mod parser;
pub mod price;
pub mod receipts;
pub mod rpc;
pub mod scanner;
pub mod service;
