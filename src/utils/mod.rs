pub mod command;
pub mod counts;
pub mod discovery;
pub mod fastx;
pub mod file;
pub mod histogram;
pub mod layout;
pub mod metrics;
pub mod stats;
pub mod streams;
pub mod system;
