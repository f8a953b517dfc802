pub mod cli;
pub mod config;
pub mod extract;
pub mod load;
pub mod logging;
pub mod pipeline;
pub mod schema;
pub mod signature;
pub mod table;
pub mod transformer;
pub mod unit;
