pub mod cache;
pub mod cipher;
pub mod config;
pub mod connection;
pub mod namespace;
pub mod rate_limit;
pub mod session;
pub mod store;
pub mod types;


pub use cache::*;
pub use cipher::*;
pub use config::*;
pub use namespace::*;
pub use connection::*;
pub use rate_limit::*;
pub use session::*;
pub use store::*;
pub use types::*;
