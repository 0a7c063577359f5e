mod client;
mod error;
mod types;

pub use client::RestClient;
pub use error::RestError;
