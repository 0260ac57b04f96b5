pub mod chat;
pub mod clock;
pub mod connections;
pub mod discovery;
pub mod error;
pub mod exchange;
pub mod ports;
pub mod presence;
pub mod scoring;
pub mod users;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
