use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod chat;
pub mod connections;
pub mod exchange;
pub mod presence;
pub mod users;
