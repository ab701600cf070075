mod http;
mod hub;
mod poll;

pub use http::HttpDriver;
pub use hub::StatusHub;
pub use poll::PollDriver;
