pub mod config;
pub mod dispatch;
pub mod error;
pub mod factory;
pub mod fanout;
pub mod form;
pub mod persona;
pub mod pipeline;
pub mod server;
pub mod tools;
