pub mod coordinator;
pub mod dispatcher;
pub mod safety;

pub use dispatcher::Executor;
