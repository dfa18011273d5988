pub mod health;
pub mod queues;
pub mod shell;
