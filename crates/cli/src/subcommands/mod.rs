pub mod database;
pub mod pool;
pub mod publish;
pub mod repository;
pub mod snapshot;
pub mod view;
