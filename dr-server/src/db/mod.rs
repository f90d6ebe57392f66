pub mod connection;
pub mod migrate;
pub mod point_store;
