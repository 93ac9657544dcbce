pub mod client;
pub mod config;
pub mod entity;
pub mod model;
pub mod net;
pub mod server;
pub mod world;
