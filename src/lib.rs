pub mod auth;
pub mod availability;
pub mod clock;
pub mod compactor;
pub mod engine;
pub mod limits;
pub mod mapping;
pub mod message;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reconcile;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wal;
pub mod wire;
