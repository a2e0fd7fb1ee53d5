pub mod health;
pub mod metrics;
pub mod sagas;
pub mod services;
