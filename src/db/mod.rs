pub mod models;
pub mod queries;
pub mod store;

#[cfg(test)]
pub mod memory;

pub use store::{ForecastHourFilter, PgPointStore, PointFilter, PointStore};
