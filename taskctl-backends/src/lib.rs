pub mod repositories;
pub mod runner;
pub mod value_store;

#[cfg(feature = "test-utils")]
pub mod fakes;
