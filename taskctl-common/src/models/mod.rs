pub mod execution;
pub mod image;
pub mod secret;
pub mod stream;
pub mod user;

#[derive(Clone, Debug, serde::Serialize)]
pub struct HealthResponse {
    pub version: &'static str,
}
