use serde::{Deserialize, Serialize};

/// Mapping `(image_ref, roles, resources, platform) -> task_template_name`
/// (spec.md §3, §4.3). `image_id` is the primary key, deterministic over the
/// full parameter tuple.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImageRegistration {
    pub image_id: String,
    pub registry: String,
    pub name: String,
    pub tag: String,
    pub task_template_name: String,
    pub is_default: bool,
    pub task_role: Option<String>,
    pub exec_role: Option<String>,
    pub cpu: Option<i32>,
    pub memory: Option<i32>,
    pub runtime_platform: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RegisterImageRequest {
    pub image: String,
    #[serde(default)]
    pub is_default: Option<bool>,
    #[serde(default)]
    pub task_role: Option<String>,
    #[serde(default)]
    pub exec_role: Option<String>,
    #[serde(default)]
    pub cpu: Option<i32>,
    #[serde(default)]
    pub memory: Option<i32>,
    #[serde(default)]
    pub runtime_platform: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListImagesResponse {
    pub images: Vec<ImageRegistration>,
}
