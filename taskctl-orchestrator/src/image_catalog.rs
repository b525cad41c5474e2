use std::sync::Arc;

use sha2::{Digest, Sha256};
use taskctl_backends::repositories::ImageRepository;
use taskctl_backends::runner::TaskRunner;
use taskctl_common::{
    models::image::{ImageRegistration, RegisterImageRequest},
    Error, ErrorKind, Result,
};
use tracing::{instrument, warn};

/// Splits a user-supplied image reference into `(registry, name, tag)`.
/// `library/nginx:1.25` -> `("library", "nginx", "1.25")`; `redis` ->
/// `("", "redis", "latest")`.
fn parse_image_ref(image: &str) -> (String, String, String) {
    let (path, tag) = match image.rsplit_once(':') {
        Some((path, tag)) => (path, tag),
        None => (image, "latest"),
    };
    match path.rsplit_once('/') {
        Some((registry, name)) => (registry.to_string(), name.to_string(), tag.to_string()),
        None => (String::new(), path.to_string(), tag.to_string()),
    }
}

fn render_ref(registry: &str, name: &str, tag: &str) -> String {
    if registry.is_empty() {
        format!("{name}:{tag}")
    } else {
        format!("{registry}/{name}:{tag}")
    }
}

/// Deterministic `image_id` over the full registration tuple (spec.md §4.3):
/// stable across restarts, collision-resistant, shaped `name:tag-<hex>` so
/// [`looks_like_image_id`] can tell it apart from a bare reference.
fn compute_image_id(
    registry: &str,
    name: &str,
    tag: &str,
    task_role: Option<&str>,
    exec_role: Option<&str>,
    cpu: Option<i32>,
    memory: Option<i32>,
    runtime_platform: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(registry.as_bytes());
    hasher.update(b"\0");
    hasher.update(name.as_bytes());
    hasher.update(b"\0");
    hasher.update(tag.as_bytes());
    hasher.update(b"\0");
    hasher.update(task_role.unwrap_or_default().as_bytes());
    hasher.update(b"\0");
    hasher.update(exec_role.unwrap_or_default().as_bytes());
    hasher.update(b"\0");
    hasher.update(cpu.map(|v| v.to_string()).unwrap_or_default().as_bytes());
    hasher.update(b"\0");
    hasher.update(memory.map(|v| v.to_string()).unwrap_or_default().as_bytes());
    hasher.update(b"\0");
    hasher.update(runtime_platform.unwrap_or_default().as_bytes());

    let digest = hasher.finalize();
    let hex = digest.iter().take(8).map(|b| format!("{b:02x}")).collect::<String>();
    format!("{name}:{tag}-{hex}")
}

fn looks_like_image_id(s: &str) -> bool {
    s.rsplit_once(':')
        .map(|(_, tag_and_hex)| tag_and_hex.contains('-'))
        .unwrap_or(false)
}

/// Resolves image references to task templates and owns the runtime's
/// template registry (spec.md §4.3). Grounded on the way
/// `shuttle_gateway`'s project task-state machine is the sole speaker to its
/// Docker context: one component owns the runtime side-effects.
#[derive(Clone)]
pub struct ImageCatalog {
    images: Arc<dyn ImageRepository>,
    runner: Arc<dyn TaskRunner>,
}

impl ImageCatalog {
    pub fn new(images: Arc<dyn ImageRepository>, runner: Arc<dyn TaskRunner>) -> Self {
        Self { images, runner }
    }

    #[instrument(skip(self))]
    pub async fn register_image(&self, request: RegisterImageRequest) -> Result<ImageRegistration> {
        if request.image.trim().is_empty() {
            return Err(Error::custom(ErrorKind::InvalidRequest, "image must not be empty"));
        }

        for role in [request.task_role.as_deref(), request.exec_role.as_deref()]
            .into_iter()
            .flatten()
        {
            if !self.runner.role_exists(role).await? {
                return Err(Error::custom(
                    ErrorKind::InvalidRequest,
                    format!("role {role} does not exist"),
                ));
            }
        }

        let (registry, name, tag) = parse_image_ref(&request.image);
        let image_id = compute_image_id(
            &registry,
            &name,
            &tag,
            request.task_role.as_deref(),
            request.exec_role.as_deref(),
            request.cpu,
            request.memory,
            request.runtime_platform.as_deref(),
        );

        if let Some(mut existing) = self.images.get_by_id(&image_id).await? {
            // Idempotent re-registration: only the default bit may change.
            if let Some(is_default) = request.is_default {
                if is_default && !existing.is_default {
                    self.images.clear_default_except(&image_id).await?;
                    existing.is_default = true;
                    self.images.upsert(existing.clone()).await?;
                }
            }
            return Ok(existing);
        }

        let image_ref = render_ref(&registry, &name, &tag);
        let task_template_name = self.runner.register_image(&image_id, &image_ref).await?;

        let is_default = request
            .is_default
            .unwrap_or(self.images.get_default().await?.is_none());

        let registration = ImageRegistration {
            image_id: image_id.clone(),
            registry,
            name,
            tag,
            task_template_name,
            is_default,
            task_role: request.task_role,
            exec_role: request.exec_role,
            cpu: request.cpu,
            memory: request.memory,
            runtime_platform: request.runtime_platform,
        };
        self.images.upsert(registration.clone()).await?;

        if is_default {
            self.images.clear_default_except(&image_id).await?;
        }

        Ok(registration)
    }

    pub async fn list_images(&self) -> Result<Vec<ImageRegistration>> {
        self.images.list().await
    }

    pub async fn get_default(&self) -> Result<Option<ImageRegistration>> {
        self.images.get_default().await
    }

    #[instrument(skip(self))]
    pub async fn get_image(&self, image_or_id: &str) -> Result<ImageRegistration> {
        self.resolve(image_or_id)
            .await?
            .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))
    }

    /// Used both by `GetImage` and by `RunCommand`'s template resolution: a
    /// bare reference returns *any* registered variant (spec.md §4.3).
    pub async fn resolve(&self, image_or_id: &str) -> Result<Option<ImageRegistration>> {
        if looks_like_image_id(image_or_id) {
            if let Some(found) = self.images.get_by_id(image_or_id).await? {
                return Ok(Some(found));
            }
        }
        self.images.get_any_by_ref(image_or_id).await
    }

    #[instrument(skip(self))]
    pub async fn remove_image(&self, image_ref: &str) -> Result<()> {
        let templates = self.images.delete_by_ref(image_ref).await?;
        if templates.is_empty() {
            return Err(Error::from_kind(ErrorKind::NotFound));
        }

        for template in templates {
            if let Err(err) = self.runner.remove_task_template(&template).await {
                warn!(error = %err, %template, "failed to deregister task template, continuing");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskctl_backends::fakes::InMemoryImages;
    use taskctl_backends::runner::fake::FakeRunner;

    fn catalog() -> (ImageCatalog, Arc<FakeRunner>) {
        let (runner, _rx) = FakeRunner::new();
        let catalog = ImageCatalog::new(Arc::new(InMemoryImages::default()), runner.clone());
        (catalog, runner)
    }

    #[tokio::test]
    async fn first_registration_becomes_default() {
        let (catalog, _runner) = catalog();
        let image = catalog
            .register_image(RegisterImageRequest {
                image: "a:1".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(image.is_default);
    }

    #[tokio::test]
    async fn explicit_default_transfers_atomically() {
        let (catalog, _runner) = catalog();
        catalog
            .register_image(RegisterImageRequest {
                image: "a:1".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let b = catalog
            .register_image(RegisterImageRequest {
                image: "b:1".into(),
                is_default: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(b.is_default);

        let images = catalog.list_images().await.unwrap();
        assert_eq!(images.iter().filter(|i| i.is_default).count(), 1);
        assert_eq!(catalog.get_default().await.unwrap().unwrap().image_id, b.image_id);
    }

    #[tokio::test]
    async fn reregistering_same_tuple_is_idempotent() {
        let (catalog, _runner) = catalog();
        let first = catalog
            .register_image(RegisterImageRequest {
                image: "a:1".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let second = catalog
            .register_image(RegisterImageRequest {
                image: "a:1".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(first.image_id, second.image_id);
        assert_eq!(catalog.list_images().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_role_is_rejected() {
        let (catalog, _runner) = catalog();
        let err = catalog
            .register_image(RegisterImageRequest {
                image: "a:1".into(),
                task_role: Some("nope".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn remove_image_deregisters_every_template() {
        let (catalog, _runner) = catalog();
        catalog
            .register_image(RegisterImageRequest {
                image: "a:1".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        catalog.remove_image("a:1").await.unwrap();
        assert!(catalog.list_images().await.unwrap().is_empty());
        let err = catalog.remove_image("a:1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
