//! Tunnel image management
//!
//! The tunnel image is built lazily from a recipe bundled into the binary,
//! or from a directory named in the config.

use crate::{CoreError, Result};
use serveo_provider::{BuildConfig, ContainerProvider, ImageId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Recipe file name inside a build context
pub const DOCKERFILE: &str = "Dockerfile";

const BUNDLED_DOCKERFILE: &str = include_str!("../assets/Dockerfile");
const BUNDLED_ENTRYPOINT: &str = include_str!("../assets/entrypoint.sh");

/// Where the tunnel image is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildContext {
    /// The recipe shipped with serveo
    Bundled,
    /// A user-provided directory containing a Dockerfile
    Directory(PathBuf),
}

impl BuildContext {
    pub fn from_config(dir: Option<&Path>) -> Self {
        match dir {
            Some(dir) => Self::Directory(dir.to_path_buf()),
            None => Self::Bundled,
        }
    }
}

/// The bundled recipe written out to a temporary directory.
/// The directory is deleted when this is dropped.
pub struct BundledRecipe {
    temp_dir: tempfile::TempDir,
}

impl BundledRecipe {
    pub fn stage() -> Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::write(temp_dir.path().join(DOCKERFILE), BUNDLED_DOCKERFILE)?;
        std::fs::write(temp_dir.path().join("entrypoint.sh"), BUNDLED_ENTRYPOINT)?;
        Ok(Self { temp_dir })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}

/// What `ensure_image` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    AlreadyPresent,
    Built(ImageId),
    Rebuilt(ImageId),
}

/// Makes sure the tunnel image exists
pub struct ImageBuilder<'a> {
    provider: &'a dyn ContainerProvider,
    image: &'a str,
    context: &'a BuildContext,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(
        provider: &'a dyn ContainerProvider,
        image: &'a str,
        context: &'a BuildContext,
    ) -> Self {
        Self {
            provider,
            image,
            context,
        }
    }

    /// Build the image if it is missing, or rebuild it when `force_rebuild`.
    ///
    /// Rebuilding removes the old image first, which fails with
    /// `ImageInUse` while a tunnel container still uses it.
    pub async fn ensure_image(&self, force_rebuild: bool) -> Result<ImageOutcome> {
        let exists = self.provider.image_exists(self.image).await?;

        if exists && !force_rebuild {
            tracing::debug!("Image {} already present", self.image);
            return Ok(ImageOutcome::AlreadyPresent);
        }

        if exists {
            tracing::info!("Removing image {} for rebuild", self.image);
            self.provider.remove_image(self.image).await?;
        }

        let id = self.build().await?;
        Ok(if exists {
            ImageOutcome::Rebuilt(id)
        } else {
            ImageOutcome::Built(id)
        })
    }

    async fn build(&self) -> Result<ImageId> {
        // Must outlive the build call
        let staged;
        let context = match self.context {
            BuildContext::Directory(dir) => dir.clone(),
            BuildContext::Bundled => {
                staged = BundledRecipe::stage()?;
                staged.path().to_path_buf()
            }
        };

        if !context.join(DOCKERFILE).is_file() {
            return Err(CoreError::Build(format!(
                "build recipe missing: {}",
                context.join(DOCKERFILE).display()
            )));
        }

        tracing::info!("Building image {} from {}", self.image, context.display());

        let config = BuildConfig {
            context,
            dockerfile: DOCKERFILE.to_string(),
            tag: self.image.to_string(),
            labels: HashMap::from([("serveo.managed".to_string(), "true".to_string())]),
            no_cache: false,
        };

        let id = self.provider.build(&config).await?;
        tracing::info!("Built image {} ({})", self.image, id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockCall, MockProvider};
    use serveo_provider::{ContainerStatus, ProviderError, ProviderType};

    const IMAGE: &str = "wocker-serveo";

    fn builds(mock: &MockProvider) -> usize {
        mock.count_calls(|c| matches!(c, MockCall::Build { .. }))
    }

    #[tokio::test]
    async fn test_builds_when_absent() {
        let mock = MockProvider::new(ProviderType::Docker);
        let context = BuildContext::Bundled;
        let builder = ImageBuilder::new(&mock, IMAGE, &context);

        let outcome = builder.ensure_image(false).await.unwrap();
        assert!(matches!(outcome, ImageOutcome::Built(_)));
        assert!(mock.has_image(IMAGE));
        assert!(mock.was_called(&MockCall::Build {
            tag: IMAGE.to_string()
        }));
    }

    #[tokio::test]
    async fn test_second_ensure_skips_build() {
        let mock = MockProvider::new(ProviderType::Docker);
        let context = BuildContext::Bundled;
        let builder = ImageBuilder::new(&mock, IMAGE, &context);

        builder.ensure_image(false).await.unwrap();
        let outcome = builder.ensure_image(false).await.unwrap();

        assert_eq!(outcome, ImageOutcome::AlreadyPresent);
        assert_eq!(builds(&mock), 1);
    }

    #[tokio::test]
    async fn test_force_rebuild_removes_then_builds() {
        let mock = MockProvider::new(ProviderType::Docker);
        mock.add_image(IMAGE);
        let context = BuildContext::Bundled;
        let builder = ImageBuilder::new(&mock, IMAGE, &context);

        let outcome = builder.ensure_image(true).await.unwrap();
        assert!(matches!(outcome, ImageOutcome::Rebuilt(_)));

        let calls = mock.get_calls();
        let remove_at = calls
            .iter()
            .position(|c| matches!(c, MockCall::RemoveImage { .. }))
            .unwrap();
        let build_at = calls
            .iter()
            .position(|c| matches!(c, MockCall::Build { .. }))
            .unwrap();
        assert!(remove_at < build_at);
    }

    #[tokio::test]
    async fn test_force_rebuild_blocked_by_container() {
        let mock = MockProvider::new(ProviderType::Docker);
        mock.add_image(IMAGE);
        mock.add_container("serveo-42", IMAGE, ContainerStatus::Running);
        let context = BuildContext::Bundled;
        let builder = ImageBuilder::new(&mock, IMAGE, &context);

        let err = builder.ensure_image(true).await.unwrap_err();
        assert!(matches!(err, CoreError::ImageInUse(_)));
        assert_eq!(builds(&mock), 0);
    }

    #[tokio::test]
    async fn test_missing_recipe_is_build_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = MockProvider::new(ProviderType::Docker);
        let context = BuildContext::Directory(tmp.path().to_path_buf());
        let builder = ImageBuilder::new(&mock, IMAGE, &context);

        let err = builder.ensure_image(false).await.unwrap_err();
        assert!(matches!(err, CoreError::Build(_)));
        assert_eq!(builds(&mock), 0);
    }

    #[tokio::test]
    async fn test_failed_build_surfaces() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(DOCKERFILE), "FROM scratch\n").unwrap();
        let mock = MockProvider::new(ProviderType::Docker);
        mock.fail_builds(ProviderError::BuildError("exit code 1".into()));
        let context = BuildContext::Directory(tmp.path().to_path_buf());
        let builder = ImageBuilder::new(&mock, IMAGE, &context);

        let err = builder.ensure_image(false).await.unwrap_err();
        assert!(matches!(err, CoreError::Build(msg) if msg == "exit code 1"));
        assert!(!mock.has_image(IMAGE));
    }

    #[test]
    fn test_bundled_recipe_stages_files() {
        let recipe = BundledRecipe::stage().unwrap();
        let dockerfile = std::fs::read_to_string(recipe.path().join(DOCKERFILE)).unwrap();
        assert!(dockerfile.contains("autossh"));
        assert!(recipe.path().join("entrypoint.sh").is_file());

        let dir = recipe.path().to_path_buf();
        drop(recipe);
        assert!(!dir.exists());
    }
}
