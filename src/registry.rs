//! Keyed cache of initialized repositories.
//!
//! A [`RepositoryRegistry`] hands out one shared [`ImageRepository`] per
//! resource. Keys are normalized ([`normalize_key`]) so that `"Clip.MP4 "`
//! and `"clip.mp4"` resolve to the same entry. Concurrent first-time callers
//! for a key share a single in-flight initialization.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;

use crate::configuration::{InitFailurePolicy, RegistryOptions};
use crate::error::SeekframeError;
use crate::repository::ImageRepository;
use crate::source::SourceLoader;

type InitResult<L> = Result<Arc<ImageRepository<L>>, SeekframeError>;
type Entry<L> = Arc<OnceCell<InitResult<L>>>;

/// Normalize a resource identifier into a registry key: surrounding
/// whitespace is trimmed and the result is lowercased.
///
/// ```
/// assert_eq!(seekframe::normalize_key("  Clips/Intro.MP4 "), "clips/intro.mp4");
/// ```
pub fn normalize_key(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// Cache of initialized repositories, one per normalized key.
pub struct RepositoryRegistry<L: SourceLoader> {
    loader: Arc<L>,
    options: RegistryOptions,
    entries: Mutex<HashMap<String, Entry<L>>>,
}

impl<L: SourceLoader> Debug for RepositoryRegistry<L> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("RepositoryRegistry")
            .field("entries", &self.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<L: SourceLoader> RepositoryRegistry<L> {
    /// Create an empty registry with default options.
    pub fn new(loader: L) -> Self {
        Self::with_options(loader, RegistryOptions::default())
    }

    /// Create an empty registry with explicit options.
    pub fn with_options(loader: L, options: RegistryOptions) -> Self {
        Self {
            loader: Arc::new(loader),
            options,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the initialized repository for `identifier`, creating and
    /// initializing it on first use.
    ///
    /// Every caller for the same normalized key receives the same
    /// repository. Callers arriving while the first initialization is still
    /// running wait for it and observe its outcome.
    ///
    /// # Errors
    ///
    /// Returns the initialization error ([`SeekframeError::SourceLoadFailed`])
    /// to every caller that shared the failed attempt. Under
    /// [`InitFailurePolicy::Evict`] the entry is then removed so the next
    /// call loads again; under [`InitFailurePolicy::Cache`] the failure is
    /// returned for every later call.
    pub async fn get_repository(
        &self,
        identifier: &str,
    ) -> Result<Arc<ImageRepository<L>>, SeekframeError> {
        let key = normalize_key(identifier);
        let entry = Arc::clone(
            self.lock()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );

        let result = entry
            .get_or_init(|| async {
                let repository = Arc::new(ImageRepository::with_options(
                    identifier,
                    Arc::clone(&self.loader),
                    self.options.repository_options().clone(),
                ));
                repository.init().await?;
                Ok(repository)
            })
            .await
            .clone();

        if let Err(error) = &result {
            if self.options.failure_policy() == InitFailurePolicy::Evict {
                let mut entries = self.lock();
                // Only evict the attempt we observed; a retry may already
                // have replaced it.
                if entries.get(&key).is_some_and(|current| Arc::ptr_eq(current, &entry)) {
                    entries.remove(&key);
                    log::debug!("Evicted failed repository {key}: {error}");
                }
            }
        }

        result
    }

    /// Tear down and forget the repository for `identifier`.
    ///
    /// Returns `true` if an entry existed. An entry whose initialization is
    /// still running is forgotten without waiting for it.
    pub async fn remove(&self, identifier: &str) -> bool {
        let key = normalize_key(identifier);
        let Some(entry) = self.lock().remove(&key) else {
            return false;
        };

        if let Some(Ok(repository)) = entry.get() {
            repository.uninit().await;
        }
        log::debug!("Removed repository {key}");
        true
    }

    /// Returns `true` if an entry (initialized, initializing or, under
    /// [`InitFailurePolicy::Cache`], failed) exists for `identifier`.
    pub fn contains(&self, identifier: &str) -> bool {
        self.lock().contains_key(&normalize_key(identifier))
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The loader shared by every repository of this registry.
    pub fn loader(&self) -> &L {
        &self.loader
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry<L>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(feature = "ffmpeg")]
static FFMPEG_REGISTRY: std::sync::OnceLock<RepositoryRegistry<crate::decoder::FfmpegLoader>> =
    std::sync::OnceLock::new();

/// Return the shared, initialized repository for a video file, decoded with
/// FFmpeg using default output options.
///
/// Backed by one process-wide [`RepositoryRegistry`]; see
/// [`RepositoryRegistry::get_repository`] for sharing and failure semantics.
///
/// # Example
///
/// ```no_run
/// # async fn example() -> Result<(), seekframe::SeekframeError> {
/// let first = seekframe::get_repository("Input.mp4").await?;
/// let second = seekframe::get_repository("input.mp4 ").await?;
/// assert!(std::sync::Arc::ptr_eq(&first, &second));
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "ffmpeg")]
pub async fn get_repository(
    identifier: &str,
) -> Result<Arc<ImageRepository<crate::decoder::FfmpegLoader>>, SeekframeError> {
    FFMPEG_REGISTRY
        .get_or_init(|| RepositoryRegistry::new(crate::decoder::FfmpegLoader::new()))
        .get_repository(identifier)
        .await
}
