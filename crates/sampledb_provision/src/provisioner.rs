use std::{
    fmt::{Display, Formatter},
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use parking_lot::Mutex;
use sampledb_config::Config;
use sampledb_consts::consts;
use sampledb_extract::{ExtractOptions, extract_zip_with};
use tracing::instrument;

use crate::{
    deferred::DeferredRemovals,
    descriptor::DescriptorFormat,
    error::{ProvisionError, TeardownWarning},
    locator::{ArchiveReader, ResourceLocator, SearchPath},
    remove::{FsUnlinker, Unlinker, remove_directory_with},
    shutdown::{EngineShutdown, NoEngine},
};

/// How often a fresh working directory name is tried before giving up.
const MAX_CREATE_ATTEMPTS: u32 = 64;

static NEXT_INSTANCE: AtomicU32 = AtomicU32::new(0);

/// Identifies one materialized copy of the archive, from its extraction to
/// its removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for Generation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The working copy of the current generation.
#[derive(Debug)]
struct WorkingCopy {
    generation: Generation,
    path: PathBuf,
}

#[derive(Debug, Default)]
struct ProvisionState {
    /// Outstanding acquires.
    count: usize,
    /// The last generation that was attempted.
    last_generation: u64,
    /// Present if and only if `count > 0`.
    current: Option<WorkingCopy>,
}

/// What happened when the last consumer released the working copy.
#[derive(Debug, Clone)]
pub struct TeardownReport {
    pub generation: Generation,
    pub working_dir: PathBuf,
    /// Every problem encountered, in the order they occurred.
    pub warnings: Vec<TeardownWarning>,
    /// Whether the working directory was handed to deferred removal.
    pub deferred: bool,
}

impl TeardownReport {
    /// True if the engine was shut down and the directory is gone.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Hands out a private, reference counted working copy of the bundled
/// sample database.
///
/// The first [`Provisioner::acquire`] extracts the archive into a fresh
/// directory below the temp directory, later calls share it. When the last
/// acquire is matched by a [`Provisioner::release`] the engine is shut down
/// and the directory removed. The next acquire after that starts a new
/// generation in a directory with a different name.
///
/// All transitions happen under one lock, so concurrent callers observe
/// exactly one extraction and exactly one teardown per generation.
pub struct Provisioner {
    archive: String,
    locators: Vec<Box<dyn ResourceLocator>>,
    temp_dir: PathBuf,
    dir_prefix: String,
    instance_id: String,
    extract_options: ExtractOptions,
    descriptor: DescriptorFormat,
    engine: Box<dyn EngineShutdown>,
    unlinker: Box<dyn Unlinker>,
    deferred: Option<Arc<DeferredRemovals>>,
    state: Mutex<ProvisionState>,
}

impl Provisioner {
    /// Creates a provisioner for the archive with the given logical name.
    ///
    /// No locators are registered, add them with
    /// [`Provisioner::with_locator`] in the order they should be consulted.
    pub fn new(archive: impl Into<String>) -> Self {
        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        Self {
            archive: archive.into(),
            locators: Vec::new(),
            temp_dir: std::env::temp_dir(),
            dir_prefix: consts::WORKING_DIR_PREFIX.to_string(),
            instance_id: format!("{:x}{instance:04x}", std::process::id()),
            extract_options: ExtractOptions::default(),
            descriptor: DescriptorFormat::default(),
            engine: Box::new(NoEngine),
            unlinker: Box::new(FsUnlinker),
            deferred: Some(DeferredRemovals::process()),
            state: Mutex::new(ProvisionState::default()),
        }
    }

    /// Creates a provisioner from the settings in `config`. The configured
    /// search path, if any, is registered as the first locator.
    ///
    /// Resources packaged with the application are not known to the config.
    /// Callers that embed the archive build the provisioner with
    /// [`Provisioner::new`] and register their [`crate::EmbeddedResources`]
    /// before the search path.
    pub fn from_config(config: &Config) -> Self {
        let mut provisioner = Self::new(config.archive())
            .with_temp_dir(config.temp_dir())
            .with_dir_prefix(config.dir_prefix())
            .with_extract_options(ExtractOptions {
                buffer_size: config.buffer_size(),
            });

        if !config.search_path().is_empty() {
            provisioner = provisioner.with_locator(SearchPath::new(config.search_path()));
        }

        if config.defer_on_exit() {
            provisioner
        } else {
            provisioner.without_deferred_removals()
        }
    }

    /// Appends a locator to consult for the archive.
    #[must_use]
    pub fn with_locator(mut self, locator: impl ResourceLocator + 'static) -> Self {
        self.locators.push(Box::new(locator));
        self
    }

    #[must_use]
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    #[must_use]
    pub fn with_dir_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.dir_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_extract_options(mut self, options: ExtractOptions) -> Self {
        self.extract_options = options;
        self
    }

    #[must_use]
    pub fn with_descriptor_format(mut self, descriptor: DescriptorFormat) -> Self {
        self.descriptor = descriptor;
        self
    }

    /// Sets the hook that shuts the database engine down before teardown.
    #[must_use]
    pub fn with_engine(mut self, engine: impl EngineShutdown + 'static) -> Self {
        self.engine = Box::new(engine);
        self
    }

    #[must_use]
    pub fn with_unlinker(mut self, unlinker: impl Unlinker + 'static) -> Self {
        self.unlinker = Box::new(unlinker);
        self
    }

    /// Schedules directories that cannot be removed on `deferred` instead of
    /// the process wide list.
    #[must_use]
    pub fn with_deferred_removals(mut self, deferred: Arc<DeferredRemovals>) -> Self {
        self.deferred = Some(deferred);
        self
    }

    /// Leaves directories that cannot be removed behind.
    #[must_use]
    pub fn without_deferred_removals(mut self) -> Self {
        self.deferred = None;
        self
    }

    /// The logical name of the archive that is provisioned.
    pub fn archive(&self) -> &str {
        &self.archive
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// The number of outstanding acquires.
    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    /// The live generation, if any.
    pub fn generation(&self) -> Option<Generation> {
        self.state.lock().current.as_ref().map(|copy| copy.generation)
    }

    /// The working directory of the live generation, if any.
    pub fn working_dir(&self) -> Option<PathBuf> {
        self.state.lock().current.as_ref().map(|copy| copy.path.clone())
    }

    /// Returns the connection descriptor for the current state.
    pub fn resolve_descriptor(&self) -> String {
        let state = self.state.lock();
        self.descriptor
            .resolve(state.current.as_ref().map(|copy| copy.path.as_path()))
    }

    /// Registers a consumer of the working copy and returns the descriptor
    /// that addresses it.
    ///
    /// The first consumer pays for the extraction, everybody else blocks
    /// until it is done. If provisioning fails the state is left untouched
    /// and the next call tries again.
    #[instrument(skip(self), fields(archive = %self.archive))]
    pub fn acquire(&self) -> Result<String, ProvisionError> {
        let mut state = self.state.lock();

        if state.count == 0 {
            assert!(
                state.current.is_none(),
                "a working copy is still registered while no consumer holds it"
            );

            state.last_generation += 1;
            let generation = Generation(state.last_generation);
            let path = self.provision(generation)?;
            state.current = Some(WorkingCopy { generation, path });
        }

        state.count += 1;
        tracing::debug!(count = state.count, "acquired sample database");

        Ok(self
            .descriptor
            .resolve(state.current.as_ref().map(|copy| copy.path.as_path())))
    }

    /// Unregisters a consumer. The last one tears the working copy down and
    /// receives the report of that teardown.
    ///
    /// # Panics
    ///
    /// If there is no outstanding [`Provisioner::acquire`].
    #[instrument(skip(self), fields(archive = %self.archive))]
    pub fn release(&self) -> Option<TeardownReport> {
        let mut state = self.state.lock();
        assert!(state.count > 0, "release called without a matching acquire");

        state.count -= 1;
        tracing::debug!(count = state.count, "released sample database");
        if state.count > 0 {
            return None;
        }

        let Some(copy) = state.current.take() else {
            unreachable!("a held working copy is always registered");
        };
        Some(self.teardown(copy))
    }

    /// Acquires the working copy for as long as the returned [`Lease`] lives.
    pub fn lease(self: &Arc<Self>) -> Result<Lease, ProvisionError> {
        let descriptor = self.acquire()?;
        Ok(Lease {
            provisioner: self.clone(),
            descriptor,
        })
    }

    /// Creates the working directory for `generation` and extracts the
    /// archive into it.
    fn provision(&self, generation: Generation) -> Result<PathBuf, ProvisionError> {
        let archive = self.open_archive()?;
        let path = self.create_working_dir(generation)?;
        tracing::debug!("Creating sample database at {}", path.display());

        match extract_zip_with(archive, &path, &self.extract_options) {
            Ok(summary) => {
                tracing::info!(
                    %generation,
                    files = summary.files,
                    bytes = summary.bytes,
                    "provisioned sample database at {}",
                    path.display()
                );
                Ok(path)
            }
            Err(source) => {
                tracing::error!("failed to extract '{}': {source}", self.archive);
                self.remove_working_dir(&path, &mut Vec::new());
                Err(ProvisionError::Extract {
                    name: self.archive.clone(),
                    source,
                })
            }
        }
    }

    /// Asks every locator in turn for the archive.
    fn open_archive(&self) -> Result<Box<dyn ArchiveReader>, ProvisionError> {
        for locator in &self.locators {
            match locator.open(&self.archive) {
                Ok(Some(reader)) => return Ok(reader),
                Ok(None) => continue,
                Err(source) => {
                    return Err(ProvisionError::OpenArchive {
                        name: self.archive.clone(),
                        source: Arc::new(source),
                    });
                }
            }
        }

        tracing::error!("sample database archive not found: {}", self.archive);
        Err(ProvisionError::ArchiveNotFound(self.archive.clone()))
    }

    /// Creates a directory named
    /// `<prefix>_<unix-millis>_<instance>_<generation>` below the temp
    /// directory. The directory is created exclusively; if the name is taken
    /// a numeric suffix is appended.
    fn create_working_dir(&self, generation: Generation) -> Result<PathBuf, ProvisionError> {
        let create_error = |path: &Path, source: std::io::Error| ProvisionError::CreateWorkingDir {
            path: path.to_path_buf(),
            source: Arc::new(source),
        };

        fs_err::create_dir_all(&self.temp_dir).map_err(|e| create_error(&self.temp_dir, e))?;

        let base = format!(
            "{}_{}_{}_{}",
            self.dir_prefix,
            chrono::Utc::now().timestamp_millis(),
            self.instance_id,
            generation
        );

        let mut attempt = 0;
        loop {
            let name = match attempt {
                0 => base.clone(),
                n => format!("{base}-{n}"),
            };
            let path = self.temp_dir.join(name);
            match fs_err::create_dir(&path) {
                Ok(()) => return Ok(path),
                Err(e)
                    if e.kind() == ErrorKind::AlreadyExists && attempt + 1 < MAX_CREATE_ATTEMPTS =>
                {
                    attempt += 1;
                }
                Err(e) => return Err(create_error(&path, e)),
            }
        }
    }

    /// Shuts the engine down and removes the working directory.
    fn teardown(&self, copy: WorkingCopy) -> TeardownReport {
        let WorkingCopy { generation, path } = copy;
        let mut warnings = Vec::new();

        if let Err(err) = self.engine.shutdown(&self.descriptor.shutdown, &path) {
            let warning = TeardownWarning::Shutdown(Arc::from(err));
            tracing::warn!("{warning}");
            warnings.push(warning);
        }

        tracing::debug!("Removing sample database directory at {}", path.display());
        let removed = self.remove_working_dir(&path, &mut warnings);
        let deferred = !removed && self.deferred.is_some();

        tracing::info!(%generation, "released sample database at {}", path.display());

        TeardownReport {
            generation,
            working_dir: path,
            warnings,
            deferred,
        }
    }

    /// Removes a working directory, falling back to deferred removal.
    /// Returns `true` if the directory is gone.
    fn remove_working_dir(&self, path: &Path, warnings: &mut Vec<TeardownWarning>) -> bool {
        let removed = remove_directory_with(self.unlinker.as_ref(), path, &mut |err| {
            let warning = TeardownWarning::Remove(Arc::new(err));
            tracing::warn!("{warning}");
            warnings.push(warning);
        });
        if removed {
            return true;
        }

        let warning = match &self.deferred {
            Some(deferred) => {
                deferred.schedule(path);
                TeardownWarning::Deferred(path.to_path_buf())
            }
            None => TeardownWarning::Leaked(path.to_path_buf()),
        };
        tracing::warn!("{warning}");
        warnings.push(warning);
        false
    }
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("Provisioner");
        debug
            .field("archive", &self.archive)
            .field("temp_dir", &self.temp_dir)
            .field("dir_prefix", &self.dir_prefix)
            .field("instance_id", &self.instance_id);
        // Formatting must not wait for a running transition.
        match self.state.try_lock() {
            Some(state) => debug.field("state", &*state),
            None => debug.field("state", &format_args!("<locked>")),
        };
        debug.finish_non_exhaustive()
    }
}

/// A held working copy. Dropping the lease releases it.
#[must_use]
pub struct Lease {
    provisioner: Arc<Provisioner>,
    descriptor: String,
}

impl Lease {
    /// The descriptor that was returned when the lease was taken.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// The working directory backing this lease.
    pub fn working_dir(&self) -> Option<PathBuf> {
        self.provisioner.working_dir()
    }

    pub fn provisioner(&self) -> &Arc<Provisioner> {
        &self.provisioner
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.provisioner.release();
    }
}
