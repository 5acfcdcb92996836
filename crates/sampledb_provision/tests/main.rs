use std::{
    io::{Cursor, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{
        Arc, Barrier, OnceLock, Weak,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use parking_lot::Mutex;
use rstest::rstest;
use sampledb_config::Config;
use sampledb_provision::{
    ArchiveReader, DeferredRemovals, EmbeddedResources, ProvisionError, Provisioner,
    ResourceLocator, SearchPath, ShutdownError, TeardownWarning, Unlinker,
};
use tempfile::{TempDir, tempdir};
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

const ARCHIVE: &str = "db/BirtSample.jar";
const FALLBACK: &str = "jdbc:derby:classpath:BirtSample";

fn sample_archive(method: CompressionMethod) -> Vec<u8> {
    let options = SimpleFileOptions::default().compression_method(method);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.add_directory("BirtSample/", options).unwrap();
    writer.start_file("a.txt", options).unwrap();
    writer.write_all(b"first file").unwrap();
    writer.start_file("sub/b.txt", options).unwrap();
    writer.write_all(b"second file, one level down").unwrap();
    writer
        .start_file("BirtSample/seg0/c10.dat", options)
        .unwrap();
    writer.write_all(&[0u8, 1, 2, 3, 255]).unwrap();
    writer.finish().unwrap().into_inner()
}

fn embedded(method: CompressionMethod) -> EmbeddedResources {
    EmbeddedResources::new().with_resource(ARCHIVE, sample_archive(method))
}

/// A provisioner that extracts below `temp` and defers into a private list.
fn provisioner(temp: &TempDir) -> Provisioner {
    Provisioner::new(ARCHIVE)
        .with_temp_dir(temp.path())
        .with_locator(embedded(CompressionMethod::Deflated))
        .with_deferred_removals(Arc::new(DeferredRemovals::new()))
}

fn live_dirs(temp: &Path) -> usize {
    fs_err::read_dir(temp).unwrap().count()
}

/// Counts how often the archive was opened.
struct CountingLocator {
    inner: EmbeddedResources,
    opened: Arc<AtomicUsize>,
}

impl ResourceLocator for CountingLocator {
    fn open(&self, name: &str) -> std::io::Result<Option<Box<dyn ArchiveReader>>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.inner.open(name)
    }
}

/// Refuses to delete files with a particular name.
struct Locked(&'static str);

impl Unlinker for Locked {
    fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        if path.file_name().is_some_and(|name| name == self.0) {
            return Err(std::io::Error::new(
                ErrorKind::PermissionDenied,
                "file is held open",
            ));
        }
        fs_err::remove_file(path)
    }
}

/// Records every file it removes.
struct Recording(Arc<Mutex<Vec<PathBuf>>>);

impl Unlinker for Recording {
    fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        self.0.lock().push(path.to_path_buf());
        fs_err::remove_file(path)
    }
}

/// Refuses to delete any directory.
struct KeepDirectories;

impl Unlinker for KeepDirectories {
    fn remove_dir(&self, _path: &Path) -> std::io::Result<()> {
        Err(std::io::Error::new(
            ErrorKind::PermissionDenied,
            "directory is held open",
        ))
    }
}

#[rstest]
#[case::stored(CompressionMethod::Stored)]
#[case::deflated(CompressionMethod::Deflated)]
fn test_acquire_extracts_archive(#[case] method: CompressionMethod) {
    let temp = tempdir().unwrap();
    let provisioner = Provisioner::new(ARCHIVE)
        .with_temp_dir(temp.path())
        .with_locator(embedded(method));

    let descriptor = provisioner.acquire().unwrap();
    let workdir = provisioner.working_dir().unwrap();

    assert_eq!(workdir.parent(), Some(temp.path()));
    assert_eq!(
        descriptor,
        format!("jdbc:derby:{}/BirtSample", workdir.display())
    );
    assert_eq!(fs_err::read(workdir.join("a.txt")).unwrap(), b"first file");
    assert_eq!(
        fs_err::read(workdir.join("sub").join("b.txt")).unwrap(),
        b"second file, one level down"
    );
    assert_eq!(
        fs_err::read(workdir.join("BirtSample/seg0/c10.dat")).unwrap(),
        [0u8, 1, 2, 3, 255]
    );

    let mut top: Vec<String> = fs_err::read_dir(&workdir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    top.sort();
    assert_eq!(top, ["BirtSample", "a.txt", "sub"]);

    let report = provisioner.release().unwrap();
    assert!(report.is_clean());
    assert!(!workdir.exists());
}

#[test]
fn test_concurrent_acquire_extracts_once() {
    let temp = tempdir().unwrap();
    let opened = Arc::new(AtomicUsize::new(0));
    let provisioner = Arc::new(
        Provisioner::new(ARCHIVE)
            .with_temp_dir(temp.path())
            .with_locator(CountingLocator {
                inner: embedded(CompressionMethod::Deflated),
                opened: opened.clone(),
            }),
    );

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let provisioner = provisioner.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                provisioner.acquire().unwrap()
            })
        })
        .collect();
    let descriptors: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(provisioner.count(), 2);
    assert_eq!(descriptors[0], descriptors[1]);
    assert_eq!(live_dirs(temp.path()), 1);

    assert!(provisioner.release().is_none());
    assert!(provisioner.release().is_some());
    assert_eq!(live_dirs(temp.path()), 0);
}

#[test]
fn test_full_release_starts_new_generation() {
    let temp = tempdir().unwrap();
    let provisioner = provisioner(&temp);

    let first = provisioner.acquire().unwrap();
    assert_eq!(provisioner.acquire().unwrap(), first);
    let first_dir = provisioner.working_dir().unwrap();
    let first_generation = provisioner.generation().unwrap();

    assert!(provisioner.release().is_none());
    assert!(first_dir.is_dir());
    let report = provisioner.release().unwrap();
    assert_eq!(report.generation, first_generation);
    assert_eq!(report.working_dir, first_dir);
    assert!(!report.deferred);
    assert!(!first_dir.exists());
    assert_eq!(provisioner.generation(), None);
    assert_eq!(provisioner.resolve_descriptor(), FALLBACK);

    let second = provisioner.acquire().unwrap();
    let second_dir = provisioner.working_dir().unwrap();
    assert_ne!(second, first);
    assert_ne!(second_dir, first_dir);
    assert!(provisioner.generation().unwrap() > first_generation);
    provisioner.release();
}

#[test]
fn test_missing_archive() {
    let temp = tempdir().unwrap();
    let empty_root = tempdir().unwrap();
    let provisioner = Provisioner::new(ARCHIVE)
        .with_temp_dir(temp.path())
        .with_locator(EmbeddedResources::new())
        .with_locator(SearchPath::new([empty_root.path()]));

    let err = provisioner.acquire().unwrap_err();
    assert!(matches!(err, ProvisionError::ArchiveNotFound(ref name) if name == ARCHIVE));
    insta::assert_snapshot!(
        err.to_string(),
        @"the bundled archive 'db/BirtSample.jar' could not be found"
    );
    assert_eq!(provisioner.count(), 0);
    assert_eq!(provisioner.working_dir(), None);
    assert_eq!(live_dirs(temp.path()), 0);
    assert_eq!(provisioner.resolve_descriptor(), FALLBACK);
}

#[test]
fn test_archive_found_on_search_path() {
    let temp = tempdir().unwrap();
    let root = tempdir().unwrap();
    fs_err::create_dir_all(root.path().join("db")).unwrap();
    fs_err::write(
        root.path().join("db").join("BirtSample.jar"),
        sample_archive(CompressionMethod::Deflated),
    )
    .unwrap();

    let provisioner = Provisioner::new(ARCHIVE)
        .with_temp_dir(temp.path())
        .with_locator(EmbeddedResources::new())
        .with_locator(SearchPath::new([root.path()]));

    provisioner.acquire().unwrap();
    let workdir = provisioner.working_dir().unwrap();
    assert!(workdir.join("a.txt").is_file());
    provisioner.release();
}

#[test]
fn test_from_config_searches_configured_path() {
    let temp = tempdir().unwrap();
    let root = tempdir().unwrap();
    fs_err::create_dir_all(root.path().join("db")).unwrap();
    fs_err::write(
        root.path().join("db").join("BirtSample.jar"),
        sample_archive(CompressionMethod::Stored),
    )
    .unwrap();

    let config = Config {
        temp_dir: Some(temp.path().to_path_buf()),
        dir_prefix: Some("Configured".to_string()),
        search_path: vec![root.path().to_path_buf()],
        defer_on_exit: Some(false),
        ..Config::default()
    };
    let provisioner = Provisioner::from_config(&config);
    assert_eq!(provisioner.archive(), ARCHIVE);

    provisioner.acquire().unwrap();
    let workdir = provisioner.working_dir().unwrap();
    assert!(workdir.join("a.txt").is_file());
    let name = workdir.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("Configured_"), "{name}");
    provisioner.release();

    // Without a search path nothing but embedded resources could be found.
    let bare = Provisioner::from_config(&Config {
        temp_dir: Some(temp.path().to_path_buf()),
        ..Config::default()
    });
    assert!(matches!(
        bare.acquire(),
        Err(ProvisionError::ArchiveNotFound(_))
    ));
}

#[test]
fn test_undeletable_file_is_deferred() {
    let temp = tempdir().unwrap();
    let deferred = Arc::new(DeferredRemovals::new());
    let provisioner = Provisioner::new(ARCHIVE)
        .with_temp_dir(temp.path())
        .with_locator(embedded(CompressionMethod::Deflated))
        .with_unlinker(Locked("c10.dat"))
        .with_deferred_removals(deferred.clone());

    provisioner.acquire().unwrap();
    let workdir = provisioner.working_dir().unwrap();
    let report = provisioner.release().unwrap();

    assert!(report.deferred);
    assert!(!report.is_clean());
    assert!(workdir.join("BirtSample/seg0/c10.dat").is_file());
    assert!(!workdir.join("a.txt").exists());
    assert!(!workdir.join("sub").exists());
    assert!(matches!(
        report.warnings.last(),
        Some(TeardownWarning::Deferred(path)) if *path == workdir
    ));
    assert!(
        report
            .warnings
            .iter()
            .any(|w| matches!(w, TeardownWarning::Remove(e) if e.kind() == ErrorKind::PermissionDenied))
    );
    assert_eq!(deferred.pending(), vec![workdir.clone()]);
    assert_eq!(provisioner.count(), 0);
    assert_eq!(provisioner.resolve_descriptor(), FALLBACK);

    // Once the file is no longer held the exit time removal succeeds.
    assert!(deferred.drain().is_empty());
    assert!(!workdir.exists());
}

#[test]
fn test_undeletable_file_without_deferral_is_leaked() {
    let temp = tempdir().unwrap();
    let provisioner = Provisioner::new(ARCHIVE)
        .with_temp_dir(temp.path())
        .with_locator(embedded(CompressionMethod::Deflated))
        .with_unlinker(Locked("b.txt"))
        .without_deferred_removals();

    provisioner.acquire().unwrap();
    let workdir = provisioner.working_dir().unwrap();
    let report = provisioner.release().unwrap();

    assert!(!report.deferred);
    assert!(matches!(
        report.warnings.last(),
        Some(TeardownWarning::Leaked(path)) if *path == workdir
    ));
    assert!(workdir.join("sub").join("b.txt").is_file());
}

#[test]
fn test_engine_shutdown_runs_before_removal() {
    let temp = tempdir().unwrap();
    let calls: Arc<Mutex<Vec<(String, PathBuf, bool)>>> = Arc::default();

    let provisioner = {
        let calls = calls.clone();
        provisioner(&temp).with_engine(
            move |descriptor: &str, working_dir: &Path| -> Result<(), ShutdownError> {
                calls.lock().push((
                    descriptor.to_string(),
                    working_dir.to_path_buf(),
                    working_dir.join("a.txt").is_file(),
                ));
                Ok(())
            },
        )
    };

    provisioner.acquire().unwrap();
    let workdir = provisioner.working_dir().unwrap();
    provisioner.acquire().unwrap();
    provisioner.release();
    assert!(calls.lock().is_empty());

    provisioner.release();
    assert_eq!(
        *calls.lock(),
        vec![("jdbc:derby:;shutdown=true".to_string(), workdir, true)]
    );
}

#[test]
fn test_provisioner_can_be_formatted_during_teardown() {
    let temp = tempdir().unwrap();
    let slot: Arc<OnceLock<Weak<Provisioner>>> = Arc::default();
    let formatted: Arc<Mutex<Option<String>>> = Arc::default();

    let provisioner = {
        let slot = slot.clone();
        let formatted = formatted.clone();
        Arc::new(provisioner(&temp).with_engine(
            move |_: &str, _: &Path| -> Result<(), ShutdownError> {
                if let Some(provisioner) = slot.get().and_then(Weak::upgrade) {
                    *formatted.lock() = Some(format!("{provisioner:?}"));
                }
                Ok(())
            },
        ))
    };
    slot.set(Arc::downgrade(&provisioner)).unwrap();

    provisioner.acquire().unwrap();
    provisioner.release();

    let formatted = formatted.lock().clone().unwrap();
    assert!(formatted.contains("state: <locked>"), "{formatted}");
    assert!(format!("{provisioner:?}").contains("count: 0"));
}

#[test]
fn test_failing_engine_shutdown_is_a_warning() {
    let temp = tempdir().unwrap();
    let provisioner = provisioner(&temp).with_engine(|_: &str, _: &Path| -> Result<(), ShutdownError> {
        Err("database is still in use".into())
    });

    provisioner.acquire().unwrap();
    let workdir = provisioner.working_dir().unwrap();
    let report = provisioner.release().unwrap();

    assert_eq!(report.warnings.len(), 1);
    insta::assert_snapshot!(
        report.warnings[0].to_string(),
        @"failed to shut down the database engine: database is still in use"
    );
    assert!(!report.deferred);
    assert!(!workdir.exists());
}

#[test]
fn test_invalid_archive_leaves_nothing_behind() {
    let temp = tempdir().unwrap();
    let provisioner = Provisioner::new(ARCHIVE)
        .with_temp_dir(temp.path())
        .with_locator(EmbeddedResources::new().with_resource(ARCHIVE, &b"not a zip archive"[..]));

    let err = provisioner.acquire().unwrap_err();
    assert!(matches!(err, ProvisionError::Extract { .. }));
    assert_eq!(provisioner.count(), 0);
    assert_eq!(live_dirs(temp.path()), 0);

    // A failed attempt does not poison the provisioner.
    assert!(provisioner.acquire().is_err());
    assert_eq!(provisioner.count(), 0);
}

#[test]
fn test_failure_mid_extraction_removes_written_files() {
    let temp = tempdir().unwrap();

    // Damage the payload of the second entry so its checksum no longer
    // matches, the first entry is already on disk when that is noticed.
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file("a.txt", options).unwrap();
    writer.write_all(b"first file").unwrap();
    writer.start_file("sub/b.txt", options).unwrap();
    writer.write_all(b"payload that gets corrupted").unwrap();
    let mut archive = writer.finish().unwrap().into_inner();
    let needle = b"payload that gets corrupted";
    let offset = archive
        .windows(needle.len())
        .position(|window| window == needle)
        .unwrap();
    archive[offset] ^= 0xff;

    let removed: Arc<Mutex<Vec<PathBuf>>> = Arc::default();
    let provisioner = Provisioner::new(ARCHIVE)
        .with_temp_dir(temp.path())
        .with_locator(EmbeddedResources::new().with_resource(ARCHIVE, archive))
        .with_unlinker(Recording(removed.clone()))
        .with_deferred_removals(Arc::new(DeferredRemovals::new()));

    let err = provisioner.acquire().unwrap_err();
    assert!(matches!(err, ProvisionError::Extract { .. }));
    assert_eq!(provisioner.count(), 0);
    assert_eq!(provisioner.working_dir(), None);
    assert_eq!(live_dirs(temp.path()), 0);

    let removed = removed.lock();
    assert!(
        removed.iter().any(|path| path.ends_with("a.txt")),
        "the first entry was never written: {removed:?}"
    );
}

#[test]
fn test_failed_cleanup_after_failed_extraction_is_deferred() {
    let temp = tempdir().unwrap();
    let deferred = Arc::new(DeferredRemovals::new());
    let provisioner = Provisioner::new(ARCHIVE)
        .with_temp_dir(temp.path())
        .with_locator(EmbeddedResources::new().with_resource(ARCHIVE, &b"not a zip archive"[..]))
        .with_unlinker(KeepDirectories)
        .with_deferred_removals(deferred.clone());

    let err = provisioner.acquire().unwrap_err();
    assert!(matches!(err, ProvisionError::Extract { .. }));
    assert_eq!(provisioner.count(), 0);

    let pending = deferred.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].parent(), Some(temp.path()));
    assert!(pending[0].is_dir());

    assert!(deferred.drain().is_empty());
    assert_eq!(live_dirs(temp.path()), 0);
}

#[test]
fn test_descriptor_falls_back_between_generations() {
    let temp = tempdir().unwrap();
    let provisioner = provisioner(&temp);

    assert_eq!(provisioner.resolve_descriptor(), FALLBACK);
    for _ in 0..3 {
        let descriptor = provisioner.acquire().unwrap();
        let workdir = provisioner.working_dir().unwrap();
        assert_eq!(provisioner.resolve_descriptor(), descriptor);
        assert!(descriptor.contains(&*workdir.to_string_lossy()));
        provisioner.release();
        assert_eq!(provisioner.resolve_descriptor(), FALLBACK);
    }
    assert_eq!(live_dirs(temp.path()), 0);
}

#[rstest]
#[case::nested(&[true, true, false, true, false, false])]
#[case::alternating(&[true, false, true, false, true, false])]
#[case::ramp(&[true, true, true, false, false, false, true, false])]
fn test_balanced_interleavings(#[case] steps: &[bool]) {
    let temp = tempdir().unwrap();
    let provisioner = provisioner(&temp);

    let mut outstanding = 0;
    for &acquire in steps {
        if acquire {
            provisioner.acquire().unwrap();
            outstanding += 1;
        } else {
            provisioner.release();
            outstanding -= 1;
        }
        assert_eq!(provisioner.count(), outstanding);
        let expected = usize::from(outstanding > 0);
        assert_eq!(live_dirs(temp.path()), expected);
    }
}

#[test]
fn test_many_threads() {
    let temp = tempdir().unwrap();
    let provisioner = Arc::new(provisioner(&temp));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let provisioner = provisioner.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    let lease = provisioner.lease().unwrap();
                    let workdir = lease.working_dir().unwrap();
                    assert!(lease.descriptor().contains(&*workdir.to_string_lossy()));
                    assert!(workdir.join("a.txt").is_file());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(provisioner.count(), 0);
    assert_eq!(provisioner.generation(), None);
    assert_eq!(live_dirs(temp.path()), 0);
}

#[test]
fn test_lease_releases_on_drop() {
    let temp = tempdir().unwrap();
    let provisioner = Arc::new(provisioner(&temp));

    let lease = provisioner.lease().unwrap();
    let workdir = lease.working_dir().unwrap();
    let other = provisioner.lease().unwrap();
    assert_eq!(provisioner.count(), 2);

    drop(lease);
    assert!(workdir.is_dir());
    drop(other);
    assert_eq!(provisioner.count(), 0);
    assert!(!workdir.exists());
}

#[test]
fn test_independent_provisioners() {
    let temp = tempdir().unwrap();
    let first = provisioner(&temp);
    let second = provisioner(&temp);

    first.acquire().unwrap();
    second.acquire().unwrap();
    assert_ne!(first.working_dir(), second.working_dir());
    assert_eq!(live_dirs(temp.path()), 2);

    first.release();
    assert_eq!(live_dirs(temp.path()), 1);
    assert!(second.working_dir().unwrap().is_dir());
    second.release();
}

#[test]
#[should_panic(expected = "release called without a matching acquire")]
fn test_release_without_acquire_panics() {
    let temp = tempdir().unwrap();
    provisioner(&temp).release();
}
