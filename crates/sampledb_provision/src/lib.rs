//! Process private, reference counted working copies of the sample
//! database.
//!
//! The sample database ships as a read-only archive. A database engine that
//! wants to open it for writing needs an extracted copy on disk. The
//! [`Provisioner`] materializes that copy on the first [`Provisioner::acquire`],
//! shares it between all consumers and removes it again after the last
//! [`Provisioner::release`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sampledb_provision::{Provisioner, SearchPath};
//!
//! let provisioner = Arc::new(
//!     Provisioner::new("db/BirtSample.jar").with_locator(SearchPath::new(["/opt/birt"])),
//! );
//! let lease = provisioner.lease()?;
//! println!("connect to {}", lease.descriptor());
//! # Ok::<(), sampledb_provision::ProvisionError>(())
//! ```

mod deferred;
mod descriptor;
mod error;
mod locator;
mod provisioner;
mod remove;
mod shutdown;

pub use deferred::{DeferredRemovals, ExitGuard};
pub use descriptor::DescriptorFormat;
pub use error::{ProvisionError, TeardownWarning};
pub use locator::{ArchiveReader, EmbeddedResources, ResourceLocator, SearchPath};
pub use provisioner::{Generation, Lease, Provisioner, TeardownReport};
pub use remove::{FsUnlinker, Unlinker, remove_directory, remove_directory_with};
pub use shutdown::{EngineShutdown, NoEngine, ShutdownError};
