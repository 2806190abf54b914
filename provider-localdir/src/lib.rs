//! Local-directory file source.
//!
//! Implements [`FileSource`] over a directory on the local filesystem. This
//! is the transport shipped with the daemon; network transports (SFTP, FTP)
//! are external collaborators behind the same trait.

mod source;

pub use source::LocalDirSource;
