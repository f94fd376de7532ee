//! Private rendezvous socket for one parent/worker exchange.

use std::io;
use std::path::Path;
use std::path::PathBuf;
use tempfile::TempDir;
use tokio::net::{UnixListener, UnixStream};

const SOCKET_NAME: &str = "worker.sock";

/// A listening Unix socket inside its own temporary directory.
///
/// The directory is owner-only, so no other user can connect. Dropping the
/// channel removes the directory; [`WorkerChannel::close`] does the same but
/// reports failures.
#[derive(Debug)]
pub struct WorkerChannel {
    listener: UnixListener,
    address: PathBuf,
    dir: TempDir,
}

impl WorkerChannel {
    /// Create a fresh directory and start listening in it.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or socket cannot be created.
    pub fn bind() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("memomap-").tempdir()?;
        let address = dir.path().join(SOCKET_NAME);
        let listener = UnixListener::bind(&address)?;
        tracing::trace!(address = %address.display(), "Worker channel listening");
        Ok(Self {
            listener,
            address,
            dir,
        })
    }

    /// Socket path the worker connects to
    #[must_use]
    pub fn address(&self) -> &Path {
        &self.address
    }

    /// Wait for the worker to connect.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting fails.
    pub async fn accept(&self) -> io::Result<UnixStream> {
        let (stream, _) = self.listener.accept().await?;
        Ok(stream)
    }

    /// Stop listening and remove the socket directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be removed.
    pub fn close(self) -> io::Result<()> {
        drop(self.listener);
        self.dir.close()
    }
}
