//! Named local endpoints: bind as the primary, or connect as a secondary.
//!
//! On Unix the endpoint is a domain socket file; on Windows it is a named
//! pipe. The [`Transport`] trait keeps the coordinator independent of both so
//! it can be driven by a scripted transport in tests.

use crate::config::IpcConfig;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Well-known address of one user session's instance group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceHandle {
    endpoint: PathBuf,
}

impl InstanceHandle {
    /// Use an explicit endpoint path (socket file or pipe name).
    pub fn from_path(endpoint: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// Derive the endpoint for a user data directory and product version.
    ///
    /// # Platform Behavior
    /// - **Unix**: `<dir>/<version>-main.sock`, or a hashed name in the user
    ///   runtime directory when that path would overflow `sun_path`
    /// - **Windows**: `\\.\pipe\<hash>-<version>-main-sock`
    pub fn for_user_data_dir(user_data_dir: &Path, version: &str) -> Self {
        let hash = data_dir_hash(user_data_dir);

        #[cfg(windows)]
        {
            Self::from_path(format!(
                "{}{}-{}-main-sock",
                IpcConfig::PIPE_PREFIX,
                hash,
                version
            ))
        }

        #[cfg(not(windows))]
        {
            let preferred = user_data_dir.join(format!("{}-main.sock", version));
            if preferred.as_os_str().len() <= IpcConfig::MAX_SOCKET_PATH_LEN {
                return Self::from_path(preferred);
            }

            let runtime_dir = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
            let fallback = runtime_dir.join(format!("monarch-{}-{}-main.sock", hash, version));
            debug!(
                "Socket path {} is too long, using {}",
                preferred.display(),
                fallback.display()
            );
            Self::from_path(fallback)
        }
    }

    pub fn as_path(&self) -> &Path {
        &self.endpoint
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint.display())
    }
}

fn data_dir_hash(user_data_dir: &Path) -> String {
    let digest = Sha256::digest(user_data_dir.to_string_lossy().as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(IpcConfig::ENDPOINT_HASH_LEN);
    hash
}

/// A reliable, ordered, bidirectional byte stream for one connection.
pub trait IpcStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> IpcStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// A bound endpoint accepting launch connections.
#[async_trait]
pub trait EndpointListener: Send + 'static {
    type Stream: IpcStream;

    /// Wait for the next incoming connection.
    async fn accept(&mut self) -> io::Result<Self::Stream>;

    /// The endpoint this listener owns.
    fn handle(&self) -> &InstanceHandle;
}

/// Filesystem identity of an endpoint artifact.
///
/// Two observations of the same path compare equal only if no one replaced
/// the artifact in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointId {
    pub dev: u64,
    pub ino: u64,
}

/// Bind/connect operations on an [`InstanceHandle`], plus compare-and-delete
/// of a stale endpoint artifact.
///
/// Errors are raw `io::Error`s so the coordinator can branch on their kind:
/// `AddrInUse` from `bind`, `ConnectionRefused` and `PermissionDenied` from
/// `connect`.
#[async_trait]
pub trait Transport: Send + Sync {
    type Listener: EndpointListener;
    type Stream: IpcStream;

    /// Bind a listener at `handle`.
    async fn bind(&self, handle: &InstanceHandle) -> io::Result<Self::Listener>;

    /// Connect to the listener at `handle`.
    async fn connect(&self, handle: &InstanceHandle) -> io::Result<Self::Stream>;

    /// Identity of the artifact currently at `handle`. `None` when there is
    /// none, or when the transport leaves nothing behind to delete.
    async fn identify(&self, handle: &InstanceHandle) -> io::Result<Option<EndpointId>>;

    /// Delete the artifact at `handle` only if it is still `expected`.
    ///
    /// Returns `false` when the artifact is gone or was replaced, in which
    /// case nothing is touched.
    async fn remove_stale(&self, handle: &InstanceHandle, expected: EndpointId)
        -> io::Result<bool>;
}

/// The host's native local transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

#[cfg(unix)]
mod unix {
    use super::*;
    use fs2::FileExt;
    use std::fs::{self, File, OpenOptions};
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::net as std_net;
    use tokio::net::{UnixListener, UnixStream};

    pub(super) fn endpoint_id(path: &Path) -> io::Result<Option<EndpointId>> {
        match fs::symlink_metadata(path) {
            Ok(meta) => Ok(Some(EndpointId {
                dev: meta.dev(),
                ino: meta.ino(),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `<socket>.lock`, next to the socket it guards.
    pub(super) fn lock_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Exclusive advisory lock held while a socket file is created or
    /// unlinked. Released on drop.
    struct EndpointLock {
        file: File,
    }

    impl EndpointLock {
        fn acquire(socket: &Path) -> io::Result<Self> {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(lock_path(socket))?;
            FileExt::lock_exclusive(&file)?;
            Ok(Self { file })
        }
    }

    impl Drop for EndpointLock {
        fn drop(&mut self) {
            if let Err(e) = FileExt::unlock(&self.file) {
                debug!("Failed to release endpoint lock: {}", e);
            }
        }
    }

    /// Bind and listen in one step under the lock, so a locked observer
    /// never sees a socket file that is not yet accepting.
    pub(super) fn bind_locked(
        path: &Path,
    ) -> io::Result<(std_net::UnixListener, Option<EndpointId>)> {
        let _lock = EndpointLock::acquire(path)?;
        let listener = std_net::UnixListener::bind(path)?;
        let id = endpoint_id(path)?;
        Ok((listener, id))
    }

    /// Unlink `path` if it is still the socket identified by `expected` and
    /// nothing accepts on it.
    ///
    /// Creation and unlinking both hold the lock, so neither the file nor its
    /// listener can change between these checks and the unlink.
    pub(super) fn remove_if_stale(path: &Path, expected: EndpointId) -> io::Result<bool> {
        let _lock = EndpointLock::acquire(path)?;

        match endpoint_id(path)? {
            Some(current) if current == expected => {}
            Some(current) => {
                debug!(
                    "{} was replaced ({:?} -> {:?}), leaving it",
                    path.display(),
                    expected,
                    current
                );
                return Ok(false);
            }
            None => return Ok(false),
        }

        match std_net::UnixStream::connect(path) {
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {}
            Ok(_) => {
                debug!("{} is accepting again, leaving it", path.display());
                return Ok(false);
            }
            Err(e) => {
                debug!("Recheck of {} failed: {}", path.display(), e);
                return Ok(false);
            }
        }

        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Unlink `path` if it is still the socket identified by `own`.
    fn remove_own(path: &Path, own: EndpointId) -> io::Result<bool> {
        let _lock = EndpointLock::acquire(path)?;
        if endpoint_id(path)? != Some(own) {
            return Ok(false);
        }
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Unix domain socket listener. Unlinks its own socket file when dropped,
    /// never one that has since replaced it.
    #[derive(Debug)]
    pub struct LocalListener {
        inner: UnixListener,
        handle: InstanceHandle,
        id: Option<EndpointId>,
    }

    #[async_trait]
    impl EndpointListener for LocalListener {
        type Stream = UnixStream;

        async fn accept(&mut self) -> io::Result<UnixStream> {
            let (stream, _addr) = self.inner.accept().await?;
            Ok(stream)
        }

        fn handle(&self) -> &InstanceHandle {
            &self.handle
        }
    }

    impl Drop for LocalListener {
        fn drop(&mut self) {
            let Some(id) = self.id else {
                return;
            };
            // the bound socket pins its inode, so `id` cannot have been reused
            match remove_own(self.handle.as_path(), id) {
                Ok(true) => debug!("Removed instance socket {}", self.handle),
                Ok(false) => debug!("Instance socket {} was replaced, leaving it", self.handle),
                Err(e) => debug!("Failed to remove instance socket {}: {}", self.handle, e),
            }
        }
    }

    #[async_trait]
    impl Transport for LocalTransport {
        type Listener = LocalListener;
        type Stream = UnixStream;

        async fn bind(&self, handle: &InstanceHandle) -> io::Result<LocalListener> {
            let path = handle.as_path().to_path_buf();
            let (listener, id) = tokio::task::spawn_blocking(move || bind_locked(&path))
                .await
                .map_err(io::Error::other)??;
            listener.set_nonblocking(true)?;
            Ok(LocalListener {
                inner: UnixListener::from_std(listener)?,
                handle: handle.clone(),
                id,
            })
        }

        async fn connect(&self, handle: &InstanceHandle) -> io::Result<UnixStream> {
            UnixStream::connect(handle.as_path()).await
        }

        async fn identify(&self, handle: &InstanceHandle) -> io::Result<Option<EndpointId>> {
            let path = handle.as_path().to_path_buf();
            tokio::task::spawn_blocking(move || endpoint_id(&path))
                .await
                .map_err(io::Error::other)?
        }

        async fn remove_stale(
            &self,
            handle: &InstanceHandle,
            expected: EndpointId,
        ) -> io::Result<bool> {
            let path = handle.as_path().to_path_buf();
            tokio::task::spawn_blocking(move || remove_if_stale(&path, expected))
                .await
                .map_err(io::Error::other)?
        }
    }
}

#[cfg(windows)]
mod windows {
    use super::*;
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    /// Named pipe listener. Keeps one unconnected pipe instance pending so
    /// the name stays owned between connections.
    #[derive(Debug)]
    pub struct LocalListener {
        pending: NamedPipeServer,
        handle: InstanceHandle,
    }

    #[async_trait]
    impl EndpointListener for LocalListener {
        type Stream = NamedPipeServer;

        async fn accept(&mut self) -> io::Result<NamedPipeServer> {
            self.pending.connect().await?;
            let next = ServerOptions::new().create(self.handle.as_path())?;
            Ok(std::mem::replace(&mut self.pending, next))
        }

        fn handle(&self) -> &InstanceHandle {
            &self.handle
        }
    }

    #[async_trait]
    impl Transport for LocalTransport {
        type Listener = LocalListener;
        type Stream = NamedPipeClient;

        async fn bind(&self, handle: &InstanceHandle) -> io::Result<LocalListener> {
            // Creating a first instance of an existing pipe name fails with
            // access denied; report it the way a socket bind would.
            let pending = ServerOptions::new()
                .first_pipe_instance(true)
                .create(handle.as_path())
                .map_err(|e| {
                    if e.kind() == io::ErrorKind::PermissionDenied {
                        io::Error::new(io::ErrorKind::AddrInUse, e)
                    } else {
                        e
                    }
                })?;
            Ok(LocalListener {
                pending,
                handle: handle.clone(),
            })
        }

        async fn connect(&self, handle: &InstanceHandle) -> io::Result<NamedPipeClient> {
            ClientOptions::new().open(handle.as_path())
        }

        // Pipes disappear with their last handle.
        async fn identify(&self, _handle: &InstanceHandle) -> io::Result<Option<EndpointId>> {
            Ok(None)
        }

        async fn remove_stale(
            &self,
            _handle: &InstanceHandle,
            _expected: EndpointId,
        ) -> io::Result<bool> {
            Ok(false)
        }
    }
}

#[cfg(unix)]
pub use unix::LocalListener;
#[cfg(windows)]
pub use windows::LocalListener;
