use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::link::LinkStream;

/// Hosted endpoint of the main-board link.
///
/// The daughterboard side binds a socket path and waits for the main board
/// (or a simulator) to connect. Only one peer is expected at a time.
pub struct UnixLink {
    listener: UnixListener,
    path: PathBuf,
    /// Device and inode of the socket we created, so drop never removes a
    /// path someone else replaced.
    identity: (u64, u64),
}

impl UnixLink {
    pub const SOCKET_MODE: u32 = 0o600;
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind the link socket, replacing a stale socket left at `path`.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_err = |source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale link socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(Self::SOCKET_MODE))
            .map_err(bind_err)?;
        let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "link socket bound");

        Ok(Self {
            listener,
            path,
            identity: (metadata.dev(), metadata.ino()),
        })
    }

    /// Wait for the main board to connect.
    pub fn accept(&self) -> Result<LinkStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        info!(path = ?self.path, "main board connected");
        Ok(LinkStream::from_unix(stream))
    }

    /// Connect to a bound link, as the main board would.
    pub fn connect(path: impl AsRef<Path>) -> Result<LinkStream> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(?path, "connected to link socket");
        Ok(LinkStream::from_unix(stream))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixLink {
    fn drop(&mut self) {
        let Ok(metadata) = std::fs::symlink_metadata(&self.path) else {
            return;
        };
        if metadata.file_type().is_socket() && (metadata.dev(), metadata.ino()) == self.identity {
            debug!(path = ?self.path, "removing link socket");
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vanet-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn bind_accept_connect() {
        let dir = scratch_dir("link");
        let sock = dir.join("link.sock");

        let link = UnixLink::bind(&sock).unwrap();
        let mode = std::fs::metadata(&sock).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        let path = sock.clone();
        let board = std::thread::spawn(move || {
            let mut stream = UnixLink::connect(&path).unwrap();
            stream.write_all(&[0xF9, 0x07, 0x3F, 0x01]).unwrap();
        });

        let mut stream = link.accept().unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0xF9, 0x07, 0x3F, 0x01]);
        board.join().unwrap();

        drop(link);
        assert!(!sock.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rebinding_replaces_stale_socket() {
        let dir = scratch_dir("stale");
        let sock = dir.join("stale.sock");
        let first = UnixLink::bind(&sock).unwrap();
        std::mem::forget(first);
        let second = UnixLink::bind(&sock);
        assert!(second.is_ok());
        drop(second);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn refuses_to_clobber_regular_file() {
        let dir = scratch_dir("clobber");
        let sock = dir.join("config.json");
        std::fs::write(&sock, b"{}").unwrap();
        assert!(matches!(
            UnixLink::bind(&sock),
            Err(TransportError::Bind { .. })
        ));
        assert!(sock.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn path_too_long() {
        let long = format!("/tmp/{}.sock", "v".repeat(200));
        assert!(matches!(
            UnixLink::bind(&long),
            Err(TransportError::PathTooLong { .. })
        ));
    }
}
