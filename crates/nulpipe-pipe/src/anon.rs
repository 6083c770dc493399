use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::process::Stdio;

use tracing::debug;

use crate::error::{PipeError, Result};

/// Create an anonymous pipe.
///
/// Both ends are close-on-exec; pass an end to a child explicitly through
/// [`Stdio`] (`Stdio::from(reader)`) to share it.
pub fn pipe() -> Result<(PipeReader, PipeWriter)> {
    let (read_end, write_end) = create_pipe()?;

    debug!(
        read_fd = read_end.as_raw_fd(),
        write_fd = write_end.as_raw_fd(),
        "created anonymous pipe"
    );

    Ok((
        PipeReader {
            file: File::from(read_end),
        },
        PipeWriter {
            file: File::from(write_end),
        },
    ))
}

/// Both ends are created close-on-exec atomically, so a concurrent fork
/// never inherits them.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn create_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];

    // SAFETY: `fds` is a writable array of two descriptors, as pipe2(2) requires.
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if rc != 0 {
        return Err(PipeError::Create(std::io::Error::last_os_error()));
    }

    // SAFETY: pipe2(2) succeeded, so both descriptors are open and owned by
    // nobody else in this process.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Fallback for platforms without pipe2(2): the flag is set right after
/// creation.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn create_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];

    // SAFETY: `fds` is a writable array of two descriptors, as pipe(2) requires.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(PipeError::Create(std::io::Error::last_os_error()));
    }

    // SAFETY: pipe(2) succeeded, so both descriptors are open and owned by
    // nobody else in this process.
    let (read_end, write_end) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    set_cloexec(read_end.as_fd())?;
    set_cloexec(write_end.as_fd())?;
    Ok((read_end, write_end))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_cloexec(fd: BorrowedFd<'_>) -> Result<()> {
    let raw = fd.as_raw_fd();

    // SAFETY: `raw` is an open descriptor borrowed for the duration of the call.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
    if flags < 0 {
        return Err(PipeError::Configure {
            fd: raw,
            source: std::io::Error::last_os_error(),
        });
    }

    // SAFETY: as above; F_SETFD only changes descriptor flags.
    let rc = unsafe { libc::fcntl(raw, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
    if rc < 0 {
        return Err(PipeError::Configure {
            fd: raw,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Read end of an anonymous pipe.
pub struct PipeReader {
    file: File,
}

/// Write end of an anonymous pipe.
pub struct PipeWriter {
    file: File,
}

impl PipeReader {
    /// Duplicate this end (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            file: self.file.try_clone()?,
        })
    }

    /// Convert into a tokio pipe receiver registered with the current runtime.
    ///
    /// Must be called from within a tokio runtime with I/O enabled.
    #[cfg(feature = "async")]
    pub fn into_async(self) -> Result<tokio::net::unix::pipe::Receiver> {
        tokio::net::unix::pipe::Receiver::from_file(self.file).map_err(PipeError::Io)
    }
}

impl PipeWriter {
    /// Duplicate this end (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            file: self.file.try_clone()?,
        })
    }

    /// Convert into a tokio pipe sender registered with the current runtime.
    ///
    /// Must be called from within a tokio runtime with I/O enabled.
    #[cfg(feature = "async")]
    pub fn into_async(self) -> Result<tokio::net::unix::pipe::Sender> {
        tokio::net::unix::pipe::Sender::from_file(self.file).map_err(PipeError::Io)
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl AsFd for PipeReader {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsFd for PipeWriter {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for PipeReader {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsRawFd for PipeWriter {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl From<PipeReader> for OwnedFd {
    fn from(reader: PipeReader) -> Self {
        reader.file.into()
    }
}

impl From<PipeWriter> for OwnedFd {
    fn from(writer: PipeWriter) -> Self {
        writer.file.into()
    }
}

impl From<PipeReader> for Stdio {
    fn from(reader: PipeReader) -> Self {
        Stdio::from(reader.file)
    }
}

impl From<PipeWriter> for Stdio {
    fn from(writer: PipeWriter) -> Self {
        Stdio::from(writer.file)
    }
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeReader")
            .field("fd", &self.file.as_raw_fd())
            .finish()
    }
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeWriter")
            .field("fd", &self.file.as_raw_fd())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_cloexec(fd: RawFd) -> bool {
        // SAFETY: `fd` is an open descriptor owned by the calling test.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        flags >= 0 && flags & libc::FD_CLOEXEC != 0
    }

    #[test]
    fn write_then_read() {
        let (mut reader, mut writer) = pipe().unwrap();

        writer.write_all(b"hello\0").unwrap();
        drop(writer);

        let mut received = Vec::new();
        reader.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"hello\0");
    }

    #[test]
    fn both_ends_are_close_on_exec() {
        let (reader, writer) = pipe().unwrap();
        assert!(has_cloexec(reader.as_raw_fd()));
        assert!(has_cloexec(writer.as_raw_fd()));
    }

    #[test]
    fn ends_stay_blocking() {
        let (reader, writer) = pipe().unwrap();
        for fd in [reader.as_raw_fd(), writer.as_raw_fd()] {
            // SAFETY: `fd` is an open descriptor owned by this test.
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
            assert!(flags >= 0);
            assert_eq!(flags & libc::O_NONBLOCK, 0);
        }
    }

    #[test]
    fn close_on_exec_survives_many_creations() {
        let ends: Vec<_> = (0..32).map(|_| pipe().unwrap()).collect();
        for (reader, writer) in &ends {
            assert!(has_cloexec(reader.as_raw_fd()));
            assert!(has_cloexec(writer.as_raw_fd()));
        }
    }

    #[test]
    fn dropping_writer_signals_eof() {
        let (mut reader, writer) = pipe().unwrap();
        drop(writer);

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn cloned_writer_keeps_pipe_open() {
        let (mut reader, writer) = pipe().unwrap();
        let mut clone = writer.try_clone().unwrap();
        drop(writer);

        clone.write_all(b"x").unwrap();
        let mut buf = [0u8; 1];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"x");
    }

    #[test]
    fn hands_ends_to_a_child_process() {
        let (child_stdin, mut to_child) = pipe().unwrap();
        let (mut from_child, child_stdout) = pipe().unwrap();

        let mut child = std::process::Command::new("cat")
            .stdin(Stdio::from(child_stdin))
            .stdout(Stdio::from(child_stdout))
            .spawn()
            .expect("cat should spawn");

        to_child.write_all(b"through cat\0").unwrap();
        drop(to_child);

        let mut received = Vec::new();
        from_child.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"through cat\0");

        child.wait().unwrap();
    }

    #[test]
    fn debug_shows_descriptor() {
        let (reader, writer) = pipe().unwrap();
        assert!(format!("{reader:?}").starts_with("PipeReader"));
        assert!(format!("{writer:?}").starts_with("PipeWriter"));
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn async_ends_round_trip() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (reader, writer) = pipe().unwrap();
        let mut reader = reader.into_async().unwrap();
        let mut writer = writer.into_async().unwrap();

        writer.write_all(b"async\0").await.unwrap();
        drop(writer);

        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"async\0");
    }
}
