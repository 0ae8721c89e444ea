//! Scoped byte-stream transports (component B).
//!
//! Grounded on `estuary-flow`'s `parser::input::compression` (magic-byte
//! detection, decoder construction deferred to first read) and
//! `parser::input::encoding` (a transport is "just" something that produces
//! bytes, with format-specific concerns layered on top). Unlike the Python
//! original's context-manager scoping, release is RAII: every transport's
//! `Drop` impl releases its underlying descriptor, and compressed
//! writers additionally expose a fallible `close()` for callers that want to
//! observe a flush/finish error rather than only log it.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("transport does not support resetting to the start of the stream")]
    UnsupportedReset,
    #[error("unsupported compression format for a streaming transport: {0:?}")]
    UnsupportedCompression(dk_uri::Compression),
    #[error("already closed")]
    AlreadyClosed,
}

/// The subset of `dk_uri::Compression` usable as a streaming transport
/// decorator (`spec.md` §2 row B). `Zip` and `Snappy` are container/codec
/// level concerns, not stream filters, and are rejected here.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Compression {
    Bz2,
    Gz,
    Xz,
    Lz4,
    Zstd,
}

impl TryFrom<dk_uri::Compression> for Compression {
    type Error = TransportError;

    fn try_from(value: dk_uri::Compression) -> Result<Self, Self::Error> {
        match value {
            dk_uri::Compression::Bz2 => Ok(Self::Bz2),
            dk_uri::Compression::Gz => Ok(Self::Gz),
            dk_uri::Compression::Xz => Ok(Self::Xz),
            dk_uri::Compression::Lz4 => Ok(Self::Lz4),
            dk_uri::Compression::Zstd => Ok(Self::Zstd),
            other => Err(TransportError::UnsupportedCompression(other)),
        }
    }
}

/// Detects a compression format from a "magic number" prefix of the content.
pub fn detect_compression(prefix: &[u8]) -> Option<Compression> {
    if prefix.starts_with(&[0x1f, 0x8b]) {
        Some(Compression::Gz)
    } else if prefix.starts_with(b"BZh") {
        Some(Compression::Bz2)
    } else if prefix.starts_with(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]) {
        Some(Compression::Xz)
    } else if prefix.starts_with(&[0x28, 0xB5, 0x2F, 0xFD]) {
        Some(Compression::Zstd)
    } else if prefix.starts_with(&[0x04, 0x22, 0x4D, 0x18]) {
        Some(Compression::Lz4)
    } else {
        None
    }
}

/// A scoped, possibly-resettable byte source.
pub trait TransportRead: Read + Send {
    /// Restart the sequence from offset 0. Non-seekable transports return
    /// `UnsupportedReset` (`spec.md` §4.3 Reset contract).
    fn reset(&mut self) -> Result<(), TransportError> {
        Err(TransportError::UnsupportedReset)
    }
}

struct FileSource(BufReader<File>);

impl Read for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl TransportRead for FileSource {
    fn reset(&mut self) -> Result<(), TransportError> {
        use std::io::Seek;
        self.0.seek(io::SeekFrom::Start(0))?;
        Ok(())
    }
}

struct StdinSource(io::Stdin);

impl Read for StdinSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.lock().read(buf)
    }
}

impl TransportRead for StdinSource {}

/// In-process approximation of a shared-memory segment, addressed by name
/// through a process-wide registry (`shm_registry`). There is no crate in
/// the teacher's dependency stack for OS-level shared memory, so a named,
/// `Arc<Mutex<Vec<u8>>>`-backed buffer stands in for it; this is adequate
/// for the single-process pipeline runtime (component H) this engine drives.
pub mod shm {
    use super::*;
    use std::collections::HashMap;
    use std::sync::OnceLock;

    fn registry() -> &'static Mutex<HashMap<String, Arc<Mutex<Vec<u8>>>>> {
        static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<Mutex<Vec<u8>>>>>> = OnceLock::new();
        REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
    }

    pub fn segment(name: &str) -> Arc<Mutex<Vec<u8>>> {
        registry()
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }
}

struct MemorySource {
    buf: Arc<Mutex<Vec<u8>>>,
    cursor: Cursor<Vec<u8>>,
}

impl MemorySource {
    fn new(buf: Arc<Mutex<Vec<u8>>>) -> Self {
        let snapshot = buf.lock().unwrap().clone();
        MemorySource {
            buf,
            cursor: Cursor::new(snapshot),
        }
    }
}

impl Read for MemorySource {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(out)
    }
}

impl TransportRead for MemorySource {
    fn reset(&mut self) -> Result<(), TransportError> {
        let snapshot = self.buf.lock().unwrap().clone();
        self.cursor = Cursor::new(snapshot);
        Ok(())
    }
}

/// A compression decorator over a base reader. The underlying decoder is
/// only constructed on the first `read` call, so a closed-but-unread
/// transport performs no decompression work (`spec.md` §4.2).
struct CompressedSource {
    pending: Option<Box<dyn Read + Send>>,
    decoder: Option<Box<dyn Read + Send>>,
    compression: Compression,
}

impl CompressedSource {
    fn new(inner: Box<dyn Read + Send>, compression: Compression) -> Self {
        CompressedSource {
            pending: Some(inner),
            decoder: None,
            compression,
        }
    }

    fn ensure_decoder(&mut self) -> io::Result<()> {
        if self.decoder.is_some() {
            return Ok(());
        }
        let raw = self.pending.take().expect("compressed source polled twice");
        let decoder: Box<dyn Read + Send> = match self.compression {
            Compression::Gz => Box::new(flate2::read::GzDecoder::new(raw)),
            Compression::Bz2 => Box::new(bzip2::read::BzDecoder::new(raw)),
            Compression::Xz => Box::new(xz2::read::XzDecoder::new(raw)),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(raw)?),
            Compression::Lz4 => Box::new(lz4_flex::frame::FrameDecoder::new(raw)),
        };
        self.decoder = Some(decoder);
        Ok(())
    }
}

impl Read for CompressedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_decoder()?;
        self.decoder.as_mut().unwrap().read(buf)
    }
}

impl TransportRead for CompressedSource {}

/// Open a scoped reader transport for `driver` over `database`, optionally
/// wrapped with a compression decorator.
///
/// `driver` is one of the normalized driver strings produced by
/// [`dk_uri::parse`] (`"file"`, `"stdio"` sentinel via `database == "stdio"`,
/// `"shm"`).
pub fn open_reader(
    driver: &str,
    database: &str,
    compression: Option<dk_uri::Compression>,
) -> Result<Box<dyn TransportRead>, TransportError> {
    let base: Box<dyn TransportRead> = match driver {
        "file" if database == "stdio" => Box::new(StdinSource(io::stdin())),
        "file" => Box::new(FileSource(BufReader::new(File::open(database)?))),
        "shm" => Box::new(MemorySource::new(shm::segment(database))),
        other => {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("no reader transport for driver '{other}'"),
            )))
        }
    };
    wrap_compression_reader(base, compression)
}

fn wrap_compression_reader(
    base: Box<dyn TransportRead>,
    compression: Option<dk_uri::Compression>,
) -> Result<Box<dyn TransportRead>, TransportError> {
    match compression {
        None | Some(dk_uri::Compression::Zip) => Ok(base),
        Some(c) => {
            let c: Compression = c.try_into()?;
            Ok(Box::new(CompressedSource::new(base, c)))
        }
    }
}

/// Peek the first `n` bytes of `reader` without consuming them, returning a
/// new reader that will replay the peeked bytes followed by the rest of the
/// stream. Used by format/compression auto-detection (`spec.md` §4.1, §4.3).
pub fn peek(
    mut reader: Box<dyn TransportRead>,
    n: usize,
) -> io::Result<(Vec<u8>, Box<dyn TransportRead>)> {
    let mut buf = vec![0u8; n];
    let mut filled = 0;
    while filled < n {
        let read = reader.read(&mut buf[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    buf.truncate(filled);
    let replayed = Cursor::new(buf.clone()).chain(reader);
    Ok((buf, Box::new(ChainedSource(replayed))))
}

struct ChainedSource<R>(std::io::Chain<Cursor<Vec<u8>>, R>);

impl<R: Read + Send> Read for ChainedSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read + Send> TransportRead for ChainedSource<R> {}

/// A scoped byte sink. `close` performs whatever flush/finish is required by
/// a wrapping compressor and is the preferred way to release the transport;
/// `Drop` is a best-effort fallback that logs rather than panics.
pub trait TransportWrite: Write + Send {
    fn close(&mut self) -> Result<(), TransportError> {
        self.flush()?;
        Ok(())
    }
}

struct FileSink(Option<BufWriter<File>>);

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.as_mut().expect("write after close").write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.0.as_mut().expect("write after close").flush()
    }
}

impl TransportWrite for FileSink {
    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut f) = self.0.take() {
            f.flush()?;
        }
        Ok(())
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if let Some(mut f) = self.0.take() {
            if let Err(e) = f.flush() {
                tracing::warn!(error = %e, "error flushing file sink on drop");
            }
        }
    }
}

struct StdoutSink(io::Stdout);

impl Write for StdoutSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().flush()
    }
}

impl TransportWrite for StdoutSink {}

struct MemorySink(Arc<Mutex<Vec<u8>>>);

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TransportWrite for MemorySink {}

enum Encoder {
    Gz(flate2::write::GzEncoder<Box<dyn Write + Send>>),
    Bz2(bzip2::write::BzEncoder<Box<dyn Write + Send>>),
    Xz(xz2::write::XzEncoder<Box<dyn Write + Send>>),
    Zstd(zstd::stream::write::Encoder<'static, Box<dyn Write + Send>>),
    Lz4(lz4_flex::frame::FrameEncoder<Box<dyn Write + Send>>),
}

impl Write for Encoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Gz(w) => w.write(buf),
            Encoder::Bz2(w) => w.write(buf),
            Encoder::Xz(w) => w.write(buf),
            Encoder::Zstd(w) => w.write(buf),
            Encoder::Lz4(w) => w.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Gz(w) => w.flush(),
            Encoder::Bz2(w) => w.flush(),
            Encoder::Xz(w) => w.flush(),
            Encoder::Zstd(w) => w.flush(),
            Encoder::Lz4(w) => w.flush(),
        }
    }
}

impl Encoder {
    fn finish(self) -> io::Result<()> {
        match self {
            Encoder::Gz(w) => w.finish().map(|_| ()),
            Encoder::Bz2(w) => w.finish().map(|_| ()),
            Encoder::Xz(w) => w.finish().map(|_| ()),
            Encoder::Zstd(w) => w.finish().map(|_| ()),
            Encoder::Lz4(w) => w.finish().map_err(io::Error::other),
        }
    }
}

/// A compression decorator over a base writer. The encoder is constructed
/// lazily, on the first `write` call.
struct CompressedSink {
    pending: Option<Box<dyn Write + Send>>,
    encoder: Option<Encoder>,
    compression: Compression,
    closed: bool,
}

impl CompressedSink {
    fn new(inner: Box<dyn Write + Send>, compression: Compression) -> Self {
        CompressedSink {
            pending: Some(inner),
            encoder: None,
            compression,
            closed: false,
        }
    }

    fn ensure_encoder(&mut self) -> io::Result<()> {
        if self.encoder.is_some() {
            return Ok(());
        }
        let raw = self.pending.take().expect("sink closed twice");
        let encoder = match self.compression {
            Compression::Gz => Encoder::Gz(flate2::write::GzEncoder::new(
                raw,
                flate2::Compression::default(),
            )),
            Compression::Bz2 => {
                Encoder::Bz2(bzip2::write::BzEncoder::new(raw, bzip2::Compression::default()))
            }
            Compression::Xz => Encoder::Xz(xz2::write::XzEncoder::new(raw, 6)),
            Compression::Zstd => Encoder::Zstd(zstd::stream::write::Encoder::new(raw, 0)?),
            Compression::Lz4 => Encoder::Lz4(lz4_flex::frame::FrameEncoder::new(raw)),
        };
        self.encoder = Some(encoder);
        Ok(())
    }
}

impl Write for CompressedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_encoder()?;
        self.encoder.as_mut().unwrap().write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        if let Some(e) = self.encoder.as_mut() {
            e.flush()?;
        }
        Ok(())
    }
}

impl TransportWrite for CompressedSink {
    fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.ensure_encoder()?;
        if let Some(e) = self.encoder.take() {
            e.finish()?;
        }
        Ok(())
    }
}

impl Drop for CompressedSink {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = TransportWrite::close(self) {
                tracing::warn!(error = %e, "error finishing compressed sink on drop");
            }
        }
    }
}

/// Open a scoped writer transport, optionally wrapped with a compression
/// encoder.
pub fn open_writer(
    driver: &str,
    database: &str,
    compression: Option<dk_uri::Compression>,
) -> Result<Box<dyn TransportWrite>, TransportError> {
    let base: Box<dyn TransportWrite> = match driver {
        "file" if database == "stdio" => Box::new(StdoutSink(io::stdout())),
        "file" => {
            if let Some(parent) = Path::new(database).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Box::new(FileSink(Some(BufWriter::new(File::create(database)?))))
        }
        "shm" => Box::new(MemorySink(shm::segment(database))),
        other => {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("no writer transport for driver '{other}'"),
            )))
        }
    };
    wrap_compression_writer(base, compression)
}

fn wrap_compression_writer(
    base: Box<dyn TransportWrite>,
    compression: Option<dk_uri::Compression>,
) -> Result<Box<dyn TransportWrite>, TransportError> {
    match compression {
        None | Some(dk_uri::Compression::Zip) => Ok(base),
        Some(c) => {
            let c: Compression = c.try_into()?;
            // `Write + Send` up-cast: TransportWrite requires Write + Send already.
            let boxed: Box<dyn Write + Send> = Box::new(WriteAdapter(base));
            Ok(Box::new(CompressedSink::new(boxed, c)))
        }
    }
}

/// Adapts a `Box<dyn TransportWrite>` to plain `Write` for the compression
/// encoder, which only needs `Write`.
struct WriteAdapter(Box<dyn TransportWrite>);

impl Write for WriteAdapter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Reads an entire file and returns its path, used by sources that need
/// direct filesystem access (e.g. Parquet, which reads via its own file
/// handle rather than through a generic `Read`).
pub fn resolve_path(database: &str) -> PathBuf {
    PathBuf::from(database)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn roundtrip_gzip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt.gz");
        let path_str = path.to_str().unwrap();

        let mut writer = open_writer("file", path_str, Some(dk_uri::Compression::Gz)).unwrap();
        writer.write_all(b"hello, world").unwrap();
        writer.close().unwrap();
        drop(writer);

        let mut reader = open_reader("file", path_str, Some(dk_uri::Compression::Gz)).unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello, world");
    }

    #[test]
    fn file_reader_reset_rewinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, b"abcdef").unwrap();

        let mut reader = open_reader("file", path.to_str().unwrap(), None).unwrap();
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        reader.reset().unwrap();
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn shared_memory_roundtrip() {
        let mut writer = open_writer("shm", "test-segment", None).unwrap();
        writer.write_all(b"payload").unwrap();
        writer.close().unwrap();

        let mut reader = open_reader("shm", "test-segment", None).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");
    }

    #[test]
    fn detects_magic_bytes() {
        assert_eq!(detect_compression(&[0x1f, 0x8b, 0]), Some(Compression::Gz));
        assert_eq!(detect_compression(b"BZh9"), Some(Compression::Bz2));
        assert_eq!(detect_compression(b"plain text"), None);
    }

    #[test]
    fn peek_replays_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"0123456789").unwrap();
        let reader = open_reader("file", path.to_str().unwrap(), None).unwrap();
        let (prefix, mut replay) = peek(reader, 4).unwrap();
        assert_eq!(prefix, b"0123");
        let mut all = Vec::new();
        replay.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"0123456789");
    }
}
