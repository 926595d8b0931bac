use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use flate2::read::MultiGzDecoder;
use tempfile::NamedTempFile;

pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Enum to hold either an uncompressed or gzipped file reader
pub enum FileReader {
    Uncompressed(BufReader<File>),
    Gzipped(BufReader<MultiGzDecoder<File>>),
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileReader::Uncompressed(r) => r.read(buf),
            FileReader::Gzipped(r) => r.read(buf),
        }
    }
}

impl BufRead for FileReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            FileReader::Uncompressed(r) => r.fill_buf(),
            FileReader::Gzipped(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            FileReader::Uncompressed(r) => r.consume(amt),
            FileReader::Gzipped(r) => r.consume(amt),
        }
    }
}

/// Opens a file for reading, decompressing when the gzip magic is present.
pub fn open_reader(path: &Path) -> io::Result<FileReader> {
    let gz = is_gzipped(path)?;
    let file = File::open(path)?;
    Ok(if gz {
        FileReader::Gzipped(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        FileReader::Uncompressed(BufReader::new(file))
    })
}


/// Writes `path` through a temporary file in the same directory, renaming it
/// into place only after `fill` succeeds. Readers never observe a partial file.
///
/// # Arguments
///
/// * `path` - Final destination.
/// * `fill` - Writer callback; any error discards the temporary.
///
/// # Returns
/// io::Result<T> - whatever `fill` returned.
pub fn write_atomically<T, F>(path: &Path, fill: F) -> io::Result<T>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> io::Result<T>,
{
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    let value = {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let value = fill(&mut writer)?;
        writer.flush()?;
        value
    };
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(value)
}

pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}


/// Deletes a file on drop unless `commit` was called. Guards outputs of
/// external tools across error and cancellation paths.
pub struct PartialOutput {
    path: PathBuf,
    committed: bool,
}

impl PartialOutput {
    pub fn new(path: PathBuf) -> Self {
        PartialOutput { path, committed: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn commit(mut self) -> PathBuf {
        self.committed = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if !self.committed {
            let _ = remove_if_exists(&self.path);
        }
    }
}
