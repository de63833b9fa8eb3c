use bytes::Bytes;
use md5::{Digest, Md5};
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

const HASH_BUFFER: usize = 64 << 10;

pub fn content_md5(data: &[u8]) -> String {
    base64::encode(Md5::digest(data))
}

pub trait DataChannel: Send {
    fn offset(&self) -> u64;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_bytes(&mut self) -> io::Result<Bytes>;

    /// Writes at the channel's cursor and advances it.
    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()>;

    fn content_md5(&mut self) -> io::Result<String>;

    fn is_valid_md5(&mut self, expected: &str) -> io::Result<bool> {
        Ok(self.content_md5()? == expected)
    }

    fn reset(&mut self) -> io::Result<()>;
}

pub struct FileDataChannel {
    file: File,
    start: u64,
    len: u64,
}

impl FileDataChannel {
    pub fn open(path: &Path, start: u64, len: u64) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self { file, start, len })
    }
}

impl DataChannel for FileDataChannel {
    fn offset(&self) -> u64 {
        self.start
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn read_bytes(&mut self) -> io::Result<Bytes> {
        self.file.seek(SeekFrom::Start(self.start))?;
        let mut buf = vec![0; usize_len(self.len)?];
        self.file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn write_bytes(&mut self, _: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "file channel is read-only",
        ))
    }

    fn content_md5(&mut self) -> io::Result<String> {
        self.file.seek(SeekFrom::Start(self.start))?;
        let mut reader = (&self.file).take(self.len);
        let mut hasher = Md5::new();
        let mut buf = vec![0; HASH_BUFFER];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(base64::encode(hasher.finalize()))
    }

    fn reset(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(self.start))?;
        Ok(())
    }
}

enum Region {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

pub struct MappedDataChannel {
    region: Region,
    offset: u64,
    position: usize,
}

impl MappedDataChannel {
    pub fn map_read(file: &File, start: u64, len: u64, offset: u64) -> io::Result<Self> {
        let len = mapped_len(file, start, len)?;
        // SAFETY: the range lies within the file, which is not truncated
        // while a transfer runs.
        let map = unsafe { MmapOptions::new().offset(start).len(len).map(file)? };
        #[cfg(unix)]
        map.advise(memmap2::Advice::WillNeed)?;
        Ok(Self {
            region: Region::ReadOnly(map),
            offset,
            position: 0,
        })
    }

    pub fn map_write(file: &File, start: u64, len: u64, offset: u64) -> io::Result<Self> {
        let len = mapped_len(file, start, len)?;
        // SAFETY: the range lies within the pre-sized destination file and
        // every part owns a disjoint range of it.
        let map = unsafe { MmapOptions::new().offset(start).len(len).map_mut(file)? };
        Ok(Self {
            region: Region::ReadWrite(map),
            offset,
            position: 0,
        })
    }

    fn as_slice(&self) -> &[u8] {
        match &self.region {
            Region::ReadOnly(map) => map,
            Region::ReadWrite(map) => map,
        }
    }

    /// Flushes written bytes and releases the mapping.
    pub fn close(self) -> io::Result<()> {
        if let Region::ReadWrite(map) = &self.region {
            map.flush()?;
        }
        Ok(())
    }
}

impl DataChannel for MappedDataChannel {
    fn offset(&self) -> u64 {
        self.offset
    }

    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read_bytes(&mut self) -> io::Result<Bytes> {
        Ok(Bytes::copy_from_slice(self.as_slice()))
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        let map = match &mut self.region {
            Region::ReadWrite(map) => map,
            Region::ReadOnly(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "mapping is read-only",
                ))
            }
        };
        let end = self.position + data.len();
        if end > map.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write past the end of the part",
            ));
        }
        map[self.position..end].copy_from_slice(data);
        self.position = end;
        Ok(())
    }

    fn content_md5(&mut self) -> io::Result<String> {
        Ok(content_md5(self.as_slice()))
    }

    fn reset(&mut self) -> io::Result<()> {
        self.position = 0;
        Ok(())
    }
}

// Touching a mapped page past the end of the file raises SIGBUS.
fn mapped_len(file: &File, start: u64, len: u64) -> io::Result<usize> {
    let file_len = file.metadata()?.len();
    match start.checked_add(len) {
        Some(end) if end <= file_len => usize_len(len),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "range {}+{} extends past the end of a {} byte file",
                start, len, file_len
            ),
        )),
    }
}

fn usize_len(len: u64) -> io::Result<usize> {
    usize::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "part does not fit in the address space",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::{content_md5, DataChannel, FileDataChannel, MappedDataChannel};
    use std::fs::{File, OpenOptions};
    use std::io::{self, Write};
    use tempfile::TempDir;

    fn create(dir: &TempDir, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join("object");
        File::create(&path).unwrap().write_all(data).unwrap();
        path
    }

    #[test]
    fn test_content_md5() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(content_md5(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
        assert_ne!(content_md5(b"hello"), content_md5(b"world"));
    }

    #[test]
    fn test_file_channel() {
        let dir = TempDir::new().unwrap();
        let path = create(&dir, b"AABBCCDDEE");

        let mut channel = FileDataChannel::open(&path, 4, 4).unwrap();
        assert_eq!(channel.offset(), 4);
        assert_eq!(channel.len(), 4);
        assert_eq!(&channel.read_bytes().unwrap()[..], b"CCDD");
        assert!(channel.is_valid_md5(&content_md5(b"CCDD")).unwrap());
        assert!(!channel.is_valid_md5(&content_md5(b"CCDE")).unwrap());

        channel.reset().unwrap();
        assert_eq!(&channel.read_bytes().unwrap()[..], b"CCDD");
        assert!(channel.write_bytes(b"XX").is_err());
    }

    #[test]
    fn test_mapped_read() {
        let dir = TempDir::new().unwrap();
        let path = create(&dir, b"AABBCCDDEE");
        let file = File::open(&path).unwrap();

        let mut channel = MappedDataChannel::map_read(&file, 8, 2, 8).unwrap();
        assert_eq!(channel.len(), 2);
        assert_eq!(&channel.read_bytes().unwrap()[..], b"EE");
        assert_eq!(channel.content_md5().unwrap(), content_md5(b"EE"));
        assert!(channel.write_bytes(b"X").is_err());
    }

    #[test]
    fn test_mapped_range_past_end() {
        let dir = TempDir::new().unwrap();
        let path = create(&dir, b"AABBCCDDEE");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();

        for result in [
            MappedDataChannel::map_read(&file, 8, 4, 8),
            MappedDataChannel::map_write(&file, 4, 4096, 4),
            MappedDataChannel::map_read(&file, u64::MAX, 2, 0),
        ] {
            match result {
                Err(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
                Ok(_) => panic!("mapped a range past the end of the file"),
            }
        }
        assert!(MappedDataChannel::map_read(&file, 6, 4, 6).is_ok());
    }

    #[test]
    fn test_mapped_write() {
        let dir = TempDir::new().unwrap();
        let path = create(&dir, &[0; 10]);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();

        let mut channel = MappedDataChannel::map_write(&file, 3, 4, 3).unwrap();
        channel.write_bytes(b"ab").unwrap();
        channel.write_bytes(b"cd").unwrap();
        assert!(channel.write_bytes(b"e").is_err());
        assert!(channel.is_valid_md5(&content_md5(b"abcd")).unwrap());

        channel.reset().unwrap();
        channel.write_bytes(b"wxyz").unwrap();
        channel.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"\0\0\0wxyz\0\0\0");
    }
}
