use crate::error::{Ext2Error, Result, Stage};
use log::info;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Positioned, bounds-checked reads against a read-only image.
///
/// Implementors never keep a cursor: every call names its own offset, so a
/// single accessor can be shared between threads.
pub trait ReadAt: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// A short read is always an error (`Ext2Error::TruncatedImage`), there
    /// is no partial result.
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>>;
}

impl<T: ReadAt + ?Sized> ReadAt for &T {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        (**self).read_at(offset, len)
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.len());
        let end = start.saturating_add(len).min(self.len());
        if end - start < len {
            return Err(Ext2Error::TruncatedImage {
                stage: Stage::Access,
                offset,
                needed: len,
                read: end - start,
            });
        }
        Ok(self[start..end].to_vec())
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.as_slice().read_at(offset, len)
    }
}

/// A raw image file opened read-only.
///
/// `base` is the byte address where the filesystem starts inside the file,
/// zero for a bare partition image.
pub struct DiskImage {
    path: PathBuf,
    file: File,
    base: u64,
    size: u64,
}

impl DiskImage {
    pub fn open<P: AsRef<Path>>(path: P, base: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| Ext2Error::ImageOpen {
            path: path.clone(),
            source,
        })?;
        let size = file
            .metadata()
            .map_err(|source| Ext2Error::ImageOpen {
                path: path.clone(),
                source,
            })?
            .len();
        Ok(DiskImage {
            path,
            file,
            base,
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// Length of the image file in bytes, as seen when it was opened.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn print_info(&self) {
        info!(
            "Evidence : {} (filesystem at 0x{:x})",
            self.path.display(),
            self.base
        );
    }

    #[cfg(unix)]
    fn pread(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.read_at(buf, offset)
    }

    #[cfg(windows)]
    fn pread(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.file.seek_read(buf, offset)
    }
}

impl ReadAt for DiskImage {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let start = self.base.checked_add(offset).ok_or(Ext2Error::TruncatedImage {
            stage: Stage::Access,
            offset,
            needed: len,
            read: 0,
        })?;
        // Lengths come from on-disk fields; never allocate past the file end.
        let available = self.size.saturating_sub(start);
        if (len as u64) > available {
            return Err(Ext2Error::TruncatedImage {
                stage: Stage::Access,
                offset,
                needed: len,
                read: available as usize,
            });
        }
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.pread(&mut buf[filled..], start + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(Ext2Error::Io {
                        stage: Stage::Access,
                        offset,
                        source,
                    })
                }
            }
        }
        if filled < len {
            return Err(Ext2Error::TruncatedImage {
                stage: Stage::Access,
                offset,
                needed: len,
                read: filled,
            });
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn slice_reads_exact_ranges() {
        let data: Vec<u8> = (0u8..16).collect();
        assert_eq!(data.read_at(4, 3).unwrap(), vec![4, 5, 6]);
        assert_eq!(data.read_at(0, 16).unwrap().len(), 16);
    }

    #[test]
    fn slice_short_read_is_truncation() {
        let data = vec![0u8; 10];
        match data.read_at(8, 4) {
            Err(Ext2Error::TruncatedImage { needed, read, .. }) => {
                assert_eq!(needed, 4);
                assert_eq!(read, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(data.read_at(100, 1).is_err());
    }

    #[test]
    fn disk_image_honours_base_offset() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0xAA; 512]).unwrap();
        tmp.write_all(&[1, 2, 3, 4]).unwrap();
        tmp.flush().unwrap();

        let image = DiskImage::open(tmp.path(), 512).unwrap();
        assert_eq!(image.base(), 512);
        assert_eq!(image.read_at(1, 2).unwrap(), vec![2, 3]);
        assert!(matches!(
            image.read_at(2, 4),
            Err(Ext2Error::TruncatedImage { read: 2, .. })
        ));
    }

    #[test]
    fn oversized_read_fails_before_allocating() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 4096]).unwrap();
        tmp.flush().unwrap();

        let image = DiskImage::open(tmp.path(), 0).unwrap();
        assert_eq!(image.size(), 4096);
        match image.read_at(1024, usize::MAX / 2) {
            Err(Ext2Error::TruncatedImage { needed, read, .. }) => {
                assert_eq!(needed, usize::MAX / 2);
                assert_eq!(read, 3072);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            image.read_at(8192, 1),
            Err(Ext2Error::TruncatedImage { read: 0, .. })
        ));
    }

    #[test]
    fn missing_image_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DiskImage::open(dir.path().join("nope.img"), 0)
            .err()
            .unwrap();
        assert!(matches!(err, Ext2Error::ImageOpen { .. }));
    }
}
