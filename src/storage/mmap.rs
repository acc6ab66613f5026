//! # Mapped File Windows
//!
//! `MappedRegion` maps one `(offset, len)` window of a regular file. The
//! OS requires mapping offsets to be multiples of its allocation
//! granularity; tree pages can be smaller than that (tests use 64-byte
//! pages), so the region aligns the mapping start downward and exposes the
//! requested window as a sub-slice. One region per resident page keeps the
//! engine's "one OS mapping per page" contract observable: dropping the
//! region unmaps it.
//!
//! File growth deliberately does not use `set_len`: the data file is
//! extended by seeking to the last byte of the new length and writing a
//! single zero, which allocates the page slot on filesystems that treat
//! `truncate` lazily and matches the on-disk behavior the format was
//! defined with.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::{MmapMut, MmapOptions};

#[derive(Debug)]
pub struct MappedRegion {
    map: MmapMut,
    pad: usize,
    len: usize,
}

impl MappedRegion {
    /// Maps `len` bytes of `file` starting at `offset`. The window must lie
    /// entirely within the current file length.
    pub fn map(file: &File, offset: u64, len: usize) -> Result<Self> {
        ensure!(len > 0, "cannot map an empty region");

        let file_len = file
            .metadata()
            .wrap_err("failed to stat file before mapping")?
            .len();
        ensure!(
            offset + len as u64 <= file_len,
            "mapped region [{}, {}) extends past end of file ({} bytes)",
            offset,
            offset + len as u64,
            file_len
        );

        let granularity = map_granularity() as u64;
        let pad = (offset % granularity) as usize;
        let aligned_offset = offset - pad as u64;

        // SAFETY: MmapMut::map_mut is unsafe because the file could be
        // modified externally while mapped. This is safe because:
        // 1. The store is single-writer by contract; no other process is
        //    expected to touch the file pair while a tree is open.
        // 2. The window was bounds-checked against the file length above,
        //    so no access through the map faults past EOF.
        // 3. The mapping's lifetime is tied to MappedRegion; bytes() and
        //    bytes_mut() never outlive it.
        let map = unsafe {
            MmapOptions::new()
                .offset(aligned_offset)
                .len(pad + len)
                .map_mut(file)
                .wrap_err_with(|| format!("failed to map {} bytes at offset {}", len, offset))?
        };

        let region = Self { map, pad, len };
        region.advise_willneed();
        Ok(region)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.map[self.pad..self.pad + self.len]
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.map[self.pad..self.pad + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Synchronously flushes the window to disk.
    pub fn flush(&self) -> Result<()> {
        self.map.flush().wrap_err("failed to flush mapped region")
    }

    /// Hints the kernel to fault the window in ahead of first access, the
    /// moral equivalent of MAP_POPULATE.
    fn advise_willneed(&self) {
        #[cfg(unix)]
        // SAFETY: madvise with MADV_WILLNEED is a hint; the address range
        // is exactly the live mapping owned by self.map.
        unsafe {
            libc::madvise(
                self.map.as_ptr() as *mut libc::c_void,
                self.map.len(),
                libc::MADV_WILLNEED,
            );
        }
    }
}

/// OS mapping granularity (the unit `mmap` offsets must align to).
pub fn map_granularity() -> usize {
    #[cfg(unix)]
    // SAFETY: sysconf is always safe to call.
    unsafe {
        libc::sysconf(libc::_SC_PAGESIZE) as usize
    }
    #[cfg(not(unix))]
    {
        65536
    }
}

/// Grows `path` to `new_len` bytes by writing a single zero byte at the
/// last position. A no-op if the file is already at least that long.
pub fn extend_file(path: &Path, new_len: u64) -> Result<()> {
    ensure!(new_len > 0, "cannot extend file to zero length");

    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .wrap_err_with(|| format!("failed to open '{}' for extension", path.display()))?;

    let current = file
        .metadata()
        .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
        .len();
    if current >= new_len {
        return Ok(());
    }

    file.seek(SeekFrom::Start(new_len - 1))
        .wrap_err_with(|| format!("failed to seek to {} in '{}'", new_len - 1, path.display()))?;
    file.write_all(&[0u8])
        .wrap_err_with(|| format!("failed to extend '{}' to {} bytes", path.display(), new_len))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn extend_creates_and_grows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");

        extend_file(&path, 64).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 64);

        extend_file(&path, 128).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 128);

        // shrinking never happens
        extend_file(&path, 100).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 128);
    }

    #[test]
    fn map_rejects_window_past_eof() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        extend_file(&path, 64).unwrap();

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();

        assert!(MappedRegion::map(&file, 0, 64).is_ok());
        assert!(MappedRegion::map(&file, 0, 65).is_err());
        assert!(MappedRegion::map(&file, 64, 1).is_err());
    }

    #[test]
    fn writes_through_unaligned_window_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        extend_file(&path, 256).unwrap();

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();

        {
            // offset 64 is far below the OS granularity, exercising the pad
            let mut region = MappedRegion::map(&file, 64, 64).unwrap();
            region.bytes_mut().fill(0xAB);
            region.flush().unwrap();
        }

        let contents = std::fs::read(&path).unwrap();
        assert!(contents[..64].iter().all(|&b| b == 0));
        assert!(contents[64..128].iter().all(|&b| b == 0xAB));
        assert!(contents[128..].iter().all(|&b| b == 0));
    }

    #[test]
    fn overlapping_windows_share_backing_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        extend_file(&path, 128).unwrap();

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();

        let mut a = MappedRegion::map(&file, 0, 64).unwrap();
        let b = MappedRegion::map(&file, 0, 64).unwrap();

        a.bytes_mut()[0] = 7;
        assert_eq!(b.bytes()[0], 7);
    }
}
