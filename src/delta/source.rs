// Source access for delta decoding.
//
// The decoder pulls bytes of the previously stored file on demand. Access
// is block-granular: `BlockSource` reads one fixed-size block by index, and
// `BlockCache` keeps exactly one block resident, refilled lazily. The
// decoder requests blocks roughly in the order it needs them, so a deeper
// working set buys nothing on a memory-constrained device.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

// ---------------------------------------------------------------------------
// PatchSource: byte-offset reads, as the decoder sees them
// ---------------------------------------------------------------------------

/// Provides source bytes for COPY instructions.
pub trait PatchSource {
    /// Read bytes at absolute `offset` into `buf`. Returns the number of
    /// bytes actually read; short only at end of source.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Total source length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory source (tests and the host-side encoder checks).
impl PatchSource for &[u8] {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let offset = offset as usize;
        if offset >= <[u8]>::len(self) {
            return Ok(0);
        }
        let available = &self[offset..];
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }
}

// ---------------------------------------------------------------------------
// BlockSource: index-granular reads
// ---------------------------------------------------------------------------

/// Reads fixed-size blocks of the validated source file by index.
pub trait BlockSource {
    /// Block size in bytes. `buf` passed to `read_block` is at least this big.
    fn block_size(&self) -> usize;

    /// Total source length in bytes.
    fn len(&self) -> u64;

    /// Read block `index` (bytes `index * block_size ..`) into `buf`.
    /// Returns the byte count, short only for the final block.
    fn read_block(&mut self, index: u64, buf: &mut [u8]) -> io::Result<usize>;
}

/// Block reader over the previously stored file.
pub struct FileBlockSource {
    file: File,
    len: u64,
    block_size: usize,
}

impl FileBlockSource {
    /// Wrap an already-open (and already checksum-validated) file.
    pub fn new(file: File, block_size: usize) -> io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            len,
            block_size,
        })
    }

    pub fn open(path: &Path, block_size: usize) -> io::Result<Self> {
        Self::new(File::open(path)?, block_size)
    }
}

impl BlockSource for FileBlockSource {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn read_block(&mut self, index: u64, buf: &mut [u8]) -> io::Result<usize> {
        let offset = index * self.block_size as u64;
        if offset >= self.len {
            return Ok(0);
        }
        let want = (self.block_size as u64).min(self.len - offset) as usize;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf[..want])?;
        Ok(want)
    }
}

// ---------------------------------------------------------------------------
// BlockCache: single resident block
// ---------------------------------------------------------------------------

/// Lazily-filled cache holding at most one source block.
pub struct BlockCache<S: BlockSource> {
    source: S,
    buf: Vec<u8>,
    resident: Option<u64>,
    resident_len: usize,
    fetches: u64,
}

impl<S: BlockSource> BlockCache<S> {
    pub fn new(source: S) -> Self {
        let buf = vec![0u8; source.block_size()];
        Self {
            source,
            buf,
            resident: None,
            resident_len: 0,
            fetches: 0,
        }
    }

    /// Number of block reads issued to the underlying source.
    pub fn fetches(&self) -> u64 {
        self.fetches
    }

    fn ensure_resident(&mut self, index: u64) -> io::Result<()> {
        if self.resident != Some(index) {
            self.resident_len = self.source.read_block(index, &mut self.buf)?;
            self.resident = Some(index);
            self.fetches += 1;
        }
        Ok(())
    }
}

impl<S: BlockSource> PatchSource for BlockCache<S> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let block_size = self.source.block_size() as u64;
        let mut filled = 0usize;

        while filled < buf.len() {
            let pos = offset + filled as u64;
            let index = pos / block_size;
            let within = (pos % block_size) as usize;

            self.ensure_resident(index)?;
            if within >= self.resident_len {
                break; // end of source
            }

            let avail = self.resident_len - within;
            let take = avail.min(buf.len() - filled);
            buf[filled..filled + take].copy_from_slice(&self.buf[within..within + take]);
            filled += take;

            // A short block is the final one.
            if self.resident_len < block_size as usize {
                break;
            }
        }

        Ok(filled)
    }

    fn len(&self) -> u64 {
        self.source.len()
    }
}

// ---------------------------------------------------------------------------
// Adler-32
// ---------------------------------------------------------------------------

/// Incremental Adler-32, SIMD-dispatched when the `adler32` feature is on.
pub struct Adler32 {
    #[cfg(feature = "adler32")]
    inner: simd_adler32::Adler32,
    #[cfg(not(feature = "adler32"))]
    a: u32,
    #[cfg(not(feature = "adler32"))]
    b: u32,
}

impl Adler32 {
    pub fn new() -> Self {
        #[cfg(feature = "adler32")]
        {
            Self {
                inner: simd_adler32::Adler32::new(),
            }
        }
        #[cfg(not(feature = "adler32"))]
        {
            Self { a: 1, b: 0 }
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        #[cfg(feature = "adler32")]
        {
            self.inner.write(data);
        }
        #[cfg(not(feature = "adler32"))]
        {
            const MOD_ADLER: u32 = 65521;
            for &byte in data {
                self.a = (self.a + u32::from(byte)) % MOD_ADLER;
                self.b = (self.b + self.a) % MOD_ADLER;
            }
        }
    }

    pub fn finish(&self) -> u32 {
        #[cfg(feature = "adler32")]
        {
            self.inner.finish()
        }
        #[cfg(not(feature = "adler32"))]
        {
            (self.b << 16) | self.a
        }
    }
}

impl Default for Adler32 {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot Adler-32 of a byte slice.
pub fn adler32(data: &[u8]) -> u32 {
    let mut hasher = Adler32::new();
    hasher.update(data);
    hasher.finish()
}

/// Stream a reader to its end, returning `(checksum, length)`.
///
/// Used for source validation: the whole existing file is read once with a
/// fixed scratch buffer before the host checksum is compared.
pub fn adler32_reader<R: Read>(reader: &mut R) -> io::Result<(u32, u64)> {
    let mut hasher = Adler32::new();
    let mut total = 0u64;
    let mut buf = [0u8; 8 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hasher.finish(), total))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Records which blocks were fetched.
    struct TracedSource {
        data: Vec<u8>,
        block_size: usize,
        fetched: Vec<u64>,
    }

    impl BlockSource for TracedSource {
        fn block_size(&self) -> usize {
            self.block_size
        }

        fn len(&self) -> u64 {
            self.data.len() as u64
        }

        fn read_block(&mut self, index: u64, buf: &mut [u8]) -> io::Result<usize> {
            self.fetched.push(index);
            let start = (index as usize) * self.block_size;
            if start >= self.data.len() {
                return Ok(0);
            }
            let end = (start + self.block_size).min(self.data.len());
            buf[..end - start].copy_from_slice(&self.data[start..end]);
            Ok(end - start)
        }
    }

    fn traced(len: usize, block_size: usize) -> TracedSource {
        TracedSource {
            data: (0..len).map(|i| (i % 251) as u8).collect(),
            block_size,
            fetched: Vec::new(),
        }
    }

    #[test]
    fn reads_cross_block_boundaries() {
        let src = traced(1000, 256);
        let expect = src.data.clone();
        let mut cache = BlockCache::new(src);

        let mut buf = vec![0u8; 400];
        let n = cache.read_at(100, &mut buf).unwrap();
        assert_eq!(n, 400);
        assert_eq!(&buf[..], &expect[100..500]);
    }

    #[test]
    fn single_block_resident_distinct_indices_fetched_once() {
        // Requests for blocks 0 and 3: each fetched exactly once, fresh
        // from index * block_size.
        let src = traced(4096, 512);
        let expect = src.data.clone();
        let mut cache = BlockCache::new(src);

        let mut buf = vec![0u8; 64];
        cache.read_at(0, &mut buf).unwrap(); // block 0
        assert_eq!(&buf[..], &expect[0..64]);
        cache.read_at(3 * 512 + 10, &mut buf).unwrap(); // block 3
        assert_eq!(&buf[..], &expect[1546..1610]);

        assert_eq!(cache.source.fetched, vec![0, 3]);
        assert_eq!(cache.fetches(), 2);
    }

    #[test]
    fn repeated_hits_served_from_resident_block() {
        let src = traced(2048, 512);
        let mut cache = BlockCache::new(src);

        let mut buf = vec![0u8; 16];
        for off in [0u64, 100, 200, 300, 400] {
            cache.read_at(off, &mut buf).unwrap();
        }
        assert_eq!(cache.source.fetched, vec![0]);
    }

    #[test]
    fn refetch_after_eviction() {
        // Alternating between two blocks evicts each time: the cache is
        // exactly one block deep.
        let src = traced(2048, 512);
        let mut cache = BlockCache::new(src);

        let mut buf = vec![0u8; 16];
        cache.read_at(0, &mut buf).unwrap();
        cache.read_at(1024, &mut buf).unwrap();
        cache.read_at(0, &mut buf).unwrap();
        assert_eq!(cache.source.fetched, vec![0, 2, 0]);
    }

    #[test]
    fn short_read_at_end_of_source() {
        let src = traced(600, 256); // final block is 88 bytes
        let mut cache = BlockCache::new(src);

        let mut buf = vec![0u8; 256];
        let n = cache.read_at(512, &mut buf).unwrap();
        assert_eq!(n, 88);

        let n = cache.read_at(600, &mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn file_block_source_reads_expected_offsets() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.bin");
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 241) as u8).collect();
        File::create(&path).unwrap().write_all(&data).unwrap();

        let mut src = FileBlockSource::open(&path, 1024).unwrap();
        assert_eq!(BlockSource::len(&src), 5000);

        let mut buf = vec![0u8; 1024];
        let n = src.read_block(2, &mut buf).unwrap();
        assert_eq!(n, 1024);
        assert_eq!(&buf[..], &data[2048..3072]);

        // Final, short block.
        let n = src.read_block(4, &mut buf).unwrap();
        assert_eq!(n, 5000 - 4096);
        assert_eq!(&buf[..n], &data[4096..]);

        // Past the end.
        assert_eq!(src.read_block(5, &mut buf).unwrap(), 0);
    }

    #[test]
    fn adler32_known_vector() {
        // RFC 1950 example: "Wikipedia" -> 0x11E60398
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
        assert_eq!(adler32(b""), 1);
    }

    #[test]
    fn streaming_matches_one_shot() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 239) as u8).collect();
        let mut cursor = io::Cursor::new(&data);
        let (sum, len) = adler32_reader(&mut cursor).unwrap();
        assert_eq!(len, data.len() as u64);
        assert_eq!(sum, adler32(&data));
    }
}
