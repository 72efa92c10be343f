//! Single-file key-value store
//!
//! File format:
//! ```text
//! [HEADER: 64 bytes]
//!   - magic: 8 bytes ("JMT_KVDB")
//!   - version: 4 bytes (u32 LE)
//!   - reserved: 52 bytes
//!
//! [FRAMES: variable, one per write batch]
//!   - payload_len: 4 bytes (u32 LE)
//!   - checksum: 32 bytes (BLAKE3 of payload)
//!   - payload: concatenated ops
//!       put:    0x01, key_len (u32 LE), key, value_len (u32 LE), zstd(value)
//!       delete: 0x02, key_len (u32 LE), key
//! ```
//!
//! A batch becomes visible only once its whole frame is on disk. Opening the
//! file replays every frame into an in-memory index and truncates a torn or
//! checksum-failing tail, so a crash mid-batch loses that batch entirely.

use super::{BatchOp, KvStore, WriteBatch};
use crate::model::Hash;
use crate::{Error, Result, MAGIC, VERSION};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const HEADER_SIZE: u64 = 64;
const FRAME_HEADER_SIZE: u64 = 4 + 32;
const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;
const ZSTD_LEVEL: i32 = 3;

/// Location of a compressed value inside the file
#[derive(Clone, Copy, Debug)]
struct IndexEntry {
    offset: u64,
    size: u32,
}

struct FileState {
    file: File,
    /// End of the last complete frame
    write_offset: u64,
}

/// An append-only key-value store backed by a single file
pub struct FileStore {
    path: PathBuf,
    state: Mutex<FileState>,
    index: RwLock<HashMap<Vec<u8>, IndexEntry>>,
    sync_writes: bool,
}

impl FileStore {
    /// Create a new store file, truncating any existing one
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        write_header(&mut file)?;
        file.sync_all()?;

        debug!(path = %path.display(), "created store");
        Ok(FileStore {
            path,
            state: Mutex::new(FileState {
                file,
                write_offset: HEADER_SIZE,
            }),
            index: RwLock::new(HashMap::new()),
            sync_writes: true,
        })
    }

    /// Open an existing store file, replaying its frames
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        read_header(&mut file)?;
        let (index, write_offset) = replay(&mut file)?;

        debug!(
            path = %path.display(),
            entries = index.len(),
            bytes = write_offset,
            "opened store"
        );
        Ok(FileStore {
            path,
            state: Mutex::new(FileState { file, write_offset }),
            index: RwLock::new(index),
            sync_writes: true,
        })
    }

    /// Open or create a store file
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Whether each batch is followed by an fsync (default on)
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.read().contains_key(key)
    }

    /// Flush file contents and metadata to disk
    pub fn sync(&self) -> Result<()> {
        self.state.lock().file.sync_all()?;
        Ok(())
    }

    /// Rewrite the file so it holds only live entries
    pub fn compact(&self) -> Result<()> {
        let mut state = self.state.lock();
        let mut index = self.index.write();

        let mut live: Vec<(Vec<u8>, IndexEntry)> =
            index.iter().map(|(k, e)| (k.clone(), *e)).collect();
        live.sort_by(|a, b| a.0.cmp(&b.0));

        let mut records = Vec::with_capacity(live.len());
        for (key, entry) in live {
            let compressed = read_at(&mut state.file, entry)?;
            records.push((key, Some(compressed)));
        }
        let (frame, locations) = encode_frame(records);

        let tmp_path = self.path.with_extension("compact");
        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        write_header(&mut tmp)?;
        tmp.write_all(&frame)?;
        tmp.sync_all()?;
        drop(tmp);
        std::fs::rename(&tmp_path, &self.path)?;

        let before = state.write_offset;
        state.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        state.write_offset = HEADER_SIZE + frame.len() as u64;
        index.clear();
        apply_locations(&mut index, HEADER_SIZE, locations);

        debug!(
            path = %self.path.display(),
            before,
            after = state.write_offset,
            "compacted store"
        );
        Ok(())
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let entry = match self.index.read().get(key).copied() {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let compressed = {
            let mut state = self.state.lock();
            read_at(&mut state.file, entry)?
        };
        Ok(Some(zstd::decode_all(compressed.as_slice())?))
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut records = Vec::with_capacity(batch.len());
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    let compressed = zstd::encode_all(value.as_slice(), ZSTD_LEVEL)?;
                    records.push((key, Some(compressed)));
                }
                BatchOp::Delete { key } => records.push((key, None)),
            }
        }
        let (frame, locations) = encode_frame(records);

        let mut state = self.state.lock();
        let offset = state.write_offset;
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(&frame)?;
        if self.sync_writes {
            state.file.sync_data()?;
        }
        state.write_offset = offset + frame.len() as u64;

        // The index is only touched once the frame is fully written
        let mut index = self.index.write();
        apply_locations(&mut index, offset, locations);
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

fn write_header(file: &mut File) -> Result<()> {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[0..8].copy_from_slice(MAGIC);
    header[8..12].copy_from_slice(&VERSION.to_le_bytes());
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header)?;
    Ok(())
}

fn read_header(file: &mut File) -> Result<()> {
    let mut header = [0u8; HEADER_SIZE as usize];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut header)
        .map_err(|_| Error::InvalidFile("file shorter than header".into()))?;

    if &header[0..8] != MAGIC {
        return Err(Error::InvalidFile("Invalid magic bytes".into()));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&header[8..12]);
    let version = u32::from_le_bytes(version);
    if version != VERSION {
        return Err(Error::VersionMismatch {
            expected: VERSION,
            found: version,
        });
    }
    Ok(())
}

fn read_at(file: &mut File, entry: IndexEntry) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(entry.offset))?;
    let mut data = vec![0u8; entry.size as usize];
    file.read_exact(&mut data)?;
    Ok(data)
}

/// Per-key outcome of a frame: `Some((offset within frame, size))` for a put
type Locations = Vec<(Vec<u8>, Option<(u64, u32)>)>;

/// Serialize records (`None` value = delete) into one checksummed frame
fn encode_frame(records: Vec<(Vec<u8>, Option<Vec<u8>>)>) -> (Vec<u8>, Locations) {
    let mut payload = Vec::new();
    let mut locations = Vec::with_capacity(records.len());

    for (key, value) in records {
        match value {
            Some(value) => {
                payload.push(OP_PUT);
                payload.extend_from_slice(&(key.len() as u32).to_le_bytes());
                payload.extend_from_slice(&key);
                payload.extend_from_slice(&(value.len() as u32).to_le_bytes());
                let at = FRAME_HEADER_SIZE + payload.len() as u64;
                payload.extend_from_slice(&value);
                locations.push((key, Some((at, value.len() as u32))));
            }
            None => {
                payload.push(OP_DELETE);
                payload.extend_from_slice(&(key.len() as u32).to_le_bytes());
                payload.extend_from_slice(&key);
                locations.push((key, None));
            }
        }
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE as usize + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(Hash::digest(&payload).as_bytes());
    frame.extend_from_slice(&payload);
    (frame, locations)
}

fn apply_locations(
    index: &mut HashMap<Vec<u8>, IndexEntry>,
    frame_offset: u64,
    locations: Locations,
) {
    for (key, location) in locations {
        match location {
            Some((at, size)) => {
                index.insert(
                    key,
                    IndexEntry {
                        offset: frame_offset + at,
                        size,
                    },
                );
            }
            None => {
                index.remove(&key);
            }
        }
    }
}

/// Parse a verified frame payload back into per-key locations
fn decode_payload(payload: &[u8]) -> Result<Locations> {
    fn take<'a>(payload: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
        let end = pos
            .checked_add(len)
            .filter(|end| *end <= payload.len())
            .ok_or_else(|| Error::Corruption("frame record overruns payload".into()))?;
        let slice = &payload[*pos..end];
        *pos = end;
        Ok(slice)
    }

    fn take_u32(payload: &[u8], pos: &mut usize) -> Result<u32> {
        let bytes = take(payload, pos, 4)?;
        let mut arr = [0u8; 4];
        arr.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(arr))
    }

    let mut locations = Vec::new();
    let mut pos = 0usize;
    while pos < payload.len() {
        let tag = take(payload, &mut pos, 1)?[0];
        let key_len = take_u32(payload, &mut pos)? as usize;
        let key = take(payload, &mut pos, key_len)?.to_vec();
        match tag {
            OP_PUT => {
                let size = take_u32(payload, &mut pos)?;
                let at = FRAME_HEADER_SIZE + pos as u64;
                take(payload, &mut pos, size as usize)?;
                locations.push((key, Some((at, size))));
            }
            OP_DELETE => locations.push((key, None)),
            other => {
                return Err(Error::Corruption(format!("unknown record tag {}", other)));
            }
        }
    }
    Ok(locations)
}

fn replay(file: &mut File) -> Result<(HashMap<Vec<u8>, IndexEntry>, u64)> {
    let file_len = file.metadata()?.len();
    let mut index = HashMap::new();
    let mut offset = HEADER_SIZE;

    while offset < file_len {
        if file_len - offset < FRAME_HEADER_SIZE {
            break;
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut frame_header = [0u8; FRAME_HEADER_SIZE as usize];
        file.read_exact(&mut frame_header)?;

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&frame_header[0..4]);
        let payload_len = u32::from_le_bytes(len_bytes) as u64;
        if offset + FRAME_HEADER_SIZE + payload_len > file_len {
            break;
        }

        let mut payload = vec![0u8; payload_len as usize];
        file.read_exact(&mut payload)?;
        if Hash::digest(&payload).as_bytes()[..] != frame_header[4..] {
            break;
        }

        let locations = decode_payload(&payload)?;
        apply_locations(&mut index, offset, locations);
        offset += FRAME_HEADER_SIZE + payload_len;
    }

    if offset < file_len {
        warn!(
            valid = offset,
            discarded = file_len - offset,
            "truncating incomplete tail of store file"
        );
        file.set_len(offset)?;
    }
    Ok((index, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.jmt");

        {
            let store = FileStore::create(&path).unwrap();
            assert!(store.is_empty());
        }

        {
            let store = FileStore::open(&path).unwrap();
            assert!(store.is_empty());
        }
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foreign");
        std::fs::write(&path, vec![1u8; 128]).unwrap();
        assert!(matches!(FileStore::open(&path), Err(Error::InvalidFile(_))));
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.jmt");

        {
            let store = FileStore::create(&path).unwrap();
            let mut batch = WriteBatch::new();
            batch.put(b"a".to_vec(), b"alpha".to_vec());
            batch.put(b"b".to_vec(), b"beta".to_vec());
            store.write_batch(batch).unwrap();
            store.delete(b"a").unwrap();
            store.put(b"c", &[7u8; 4096]).unwrap();
        }

        {
            let store = FileStore::open(&path).unwrap();
            assert_eq!(store.get(b"a").unwrap(), None);
            assert_eq!(store.get(b"b").unwrap(), Some(b"beta".to_vec()));
            assert_eq!(store.get(b"c").unwrap(), Some(vec![7u8; 4096]));
            assert_eq!(store.len(), 2);
        }
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.jmt");

        {
            let store = FileStore::create(&path).unwrap();
            store.put(b"kept", b"1").unwrap();
            store.put(b"lost", b"2").unwrap();
        }

        // Chop the last frame in half
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get(b"kept").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"lost").unwrap(), None);

        // Appends after recovery land on a clean boundary
        store.put(b"after", b"3").unwrap();
        drop(store);
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get(b"after").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn test_compact_keeps_live_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.jmt");
        let store = FileStore::create(&path).unwrap();

        for i in 0..20u8 {
            store.put(&[i], &[i; 64]).unwrap();
        }
        for i in 0..15u8 {
            store.delete(&[i]).unwrap();
        }
        let before = std::fs::metadata(&path).unwrap().len();
        store.compact().unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before);

        for i in 15..20u8 {
            assert_eq!(store.get(&[i]).unwrap(), Some(vec![i; 64]));
        }
        store.put(b"new", b"x").unwrap();
        drop(store);

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.len(), 6);
        assert_eq!(store.get(&[3u8]).unwrap(), None);
        assert_eq!(store.get(b"new").unwrap(), Some(b"x".to_vec()));
    }
}
