//! # Rollback Journal
//!
//! Before a page is modified for the first time in a write transaction, its
//! untouched pre-image is appended here. Until the journal is deleted at
//! commit, the database file can always be restored to its state at
//! transaction start by playing the records back — that is the whole crash
//! recovery story.
//!
//! ## File Format
//!
//! ```text
//! +--------------------------+
//! | Header (32 bytes)        |
//! |   magic      "JotDBjrn"  |
//! |   record_count u32       |  <- 0 until the first sync (placeholder)
//! |   nonce        u32       |  <- random seed for record checksums
//! |   orig_pages   u32       |  <- db page count at transaction start
//! |   sector_size  u32       |
//! |   page_size    u32       |
//! +--------------------------+
//! | Record 0                 |
//! |   page_no u32            |
//! |   image   [u8; 4096]     |
//! |   crc32(nonce ‖ image)   |
//! +--------------------------+
//! | Record 1 ...             |
//! +--------------------------+
//! | Master record (optional) |
//! |   sentinel page_no = 0   |
//! |   path_len u32           |
//! |   path bytes             |
//! |   crc32(nonce ‖ path)    |
//! +--------------------------+
//! ```
//!
//! ## Why the count placeholder matters
//!
//! `record_count` in the header stays behind the appended records until
//! [`Journal::sync`] rewrites it and syncs the file. Playback applies only
//! the records the header admits to. A crash before the header sync leaves
//! `record_count == 0`, and since the pager never writes the database file
//! before syncing the journal, ignoring those records is exactly right:
//! nothing they cover was ever overwritten.
//!
//! A record whose checksum does not match (torn write) likewise terminates
//! playback: everything before it is applied, the tail is ignored.
//!
//! ## Idempotence
//!
//! Playback writes original images at absolute offsets and truncates to the
//! original page count; replaying the same journal any number of times
//! produces the same bytes, which is what makes repeated crash recovery
//! safe.

use std::path::{Path, PathBuf};

use crc::{Crc, CRC_32_ISCSI};
use eyre::{ensure, Result, WrapErr};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{
    JOURNAL_HEADER_SIZE, JOURNAL_MAGIC, JOURNAL_RECORD_SIZE, MASTER_JOURNAL_SENTINEL, PAGE_SIZE,
    SECTOR_SIZE,
};
use crate::error::{kind_err, ErrorKind};
use crate::io::DatabaseFile;
use crate::storage::page_offset;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct JournalHeader {
    magic: [u8; 8],
    record_count: u32,
    nonce: u32,
    orig_page_count: u32,
    sector_size: u32,
    page_size: u32,
    reserved: [u8; 4],
}

fn record_checksum(nonce: u32, payload: &[u8]) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(&nonce.to_le_bytes());
    digest.update(payload);
    digest.finalize()
}

/// Nonce for a fresh journal. Time-derived with a process-local counter so
/// two journals created back to back never share checksums with each other
/// or with a stale journal image on disk.
pub fn fresh_nonce() -> u32 {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    nanos ^ COUNTER.fetch_add(0x9E37_79B9, Ordering::Relaxed)
}

/// Open journal for the active write transaction.
pub struct Journal<F: DatabaseFile> {
    file: F,
    nonce: u32,
    orig_page_count: u32,
    record_count: u32,
    /// Records covered by the last header sync.
    synced_records: u32,
}

impl<F: DatabaseFile> Journal<F> {
    /// Creates a journal over `file` (truncated first), writing the header
    /// with a zero record-count placeholder.
    pub fn create(mut file: F, orig_page_count: u32) -> Result<Self> {
        file.truncate(0).wrap_err("truncating journal")?;

        let nonce = fresh_nonce();
        let header = JournalHeader {
            magic: JOURNAL_MAGIC,
            record_count: 0,
            nonce,
            orig_page_count,
            sector_size: SECTOR_SIZE,
            page_size: PAGE_SIZE as u32,
            reserved: [0; 4],
        };
        file.write_at(0, header.as_bytes())
            .wrap_err("writing journal header")?;

        Ok(Self {
            file,
            nonce,
            orig_page_count,
            record_count: 0,
            synced_records: 0,
        })
    }

    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    pub fn orig_page_count(&self) -> u32 {
        self.orig_page_count
    }

    /// Whether every appended record is covered by a header sync.
    pub fn is_synced(&self) -> bool {
        self.synced_records == self.record_count
    }

    fn record_offset(index: u32) -> u64 {
        JOURNAL_HEADER_SIZE as u64 + index as u64 * JOURNAL_RECORD_SIZE as u64
    }

    /// Appends the pre-image of `page_no`. The caller tracks which pages
    /// are already journaled; a page must be appended at most once per
    /// transaction so playback restores the true pre-transaction image.
    pub fn append(&mut self, page_no: u32, image: &[u8]) -> Result<()> {
        ensure!(
            image.len() == PAGE_SIZE,
            "journal image size {} != {}",
            image.len(),
            PAGE_SIZE
        );
        ensure!(page_no != MASTER_JOURNAL_SENTINEL, "page 0 is not journalable");

        let mut record = Vec::with_capacity(JOURNAL_RECORD_SIZE);
        record.extend_from_slice(&page_no.to_le_bytes());
        record.extend_from_slice(image);
        record.extend_from_slice(&record_checksum(self.nonce, image).to_le_bytes());

        self.file
            .write_at(Self::record_offset(self.record_count), &record)
            .wrap_err_with(|| format!("appending journal record for page {page_no}"))?;
        self.record_count += 1;

        Ok(())
    }

    /// Appends the master-journal record naming `path`. Used by multi-file
    /// atomic commits; must be followed by [`Journal::sync`] before any
    /// database file is written.
    pub fn write_master(&mut self, path: &Path) -> Result<()> {
        let bytes = path.to_string_lossy();
        let bytes = bytes.as_bytes();

        let mut record = Vec::with_capacity(12 + bytes.len());
        record.extend_from_slice(&MASTER_JOURNAL_SENTINEL.to_le_bytes());
        record.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        record.extend_from_slice(bytes);
        record.extend_from_slice(&record_checksum(self.nonce, bytes).to_le_bytes());

        self.file
            .write_at(Self::record_offset(self.record_count), &record)
            .wrap_err("appending master journal record")
    }

    /// Makes every appended record durable: sync the record data, then
    /// publish the record count in the header and sync again. After this
    /// returns, playback will honor all `record_count` records.
    pub fn sync(&mut self) -> Result<()> {
        if self.is_synced() {
            return Ok(());
        }

        self.file.sync().wrap_err("syncing journal records")?;

        self.file
            .write_at(8, &self.record_count.to_le_bytes())
            .wrap_err("publishing journal record count")?;
        self.file.sync().wrap_err("syncing journal header")?;

        self.synced_records = self.record_count;
        Ok(())
    }

    /// Plays this journal back into `db`, restoring pre-transaction state.
    pub fn playback(&mut self, db: &mut impl DatabaseFile) -> Result<PlaybackReport> {
        playback_file(&mut self.file, db)
    }

    pub fn into_file(self) -> F {
        self.file
    }
}

/// Outcome of a journal playback.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub records_applied: u32,
    /// Master journal path named by the journal, when present.
    pub master: Option<PathBuf>,
}

/// Reads the master-journal path out of a journal without applying it.
/// Returns None when the journal has no master record or no valid header.
pub fn read_master(journal: &mut impl DatabaseFile) -> Result<Option<PathBuf>> {
    let Some(header) = read_header(journal)? else {
        return Ok(None);
    };

    let offset =
        JOURNAL_HEADER_SIZE as u64 + header.record_count as u64 * JOURNAL_RECORD_SIZE as u64;
    read_master_at(journal, offset, header.nonce)
}

fn read_header(journal: &mut impl DatabaseFile) -> Result<Option<JournalHeader>> {
    if journal.len()? < JOURNAL_HEADER_SIZE as u64 {
        return Ok(None);
    }

    let mut buf = [0u8; JOURNAL_HEADER_SIZE];
    journal.read_at(0, &mut buf).wrap_err("reading journal header")?;

    let header = JournalHeader::read_from_bytes(&buf)
        .map_err(|e| eyre::eyre!("failed to parse journal header: {:?}", e))?;

    if header.magic != JOURNAL_MAGIC {
        return Ok(None);
    }
    if header.page_size as usize != PAGE_SIZE {
        return Err(kind_err(
            ErrorKind::Corrupt,
            format!("journal page size {} unsupported", header.page_size),
        ));
    }

    Ok(Some(header))
}

fn read_master_at(
    journal: &mut impl DatabaseFile,
    offset: u64,
    nonce: u32,
) -> Result<Option<PathBuf>> {
    let len = journal.len()?;
    if offset + 8 > len {
        return Ok(None);
    }

    let mut word = [0u8; 4];
    journal.read_at(offset, &mut word)?;
    if u32::from_le_bytes(word) != MASTER_JOURNAL_SENTINEL {
        return Ok(None);
    }

    journal.read_at(offset + 4, &mut word)?;
    let path_len = u32::from_le_bytes(word) as u64;
    if offset + 8 + path_len + 4 > len {
        return Ok(None);
    }

    let mut path_bytes = vec![0u8; path_len as usize];
    journal.read_at(offset + 8, &mut path_bytes)?;

    journal.read_at(offset + 8 + path_len, &mut word)?;
    if u32::from_le_bytes(word) != record_checksum(nonce, &path_bytes) {
        return Ok(None);
    }

    Ok(Some(PathBuf::from(String::from_utf8_lossy(&path_bytes).into_owned())))
}

/// Core playback routine shared by rollback and crash recovery.
///
/// Applies every record the header admits to, stopping early at the first
/// checksum mismatch (torn tail from a crash mid-sync). Afterwards the
/// database file is truncated back to its original page count and synced.
pub fn playback_file(
    journal: &mut impl DatabaseFile,
    db: &mut impl DatabaseFile,
) -> Result<PlaybackReport> {
    let Some(header) = read_header(journal)? else {
        return Ok(PlaybackReport::default());
    };

    let journal_len = journal.len()?;
    let mut applied = 0u32;
    let mut buf = vec![0u8; JOURNAL_RECORD_SIZE];

    for index in 0..header.record_count {
        let offset = JOURNAL_HEADER_SIZE as u64 + index as u64 * JOURNAL_RECORD_SIZE as u64;
        if offset + JOURNAL_RECORD_SIZE as u64 > journal_len {
            break;
        }

        journal
            .read_at(offset, &mut buf)
            .wrap_err_with(|| format!("reading journal record {index}"))?;

        let page_no = u32::from_le_bytes(buf[..4].try_into().expect("4-byte slice"));
        let image = &buf[4..4 + PAGE_SIZE];
        let stored = u32::from_le_bytes(
            buf[4 + PAGE_SIZE..JOURNAL_RECORD_SIZE]
                .try_into()
                .expect("4-byte slice"),
        );

        if page_no == MASTER_JOURNAL_SENTINEL || stored != record_checksum(header.nonce, image) {
            break;
        }

        db.write_at(page_offset(page_no), image)
            .wrap_err_with(|| format!("restoring page {page_no}"))?;
        applied += 1;
    }

    db.truncate(header.orig_page_count as u64 * PAGE_SIZE as u64)
        .wrap_err("truncating database to original size")?;
    db.sync().wrap_err("syncing database after playback")?;

    let master_offset =
        JOURNAL_HEADER_SIZE as u64 + header.record_count as u64 * JOURNAL_RECORD_SIZE as u64;

    Ok(PlaybackReport {
        records_applied: applied,
        master: read_master_at(journal, master_offset, header.nonce)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemVfs, Vfs};

    fn page_image(fill: u8) -> Vec<u8> {
        vec![fill; PAGE_SIZE]
    }

    fn setup() -> (MemVfs, crate::io::mem::MemFile, crate::io::mem::MemFile) {
        let vfs = MemVfs::new();
        let db = vfs.open(Path::new("db"), true).unwrap();
        let journal = vfs.open(Path::new("db-journal"), true).unwrap();
        (vfs, db, journal)
    }

    #[test]
    fn playback_restores_pre_images_and_truncates() {
        let (_vfs, mut db, journal_file) = setup();

        db.write_at(page_offset(1), &page_image(0xAA)).unwrap();
        db.write_at(page_offset(2), &page_image(0xBB)).unwrap();

        let mut journal = Journal::create(journal_file, 2).unwrap();
        journal.append(1, &page_image(0xAA)).unwrap();
        journal.append(2, &page_image(0xBB)).unwrap();
        journal.sync().unwrap();

        // "Transaction" scribbles over both pages and grows the file.
        db.write_at(page_offset(1), &page_image(0x11)).unwrap();
        db.write_at(page_offset(2), &page_image(0x22)).unwrap();
        db.write_at(page_offset(3), &page_image(0x33)).unwrap();

        let report = journal.playback(&mut db).unwrap();
        assert_eq!(report.records_applied, 2);
        assert_eq!(report.master, None);

        let mut buf = page_image(0);
        db.read_at(page_offset(1), &mut buf).unwrap();
        assert_eq!(buf, page_image(0xAA));
        db.read_at(page_offset(2), &mut buf).unwrap();
        assert_eq!(buf, page_image(0xBB));
        assert_eq!(db.len().unwrap(), 2 * PAGE_SIZE as u64);
    }

    #[test]
    fn playback_is_idempotent() {
        let (_vfs, mut db, journal_file) = setup();

        db.write_at(page_offset(1), &page_image(0xAA)).unwrap();

        let mut journal = Journal::create(journal_file, 1).unwrap();
        journal.append(1, &page_image(0xAA)).unwrap();
        journal.sync().unwrap();

        db.write_at(page_offset(1), &page_image(0x11)).unwrap();

        let first = journal.playback(&mut db).unwrap();
        let mut snapshot = page_image(0);
        db.read_at(page_offset(1), &mut snapshot).unwrap();

        let second = journal.playback(&mut db).unwrap();
        let mut again = page_image(0);
        db.read_at(page_offset(1), &mut again).unwrap();

        assert_eq!(first.records_applied, second.records_applied);
        assert_eq!(snapshot, again);
    }

    #[test]
    fn unsynced_records_are_ignored() {
        let (_vfs, mut db, journal_file) = setup();

        db.write_at(page_offset(1), &page_image(0xAA)).unwrap();

        let mut journal = Journal::create(journal_file, 1).unwrap();
        journal.append(1, &page_image(0xAA)).unwrap();
        // No sync: header still says zero records.

        db.write_at(page_offset(1), &page_image(0x11)).unwrap();

        let report = journal.playback(&mut db).unwrap();
        assert_eq!(report.records_applied, 0);

        let mut buf = page_image(0);
        db.read_at(page_offset(1), &mut buf).unwrap();
        assert_eq!(buf, page_image(0x11), "unsynced journal must not roll back");
    }

    #[test]
    fn corrupt_record_stops_playback_without_error() {
        let vfs = MemVfs::new();
        let mut db = vfs.open(Path::new("db"), true).unwrap();
        let journal_file = vfs.open(Path::new("db-journal"), true).unwrap();

        db.write_at(page_offset(1), &page_image(0xAA)).unwrap();
        db.write_at(page_offset(2), &page_image(0xBB)).unwrap();

        let mut journal = Journal::create(journal_file, 2).unwrap();
        journal.append(1, &page_image(0xAA)).unwrap();
        journal.append(2, &page_image(0xBB)).unwrap();
        journal.sync().unwrap();

        // Flip a byte in the second record's image.
        let mut raw = vfs.snapshot(Path::new("db-journal")).unwrap();
        let corrupt_at = JOURNAL_HEADER_SIZE + JOURNAL_RECORD_SIZE + 100;
        raw[corrupt_at] ^= 0xFF;
        let mut handle = vfs.open(Path::new("db-journal"), false).unwrap();
        handle.write_at(0, &raw).unwrap();

        db.write_at(page_offset(1), &page_image(0x11)).unwrap();
        db.write_at(page_offset(2), &page_image(0x22)).unwrap();

        let mut journal_again = vfs.open(Path::new("db-journal"), false).unwrap();
        let report = playback_file(&mut journal_again, &mut db).unwrap();

        assert_eq!(report.records_applied, 1);

        let mut buf = page_image(0);
        db.read_at(page_offset(1), &mut buf).unwrap();
        assert_eq!(buf, page_image(0xAA), "first record applied");
    }

    #[test]
    fn master_record_round_trips() {
        let (_vfs, _db, journal_file) = setup();

        let mut journal = Journal::create(journal_file, 1).unwrap();
        journal.append(5, &page_image(1)).unwrap();
        journal.write_master(Path::new("/tmp/master-journal")).unwrap();
        journal.sync().unwrap();

        let mut file = journal.into_file();
        let master = read_master(&mut file).unwrap();

        assert_eq!(master, Some(PathBuf::from("/tmp/master-journal")));
    }

    #[test]
    fn empty_or_garbage_journal_is_a_no_op() {
        let vfs = MemVfs::new();
        let mut db = vfs.open(Path::new("db"), true).unwrap();
        let mut journal = vfs.open(Path::new("db-journal"), true).unwrap();

        let report = playback_file(&mut journal, &mut db).unwrap();
        assert_eq!(report, PlaybackReport::default());

        journal.write_at(0, b"not a journal header here...").unwrap();
        let report = playback_file(&mut journal, &mut db).unwrap();
        assert_eq!(report.records_applied, 0);
    }
}
