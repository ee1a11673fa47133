use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Frame one event as `[len][bincode][crc32]`. Returns the frame size.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(payload.len() as u64 + 8)
}

/// Read the next frame. `Ok(None)` at a clean end of file or a torn tail.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    let mut crc_buf = [0u8; 4];
    for buf in [&mut payload[..], &mut crc_buf[..]] {
        match reader.read_exact(buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}

/// Append-only write-ahead log of studio events.
///
/// Each record is `[u32 len][bincode Event][u32 crc32]`, little endian. A
/// torn or corrupt record ends replay; everything before it is kept.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length covered by the last successful fsync.
    durable_len: u64,
    /// Frames and bytes buffered since then.
    pending_appends: u64,
    pending_len: u64,
    /// A failed batch may have left bytes in the buffer or the file.
    dirty: bool,
    #[cfg(test)]
    fail_next_flush: bool,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let durable_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            durable_len,
            pending_appends: 0,
            pending_len: 0,
            dirty: false,
            #[cfg(test)]
            fail_next_flush: false,
        })
    }

    /// Append and fsync one event.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event; durable only after [`Wal::flush_sync`].
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.pending_len += encode_event(&mut self.writer, event)?;
        self.pending_appends += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        #[cfg(test)]
        if std::mem::take(&mut self.fail_next_flush) {
            // Half the buffer reaches the file, the rest stays buffered.
            let torn = self.writer.buffer()[..self.writer.buffer().len() / 2].to_vec();
            self.writer.get_mut().write_all(&torn)?;
            return Err(io::Error::other("injected flush failure"));
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.durable_len += std::mem::take(&mut self.pending_len);
        self.appends_since_compact += std::mem::take(&mut self.pending_appends);
        Ok(())
    }

    /// Append and fsync a batch as a unit. On failure nothing of the batch
    /// survives: the buffer is discarded and the file cut back to its last
    /// durable length, so a later batch cannot carry the rejected records.
    pub fn commit<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) -> io::Result<()> {
        if self.dirty {
            self.rollback()?;
        }
        let result = events
            .into_iter()
            .try_for_each(|event| self.append_buffered(event))
            .and_then(|()| self.flush_sync());
        if let Err(e) = result {
            self.dirty = true;
            if let Err(rollback_err) = self.rollback() {
                warn!(error = %rollback_err, "WAL rollback failed, retrying before the next batch");
            }
            return Err(e);
        }
        Ok(())
    }

    fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the file without flushing what is buffered.
        let _ = stale.into_parts();
        self.writer.get_ref().set_len(self.durable_len)?;
        self.writer.get_ref().sync_all()?;
        self.pending_appends = 0;
        self.pending_len = 0;
        self.dirty = false;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the compacted event list to a side file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let file = File::create(Self::compact_path(path))?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the side file over the log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.durable_len = file.metadata()?.len();
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let _ = stale.into_parts();
        self.appends_since_compact = 0;
        self.pending_appends = 0;
        self.pending_len = 0;
        self.dirty = false;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every intact event in the log, oldest first. A missing file is an
    /// empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::scan(path)?.events)
    }

    /// Replay, then cut a torn or corrupt tail off the file so the next
    /// append lands right after the last intact record.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let scan = Self::scan(path)?;
        if scan.intact_len < scan.file_len {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(scan.intact_len)?;
            file.sync_all()?;
            warn!(
                path = %path.display(),
                kept = scan.events.len(),
                discarded_bytes = scan.file_len - scan.intact_len,
                "truncated torn WAL tail"
            );
        }
        Ok(scan.events)
    }

    fn scan(path: &Path) -> io::Result<Scan> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Scan {
                    events: Vec::new(),
                    intact_len: 0,
                    file_len: 0,
                });
            }
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut intact_len: u64 = 0;

        while let Some(payload) = read_frame(&mut reader)? {
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
            intact_len += payload.len() as u64 + 8;
        }

        if intact_len < file_len {
            warn!(
                path = %path.display(),
                kept = events.len(),
                discarded_bytes = file_len - intact_len,
                "WAL has a torn or corrupt tail, ignoring it"
            );
        }
        Ok(Scan {
            events,
            intact_len,
            file_len,
        })
    }
}

struct Scan {
    events: Vec<Event>,
    /// Bytes up to the end of the last intact record.
    intact_len: u64,
    file_len: u64,
}
