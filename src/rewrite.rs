//! Whole-log mutation: stream the log through a per-line transform into a
//! temporary file, then rename it over the original.
//!
//! Callers must hold the queue lock. Readers only ever see the log before or
//! after the rename, never a half-written file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use crate::layout::TEMP_PREFIX;
use crate::message::Message;
use crate::{Error, MalformedRecord, Result};

/// What to write in place of one log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineAction {
    /// Copy the original line unchanged.
    Keep,
    /// Write this record instead.
    Replace(Message),
    /// Write nothing.
    Remove,
}

/// Rewrites the log at `log_path` through `transform`.
///
/// Any error, including a line that fails to decode, leaves the log untouched
/// and removes the temporary file.
pub fn rewrite<F>(queue_dir: &Path, log_path: &Path, fsync: bool, mut transform: F) -> Result<()>
where
    F: FnMut(&Message) -> LineAction,
{
    let permissions = fs::metadata(log_path)?.permissions();
    let tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(queue_dir)?;
    // The temp file is created 0600; the log keeps whatever mode it had.
    tmp.as_file().set_permissions(permissions)?;

    {
        let mut writer = BufWriter::new(tmp.as_file());
        for_each_record(log_path, |line, message| {
            match transform(&message) {
                LineAction::Keep => write_line(&mut writer, line)?,
                LineAction::Replace(replacement) => {
                    write_line(&mut writer, &replacement.encode())?
                }
                LineAction::Remove => {}
            }
            Ok(())
        })?;
        writer.flush()?;
    }

    if fsync {
        tmp.as_file().sync_all()?;
    }
    tmp.persist(log_path).map_err(|err| Error::Io(err.error))?;
    Ok(())
}

/// Appends one record to the end of the log, creating it if needed.
pub fn append(log_path: &Path, message: &Message, fsync: bool) -> Result<()> {
    let mut line = message.encode();
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    // One write per record so concurrent appenders never interleave a line.
    file.write_all(line.as_bytes())?;
    if fsync {
        file.sync_data()?;
    }
    Ok(())
}

/// Decodes every record of the log in order without modifying it.
pub fn scan<F>(log_path: &Path, mut visit: F) -> Result<()>
where
    F: FnMut(&Message),
{
    for_each_record(log_path, |_, message| {
        visit(&message);
        Ok(())
    })
}

/// Decodes the log line by line, handing each raw line and its record to
/// `visit`. Lines are read as bytes so invalid UTF-8 is a malformed record
/// rather than an I/O error.
fn for_each_record<F>(log_path: &Path, mut visit: F) -> Result<()>
where
    F: FnMut(&str, Message) -> Result<()>,
{
    let reader = BufReader::new(File::open(log_path)?);
    for (index, bytes) in reader.split(b'\n').enumerate() {
        let bytes = bytes?;
        let malformed = |source: MalformedRecord| Error::MalformedRecord {
            line: index + 1,
            source,
        };
        let line = std::str::from_utf8(&bytes)
            .map_err(|_| malformed(MalformedRecord::new("line is not valid UTF-8")))?;
        let line = line.strip_suffix('\r').unwrap_or(line);
        let message = Message::decode(line).map_err(malformed)?;
        visit(line, message)?;
    }
    Ok(())
}

fn write_line<W: Write>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")
}

/// Leases the first visible record of a pass; everything else is kept.
#[derive(Debug)]
pub struct PullTransform {
    now_millis: u64,
    visibility_timeout: Duration,
    pulled: Option<Message>,
}

impl PullTransform {
    pub fn new(now_millis: u64, visibility_timeout: Duration) -> Self {
        Self {
            now_millis,
            visibility_timeout,
            pulled: None,
        }
    }

    pub fn apply(&mut self, message: &Message) -> LineAction {
        if self.pulled.is_some() || !message.is_visible(self.now_millis) {
            return LineAction::Keep;
        }
        let leased = message.redeliver(self.now_millis, self.visibility_timeout);
        self.pulled = Some(leased.clone());
        LineAction::Replace(leased)
    }

    pub fn into_pulled(self) -> Option<Message> {
        self.pulled
    }
}

/// Removes the live lease matching a receipt handle.
#[derive(Debug)]
pub struct DeleteTransform<'a> {
    receipt_handle: &'a str,
    now_millis: u64,
    deleted: usize,
}

impl<'a> DeleteTransform<'a> {
    pub fn new(receipt_handle: &'a str, now_millis: u64) -> Self {
        Self {
            receipt_handle,
            now_millis,
            deleted: 0,
        }
    }

    pub fn apply(&mut self, message: &Message) -> LineAction {
        if message.holds_lease(self.receipt_handle, self.now_millis) {
            self.deleted += 1;
            LineAction::Remove
        } else {
            LineAction::Keep
        }
    }

    pub fn deleted(&self) -> usize {
        self.deleted
    }
}
