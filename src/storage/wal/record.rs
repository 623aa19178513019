//! Log record layout and codec.
//!
//! Every record on disk is
//! `tag: i32 | txn: i64 | payload | start offset: i64`, big-endian. The
//! trailing start offset lets a reader walk the log backward one record at a
//! time without an index.

use std::fmt;
use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{PageId, PageImage};
use crate::storage::PAGE_SIZE;
use crate::transaction::TransactionId;

pub const ABORT_RECORD: i32 = 1;
pub const COMMIT_RECORD: i32 = 2;
pub const UPDATE_RECORD: i32 = 3;
pub const BEGIN_RECORD: i32 = 4;
pub const CHECKPOINT_RECORD: i32 = 5;
pub const CLR_RECORD: i32 = 6;

/// File header: offset of the last checkpoint record.
pub const HEADER_SIZE: u64 = 8;

/// Header value meaning no checkpoint has been taken.
pub const NO_CHECKPOINT: i64 = -1;

const TAG_SIZE: u64 = 4;
const TXN_SIZE: u64 = 8;
const TRAILER_SIZE: u64 = 8;
const IMAGE_SIZE: u64 = 4 + 4 + PAGE_SIZE as u64;
const MAX_PREALLOCATED_IDS: usize = 1024;

/// What a record says happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecordKind {
    Begin,
    Commit,
    Abort,
    Update { before: PageImage, after: PageImage },
    /// Compensation: the image installed by one undo step. Redo-only.
    Clr { after: PageImage },
    Checkpoint { active: Vec<TransactionId> },
}

impl LogRecordKind {
    pub fn tag(&self) -> i32 {
        match self {
            Self::Begin => BEGIN_RECORD,
            Self::Commit => COMMIT_RECORD,
            Self::Abort => ABORT_RECORD,
            Self::Update { .. } => UPDATE_RECORD,
            Self::Clr { .. } => CLR_RECORD,
            Self::Checkpoint { .. } => CHECKPOINT_RECORD,
        }
    }

    fn payload_len(&self) -> u64 {
        match self {
            Self::Begin | Self::Commit | Self::Abort => 0,
            Self::Update { .. } => 2 * IMAGE_SIZE,
            Self::Clr { .. } => IMAGE_SIZE,
            Self::Checkpoint { active } => 4 + 8 * active.len() as u64,
        }
    }
}

/// A log record together with the file offset where it begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub offset: u64,
    pub txn: TransactionId,
    pub kind: LogRecordKind,
}

impl LogRecord {
    pub fn new(offset: u64, txn: TransactionId, kind: LogRecordKind) -> Self {
        Self { offset, txn, kind }
    }

    /// Bytes this record occupies on disk, trailer included.
    pub fn encoded_len(&self) -> u64 {
        TAG_SIZE + TXN_SIZE + self.kind.payload_len() + TRAILER_SIZE
    }

    /// Offset of the record that follows this one.
    pub fn next_offset(&self) -> u64 {
        self.offset + self.encoded_len()
    }

    /// The page an UPDATE or CLR touches.
    pub fn page_id(&self) -> Option<PageId> {
        match &self.kind {
            LogRecordKind::Update { after, .. } | LogRecordKind::Clr { after } => {
                Some(after.page_id())
            }
            _ => None,
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_i32::<BigEndian>(self.kind.tag())?;
        writer.write_i64::<BigEndian>(self.txn.value() as i64)?;
        match &self.kind {
            LogRecordKind::Begin | LogRecordKind::Commit | LogRecordKind::Abort => {}
            LogRecordKind::Update { before, after } => {
                write_image(writer, before)?;
                write_image(writer, after)?;
            }
            LogRecordKind::Clr { after } => write_image(writer, after)?,
            LogRecordKind::Checkpoint { active } => {
                writer.write_i32::<BigEndian>(active.len() as i32)?;
                for txn in active {
                    writer.write_i64::<BigEndian>(txn.value() as i64)?;
                }
            }
        }
        writer.write_i64::<BigEndian>(self.offset as i64)
    }

    /// Decodes the record that starts at `offset`; `reader` must be
    /// positioned there.
    ///
    /// A short read surfaces as `StorageError::Io` with
    /// `UnexpectedEof`, which callers use to detect a torn tail.
    pub fn read_from<R: Read>(reader: &mut R, offset: u64) -> StorageResult<Self> {
        let tag = reader.read_i32::<BigEndian>()?;
        let txn = TransactionId::new(reader.read_i64::<BigEndian>()? as u64);
        let kind = match tag {
            BEGIN_RECORD => LogRecordKind::Begin,
            COMMIT_RECORD => LogRecordKind::Commit,
            ABORT_RECORD => LogRecordKind::Abort,
            UPDATE_RECORD => {
                let before = read_image(reader)?;
                let after = read_image(reader)?;
                LogRecordKind::Update { before, after }
            }
            CLR_RECORD => LogRecordKind::Clr {
                after: read_image(reader)?,
            },
            CHECKPOINT_RECORD => {
                let count = reader.read_i32::<BigEndian>()?;
                if count < 0 {
                    return Err(StorageError::ConsistencyViolation(format!(
                        "negative checkpoint size {} at offset {}",
                        count, offset
                    )));
                }
                // The count is untrusted until the ids are actually read.
                let mut active = Vec::with_capacity((count as usize).min(MAX_PREALLOCATED_IDS));
                for _ in 0..count {
                    active.push(TransactionId::new(reader.read_i64::<BigEndian>()? as u64));
                }
                LogRecordKind::Checkpoint { active }
            }
            tag => return Err(StorageError::UnknownRecordType { tag, offset }),
        };

        let trailer = reader.read_i64::<BigEndian>()?;
        if trailer != offset as i64 {
            return Err(StorageError::ConsistencyViolation(format!(
                "record at offset {} has trailer {}",
                offset, trailer
            )));
        }

        Ok(Self { offset, txn, kind })
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.txn.value();
        match &self.kind {
            LogRecordKind::Begin => write!(f, "<T_{} BEGIN>", id),
            LogRecordKind::Commit => write!(f, "<T_{} COMMIT>", id),
            LogRecordKind::Abort => write!(f, "<T_{} ABORT>", id),
            LogRecordKind::Update { before, .. } => {
                write!(f, "<T_{} UPDATE pid={}>", id, before.page_id())
            }
            LogRecordKind::Clr { after } => write!(f, "<T_{} CLR pid={}>", id, after.page_id()),
            LogRecordKind::Checkpoint { active } => {
                let ids: Vec<u64> = active.iter().map(|t| t.value()).collect();
                write!(f, "<CHECKPOINT {:?}>", ids)
            }
        }
    }
}

fn write_image<W: Write>(writer: &mut W, image: &PageImage) -> io::Result<()> {
    let page_id = image.page_id();
    writer.write_i32::<BigEndian>(page_id.table_id as i32)?;
    writer.write_i32::<BigEndian>(page_id.page_no as i32)?;
    writer.write_all(image.data())
}

fn read_image<R: Read>(reader: &mut R) -> StorageResult<PageImage> {
    let table_id = reader.read_i32::<BigEndian>()? as u32;
    let page_no = reader.read_i32::<BigEndian>()? as u32;
    let mut data = Box::new([0u8; PAGE_SIZE]);
    reader.read_exact(&mut data[..])?;
    Ok(PageImage::new(PageId::new(table_id, page_no), data))
}
