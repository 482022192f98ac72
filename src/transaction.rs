//! Per transaction data shared by all state machines.
use std::boxed::Box;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::string::String;
use std::vec;
use std::vec::Vec;

use log::warn;

use crate::filestore::{calculate_checksum, FileHandle, FilestoreError, OpenMode, VirtualFilestore};
use crate::pdu::tlv::{FaultHandlerOverride, FilestoreRequest, MetadataOption};
use crate::pdu::user_msg::MessageToUser;
use crate::pdu::{
    ChecksumType, ConditionCode, FaultHandlerCode, MetadataPduOwned, TransmissionMode,
};
use crate::{FaultHandlerTable, TransactionId};

const CHECKSUM_BUF_LEN: usize = 4096;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransactionError {
    #[error("no file is open")]
    NoFileHandle,
    #[error("offset {offset} is beyond the file size {file_size}")]
    OutOfRange { offset: u64, file_size: u64 },
    #[error("read {found} instead of {expected} bytes at offset {offset}")]
    ShortRead {
        offset: u64,
        expected: u64,
        found: u64,
    },
    #[error("filestore error: {0}")]
    Filestore(#[from] FilestoreError),
}

impl From<io::Error> for TransactionError {
    fn from(value: io::Error) -> Self {
        TransactionError::Filestore(value.into())
    }
}

/// Transfer parameters of one transaction together with the open file of the transaction.
///
/// The sending side reads its source file sequentially with a cursor which can be overridden
/// for retransmissions. The receiving side writes all file data into an anonymous temporary file
/// which is only copied to the destination once the transfer was completed successfully.
pub struct Transaction {
    id: TransactionId,
    pub dest_entity_id: u64,
    pub transmission_mode: TransmissionMode,
    pub source_file: Option<String>,
    pub dest_file: Option<String>,
    pub checksum_type: ChecksumType,
    pub closure_requested: bool,
    pub fault_handler_overrides: Vec<FaultHandlerOverride>,
    pub msgs_to_user: Vec<MessageToUser>,
    pub fs_requests: Vec<FilestoreRequest>,
    pub max_file_segment_len: u64,
    file_handle: Option<Box<dyn FileHandle>>,
    file_size: Option<u64>,
    file_checksum: Option<u32>,
    cursor: u64,
}

impl core::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("dest_entity_id", &self.dest_entity_id)
            .field("transmission_mode", &self.transmission_mode)
            .field("source_file", &self.source_file)
            .field("dest_file", &self.dest_file)
            .field("checksum_type", &self.checksum_type)
            .field("file_open", &self.file_handle.is_some())
            .field("file_size", &self.file_size)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl Transaction {
    pub fn new(
        id: TransactionId,
        dest_entity_id: u64,
        transmission_mode: TransmissionMode,
        max_file_segment_len: u64,
    ) -> Self {
        Self {
            id,
            dest_entity_id,
            transmission_mode,
            source_file: None,
            dest_file: None,
            checksum_type: ChecksumType::NullChecksum,
            closure_requested: false,
            fault_handler_overrides: Vec::new(),
            msgs_to_user: Vec::new(),
            fs_requests: Vec::new(),
            max_file_segment_len,
            file_handle: None,
            file_size: None,
            file_checksum: None,
            cursor: 0,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn is_file_transfer(&self) -> bool {
        self.source_file.as_deref().is_some_and(|file| !file.is_empty())
    }

    /// Take over the transfer parameters announced by a received Metadata PDU.
    pub fn apply_metadata(&mut self, metadata: &MetadataPduOwned) {
        self.source_file = metadata.source_file_name.clone();
        self.dest_file = metadata.dest_file_name.clone();
        self.checksum_type = metadata.params.checksum_type;
        self.closure_requested = metadata.params.closure_requested;
        self.fault_handler_overrides = metadata.fault_handler_overrides().copied().collect();
        self.msgs_to_user = metadata.messages_to_user().cloned().collect();
        self.fs_requests = metadata.filestore_requests().cloned().collect();
        self.file_size = Some(metadata.params.file_size);
    }

    /// Size of the source file, determined once. A missing source file has the size 0.
    pub fn file_size(&mut self, filestore: &dyn VirtualFilestore) -> u64 {
        if let Some(file_size) = self.file_size {
            return file_size;
        }
        let file_size = match self.source_file.as_deref() {
            Some(source_file) if !source_file.is_empty() => {
                filestore.file_size(source_file).unwrap_or_else(|e| {
                    warn!("{}: size of {source_file} unknown: {e}", self.id);
                    0
                })
            }
            _ => 0,
        };
        self.file_size = Some(file_size);
        file_size
    }

    pub fn cached_file_size(&self) -> Option<u64> {
        self.file_size
    }

    pub fn set_file_size(&mut self, file_size: u64) {
        self.file_size = Some(file_size);
    }

    /// Checksum of the source file, calculated once.
    pub fn file_checksum(
        &mut self,
        filestore: &dyn VirtualFilestore,
    ) -> Result<u32, FilestoreError> {
        if let Some(checksum) = self.file_checksum {
            return Ok(checksum);
        }
        let file_size = self.file_size(filestore);
        let checksum = match self.source_file.as_deref() {
            Some(source_file) if !source_file.is_empty() => filestore.calculate_checksum(
                source_file,
                self.checksum_type,
                file_size,
                &mut [0; CHECKSUM_BUF_LEN],
            )?,
            _ => 0,
        };
        self.file_checksum = Some(checksum);
        Ok(checksum)
    }

    pub fn open_source_file(
        &mut self,
        filestore: &dyn VirtualFilestore,
    ) -> Result<(), FilestoreError> {
        let source_file = self
            .source_file
            .as_deref()
            .ok_or(FilestoreError::FileDoesNotExist)?;
        if !filestore.is_file(source_file)? {
            return Err(FilestoreError::IsNotFile);
        }
        self.file_handle = Some(filestore.open(source_file, OpenMode::Read)?);
        Ok(())
    }

    pub fn open_tempfile(
        &mut self,
        filestore: &dyn VirtualFilestore,
    ) -> Result<(), FilestoreError> {
        self.file_handle = Some(filestore.open_tempfile()?);
        Ok(())
    }

    pub fn is_file_open(&self) -> bool {
        self.file_handle.is_some()
    }

    pub fn close_file(&mut self) {
        self.file_handle = None;
    }

    /// Read the next file segment.
    ///
    /// Without an explicit offset the segment starts at the cursor, which is advanced by the
    /// segment length. Explicit offsets are used for retransmissions and leave the cursor
    /// untouched. Returns the offset together with the data.
    pub fn read_segment(
        &mut self,
        offset: Option<u64>,
        len: Option<u64>,
    ) -> Result<(u64, Vec<u8>), TransactionError> {
        let file_size = self.file_size.unwrap_or(0);
        let len = len.unwrap_or(self.max_file_segment_len);
        let advance_cursor = offset.is_none();
        let offset = offset.unwrap_or(self.cursor);
        if offset > file_size {
            return Err(TransactionError::OutOfRange { offset, file_size });
        }
        let handle = self
            .file_handle
            .as_mut()
            .ok_or(TransactionError::NoFileHandle)?;
        let read_len = len.min(file_size - offset);
        handle.seek(SeekFrom::Start(offset))?;
        let mut data = Vec::with_capacity(read_len as usize);
        handle.take(read_len).read_to_end(&mut data)?;
        // The file shrank below the announced size.
        if (data.len() as u64) < read_len {
            return Err(TransactionError::ShortRead {
                offset,
                expected: read_len,
                found: data.len() as u64,
            });
        }
        if advance_cursor {
            self.cursor = offset + len;
        }
        Ok((offset, data))
    }

    pub fn write_segment(&mut self, offset: u64, data: &[u8]) -> Result<(), TransactionError> {
        let handle = self
            .file_handle
            .as_mut()
            .ok_or(TransactionError::NoFileHandle)?;
        handle.seek(SeekFrom::Start(offset))?;
        handle.write_all(data)?;
        Ok(())
    }

    pub fn is_send_complete(&self) -> bool {
        self.cursor >= self.file_size.unwrap_or(0)
    }

    /// Amount of file data sent so far.
    pub fn send_progress(&self) -> u64 {
        self.cursor.min(self.file_size.unwrap_or(0))
    }

    /// Checksum of the first `size` bytes of the open file.
    pub fn checksum_of_open_file(&mut self, size: u64) -> Result<u32, TransactionError> {
        let checksum_type = self.checksum_type;
        let handle = self
            .file_handle
            .as_mut()
            .ok_or(TransactionError::NoFileHandle)?;
        handle.seek(SeekFrom::Start(0))?;
        Ok(calculate_checksum(
            handle,
            checksum_type,
            size,
            &mut vec![0; CHECKSUM_BUF_LEN],
        )?)
    }

    /// Copy the content of the open file to the given destination, replacing existing files.
    pub fn copy_open_file_to(
        &mut self,
        filestore: &dyn VirtualFilestore,
        dest_file: &str,
    ) -> Result<u64, TransactionError> {
        let handle = self
            .file_handle
            .as_mut()
            .ok_or(TransactionError::NoFileHandle)?;
        handle.seek(SeekFrom::Start(0))?;
        let mut dest = filestore.open(dest_file, OpenMode::Write)?;
        let copied = io::copy(handle, &mut dest)?;
        dest.flush()?;
        Ok(copied)
    }

    /// Options of the Metadata PDU which starts the transaction.
    pub fn metadata_options(&self) -> Vec<MetadataOption> {
        self.fault_handler_overrides
            .iter()
            .map(|fh_override| MetadataOption::FaultHandlerOverride(*fh_override))
            .chain(
                self.fs_requests
                    .iter()
                    .cloned()
                    .map(MetadataOption::FilestoreRequest),
            )
            .chain(self.msgs_to_user.iter().cloned().map(MetadataOption::MsgToUser))
            .collect()
    }

    /// Fault handler overrides of the transaction take precedence over the entity defaults.
    pub fn fault_handler_for(
        &self,
        condition_code: ConditionCode,
        defaults: &FaultHandlerTable,
    ) -> FaultHandlerCode {
        self.fault_handler_overrides
            .iter()
            .find(|fh_override| fh_override.condition_code == condition_code)
            .map(|fh_override| fh_override.handler_code)
            .unwrap_or_else(|| defaults.get_fault_handler(condition_code))
    }
}
