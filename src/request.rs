use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::pdu::tlv::{FaultHandlerOverride, FilestoreRequest, MetadataOption};
use crate::pdu::user_msg::MessageToUser;
use crate::pdu::{ChecksumType, TransmissionMode};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PutRequestError {
    #[error("file path with {0} bytes exceeds the maximum of 255 bytes")]
    FilePathTooLarge(usize),
    #[error("destination file name without a source file name")]
    MissingSourceFile,
    #[error("checksum type {0:?} is not supported")]
    UnsupportedChecksumType(ChecksumType),
}

/// Put request as specified in chapter 3.4.1 of the CFDP standard.
///
/// A put request without a source file only transfers the metadata options: filestore requests,
/// messages to user and fault handler overrides. Fields set to [None] take their values from the
/// remote entity configuration of the destination entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    pub destination_id: u64,
    source_file: Option<String>,
    dest_file: Option<String>,
    pub trans_mode: Option<TransmissionMode>,
    pub closure_requested: Option<bool>,
    pub checksum_type: Option<ChecksumType>,
    pub msgs_to_user: Vec<MessageToUser>,
    pub fault_handler_overrides: Vec<FaultHandlerOverride>,
    pub fs_requests: Vec<FilestoreRequest>,
}

pub fn generic_path_checks(
    source_file: Option<&str>,
    dest_file: Option<&str>,
) -> Result<(), PutRequestError> {
    for file in [source_file, dest_file].into_iter().flatten() {
        if file.len() > u8::MAX as usize {
            return Err(PutRequestError::FilePathTooLarge(file.len()));
        }
    }
    Ok(())
}

impl PutRequest {
    /// The destination file name defaults to the source file name.
    pub fn new(
        destination_id: u64,
        source_file: Option<&str>,
        dest_file: Option<&str>,
        trans_mode: Option<TransmissionMode>,
        closure_requested: Option<bool>,
    ) -> Result<Self, PutRequestError> {
        generic_path_checks(source_file, dest_file)?;
        if source_file.is_none() && dest_file.is_some() {
            return Err(PutRequestError::MissingSourceFile);
        }
        Ok(Self {
            destination_id,
            source_file: source_file.map(ToString::to_string),
            dest_file: dest_file.or(source_file).map(ToString::to_string),
            trans_mode,
            closure_requested,
            checksum_type: None,
            msgs_to_user: Vec::new(),
            fault_handler_overrides: Vec::new(),
            fs_requests: Vec::new(),
        })
    }

    pub fn new_regular_request(
        dest_id: u64,
        source_file: &str,
        dest_file: &str,
        trans_mode: Option<TransmissionMode>,
        closure_requested: Option<bool>,
    ) -> Result<Self, PutRequestError> {
        Self::new(
            dest_id,
            Some(source_file),
            Some(dest_file),
            trans_mode,
            closure_requested,
        )
    }

    pub fn new_msgs_to_user_only(dest_id: u64, msgs_to_user: Vec<MessageToUser>) -> Self {
        Self {
            destination_id: dest_id,
            source_file: None,
            dest_file: None,
            trans_mode: None,
            closure_requested: None,
            checksum_type: None,
            msgs_to_user,
            fault_handler_overrides: Vec::new(),
            fs_requests: Vec::new(),
        }
    }

    pub fn with_checksum_type(mut self, checksum_type: ChecksumType) -> Self {
        self.checksum_type = Some(checksum_type);
        self
    }

    pub fn with_msgs_to_user(mut self, msgs_to_user: Vec<MessageToUser>) -> Self {
        self.msgs_to_user = msgs_to_user;
        self
    }

    pub fn with_fs_requests(mut self, fs_requests: Vec<FilestoreRequest>) -> Self {
        self.fs_requests = fs_requests;
        self
    }

    pub fn with_fault_handler_overrides(
        mut self,
        fault_handler_overrides: Vec<FaultHandlerOverride>,
    ) -> Self {
        self.fault_handler_overrides = fault_handler_overrides;
        self
    }

    pub fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }

    pub fn dest_file(&self) -> Option<&str> {
        self.dest_file.as_deref()
    }

    pub fn is_file_transfer(&self) -> bool {
        self.source_file.is_some()
    }

    /// All options in the order they are placed inside the Metadata PDU.
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
            .chain(
                self.msgs_to_user
                    .iter()
                    .cloned()
                    .map(MetadataOption::MsgToUser),
            )
            .collect()
    }
}
