//! # CFDP user
//!
//! The [CfdpUser] receives all CFDP indications of an entity. Every method has a default
//! implementation which only logs the indication, so applications only implement the
//! indications they are interested in.
use std::string::String;
use std::vec::Vec;

use log::{info, warn};

use crate::machine::TransactionStatusReport;
use crate::pdu::user_msg::MessageToUser;
use crate::pdu::{ConditionCode, DeliveryCode, FileStatus};
use crate::TransactionId;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TransactionFinishedParams {
    pub id: TransactionId,
    pub condition_code: ConditionCode,
    pub delivery_code: DeliveryCode,
    pub file_status: FileStatus,
}

#[derive(Debug)]
pub struct MetadataReceivedParams<'a> {
    pub id: TransactionId,
    pub source_id: u64,
    pub file_size: u64,
    pub src_file_name: Option<&'a str>,
    pub dest_file_name: Option<&'a str>,
    pub msgs_to_user: &'a [MessageToUser],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedMetadataRecvdParams {
    pub id: TransactionId,
    pub source_id: u64,
    pub file_size: u64,
    pub src_file_name: Option<String>,
    pub dest_file_name: Option<String>,
    pub msgs_to_user: Vec<MessageToUser>,
}

impl From<&MetadataReceivedParams<'_>> for OwnedMetadataRecvdParams {
    fn from(value: &MetadataReceivedParams) -> Self {
        Self {
            id: value.id,
            source_id: value.source_id,
            file_size: value.file_size,
            src_file_name: value.src_file_name.map(String::from),
            dest_file_name: value.dest_file_name.map(String::from),
            msgs_to_user: value.msgs_to_user.to_vec(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileSegmentRecvdParams {
    pub id: TransactionId,
    pub offset: u64,
    pub length: usize,
}

/// Result of a directory listing request which was answered by a remote entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryListingResponseParams {
    pub id: TransactionId,
    pub successful: bool,
    pub directory: String,
    pub listing_file: String,
}

/// CFDP indications as specified in chapter 3.5 of the CFDP standard.
///
/// All indications are issued from the worker threads of the entity, so implementations should
/// return quickly.
pub trait CfdpUser: Send {
    fn transaction_indication(&mut self, id: &TransactionId) {
        info!("{id}: transaction indication");
    }

    fn eof_sent_indication(&mut self, id: &TransactionId) {
        info!("{id}: EOF sent");
    }

    fn transaction_finished_indication(&mut self, finished_params: &TransactionFinishedParams) {
        info!(
            "{}: transaction finished with condition code {:?}, delivery code {:?} and file status {:?}",
            finished_params.id,
            finished_params.condition_code,
            finished_params.delivery_code,
            finished_params.file_status
        );
    }

    fn metadata_recvd_indication(&mut self, md_recvd_params: &MetadataReceivedParams) {
        info!(
            "{}: metadata received, source file {:?}, destination file {:?}",
            md_recvd_params.id, md_recvd_params.src_file_name, md_recvd_params.dest_file_name
        );
    }

    fn file_segment_recvd_indication(&mut self, segment_recvd_params: &FileSegmentRecvdParams) {
        info!(
            "{}: file segment received at offset {} with length {}",
            segment_recvd_params.id, segment_recvd_params.offset, segment_recvd_params.length
        );
    }

    fn report_indication(&mut self, report: &TransactionStatusReport) {
        info!("{}: report {:?}", report.id, report);
    }

    fn suspended_indication(&mut self, id: &TransactionId, condition_code: ConditionCode) {
        info!("{id}: suspended with condition code {condition_code:?}");
    }

    fn resumed_indication(&mut self, id: &TransactionId, progress: u64) {
        info!("{id}: resumed at progress {progress}");
    }

    fn fault_indication(
        &mut self,
        id: &TransactionId,
        condition_code: ConditionCode,
        progress: u64,
    ) {
        warn!("{id}: fault {condition_code:?} at progress {progress}");
    }

    fn abandoned_indication(
        &mut self,
        id: &TransactionId,
        condition_code: ConditionCode,
        progress: u64,
    ) {
        warn!("{id}: abandoned with condition code {condition_code:?} at progress {progress}");
    }

    fn eof_recvd_indication(&mut self, id: &TransactionId) {
        info!("{id}: EOF received");
    }

    fn directory_listing_response_indication(&mut self, params: &DirectoryListingResponseParams) {
        info!(
            "{}: directory listing of {} written to {}, successful: {}",
            params.id, params.directory, params.listing_file, params.successful
        );
    }
}

/// User which only logs the indications.
#[derive(Debug, Default, Copy, Clone)]
pub struct LoggingUser;

impl CfdpUser for LoggingUser {}
