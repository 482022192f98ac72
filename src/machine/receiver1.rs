//! Receiving side of an unacknowledged (class 1) transaction.
//!
//! File data is written into a temporary file. The EOF PDU completes the transaction: the file
//! size and the checksum are verified and the file is copied to its destination. Missing data
//! is never requested, only the inactivity timer protects against a silent sender.
use std::vec::Vec;

use log::{debug, error, warn};

use super::{MachineContext, MachineCore, MachineError, MachineState};
use crate::event::{Event, EventType};
use crate::filestore::FilestoreError;
use crate::pdu::{ConditionCode, DeliveryCode, FileStatus, Pdu, PduHeader, PduHeaderExt};
use crate::segments::ReceivedSegments;
use crate::timer::{Timer, TimerKind, TimerScheduler};
use crate::transaction::{Transaction, TransactionError};
use crate::user::{FileSegmentRecvdParams, MetadataReceivedParams};
use crate::{EntityConfig, EntityType};

#[derive(Debug)]
pub struct Receiver1 {
    pub(crate) core: MachineCore,
    segments: ReceivedSegments,
    inactivity_timer: Timer,
}

impl Receiver1 {
    /// Create the receiver for the transaction of the first received PDU.
    pub fn new(config: &EntityConfig, first_header: &PduHeader, scheduler: TimerScheduler) -> Self {
        let id = first_header.transaction_id();
        let transaction = Transaction::new(
            id,
            first_header.dest_entity_id(),
            first_header.common_pdu_conf().trans_mode,
            config.max_file_segment_len,
        );
        Self {
            core: MachineCore::new(
                transaction,
                MachineState::WaitForMetadata,
                DeliveryCode::Incomplete,
            ),
            segments: ReceivedSegments::new(),
            inactivity_timer: Timer::new(
                id,
                TimerKind::Inactivity,
                config.inactivity_timeout,
                None,
                scheduler,
            ),
        }
    }

    pub fn progress(&self) -> u64 {
        self.segments.progress()
    }

    pub(crate) fn timer_mut(&mut self, kind: TimerKind) -> Option<&mut Timer> {
        match kind {
            TimerKind::Inactivity => Some(&mut self.inactivity_timer),
            _ => None,
        }
    }

    pub fn handle(&mut self, ctx: &mut MachineContext, event: Event) -> Result<(), MachineError> {
        if event.pdu.is_some()
            && !self.core.suspended
            && self.core.state != MachineState::Completed
        {
            self.inactivity_timer.restart();
        }
        match (self.core.state, event.event_type) {
            (MachineState::Completed, _) => (),
            (MachineState::WaitForMetadata, EventType::E0EnteredState) => {
                self.inactivity_timer.restart();
            }
            (MachineState::WaitForMetadata, EventType::E10ReceivedMetadata) => {
                self.on_metadata(ctx, event.pdu)?;
            }
            (MachineState::WaitForMetadata, EventType::E12ReceivedEofNoError) => {
                warn!("{}: EOF received without metadata", self.core.id());
                self.core.issue_eof_recvd(ctx);
                self.finish(ctx);
            }
            (MachineState::WaitForEof, EventType::E11ReceivedFileData) => {
                self.on_file_data(ctx, event.pdu)?;
            }
            (MachineState::WaitForEof, EventType::E12ReceivedEofNoError) => {
                self.on_eof(ctx, event.pdu)?;
            }
            (_, EventType::E2AbandonTransaction) => {
                self.core.issue_abandoned(ctx, self.progress());
                self.shutdown();
            }
            (_, EventType::E3NoticeOfCancellation) => {
                self.core.file_status = FileStatus::DiscardDeliberately;
                self.finish(ctx);
            }
            (_, EventType::E4NoticeOfSuspension) => {
                if self.core.suspend(ctx) {
                    self.inactivity_timer.suspend();
                }
            }
            (_, EventType::E13ReceivedEofCancel) => {
                if let Some(Pdu::Eof(eof)) = &event.pdu {
                    self.core.condition_code = eof.condition_code();
                }
                self.core.issue_eof_recvd(ctx);
                self.core.file_status = FileStatus::DiscardDeliberately;
                self.finish(ctx);
            }
            (_, EventType::E27InactivityTimeout) => {
                self.inactivity_timer.restart();
                self.core
                    .declare_fault(ctx, ConditionCode::InactivityDetected, self.progress())?;
            }
            (_, EventType::E31ReceivedSuspendRequest) => self.core.request_suspension(ctx)?,
            (_, EventType::E32ReceivedResumeRequest) => {
                if self.core.resume(ctx, self.progress()) {
                    self.inactivity_timer.resume();
                }
            }
            (_, EventType::E33ReceivedCancelRequest) => self.core.request_cancellation(ctx)?,
            (_, EventType::E34ReceivedReportRequest) => {
                self.core
                    .issue_report(ctx, EntityType::Receiving, self.progress())
            }
            (state, event_type) => {
                debug!(
                    "{}: ignoring {:?} in state {:?}",
                    self.core.id(),
                    event_type,
                    state
                );
            }
        }
        Ok(())
    }

    fn on_metadata(
        &mut self,
        ctx: &mut MachineContext,
        pdu: Option<Pdu>,
    ) -> Result<(), MachineError> {
        let Some(Pdu::Metadata(metadata)) = pdu else {
            return Ok(());
        };
        self.core.transaction.apply_metadata(&metadata);
        let msgs_to_user: Vec<_> = metadata.messages_to_user().cloned().collect();
        ctx.user.metadata_recvd_indication(&MetadataReceivedParams {
            id: self.core.id(),
            source_id: metadata.header.source_entity_id(),
            file_size: metadata.params.file_size,
            src_file_name: metadata.source_file_name.as_deref(),
            dest_file_name: metadata.dest_file_name.as_deref(),
            msgs_to_user: &msgs_to_user,
        });
        self.core.state = MachineState::WaitForEof;
        if self.core.transaction.is_file_transfer() {
            if let Err(e) = self.core.transaction.open_tempfile(ctx.filestore) {
                error!("{}: opening temporary file failed: {e}", self.core.id());
                self.core
                    .declare_fault(ctx, ConditionCode::FilestoreRejection, 0)?;
                return Ok(());
            }
        }
        self.core.queue_user_messages(ctx);
        Ok(())
    }

    fn on_file_data(
        &mut self,
        ctx: &mut MachineContext,
        pdu: Option<Pdu>,
    ) -> Result<(), MachineError> {
        let Some(Pdu::FileData(file_data)) = pdu else {
            return Ok(());
        };
        if ctx.config.indication_cfg.file_segment_recv {
            ctx.user
                .file_segment_recvd_indication(&FileSegmentRecvdParams {
                    id: self.core.id(),
                    offset: file_data.offset,
                    length: file_data.data.len(),
                });
        }
        match self
            .core
            .transaction
            .write_segment(file_data.offset, &file_data.data)
        {
            Ok(()) => self
                .segments
                .insert(file_data.offset, file_data.data.len() as u64),
            Err(TransactionError::NoFileHandle) => {
                warn!("{}: file data without a file transfer", self.core.id());
            }
            Err(e) => {
                error!("{}: storing file data failed: {e}", self.core.id());
                self.core
                    .declare_fault(ctx, ConditionCode::FilestoreRejection, self.progress())?;
            }
        }
        Ok(())
    }

    fn on_eof(&mut self, ctx: &mut MachineContext, pdu: Option<Pdu>) -> Result<(), MachineError> {
        let Some(Pdu::Eof(eof)) = pdu else {
            return Ok(());
        };
        self.core.issue_eof_recvd(ctx);
        if self.core.transaction.is_file_transfer() {
            let progress = self.progress();
            let file_size = eof.file_size();
            if progress > file_size
                && self
                    .core
                    .fault_interrupts(ctx, ConditionCode::FileSizeError, progress)?
            {
                return Ok(());
            }
            if self.checksum_failure_interrupts(ctx, eof.file_checksum(), file_size)? {
                return Ok(());
            }
            self.core.delivery_code = if self
                .segments
                .missing_segments(true, Some(file_size))
                .is_empty()
            {
                DeliveryCode::Complete
            } else {
                DeliveryCode::Incomplete
            };
            self.deliver_file(ctx)?;
        } else {
            self.core.delivery_code = DeliveryCode::Complete;
        }
        self.core.execute_filestore_requests(ctx);
        self.finish(ctx);
        Ok(())
    }

    fn checksum_failure_interrupts(
        &mut self,
        ctx: &mut MachineContext,
        expected: u32,
        file_size: u64,
    ) -> Result<bool, MachineError> {
        let progress = self.progress();
        let condition_code = match self.core.transaction.checksum_of_open_file(file_size) {
            Ok(checksum) if checksum == expected => return Ok(false),
            Ok(checksum) => {
                warn!(
                    "{}: checksum mismatch, expected {expected:#010x}, calculated {checksum:#010x}",
                    self.core.id()
                );
                ConditionCode::FileChecksumFailure
            }
            Err(TransactionError::Filestore(FilestoreError::ChecksumTypeNotImplemented(_))) => {
                ConditionCode::UnsupportedChecksumType
            }
            Err(e) => {
                error!("{}: checksum calculation failed: {e}", self.core.id());
                ConditionCode::FilestoreRejection
            }
        };
        self.core.fault_interrupts(ctx, condition_code, progress)
    }

    fn deliver_file(&mut self, ctx: &mut MachineContext) -> Result<(), MachineError> {
        let transaction = &mut self.core.transaction;
        let Some(dest_file) = transaction
            .dest_file
            .clone()
            .or_else(|| transaction.source_file.clone())
        else {
            return Ok(());
        };
        match transaction.copy_open_file_to(ctx.filestore, &dest_file) {
            Ok(_) => self.core.file_status = FileStatus::Retained,
            Err(e) => {
                error!("{}: delivering {dest_file} failed: {e}", self.core.id());
                self.core.file_status = FileStatus::DiscardedFsRejection;
                self.core
                    .declare_fault(ctx, ConditionCode::FilestoreRejection, self.progress())?;
            }
        }
        Ok(())
    }

    fn finish(&mut self, ctx: &mut MachineContext) {
        self.core.issue_finished(ctx);
        self.shutdown();
    }

    pub fn shutdown(&mut self) {
        self.inactivity_timer.cancel();
        self.core.shutdown();
    }
}
