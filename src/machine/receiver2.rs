//! Receiving side of an acknowledged (class 2) transaction.
//!
//! The EOF PDU is acknowledged immediately. If file data or the metadata are missing at that
//! point, NAK PDUs are sent on every NAK timer expiration until the gaps are filled. The
//! completion is reported with a Finished PDU, which is retransmitted until it is acknowledged.
use std::vec::Vec;

use log::{debug, error, info, warn};

use super::{MachineContext, MachineCore, MachineError, MachineState};
use crate::event::{Event, EventType};
use crate::filestore::FilestoreError;
use crate::pdu::{
    AckPdu, CfdpPdu, ConditionCode, DeliveryCode, EofPdu, FileDirectiveType, FileStatus,
    FinishedPduOwned, NakPduOwned, Pdu, PduError, PduHeader, PduHeaderExt, SegmentRequests,
    TransactionStatus,
};
use crate::segments::ReceivedSegments;
use crate::timer::{Timer, TimerKind, TimerScheduler};
use crate::transaction::{Transaction, TransactionError};
use crate::user::{FileSegmentRecvdParams, MetadataReceivedParams};
use crate::{EntityConfig, EntityType};

#[derive(Debug)]
pub struct Receiver2 {
    pub(crate) core: MachineCore,
    reply_header: PduHeader,
    segments: ReceivedSegments,
    metadata_received: bool,
    eof_checksum: Option<u32>,
    inactivity_timer: Timer,
    ack_timer: Timer,
    nak_timer: Timer,
}

impl Receiver2 {
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
            core: MachineCore::new(transaction, MachineState::WaitForEof, DeliveryCode::Incomplete),
            reply_header: first_header.reply_header(),
            segments: ReceivedSegments::new(),
            metadata_received: false,
            eof_checksum: None,
            inactivity_timer: Timer::new(
                id,
                TimerKind::Inactivity,
                config.inactivity_timeout,
                None,
                scheduler.clone(),
            ),
            ack_timer: Timer::new(
                id,
                TimerKind::PositiveAck,
                config.positive_ack_timer_interval,
                config.positive_ack_timer_expiration_limit,
                scheduler.clone(),
            ),
            nak_timer: Timer::new(
                id,
                TimerKind::Nak,
                config.nak_timer_interval,
                config.nak_timer_expiration_limit,
                scheduler,
            ),
        }
    }

    pub fn progress(&self) -> u64 {
        self.segments.progress()
    }

    pub(crate) fn timer_mut(&mut self, kind: TimerKind) -> Option<&mut Timer> {
        Some(match kind {
            TimerKind::Inactivity => &mut self.inactivity_timer,
            TimerKind::PositiveAck => &mut self.ack_timer,
            TimerKind::Nak => &mut self.nak_timer,
        })
    }

    pub fn handle(&mut self, ctx: &mut MachineContext, event: Event) -> Result<(), MachineError> {
        if event.pdu.is_some()
            && !self.core.suspended
            && self.core.state != MachineState::Completed
        {
            self.inactivity_timer.restart();
        }
        match self.core.state {
            MachineState::WaitForEof => self.handle_wait_for_eof(ctx, event),
            MachineState::GetMissingData => self.handle_get_missing_data(ctx, event),
            MachineState::SendFinished => self.handle_send_finished(ctx, event),
            MachineState::TransactionCancelled => self.handle_cancelled(ctx, event),
            _ => Ok(()),
        }
    }

    fn handle_wait_for_eof(
        &mut self,
        ctx: &mut MachineContext,
        event: Event,
    ) -> Result<(), MachineError> {
        match event.event_type {
            EventType::E0EnteredState => self.inactivity_timer.restart(),
            EventType::E10ReceivedMetadata => self.on_metadata(ctx, event.pdu)?,
            EventType::E11ReceivedFileData => self.on_file_data(ctx, event.pdu)?,
            EventType::E12ReceivedEofNoError => self.on_eof(ctx, event.pdu)?,
            _ => return self.handle_common(ctx, event),
        }
        Ok(())
    }

    fn handle_get_missing_data(
        &mut self,
        ctx: &mut MachineContext,
        event: Event,
    ) -> Result<(), MachineError> {
        match event.event_type {
            EventType::E0EnteredState => {
                self.send_nak(ctx);
                self.nak_timer.reset();
                if self.core.suspended || self.core.frozen {
                    self.nak_timer.suspend();
                }
            }
            EventType::E10ReceivedMetadata => {
                self.on_metadata(ctx, event.pdu)?;
                self.check_completion(ctx)?;
            }
            EventType::E11ReceivedFileData => {
                self.on_file_data(ctx, event.pdu)?;
                self.check_completion(ctx)?;
            }
            EventType::E12ReceivedEofNoError => self.acknowledge_eof(ctx, event.pdu.as_ref()),
            EventType::E26NakTimeout => {
                self.nak_timer.restart();
                if self.missing().is_empty() {
                    return self.check_completion(ctx);
                }
                if self.core.suspended || self.core.frozen {
                    return Ok(());
                }
                self.send_nak(ctx);
                if self.nak_timer.is_limit_reached() {
                    self.core
                        .declare_fault(ctx, ConditionCode::NakLimitReached, self.progress())?;
                }
            }
            _ => return self.handle_common(ctx, event),
        }
        Ok(())
    }

    fn handle_send_finished(
        &mut self,
        ctx: &mut MachineContext,
        event: Event,
    ) -> Result<(), MachineError> {
        match event.event_type {
            EventType::E0EnteredState => {
                self.nak_timer.cancel();
                self.core.delivery_code = DeliveryCode::Complete;
                if self.core.transaction.is_file_transfer() && !self.deliver_file(ctx)? {
                    return Ok(());
                }
                self.core.execute_filestore_requests(ctx);
                self.send_finished(ctx);
                self.ack_timer.reset();
                if self.core.suspended || self.core.frozen {
                    self.ack_timer.suspend();
                }
            }
            EventType::E12ReceivedEofNoError => self.acknowledge_eof(ctx, event.pdu.as_ref()),
            EventType::E18ReceivedAckFinished => self.finish(ctx),
            EventType::E25AckTimeout => {
                self.ack_timer.restart();
                debug!("{}: retransmitting Finished", self.core.id());
                self.send_finished(ctx);
                if self.ack_timer.is_limit_reached() {
                    self.core.declare_fault(
                        ctx,
                        ConditionCode::PositiveAckLimitReached,
                        self.progress(),
                    )?;
                }
            }
            _ => return self.handle_common(ctx, event),
        }
        Ok(())
    }

    fn handle_cancelled(
        &mut self,
        ctx: &mut MachineContext,
        event: Event,
    ) -> Result<(), MachineError> {
        match event.event_type {
            EventType::E0EnteredState => {
                self.core.suspended = false;
                self.nak_timer.cancel();
                self.core.delivery_code = DeliveryCode::Incomplete;
                self.core.file_status = FileStatus::DiscardDeliberately;
                if self.core.condition_code == ConditionCode::NoError {
                    self.core.condition_code = ConditionCode::CancelRequestReceived;
                }
                self.send_finished(ctx);
                self.ack_timer.reset();
                self.inactivity_timer.restart();
            }
            EventType::E18ReceivedAckFinished => {
                if self.core.condition_code != ConditionCode::NoError {
                    self.finish(ctx);
                }
            }
            EventType::E25AckTimeout => {
                self.ack_timer.restart();
                if self.ack_timer.is_limit_reached() {
                    warn!(
                        "{}: cancellation was not acknowledged, abandoning",
                        self.core.id()
                    );
                    self.core.post(ctx, EventType::E2AbandonTransaction)?;
                } else {
                    self.send_finished(ctx);
                }
            }
            EventType::E27InactivityTimeout => {
                self.core.issue_abandoned(ctx, self.progress());
                self.shutdown();
            }
            EventType::E3NoticeOfCancellation | EventType::E33ReceivedCancelRequest => (),
            _ => return self.handle_common(ctx, event),
        }
        Ok(())
    }

    /// Events which are handled the same way in all states.
    fn handle_common(
        &mut self,
        ctx: &mut MachineContext,
        event: Event,
    ) -> Result<(), MachineError> {
        match event.event_type {
            EventType::E2AbandonTransaction => {
                self.core.issue_abandoned(ctx, self.progress());
                self.shutdown();
            }
            EventType::E3NoticeOfCancellation => {
                self.core.state = MachineState::TransactionCancelled;
                self.core.post(ctx, EventType::E0EnteredState)?;
            }
            EventType::E4NoticeOfSuspension => {
                if self.core.suspend(ctx) && !self.core.frozen {
                    self.core.post(ctx, EventType::E5SuspendTimers)?;
                }
            }
            EventType::E5SuspendTimers => {
                self.inactivity_timer.suspend();
                self.ack_timer.suspend();
                self.nak_timer.suspend();
            }
            EventType::E6ResumeTimers => {
                self.inactivity_timer.resume();
                self.ack_timer.resume();
                self.nak_timer.resume();
            }
            EventType::E13ReceivedEofCancel => {
                let Some(Pdu::Eof(eof)) = &event.pdu else {
                    return Ok(());
                };
                self.core.condition_code = eof.condition_code();
                self.core.issue_eof_recvd(ctx);
                self.acknowledge_eof(ctx, event.pdu.as_ref());
                self.core.delivery_code = DeliveryCode::Incomplete;
                self.core.file_status = FileStatus::DiscardDeliberately;
                self.finish(ctx);
            }
            EventType::E27InactivityTimeout => {
                self.inactivity_timer.restart();
                self.core
                    .declare_fault(ctx, ConditionCode::InactivityDetected, self.progress())?;
            }
            EventType::E31ReceivedSuspendRequest => self.core.request_suspension(ctx)?,
            EventType::E32ReceivedResumeRequest => {
                if self.core.resume(ctx, self.progress()) && !self.core.frozen {
                    self.core.post(ctx, EventType::E6ResumeTimers)?;
                }
            }
            EventType::E33ReceivedCancelRequest => self.core.request_cancellation(ctx)?,
            EventType::E34ReceivedReportRequest => {
                self.core
                    .issue_report(ctx, EntityType::Receiving, self.progress())
            }
            EventType::E40ReceivedFreeze => {
                if !self.core.frozen {
                    self.core.frozen = true;
                    if !self.core.suspended {
                        self.core.post(ctx, EventType::E5SuspendTimers)?;
                    }
                }
            }
            EventType::E41ReceivedThaw => {
                if self.core.thaw() && !self.core.suspended {
                    self.core.post(ctx, EventType::E6ResumeTimers)?;
                }
            }
            event_type => debug!(
                "{}: ignoring {:?} in state {:?}",
                self.core.id(),
                event_type,
                self.core.state
            ),
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
        if self.metadata_received {
            debug!("{}: duplicate metadata", self.core.id());
            return Ok(());
        }
        self.metadata_received = true;
        self.reply_header = self
            .reply_header
            .with_file_flag(metadata.header.common_pdu_conf().file_flag);
        let eof_file_size = self.core.transaction.cached_file_size();
        self.core.transaction.apply_metadata(&metadata);
        if let Some(file_size) = eof_file_size {
            self.core.transaction.set_file_size(file_size);
        }
        let msgs_to_user: Vec<_> = metadata.messages_to_user().cloned().collect();
        ctx.user.metadata_recvd_indication(&MetadataReceivedParams {
            id: self.core.id(),
            source_id: metadata.header.source_entity_id(),
            file_size: metadata.params.file_size,
            src_file_name: metadata.source_file_name.as_deref(),
            dest_file_name: metadata.dest_file_name.as_deref(),
            msgs_to_user: &msgs_to_user,
        });
        if self.core.transaction.is_file_transfer() && !self.core.transaction.is_file_open() {
            if let Err(e) = self.core.transaction.open_tempfile(ctx.filestore) {
                error!("{}: opening temporary file failed: {e}", self.core.id());
                self.core
                    .declare_fault(ctx, ConditionCode::FilestoreRejection, self.progress())?;
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
        // File data may overtake the metadata.
        if !self.core.transaction.is_file_open() {
            if let Err(e) = self.core.transaction.open_tempfile(ctx.filestore) {
                error!("{}: opening temporary file failed: {e}", self.core.id());
                self.core
                    .declare_fault(ctx, ConditionCode::FilestoreRejection, self.progress())?;
                return Ok(());
            }
        }
        match self
            .core
            .transaction
            .write_segment(file_data.offset, &file_data.data)
        {
            Ok(()) => self
                .segments
                .insert(file_data.offset, file_data.data.len() as u64),
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
        self.reply_header = self
            .reply_header
            .with_file_flag(eof.pdu_header().common_pdu_conf().file_flag);
        let file_size = eof.file_size();
        self.core.transaction.set_file_size(file_size);
        self.eof_checksum = Some(eof.file_checksum());
        self.core.issue_eof_recvd(ctx);
        self.send_eof_ack(ctx, &eof);
        let progress = self.progress();
        if progress > file_size
            && self
                .core
                .fault_interrupts(ctx, ConditionCode::FileSizeError, progress)?
        {
            return Ok(());
        }
        self.core.state = if self.missing().is_empty() {
            MachineState::SendFinished
        } else {
            info!(
                "{}: EOF received, requesting {} missing segments",
                self.core.id(),
                self.missing().len()
            );
            MachineState::GetMissingData
        };
        self.core.post(ctx, EventType::E0EnteredState)
    }

    fn missing(&self) -> SegmentRequests {
        self.segments
            .missing_segments(self.metadata_received, self.core.transaction.cached_file_size())
    }

    fn check_completion(&mut self, ctx: &mut MachineContext) -> Result<(), MachineError> {
        if self.core.state == MachineState::GetMissingData && self.missing().is_empty() {
            self.core.state = MachineState::SendFinished;
            self.core.post(ctx, EventType::E0EnteredState)?;
        }
        Ok(())
    }

    /// Verify the checksum and copy the received file to its destination. Returns false if a
    /// fault interrupted the delivery.
    fn deliver_file(&mut self, ctx: &mut MachineContext) -> Result<bool, MachineError> {
        let progress = self.progress();
        let file_size = self.core.transaction.cached_file_size().unwrap_or(progress);
        let expected = self.eof_checksum.unwrap_or(0);
        let checksum_fault = match self.core.transaction.checksum_of_open_file(file_size) {
            Ok(checksum) if checksum == expected => None,
            Ok(checksum) => {
                warn!(
                    "{}: checksum mismatch, expected {expected:#010x}, calculated {checksum:#010x}",
                    self.core.id()
                );
                Some(ConditionCode::FileChecksumFailure)
            }
            Err(TransactionError::Filestore(FilestoreError::ChecksumTypeNotImplemented(_))) => {
                Some(ConditionCode::UnsupportedChecksumType)
            }
            Err(e) => {
                error!("{}: checksum calculation failed: {e}", self.core.id());
                Some(ConditionCode::FilestoreRejection)
            }
        };
        if let Some(condition_code) = checksum_fault {
            if self.core.fault_interrupts(ctx, condition_code, progress)? {
                return Ok(false);
            }
        }
        let transaction = &mut self.core.transaction;
        let Some(dest_file) = transaction
            .dest_file
            .clone()
            .or_else(|| transaction.source_file.clone())
        else {
            return Ok(true);
        };
        match transaction.copy_open_file_to(ctx.filestore, &dest_file) {
            Ok(_) => {
                self.core.file_status = FileStatus::Retained;
                self.core.transaction.close_file();
                Ok(true)
            }
            Err(e) => {
                error!("{}: delivering {dest_file} failed: {e}", self.core.id());
                self.core.file_status = FileStatus::DiscardedFsRejection;
                Ok(!self
                    .core
                    .fault_interrupts(ctx, ConditionCode::FilestoreRejection, progress)?)
            }
        }
    }

    fn send_eof_ack(&self, ctx: &MachineContext, eof: &EofPdu) {
        match AckPdu::new(
            self.reply_header,
            FileDirectiveType::EofPdu,
            eof.condition_code(),
            TransactionStatus::Active,
        ) {
            Ok(ack) => ctx.send_pdu(&Pdu::Ack(ack)),
            Err(e) => error!(
                "{}: building ACK PDU failed: {}",
                self.core.id(),
                PduError::from(e)
            ),
        }
    }

    fn acknowledge_eof(&mut self, ctx: &mut MachineContext, pdu: Option<&Pdu>) {
        if let Some(Pdu::Eof(eof)) = pdu {
            self.send_eof_ack(ctx, eof);
        }
    }

    fn send_nak(&mut self, ctx: &mut MachineContext) {
        if self.core.suspended || self.core.frozen {
            return;
        }
        let end_of_scope = self
            .progress()
            .max(self.core.transaction.cached_file_size().unwrap_or(0));
        let nak = NakPduOwned::new(self.reply_header, 0, end_of_scope, self.missing());
        debug!(
            "{}: requesting {:?}",
            self.core.id(),
            nak.segment_requests
        );
        ctx.send_pdu(&Pdu::Nak(nak));
    }

    fn send_finished(&self, ctx: &MachineContext) {
        ctx.send_pdu(&Pdu::Finished(FinishedPduOwned::new(
            self.reply_header,
            self.core.condition_code,
            self.core.delivery_code,
            self.core.file_status,
            Some(ctx.config.local_id),
        )));
    }

    fn finish(&mut self, ctx: &mut MachineContext) {
        self.core.issue_finished(ctx);
        self.shutdown();
    }

    pub fn shutdown(&mut self) {
        self.inactivity_timer.cancel();
        self.ack_timer.cancel();
        self.nak_timer.cancel();
        self.core.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::vec;

    use super::*;
    use crate::filestore::calculate_checksum;
    use crate::machine::tests::{Indication, Testbench};
    use crate::machine::Machine;
    use crate::pdu::tlv::entity_id_tlv;
    use crate::pdu::{
        new_directive_header, ChecksumType, Direction, FileDataPduOwned, MetadataGenericParams,
        MetadataPduOwned, TransmissionMode,
    };
    use crate::TransactionId;

    const ID: TransactionId = TransactionId {
        source_id: 2,
        seq_num: 9,
    };

    const DATA: [u8; 12] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];

    fn header() -> PduHeader {
        new_directive_header(
            Direction::TowardsReceiver,
            TransmissionMode::Acknowledged,
            2,
            9,
            1,
        )
        .unwrap()
    }

    fn new_receiver(tb: &Testbench) -> Machine {
        Machine::Receiver2(Receiver2::new(&tb.config, &header(), tb.scheduler()))
    }

    fn metadata() -> Event {
        Event::with_pdu(
            ID,
            EventType::E10ReceivedMetadata,
            Pdu::Metadata(MetadataPduOwned::new(
                header(),
                MetadataGenericParams::new(true, ChecksumType::Modular, DATA.len() as u64),
                Some("/src.bin".into()),
                Some("/dest.bin".into()),
                vec![],
            )),
        )
    }

    fn file_data(offset: usize) -> Event {
        Event::with_pdu(
            ID,
            EventType::E11ReceivedFileData,
            Pdu::FileData(FileDataPduOwned::new(
                *header().common_pdu_conf(),
                offset as u64,
                DATA[offset..offset + 4].to_vec(),
            )),
        )
    }

    fn eof() -> Event {
        let checksum = calculate_checksum(
            &mut &DATA[..],
            ChecksumType::Modular,
            DATA.len() as u64,
            &mut [0; 8],
        )
        .unwrap();
        Event::with_pdu(
            ID,
            EventType::E12ReceivedEofNoError,
            Pdu::Eof(EofPdu::new_no_error(header(), checksum, DATA.len() as u64)),
        )
    }

    fn ack_finished() -> Event {
        Event::with_pdu(
            ID,
            EventType::E18ReceivedAckFinished,
            Pdu::Ack(
                AckPdu::new(
                    header(),
                    FileDirectiveType::FinishedPdu,
                    ConditionCode::NoError,
                    TransactionStatus::Terminated,
                )
                .unwrap(),
            ),
        )
    }

    fn naks(pdus: &[Pdu]) -> Vec<&NakPduOwned> {
        pdus.iter()
            .filter_map(|pdu| match pdu {
                Pdu::Nak(nak) => Some(nak),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_complete_reception() {
        let mut tb = Testbench::new(EntityConfig::new(1));
        let mut machine = new_receiver(&tb);
        for event in [metadata(), file_data(0), file_data(4), file_data(8), eof()] {
            tb.handle(&mut machine, event).unwrap();
        }
        tb.run(&mut machine, 10);
        assert_eq!(machine.state(), MachineState::SendFinished);
        let pdus = tb.sent_pdus();
        assert_eq!(pdus.len(), 2);
        if let Pdu::Ack(ack) = &pdus[0] {
            assert_eq!(ack.directive_code_of_acked_pdu(), FileDirectiveType::EofPdu);
            assert_eq!(
                ack.pdu_header().common_pdu_conf().direction,
                Direction::TowardsSender
            );
        } else {
            panic!("expected ACK PDU, got {:?}", pdus[0]);
        }
        if let Pdu::Finished(finished) = &pdus[1] {
            assert_eq!(finished.condition_code, ConditionCode::NoError);
            assert_eq!(finished.delivery_code, DeliveryCode::Complete);
            assert_eq!(finished.file_status, FileStatus::Retained);
            assert_eq!(finished.fault_location, None);
        } else {
            panic!("expected Finished PDU, got {:?}", pdus[1]);
        }
        assert_eq!(fs::read(tb.root().join("dest.bin")).unwrap(), DATA);
        assert!(tb.user.finished().is_none());
        tb.handle(&mut machine, ack_finished()).unwrap();
        assert!(machine.is_completed());
        assert_eq!(
            tb.user.finished().unwrap().delivery_code,
            DeliveryCode::Complete
        );
    }

    #[test]
    fn test_single_nak_for_lost_segment() {
        let mut tb = Testbench::new(EntityConfig::new(1));
        let mut machine = new_receiver(&tb);
        for event in [metadata(), file_data(0), file_data(8), eof()] {
            tb.handle(&mut machine, event).unwrap();
        }
        tb.run(&mut machine, 10);
        assert_eq!(machine.state(), MachineState::GetMissingData);
        let pdus = tb.sent_pdus();
        let sent_naks = naks(&pdus);
        assert_eq!(sent_naks.len(), 1);
        assert_eq!(sent_naks[0].segment_requests.as_slice(), &[(4, 8)]);
        assert_eq!(sent_naks[0].end_of_scope, 12);
        tb.handle(&mut machine, file_data(4)).unwrap();
        tb.run(&mut machine, 10);
        let pdus = tb.sent_pdus();
        assert!(naks(&pdus).is_empty());
        assert!(matches!(&pdus[..], [Pdu::Finished(_)]));
        assert_eq!(fs::read(tb.root().join("dest.bin")).unwrap(), DATA);
    }

    #[test]
    fn test_lost_metadata_is_requested() {
        let mut tb = Testbench::new(EntityConfig::new(1));
        let mut machine = new_receiver(&tb);
        for event in [file_data(0), file_data(4), file_data(8), eof()] {
            tb.handle(&mut machine, event).unwrap();
        }
        tb.run(&mut machine, 10);
        let pdus = tb.sent_pdus();
        let sent_naks = naks(&pdus);
        assert_eq!(sent_naks.len(), 1);
        assert_eq!(sent_naks[0].segment_requests.as_slice(), &[(0, 0)]);
        tb.handle(&mut machine, metadata()).unwrap();
        tb.run(&mut machine, 10);
        assert_eq!(machine.state(), MachineState::SendFinished);
        assert_eq!(fs::read(tb.root().join("dest.bin")).unwrap(), DATA);
    }

    #[test]
    fn test_nak_retransmission_and_limit() {
        let mut tb = Testbench::new(EntityConfig::new(1));
        let mut machine = new_receiver(&tb);
        for event in [metadata(), file_data(0), eof()] {
            tb.handle(&mut machine, event).unwrap();
        }
        tb.run(&mut machine, 10);
        tb.sent_pdus();
        assert!(tb.expire(&mut machine, TimerKind::Nak));
        assert!(tb.expire(&mut machine, TimerKind::Nak));
        assert_eq!(naks(&tb.sent_pdus()).len(), 2);
        assert!(tb.expire(&mut machine, TimerKind::Nak));
        tb.run(&mut machine, 10);
        assert_eq!(machine.state(), MachineState::TransactionCancelled);
        let pdus = tb.sent_pdus();
        assert_eq!(naks(&pdus).len(), 1);
        if let Some(Pdu::Finished(finished)) = pdus.last() {
            assert_eq!(finished.condition_code, ConditionCode::NakLimitReached);
            assert_eq!(finished.delivery_code, DeliveryCode::Incomplete);
            assert_eq!(finished.fault_location, Some(1));
        } else {
            panic!("expected Finished PDU, got {pdus:?}");
        }
        tb.handle(&mut machine, ack_finished()).unwrap();
        assert!(machine.is_completed());
        assert!(!tb.root().join("dest.bin").exists());
    }

    #[test]
    fn test_finished_retransmission() {
        let mut tb = Testbench::new(EntityConfig::new(1));
        let mut machine = new_receiver(&tb);
        for event in [metadata(), file_data(0), file_data(4), file_data(8), eof()] {
            tb.handle(&mut machine, event).unwrap();
        }
        tb.run(&mut machine, 10);
        tb.sent_pdus();
        assert!(tb.expire(&mut machine, TimerKind::PositiveAck));
        assert!(matches!(&tb.sent_pdus()[..], [Pdu::Finished(_)]));
        // A retransmitted EOF is acknowledged again.
        tb.handle(&mut machine, eof()).unwrap();
        assert!(matches!(&tb.sent_pdus()[..], [Pdu::Ack(_)]));
        tb.handle(&mut machine, ack_finished()).unwrap();
        assert!(machine.is_completed());
    }

    #[test]
    fn test_cancel_eof() {
        let mut tb = Testbench::new(EntityConfig::new(1));
        let mut machine = new_receiver(&tb);
        tb.handle(&mut machine, metadata()).unwrap();
        tb.handle(&mut machine, file_data(0)).unwrap();
        let eof = EofPdu::new(
            header(),
            ConditionCode::CancelRequestReceived,
            0,
            4,
            Some(entity_id_tlv(2)),
        );
        tb.handle(
            &mut machine,
            Event::with_pdu(ID, EventType::E13ReceivedEofCancel, Pdu::Eof(eof)),
        )
        .unwrap();
        assert!(machine.is_completed());
        let pdus = tb.sent_pdus();
        if let [Pdu::Ack(ack)] = &pdus[..] {
            assert_eq!(ack.condition_code(), ConditionCode::CancelRequestReceived);
        } else {
            panic!("expected ACK PDU, got {pdus:?}");
        }
        let finished = tb.user.finished().unwrap();
        assert_eq!(finished.condition_code, ConditionCode::CancelRequestReceived);
        assert_eq!(finished.file_status, FileStatus::DiscardDeliberately);
    }

    #[test]
    fn test_cancel_request() {
        let mut tb = Testbench::new(EntityConfig::new(1));
        let mut machine = new_receiver(&tb);
        tb.handle(&mut machine, metadata()).unwrap();
        tb.handle(&mut machine, Event::new(ID, EventType::E33ReceivedCancelRequest))
            .unwrap();
        tb.run(&mut machine, 10);
        let pdus = tb.sent_pdus();
        assert!(matches!(
            &pdus[..],
            [Pdu::Finished(finished)]
                if finished.condition_code == ConditionCode::CancelRequestReceived
        ));
        tb.handle(&mut machine, ack_finished()).unwrap();
        assert!(machine.is_completed());
        assert_eq!(
            tb.user.count(|indication| matches!(indication, Indication::Finished(_))),
            1
        );
    }

    #[test]
    fn test_duplicate_pdus() {
        let mut tb = Testbench::new(EntityConfig::new(1));
        let mut machine = new_receiver(&tb);
        for event in [
            metadata(),
            metadata(),
            file_data(4),
            file_data(4),
            file_data(0),
            file_data(8),
            file_data(0),
            eof(),
        ] {
            tb.handle(&mut machine, event).unwrap();
        }
        tb.run(&mut machine, 10);
        assert_eq!(machine.state(), MachineState::SendFinished);
        assert_eq!(
            tb.user.count(|indication| matches!(indication, Indication::Metadata(_))),
            1
        );
        assert_eq!(fs::read(tb.root().join("dest.bin")).unwrap(), DATA);
    }

    #[test]
    fn test_suspended_receiver_sends_no_nak() {
        let mut tb = Testbench::new(EntityConfig::new(1));
        let mut machine = new_receiver(&tb);
        tb.handle(&mut machine, metadata()).unwrap();
        tb.handle(&mut machine, Event::new(ID, EventType::E31ReceivedSuspendRequest))
            .unwrap();
        tb.run(&mut machine, 10);
        tb.handle(&mut machine, eof()).unwrap();
        tb.run(&mut machine, 10);
        assert_eq!(machine.state(), MachineState::GetMissingData);
        let pdus = tb.sent_pdus();
        assert!(naks(&pdus).is_empty());
        tb.handle(&mut machine, Event::new(ID, EventType::E32ReceivedResumeRequest))
            .unwrap();
        tb.run(&mut machine, 10);
        assert!(tb.expire(&mut machine, TimerKind::Nak));
        assert_eq!(naks(&tb.sent_pdus()).len(), 1);
    }

    #[test]
    fn test_frozen_receiver_keeps_timers_stopped() {
        let mut tb = Testbench::new(EntityConfig::new(1));
        let mut machine = new_receiver(&tb);
        for event in [metadata(), file_data(0), eof()] {
            tb.handle(&mut machine, event).unwrap();
        }
        tb.run(&mut machine, 10);
        assert_eq!(naks(&tb.sent_pdus()).len(), 1);
        tb.handle(&mut machine, Event::new(ID, EventType::E40ReceivedFreeze))
            .unwrap();
        tb.run(&mut machine, 10);
        // Neither the NAK timer nor the inactivity timer runs while frozen.
        assert!(!tb.expire(&mut machine, TimerKind::Nak));
        assert!(!tb.expire(&mut machine, TimerKind::Inactivity));
        assert!(tb.sent_pdus().is_empty());
        assert_eq!(machine.state(), MachineState::GetMissingData);
        // A second freeze does not stack.
        tb.handle(&mut machine, Event::new(ID, EventType::E40ReceivedFreeze))
            .unwrap();
        assert!(tb.posted_events().is_empty());
        tb.handle(&mut machine, Event::new(ID, EventType::E41ReceivedThaw))
            .unwrap();
        assert_eq!(tb.posted_events(), vec![EventType::E6ResumeTimers]);
        tb.handle(&mut machine, Event::new(ID, EventType::E6ResumeTimers))
            .unwrap();
        assert!(tb.expire(&mut machine, TimerKind::Nak));
        let pdus = tb.sent_pdus();
        let sent_naks = naks(&pdus);
        assert_eq!(sent_naks.len(), 1);
        assert_eq!(sent_naks[0].segment_requests.as_slice(), &[(4, 12)]);
        tb.handle(&mut machine, file_data(4)).unwrap();
        tb.handle(&mut machine, file_data(8)).unwrap();
        tb.run(&mut machine, 10);
        assert_eq!(machine.state(), MachineState::SendFinished);
        assert_eq!(fs::read(tb.root().join("dest.bin")).unwrap(), DATA);
        assert!(matches!(&tb.sent_pdus()[..], [Pdu::Finished(_)]));
        // The positive ACK timer of the Finished PDU is stopped as well.
        tb.handle(&mut machine, Event::new(ID, EventType::E40ReceivedFreeze))
            .unwrap();
        tb.run(&mut machine, 10);
        assert!(!tb.expire(&mut machine, TimerKind::PositiveAck));
        assert!(tb.sent_pdus().is_empty());
        tb.handle(&mut machine, Event::new(ID, EventType::E41ReceivedThaw))
            .unwrap();
        tb.run(&mut machine, 10);
        assert!(tb.expire(&mut machine, TimerKind::PositiveAck));
        assert!(matches!(&tb.sent_pdus()[..], [Pdu::Finished(_)]));
    }
}
