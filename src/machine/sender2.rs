//! Sending side of an acknowledged (class 2) transaction.
//!
//! After the file data, the EOF PDU is retransmitted on every positive ACK timer expiration
//! until it is acknowledged. Segments requested with NAK PDUs are retransmitted until the
//! receiver reports the completion with a Finished PDU.
use log::{debug, error, warn};

use super::{MachineContext, MachineCore, MachineError, MachineState};
use crate::event::{Event, EventType};
use crate::pdu::{
    AckPdu, ConditionCode, DeliveryCode, FileDirectiveType, Pdu, PduError, TransactionStatus,
};
use crate::segments::{Retransmission, RetransmissionQueue};
use crate::timer::{Timer, TimerKind, TimerScheduler};
use crate::transaction::Transaction;
use crate::{EntityConfig, EntityType};

#[derive(Debug)]
pub struct Sender2 {
    pub(crate) core: MachineCore,
    inactivity_timer: Timer,
    ack_timer: Timer,
    retransmissions: RetransmissionQueue,
}

impl Sender2 {
    pub fn new(transaction: Transaction, config: &EntityConfig, scheduler: TimerScheduler) -> Self {
        let id = transaction.id();
        Self {
            core: MachineCore::new(transaction, MachineState::SendMetadata, DeliveryCode::Complete),
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
                scheduler,
            ),
            retransmissions: RetransmissionQueue::new(),
        }
    }

    pub fn progress(&self) -> u64 {
        self.core.transaction.send_progress()
    }

    pub(crate) fn timer_mut(&mut self, kind: TimerKind) -> Option<&mut Timer> {
        match kind {
            TimerKind::Inactivity => Some(&mut self.inactivity_timer),
            TimerKind::PositiveAck => Some(&mut self.ack_timer),
            TimerKind::Nak => None,
        }
    }

    pub fn handle(&mut self, ctx: &mut MachineContext, event: Event) -> Result<(), MachineError> {
        if event.pdu.is_some()
            && !self.core.suspended
            && self.core.state != MachineState::Completed
        {
            self.inactivity_timer.restart();
        }
        match self.core.state {
            MachineState::SendMetadata => self.handle_send_metadata(ctx, event),
            MachineState::SendFile => self.handle_send_file(ctx, event),
            MachineState::SendEof => self.handle_send_eof(ctx, event),
            MachineState::TransactionCancelled => self.handle_cancelled(ctx, event),
            _ => Ok(()),
        }
    }

    fn handle_send_metadata(
        &mut self,
        ctx: &mut MachineContext,
        event: Event,
    ) -> Result<(), MachineError> {
        match event.event_type {
            EventType::E0EnteredState => (),
            EventType::E30ReceivedPutRequest => {
                ctx.user.transaction_indication(&self.core.id());
                self.core.send_metadata(ctx);
                self.core.state = if self.core.transaction.is_file_transfer() {
                    MachineState::SendFile
                } else {
                    MachineState::SendEof
                };
                self.core.post(ctx, EventType::E0EnteredState)?;
            }
            _ => return self.handle_common(ctx, event),
        }
        Ok(())
    }

    fn handle_send_file(
        &mut self,
        ctx: &mut MachineContext,
        event: Event,
    ) -> Result<(), MachineError> {
        match event.event_type {
            EventType::E0EnteredState => {
                if let Err(e) = self.core.transaction.open_source_file(ctx.filestore) {
                    error!("{}: opening source file failed: {e}", self.core.id());
                    self.core
                        .declare_fault(ctx, ConditionCode::FilestoreRejection, 0)?;
                    return Ok(());
                }
                self.core.post(ctx, EventType::E1SendFileData)?;
            }
            EventType::E1SendFileData => {
                if self.core.suspended || self.core.frozen {
                    return Ok(());
                }
                if ctx.transport.is_ready() {
                    if !self.core.transaction.is_send_complete() {
                        if let Err(e) = self.core.send_file_segment(ctx, None, None) {
                            error!("{}: reading source file failed: {e}", self.core.id());
                            if !self.core.fault_interrupts(
                                ctx,
                                ConditionCode::FilestoreRejection,
                                self.progress(),
                            )? {
                                // The rest of the file data is skipped.
                                self.enter_send_eof(ctx)?;
                            }
                            return Ok(());
                        }
                    }
                    if self.core.transaction.is_send_complete() {
                        return self.enter_send_eof(ctx);
                    }
                }
                self.core.post(ctx, EventType::E1SendFileData)?;
            }
            EventType::E6ResumeTimers => {
                self.resume_timers();
                self.core.post(ctx, EventType::E1SendFileData)?;
            }
            EventType::E15ReceivedNak => self.queue_retransmissions(ctx, event.pdu),
            EventType::E17ReceivedFinishedCancel => self.on_finished(ctx, event.pdu),
            _ => return self.handle_common(ctx, event),
        }
        Ok(())
    }

    /// Retransmissions requested while the file data was still being sent are served right
    /// after the EOF PDU.
    fn enter_send_eof(&mut self, ctx: &MachineContext) -> Result<(), MachineError> {
        self.core.state = MachineState::SendEof;
        self.core.post(ctx, EventType::E0EnteredState)?;
        self.core.post(ctx, EventType::E1SendFileData)
    }

    fn handle_send_eof(
        &mut self,
        ctx: &mut MachineContext,
        event: Event,
    ) -> Result<(), MachineError> {
        match event.event_type {
            EventType::E0EnteredState => {
                self.core.send_eof(ctx);
                self.core.issue_eof_sent(ctx);
                self.ack_timer.restart();
                self.inactivity_timer.restart();
            }
            EventType::E1SendFileData => {
                if self.core.suspended || self.core.frozen || self.retransmissions.is_empty() {
                    return Ok(());
                }
                if ctx.transport.is_ready() {
                    self.send_missing(ctx)?;
                }
                if !self.retransmissions.is_empty() {
                    self.core.post(ctx, EventType::E1SendFileData)?;
                }
            }
            EventType::E6ResumeTimers => {
                self.resume_timers();
                self.core.post(ctx, EventType::E1SendFileData)?;
            }
            EventType::E14ReceivedAckEof => self.ack_timer.cancel(),
            EventType::E15ReceivedNak => {
                self.queue_retransmissions(ctx, event.pdu);
                self.core.post(ctx, EventType::E1SendFileData)?;
            }
            EventType::E16ReceivedFinishedNoError | EventType::E17ReceivedFinishedCancel => {
                self.on_finished(ctx, event.pdu)
            }
            EventType::E25AckTimeout => {
                self.ack_timer.restart();
                debug!("{}: retransmitting EOF", self.core.id());
                self.core.send_eof(ctx);
                if self.ack_timer.is_limit_reached() {
                    self.core.declare_fault(
                        ctx,
                        ConditionCode::PositiveAckLimitReached,
                        self.progress(),
                    )?;
                }
            }
            EventType::E27InactivityTimeout => {
                self.inactivity_timer.restart();
                self.core
                    .declare_fault(ctx, ConditionCode::InactivityDetected, self.progress())?;
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
                if self.core.condition_code == ConditionCode::NoError {
                    self.core.condition_code = ConditionCode::CancelRequestReceived;
                }
                self.core.delivery_code = DeliveryCode::Incomplete;
                self.retransmissions.clear();
                self.core.send_eof(ctx);
                self.core.issue_eof_sent(ctx);
                self.ack_timer.reset();
                self.inactivity_timer.restart();
            }
            EventType::E6ResumeTimers => self.resume_timers(),
            EventType::E14ReceivedAckEof => {
                if self.core.condition_code != ConditionCode::NoError {
                    self.finish(ctx);
                }
            }
            EventType::E17ReceivedFinishedCancel => self.on_finished(ctx, event.pdu),
            EventType::E25AckTimeout => {
                self.ack_timer.restart();
                if self.ack_timer.is_limit_reached() {
                    warn!(
                        "{}: cancellation was not acknowledged, abandoning",
                        self.core.id()
                    );
                    self.core.post(ctx, EventType::E2AbandonTransaction)?;
                } else {
                    self.core.send_eof(ctx);
                }
            }
            EventType::E27InactivityTimeout => {
                self.core.issue_abandoned(ctx, self.progress());
                self.shutdown();
            }
            // The transaction is already being cancelled.
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
            }
            EventType::E6ResumeTimers => self.resume_timers(),
            EventType::E31ReceivedSuspendRequest => self.core.request_suspension(ctx)?,
            EventType::E32ReceivedResumeRequest => {
                if self.core.resume(ctx, self.progress()) && !self.core.frozen {
                    self.core.post(ctx, EventType::E6ResumeTimers)?;
                }
            }
            EventType::E33ReceivedCancelRequest => self.core.request_cancellation(ctx)?,
            EventType::E34ReceivedReportRequest => {
                self.core
                    .issue_report(ctx, EntityType::Sending, self.progress())
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
            event_type => {
                if ctx.config.strict_event_handling && self.core.state == MachineState::SendFile {
                    return Err(MachineError::EventNotApplicable {
                        state: self.core.state,
                        event: event_type,
                    });
                }
                debug!(
                    "{}: ignoring {:?} in state {:?}",
                    self.core.id(),
                    event_type,
                    self.core.state
                );
            }
        }
        Ok(())
    }

    fn resume_timers(&mut self) {
        self.inactivity_timer.resume();
        self.ack_timer.resume();
    }

    fn queue_retransmissions(&mut self, ctx: &mut MachineContext, pdu: Option<Pdu>) {
        let Some(Pdu::Nak(nak)) = pdu else {
            return;
        };
        if self.core.suspended || self.core.frozen {
            debug!("{}: ignoring NAK while suspended", self.core.id());
            return;
        }
        let file_size = self.core.transaction.file_size(ctx.filestore);
        for request in nak.segment_requests.iter() {
            if let Err(e) = self.retransmissions.push(*request, file_size) {
                warn!("{}: invalid segment request: {e}", self.core.id());
            }
        }
        debug!(
            "{}: {} retransmissions queued",
            self.core.id(),
            self.retransmissions.len()
        );
    }

    fn send_missing(&mut self, ctx: &mut MachineContext) -> Result<(), MachineError> {
        match self
            .retransmissions
            .pop(self.core.transaction.max_file_segment_len)
        {
            Some(Retransmission::Metadata) => self.core.send_metadata(ctx),
            Some(Retransmission::FileData { offset, len }) => {
                if !self.core.transaction.is_file_open() {
                    if let Err(e) = self.core.transaction.open_source_file(ctx.filestore) {
                        error!("{}: reopening source file failed: {e}", self.core.id());
                        return Ok(());
                    }
                }
                if let Err(e) = self
                    .core
                    .send_file_segment(ctx, Some(offset), Some(len))
                {
                    error!("{}: reading source file failed: {e}", self.core.id());
                    self.retransmissions.clear();
                    self.core.declare_fault(
                        ctx,
                        ConditionCode::FilestoreRejection,
                        self.progress(),
                    )?;
                }
            }
            None => (),
        }
        Ok(())
    }

    fn on_finished(&mut self, ctx: &mut MachineContext, pdu: Option<Pdu>) {
        let Some(Pdu::Finished(finished)) = pdu else {
            return;
        };
        self.core.delivery_code = finished.delivery_code;
        self.core.file_status = finished.file_status;
        if finished.condition_code != ConditionCode::NoError {
            self.core.condition_code = finished.condition_code;
        }
        let ack = self.core.sender_header(ctx).and_then(|header| {
            AckPdu::new(
                header,
                FileDirectiveType::FinishedPdu,
                finished.condition_code,
                TransactionStatus::Terminated,
            )
            .map_err(|e| PduError::from(e).into())
        });
        match ack {
            Ok(ack) => ctx.send_pdu(&Pdu::Ack(ack)),
            Err(e) => error!("{}: building ACK PDU failed: {e}", self.core.id()),
        }
        self.finish(ctx);
    }

    fn finish(&mut self, ctx: &mut MachineContext) {
        self.core.issue_finished(ctx);
        self.shutdown();
    }

    pub fn shutdown(&mut self) {
        self.inactivity_timer.cancel();
        self.ack_timer.cancel();
        self.core.shutdown();
    }
}
