//! Sending side of an unacknowledged (class 1) transaction.
//!
//! The sender announces the transaction with a Metadata PDU, streams the file segments and
//! completes right after sending the EOF PDU. Nothing is ever retransmitted.
use log::{debug, error};

use super::{MachineContext, MachineCore, MachineError, MachineState};
use crate::event::{Event, EventType};
use crate::pdu::{ConditionCode, DeliveryCode};
use crate::transaction::Transaction;
use crate::EntityType;

#[derive(Debug)]
pub struct Sender1 {
    pub(crate) core: MachineCore,
}

impl Sender1 {
    pub fn new(transaction: Transaction) -> Self {
        Self {
            core: MachineCore::new(transaction, MachineState::SendMetadata, DeliveryCode::Complete),
        }
    }

    pub fn progress(&self) -> u64 {
        self.core.transaction.send_progress()
    }

    pub fn handle(&mut self, ctx: &mut MachineContext, event: Event) -> Result<(), MachineError> {
        match self.core.state {
            MachineState::SendMetadata => self.handle_send_metadata(ctx, event),
            MachineState::SendFile => self.handle_send_file(ctx, event),
            _ => {
                debug!(
                    "{}: ignoring {:?} in state {:?}",
                    self.core.id(),
                    event.event_type,
                    self.core.state
                );
                Ok(())
            }
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
                if self.core.transaction.is_file_transfer() {
                    self.core.state = MachineState::SendFile;
                    self.core.post(ctx, EventType::E0EnteredState)?;
                } else {
                    self.complete(ctx);
                }
            }
            EventType::E33ReceivedCancelRequest => {
                self.core.condition_code = ConditionCode::CancelRequestReceived;
                self.cancel(ctx);
            }
            EventType::E34ReceivedReportRequest => {
                self.core
                    .issue_report(ctx, EntityType::Sending, self.progress())
            }
            _ => (),
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
                                self.complete(ctx);
                            }
                            return Ok(());
                        }
                    }
                    if self.core.transaction.is_send_complete() {
                        self.complete(ctx);
                        return Ok(());
                    }
                }
                self.core.post(ctx, EventType::E1SendFileData)?;
            }
            EventType::E2AbandonTransaction => {
                self.core.issue_abandoned(ctx, self.progress());
                self.shutdown();
            }
            EventType::E3NoticeOfCancellation => self.cancel(ctx),
            EventType::E4NoticeOfSuspension => {
                self.core.suspend(ctx);
            }
            EventType::E31ReceivedSuspendRequest => self.core.request_suspension(ctx)?,
            EventType::E32ReceivedResumeRequest => {
                if self.core.resume(ctx, self.progress()) && !self.core.frozen {
                    self.core.post(ctx, EventType::E1SendFileData)?;
                }
            }
            EventType::E33ReceivedCancelRequest => self.core.request_cancellation(ctx)?,
            EventType::E34ReceivedReportRequest => {
                self.core
                    .issue_report(ctx, EntityType::Sending, self.progress())
            }
            EventType::E40ReceivedFreeze => self.core.frozen = true,
            EventType::E41ReceivedThaw => {
                if self.core.thaw() && !self.core.suspended {
                    self.core.post(ctx, EventType::E1SendFileData)?;
                }
            }
            _ => (),
        }
        Ok(())
    }

    fn complete(&mut self, ctx: &mut MachineContext) {
        self.core.send_eof(ctx);
        self.core.issue_eof_sent(ctx);
        self.core.issue_finished(ctx);
        self.shutdown();
    }

    fn cancel(&mut self, ctx: &mut MachineContext) {
        self.core.delivery_code = DeliveryCode::Incomplete;
        self.core.send_eof(ctx);
        self.core.issue_finished(ctx);
        self.shutdown();
    }

    pub fn shutdown(&mut self) {
        self.core.shutdown();
    }
}
