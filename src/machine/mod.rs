//! # Transaction state machines
//!
//! Every transaction is driven by one of four state machines, selected by the role of the local
//! entity and the transmission mode:
//!
//! - [sender1::Sender1] and [receiver1::Receiver1] for the unacknowledged mode (class 1).
//! - [sender2::Sender2] and [receiver2::Receiver2] for the acknowledged mode (class 2).
//!
//! The machines only react to [Event]s. Follow-up actions like sending the next file segment are
//! not executed directly but posted as new events through the [EventSink], so requests and
//! received PDUs of the same transaction interleave with long running transfers.
//!
//! The [Machine] enumeration dispatches to the concrete machine. All machines share the
//! [MachineCore], which holds the transaction together with the condition code, delivery code,
//! file status and the suspension and freeze flags.
use std::vec::Vec;

use log::{debug, error, info, warn};

use crate::event::{Event, EventType};
use crate::filestore::{execute_filestore_request, VirtualFilestore};
use crate::pdu::tlv::entity_id_tlv;
use crate::pdu::user_msg::MessageToUser;
use crate::pdu::{
    new_pdu_conf, CodecError, CommonPduConfig, ConditionCode, DeliveryCode, Direction, EofPdu,
    FaultHandlerCode, FileDataPduOwned, FileStatus, LargeFileFlag, MetadataGenericParams,
    MetadataPduOwned, Pdu, PduHeader, TransmissionMode,
};
use crate::timer::TimerKind;
use crate::transaction::{Transaction, TransactionError};
use crate::transport::Transport;
use crate::user::{CfdpUser, TransactionFinishedParams};
use crate::{EntityConfig, EntityType, TransactionId};

pub mod receiver1;
pub mod receiver2;
pub mod sender1;
pub mod sender2;

pub use receiver1::Receiver1;
pub use receiver2::Receiver2;
pub use sender1::Sender1;
pub use sender2::Sender2;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MachineState {
    SendMetadata,
    SendFile,
    SendEof,
    WaitForMetadata,
    WaitForEof,
    GetMissingData,
    SendFinished,
    TransactionCancelled,
    Completed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum MachineError {
    #[error("event {event:?} is not applicable in state {state:?}")]
    EventNotApplicable {
        state: MachineState,
        event: EventType,
    },
    #[error("event queue closed")]
    QueueClosed,
}

/// Status of a transaction as reported with the report indication.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TransactionStatusReport {
    pub id: TransactionId,
    pub entity_type: EntityType,
    pub transmission_mode: TransmissionMode,
    pub state: MachineState,
    pub condition_code: ConditionCode,
    pub delivery_code: DeliveryCode,
    pub file_status: FileStatus,
    pub progress: u64,
    pub file_size: Option<u64>,
    pub suspended: bool,
    pub frozen: bool,
}

/// Message to user received with the Metadata PDU of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedUserMessage {
    pub origin: TransactionId,
    pub origin_mode: TransmissionMode,
    pub message: MessageToUser,
}

/// Queue interface used by the machines to post follow-up events and received messages to user.
pub trait EventSink {
    fn post_event(&self, event: Event) -> Result<(), MachineError>;

    fn post_user_message(&self, message: ReceivedUserMessage);
}

/// Everything a machine needs to handle one event.
pub struct MachineContext<'a> {
    pub config: &'a EntityConfig,
    pub filestore: &'a dyn VirtualFilestore,
    pub transport: &'a dyn Transport,
    pub user: &'a mut dyn CfdpUser,
    pub sink: &'a dyn EventSink,
}

impl MachineContext<'_> {
    /// Transport errors are not fatal for a transaction: lost PDUs are handled by the protocol.
    pub fn send_pdu(&self, pdu: &Pdu) {
        let raw_pdu = match pdu.to_vec() {
            Ok(raw_pdu) => raw_pdu,
            Err(e) => {
                error!("serializing {:?} PDU failed: {e}", pdu.directive_type());
                return;
            }
        };
        if let Err(e) = self.transport.request(&raw_pdu) {
            error!(
                "{}: sending {:?} PDU failed: {e}",
                pdu.transaction_id(),
                pdu.directive_type()
            );
        }
    }
}

/// State shared by all machines.
#[derive(Debug)]
pub struct MachineCore {
    pub transaction: Transaction,
    pub state: MachineState,
    pub condition_code: ConditionCode,
    pub delivery_code: DeliveryCode,
    pub file_status: FileStatus,
    pub suspended: bool,
    pub frozen: bool,
    suspend_cause: ConditionCode,
}

impl MachineCore {
    pub fn new(transaction: Transaction, state: MachineState, delivery_code: DeliveryCode) -> Self {
        Self {
            transaction,
            state,
            condition_code: ConditionCode::NoError,
            delivery_code,
            file_status: FileStatus::Unreported,
            suspended: false,
            frozen: false,
            suspend_cause: ConditionCode::SuspendRequestReceived,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.transaction.id()
    }

    pub fn post(&self, ctx: &MachineContext, event_type: EventType) -> Result<(), MachineError> {
        ctx.sink.post_event(Event::new(self.id(), event_type))
    }

    /// Run the fault handler configured for the condition code. Cancellation, suspension and
    /// abandonment are executed asynchronously by posting the corresponding event.
    ///
    /// Returns the fault handler which was applied.
    pub fn declare_fault(
        &mut self,
        ctx: &mut MachineContext,
        condition_code: ConditionCode,
        progress: u64,
    ) -> Result<FaultHandlerCode, MachineError> {
        let handler = self
            .transaction
            .fault_handler_for(condition_code, &ctx.config.default_fault_handlers);
        error!(
            "{}: fault {:?} in state {:?}, handler {:?}",
            self.id(),
            condition_code,
            self.state,
            handler
        );
        match handler {
            FaultHandlerCode::NoticeOfCancellation => {
                self.condition_code = condition_code;
                self.post(ctx, EventType::E3NoticeOfCancellation)?;
            }
            FaultHandlerCode::NoticeOfSuspension => {
                self.suspend_cause = condition_code;
                self.post(ctx, EventType::E4NoticeOfSuspension)?;
            }
            FaultHandlerCode::IgnoreError => {
                info!("{}: ignoring fault {:?}", self.id(), condition_code);
                ctx.user
                    .fault_indication(&self.id(), condition_code, progress);
            }
            FaultHandlerCode::AbandonTransaction => {
                self.condition_code = condition_code;
                self.post(ctx, EventType::E2AbandonTransaction)?;
            }
        }
        Ok(handler)
    }

    /// Declare a fault and return true if the handler interrupts the current activity, which
    /// is the case for all handlers except [FaultHandlerCode::IgnoreError].
    pub fn fault_interrupts(
        &mut self,
        ctx: &mut MachineContext,
        condition_code: ConditionCode,
        progress: u64,
    ) -> Result<bool, MachineError> {
        Ok(self.declare_fault(ctx, condition_code, progress)? != FaultHandlerCode::IgnoreError)
    }

    pub fn issue_finished(&self, ctx: &mut MachineContext) {
        if ctx.config.indication_cfg.transaction_finished {
            ctx.user
                .transaction_finished_indication(&TransactionFinishedParams {
                    id: self.id(),
                    condition_code: self.condition_code,
                    delivery_code: self.delivery_code,
                    file_status: self.file_status,
                });
        }
    }

    pub fn issue_abandoned(&self, ctx: &mut MachineContext, progress: u64) {
        ctx.user
            .abandoned_indication(&self.id(), self.condition_code, progress);
    }

    pub fn issue_eof_sent(&self, ctx: &mut MachineContext) {
        if ctx.config.indication_cfg.eof_sent {
            ctx.user.eof_sent_indication(&self.id());
        }
    }

    pub fn issue_eof_recvd(&self, ctx: &mut MachineContext) {
        if ctx.config.indication_cfg.eof_recv {
            ctx.user.eof_recvd_indication(&self.id());
        }
    }

    /// Handle a suspension request (E31).
    pub fn request_suspension(&mut self, ctx: &MachineContext) -> Result<(), MachineError> {
        self.suspend_cause = ConditionCode::SuspendRequestReceived;
        self.post(ctx, EventType::E4NoticeOfSuspension)
    }

    /// Returns true if the transaction was not suspended before.
    pub fn suspend(&mut self, ctx: &mut MachineContext) -> bool {
        if self.suspended {
            return false;
        }
        self.suspended = true;
        if ctx.config.indication_cfg.suspended {
            ctx.user.suspended_indication(&self.id(), self.suspend_cause);
        }
        true
    }

    /// Returns true if the transaction was suspended before.
    pub fn resume(&mut self, ctx: &mut MachineContext, progress: u64) -> bool {
        if !self.suspended {
            return false;
        }
        self.suspended = false;
        if ctx.config.indication_cfg.resumed {
            ctx.user.resumed_indication(&self.id(), progress);
        }
        true
    }

    /// Returns true if the transaction was frozen before.
    pub fn thaw(&mut self) -> bool {
        let was_frozen = self.frozen;
        self.frozen = false;
        was_frozen
    }

    pub fn request_cancellation(&mut self, ctx: &MachineContext) -> Result<(), MachineError> {
        self.condition_code = ConditionCode::CancelRequestReceived;
        self.post(ctx, EventType::E3NoticeOfCancellation)
    }

    pub fn report(&self, entity_type: EntityType, progress: u64) -> TransactionStatusReport {
        TransactionStatusReport {
            id: self.id(),
            entity_type,
            transmission_mode: self.transaction.transmission_mode,
            state: self.state,
            condition_code: self.condition_code,
            delivery_code: self.delivery_code,
            file_status: self.file_status,
            progress,
            file_size: self.transaction.cached_file_size(),
            suspended: self.suspended,
            frozen: self.frozen,
        }
    }

    pub fn issue_report(&self, ctx: &mut MachineContext, entity_type: EntityType, progress: u64) {
        ctx.user.report_indication(&self.report(entity_type, progress));
    }

    pub fn shutdown(&mut self) {
        debug!("{}: shutdown in state {:?}", self.id(), self.state);
        self.transaction.close_file();
        self.state = MachineState::Completed;
    }

    /// Forward the messages to user of the transaction to the message worker.
    pub fn queue_user_messages(&self, ctx: &MachineContext) {
        for message in &self.transaction.msgs_to_user {
            ctx.sink.post_user_message(ReceivedUserMessage {
                origin: self.id(),
                origin_mode: self.transaction.transmission_mode,
                message: message.clone(),
            });
        }
    }

    /// Failing requests do not stop the execution of the following requests.
    pub fn execute_filestore_requests(&self, ctx: &MachineContext) {
        for request in &self.transaction.fs_requests {
            info!("{}: executing filestore request {:?}", self.id(), request);
            if let Err(e) = execute_filestore_request(ctx.filestore, request) {
                error!(
                    "{}: filestore request {:?} failed: {e}",
                    self.id(),
                    request
                );
            }
        }
    }

    /// PDU configuration for PDUs sent by the sending entity of the transaction. Files larger
    /// than 4 GiB use the large file flag.
    pub fn sender_pdu_conf(
        &mut self,
        ctx: &MachineContext,
    ) -> Result<CommonPduConfig, CodecError> {
        let id = self.id();
        let file_flag = if self.transaction.file_size(ctx.filestore) > u64::from(u32::MAX) {
            LargeFileFlag::Large
        } else {
            LargeFileFlag::Normal
        };
        new_pdu_conf(
            Direction::TowardsReceiver,
            self.transaction.transmission_mode,
            id.source_id(),
            id.seq_num(),
            self.transaction.dest_entity_id,
            file_flag,
        )
    }

    pub fn sender_header(&mut self, ctx: &MachineContext) -> Result<PduHeader, CodecError> {
        Ok(PduHeader::new_no_file_data(self.sender_pdu_conf(ctx)?, 0))
    }

    pub fn send_metadata(&mut self, ctx: &MachineContext) {
        let header = match self.sender_header(ctx) {
            Ok(header) => header,
            Err(e) => {
                error!("{}: building metadata header failed: {e}", self.id());
                return;
            }
        };
        let file_size = self.transaction.file_size(ctx.filestore);
        let metadata = MetadataPduOwned::new(
            header,
            MetadataGenericParams::new(
                self.transaction.closure_requested,
                self.transaction.checksum_type,
                file_size,
            ),
            self.transaction.source_file.clone(),
            self.transaction.dest_file.clone(),
            self.transaction.metadata_options(),
        );
        ctx.send_pdu(&Pdu::Metadata(metadata));
    }

    /// Send one file segment. Without an offset, the next segment after the cursor is sent.
    ///
    /// Read failures are returned, the caller declares the filestore rejection fault.
    pub fn send_file_segment(
        &mut self,
        ctx: &MachineContext,
        offset: Option<u64>,
        len: Option<u64>,
    ) -> Result<(), TransactionError> {
        let pdu_conf = match self.sender_pdu_conf(ctx) {
            Ok(pdu_conf) => pdu_conf,
            Err(e) => {
                error!("{}: building file data header failed: {e}", self.id());
                return Ok(());
            }
        };
        let (offset, data) = self.transaction.read_segment(offset, len)?;
        ctx.send_pdu(&Pdu::FileData(FileDataPduOwned::new(pdu_conf, offset, data)));
        Ok(())
    }

    /// EOF with the current condition code. The fault location is the local entity.
    pub fn send_eof(&mut self, ctx: &MachineContext) {
        let header = match self.sender_header(ctx) {
            Ok(header) => header,
            Err(e) => {
                error!("{}: building EOF header failed: {e}", self.id());
                return;
            }
        };
        let file_size = self.transaction.file_size(ctx.filestore);
        let checksum = self
            .transaction
            .file_checksum(ctx.filestore)
            .unwrap_or_else(|e| {
                warn!("{}: file checksum unavailable: {e}", self.id());
                0
            });
        let fault_location = (self.condition_code != ConditionCode::NoError)
            .then(|| entity_id_tlv(ctx.config.local_id));
        let eof = EofPdu::new(
            header,
            self.condition_code,
            checksum,
            file_size,
            fault_location,
        );
        ctx.send_pdu(&Pdu::Eof(eof));
    }
}

/// One of the four transaction state machines.
#[derive(Debug)]
pub enum Machine {
    Sender1(Sender1),
    Receiver1(Receiver1),
    Sender2(Sender2),
    Receiver2(Receiver2),
}

impl Machine {
    pub fn handle(&mut self, ctx: &mut MachineContext, event: Event) -> Result<(), MachineError> {
        match self {
            Machine::Sender1(machine) => machine.handle(ctx, event),
            Machine::Receiver1(machine) => machine.handle(ctx, event),
            Machine::Sender2(machine) => machine.handle(ctx, event),
            Machine::Receiver2(machine) => machine.handle(ctx, event),
        }
    }

    fn core(&self) -> &MachineCore {
        match self {
            Machine::Sender1(machine) => &machine.core,
            Machine::Receiver1(machine) => &machine.core,
            Machine::Sender2(machine) => &machine.core,
            Machine::Receiver2(machine) => &machine.core,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.core().id()
    }

    pub fn state(&self) -> MachineState {
        self.core().state
    }

    pub fn is_completed(&self) -> bool {
        self.state() == MachineState::Completed
    }

    pub fn transmission_mode(&self) -> TransmissionMode {
        self.core().transaction.transmission_mode
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Machine::Sender1(_) | Machine::Sender2(_) => EntityType::Sending,
            Machine::Receiver1(_) | Machine::Receiver2(_) => EntityType::Receiving,
        }
    }

    /// ID of the remote entity of the transaction.
    pub fn remote_entity_id(&self) -> u64 {
        match self.entity_type() {
            EntityType::Sending => self.core().transaction.dest_entity_id,
            EntityType::Receiving => self.id().source_id(),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.core().suspended
    }

    pub fn condition_code(&self) -> ConditionCode {
        self.core().condition_code
    }

    pub fn progress(&self) -> u64 {
        match self {
            Machine::Sender1(machine) => machine.progress(),
            Machine::Receiver1(machine) => machine.progress(),
            Machine::Sender2(machine) => machine.progress(),
            Machine::Receiver2(machine) => machine.progress(),
        }
    }

    pub fn report(&self) -> TransactionStatusReport {
        self.core().report(self.entity_type(), self.progress())
    }

    /// Convert a timer expiration into the corresponding event. Stale expirations of cancelled
    /// or restarted timers yield [None].
    pub fn on_timer_expiry(&mut self, kind: TimerKind, generation: u64) -> Option<EventType> {
        let timer = match self {
            Machine::Sender1(_) => None,
            Machine::Receiver1(machine) => machine.timer_mut(kind),
            Machine::Sender2(machine) => machine.timer_mut(kind),
            Machine::Receiver2(machine) => machine.timer_mut(kind),
        }?;
        if !timer.on_expiry(generation) {
            return None;
        }
        Some(match kind {
            TimerKind::Inactivity => EventType::E27InactivityTimeout,
            TimerKind::PositiveAck => EventType::E25AckTimeout,
            TimerKind::Nak => EventType::E26NakTimeout,
        })
    }

    /// Abandon the transaction immediately, used after contract violations.
    pub fn abandon(&mut self, ctx: &mut MachineContext) {
        let progress = self.progress();
        match self {
            Machine::Sender1(machine) => {
                machine.core.issue_abandoned(ctx, progress);
                machine.shutdown();
            }
            Machine::Receiver1(machine) => {
                machine.core.issue_abandoned(ctx, progress);
                machine.shutdown();
            }
            Machine::Sender2(machine) => {
                machine.core.issue_abandoned(ctx, progress);
                machine.shutdown();
            }
            Machine::Receiver2(machine) => {
                machine.core.issue_abandoned(ctx, progress);
                machine.shutdown();
            }
        }
    }

    pub fn shutdown(&mut self) {
        match self {
            Machine::Sender1(machine) => machine.shutdown(),
            Machine::Receiver1(machine) => machine.shutdown(),
            Machine::Sender2(machine) => machine.shutdown(),
            Machine::Receiver2(machine) => machine.shutdown(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    //! Test harness shared by the machine tests: events and messages posted by a machine are
    //! collected in channels, sent PDUs in another channel.
    use std::collections::HashMap;
    use std::sync::mpsc;
    use std::vec::Vec;

    use super::*;
    use crate::filestore::NativeFilestore;
    use crate::pdu::Pdu;
    use crate::timer::{TimerCommand, TimerScheduler};
    use crate::user::{FileSegmentRecvdParams, MetadataReceivedParams, OwnedMetadataRecvdParams};

    pub struct TestSink {
        pub events: mpsc::Sender<Event>,
        pub messages: mpsc::Sender<ReceivedUserMessage>,
    }

    impl EventSink for TestSink {
        fn post_event(&self, event: Event) -> Result<(), MachineError> {
            self.events
                .send(event)
                .map_err(|_| MachineError::QueueClosed)
        }

        fn post_user_message(&self, message: ReceivedUserMessage) {
            self.messages.send(message).unwrap();
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Indication {
        Transaction(TransactionId),
        EofSent(TransactionId),
        Finished(TransactionFinishedParams),
        Metadata(OwnedMetadataRecvdParams),
        FileSegment(FileSegmentRecvdParams),
        Report(TransactionStatusReport),
        Suspended(TransactionId, ConditionCode),
        Resumed(TransactionId, u64),
        Fault(TransactionId, ConditionCode, u64),
        Abandoned(TransactionId, ConditionCode, u64),
        EofRecvd(TransactionId),
    }

    #[derive(Default)]
    pub struct TestUser {
        pub indications: Vec<Indication>,
    }

    impl TestUser {
        pub fn finished(&self) -> Option<TransactionFinishedParams> {
            self.indications.iter().find_map(|indication| match indication {
                Indication::Finished(params) => Some(*params),
                _ => None,
            })
        }

        pub fn count(&self, predicate: impl Fn(&Indication) -> bool) -> usize {
            self.indications.iter().filter(|i| predicate(i)).count()
        }
    }

    impl CfdpUser for TestUser {
        fn transaction_indication(&mut self, id: &TransactionId) {
            self.indications.push(Indication::Transaction(*id));
        }
        fn eof_sent_indication(&mut self, id: &TransactionId) {
            self.indications.push(Indication::EofSent(*id));
        }
        fn transaction_finished_indication(&mut self, finished_params: &TransactionFinishedParams) {
            self.indications.push(Indication::Finished(*finished_params));
        }
        fn metadata_recvd_indication(&mut self, md_recvd_params: &MetadataReceivedParams) {
            self.indications
                .push(Indication::Metadata(md_recvd_params.into()));
        }
        fn file_segment_recvd_indication(&mut self, segment_recvd_params: &FileSegmentRecvdParams) {
            self.indications
                .push(Indication::FileSegment(*segment_recvd_params));
        }
        fn report_indication(&mut self, report: &TransactionStatusReport) {
            self.indications.push(Indication::Report(*report));
        }
        fn suspended_indication(&mut self, id: &TransactionId, condition_code: ConditionCode) {
            self.indications
                .push(Indication::Suspended(*id, condition_code));
        }
        fn resumed_indication(&mut self, id: &TransactionId, progress: u64) {
            self.indications.push(Indication::Resumed(*id, progress));
        }
        fn fault_indication(
            &mut self,
            id: &TransactionId,
            condition_code: ConditionCode,
            progress: u64,
        ) {
            self.indications
                .push(Indication::Fault(*id, condition_code, progress));
        }
        fn abandoned_indication(
            &mut self,
            id: &TransactionId,
            condition_code: ConditionCode,
            progress: u64,
        ) {
            self.indications
                .push(Indication::Abandoned(*id, condition_code, progress));
        }
        fn eof_recvd_indication(&mut self, id: &TransactionId) {
            self.indications.push(Indication::EofRecvd(*id));
        }
    }

    /// Drives a single machine. Posted events are not handled automatically, tests pop them
    /// with [Testbench::run] to control interleaving.
    pub struct Testbench {
        pub config: EntityConfig,
        pub filestore: NativeFilestore,
        pub transport: mpsc::Sender<Vec<u8>>,
        pub sent: mpsc::Receiver<Vec<u8>>,
        pub user: TestUser,
        pub sink: TestSink,
        pub events: mpsc::Receiver<Event>,
        pub messages: mpsc::Receiver<ReceivedUserMessage>,
        timer_tx: mpsc::Sender<TimerCommand>,
        timer_rx: mpsc::Receiver<TimerCommand>,
        scheduled: HashMap<TimerKind, u64>,
        _tmpdir: tempfile::TempDir,
    }

    impl Testbench {
        pub fn new(config: EntityConfig) -> Self {
            let tmpdir = tempfile::tempdir().unwrap();
            let (transport, sent) = mpsc::channel();
            let (event_tx, events) = mpsc::channel();
            let (message_tx, messages) = mpsc::channel();
            let (timer_tx, timer_rx) = mpsc::channel();
            Self {
                config,
                filestore: NativeFilestore::new(tmpdir.path()),
                transport,
                sent,
                user: TestUser::default(),
                sink: TestSink {
                    events: event_tx,
                    messages: message_tx,
                },
                events,
                messages,
                timer_tx,
                timer_rx,
                scheduled: HashMap::new(),
                _tmpdir: tmpdir,
            }
        }

        pub fn scheduler(&self) -> TimerScheduler {
            TimerScheduler::new(self.timer_tx.clone())
        }

        /// Let the most recently scheduled timer of the given kind expire. Returns false if
        /// the timer is not running anymore.
        pub fn expire(&mut self, machine: &mut Machine, kind: TimerKind) -> bool {
            for cmd in self.timer_rx.try_iter() {
                match cmd {
                    TimerCommand::Schedule { expiry, .. } => {
                        self.scheduled.insert(expiry.kind, expiry.generation);
                    }
                    TimerCommand::Cancel { kind, .. } => {
                        self.scheduled.remove(&kind);
                    }
                    TimerCommand::Shutdown => (),
                }
            }
            let Some(generation) = self.scheduled.remove(&kind) else {
                return false;
            };
            let Some(event_type) = machine.on_timer_expiry(kind, generation) else {
                return false;
            };
            let id = machine.id();
            self.handle(machine, Event::new(id, event_type)).unwrap();
            true
        }

        pub fn root(&self) -> &std::path::Path {
            self.filestore.root()
        }

        pub fn handle(&mut self, machine: &mut Machine, event: Event) -> Result<(), MachineError> {
            let mut ctx = MachineContext {
                config: &self.config,
                filestore: &self.filestore,
                transport: &self.transport,
                user: &mut self.user,
                sink: &self.sink,
            };
            machine.handle(&mut ctx, event)
        }

        /// Handle all posted events until the queue is empty or the limit is reached.
        pub fn run(&mut self, machine: &mut Machine, limit: usize) -> usize {
            let mut handled = 0;
            while handled < limit {
                let Ok(event) = self.events.try_recv() else {
                    break;
                };
                self.handle(machine, event).unwrap();
                handled += 1;
            }
            handled
        }

        pub fn sent_pdus(&self) -> Vec<Pdu> {
            self.sent
                .try_iter()
                .map(|raw| Pdu::from_bytes(&raw).unwrap())
                .collect()
        }

        pub fn posted_events(&self) -> Vec<EventType> {
            self.events.try_iter().map(|event| event.event_type).collect()
        }
    }
}
