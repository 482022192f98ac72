//! # CFDP entity
//!
//! The [CfdpEntity] is the application facing part of this crate. It owns the transaction table
//! and exposes the CFDP service primitives.
//!
//! Every state transition is serialized through one event queue: requests from the application,
//! received PDUs, timer expirations and the follow-up events posted by the machines themselves
//! are all drained by a single event worker thread, which is the only owner of the machines.
//! A second worker processes the reserved messages to user (proxy put, directory listing and
//! remote suspension) by issuing new service requests on the same entity.
//!
//! Received PDUs are passed to the entity with [CfdpEntity::pdu_received] or through a
//! [PduHandler], which can be moved into the indication thread of a transport without keeping
//! the entity alive.
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::boxed::Box;
use std::format;
use std::io::Write;
use std::string::String;
use std::sync::{mpsc, Arc, Weak};
use std::thread::{self, JoinHandle};
use std::vec;
use std::vec::Vec;

use hashbrown::HashMap;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::event::{Event, EventType};
use crate::filestore::{join_virtual_path, FilestoreError, OpenMode, VirtualFilestore};
use crate::machine::{
    EventSink, Machine, MachineContext, MachineError, MachineState, ReceivedUserMessage,
    Receiver1, Receiver2, Sender1, Sender2, TransactionStatusReport,
};
use crate::pdu::user_msg::MessageToUser;
use crate::pdu::{
    AckPdu, ChecksumType, CodecError, ConditionCode, Direction, FileDirectiveType, Pdu,
    PduError, PduHeaderExt, TransactionStatus, TransmissionMode,
};
use crate::request::{PutRequest, PutRequestError};
use crate::timer::{TimerExpiry, TimerScheduler, TimerService};
use crate::transaction::Transaction;
use crate::transport::Transport;
use crate::user::{CfdpUser, DirectoryListingResponseParams};
use crate::{
    EntityConfig, EntityType, RemoteEntityConfig, RemoteEntityConfigProvider, TransactionId,
};

/// Name of the file a directory listing is written to, relative to the listed directory.
pub const DIRECTORY_LISTING_FILE: &str = ".listing";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EntityError {
    #[error("PDU error: {0}")]
    Pdu(#[from] CodecError),
    #[error("invalid put request: {0}")]
    PutRequest(#[from] PutRequestError),
    #[error("unknown transaction {0}")]
    UnknownTransaction(TransactionId),
    #[error("PDU with directive {0:?} is not handled by the transaction machines")]
    UnsupportedPdu(Option<FileDirectiveType>),
    #[error("entity was shut down")]
    ShutDown,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

enum Command {
    Insert(Box<Machine>),
    Event(Event),
    Pdu { pdu: Pdu, event_type: EventType },
    TimerExpired(TimerExpiry),
    Freeze(u64),
    Thaw(u64),
    Shutdown,
}

/// State shared between the entity handle and its worker threads.
struct EntityCore {
    config: EntityConfig,
    remote_cfg: Mutex<Box<dyn RemoteEntityConfigProvider + Send>>,
    filestore: Box<dyn VirtualFilestore>,
    transport: Arc<dyn Transport>,
    user: Mutex<Box<dyn CfdpUser>>,
    /// Last known status of every transaction, updated after each handled event.
    snapshots: RwLock<HashMap<TransactionId, TransactionStatusReport>>,
    event_tx: mpsc::Sender<Command>,
    /// [None] stops the message worker.
    message_tx: mpsc::Sender<Option<ReceivedUserMessage>>,
    seq_num: AtomicU64,
    scheduler: TimerScheduler,
    running: AtomicBool,
}

impl EventSink for EntityCore {
    fn post_event(&self, event: Event) -> Result<(), MachineError> {
        self.event_tx
            .send(Command::Event(event))
            .map_err(|_| MachineError::QueueClosed)
    }

    fn post_user_message(&self, message: ReceivedUserMessage) {
        if self.message_tx.send(Some(message)).is_err() {
            error!("message worker stopped, dropping message to user");
        }
    }
}

impl EntityCore {
    fn send(&self, cmd: Command) -> Result<(), EntityError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(EntityError::ShutDown);
        }
        self.event_tx.send(cmd).map_err(|_| EntityError::ShutDown)
    }

    fn put(&self, request: PutRequest) -> Result<TransactionId, EntityError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(EntityError::ShutDown);
        }
        let remote_cfg = self.remote_cfg.lock().get(request.destination_id).copied();
        let transmission_mode = request
            .trans_mode
            .or(remote_cfg.map(|cfg| cfg.default_transmission_mode))
            .unwrap_or(TransmissionMode::Unacknowledged);
        let checksum_type = request
            .checksum_type
            .or(remote_cfg.map(|cfg| cfg.default_checksum_type))
            .unwrap_or(ChecksumType::Modular);
        if !matches!(
            checksum_type,
            ChecksumType::Modular | ChecksumType::NullChecksum
        ) {
            return Err(PutRequestError::UnsupportedChecksumType(checksum_type).into());
        }
        let closure_requested = request
            .closure_requested
            .or(remote_cfg.map(|cfg| cfg.closure_requested_by_default))
            .unwrap_or(false);
        let max_file_segment_len = remote_cfg
            .and_then(|cfg| cfg.max_file_segment_len)
            .unwrap_or(self.config.max_file_segment_len);

        // Sequence numbers start at 1 and are never reused.
        let seq_num = self.seq_num.fetch_add(1, Ordering::Relaxed) + 1;
        let id = TransactionId::new(self.config.local_id, seq_num);
        let mut transaction = Transaction::new(
            id,
            request.destination_id,
            transmission_mode,
            max_file_segment_len,
        );
        transaction.source_file = request.source_file().map(String::from);
        transaction.dest_file = request.dest_file().map(String::from);
        transaction.checksum_type = checksum_type;
        transaction.closure_requested = closure_requested;
        transaction.fault_handler_overrides = request.fault_handler_overrides;
        transaction.msgs_to_user = request.msgs_to_user;
        transaction.fs_requests = request.fs_requests;

        let machine = match transmission_mode {
            TransmissionMode::Unacknowledged => Machine::Sender1(Sender1::new(transaction)),
            TransmissionMode::Acknowledged => Machine::Sender2(Sender2::new(
                transaction,
                &self.config,
                self.scheduler.clone(),
            )),
        };
        info!(
            "{id}: put request to entity {} in {:?} mode",
            request.destination_id, transmission_mode
        );
        self.snapshots.write().insert(id, machine.report());
        self.send(Command::Insert(Box::new(machine)))?;
        self.send(Command::Event(Event::new(id, EventType::E0EnteredState)))?;
        self.send(Command::Event(Event::new(
            id,
            EventType::E30ReceivedPutRequest,
        )))?;
        Ok(id)
    }

    /// Enqueue a request event for a known transaction.
    fn request(&self, id: TransactionId, event_type: EventType) -> Result<(), EntityError> {
        if !self.snapshots.read().contains_key(&id) {
            return Err(EntityError::UnknownTransaction(id));
        }
        self.send(Command::Event(Event::new(id, event_type)))
    }

    fn pdu_received(&self, raw_pdu: &[u8]) -> Result<(), EntityError> {
        let pdu = Pdu::from_bytes(raw_pdu)?;
        let Some(event_type) = EventType::for_pdu(&pdu) else {
            return Err(EntityError::UnsupportedPdu(pdu.directive_type()));
        };
        self.send(Command::Pdu { pdu, event_type })
    }

    fn run_event_worker(&self, rx: mpsc::Receiver<Command>) {
        let mut machines: HashMap<TransactionId, Machine> = HashMap::new();
        for cmd in rx.iter() {
            match cmd {
                Command::Insert(machine) => {
                    machines.insert(machine.id(), *machine);
                }
                Command::Event(event) => self.dispatch(&mut machines, event),
                Command::Pdu { pdu, event_type } => self.route_pdu(&mut machines, pdu, event_type),
                Command::TimerExpired(expiry) => {
                    let Some(machine) = machines.get_mut(&expiry.transaction_id) else {
                        continue;
                    };
                    let Some(event_type) = machine.on_timer_expiry(expiry.kind, expiry.generation)
                    else {
                        continue;
                    };
                    self.dispatch(
                        &mut machines,
                        Event::new(expiry.transaction_id, event_type),
                    );
                }
                Command::Freeze(remote_id) => {
                    for id in Self::sending_to(&machines, remote_id) {
                        self.dispatch(&mut machines, Event::new(id, EventType::E40ReceivedFreeze));
                    }
                }
                Command::Thaw(remote_id) => {
                    for id in Self::sending_to(&machines, remote_id) {
                        self.dispatch(&mut machines, Event::new(id, EventType::E41ReceivedThaw));
                    }
                }
                Command::Shutdown => break,
            }
        }
        let mut snapshots = self.snapshots.write();
        for machine in machines.values_mut() {
            machine.shutdown();
            snapshots.insert(machine.id(), machine.report());
        }
        debug!("entity {}: event worker stopped", self.config.local_id);
    }

    fn sending_to(
        machines: &HashMap<TransactionId, Machine>,
        remote_id: u64,
    ) -> Vec<TransactionId> {
        machines
            .values()
            .filter(|machine| {
                machine.entity_type() == EntityType::Sending
                    && !machine.is_completed()
                    && machine.remote_entity_id() == remote_id
            })
            .map(Machine::id)
            .collect()
    }

    fn dispatch(&self, machines: &mut HashMap<TransactionId, Machine>, event: Event) {
        let id = event.transaction_id;
        let Some(machine) = machines.get_mut(&id) else {
            debug!("{id}: dropping {:?} for unknown transaction", event.event_type);
            return;
        };
        if machine.is_completed() {
            debug!("{id}: dropping {:?} for completed transaction", event.event_type);
            return;
        }
        debug!("{id}: {:?} in state {:?}", event.event_type, machine.state());
        let mut user = self.user.lock();
        let mut ctx = MachineContext {
            config: &self.config,
            filestore: &*self.filestore,
            transport: &*self.transport,
            user: &mut **user,
            sink: self,
        };
        if let Err(e) = machine.handle(&mut ctx, event) {
            error!("{id}: {e}, abandoning transaction");
            machine.abandon(&mut ctx);
        }
        self.snapshots.write().insert(id, machine.report());
    }

    fn route_pdu(
        &self,
        machines: &mut HashMap<TransactionId, Machine>,
        pdu: Pdu,
        event_type: EventType,
    ) {
        let header = *pdu.header();
        let id = header.transaction_id();
        let pdu_conf = *header.common_pdu_conf();
        let addressed_to_us = match pdu_conf.direction {
            Direction::TowardsReceiver => header.dest_entity_id() == self.config.local_id,
            Direction::TowardsSender => header.source_entity_id() == self.config.local_id,
        };
        if !addressed_to_us {
            warn!(
                "{id}: dropping {:?} PDU addressed to another entity",
                pdu.directive_type()
            );
            return;
        }
        if let Some(machine) = machines.get(&id) {
            if !machine.is_completed() {
                if machine.transmission_mode() != pdu_conf.trans_mode {
                    warn!(
                        "{id}: dropping {:?} PDU with transmission mode {:?}",
                        pdu.directive_type(),
                        pdu_conf.trans_mode
                    );
                    return;
                }
                self.dispatch(machines, Event::with_pdu(id, event_type, pdu));
                return;
            }
            machines.remove(&id);
        }
        match pdu_conf.direction {
            Direction::TowardsSender => {
                if let Pdu::Finished(finished) = &pdu {
                    if pdu_conf.trans_mode == TransmissionMode::Acknowledged {
                        debug!("{id}: acknowledging Finished PDU of unknown transaction");
                        match AckPdu::new(
                            header.reply_header(),
                            FileDirectiveType::FinishedPdu,
                            finished.condition_code,
                            TransactionStatus::Unrecognized,
                        ) {
                            Ok(ack) => self.send_pdu(&Pdu::Ack(ack)),
                            Err(e) => {
                                error!("{id}: building ACK PDU failed: {}", PduError::from(e))
                            }
                        }
                        return;
                    }
                }
                debug!(
                    "{id}: dropping {:?} PDU of unknown transaction",
                    pdu.directive_type()
                );
            }
            Direction::TowardsReceiver => {
                if !matches!(pdu, Pdu::Metadata(_) | Pdu::FileData(_) | Pdu::Eof(_)) {
                    debug!(
                        "{id}: dropping {:?} PDU of unknown transaction",
                        pdu.directive_type()
                    );
                    return;
                }
                let machine = match pdu_conf.trans_mode {
                    TransmissionMode::Unacknowledged => Machine::Receiver1(Receiver1::new(
                        &self.config,
                        &header,
                        self.scheduler.clone(),
                    )),
                    TransmissionMode::Acknowledged => Machine::Receiver2(Receiver2::new(
                        &self.config,
                        &header,
                        self.scheduler.clone(),
                    )),
                };
                info!(
                    "{id}: new incoming transaction in {:?} mode",
                    pdu_conf.trans_mode
                );
                machines.insert(id, machine);
                self.dispatch(machines, Event::new(id, EventType::E0EnteredState));
                self.dispatch(machines, Event::with_pdu(id, event_type, pdu));
            }
        }
    }

    fn send_pdu(&self, pdu: &Pdu) {
        match pdu.to_vec() {
            Ok(raw_pdu) => {
                if let Err(e) = self.transport.request(&raw_pdu) {
                    error!("sending {:?} PDU failed: {e}", pdu.directive_type());
                }
            }
            Err(e) => error!("serializing {:?} PDU failed: {e}", pdu.directive_type()),
        }
    }

    fn run_message_worker(&self, rx: mpsc::Receiver<Option<ReceivedUserMessage>>) {
        while let Ok(Some(message)) = rx.recv() {
            let origin = message.origin;
            if let Err(e) = self.process_user_message(message) {
                error!("{origin}: processing message to user failed: {e}");
            }
        }
        debug!("entity {}: message worker stopped", self.config.local_id);
    }

    fn process_user_message(&self, received: ReceivedUserMessage) -> Result<(), EntityError> {
        let ReceivedUserMessage {
            origin,
            origin_mode,
            message,
        } = received;
        info!("{origin}: processing {:?}", message.message_type());
        let originating_id = MessageToUser::OriginatingTransactionId(origin);
        match message {
            MessageToUser::ProxyPutRequest {
                dest_entity_id,
                source_file_name,
                dest_file_name,
            } => {
                let request = PutRequest::new_regular_request(
                    dest_entity_id,
                    &source_file_name,
                    &dest_file_name,
                    Some(origin_mode),
                    None,
                )?
                .with_msgs_to_user(vec![originating_id]);
                self.put(request)?;
            }
            MessageToUser::ProxyPutCancel(id) => {
                self.request(id, EventType::E33ReceivedCancelRequest)?;
            }
            MessageToUser::DirectoryListingRequest {
                directory,
                listing_file,
            } => {
                let listing = self.write_directory_listing(&directory);
                if let Err(e) = &listing {
                    error!("{origin}: directory listing of {directory} failed: {e}");
                }
                let response = MessageToUser::DirectoryListingResponse {
                    successful: listing.is_ok(),
                    directory,
                    listing_file: listing_file.clone(),
                };
                let mut request = match listing {
                    Ok(path) => PutRequest::new_regular_request(
                        origin.source_id(),
                        &path,
                        &listing_file,
                        None,
                        None,
                    )?,
                    Err(_) => PutRequest::new_msgs_to_user_only(origin.source_id(), Vec::new()),
                }
                .with_msgs_to_user(vec![response, originating_id]);
                request.trans_mode = Some(origin_mode);
                self.put(request)?;
            }
            MessageToUser::DirectoryListingResponse {
                successful,
                directory,
                listing_file,
            } => {
                self.user
                    .lock()
                    .directory_listing_response_indication(&DirectoryListingResponseParams {
                        id: origin,
                        successful,
                        directory,
                        listing_file,
                    });
            }
            MessageToUser::RemoteSuspendRequest(id) => {
                let known = self.request(id, EventType::E31ReceivedSuspendRequest).is_ok();
                self.respond(
                    origin,
                    origin_mode,
                    MessageToUser::RemoteSuspendResponse {
                        transaction_id: id,
                        suspended: known,
                        transaction_status: Self::remote_status(known),
                    },
                )?;
            }
            MessageToUser::RemoteResumeRequest(id) => {
                let known = self.request(id, EventType::E32ReceivedResumeRequest).is_ok();
                self.respond(
                    origin,
                    origin_mode,
                    MessageToUser::RemoteResumeResponse {
                        transaction_id: id,
                        suspended: false,
                        transaction_status: Self::remote_status(known),
                    },
                )?;
            }
            MessageToUser::RemoteSuspendResponse {
                transaction_id,
                suspended,
                transaction_status,
            } => {
                if suspended {
                    self.user.lock().suspended_indication(
                        &transaction_id,
                        ConditionCode::SuspendRequestReceived,
                    );
                } else {
                    warn!(
                        "{transaction_id}: remote suspension failed, status {transaction_status:?}"
                    );
                }
            }
            MessageToUser::RemoteResumeResponse {
                transaction_id,
                suspended,
                transaction_status,
            } => {
                if !suspended && transaction_status != TransactionStatus::Unrecognized {
                    self.user.lock().resumed_indication(&transaction_id, 0);
                } else {
                    warn!(
                        "{transaction_id}: remote resumption failed, status {transaction_status:?}"
                    );
                }
            }
            MessageToUser::OriginatingTransactionId(id) => {
                debug!("{origin}: originating transaction {id}");
            }
        }
        Ok(())
    }

    fn remote_status(known: bool) -> TransactionStatus {
        if known {
            TransactionStatus::Active
        } else {
            TransactionStatus::Unrecognized
        }
    }

    /// Metadata only transaction back to the originating entity.
    fn respond(
        &self,
        origin: TransactionId,
        origin_mode: TransmissionMode,
        response: MessageToUser,
    ) -> Result<(), EntityError> {
        let mut request = PutRequest::new_msgs_to_user_only(
            origin.source_id(),
            vec![response, MessageToUser::OriginatingTransactionId(origin)],
        );
        request.trans_mode = Some(origin_mode);
        self.put(request)?;
        Ok(())
    }

    /// Returns the virtual path of the written listing.
    fn write_directory_listing(&self, directory: &str) -> Result<String, FilestoreError> {
        let listing = self.filestore.list_directory(directory)?;
        let path = join_virtual_path(directory, DIRECTORY_LISTING_FILE);
        let mut file = self.filestore.open(&path, OpenMode::Write)?;
        file.write_all(listing.as_bytes())?;
        Ok(path)
    }
}

/// Passes received PDUs to an entity without keeping it alive.
#[derive(Clone)]
pub struct PduHandler {
    core: Weak<EntityCore>,
}

impl PduHandler {
    pub fn pdu_received(&self, raw_pdu: &[u8]) -> Result<(), EntityError> {
        let core = self.core.upgrade().ok_or(EntityError::ShutDown)?;
        core.pdu_received(raw_pdu)
    }

    /// Indication callback for transports. Invalid PDUs are logged and dropped.
    pub fn indication(&self, raw_pdu: &[u8]) {
        if let Err(e) = self.pdu_received(raw_pdu) {
            warn!("dropping received PDU: {e}");
        }
    }
}

impl fmt::Debug for PduHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PduHandler")
            .field("alive", &(self.core.strong_count() > 0))
            .finish()
    }
}

/// CFDP entity with the service primitives of chapter 3.4 of the CFDP standard.
///
/// The entity spawns three threads: the event worker, the message worker and the timer service.
/// All of them are stopped by [CfdpEntity::shutdown], which is also called on drop.
///
/// Indications are issued from the worker threads, so [CfdpUser] implementations must not
/// call [CfdpEntity::shutdown].
pub struct CfdpEntity {
    core: Arc<EntityCore>,
    timer_service: Mutex<TimerService>,
    event_worker: Mutex<Option<JoinHandle<()>>>,
    message_worker: Mutex<Option<JoinHandle<()>>>,
}

impl CfdpEntity {
    pub fn new(
        config: EntityConfig,
        remote_cfg: impl RemoteEntityConfigProvider + Send + 'static,
        filestore: impl VirtualFilestore + 'static,
        transport: Arc<dyn Transport>,
        user: impl CfdpUser + 'static,
    ) -> Result<Self, EntityError> {
        let local_id = config.local_id;
        let (event_tx, event_rx) = mpsc::channel();
        let (message_tx, message_rx) = mpsc::channel();

        let expiry_tx = event_tx.clone();
        let timer_service =
            TimerService::start(&format!("cfdp-{local_id}-timers"), move |expiry| {
                if expiry_tx.send(Command::TimerExpired(expiry)).is_err() {
                    error!(
                        "{}: event queue closed, dropping {:?} timer expiry",
                        expiry.transaction_id, expiry.kind
                    );
                    return false;
                }
                true
            })?;

        let core = Arc::new(EntityCore {
            config,
            remote_cfg: Mutex::new(Box::new(remote_cfg)),
            filestore: Box::new(filestore),
            transport,
            user: Mutex::new(Box::new(user)),
            snapshots: RwLock::new(HashMap::new()),
            event_tx,
            message_tx,
            seq_num: AtomicU64::new(0),
            scheduler: timer_service.scheduler(),
            running: AtomicBool::new(true),
        });

        let worker_core = core.clone();
        let event_worker = thread::Builder::new()
            .name(format!("cfdp-{local_id}-events"))
            .spawn(move || worker_core.run_event_worker(event_rx))?;
        let worker_core = core.clone();
        let message_worker = thread::Builder::new()
            .name(format!("cfdp-{local_id}-messages"))
            .spawn(move || worker_core.run_message_worker(message_rx))?;
        info!("entity {local_id}: started");
        Ok(Self {
            core,
            timer_service: Mutex::new(timer_service),
            event_worker: Mutex::new(Some(event_worker)),
            message_worker: Mutex::new(Some(message_worker)),
        })
    }

    pub fn local_id(&self) -> u64 {
        self.core.config.local_id
    }

    pub fn config(&self) -> &EntityConfig {
        &self.core.config
    }

    pub fn pdu_handler(&self) -> PduHandler {
        PduHandler {
            core: Arc::downgrade(&self.core),
        }
    }

    /// Returns [false] if a configuration for the remote entity already exists.
    pub fn add_remote_config(&self, cfg: &RemoteEntityConfig) -> bool {
        self.core.remote_cfg.lock().add_config(cfg)
    }

    /// Start a new transaction. Returns the ID of the transaction, the transfer itself is
    /// executed asynchronously.
    pub fn put(&self, request: PutRequest) -> Result<TransactionId, EntityError> {
        self.core.put(request)
    }

    pub fn cancel(&self, id: TransactionId) -> Result<(), EntityError> {
        self.core.request(id, EventType::E33ReceivedCancelRequest)
    }

    pub fn suspend(&self, id: TransactionId) -> Result<(), EntityError> {
        self.core.request(id, EventType::E31ReceivedSuspendRequest)
    }

    pub fn resume(&self, id: TransactionId) -> Result<(), EntityError> {
        self.core.request(id, EventType::E32ReceivedResumeRequest)
    }

    /// The status is passed to [CfdpUser::report_indication].
    pub fn report(&self, id: TransactionId) -> Result<(), EntityError> {
        self.core.request(id, EventType::E34ReceivedReportRequest)
    }

    /// Status after the most recently handled event of the transaction.
    pub fn status(&self, id: TransactionId) -> Option<TransactionStatusReport> {
        self.core.snapshots.read().get(&id).copied()
    }

    /// Freeze all transactions sending to the remote entity.
    pub fn freeze(&self, remote_id: u64) -> Result<(), EntityError> {
        self.core.send(Command::Freeze(remote_id))
    }

    pub fn thaw(&self, remote_id: u64) -> Result<(), EntityError> {
        self.core.send(Command::Thaw(remote_id))
    }

    /// Unknown transactions are considered complete.
    pub fn is_complete(&self, id: TransactionId) -> bool {
        self.core
            .snapshots
            .read()
            .get(&id)
            .map_or(true, |report| report.state == MachineState::Completed)
    }

    pub fn pdu_received(&self, raw_pdu: &[u8]) -> Result<(), EntityError> {
        self.core.pdu_received(raw_pdu)
    }

    /// Stop all workers and shut down all transactions. Pending events are discarded.
    pub fn shutdown(&self) {
        if !self.core.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let local_id = self.local_id();
        info!("entity {local_id}: shutting down");
        if self.core.message_tx.send(None).is_err() {
            debug!("entity {local_id}: message worker already stopped");
        }
        if let Some(handle) = self.message_worker.lock().take() {
            if handle.join().is_err() {
                error!("entity {local_id}: message worker panicked");
            }
        }
        self.timer_service.lock().stop();
        if self.core.event_tx.send(Command::Shutdown).is_err() {
            debug!("entity {local_id}: event worker already stopped");
        }
        if let Some(handle) = self.event_worker.lock().take() {
            if handle.join().is_err() {
                error!("entity {local_id}: event worker panicked");
            }
        }
    }
}

impl fmt::Debug for CfdpEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CfdpEntity")
            .field("config", &self.core.config)
            .field("running", &self.core.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for CfdpEntity {
    fn drop(&mut self) {
        self.shutdown();
    }
}
