//! This crate contains an implementation of a CCSDS File Delivery Protocol (CFDP) entity as
//! specified in CCSDS 727.0-B-5.
//!
//! The basic idea of CFDP is to convert files of any size into a stream of packets called packet
//! data units (PDU). CFPD has an unacknowledged and acknowledged mode. The unacknowledged mode
//! (class 1) is applicable for simplex communication paths, while the acknowledged mode (class 2)
//! includes multiple mechanisms to ensure a successful file transfer even for unreliable
//! connections, including lost segment detection and retransmission. As such, it can be compared
//! to a specialized TCP for file transfers with remote systems.
//!
//! The crate is split into the following parts:
//!
//! - The [pdu] module contains the wire format codec for all PDUs, TLVs and the reserved
//!   messages to user. It only requires the `alloc` feature.
//! - The [segments] module tracks received file segments and derives the missing ranges which
//!   are requested with NAK PDUs.
//! - The [machine] module contains the four class specific state machines: the unacknowledged
//!   sender and receiver and the acknowledged sender and receiver.
//! - The [entity::CfdpEntity] owns the transaction table and serializes every state transition
//!   through one event queue which is drained by a dedicated worker thread. It exposes the CFDP
//!   service primitives: put, cancel, suspend, resume, report, freeze and thaw.
//! - The [filestore::VirtualFilestore], [transport::Transport] and [user::CfdpUser] traits are
//!   the seams to the host system, the underlying communication link and the application.
//!
//! # Examples
//!
//! The end-to-end test in `tests/end-to-end.rs` connects two entities through an in-memory link
//! with programmable packet loss and performs file copy operations in both transmission modes.
//! You can run it with printout to the standard console by running:
//!
//! ```sh
//! cargo test --test end-to-end -- --nocapture
//! ```
//!
//! The `udp-entity` demo application starts one entity on a UDP socket and can optionally put
//! a file to a remote entity.
//!
//! # Notes on threading
//!
//! All machine state is mutated by the single event worker of an entity. Timers, transports and
//! the application only ever enqueue events, so no locks are required for the transaction state.
//! The only shared table is a lock protected snapshot of each transaction state which backs the
//! [entity::CfdpEntity::is_complete] query.
#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(any(feature = "std", test))]
extern crate std;

#[cfg(feature = "std")]
pub mod entity;
#[cfg(feature = "std")]
pub mod event;
#[cfg(feature = "std")]
pub mod filestore;
#[cfg(feature = "std")]
pub mod machine;
#[cfg(feature = "alloc")]
pub mod pdu;
#[cfg(feature = "alloc")]
pub mod request;
#[cfg(feature = "alloc")]
pub mod segments;
#[cfg(feature = "std")]
pub mod timer;
#[cfg(feature = "std")]
pub mod transaction;
#[cfg(feature = "std")]
pub mod transport;
#[cfg(feature = "std")]
pub mod user;

use core::fmt::Display;
use core::time::Duration;
use derive_new::new;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "alloc")]
pub use alloc_mod::*;
#[cfg(feature = "std")]
pub use std_mod::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EntityType {
    Sending,
    Receiving,
}

/// The CFDP transaction ID of a CFDP transaction consists of the source entity ID and the sequence
/// number of that transfer which is also determined by the CFDP source entity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, new)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransactionId {
    source_id: u64,
    seq_num: u64,
}

impl TransactionId {
    pub fn source_id(&self) -> u64 {
        self.source_id
    }

    pub fn seq_num(&self) -> u64 {
        self.seq_num
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {})", self.source_id, self.seq_num)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IndicationConfig {
    pub eof_sent: bool,
    pub eof_recv: bool,
    pub file_segment_recv: bool,
    pub transaction_finished: bool,
    pub suspended: bool,
    pub resumed: bool,
}

impl Default for IndicationConfig {
    fn default() -> Self {
        Self {
            eof_sent: true,
            eof_recv: true,
            file_segment_recv: true,
            transaction_finished: true,
            suspended: true,
            resumed: true,
        }
    }
}

#[cfg(feature = "alloc")]
pub mod alloc_mod {
    use super::*;
    use crate::pdu::{ChecksumType, ConditionCode, FaultHandlerCode, TransmissionMode};

    /// Maps each fault [ConditionCode] to one of the four [FaultHandlerCode]s as specified in
    /// chapter 4.8 of the CFDP standard.
    ///
    /// Some note on the provided default settings:
    ///
    /// - Checksum failures will be ignored by default. Retransmission in the acknowledged mode
    ///   cannot repair a file whose content was damaged at the source.
    /// - Unsupported checksum types will also be ignored by default. Even if the checksum type is
    ///   not supported the file transfer might still have worked properly.
    ///
    /// For all other faults, the default fault handling operation will be to cancel the
    /// transaction. The sending entity can override these defaults per transaction with fault
    /// handler override TLVs.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct FaultHandlerTable {
        handler_array: [FaultHandlerCode; 10],
    }

    impl FaultHandlerTable {
        fn condition_code_to_array_index(condition_code: ConditionCode) -> Option<usize> {
            Some(match condition_code {
                ConditionCode::PositiveAckLimitReached => 0,
                ConditionCode::KeepAliveLimitReached => 1,
                ConditionCode::InvalidTransmissionMode => 2,
                ConditionCode::FilestoreRejection => 3,
                ConditionCode::FileChecksumFailure => 4,
                ConditionCode::FileSizeError => 5,
                ConditionCode::NakLimitReached => 6,
                ConditionCode::InactivityDetected => 7,
                ConditionCode::CheckLimitReached => 8,
                ConditionCode::UnsupportedChecksumType => 9,
                _ => return None,
            })
        }

        /// Condition codes which are not faults are ignored.
        pub fn set_fault_handler(
            &mut self,
            condition_code: ConditionCode,
            fault_handler: FaultHandlerCode,
        ) {
            if let Some(idx) = Self::condition_code_to_array_index(condition_code) {
                self.handler_array[idx] = fault_handler;
            }
        }

        pub fn get_fault_handler(&self, condition_code: ConditionCode) -> FaultHandlerCode {
            match Self::condition_code_to_array_index(condition_code) {
                Some(idx) => self.handler_array[idx],
                None => FaultHandlerCode::IgnoreError,
            }
        }
    }

    impl Default for FaultHandlerTable {
        fn default() -> Self {
            let mut table = Self {
                handler_array: [FaultHandlerCode::NoticeOfCancellation; 10],
            };
            table.set_fault_handler(
                ConditionCode::FileChecksumFailure,
                FaultHandlerCode::IgnoreError,
            );
            table.set_fault_handler(
                ConditionCode::UnsupportedChecksumType,
                FaultHandlerCode::IgnoreError,
            );
            table
        }
    }

    /// Configuration of the local CFDP entity.
    ///
    /// All timer intervals are optional: a timer without an interval never expires. The same
    /// applies to the expiration limits: a timer without a limit may expire indefinitely.
    #[derive(Debug, Clone, PartialEq, Eq)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct EntityConfig {
        pub local_id: u64,
        pub indication_cfg: IndicationConfig,
        pub default_fault_handlers: FaultHandlerTable,
        pub inactivity_timeout: Option<Duration>,
        pub positive_ack_timer_interval: Option<Duration>,
        pub positive_ack_timer_expiration_limit: Option<u32>,
        pub nak_timer_interval: Option<Duration>,
        pub nak_timer_expiration_limit: Option<u32>,
        pub max_file_segment_len: u64,
        /// Treat events which are not applicable in the current sender state as a contract
        /// violation which abandons the transaction.
        pub strict_event_handling: bool,
    }

    impl EntityConfig {
        pub fn new(local_id: u64) -> Self {
            Self {
                local_id,
                indication_cfg: IndicationConfig::default(),
                default_fault_handlers: FaultHandlerTable::default(),
                inactivity_timeout: Some(Duration::from_secs(30)),
                positive_ack_timer_interval: Some(Duration::from_secs(10)),
                positive_ack_timer_expiration_limit: Some(3),
                nak_timer_interval: Some(Duration::from_secs(10)),
                nak_timer_expiration_limit: Some(3),
                max_file_segment_len: 1024,
                strict_event_handling: false,
            }
        }

        pub fn with_indication_cfg(mut self, indication_cfg: IndicationConfig) -> Self {
            self.indication_cfg = indication_cfg;
            self
        }

        pub fn with_fault_handler(
            mut self,
            condition_code: ConditionCode,
            fault_handler: FaultHandlerCode,
        ) -> Self {
            self.default_fault_handlers
                .set_fault_handler(condition_code, fault_handler);
            self
        }

        pub fn with_inactivity_timeout(mut self, timeout: Option<Duration>) -> Self {
            self.inactivity_timeout = timeout;
            self
        }

        pub fn with_positive_ack_timer(
            mut self,
            interval: Option<Duration>,
            expiration_limit: Option<u32>,
        ) -> Self {
            self.positive_ack_timer_interval = interval;
            self.positive_ack_timer_expiration_limit = expiration_limit;
            self
        }

        pub fn with_nak_timer(
            mut self,
            interval: Option<Duration>,
            expiration_limit: Option<u32>,
        ) -> Self {
            self.nak_timer_interval = interval;
            self.nak_timer_expiration_limit = expiration_limit;
            self
        }

        pub fn with_max_file_segment_len(mut self, max_file_segment_len: u64) -> Self {
            self.max_file_segment_len = max_file_segment_len;
            self
        }

        pub fn with_strict_event_handling(mut self, strict: bool) -> Self {
            self.strict_event_handling = strict;
            self
        }
    }

    /// This structure models the remote entity configuration information as specified in chapter
    /// 8.3 of the CFDP standard.
    ///
    /// Some of the fields which were not considered necessary for the entity implementation
    /// were omitted. The remaining fields are used as defaults for put requests which do not
    /// specify them explicitly.
    ///
    /// ## Field documentation
    ///
    /// * `entity_id` - The ID of the remote entity.
    /// * `max_file_segment_len` - Overrides the maximum file segment length of the local
    ///    entity configuration for transfers to this remote entity.
    /// * `closure_requested_by_default` - Closure requested flag used for unacknowledged put
    ///    requests to this entity.
    /// * `default_transmission_mode` - Transmission mode used when the put request does not
    ///    specify one.
    /// * `default_checksum_type` - Checksum type used when the put request does not specify one.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct RemoteEntityConfig {
        pub entity_id: u64,
        pub max_file_segment_len: Option<u64>,
        pub closure_requested_by_default: bool,
        pub default_transmission_mode: TransmissionMode,
        pub default_checksum_type: ChecksumType,
    }

    impl RemoteEntityConfig {
        pub fn new_with_default_values(
            entity_id: u64,
            closure_requested_by_default: bool,
            default_transmission_mode: TransmissionMode,
            default_checksum_type: ChecksumType,
        ) -> Self {
            Self {
                entity_id,
                max_file_segment_len: None,
                closure_requested_by_default,
                default_transmission_mode,
                default_checksum_type,
            }
        }
    }

    pub trait RemoteEntityConfigProvider {
        /// Retrieve the remote entity configuration for the given remote ID.
        fn get(&self, remote_id: u64) -> Option<&RemoteEntityConfig>;
        fn get_mut(&mut self, remote_id: u64) -> Option<&mut RemoteEntityConfig>;
        /// Add a new remote configuration. Return [true] if the configuration was
        /// inserted successfully, and [false] if a configuration already exists.
        fn add_config(&mut self, cfg: &RemoteEntityConfig) -> bool;
        /// Remote a configuration. Returns [true] if the configuration was removed successfully,
        /// and [false] if no configuration exists for the given remote ID.
        fn remove_config(&mut self, remote_id: u64) -> bool;
    }

    /// This is a thin wrapper around a [alloc::vec::Vec] to store remote entity configurations.
    /// It implements the full [RemoteEntityConfigProvider] trait.
    #[derive(Default, Debug)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct VecRemoteEntityConfigProvider(pub alloc::vec::Vec<RemoteEntityConfig>);

    impl RemoteEntityConfigProvider for VecRemoteEntityConfigProvider {
        fn get(&self, remote_id: u64) -> Option<&RemoteEntityConfig> {
            self.0.iter().find(|&cfg| cfg.entity_id == remote_id)
        }

        fn get_mut(&mut self, remote_id: u64) -> Option<&mut RemoteEntityConfig> {
            self.0.iter_mut().find(|cfg| cfg.entity_id == remote_id)
        }

        fn add_config(&mut self, cfg: &RemoteEntityConfig) -> bool {
            if self.get(cfg.entity_id).is_some() {
                return false;
            }
            self.0.push(*cfg);
            true
        }

        fn remove_config(&mut self, remote_id: u64) -> bool {
            let len_before = self.0.len();
            self.0.retain(|cfg| cfg.entity_id != remote_id);
            self.0.len() != len_before
        }
    }

    /// A remote entity configurations also implements the [RemoteEntityConfigProvider], but the
    /// [RemoteEntityConfigProvider::add_config] and [RemoteEntityConfigProvider::remove_config]
    /// are no-ops and always returns [false].
    impl RemoteEntityConfigProvider for RemoteEntityConfig {
        fn get(&self, remote_id: u64) -> Option<&RemoteEntityConfig> {
            if remote_id == self.entity_id {
                return Some(self);
            }
            None
        }

        fn get_mut(&mut self, remote_id: u64) -> Option<&mut RemoteEntityConfig> {
            if remote_id == self.entity_id {
                return Some(self);
            }
            None
        }

        fn add_config(&mut self, _cfg: &RemoteEntityConfig) -> bool {
            false
        }

        fn remove_config(&mut self, _remote_id: u64) -> bool {
            false
        }
    }
}

#[cfg(feature = "std")]
pub mod std_mod {
    use hashbrown::HashMap;

    use super::*;

    /// This is a thin wrapper around a [HashMap] to store remote entity configurations.
    /// It implements the full [RemoteEntityConfigProvider] trait.
    #[derive(Default, Debug)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct StdRemoteEntityConfigProvider(pub HashMap<u64, RemoteEntityConfig>);

    impl RemoteEntityConfigProvider for StdRemoteEntityConfigProvider {
        fn get(&self, remote_id: u64) -> Option<&RemoteEntityConfig> {
            self.0.get(&remote_id)
        }
        fn get_mut(&mut self, remote_id: u64) -> Option<&mut RemoteEntityConfig> {
            self.0.get_mut(&remote_id)
        }
        fn add_config(&mut self, cfg: &RemoteEntityConfig) -> bool {
            if self.0.contains_key(&cfg.entity_id) {
                return false;
            }
            self.0.insert(cfg.entity_id, *cfg);
            true
        }
        fn remove_config(&mut self, remote_id: u64) -> bool {
            self.0.remove(&remote_id).is_some()
        }
    }
}
