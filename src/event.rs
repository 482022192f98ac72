//! Events which drive the transaction state machines.
//!
//! The numbering follows the event list in annex A of the CFDP recommended practices
//! (CCSDS 720.2-G). Gaps in the numbering belong to features which are not supported, for
//! example keep alive and prompt handling.
use crate::pdu::{ConditionCode, FileDirectiveType, Pdu};
use crate::TransactionId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventType {
    E0EnteredState,
    E1SendFileData,
    E2AbandonTransaction,
    E3NoticeOfCancellation,
    E4NoticeOfSuspension,
    E5SuspendTimers,
    E6ResumeTimers,
    E10ReceivedMetadata,
    E11ReceivedFileData,
    E12ReceivedEofNoError,
    E13ReceivedEofCancel,
    E14ReceivedAckEof,
    E15ReceivedNak,
    E16ReceivedFinishedNoError,
    E17ReceivedFinishedCancel,
    E18ReceivedAckFinished,
    E25AckTimeout,
    E26NakTimeout,
    E27InactivityTimeout,
    E30ReceivedPutRequest,
    E31ReceivedSuspendRequest,
    E32ReceivedResumeRequest,
    E33ReceivedCancelRequest,
    E34ReceivedReportRequest,
    E40ReceivedFreeze,
    E41ReceivedThaw,
}

impl EventType {
    /// Event triggered by the reception of the given PDU.
    ///
    /// Keep alive and prompt PDUs as well as ACK PDUs which do not acknowledge an EOF or
    /// Finished PDU return [None].
    pub fn for_pdu(pdu: &Pdu) -> Option<Self> {
        Some(match pdu {
            Pdu::Metadata(_) => EventType::E10ReceivedMetadata,
            Pdu::FileData(_) => EventType::E11ReceivedFileData,
            Pdu::Eof(eof) => {
                if eof.condition_code() == ConditionCode::NoError {
                    EventType::E12ReceivedEofNoError
                } else {
                    EventType::E13ReceivedEofCancel
                }
            }
            Pdu::Ack(ack) => match ack.directive_code_of_acked_pdu() {
                FileDirectiveType::EofPdu => EventType::E14ReceivedAckEof,
                FileDirectiveType::FinishedPdu => EventType::E18ReceivedAckFinished,
                _ => return None,
            },
            Pdu::Nak(_) => EventType::E15ReceivedNak,
            Pdu::Finished(finished) => {
                if finished.condition_code == ConditionCode::NoError {
                    EventType::E16ReceivedFinishedNoError
                } else {
                    EventType::E17ReceivedFinishedCancel
                }
            }
            Pdu::KeepAlive(_) | Pdu::Prompt(_) => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub transaction_id: TransactionId,
    pub event_type: EventType,
    pub pdu: Option<Pdu>,
}

impl Event {
    pub fn new(transaction_id: TransactionId, event_type: EventType) -> Self {
        Self {
            transaction_id,
            event_type,
            pdu: None,
        }
    }

    pub fn with_pdu(transaction_id: TransactionId, event_type: EventType, pdu: Pdu) -> Self {
        Self {
            transaction_id,
            event_type,
            pdu: Some(pdu),
        }
    }
}
