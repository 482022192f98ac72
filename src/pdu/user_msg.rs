//! Reserved CFDP messages to user as specified in chapter 6 of the CFDP standard.
//!
//! Each reserved message is a message to user TLV whose value starts with the `cfdp` tag,
//! followed by the message type byte and the type specific payload.
use alloc::string::String;
use alloc::vec::Vec;
use spacepackets::cfdp::tlv::msg_to_user::MsgToUserTlv;
use spacepackets::cfdp::tlv::TlvOwned;

use super::header::field_width;
use super::tlv::{push_lv, push_uint_lv, LvCursor};
use super::{uint_from_be_bytes, CodecError, TransactionStatus};
use crate::TransactionId;

pub const RESERVED_MSG_TAG: &[u8; 4] = b"cfdp";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageType {
    ProxyPutRequest = 0x00,
    ProxyPutCancel = 0x09,
    OriginatingTransactionId = 0x0A,
    DirectoryListingRequest = 0x10,
    DirectoryListingResponse = 0x11,
    RemoteSuspendRequest = 0x30,
    RemoteSuspendResponse = 0x31,
    RemoteResumeRequest = 0x38,
    RemoteResumeResponse = 0x39,
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => MessageType::ProxyPutRequest,
            0x09 => MessageType::ProxyPutCancel,
            0x0A => MessageType::OriginatingTransactionId,
            0x10 => MessageType::DirectoryListingRequest,
            0x11 => MessageType::DirectoryListingResponse,
            0x30 => MessageType::RemoteSuspendRequest,
            0x31 => MessageType::RemoteSuspendResponse,
            0x38 => MessageType::RemoteResumeRequest,
            0x39 => MessageType::RemoteResumeResponse,
            _ => return Err(CodecError::UnsupportedMessage(value)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageToUser {
    /// Ask the receiving entity to put a file to another entity on behalf of the sender.
    ProxyPutRequest {
        dest_entity_id: u64,
        source_file_name: String,
        dest_file_name: String,
    },
    ProxyPutCancel(TransactionId),
    /// Identifies the transaction which caused the transaction carrying this message.
    OriginatingTransactionId(TransactionId),
    DirectoryListingRequest {
        directory: String,
        listing_file: String,
    },
    DirectoryListingResponse {
        successful: bool,
        directory: String,
        listing_file: String,
    },
    RemoteSuspendRequest(TransactionId),
    RemoteSuspendResponse {
        transaction_id: TransactionId,
        suspended: bool,
        transaction_status: TransactionStatus,
    },
    RemoteResumeRequest(TransactionId),
    RemoteResumeResponse {
        transaction_id: TransactionId,
        suspended: bool,
        transaction_status: TransactionStatus,
    },
}

impl MessageToUser {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageToUser::ProxyPutRequest { .. } => MessageType::ProxyPutRequest,
            MessageToUser::ProxyPutCancel(_) => MessageType::ProxyPutCancel,
            MessageToUser::OriginatingTransactionId(_) => MessageType::OriginatingTransactionId,
            MessageToUser::DirectoryListingRequest { .. } => MessageType::DirectoryListingRequest,
            MessageToUser::DirectoryListingResponse { .. } => {
                MessageType::DirectoryListingResponse
            }
            MessageToUser::RemoteSuspendRequest(_) => MessageType::RemoteSuspendRequest,
            MessageToUser::RemoteSuspendResponse { .. } => MessageType::RemoteSuspendResponse,
            MessageToUser::RemoteResumeRequest(_) => MessageType::RemoteResumeRequest,
            MessageToUser::RemoteResumeResponse { .. } => MessageType::RemoteResumeResponse,
        }
    }

    /// Value of the message to user TLV, starting with the reserved tag.
    pub fn to_tlv_value(&self) -> Result<Vec<u8>, CodecError> {
        let mut value = Vec::from(&RESERVED_MSG_TAG[..]);
        value.push(self.message_type() as u8);
        match self {
            MessageToUser::ProxyPutRequest {
                dest_entity_id,
                source_file_name,
                dest_file_name,
            } => {
                push_uint_lv(&mut value, *dest_entity_id)?;
                push_lv(&mut value, source_file_name.as_bytes())?;
                push_lv(&mut value, dest_file_name.as_bytes())?;
            }
            MessageToUser::ProxyPutCancel(id) => {
                push_uint_lv(&mut value, id.source_id())?;
                push_uint_lv(&mut value, id.seq_num())?;
            }
            MessageToUser::OriginatingTransactionId(id)
            | MessageToUser::RemoteSuspendRequest(id)
            | MessageToUser::RemoteResumeRequest(id) => push_transaction_id(&mut value, id),
            MessageToUser::DirectoryListingRequest {
                directory,
                listing_file,
            } => {
                push_lv(&mut value, directory.as_bytes())?;
                push_lv(&mut value, listing_file.as_bytes())?;
            }
            MessageToUser::DirectoryListingResponse {
                successful,
                directory,
                listing_file,
            } => {
                value.push(if *successful { 0x00 } else { 0x80 });
                push_lv(&mut value, directory.as_bytes())?;
                push_lv(&mut value, listing_file.as_bytes())?;
            }
            MessageToUser::RemoteSuspendResponse {
                transaction_id,
                suspended,
                transaction_status,
            }
            | MessageToUser::RemoteResumeResponse {
                transaction_id,
                suspended,
                transaction_status,
            } => {
                value.push(((*suspended as u8) << 7) | ((*transaction_status as u8) << 5));
                push_transaction_id(&mut value, transaction_id);
            }
        }
        Ok(value)
    }

    pub fn to_tlv(&self) -> Result<TlvOwned, CodecError> {
        let value = self.to_tlv_value()?;
        let msg_tlv =
            MsgToUserTlv::new(&value).map_err(|_| CodecError::LvTooLarge(value.len()))?;
        Ok(msg_tlv.tlv.to_owned())
    }

    /// Decode the value of a message to user TLV. Messages without the reserved tag are
    /// rejected with [CodecError::NonReservedMessage].
    pub fn from_tlv_value(value: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = LvCursor::new(value);
        if !value.starts_with(RESERVED_MSG_TAG) {
            return Err(CodecError::NonReservedMessage);
        }
        cursor.read_slice(RESERVED_MSG_TAG.len(), "reserved message tag")?;
        let msg_type = MessageType::try_from(cursor.read_u8("message type")?)?;
        Ok(match msg_type {
            MessageType::ProxyPutRequest => MessageToUser::ProxyPutRequest {
                dest_entity_id: cursor.read_uint("destination entity ID")?,
                source_file_name: cursor.read_string("source filename")?,
                dest_file_name: cursor.read_string("destination filename")?,
            },
            MessageType::ProxyPutCancel => {
                let source_id = cursor.read_uint("source entity ID")?;
                let seq_num = cursor.read_uint("sequence number")?;
                MessageToUser::ProxyPutCancel(TransactionId::new(source_id, seq_num))
            }
            MessageType::OriginatingTransactionId => {
                MessageToUser::OriginatingTransactionId(read_transaction_id(&mut cursor)?)
            }
            MessageType::DirectoryListingRequest => MessageToUser::DirectoryListingRequest {
                directory: cursor.read_string("directory name")?,
                listing_file: cursor.read_string("listing filename")?,
            },
            MessageType::DirectoryListingResponse => {
                let successful = cursor.read_u8("listing response")? >> 7 == 0;
                MessageToUser::DirectoryListingResponse {
                    successful,
                    directory: cursor.read_string("directory name")?,
                    listing_file: cursor.read_string("listing filename")?,
                }
            }
            MessageType::RemoteSuspendRequest => {
                MessageToUser::RemoteSuspendRequest(read_transaction_id(&mut cursor)?)
            }
            MessageType::RemoteResumeRequest => {
                MessageToUser::RemoteResumeRequest(read_transaction_id(&mut cursor)?)
            }
            MessageType::RemoteSuspendResponse | MessageType::RemoteResumeResponse => {
                let status_byte = cursor.read_u8("transaction status")?;
                let suspended = status_byte >> 7 == 1;
                let raw_status = (status_byte >> 5) & 0b11;
                let transaction_status = TransactionStatus::try_from(raw_status).map_err(|_| {
                    CodecError::InvalidRawValue {
                        field: "transaction status",
                        value: raw_status,
                    }
                })?;
                let transaction_id = read_transaction_id(&mut cursor)?;
                if msg_type == MessageType::RemoteSuspendResponse {
                    MessageToUser::RemoteSuspendResponse {
                        transaction_id,
                        suspended,
                        transaction_status,
                    }
                } else {
                    MessageToUser::RemoteResumeResponse {
                        transaction_id,
                        suspended,
                        transaction_status,
                    }
                }
            }
        })
    }
}

/// Packed width byte followed by the source entity ID and the sequence number.
fn push_transaction_id(buf: &mut Vec<u8>, id: &TransactionId) {
    let len_id = field_width(id.source_id());
    let len_seq = field_width(id.seq_num());
    buf.push((((len_id - 1) as u8) << 4) | (len_seq - 1) as u8);
    buf.extend_from_slice(&id.source_id().to_be_bytes()[8 - len_id..]);
    buf.extend_from_slice(&id.seq_num().to_be_bytes()[8 - len_seq..]);
}

fn read_transaction_id(cursor: &mut LvCursor<'_>) -> Result<TransactionId, CodecError> {
    let widths = cursor.read_u8("transaction ID")?;
    let len_id = ((widths >> 4) & 0b111) as usize + 1;
    let len_seq = (widths & 0b111) as usize + 1;
    let source_id = uint_from_be_bytes(cursor.read_slice(len_id, "source entity ID")?);
    let seq_num = uint_from_be_bytes(cursor.read_slice(len_seq, "sequence number")?);
    Ok(TransactionId::new(source_id, seq_num))
}

#[cfg(test)]
mod tests {
    use spacepackets::cfdp::tlv::{GenericTlv, ReadableTlv, TlvType};

    use super::*;

    fn round_trip(msg: MessageToUser) {
        let tlv = msg.to_tlv().unwrap();
        assert_eq!(tlv.tlv_type(), Some(TlvType::MsgToUser));
        let inner = tlv.as_tlv();
        let value = inner.value();
        assert_eq!(&value[0..4], b"cfdp");
        assert_eq!(value[4], msg.message_type() as u8);
        assert_eq!(MessageToUser::from_tlv_value(value).unwrap(), msg);
    }

    #[test]
    fn test_proxy_put_request_layout() {
        let msg = MessageToUser::ProxyPutRequest {
            dest_entity_id: 5,
            source_file_name: "/src.txt".into(),
            dest_file_name: "/dst.txt".into(),
        };
        let value = msg.to_tlv_value().unwrap();
        assert_eq!(&value[5..8], &[1, 5, 8]);
        assert_eq!(&value[8..16], b"/src.txt");
        round_trip(msg);
    }

    #[test]
    fn test_originating_transaction_id_layout() {
        let msg = MessageToUser::OriginatingTransactionId(TransactionId::new(0x0102, 7));
        let value = msg.to_tlv_value().unwrap();
        assert_eq!(&value[4..], &[0x0A, 0x10, 0x01, 0x02, 0x07]);
        round_trip(msg);
    }

    #[test]
    fn test_wide_transaction_id_layout() {
        let msg = MessageToUser::RemoteSuspendRequest(TransactionId::new(0x01_0000, 1));
        let value = msg.to_tlv_value().unwrap();
        assert_eq!(&value[5..], &[0x30, 0x00, 0x01, 0x00, 0x00, 0x01]);
        round_trip(msg);
    }

    #[test]
    fn test_all_reserved_messages() {
        let id = TransactionId::new(1, 300);
        round_trip(MessageToUser::ProxyPutCancel(id));
        round_trip(MessageToUser::DirectoryListingRequest {
            directory: "/logs".into(),
            listing_file: "/logs.csv".into(),
        });
        round_trip(MessageToUser::DirectoryListingResponse {
            successful: false,
            directory: "/logs".into(),
            listing_file: "/logs.csv".into(),
        });
        round_trip(MessageToUser::RemoteSuspendRequest(id));
        round_trip(MessageToUser::RemoteResumeRequest(id));
        round_trip(MessageToUser::RemoteSuspendResponse {
            transaction_id: id,
            suspended: true,
            transaction_status: TransactionStatus::Active,
        });
        round_trip(MessageToUser::RemoteResumeResponse {
            transaction_id: id,
            suspended: false,
            transaction_status: TransactionStatus::Unrecognized,
        });
    }

    #[test]
    fn test_suspend_response_status_byte() {
        let msg = MessageToUser::RemoteSuspendResponse {
            transaction_id: TransactionId::new(1, 2),
            suspended: true,
            transaction_status: TransactionStatus::Active,
        };
        let value = msg.to_tlv_value().unwrap();
        assert_eq!(value[5], 0b1010_0000);
    }

    #[test]
    fn test_unsupported_message_type() {
        let value = [b'c', b'f', b'd', b'p', 0x20];
        assert!(matches!(
            MessageToUser::from_tlv_value(&value),
            Err(CodecError::UnsupportedMessage(0x20))
        ));
    }

    #[test]
    fn test_non_reserved_message() {
        assert!(matches!(
            MessageToUser::from_tlv_value(b"hello"),
            Err(CodecError::NonReservedMessage)
        ));
        assert!(matches!(
            MessageToUser::from_tlv_value(b"cf"),
            Err(CodecError::NonReservedMessage)
        ));
    }

    #[test]
    fn test_truncated_reserved_message() {
        let value = [b'c', b'f', b'd', b'p', 0x0A, 0x10, 0x01];
        assert!(matches!(
            MessageToUser::from_tlv_value(&value),
            Err(CodecError::MalformedField("source entity ID"))
        ));
    }
}
