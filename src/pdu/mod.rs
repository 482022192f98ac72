//! # CFDP PDU layer
//!
//! Owned PDU representations used by the entity, built on top of the
//! [spacepackets CFDP module][spacepackets::cfdp].
//!
//! The common [PduHeader], the [EofPdu] and the [AckPdu] are used directly. Metadata, file data,
//! Finished and NAK PDUs are wrapped into owned structures which are decoded with the spacepackets
//! readers and encoded with the spacepackets creators, so they can be moved between the transport
//! thread and the transaction machines. The keep alive and prompt PDUs are encoded locally on
//! top of the spacepackets header.
//!
//! The [Pdu] enumeration decodes any raw PDU. CRC protected PDUs and file data PDUs with segment
//! metadata are rejected with [CodecError::CrcNotSupported] and
//! [CodecError::SegmentMetadataNotSupported].
use alloc::vec;
use alloc::vec::Vec;
use spacepackets::ByteConversionError;

use crate::TransactionId;

pub mod file_data;
pub mod finished;
pub mod header;
pub mod keep_alive;
pub mod metadata;
pub mod nak;
pub mod prompt;
pub mod tlv;
pub mod user_msg;

pub use spacepackets::cfdp::pdu::ack::AckPdu;
pub use spacepackets::cfdp::pdu::eof::EofPdu;
pub use spacepackets::cfdp::pdu::finished::{DeliveryCode, FileStatus};
pub use spacepackets::cfdp::pdu::metadata::MetadataGenericParams;
pub use spacepackets::cfdp::pdu::{
    CfdpPdu, CommonPduConfig, FileDirectiveType, PduError, PduHeader, WritablePduPacket,
};
pub use spacepackets::cfdp::{
    ChecksumType, ConditionCode, CrcFlag, Direction, FaultHandlerCode, LargeFileFlag, PduType,
    SegmentMetadataFlag, SegmentationControl, TransactionStatus, TransmissionMode,
};

pub use file_data::FileDataPduOwned;
pub use finished::FinishedPduOwned;
pub use header::{field_width, new_directive_header, new_pdu_conf, PduHeaderExt};
pub use keep_alive::KeepAlivePdu;
pub use metadata::MetadataPduOwned;
pub use nak::{NakPduOwned, SegmentRequests};
pub use prompt::{PromptPdu, PromptResponseRequired};

/// Largest possible header: fixed part, two 8 byte entity IDs and an 8 byte sequence number.
const MAX_HEADER_LEN: usize = 4 + 3 * 8;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CodecError {
    #[error("PDU error: {0}")]
    Pdu(#[from] PduError),
    #[error("byte conversion error: {0}")]
    ByteConversion(#[from] ByteConversionError),
    #[error("CRC protected PDUs are not supported")]
    CrcNotSupported,
    #[error("file data segment metadata is not supported")]
    SegmentMetadataNotSupported,
    #[error("unsupported PDU with directive code {0:#04x}")]
    UnsupportedPdu(u8),
    #[error("expected a file directive PDU")]
    NotADirective,
    #[error("invalid raw value {value} for {field}")]
    InvalidRawValue { field: &'static str, value: u8 },
    #[error("entity IDs {source_id} and {dest_id} can not be used in a PDU header")]
    InvalidEntityIds { source_id: u64, dest_id: u64 },
    #[error("value {0} does not fit into a normal file size field")]
    FileSizeTooLarge(u64),
    #[error("data field length {0} exceeds the maximum of 65535 bytes")]
    DataFieldTooLarge(usize),
    #[error("value with {0} bytes does not fit into a length value field")]
    LvTooLarge(usize),
    #[error("malformed TLV or LV field in {0}")]
    MalformedField(&'static str),
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("unsupported message to user type {0:#04x}")]
    UnsupportedMessage(u8),
    #[error("message to user is not a reserved CFDP message")]
    NonReservedMessage,
}

/// Any decoded CFDP PDU.
#[derive(Debug, Clone)]
pub enum Pdu {
    Metadata(MetadataPduOwned),
    FileData(FileDataPduOwned),
    Eof(EofPdu),
    Finished(FinishedPduOwned),
    Ack(AckPdu),
    Nak(NakPduOwned),
    KeepAlive(KeepAlivePdu),
    Prompt(PromptPdu),
}

impl Pdu {
    /// Decode a raw PDU. Trailing bytes beyond the length announced by the header are ignored.
    ///
    /// Unknown directive codes are rejected with [CodecError::UnsupportedPdu].
    pub fn from_bytes(buf: &[u8]) -> Result<Self, CodecError> {
        let (header, header_len) = PduHeader::from_bytes(buf)?;
        if header.common_pdu_conf().crc_flag == CrcFlag::WithCrc {
            return Err(CodecError::CrcNotSupported);
        }
        if header.pdu_type() == PduType::FileData {
            return Ok(Pdu::FileData(FileDataPduOwned::from_bytes(buf)?));
        }
        if header.pdu_datafield_len() < 1 {
            return Err(PduError::FormatError.into());
        }
        let raw_directive = *buf.get(header_len).ok_or(ByteConversionError::FromSliceTooSmall {
            found: buf.len(),
            expected: header_len + 1,
        })?;
        let directive = FileDirectiveType::try_from(raw_directive)
            .map_err(|_| CodecError::UnsupportedPdu(raw_directive))?;
        Ok(match directive {
            FileDirectiveType::EofPdu => Pdu::Eof(EofPdu::from_bytes(buf)?),
            FileDirectiveType::FinishedPdu => Pdu::Finished(FinishedPduOwned::from_bytes(buf)?),
            FileDirectiveType::AckPdu => Pdu::Ack(AckPdu::from_bytes(buf)?),
            FileDirectiveType::MetadataPdu => Pdu::Metadata(MetadataPduOwned::from_bytes(buf)?),
            FileDirectiveType::NakPdu => Pdu::Nak(NakPduOwned::from_bytes(buf)?),
            FileDirectiveType::PromptPdu => Pdu::Prompt(PromptPdu::from_bytes(buf)?),
            FileDirectiveType::KeepAlivePdu => Pdu::KeepAlive(KeepAlivePdu::from_bytes(buf)?),
        })
    }

    pub fn header(&self) -> &PduHeader {
        match self {
            Pdu::Metadata(pdu) => &pdu.header,
            Pdu::FileData(pdu) => &pdu.header,
            Pdu::Eof(pdu) => pdu.pdu_header(),
            Pdu::Finished(pdu) => &pdu.header,
            Pdu::Ack(pdu) => pdu.pdu_header(),
            Pdu::Nak(pdu) => &pdu.header,
            Pdu::KeepAlive(pdu) => &pdu.header,
            Pdu::Prompt(pdu) => &pdu.header,
        }
    }

    /// [None] for file data PDUs.
    pub fn directive_type(&self) -> Option<FileDirectiveType> {
        Some(match self {
            Pdu::FileData(_) => return None,
            Pdu::Metadata(_) => FileDirectiveType::MetadataPdu,
            Pdu::Eof(_) => FileDirectiveType::EofPdu,
            Pdu::Finished(_) => FileDirectiveType::FinishedPdu,
            Pdu::Ack(_) => FileDirectiveType::AckPdu,
            Pdu::Nak(_) => FileDirectiveType::NakPdu,
            Pdu::KeepAlive(_) => FileDirectiveType::KeepAlivePdu,
            Pdu::Prompt(_) => FileDirectiveType::PromptPdu,
        })
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.header().transaction_id()
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            Pdu::Metadata(pdu) => pdu.to_vec(),
            Pdu::FileData(pdu) => pdu.to_vec(),
            Pdu::Eof(pdu) => Ok(pdu.to_vec()?),
            Pdu::Finished(pdu) => pdu.to_vec(),
            Pdu::Ack(pdu) => Ok(pdu.to_vec()?),
            Pdu::Nak(pdu) => pdu.to_vec(),
            Pdu::KeepAlive(pdu) => pdu.to_vec(),
            Pdu::Prompt(pdu) => pdu.to_vec(),
        }
    }
}

/// Header copy with a zero data field length, so decoded and newly built PDUs carry the same
/// header.
pub(crate) fn directive_header(header: &PduHeader) -> PduHeader {
    PduHeader::new_no_file_data(*header.common_pdu_conf(), 0)
}

/// Serialize a directive PDU which has no spacepackets creator. The data field includes the
/// directive code.
pub(crate) fn write_directive_pdu(
    header: &PduHeader,
    data_field: &[u8],
) -> Result<Vec<u8>, CodecError> {
    if header.common_pdu_conf().crc_flag == CrcFlag::WithCrc {
        return Err(CodecError::CrcNotSupported);
    }
    let datafield_len =
        u16::try_from(data_field.len()).map_err(|_| CodecError::DataFieldTooLarge(data_field.len()))?;
    let header = PduHeader::new_no_file_data(*header.common_pdu_conf(), datafield_len);
    let mut raw_pdu = vec![0; MAX_HEADER_LEN];
    let header_len = header.write_to_bytes(&mut raw_pdu)?;
    raw_pdu.truncate(header_len);
    raw_pdu.extend_from_slice(data_field);
    Ok(raw_pdu)
}

/// Counterpart of [write_directive_pdu]: returns the normalized header and the data field
/// following the directive code.
pub(crate) fn read_directive_pdu(
    buf: &[u8],
    expected: FileDirectiveType,
) -> Result<(PduHeader, &[u8]), CodecError> {
    let (header, header_len) = PduHeader::from_bytes(buf)?;
    if header.common_pdu_conf().crc_flag == CrcFlag::WithCrc {
        return Err(CodecError::CrcNotSupported);
    }
    if header.pdu_type() != PduType::FileDirective {
        return Err(CodecError::NotADirective);
    }
    let pdu_len = header_len + header.pdu_datafield_len() as usize;
    if buf.len() < pdu_len {
        return Err(ByteConversionError::FromSliceTooSmall {
            found: buf.len(),
            expected: pdu_len,
        }
        .into());
    }
    match buf[header_len..pdu_len].split_first() {
        None => Err(PduError::FormatError.into()),
        Some((found, _)) if *found != expected as u8 => Err(PduError::InvalidDirectiveType {
            found: *found,
            expected: Some(expected),
        }
        .into()),
        Some((_, data_field)) => Ok((directive_header(&header), data_field)),
    }
}

/// Width of file size sensitive fields.
pub(crate) fn file_size_field_len(file_flag: LargeFileFlag) -> usize {
    match file_flag {
        LargeFileFlag::Normal => 4,
        LargeFileFlag::Large => 8,
    }
}

pub(crate) fn push_file_size(
    buf: &mut Vec<u8>,
    value: u64,
    file_flag: LargeFileFlag,
) -> Result<(), CodecError> {
    match file_flag {
        LargeFileFlag::Normal => {
            let value = u32::try_from(value).map_err(|_| CodecError::FileSizeTooLarge(value))?;
            buf.extend_from_slice(&value.to_be_bytes());
        }
        LargeFileFlag::Large => buf.extend_from_slice(&value.to_be_bytes()),
    }
    Ok(())
}

pub(crate) fn read_file_size(buf: &[u8], file_flag: LargeFileFlag) -> Result<u64, CodecError> {
    let width = file_size_field_len(file_flag);
    let raw = buf.get(..width).ok_or(ByteConversionError::FromSliceTooSmall {
        found: buf.len(),
        expected: width,
    })?;
    Ok(uint_from_be_bytes(raw))
}

/// Big endian unsigned value with at most 8 bytes.
pub(crate) fn uint_from_be_bytes(raw: &[u8]) -> u64 {
    raw.iter().fold(0, |acc, byte| (acc << 8) | u64::from(*byte))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eof_header() -> PduHeader {
        let conf = new_pdu_conf(
            Direction::TowardsReceiver,
            TransmissionMode::Acknowledged,
            1,
            3,
            2,
            LargeFileFlag::Normal,
        )
        .unwrap();
        PduHeader::new_no_file_data(conf, 0)
    }

    #[test]
    fn test_generic_decode_dispatch() {
        let eof = EofPdu::new_no_error(eof_header(), 0x1234, 12);
        let raw = eof.to_vec().unwrap();
        let pdu = Pdu::from_bytes(&raw).unwrap();
        assert_eq!(pdu.directive_type(), Some(FileDirectiveType::EofPdu));
        assert_eq!(pdu.transaction_id(), TransactionId::new(1, 3));
        let Pdu::Eof(read_back) = &pdu else {
            panic!("expected EOF PDU, got {pdu:?}");
        };
        assert_eq!(read_back.file_checksum(), 0x1234);
        assert_eq!(read_back.file_size(), 12);
        assert_eq!(pdu.to_vec().unwrap(), raw);
    }

    #[test]
    fn test_unknown_directive_code() {
        let mut raw = EofPdu::new_no_error(eof_header(), 0, 0).to_vec().unwrap();
        raw[7] = 0x0f;
        assert!(matches!(
            Pdu::from_bytes(&raw),
            Err(CodecError::UnsupportedPdu(0x0f))
        ));
    }

    #[test]
    fn test_crc_protected_pdu_rejected() {
        let mut raw = EofPdu::new_no_error(eof_header(), 0, 0).to_vec().unwrap();
        raw[0] |= 0b10;
        assert!(matches!(
            Pdu::from_bytes(&raw),
            Err(CodecError::CrcNotSupported)
        ));
    }

    #[test]
    fn test_empty_directive_data_field() {
        let raw = write_directive_pdu(&eof_header(), &[]).unwrap();
        assert_eq!(raw.len(), 7);
        assert!(matches!(
            Pdu::from_bytes(&raw),
            Err(CodecError::Pdu(PduError::FormatError))
        ));
        assert!(matches!(
            read_directive_pdu(&raw, FileDirectiveType::KeepAlivePdu),
            Err(CodecError::Pdu(PduError::FormatError))
        ));
    }

    #[test]
    fn test_wrong_directive_for_local_codec() {
        let raw = EofPdu::new_no_error(eof_header(), 0, 0).to_vec().unwrap();
        assert!(matches!(
            read_directive_pdu(&raw, FileDirectiveType::PromptPdu),
            Err(CodecError::Pdu(PduError::InvalidDirectiveType { found: 0x04, .. }))
        ));
    }

    #[test]
    fn test_data_field_shorter_than_announced() {
        let mut raw = write_directive_pdu(&eof_header(), &[0x0c, 0, 0, 0, 1]).unwrap();
        assert_eq!(raw.len(), 12);
        raw.truncate(10);
        assert!(read_directive_pdu(&raw, FileDirectiveType::KeepAlivePdu).is_err());
        assert!(Pdu::from_bytes(&raw).is_err());
    }

    #[test]
    fn test_normal_file_size_overflow() {
        let mut buf = vec![];
        let too_large = u64::from(u32::MAX) + 1;
        assert!(matches!(
            push_file_size(&mut buf, too_large, LargeFileFlag::Normal),
            Err(CodecError::FileSizeTooLarge(value)) if value == too_large
        ));
        push_file_size(&mut buf, too_large, LargeFileFlag::Large).unwrap();
        assert_eq!(buf, [0, 0, 0, 1, 0, 0, 0, 0]);
        assert_eq!(read_file_size(&buf, LargeFileFlag::Large).unwrap(), too_large);
        assert_eq!(read_file_size(&buf, LargeFileFlag::Normal).unwrap(), 0);
    }
}
