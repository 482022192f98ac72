//! Mapping between the plain integer IDs used by the entity and the variable width fields of the
//! spacepackets [PduHeader].
use spacepackets::cfdp::pdu::{CommonPduConfig, PduHeader};
use spacepackets::cfdp::{CrcFlag, Direction, LargeFileFlag, TransmissionMode};
use spacepackets::util::UnsignedByteField;

use super::CodecError;
use crate::TransactionId;

/// Smallest unsigned field width in bytes which can hold the value: 1, 2, 4 or 8.
pub const fn field_width(value: u64) -> usize {
    if value <= u8::MAX as u64 {
        1
    } else if value <= u16::MAX as u64 {
        2
    } else if value <= u32::MAX as u64 {
        4
    } else {
        8
    }
}

/// PDU configuration for one transaction. Both entity IDs share the width of the larger one.
pub fn new_pdu_conf(
    direction: Direction,
    transmission_mode: TransmissionMode,
    source_id: u64,
    seq_num: u64,
    dest_id: u64,
    file_flag: LargeFileFlag,
) -> Result<CommonPduConfig, CodecError> {
    let id_width = field_width(source_id.max(dest_id));
    let mut pdu_conf = CommonPduConfig::default();
    pdu_conf
        .set_source_and_dest_id(
            UnsignedByteField::new(id_width, source_id),
            UnsignedByteField::new(id_width, dest_id),
        )
        .map_err(|_| CodecError::InvalidEntityIds { source_id, dest_id })?;
    pdu_conf.transaction_seq_num = UnsignedByteField::new(field_width(seq_num), seq_num);
    pdu_conf.direction = direction;
    pdu_conf.trans_mode = transmission_mode;
    pdu_conf.file_flag = file_flag;
    pdu_conf.crc_flag = CrcFlag::NoCrc;
    Ok(pdu_conf)
}

/// File directive header with the normal file size flag.
pub fn new_directive_header(
    direction: Direction,
    transmission_mode: TransmissionMode,
    source_id: u64,
    seq_num: u64,
    dest_id: u64,
) -> Result<PduHeader, CodecError> {
    let pdu_conf = new_pdu_conf(
        direction,
        transmission_mode,
        source_id,
        seq_num,
        dest_id,
        LargeFileFlag::Normal,
    )?;
    Ok(PduHeader::new_no_file_data(pdu_conf, 0))
}

/// Entity level accessors for the spacepackets [PduHeader].
pub trait PduHeaderExt {
    fn source_entity_id(&self) -> u64;

    fn dest_entity_id(&self) -> u64;

    fn transaction_id(&self) -> TransactionId;

    /// Directive header of the same transaction with the direction flipped, used to answer a PDU.
    fn reply_header(&self) -> PduHeader;

    /// Directive header with a different large file flag.
    fn with_file_flag(&self, file_flag: LargeFileFlag) -> PduHeader;
}

impl PduHeaderExt for PduHeader {
    fn source_entity_id(&self) -> u64 {
        self.common_pdu_conf().source_id().value_const()
    }

    fn dest_entity_id(&self) -> u64 {
        self.common_pdu_conf().dest_id().value_const()
    }

    fn transaction_id(&self) -> TransactionId {
        TransactionId::new(
            self.source_entity_id(),
            self.common_pdu_conf().transaction_seq_num.value_const(),
        )
    }

    fn reply_header(&self) -> PduHeader {
        let mut pdu_conf = *self.common_pdu_conf();
        pdu_conf.direction = match pdu_conf.direction {
            Direction::TowardsReceiver => Direction::TowardsSender,
            Direction::TowardsSender => Direction::TowardsReceiver,
        };
        PduHeader::new_no_file_data(pdu_conf, 0)
    }

    fn with_file_flag(&self, file_flag: LargeFileFlag) -> PduHeader {
        let mut pdu_conf = *self.common_pdu_conf();
        pdu_conf.file_flag = file_flag;
        PduHeader::new_no_file_data(pdu_conf, 0)
    }
}
