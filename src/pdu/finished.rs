use alloc::vec::Vec;
use spacepackets::cfdp::pdu::finished::{FinishedPduCreator, FinishedPduReader};

use super::header::PduHeaderExt;
use super::tlv::entity_id_tlv;
use super::{
    directive_header, CfdpPdu, CodecError, ConditionCode, CrcFlag, DeliveryCode, FileStatus,
    PduHeader, WritablePduPacket,
};

/// Owned Finished PDU as specified in chapter 5.2.3 of the CFDP standard.
///
/// The fault location is only carried for condition codes other than
/// [ConditionCode::NoError]. Filestore responses are not generated and ignored on reception.
#[derive(Debug, Clone)]
pub struct FinishedPduOwned {
    pub header: PduHeader,
    pub condition_code: ConditionCode,
    pub delivery_code: DeliveryCode,
    pub file_status: FileStatus,
    pub fault_location: Option<u64>,
}

impl FinishedPduOwned {
    pub fn new(
        header: PduHeader,
        condition_code: ConditionCode,
        delivery_code: DeliveryCode,
        file_status: FileStatus,
        fault_location: Option<u64>,
    ) -> Self {
        Self {
            header: directive_header(&header),
            condition_code,
            delivery_code,
            file_status,
            fault_location: if condition_code == ConditionCode::NoError {
                None
            } else {
                fault_location
            },
        }
    }

    pub fn new_no_error(
        header: PduHeader,
        delivery_code: DeliveryCode,
        file_status: FileStatus,
    ) -> Self {
        Self::new(header, ConditionCode::NoError, delivery_code, file_status, None)
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, CodecError> {
        let reader = FinishedPduReader::new(buf)?;
        if reader.pdu_header().common_pdu_conf().crc_flag == CrcFlag::WithCrc {
            return Err(CodecError::CrcNotSupported);
        }
        Ok(Self {
            header: directive_header(reader.pdu_header()),
            condition_code: reader.condition_code(),
            delivery_code: reader.delivery_code(),
            file_status: reader.file_status(),
            fault_location: reader
                .fault_location()
                .map(|tlv| tlv.entity_id().value_const()),
        })
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, CodecError> {
        if self.header.common_pdu_conf().crc_flag == CrcFlag::WithCrc {
            return Err(CodecError::CrcNotSupported);
        }
        let finished_pdu = if self.condition_code == ConditionCode::NoError {
            FinishedPduCreator::new_default(self.header, self.delivery_code, self.file_status)
        } else {
            // The receiving entity is the fault location unless stated otherwise.
            let fault_location = self
                .fault_location
                .unwrap_or_else(|| self.header.dest_entity_id());
            FinishedPduCreator::new_with_error(
                self.header,
                self.condition_code,
                self.delivery_code,
                self.file_status,
                entity_id_tlv(fault_location),
            )
        };
        Ok(finished_pdu.to_vec()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{new_pdu_conf, Direction, LargeFileFlag, Pdu, TransmissionMode};

    fn header() -> PduHeader {
        let conf = new_pdu_conf(
            Direction::TowardsSender,
            TransmissionMode::Acknowledged,
            1,
            2,
            3,
            LargeFileFlag::Normal,
        )
        .unwrap();
        PduHeader::new_no_file_data(conf, 0)
    }

    #[test]
    fn test_finished_no_error() {
        let pdu =
            FinishedPduOwned::new_no_error(header(), DeliveryCode::Complete, FileStatus::Retained);
        let raw = pdu.to_vec().unwrap();
        assert_eq!(raw[7], 0x05);
        assert_eq!(raw.len(), 9);
        let read_back = FinishedPduOwned::from_bytes(&raw).unwrap();
        assert_eq!(read_back.header, pdu.header);
        assert_eq!(read_back.condition_code, ConditionCode::NoError);
        assert_eq!(read_back.delivery_code, DeliveryCode::Complete);
        assert_eq!(read_back.file_status, FileStatus::Retained);
        assert_eq!(read_back.fault_location, None);
    }

    #[test]
    fn test_finished_with_fault_location() {
        let pdu = FinishedPduOwned::new(
            header(),
            ConditionCode::FileChecksumFailure,
            DeliveryCode::Incomplete,
            FileStatus::DiscardDeliberately,
            Some(3),
        );
        let raw = pdu.to_vec().unwrap();
        assert_eq!(&raw[raw.len() - 3..], &[0x06, 0x01, 0x03]);
        let Pdu::Finished(read_back) = Pdu::from_bytes(&raw).unwrap() else {
            panic!("expected Finished PDU");
        };
        assert_eq!(read_back.condition_code, ConditionCode::FileChecksumFailure);
        assert_eq!(read_back.delivery_code, DeliveryCode::Incomplete);
        assert_eq!(read_back.file_status, FileStatus::DiscardDeliberately);
        assert_eq!(read_back.fault_location, Some(3));
    }

    #[test]
    fn test_fault_location_defaults_to_receiver() {
        let pdu = FinishedPduOwned::new(
            header(),
            ConditionCode::CancelRequestReceived,
            DeliveryCode::Incomplete,
            FileStatus::Unreported,
            None,
        );
        let read_back = FinishedPduOwned::from_bytes(&pdu.to_vec().unwrap()).unwrap();
        assert_eq!(read_back.fault_location, Some(3));
    }

    #[test]
    fn test_no_fault_location_without_error() {
        let pdu = FinishedPduOwned::new(
            header(),
            ConditionCode::NoError,
            DeliveryCode::Complete,
            FileStatus::Retained,
            Some(3),
        );
        assert_eq!(pdu.fault_location, None);
    }
}
