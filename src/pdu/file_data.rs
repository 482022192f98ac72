use alloc::vec::Vec;
use spacepackets::cfdp::pdu::file_data::FileDataPdu;

use super::{
    CodecError, CommonPduConfig, CrcFlag, LargeFileFlag, PduError, PduHeader, PduType,
    SegmentMetadataFlag, SegmentationControl, WritablePduPacket,
};

/// Owned file data PDU as specified in chapter 5.3 of the CFDP standard.
///
/// The width of the offset field follows the large file flag of the header. Segment metadata is
/// not supported.
#[derive(Debug, Clone)]
pub struct FileDataPduOwned {
    pub header: PduHeader,
    pub offset: u64,
    pub data: Vec<u8>,
}

impl FileDataPduOwned {
    pub fn new(pdu_conf: CommonPduConfig, offset: u64, data: Vec<u8>) -> Self {
        Self {
            header: file_data_header(pdu_conf),
            offset,
            data,
        }
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, CodecError> {
        let (header, _) = PduHeader::from_bytes(buf)?;
        if header.common_pdu_conf().crc_flag == CrcFlag::WithCrc {
            return Err(CodecError::CrcNotSupported);
        }
        if header.pdu_type() != PduType::FileData {
            return Err(PduError::FormatError.into());
        }
        if header.seg_metadata_flag() == SegmentMetadataFlag::Present {
            return Err(CodecError::SegmentMetadataNotSupported);
        }
        let file_data_pdu = FileDataPdu::from_bytes(buf)?;
        Ok(Self {
            header: file_data_header(*header.common_pdu_conf()),
            offset: file_data_pdu.offset(),
            data: file_data_pdu.file_data().to_vec(),
        })
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, CodecError> {
        let pdu_conf = self.header.common_pdu_conf();
        if pdu_conf.crc_flag == CrcFlag::WithCrc {
            return Err(CodecError::CrcNotSupported);
        }
        if pdu_conf.file_flag == LargeFileFlag::Normal && self.offset > u64::from(u32::MAX) {
            return Err(CodecError::FileSizeTooLarge(self.offset));
        }
        let file_data_pdu = FileDataPdu::new_no_seg_metadata(
            file_data_header(*pdu_conf),
            self.offset,
            &self.data,
        );
        Ok(file_data_pdu.to_vec()?)
    }
}

fn file_data_header(pdu_conf: CommonPduConfig) -> PduHeader {
    PduHeader::new_for_file_data(
        pdu_conf,
        0,
        SegmentMetadataFlag::NotPresent,
        SegmentationControl::NoRecordBoundaryPreservation,
    )
}
