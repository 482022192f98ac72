use alloc::vec::Vec;
use smallvec::SmallVec;
use spacepackets::cfdp::pdu::nak::{NakPduCreator, NakPduReader};

use super::{
    directive_header, CfdpPdu, CodecError, CrcFlag, LargeFileFlag, PduError, PduHeader,
    WritablePduPacket,
};

/// Missing (start offset, end offset) ranges. The pair (0, 0) requests the Metadata PDU.
pub type SegmentRequests = SmallVec<[(u64, u64); 8]>;

/// Owned NAK PDU as specified in chapter 5.2.6 of the CFDP standard.
#[derive(Debug, Clone)]
pub struct NakPduOwned {
    pub header: PduHeader,
    pub start_of_scope: u64,
    pub end_of_scope: u64,
    pub segment_requests: SegmentRequests,
}

impl NakPduOwned {
    pub fn new(
        header: PduHeader,
        start_of_scope: u64,
        end_of_scope: u64,
        segment_requests: SegmentRequests,
    ) -> Self {
        Self {
            header: directive_header(&header),
            start_of_scope,
            end_of_scope,
            segment_requests,
        }
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, CodecError> {
        let reader = NakPduReader::new(buf)?;
        if reader.pdu_header().common_pdu_conf().crc_flag == CrcFlag::WithCrc {
            return Err(CodecError::CrcNotSupported);
        }
        Ok(Self {
            header: directive_header(reader.pdu_header()),
            start_of_scope: reader.start_of_scope(),
            end_of_scope: reader.end_of_scope(),
            segment_requests: reader
                .get_normal_segment_requests_iterator()
                .map(|iter| {
                    iter.map(|(start, end)| (u64::from(start), u64::from(end)))
                        .collect()
                })
                .or_else(|| {
                    reader
                        .get_large_segment_requests_iterator()
                        .map(|iter| iter.collect())
                })
                .unwrap_or_default(),
        })
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, CodecError> {
        if self.header.common_pdu_conf().crc_flag == CrcFlag::WithCrc {
            return Err(CodecError::CrcNotSupported);
        }
        let nak_pdu = match self.header.common_pdu_conf().file_flag {
            LargeFileFlag::Normal => {
                let segment_requests = self
                    .segment_requests
                    .iter()
                    .map(|(start, end)| Ok((narrow(*start)?, narrow(*end)?)))
                    .collect::<Result<SmallVec<[(u32, u32); 8]>, CodecError>>()?;
                NakPduCreator::new(
                    self.header,
                    narrow(self.start_of_scope)?,
                    narrow(self.end_of_scope)?,
                    &segment_requests,
                )
                .map_err(PduError::from)?
                .to_vec()?
            }
            LargeFileFlag::Large => NakPduCreator::new_large_file_size(
                self.header,
                self.start_of_scope,
                self.end_of_scope,
                &self.segment_requests,
            )
            .map_err(PduError::from)?
            .to_vec()?,
        };
        Ok(nak_pdu)
    }
}

fn narrow(value: u64) -> Result<u32, CodecError> {
    u32::try_from(value).map_err(|_| CodecError::FileSizeTooLarge(value))
}
