use alloc::vec;
use alloc::vec::Vec;

use super::{
    directive_header, push_file_size, read_directive_pdu, read_file_size, write_directive_pdu,
    CodecError, FileDirectiveType, PduHeader,
};

/// Keep alive PDU as specified in chapter 5.2.8 of the CFDP standard. The progress field width
/// follows the large file flag of the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAlivePdu {
    pub header: PduHeader,
    pub progress: u64,
}

impl KeepAlivePdu {
    pub fn new(header: PduHeader, progress: u64) -> Self {
        Self {
            header: directive_header(&header),
            progress,
        }
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, CodecError> {
        let (header, data_field) = read_directive_pdu(buf, FileDirectiveType::KeepAlivePdu)?;
        let progress = read_file_size(data_field, header.common_pdu_conf().file_flag)?;
        Ok(Self { header, progress })
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, CodecError> {
        let mut data_field = vec![FileDirectiveType::KeepAlivePdu as u8];
        push_file_size(
            &mut data_field,
            self.progress,
            self.header.common_pdu_conf().file_flag,
        )?;
        write_directive_pdu(&self.header, &data_field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{new_pdu_conf, Direction, LargeFileFlag, PduHeaderExt, TransmissionMode};

    #[test]
    fn test_keep_alive() {
        let conf = new_pdu_conf(
            Direction::TowardsSender,
            TransmissionMode::Acknowledged,
            1,
            2,
            3,
            LargeFileFlag::Normal,
        )
        .unwrap();
        let header = PduHeader::new_no_file_data(conf, 0);
        let pdu = KeepAlivePdu::new(header, 0x1234);
        let raw = pdu.to_vec().unwrap();
        assert_eq!(u16::from_be_bytes([raw[1], raw[2]]), 5);
        assert_eq!(&raw[7..], &[0x0c, 0x00, 0x00, 0x12, 0x34]);
        assert_eq!(KeepAlivePdu::from_bytes(&raw).unwrap(), pdu);
        let large = KeepAlivePdu::new(header.with_file_flag(LargeFileFlag::Large), 1 << 40);
        let raw = large.to_vec().unwrap();
        assert_eq!(raw.len(), 7 + 1 + 8);
        assert_eq!(KeepAlivePdu::from_bytes(&raw).unwrap(), large);
    }

    #[test]
    fn test_truncated_progress() {
        let conf = new_pdu_conf(
            Direction::TowardsSender,
            TransmissionMode::Acknowledged,
            1,
            2,
            3,
            LargeFileFlag::Normal,
        )
        .unwrap();
        let header = PduHeader::new_no_file_data(conf, 0);
        let raw = write_directive_pdu(&header, &[0x0c, 0x00, 0x01]).unwrap();
        assert!(matches!(
            KeepAlivePdu::from_bytes(&raw),
            Err(CodecError::ByteConversion(_))
        ));
    }
}
