use alloc::string::String;
use alloc::vec::Vec;
use spacepackets::cfdp::lv::Lv;
use spacepackets::cfdp::pdu::metadata::{MetadataPduCreator, MetadataPduReader};

use super::tlv::{FaultHandlerOverride, FilestoreRequest, MetadataOption};
use super::user_msg::MessageToUser;
use super::{
    directive_header, CfdpPdu, CodecError, CrcFlag, LargeFileFlag, MetadataGenericParams,
    PduHeader, WritablePduPacket,
};

/// Owned Metadata PDU as specified in chapter 5.2.5 of the CFDP standard.
///
/// Transactions without file data omit both file names, which are then encoded as empty LV
/// fields.
#[derive(Debug, Clone)]
pub struct MetadataPduOwned {
    pub header: PduHeader,
    pub params: MetadataGenericParams,
    pub source_file_name: Option<String>,
    pub dest_file_name: Option<String>,
    pub options: Vec<MetadataOption>,
}

impl MetadataPduOwned {
    pub fn new(
        header: PduHeader,
        params: MetadataGenericParams,
        source_file_name: Option<String>,
        dest_file_name: Option<String>,
        options: Vec<MetadataOption>,
    ) -> Self {
        Self {
            header: directive_header(&header),
            params,
            source_file_name,
            dest_file_name,
            options,
        }
    }

    /// A file transfer is indicated by the presence of a source file name.
    pub fn is_file_transfer(&self) -> bool {
        self.source_file_name.is_some()
    }

    pub fn filestore_requests(&self) -> impl Iterator<Item = &FilestoreRequest> {
        self.options.iter().filter_map(|option| match option {
            MetadataOption::FilestoreRequest(request) => Some(request),
            _ => None,
        })
    }

    pub fn messages_to_user(&self) -> impl Iterator<Item = &MessageToUser> {
        self.options.iter().filter_map(|option| match option {
            MetadataOption::MsgToUser(msg) => Some(msg),
            _ => None,
        })
    }

    pub fn fault_handler_overrides(&self) -> impl Iterator<Item = &FaultHandlerOverride> {
        self.options.iter().filter_map(|option| match option {
            MetadataOption::FaultHandlerOverride(fh_override) => Some(fh_override),
            _ => None,
        })
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, CodecError> {
        let reader = MetadataPduReader::new(buf)?;
        if reader.pdu_header().common_pdu_conf().crc_flag == CrcFlag::WithCrc {
            return Err(CodecError::CrcNotSupported);
        }
        Ok(Self {
            header: directive_header(reader.pdu_header()),
            params: *reader.metadata_params(),
            source_file_name: optional_name(
                reader.src_file_name().value_as_str(),
                "source filename",
            )?,
            dest_file_name: optional_name(
                reader.dest_file_name().value_as_str(),
                "destination filename",
            )?,
            options: MetadataOption::parse_all(reader.options())?,
        })
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, CodecError> {
        if self.header.common_pdu_conf().crc_flag == CrcFlag::WithCrc {
            return Err(CodecError::CrcNotSupported);
        }
        if self.header.common_pdu_conf().file_flag == LargeFileFlag::Normal
            && self.params.file_size > u64::from(u32::MAX)
        {
            return Err(CodecError::FileSizeTooLarge(self.params.file_size));
        }
        let options = MetadataOption::write_all(&self.options)?;
        let metadata_pdu = MetadataPduCreator::new(
            self.header,
            MetadataGenericParams::new(
                self.params.closure_requested,
                self.params.checksum_type,
                self.params.file_size,
            ),
            name_lv(self.source_file_name.as_deref())?,
            name_lv(self.dest_file_name.as_deref())?,
            &options,
        );
        Ok(metadata_pdu.to_vec()?)
    }
}

fn name_lv(name: Option<&str>) -> Result<Lv<'_>, CodecError> {
    match name {
        Some(name) => Lv::new_from_str(name).map_err(|_| CodecError::LvTooLarge(name.len())),
        None => Ok(Lv::new_empty()),
    }
}

/// Empty names decode to [None].
fn optional_name<E>(
    value: Option<Result<&str, E>>,
    field: &'static str,
) -> Result<Option<String>, CodecError> {
    match value {
        None => Ok(None),
        Some(Ok(name)) if name.is_empty() => Ok(None),
        Some(Ok(name)) => Ok(Some(String::from(name))),
        Some(Err(_)) => Err(CodecError::InvalidUtf8(field)),
    }
}
