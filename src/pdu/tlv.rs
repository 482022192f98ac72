//! Type-Length-Value (TLV) options carried inside Metadata PDUs, built on the spacepackets
//! [Tlv] and [Lv] types.
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
pub use spacepackets::cfdp::tlv::FilestoreActionCode;
use spacepackets::cfdp::lv::Lv;
use spacepackets::cfdp::tlv::{
    EntityIdTlv, GenericTlv, ReadableTlv, Tlv, TlvOwned, TlvType, WritableTlv,
};
use spacepackets::util::UnsignedByteField;

use super::header::field_width;
use super::user_msg::MessageToUser;
use super::{uint_from_be_bytes, CodecError, ConditionCode, FaultHandlerCode};

/// Rename, append and replace operate on two files.
pub fn has_second_filename(action_code: FilestoreActionCode) -> bool {
    matches!(
        action_code,
        FilestoreActionCode::RenameFile
            | FilestoreActionCode::AppendFile
            | FilestoreActionCode::ReplaceFile
    )
}

/// A filestore request which is executed by the receiving entity after the file transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FilestoreRequest {
    pub action_code: FilestoreActionCode,
    pub first_name: String,
    pub second_name: Option<String>,
}

impl FilestoreRequest {
    pub fn new(
        action_code: FilestoreActionCode,
        first_name: impl Into<String>,
        second_name: Option<String>,
    ) -> Self {
        Self {
            action_code,
            first_name: first_name.into(),
            second_name,
        }
    }

    pub fn new_create_file(path: impl Into<String>) -> Self {
        Self::new(FilestoreActionCode::CreateFile, path, None)
    }

    pub fn new_delete_file(path: impl Into<String>) -> Self {
        Self::new(FilestoreActionCode::DeleteFile, path, None)
    }

    pub fn new_rename_file(old_path: impl Into<String>, new_path: impl Into<String>) -> Self {
        Self::new(
            FilestoreActionCode::RenameFile,
            old_path,
            Some(new_path.into()),
        )
    }

    /// Append the content of the second file to the first file.
    pub fn new_append_file(target: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(FilestoreActionCode::AppendFile, target, Some(source.into()))
    }

    /// Replace the content of the first file with the content of the second file.
    pub fn new_replace_file(target: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(FilestoreActionCode::ReplaceFile, target, Some(source.into()))
    }

    pub fn new_create_directory(path: impl Into<String>) -> Self {
        Self::new(FilestoreActionCode::CreateDirectory, path, None)
    }

    pub fn new_remove_directory(path: impl Into<String>) -> Self {
        Self::new(FilestoreActionCode::RemoveDirectory, path, None)
    }

    pub fn new_deny_file(path: impl Into<String>) -> Self {
        Self::new(FilestoreActionCode::DenyFile, path, None)
    }

    pub fn new_deny_directory(path: impl Into<String>) -> Self {
        Self::new(FilestoreActionCode::DenyDirectory, path, None)
    }

    pub fn to_tlv(&self) -> Result<TlvOwned, CodecError> {
        let mut value = vec![(self.action_code as u8) << 4];
        push_lv(&mut value, self.first_name.as_bytes())?;
        if has_second_filename(self.action_code) {
            let second_name = self.second_name.as_deref().unwrap_or_default();
            push_lv(&mut value, second_name.as_bytes())?;
        }
        new_tlv(TlvType::FilestoreRequest, &value)
    }

    pub fn from_tlv_value(value: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = LvCursor::new(value);
        let raw_action_code = cursor.read_u8("filestore request")? >> 4;
        let action_code =
            FilestoreActionCode::try_from(raw_action_code).map_err(|_| CodecError::InvalidRawValue {
                field: "filestore action code",
                value: raw_action_code,
            })?;
        let first_name = cursor.read_string("first filename")?;
        let second_name = if has_second_filename(action_code) {
            Some(cursor.read_string("second filename")?)
        } else {
            None
        };
        Ok(Self {
            action_code,
            first_name,
            second_name,
        })
    }
}

/// Overrides the fault handler of the receiving entity for one condition code.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultHandlerOverride {
    pub condition_code: ConditionCode,
    pub handler_code: FaultHandlerCode,
}

impl FaultHandlerOverride {
    pub fn new(condition_code: ConditionCode, handler_code: FaultHandlerCode) -> Self {
        Self {
            condition_code,
            handler_code,
        }
    }

    pub fn to_tlv(&self) -> Result<TlvOwned, CodecError> {
        new_tlv(
            TlvType::FaultHandler,
            &[((self.condition_code as u8) << 4) | self.handler_code as u8],
        )
    }

    pub fn from_tlv_value(value: &[u8]) -> Result<Self, CodecError> {
        let raw = *value
            .first()
            .ok_or(CodecError::MalformedField("fault handler override"))?;
        Ok(Self {
            condition_code: ConditionCode::try_from(raw >> 4).map_err(|_| {
                CodecError::InvalidRawValue {
                    field: "condition code",
                    value: raw >> 4,
                }
            })?,
            handler_code: FaultHandlerCode::try_from(raw & 0b1111).map_err(|_| {
                CodecError::InvalidRawValue {
                    field: "fault handler code",
                    value: raw & 0b1111,
                }
            })?,
        })
    }
}

/// Options which can be attached to a Metadata PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataOption {
    FilestoreRequest(FilestoreRequest),
    MsgToUser(MessageToUser),
    FaultHandlerOverride(FaultHandlerOverride),
    /// Any other TLV, including messages to user which are not reserved CFDP messages.
    Other(TlvOwned),
}

impl MetadataOption {
    pub fn to_tlv(&self) -> Result<TlvOwned, CodecError> {
        match self {
            MetadataOption::FilestoreRequest(request) => request.to_tlv(),
            MetadataOption::MsgToUser(msg) => msg.to_tlv(),
            MetadataOption::FaultHandlerOverride(fh_override) => fh_override.to_tlv(),
            MetadataOption::Other(tlv) => Ok(tlv.clone()),
        }
    }

    pub fn from_tlv(tlv: &Tlv<'_>) -> Result<Self, CodecError> {
        Ok(match tlv.tlv_type() {
            Some(TlvType::FilestoreRequest) => {
                MetadataOption::FilestoreRequest(FilestoreRequest::from_tlv_value(tlv.value())?)
            }
            Some(TlvType::MsgToUser) => match MessageToUser::from_tlv_value(tlv.value()) {
                Ok(msg) => MetadataOption::MsgToUser(msg),
                Err(CodecError::NonReservedMessage) => MetadataOption::Other(tlv.to_owned()),
                Err(e) => return Err(e),
            },
            Some(TlvType::FaultHandler) => MetadataOption::FaultHandlerOverride(
                FaultHandlerOverride::from_tlv_value(tlv.value())?,
            ),
            _ => MetadataOption::Other(tlv.to_owned()),
        })
    }

    /// Decode the options field of a Metadata PDU.
    pub fn parse_all(raw: &[u8]) -> Result<Vec<Self>, CodecError> {
        let mut options = Vec::new();
        let mut current_idx = 0;
        while current_idx < raw.len() {
            let tlv = Tlv::from_bytes(&raw[current_idx..])
                .map_err(|_| CodecError::MalformedField("metadata options"))?;
            current_idx += tlv.len_full();
            options.push(Self::from_tlv(&tlv)?);
        }
        Ok(options)
    }

    /// Encode options into the raw options field of a Metadata PDU.
    pub fn write_all(options: &[Self]) -> Result<Vec<u8>, CodecError> {
        let tlvs = options
            .iter()
            .map(MetadataOption::to_tlv)
            .collect::<Result<Vec<_>, _>>()?;
        let mut raw = vec![0; tlvs.iter().map(|tlv| tlv.as_tlv().len_full()).sum()];
        let mut current_idx = 0;
        for tlv in &tlvs {
            current_idx += tlv.as_tlv().write_to_bytes(&mut raw[current_idx..])?;
        }
        Ok(raw)
    }
}

impl From<FilestoreRequest> for MetadataOption {
    fn from(value: FilestoreRequest) -> Self {
        MetadataOption::FilestoreRequest(value)
    }
}

impl From<MessageToUser> for MetadataOption {
    fn from(value: MessageToUser) -> Self {
        MetadataOption::MsgToUser(value)
    }
}

impl From<FaultHandlerOverride> for MetadataOption {
    fn from(value: FaultHandlerOverride) -> Self {
        MetadataOption::FaultHandlerOverride(value)
    }
}

/// Entity ID TLV, used as the fault location in EOF and Finished PDUs.
pub fn entity_id_tlv(entity_id: u64) -> EntityIdTlv {
    EntityIdTlv::new(UnsignedByteField::new(field_width(entity_id), entity_id))
}

pub(crate) fn new_tlv(tlv_type: TlvType, value: &[u8]) -> Result<TlvOwned, CodecError> {
    Ok(Tlv::new(tlv_type, value)
        .map_err(|_| CodecError::LvTooLarge(value.len()))?
        .to_owned())
}

/// Append the value as a length value field.
pub(crate) fn push_lv(buf: &mut Vec<u8>, value: &[u8]) -> Result<(), CodecError> {
    let lv = Lv::new(value).map_err(|_| CodecError::LvTooLarge(value.len()))?;
    let start = buf.len();
    buf.resize(start + lv.len_full(), 0);
    lv.write_to_be_bytes(&mut buf[start..])?;
    Ok(())
}

/// Append the value as a length value field holding a big endian unsigned integer.
pub(crate) fn push_uint_lv(buf: &mut Vec<u8>, value: u64) -> Result<(), CodecError> {
    let width = field_width(value);
    push_lv(buf, &value.to_be_bytes()[8 - width..])
}

/// Sequential reader over the fields of a TLV value.
#[derive(Debug)]
pub(crate) struct LvCursor<'buf> {
    buf: &'buf [u8],
    pos: usize,
}

impl<'buf> LvCursor<'buf> {
    pub(crate) fn new(buf: &'buf [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> &'buf [u8] {
        &self.buf[self.pos..]
    }

    pub(crate) fn read_u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        let value = *self
            .remaining()
            .first()
            .ok_or(CodecError::MalformedField(field))?;
        self.pos += 1;
        Ok(value)
    }

    pub(crate) fn read_slice(
        &mut self,
        len: usize,
        field: &'static str,
    ) -> Result<&'buf [u8], CodecError> {
        let slice = self
            .remaining()
            .get(..len)
            .ok_or(CodecError::MalformedField(field))?;
        self.pos += len;
        Ok(slice)
    }

    pub(crate) fn read_string(&mut self, field: &'static str) -> Result<String, CodecError> {
        let lv = Lv::from_bytes(self.remaining()).map_err(|_| CodecError::MalformedField(field))?;
        self.pos += lv.len_full();
        match lv.value_as_str() {
            Some(Ok(value)) => Ok(String::from(value)),
            Some(Err(_)) => Err(CodecError::InvalidUtf8(field)),
            None => Ok(String::new()),
        }
    }

    /// Length value field holding a big endian unsigned integer with 1 to 8 bytes.
    pub(crate) fn read_uint(&mut self, field: &'static str) -> Result<u64, CodecError> {
        let lv = Lv::from_bytes(self.remaining()).map_err(|_| CodecError::MalformedField(field))?;
        self.pos += lv.len_full();
        if lv.value().is_empty() || lv.value().len() > 8 {
            return Err(CodecError::MalformedField(field));
        }
        Ok(uint_from_be_bytes(lv.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransactionId;
    use spacepackets::util::UnsignedEnum;

    fn write_and_parse(option: &MetadataOption) -> MetadataOption {
        let raw = MetadataOption::write_all(core::slice::from_ref(option)).unwrap();
        let mut options = MetadataOption::parse_all(&raw).unwrap();
        assert_eq!(options.len(), 1);
        options.remove(0)
    }

    #[test]
    fn test_filestore_request_single_name() {
        let request = FilestoreRequest::new_create_file("/tmp/hello.txt");
        let tlv = request.to_tlv().unwrap();
        assert_eq!(tlv.tlv_type(), Some(TlvType::FilestoreRequest));
        let tlv = tlv.as_tlv();
        assert_eq!(tlv.value()[0], 0x00);
        assert_eq!(tlv.value()[1] as usize, "/tmp/hello.txt".len());
        assert_eq!(tlv.len_full(), 2 + 1 + 1 + 14);
        assert_eq!(
            write_and_parse(&request.clone().into()),
            MetadataOption::FilestoreRequest(request)
        );
    }

    #[test]
    fn test_filestore_request_two_names() {
        let request = FilestoreRequest::new_rename_file("/a.txt", "/b.txt");
        let tlv = request.to_tlv().unwrap();
        assert_eq!(
            tlv.as_tlv().value(),
            [0x20, 6, b'/', b'a', b'.', b't', b'x', b't', 6, b'/', b'b', b'.', b't', b'x', b't']
        );
        assert_eq!(
            write_and_parse(&request.clone().into()),
            MetadataOption::FilestoreRequest(request)
        );
    }

    #[test]
    fn test_second_name_ignored_for_single_name_actions() {
        let request = FilestoreRequest::new(
            FilestoreActionCode::DeleteFile,
            "/a.txt",
            Some("/b.txt".into()),
        );
        let tlv = request.to_tlv().unwrap();
        let read_back = FilestoreRequest::from_tlv_value(tlv.as_tlv().value()).unwrap();
        assert_eq!(read_back, FilestoreRequest::new_delete_file("/a.txt"));
    }

    #[test]
    fn test_action_code_shapes() {
        for (raw, two_names) in [
            (0, false),
            (1, false),
            (2, true),
            (3, true),
            (4, true),
            (5, false),
            (6, false),
            (7, false),
            (8, false),
        ] {
            let action_code = FilestoreActionCode::try_from(raw).unwrap();
            assert_eq!(has_second_filename(action_code), two_names);
        }
        assert!(matches!(
            FilestoreRequest::from_tlv_value(&[0x90, 0]),
            Err(CodecError::InvalidRawValue { value: 9, .. })
        ));
    }

    #[test]
    fn test_fault_handler_override() {
        let fh_override = FaultHandlerOverride::new(
            ConditionCode::PositiveAckLimitReached,
            FaultHandlerCode::AbandonTransaction,
        );
        let tlv = fh_override.to_tlv().unwrap();
        assert_eq!(tlv.tlv_type(), Some(TlvType::FaultHandler));
        assert_eq!(tlv.as_tlv().value(), [0x14]);
        assert_eq!(
            write_and_parse(&fh_override.into()),
            MetadataOption::FaultHandlerOverride(fh_override)
        );
    }

    #[test]
    fn test_unknown_tlv_is_kept() {
        let tlv = new_tlv(TlvType::FlowLabel, &[1, 2, 3]).unwrap();
        assert_eq!(
            write_and_parse(&MetadataOption::Other(tlv.clone())),
            MetadataOption::Other(tlv)
        );
    }

    #[test]
    fn test_non_reserved_message_is_kept() {
        let tlv = new_tlv(TlvType::MsgToUser, b"hello").unwrap();
        assert_eq!(
            write_and_parse(&MetadataOption::Other(tlv.clone())),
            MetadataOption::Other(tlv)
        );
        let reserved = MessageToUser::OriginatingTransactionId(TransactionId::new(3, 4));
        assert_eq!(
            write_and_parse(&reserved.clone().into()),
            MetadataOption::MsgToUser(reserved)
        );
    }

    #[test]
    fn test_entity_id_tlv() {
        let tlv = entity_id_tlv(0x0203);
        assert_eq!(tlv.entity_id().value_const(), 0x0203);
        assert_eq!(tlv.entity_id().size(), 2);
    }

    #[test]
    fn test_truncated_tlv() {
        assert!(matches!(
            MetadataOption::parse_all(&[0x00, 10, 0x00]),
            Err(CodecError::MalformedField(_))
        ));
    }

    #[test]
    fn test_lv_helpers() {
        let mut buf = Vec::new();
        push_uint_lv(&mut buf, 0x0102).unwrap();
        push_lv(&mut buf, b"/a").unwrap();
        assert_eq!(buf, [2, 0x01, 0x02, 2, b'/', b'a']);
        let mut cursor = LvCursor::new(&buf);
        assert_eq!(cursor.read_uint("id").unwrap(), 0x0102);
        assert_eq!(cursor.read_string("name").unwrap(), "/a");
        assert!(cursor.remaining().is_empty());
        assert!(matches!(
            push_lv(&mut buf, &[0; 256]),
            Err(CodecError::LvTooLarge(256))
        ));
    }
}
