use alloc::vec::Vec;

use super::{
    directive_header, read_directive_pdu, write_directive_pdu, CodecError, FileDirectiveType,
    PduHeader,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PromptResponseRequired {
    Nak = 0,
    KeepAlive = 1,
}

/// Prompt PDU as specified in chapter 5.2.7 of the CFDP standard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPdu {
    pub header: PduHeader,
    pub response_required: PromptResponseRequired,
}

impl PromptPdu {
    pub fn new(header: PduHeader, response_required: PromptResponseRequired) -> Self {
        Self {
            header: directive_header(&header),
            response_required,
        }
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, CodecError> {
        let (header, data_field) = read_directive_pdu(buf, FileDirectiveType::PromptPdu)?;
        let raw = *data_field
            .first()
            .ok_or(CodecError::MalformedField("prompt response"))?;
        let response_required = if raw >> 7 == 1 {
            PromptResponseRequired::KeepAlive
        } else {
            PromptResponseRequired::Nak
        };
        Ok(Self {
            header,
            response_required,
        })
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, CodecError> {
        write_directive_pdu(
            &self.header,
            &[
                FileDirectiveType::PromptPdu as u8,
                (self.response_required as u8) << 7,
            ],
        )
    }
}
