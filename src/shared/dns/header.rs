use crate::shared::dns::bytes::*;
use crate::shared::dns::errors::*;
use rand::Rng;

pub const HEADER_LEN_BYTES: usize = 12;

/// Response codes carried in the low four bits of the header flags.
/// Codes not known to the engine are preserved as [`RespCode::Other`] so
/// upstream responses can be inspected and relayed without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespCode {
    NoError,
    FormErr,
    ServFail,
    NxDomain,
    NotImp,
    Refused,
    Other(u8),
}

impl RespCode {
    pub fn from_num(n: u8) -> RespCode {
        match n {
            0 => RespCode::NoError,
            1 => RespCode::FormErr,
            2 => RespCode::ServFail,
            3 => RespCode::NxDomain,
            4 => RespCode::NotImp,
            5 => RespCode::Refused,
            n => RespCode::Other(n),
        }
    }

    pub fn to_num(self) -> u8 {
        match self {
            RespCode::NoError => 0,
            RespCode::FormErr => 1,
            RespCode::ServFail => 2,
            RespCode::NxDomain => 3,
            RespCode::NotImp => 4,
            RespCode::Refused => 5,
            RespCode::Other(n) => n,
        }
    }
}

/// Header of dns messages. The flags word is unpacked into named fields on
/// decoding and re-assembled on encoding. The `Default` implementation
/// generates an empty query header with a random id.
#[derive(Debug, Clone)]
pub struct Header {
    pub id: u16,
    pub response: bool,
    pub op_code: u8,
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub resp_code: RespCode,
    pub questions_count: u16,
    pub answers_count: u16,
    pub authorities_count: u16,
    pub additionals_count: u16,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            id: rand::thread_rng().gen::<u16>(),
            response: false,
            op_code: 0,
            authoritative: false,
            truncated: false,
            recursion_desired: false,
            recursion_available: false,
            resp_code: RespCode::NoError,
            questions_count: 0,
            answers_count: 0,
            authorities_count: 0,
            additionals_count: 0,
        }
    }
}

const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_AUTHORITATIVE: u16 = 0x0400;
const FLAG_TRUNCATED: u16 = 0x0200;
const FLAG_RECURSION_DESIRED: u16 = 0x0100;
const FLAG_RECURSION_AVAILABLE: u16 = 0x0080;

impl Header {
    /// Decode a dns message [`Header`] from the bytes read from the reader.
    pub fn decode_from(reader: &mut Reader) -> Result<Header, WireErr> {
        let id = check_end(reader.read_u16())?;
        let flags = check_end(reader.read_u16())?;
        Ok(Header {
            id,
            response: flags & FLAG_RESPONSE != 0,
            op_code: ((flags >> 11) & 0x0F) as u8,
            authoritative: flags & FLAG_AUTHORITATIVE != 0,
            truncated: flags & FLAG_TRUNCATED != 0,
            recursion_desired: flags & FLAG_RECURSION_DESIRED != 0,
            recursion_available: flags & FLAG_RECURSION_AVAILABLE != 0,
            resp_code: RespCode::from_num((flags & 0x000F) as u8),
            questions_count: check_end(reader.read_u16())?,
            answers_count: check_end(reader.read_u16())?,
            authorities_count: check_end(reader.read_u16())?,
            additionals_count: check_end(reader.read_u16())?,
        })
    }

    /// Encode the [`Header`] into the writer. The section counts are passed
    /// in by the message encoder, which derives them from the actual sections.
    pub(super) fn encode_to(&self, writer: &mut Writer, counts: [u16; 4]) {
        let mut flags: u16 = 0;
        if self.response {
            flags |= FLAG_RESPONSE;
        }
        flags |= ((self.op_code & 0x0F) as u16) << 11;
        if self.authoritative {
            flags |= FLAG_AUTHORITATIVE;
        }
        if self.truncated {
            flags |= FLAG_TRUNCATED;
        }
        if self.recursion_desired {
            flags |= FLAG_RECURSION_DESIRED;
        }
        if self.recursion_available {
            flags |= FLAG_RECURSION_AVAILABLE;
        }
        flags |= self.resp_code.to_num() as u16;

        writer.write_u16(self.id);
        writer.write_u16(flags);
        for count in counts {
            writer.write_u16(count);
        }
    }
}
