use crate::shared::dns::bytes::*;
use crate::shared::dns::errors::*;
use crate::shared::dns::header::*;
use crate::shared::dns::name::*;
use std::fmt::{self, Display, Formatter};
use std::net::Ipv4Addr;

/// A dns record type code. Only the types the engine acts on are named,
/// everything else is carried around (and relayed) by its numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordType(pub u16);

impl RecordType {
    pub const A: RecordType = RecordType(1);
    pub const AAAA: RecordType = RecordType(28);
}

impl Display for RecordType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            RecordType::A => write!(f, "A"),
            RecordType::AAAA => write!(f, "AAAA"),
            RecordType(n) => write!(f, "TYPE{}", n),
        }
    }
}

pub const CLASS_IN: u16 = 1;

#[derive(Debug, Clone)]
pub struct Question {
    pub name: Name,
    pub qtype: RecordType,
    pub qclass: u16,
}

/// Record data. A records are parsed into addresses since the engine keys
/// its enforcement decisions on them; all other types keep their raw rdata.
/// Raw rdata may contain compression pointers into the originating message,
/// so messages holding it are never re-encoded, only inspected.
#[derive(Debug, Clone)]
pub enum RData {
    A(Ipv4Addr),
    Raw(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Record {
    pub name: Name,
    pub rtype: RecordType,
    pub class: u16,
    pub ttl: u32,
    pub rdata: RData,
}

/// Represents a complete dns message. Decoding accepts anything structurally
/// valid, including record types unknown to the engine. Encoding is reserved
/// for messages synthesized internally (responses to blocked or unresolvable
/// queries, static answers), which by construction always encode.
#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
}

impl Message {
    /// Decode a dns [`Message`] from the passed bytes.
    pub fn decode(bytes: &[u8]) -> Result<Message, WireErr> {
        let mut reader = Reader::new(bytes);
        let header = Header::decode_from(&mut reader)?;

        let mut questions = Vec::with_capacity(header.questions_count as usize);
        for _ in 0..header.questions_count {
            questions.push(Question {
                name: Name::from_wire(&mut reader)?,
                qtype: RecordType(check_end(reader.read_u16())?),
                qclass: check_end(reader.read_u16())?,
            });
        }

        let mut sections = [
            (header.answers_count, Vec::new()),
            (header.authorities_count, Vec::new()),
            (header.additionals_count, Vec::new()),
        ];
        for (count, records) in sections.iter_mut() {
            for _ in 0..*count {
                records.push(decode_record(&mut reader)?);
            }
        }
        let [(_, answers), (_, authorities), (_, additionals)] = sections;

        Ok(Message {
            header,
            questions,
            answers,
            authorities,
            additionals,
        })
    }

    /// Encode the [`Message`] to raw bytes. Section counts are derived from
    /// the section vectors, so internally built messages need no bookkeeping.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        let counts = [
            self.questions.len() as u16,
            self.answers.len() as u16,
            self.authorities.len() as u16,
            self.additionals.len() as u16,
        ];
        self.header.encode_to(&mut writer, counts);
        for question in &self.questions {
            question.name.to_wire(&mut writer);
            writer.write_u16(question.qtype.0);
            writer.write_u16(question.qclass);
        }
        for record in [&self.answers, &self.authorities, &self.additionals].into_iter().flatten() {
            record.name.to_wire(&mut writer);
            writer.write_u16(record.rtype.0);
            writer.write_u16(record.class);
            writer.write_u32(record.ttl);
            match &record.rdata {
                RData::A(addr) => {
                    writer.write_u16(4);
                    writer.write_bytes(&addr.octets());
                }
                RData::Raw(bytes) => {
                    writer.write_u16(bytes.len() as u16);
                    writer.write_bytes(bytes);
                }
            }
        }
        writer.into_vec()
    }

    /// Build the response skeleton for the passed query: same id and
    /// question, response and recursion-available flags set, no answers.
    pub fn response_to(query: &Message, resp_code: RespCode) -> Message {
        let header = Header {
            id: query.header.id,
            response: true,
            op_code: query.header.op_code,
            recursion_desired: query.header.recursion_desired,
            recursion_available: true,
            resp_code,
            ..Header::default()
        };
        Message {
            header,
            questions: query.questions.clone(),
            answers: vec![],
            authorities: vec![],
            additionals: vec![],
        }
    }

    /// Build a complete NOERROR response carrying a single A record, used
    /// to pin static `address` rules into the response cache.
    pub fn static_answer(name: &Name, address: Ipv4Addr, ttl: u32) -> Message {
        let header = Header {
            response: true,
            recursion_available: true,
            ..Header::default()
        };
        Message {
            header,
            questions: vec![Question {
                name: name.clone(),
                qtype: RecordType::A,
                qclass: CLASS_IN,
            }],
            answers: vec![Record {
                name: name.clone(),
                rtype: RecordType::A,
                class: CLASS_IN,
                ttl,
                rdata: RData::A(address),
            }],
            authorities: vec![],
            additionals: vec![],
        }
    }

    pub fn id(&self) -> u16 {
        self.header.id
    }

    /// All addresses carried by A records in the answer section.
    pub fn a_records(&self) -> Vec<Ipv4Addr> {
        self.answers
            .iter()
            .filter_map(|record| match record.rdata {
                RData::A(addr) => Some(addr),
                _ => None,
            })
            .collect()
    }

    /// The maximum ttl among A records in the answer section, if any.
    pub fn max_a_ttl(&self) -> Option<u32> {
        self.answers
            .iter()
            .filter(|record| matches!(record.rdata, RData::A(_)))
            .map(|record| record.ttl)
            .max()
    }
}

/// Overwrite the id of an already encoded message. Used to replay cached
/// responses under the id of the query being answered.
pub fn patch_id(wire: &mut [u8], id: u16) {
    if wire.len() >= 2 {
        wire[0..2].copy_from_slice(&id.to_be_bytes());
    }
}

fn decode_record(reader: &mut Reader) -> Result<Record, WireErr> {
    let name = Name::from_wire(reader)?;
    let rtype = RecordType(check_end(reader.read_u16())?);
    let class = check_end(reader.read_u16())?;
    let ttl = check_end(reader.read_u32())?;
    let rd_len = check_end(reader.read_u16())? as usize;
    let rd_bytes = check_end(reader.read_bytes(rd_len))?;
    let rdata = match rtype {
        RecordType::A if rd_len == 4 => {
            RData::A(Ipv4Addr::new(rd_bytes[0], rd_bytes[1], rd_bytes[2], rd_bytes[3]))
        }
        _ => RData::Raw(rd_bytes.to_vec()),
    };
    Ok(Record { name, rtype, class, ttl, rdata })
}
