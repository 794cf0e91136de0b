//! Deserialisation of DNS messages from the network.  See the `types`
//! module for details of the format.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::protocol::types::*;

/// The most compression pointers one name may chase.  Pointers must
/// also strictly decrease, so this only bounds pathological (but
/// well-formed) chains.
pub const MAX_POINTER_HOPS: usize = 128;

impl Message {
    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        Self::deserialise(&mut ConsumableBuffer::new(octets))
    }

    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let wire_header = WireHeader::deserialise(buffer)?;
        let id = wire_header.header.id;
        let mut questions = Vec::with_capacity(wire_header.qdcount.into());
        let mut answers = Vec::with_capacity(wire_header.ancount.into());
        let mut authority = Vec::with_capacity(wire_header.nscount.into());
        let mut additional = Vec::with_capacity(wire_header.arcount.into());

        for _ in 0..wire_header.qdcount {
            questions.push(Question::deserialise(id, buffer)?);
        }
        for _ in 0..wire_header.ancount {
            answers.push(ResourceRecord::deserialise(id, buffer)?);
        }
        for _ in 0..wire_header.nscount {
            authority.push(ResourceRecord::deserialise(id, buffer)?);
        }
        for _ in 0..wire_header.arcount {
            additional.push(ResourceRecord::deserialise(id, buffer)?);
        }

        Ok(Self {
            header: wire_header.header,
            questions,
            answers,
            authority,
            additional,
        })
    }
}

impl WireHeader {
    /// # Errors
    ///
    /// If the header is too short.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let id = buffer.next_u16().ok_or(Error::CompletelyBusted)?;
        let flags1 = buffer.next_u8().ok_or(Error::HeaderTooShort(id))?;
        let flags2 = buffer.next_u8().ok_or(Error::HeaderTooShort(id))?;
        let qdcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let ancount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let nscount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let arcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;

        Ok(Self {
            header: Header {
                id,
                is_response: flags1 & HEADER_MASK_QR != 0,
                opcode: Opcode::from((flags1 & HEADER_MASK_OPCODE) >> HEADER_OFFSET_OPCODE),
                is_authoritative: flags1 & HEADER_MASK_AA != 0,
                is_truncated: flags1 & HEADER_MASK_TC != 0,
                recursion_desired: flags1 & HEADER_MASK_RD != 0,
                recursion_available: flags2 & HEADER_MASK_RA != 0,
                rcode: Rcode::from((flags2 & HEADER_MASK_RCODE) >> HEADER_OFFSET_RCODE),
            },
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }
}

impl Question {
    /// # Errors
    ///
    /// If the question cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let qtype = buffer
            .next_u16()
            .map(QueryType::from)
            .ok_or(Error::QuestionTooShort(id))?;
        let qclass = buffer
            .next_u16()
            .map(QueryClass::from)
            .ok_or(Error::QuestionTooShort(id))?;

        Ok(Self {
            name,
            qtype,
            qclass,
        })
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the record cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let rtype = buffer
            .next_u16()
            .map(RecordType::from)
            .ok_or(Error::ResourceRecordTooShort(id))?;
        let rclass = buffer
            .next_u16()
            .map(RecordClass::from)
            .ok_or(Error::ResourceRecordTooShort(id))?;
        let ttl = buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?;
        let rdlength = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;

        let rdata_start = buffer.position;

        // for records which include domain names, deserialise them to
        // expand pointers.
        let rtype_with_data = match rtype {
            RecordType::A => RecordTypeWithData::A {
                address: Ipv4Addr::from(
                    buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                ),
            },
            RecordType::NS => RecordTypeWithData::NS {
                nsdname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::CNAME => RecordTypeWithData::CNAME {
                cname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::SOA => RecordTypeWithData::SOA {
                mname: DomainName::deserialise(id, buffer)?,
                rname: DomainName::deserialise(id, buffer)?,
                serial: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                refresh: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                retry: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                expire: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                minimum: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
            },
            RecordType::PTR => RecordTypeWithData::PTR {
                ptrdname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::MX => RecordTypeWithData::MX {
                preference: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                exchange: DomainName::deserialise(id, buffer)?,
            },
            RecordType::TXT => {
                let mut strings = Vec::new();
                while buffer.position < rdata_start + (rdlength as usize) {
                    let len = buffer.next_u8().ok_or(Error::ResourceRecordTooShort(id))?;
                    let octets = buffer
                        .take(len as usize)
                        .ok_or(Error::ResourceRecordTooShort(id))?;
                    strings.push(octets.to_vec());
                }
                RecordTypeWithData::TXT { strings }
            }
            RecordType::AAAA => {
                let mut octets = [0; 16];
                for octet in &mut octets {
                    *octet = buffer.next_u8().ok_or(Error::ResourceRecordTooShort(id))?;
                }
                RecordTypeWithData::AAAA {
                    address: Ipv6Addr::from(octets),
                }
            }
            RecordType::Unknown(tag) => RecordTypeWithData::Unknown {
                tag,
                octets: buffer
                    .take(rdlength as usize)
                    .ok_or(Error::ResourceRecordTooShort(id))?
                    .to_vec(),
            },
        };

        // the typed view must consume the rdata exactly.
        if buffer.position == rdata_start + (rdlength as usize) {
            Ok(Self {
                name,
                rtype_with_data,
                rclass,
                ttl,
            })
        } else {
            Err(Error::ResourceRecordInvalid(id))
        }
    }
}

impl DomainName {
    /// # Errors
    ///
    /// If the domain cannot be parsed: truncation, a label tag which
    /// is neither a length nor a pointer, a pointer which does not
    /// point strictly backwards, a pointer chain over
    /// `MAX_POINTER_HOPS` hops, or a name over 255 octets.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        Self::deserialise_pointered(id, buffer, 0)
    }

    fn deserialise_pointered(
        id: u16,
        buffer: &mut ConsumableBuffer,
        hops: usize,
    ) -> Result<Self, Error> {
        let mut octets = Vec::<u8>::with_capacity(DOMAINNAME_MAX_LEN);
        let mut labels = Vec::<Vec<u8>>::with_capacity(5);
        let start = buffer.position;

        'outer: loop {
            let size = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;

            if usize::from(size) <= LABEL_MAX_LEN {
                octets.push(size);

                if size == 0 {
                    labels.push(Vec::new());
                    break 'outer;
                }

                if let Some(os) = buffer.take(size as usize) {
                    let mut label = Vec::<u8>::with_capacity(os.len());
                    for o in os {
                        let o = o.to_ascii_lowercase();
                        label.push(o);
                        octets.push(o);
                    }
                    labels.push(label);
                } else {
                    return Err(Error::DomainTooShort(id));
                }

                if octets.len() > DOMAINNAME_MAX_LEN {
                    break 'outer;
                }
            } else if size >= 192 {
                // 11-tagged: the rest of the name lives at an earlier
                // offset (not merely a different one: an earlier one,
                // RFC 1035 section 4.1.4 - which also rules out
                // loops).
                if hops >= MAX_POINTER_HOPS {
                    return Err(Error::DomainPointerChainTooLong(id));
                }

                let hi = size & 0b0011_1111;
                let lo = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;
                let ptr = usize::from(u16::from_be_bytes([hi, lo]));

                if ptr >= start {
                    return Err(Error::DomainPointerInvalid(id));
                }

                let mut other =
                    DomainName::deserialise_pointered(id, &mut buffer.at_offset(ptr), hops + 1)?;
                octets.append(&mut other.octets);
                labels.append(&mut other.labels);
                break 'outer;
            } else {
                return Err(Error::DomainLabelInvalid(id));
            }
        }

        if octets.len() <= DOMAINNAME_MAX_LEN {
            Ok(DomainName { octets, labels })
        } else {
            Err(Error::DomainTooLong(id))
        }
    }
}

/// Errors encountered when parsing a datagram.  In all the errors
/// which have a `u16` parameter, that is the ID from the header - so
/// that the failure can be correlated with the query.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// The datagram is not even 2 octets long, so it doesn't even
    /// contain a valid ID.
    CompletelyBusted,

    /// The header is missing one or more required fields.
    HeaderTooShort(u16),

    /// A question ends with an incomplete field.
    QuestionTooShort(u16),

    /// A resource record ends with an incomplete field.
    ResourceRecordTooShort(u16),

    /// A resource record is the wrong format.
    ResourceRecordInvalid(u16),

    /// A domain is incomplete.
    DomainTooShort(u16),

    /// A domain is over 255 octets in size.
    DomainTooLong(u16),

    /// A domain pointer does not point strictly backwards.
    DomainPointerInvalid(u16),

    /// A domain pointer chain exceeds the hop limit.
    DomainPointerChainTooLong(u16),

    /// A domain label is longer than 63 octets, but not a pointer.
    DomainLabelInvalid(u16),
}

impl Error {
    pub fn id(self) -> Option<u16> {
        match self {
            Error::CompletelyBusted => None,
            Error::HeaderTooShort(id)
            | Error::QuestionTooShort(id)
            | Error::ResourceRecordTooShort(id)
            | Error::ResourceRecordInvalid(id)
            | Error::DomainTooShort(id)
            | Error::DomainTooLong(id)
            | Error::DomainPointerInvalid(id)
            | Error::DomainPointerChainTooLong(id)
            | Error::DomainLabelInvalid(id) => Some(id),
        }
    }
}

/// A buffer which will be consumed by the parsing process.
pub struct ConsumableBuffer<'a> {
    octets: &'a [u8],
    pub position: usize,
}

impl<'a> ConsumableBuffer<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self {
            octets,
            position: 0,
        }
    }

    pub fn next_u8(&mut self) -> Option<u8> {
        if self.octets.len() > self.position {
            let a = self.octets[self.position];
            self.position += 1;
            Some(a)
        } else {
            None
        }
    }

    pub fn next_u16(&mut self) -> Option<u16> {
        if self.octets.len() > self.position + 1 {
            let a = self.octets[self.position];
            let b = self.octets[self.position + 1];
            self.position += 2;
            Some(u16::from_be_bytes([a, b]))
        } else {
            None
        }
    }

    pub fn next_u32(&mut self) -> Option<u32> {
        if self.octets.len() > self.position + 3 {
            let a = self.octets[self.position];
            let b = self.octets[self.position + 1];
            let c = self.octets[self.position + 2];
            let d = self.octets[self.position + 3];
            self.position += 4;
            Some(u32::from_be_bytes([a, b, c, d]))
        } else {
            None
        }
    }

    pub fn take(&mut self, size: usize) -> Option<&'a [u8]> {
        if self.octets.len() >= self.position + size {
            let slice = &self.octets[self.position..self.position + size];
            self.position += size;
            Some(slice)
        } else {
            None
        }
    }

    pub fn at_offset(&self, position: usize) -> ConsumableBuffer<'a> {
        Self {
            octets: self.octets,
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::test_util::*;

    #[test]
    fn rejects_empty_datagram() {
        assert_eq!(Err(Error::CompletelyBusted), Message::from_octets(&[]));
    }

    #[test]
    fn rejects_truncated_header() {
        assert_eq!(
            Err(Error::HeaderTooShort(0x0102)),
            Message::from_octets(&[1, 2, 3])
        );
    }

    #[test]
    fn decodes_uncompressed_name() {
        let wire = [3, b'w', b'w', b'w', 7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0];
        let name = DomainName::deserialise(0, &mut ConsumableBuffer::new(&wire)).unwrap();
        assert_eq!(domain("www.example.com."), name);
    }

    #[test]
    fn decodes_name_behind_pointer() {
        // "com." at 0, then "example.com." at 5 via a pointer.
        let wire = [
            3, b'c', b'o', b'm', 0, // com.
            7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0b1100_0000, 0, // example -> 0
        ];
        let mut buffer = ConsumableBuffer::new(&wire);
        buffer.position = 5;
        let name = DomainName::deserialise(0, &mut buffer).unwrap();
        assert_eq!(domain("example.com."), name);
    }

    #[test]
    fn lowercases_on_decode() {
        let wire = [3, b'W', b'w', b'W', 3, b'C', b'O', b'M', 0];
        let name = DomainName::deserialise(0, &mut ConsumableBuffer::new(&wire)).unwrap();
        assert_eq!(domain("www.com."), name);
    }

    #[test]
    fn rejects_forward_pointer() {
        let wire = [0b1100_0000, 9, 0, 0, 0, 0, 0, 0, 0, 3, b'c', b'o', b'm', 0];
        assert_eq!(
            Err(Error::DomainPointerInvalid(0)),
            DomainName::deserialise(0, &mut ConsumableBuffer::new(&wire))
        );
    }

    #[test]
    fn rejects_self_pointer() {
        // a pointer to its own offset makes no progress; the
        // strictly-backwards rule rejects it.
        let wire = [0b1100_0000, 0];
        assert_eq!(
            Err(Error::DomainPointerInvalid(0)),
            DomainName::deserialise(0, &mut ConsumableBuffer::new(&wire))
        );
    }

    #[test]
    fn rejects_pointer_chain_over_hop_limit() {
        // name at 0, then a ladder of pointers each referencing the
        // previous rung.
        let mut wire = vec![1, b'x', 0];
        for i in 0..(MAX_POINTER_HOPS + 1) {
            let target = if i == 0 { 0 } else { 3 + 2 * (i - 1) };
            #[allow(clippy::cast_possible_truncation)]
            let [hi, lo] = (0b1100_0000_0000_0000_u16 | target as u16).to_be_bytes();
            wire.push(hi);
            wire.push(lo);
        }

        let top = wire.len() - 2;
        let mut buffer = ConsumableBuffer::new(&wire);
        buffer.position = top;
        assert_eq!(
            Err(Error::DomainPointerChainTooLong(0)),
            DomainName::deserialise(0, &mut buffer)
        );
    }

    #[test]
    fn accepts_pointer_chain_within_hop_limit() {
        let mut wire = vec![1, b'x', 0];
        for i in 0..(MAX_POINTER_HOPS - 1) {
            let target = if i == 0 { 0 } else { 3 + 2 * (i - 1) };
            #[allow(clippy::cast_possible_truncation)]
            let [hi, lo] = (0b1100_0000_0000_0000_u16 | target as u16).to_be_bytes();
            wire.push(hi);
            wire.push(lo);
        }

        let top = wire.len() - 2;
        let mut buffer = ConsumableBuffer::new(&wire);
        buffer.position = top;
        assert_eq!(
            Ok(domain("x.")),
            DomainName::deserialise(0, &mut buffer)
        );
    }

    #[test]
    fn rejects_name_over_255_octets() {
        // 5 labels of 63 octets = 320 octets of name.
        let mut wire = Vec::new();
        for _ in 0..5 {
            wire.push(63);
            wire.extend(std::iter::repeat(b'x').take(63));
        }
        wire.push(0);

        assert_eq!(
            Err(Error::DomainTooLong(0)),
            DomainName::deserialise(0, &mut ConsumableBuffer::new(&wire))
        );
    }

    #[test]
    fn rejects_truncated_label() {
        let wire = [5, b'a', b'b'];
        assert_eq!(
            Err(Error::DomainTooShort(0)),
            DomainName::deserialise(0, &mut ConsumableBuffer::new(&wire))
        );
    }

    #[test]
    fn rejects_invalid_label_tag() {
        // tags 64..=191 are neither lengths nor pointers.
        let wire = [0b1000_0000, 0];
        assert_eq!(
            Err(Error::DomainLabelInvalid(0)),
            DomainName::deserialise(0, &mut ConsumableBuffer::new(&wire))
        );
    }

    #[test]
    fn rejects_rdlength_mismatch() {
        // an A record whose rdlength claims 5 octets.
        let mut wire = Vec::new();
        wire.extend([1, b'x', 0]); // name
        wire.extend([0, 1]); // type A
        wire.extend([0, 1]); // class IN
        wire.extend([0, 0, 1, 44]); // ttl
        wire.extend([0, 5]); // rdlength (wrong)
        wire.extend([10, 0, 0, 1, 99]); // rdata

        assert_eq!(
            Err(Error::ResourceRecordInvalid(0)),
            ResourceRecord::deserialise(0, &mut ConsumableBuffer::new(&wire))
        );
    }

    #[test]
    fn decodes_txt_strings() {
        let mut wire = Vec::new();
        wire.extend([1, b'x', 0]); // name
        wire.extend([0, 16]); // type TXT
        wire.extend([0, 1]); // class IN
        wire.extend([0, 0, 0, 60]); // ttl
        wire.extend([0, 8]); // rdlength
        wire.extend([2, b'h', b'i', 4, b't', b'h', b'e', b'r']); // "hi" "ther"

        let rr = ResourceRecord::deserialise(0, &mut ConsumableBuffer::new(&wire)).unwrap();
        assert_eq!(
            RecordTypeWithData::TXT {
                strings: vec![b"hi".to_vec(), b"ther".to_vec()],
            },
            rr.rtype_with_data
        );
    }

    #[test]
    fn rejects_txt_string_overrunning_rdata() {
        let mut wire = Vec::new();
        wire.extend([1, b'x', 0]); // name
        wire.extend([0, 16]); // type TXT
        wire.extend([0, 1]); // class IN
        wire.extend([0, 0, 0, 60]); // ttl
        wire.extend([0, 3]); // rdlength
        wire.extend([5, b'a', b'b']); // string length overruns

        assert!(ResourceRecord::deserialise(0, &mut ConsumableBuffer::new(&wire)).is_err());
    }
}
