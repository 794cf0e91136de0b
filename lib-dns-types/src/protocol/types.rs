use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Basic DNS message format, used for both queries and responses.
///
/// ```text
///     +---------------------+
///     |        Header       |
///     +---------------------+
///     |       Question      | the question for the name server
///     +---------------------+
///     |        Answer       | RRs answering the question
///     +---------------------+
///     |      Authority      | RRs pointing toward an authority
///     +---------------------+
///     |      Additional     | RRs holding additional information
///     +---------------------+
/// ```
///
/// See section 4.1 of RFC 1035.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Message {
    /// Build an iterative query: QR=0, RD=0, a single question, all
    /// sections empty.
    pub fn from_question(id: u16, question: Question) -> Self {
        Self {
            header: Header {
                id,
                is_response: false,
                opcode: Opcode::Standard,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: false,
                recursion_available: false,
                rcode: Rcode::NoError,
            },
            questions: vec![question],
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    pub fn make_response(&self) -> Self {
        Self {
            header: Header {
                id: self.header.id,
                is_response: true,
                opcode: self.header.opcode,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: self.header.recursion_desired,
                recursion_available: false,
                rcode: Rcode::NoError,
            },
            questions: self.questions.clone(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }
}

/// Common header type for all messages.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      ID                       |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    QDCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    ANCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    NSCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    ARCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// See section 4.1.1 of RFC 1035.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Header {
    /// A 16 bit identifier assigned by the program that generates any
    /// kind of query.  This identifier is copied into the
    /// corresponding reply and can be used by the requester to match
    /// up replies to outstanding queries.
    pub id: u16,

    /// A one bit field that specifies whether this message is a query
    /// (0), or a response (1).
    pub is_response: bool,

    /// A four bit field that specifies kind of query in this message.
    /// This value is set by the originator of a query and copied into
    /// the response.
    pub opcode: Opcode,

    /// Authoritative Answer - this bit is valid in responses, and
    /// specifies that the responding name server is an authority for
    /// the domain name in question section.
    pub is_authoritative: bool,

    /// TrunCation - specifies that this message was truncated due to
    /// length greater than that permitted on the transmission
    /// channel.
    pub is_truncated: bool,

    /// Recursion Desired - this bit may be set in a query and is
    /// copied into the response.  Always clear for the queries built
    /// by this crate: resolution is iterative.
    pub recursion_desired: bool,

    /// Recursion Available - this bit is set or cleared in a
    /// response, and denotes whether recursive query support is
    /// available in the name server.
    pub recursion_available: bool,

    /// Response code - this 4 bit field is set as part of responses.
    pub rcode: Rcode,
}

/// A `Header` as it appears on the network.  This type is used for
/// serialisation and deserialisation only: including the count fields
/// in the normal `Header` type would require ensuring those values
/// are correct.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct WireHeader {
    /// The header that will be persisted to / is taken from the
    /// `Message`.
    pub header: Header,

    /// an unsigned 16 bit integer specifying the number of entries in
    /// the question section.
    pub qdcount: u16,

    /// an unsigned 16 bit integer specifying the number of resource
    /// records in the answer section.
    pub ancount: u16,

    /// an unsigned 16 bit integer specifying the number of name
    /// server resource records in the authority records section.
    pub nscount: u16,

    /// an unsigned 16 bit integer specifying the number of resource
    /// records in the additional records section.
    pub arcount: u16,
}

/// The question section has a list of questions (usually 1 but
/// possibly more) being asked.  This is the structure for a single
/// question.
///
/// See section 4.1.2 of RFC 1035.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Question {
    pub name: DomainName,
    pub qtype: QueryType,
    pub qclass: QueryClass,
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.qclass, self.qtype)
    }
}

/// The answer, authority, and additional sections are all the same
/// format: a variable number of resource records.  This is the
/// structure for a single resource record.
///
/// See section 4.1.3 of RFC 1035.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ResourceRecord {
    /// a domain name to which this resource record pertains.
    pub name: DomainName,

    /// A combination of the RTYPE and RDATA fields.
    pub rtype_with_data: RecordTypeWithData,

    /// two octets which specify the class of the data in the RDATA
    /// field.
    pub rclass: RecordClass,

    /// a 32 bit unsigned integer that specifies the time interval (in
    /// seconds) that the resource record may be cached before it
    /// should be discarded.
    pub ttl: u32,
}

impl ResourceRecord {
    pub fn rtype(&self) -> RecordType {
        self.rtype_with_data.rtype()
    }

    /// The stable textual form of this record, used as a
    /// deduplication key and in human-readable reports:
    /// `"<domain> <ttl> <type> <rdata>"` with the rdata in its
    /// zone-file shape.
    pub fn digest(&self) -> String {
        format!(
            "{} {} {} {}",
            self.name,
            self.ttl,
            self.rtype(),
            self.rtype_with_data.rdata_string()
        )
    }
}

/// A record type with its associated, deserialised, data.
///
/// Only the record types this crate interprets get a structured
/// variant; everything else is carried as raw octets under `Unknown`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum RecordTypeWithData {
    /// A 32 bit Internet address.
    A { address: Ipv4Addr },

    /// `NSDNAME`: a host which should be authoritative for the
    /// specified class and domain.
    NS { nsdname: DomainName },

    /// `CNAME`: the canonical or primary name for the owner.  The
    /// owner name is an alias.
    CNAME { cname: DomainName },

    /// The start-of-authority tuple: primary nameserver, responsible
    /// mailbox, and the five zone timers.  See section 3.3.13 of RFC
    /// 1035.
    SOA {
        mname: DomainName,
        rname: DomainName,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },

    /// `PTRDNAME`: a domain name which points to some location in the
    /// domain name space.
    PTR { ptrdname: DomainName },

    /// `PREFERENCE` and `EXCHANGE`: a host willing to act as a mail
    /// exchange for the owner name, and its preference among others
    /// at the same owner (lower is better).
    MX {
        preference: u16,
        exchange: DomainName,
    },

    /// One or more character-strings.
    TXT { strings: Vec<Vec<u8>> },

    /// A 128 bit Internet address.
    AAAA { address: Ipv6Addr },

    /// Any other record, with the rdata kept as raw octets.
    Unknown {
        tag: RecordTypeUnknown,
        octets: Vec<u8>,
    },
}

impl RecordTypeWithData {
    pub fn rtype(&self) -> RecordType {
        match self {
            RecordTypeWithData::A { .. } => RecordType::A,
            RecordTypeWithData::NS { .. } => RecordType::NS,
            RecordTypeWithData::CNAME { .. } => RecordType::CNAME,
            RecordTypeWithData::SOA { .. } => RecordType::SOA,
            RecordTypeWithData::PTR { .. } => RecordType::PTR,
            RecordTypeWithData::MX { .. } => RecordType::MX,
            RecordTypeWithData::TXT { .. } => RecordType::TXT,
            RecordTypeWithData::AAAA { .. } => RecordType::AAAA,
            RecordTypeWithData::Unknown { tag, .. } => RecordType::Unknown(*tag),
        }
    }

    /// The zone-file textual form of the rdata: dotted quad for A,
    /// domain for NS / CNAME / PTR, `preference exchange` for MX,
    /// seven tokens for SOA, quoted strings for TXT, and the RFC 3597
    /// `\# len hex` form for unknown types.
    pub fn rdata_string(&self) -> String {
        match self {
            RecordTypeWithData::A { address } => address.to_string(),
            RecordTypeWithData::NS { nsdname } => nsdname.to_string(),
            RecordTypeWithData::CNAME { cname } => cname.to_string(),
            RecordTypeWithData::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => format!("{mname} {rname} {serial} {refresh} {retry} {expire} {minimum}"),
            RecordTypeWithData::PTR { ptrdname } => ptrdname.to_string(),
            RecordTypeWithData::MX {
                preference,
                exchange,
            } => format!("{preference} {exchange}"),
            RecordTypeWithData::TXT { strings } => {
                let mut out = String::new();
                for (i, s) in strings.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    out.push('"');
                    for octet in s {
                        match octet {
                            b'"' | b'\\' => {
                                out.push('\\');
                                out.push(*octet as char);
                            }
                            0x20..=0x7e => out.push(*octet as char),
                            _ => out.push_str(&format!("\\{octet:03}")),
                        }
                    }
                    out.push('"');
                }
                out
            }
            RecordTypeWithData::AAAA { address } => address.to_string(),
            RecordTypeWithData::Unknown { octets, .. } => {
                let mut out = format!("\\# {}", octets.len());
                if !octets.is_empty() {
                    out.push(' ');
                    for octet in octets {
                        out.push_str(&format!("{octet:02x}"));
                    }
                }
                out
            }
        }
    }
}

/// What sort of query this is.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Opcode {
    Standard,
    Inverse,
    Status,
    Reserved(OpcodeReserved),
}

/// A struct with a private constructor, to ensure invalid `Opcode`s
/// cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct OpcodeReserved(u8);

impl From<u8> for Opcode {
    fn from(octet: u8) -> Self {
        match octet & 0b0000_1111 {
            0 => Opcode::Standard,
            1 => Opcode::Inverse,
            2 => Opcode::Status,
            other => Opcode::Reserved(OpcodeReserved(other)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        match value {
            Opcode::Standard => 0,
            Opcode::Inverse => 1,
            Opcode::Status => 2,
            Opcode::Reserved(OpcodeReserved(octet)) => octet,
        }
    }
}

/// What sort of response this is.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Rcode {
    NoError,
    FormatError,
    ServerFailure,
    NameError,
    NotImplemented,
    Refused,
    Reserved(RcodeReserved),
}

/// A struct with a private constructor, to ensure invalid `Rcode`s
/// cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RcodeReserved(u8);

impl From<u8> for Rcode {
    fn from(octet: u8) -> Self {
        match octet & 0b0000_1111 {
            0 => Rcode::NoError,
            1 => Rcode::FormatError,
            2 => Rcode::ServerFailure,
            3 => Rcode::NameError,
            4 => Rcode::NotImplemented,
            5 => Rcode::Refused,
            other => Rcode::Reserved(RcodeReserved(other)),
        }
    }
}

impl From<Rcode> for u8 {
    fn from(value: Rcode) -> Self {
        match value {
            Rcode::NoError => 0,
            Rcode::FormatError => 1,
            Rcode::ServerFailure => 2,
            Rcode::NameError => 3,
            Rcode::NotImplemented => 4,
            Rcode::Refused => 5,
            Rcode::Reserved(RcodeReserved(octet)) => octet,
        }
    }
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rcode::NoError => write!(f, "noerror"),
            Rcode::FormatError => write!(f, "formerr"),
            Rcode::ServerFailure => write!(f, "servfail"),
            Rcode::NameError => write!(f, "nxdomain"),
            Rcode::NotImplemented => write!(f, "notimp"),
            Rcode::Refused => write!(f, "refused"),
            Rcode::Reserved(RcodeReserved(n)) => write!(f, "rcode{n}"),
        }
    }
}

/// A domain name: an ordered sequence of labels, where each label is
/// 1 to 63 octets of case-insensitive ASCII.  The root is the empty
/// sequence.  Labels are lowercased on every construction path
/// (including decoding from the wire), so derived equality is the
/// label-wise case-insensitive equality of names.
///
/// A name must be 255 octets or shorter in total, including both
/// length and label octets.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct DomainName {
    /// The wire shape of the name, without compression: each label
    /// prefixed by its length, terminated by the zero octet.
    pub octets: Vec<u8>,

    /// The labels, lowercased; the last entry is always the empty
    /// root label.
    pub labels: Vec<Vec<u8>>,
}

pub const DOMAINNAME_MAX_LEN: usize = 255;
pub const LABEL_MAX_LEN: usize = 63;

impl DomainName {
    pub fn root_domain() -> Self {
        DomainName {
            octets: vec![0],
            labels: vec![vec![]],
        }
    }

    pub fn is_root(&self) -> bool {
        self.octets.len() == 1 && self.labels.len() == 1
    }

    /// The number of real labels in the name: 0 for the root, 2 for
    /// `example.com.`.
    pub fn depth(&self) -> usize {
        self.labels.len() - 1
    }

    /// Equal-or-descendant check: `www.example.com.` is a subdomain
    /// of `example.com.`, of itself, and of the root.
    pub fn is_subdomain_of(&self, other: &DomainName) -> bool {
        self.labels.ends_with(&other.labels)
    }

    /// Proper-descendant check: like `is_subdomain_of` but false for
    /// the name itself.
    pub fn is_strict_subdomain_of(&self, other: &DomainName) -> bool {
        self.labels.len() > other.labels.len() && self.is_subdomain_of(other)
    }

    /// The name with its first label removed; `None` for the root.
    pub fn parent(&self) -> Option<DomainName> {
        if self.is_root() {
            None
        } else {
            Self::from_labels(self.labels[1..].to_vec())
        }
    }

    pub fn to_dotted_string(&self) -> String {
        if self.is_root() {
            return ".".to_string();
        }

        let mut out = String::with_capacity(self.octets.len());
        for label in &self.labels {
            for octet in label {
                out.push(*octet as char);
            }
            if !label.is_empty() {
                out.push('.');
            }
        }

        out
    }

    /// Parse a dotted name.  A missing trailing dot is tolerated:
    /// `example.com` and `example.com.` are the same (absolute) name.
    pub fn from_dotted_string(s: &str) -> Option<Self> {
        if s == "." {
            return Some(Self::root_domain());
        }

        let stripped = s.strip_suffix('.').unwrap_or(s);
        if stripped.is_empty() {
            return None;
        }

        let mut labels = stripped
            .split('.')
            .map(|label| label.as_bytes().to_vec())
            .collect::<Vec<_>>();
        labels.push(Vec::new());

        Self::from_labels(labels)
    }

    /// Build a name from labels, the last of which must be the empty
    /// root label.  Labels are lowercased; an over-long label or
    /// name, a non-ASCII octet, or an empty label anywhere but the
    /// end is rejected.
    pub fn from_labels(mixed_case_labels: Vec<Vec<u8>>) -> Option<Self> {
        if mixed_case_labels.is_empty() {
            return None;
        }

        let mut labels = Vec::<Vec<u8>>::with_capacity(mixed_case_labels.len());
        let mut octets = Vec::<u8>::with_capacity(DOMAINNAME_MAX_LEN);
        let mut blank_label = false;

        for mc_label in &mixed_case_labels {
            if blank_label {
                return None;
            }

            blank_label = mc_label.is_empty();

            match mc_label.len().try_into() {
                Ok(n) if usize::from(n) <= LABEL_MAX_LEN => {
                    octets.push(n);
                    let mut label = Vec::<u8>::with_capacity(mc_label.len());
                    for octet in mc_label {
                        if !octet.is_ascii() {
                            return None;
                        }

                        let octet = octet.to_ascii_lowercase();
                        label.push(octet);
                        octets.push(octet);
                    }
                    labels.push(label);
                }
                _ => return None,
            }
        }

        if blank_label && octets.len() <= DOMAINNAME_MAX_LEN {
            Some(Self { octets, labels })
        } else {
            None
        }
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_dotted_string())
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainName")
            .field("to_dotted_string()", &self.to_dotted_string())
            .finish()
    }
}

/// The parse failure for `DomainName::from_str`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DomainNameParseError {
    pub input: String,
}

impl fmt::Display for DomainNameParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "'{}' is not a valid domain name", self.input)
    }
}

impl std::error::Error for DomainNameParseError {}

impl FromStr for DomainName {
    type Err = DomainNameParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_dotted_string(s).ok_or_else(|| DomainNameParseError {
            input: s.to_string(),
        })
    }
}

/// Query types are a superset of record types.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum QueryType {
    Record(RecordType),
    AXFR,
    MAILB,
    MAILA,
    Wildcard,
}

impl From<u16> for QueryType {
    fn from(value: u16) -> Self {
        match value {
            252 => QueryType::AXFR,
            253 => QueryType::MAILB,
            254 => QueryType::MAILA,
            255 => QueryType::Wildcard,
            _ => QueryType::Record(RecordType::from(value)),
        }
    }
}

impl From<QueryType> for u16 {
    fn from(value: QueryType) -> Self {
        match value {
            QueryType::AXFR => 252,
            QueryType::MAILB => 253,
            QueryType::MAILA => 254,
            QueryType::Wildcard => 255,
            QueryType::Record(rtype) => rtype.into(),
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryType::AXFR => write!(f, "AXFR"),
            QueryType::MAILB => write!(f, "MAILB"),
            QueryType::MAILA => write!(f, "MAILA"),
            QueryType::Wildcard => write!(f, "ANY"),
            QueryType::Record(rtype) => write!(f, "{rtype}"),
        }
    }
}

/// Query classes are a superset of record classes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum QueryClass {
    Record(RecordClass),
    Wildcard,
}

impl From<u16> for QueryClass {
    fn from(value: u16) -> Self {
        match value {
            255 => QueryClass::Wildcard,
            _ => QueryClass::Record(RecordClass::from(value)),
        }
    }
}

impl From<QueryClass> for u16 {
    fn from(value: QueryClass) -> Self {
        match value {
            QueryClass::Wildcard => 255,
            QueryClass::Record(rclass) => rclass.into(),
        }
    }
}

impl fmt::Display for QueryClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryClass::Wildcard => write!(f, "ANY"),
            QueryClass::Record(rclass) => write!(f, "{rclass}"),
        }
    }
}

/// Record types are used by resource records and by queries.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RecordType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    Unknown(RecordTypeUnknown),
}

/// A struct with a private constructor, to ensure invalid
/// `RecordType`s cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RecordTypeUnknown(u16);

impl From<u16> for RecordType {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            2 => RecordType::NS,
            5 => RecordType::CNAME,
            6 => RecordType::SOA,
            12 => RecordType::PTR,
            15 => RecordType::MX,
            16 => RecordType::TXT,
            28 => RecordType::AAAA,
            _ => RecordType::Unknown(RecordTypeUnknown(value)),
        }
    }
}

impl From<RecordType> for u16 {
    fn from(value: RecordType) -> Self {
        match value {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::PTR => 12,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::Unknown(RecordTypeUnknown(value)) => value,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::NS => write!(f, "NS"),
            RecordType::CNAME => write!(f, "CNAME"),
            RecordType::SOA => write!(f, "SOA"),
            RecordType::PTR => write!(f, "PTR"),
            RecordType::MX => write!(f, "MX"),
            RecordType::TXT => write!(f, "TXT"),
            RecordType::AAAA => write!(f, "AAAA"),
            RecordType::Unknown(RecordTypeUnknown(n)) => write!(f, "TYPE{n}"),
        }
    }
}

/// Record classes are used by resource records and by queries.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RecordClass {
    IN,
    Unknown(RecordClassUnknown),
}

/// A struct with a private constructor, to ensure invalid
/// `RecordClass`es cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RecordClassUnknown(u16);

impl From<u16> for RecordClass {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordClass::IN,
            _ => RecordClass::Unknown(RecordClassUnknown(value)),
        }
    }
}

impl From<RecordClass> for u16 {
    fn from(value: RecordClass) -> Self {
        match value {
            RecordClass::IN => 1,
            RecordClass::Unknown(RecordClassUnknown(value)) => value,
        }
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordClass::IN => write!(f, "IN"),
            RecordClass::Unknown(RecordClassUnknown(n)) => write!(f, "CLASS{n}"),
        }
    }
}

// Header flag masks; the first octet holds QR / OPCODE / AA / TC /
// RD, the second RA / Z / RCODE.
pub const HEADER_MASK_QR: u8 = 0b1000_0000;
pub const HEADER_MASK_OPCODE: u8 = 0b0111_1000;
pub const HEADER_OFFSET_OPCODE: u8 = 3;
pub const HEADER_MASK_AA: u8 = 0b0000_0100;
pub const HEADER_MASK_TC: u8 = 0b0000_0010;
pub const HEADER_MASK_RD: u8 = 0b0000_0001;
pub const HEADER_MASK_RA: u8 = 0b1000_0000;
pub const HEADER_MASK_RCODE: u8 = 0b0000_1111;
pub const HEADER_OFFSET_RCODE: u8 = 0;

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    #[test]
    fn u8_opcode_roundtrip() {
        for i in 0..15 {
            assert_eq!(u8::from(Opcode::from(i)), i);
        }
    }

    #[test]
    fn u8_rcode_roundtrip() {
        for i in 0..15 {
            assert_eq!(u8::from(Rcode::from(i)), i);
        }
    }

    #[test]
    fn u16_querytype_roundtrip() {
        for i in 0..300 {
            assert_eq!(u16::from(QueryType::from(i)), i);
        }
    }

    #[test]
    fn u16_queryclass_roundtrip() {
        for i in 0..300 {
            assert_eq!(u16::from(QueryClass::from(i)), i);
        }
    }

    #[test]
    fn u16_recordtype_roundtrip() {
        for i in 0..300 {
            assert_eq!(u16::from(RecordType::from(i)), i);
        }
    }

    #[test]
    fn u16_recordclass_roundtrip() {
        for i in 0..300 {
            assert_eq!(u16::from(RecordClass::from(i)), i);
        }
    }

    #[test]
    fn domainname_root_conversions() {
        assert_eq!(
            Some(DomainName::root_domain()),
            DomainName::from_dotted_string(".")
        );

        assert_eq!(
            Some(DomainName::root_domain()),
            DomainName::from_labels(vec![Vec::new()])
        );

        assert_eq!(".", DomainName::root_domain().to_dotted_string());
    }

    #[test]
    fn domainname_tolerates_missing_trailing_dot() {
        assert_eq!(
            domain("www.example.com."),
            "www.example.com".parse::<DomainName>().unwrap()
        );
    }

    #[test]
    fn domainname_lowercases() {
        assert_eq!(domain("www.example.com."), domain("wWw.EXAMPLE.com."));
    }

    #[test]
    fn domainname_rejects_empty_inner_label() {
        assert_eq!(None, DomainName::from_dotted_string("www..example.com."));
    }

    #[test]
    fn domainname_rejects_long_label() {
        let label = "x".repeat(64);
        assert_eq!(
            None,
            DomainName::from_dotted_string(&format!("{label}.example.com."))
        );
    }

    #[test]
    fn domainname_rejects_long_name() {
        let label = "x".repeat(63);
        let name = format!("{label}.{label}.{label}.{label}.");
        assert_eq!(None, DomainName::from_dotted_string(&name));
    }

    #[test]
    fn subdomain_checks() {
        let child = domain("www.example.com.");
        let parent = domain("example.com.");
        let other = domain("example.net.");

        assert!(child.is_subdomain_of(&parent));
        assert!(child.is_subdomain_of(&child));
        assert!(child.is_subdomain_of(&DomainName::root_domain()));
        assert!(!child.is_subdomain_of(&other));

        assert!(child.is_strict_subdomain_of(&parent));
        assert!(!child.is_strict_subdomain_of(&child));
    }

    #[test]
    fn parent_and_depth() {
        let name = domain("www.example.com.");
        assert_eq!(3, name.depth());
        assert_eq!(Some(domain("example.com.")), name.parent());
        assert_eq!(0, DomainName::root_domain().depth());
        assert_eq!(None, DomainName::root_domain().parent());
    }

    #[test]
    fn digest_a() {
        let rr = a_record("www.example.com.", std::net::Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!("www.example.com. 300 A 10.0.0.1", rr.digest());
    }

    #[test]
    fn digest_mx() {
        let rr = mx_record("example.com.", 10, "mail.example.com.");
        assert_eq!("example.com. 300 MX 10 mail.example.com.", rr.digest());
    }

    #[test]
    fn digest_soa() {
        let rr = soa_record("example.com.", "ns1.example.com.", "admin.example.com.");
        assert_eq!(
            "example.com. 300 SOA ns1.example.com. admin.example.com. 1 7200 3600 1209600 300",
            rr.digest()
        );
    }

    #[test]
    fn digest_txt_quotes_and_escapes() {
        let rr = ResourceRecord {
            name: domain("example.com."),
            rtype_with_data: RecordTypeWithData::TXT {
                strings: vec![b"v=spf1 -all".to_vec(), b"say \"hi\"".to_vec()],
            },
            rclass: RecordClass::IN,
            ttl: 60,
        };
        assert_eq!(
            "example.com. 60 TXT \"v=spf1 -all\" \"say \\\"hi\\\"\"",
            rr.digest()
        );
    }

    #[test]
    fn digest_unknown_is_rfc3597() {
        let rr = unknown_record("example.com.", &[0xde, 0xad]);
        assert_eq!("example.com. 300 TYPE100 \\# 2 dead", rr.digest());
    }
}

#[cfg(any(feature = "test-util", test))]
pub mod test_util {
    use super::*;

    pub fn domain(name: &str) -> DomainName {
        DomainName::from_dotted_string(name).unwrap()
    }

    pub fn question(name: &str, qtype: RecordType) -> Question {
        Question {
            name: domain(name),
            qtype: QueryType::Record(qtype),
            qclass: QueryClass::Record(RecordClass::IN),
        }
    }

    pub fn a_record(name: &str, address: Ipv4Addr) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::A { address },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn aaaa_record(name: &str, address: Ipv6Addr) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::AAAA { address },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn cname_record(name: &str, target_name: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::CNAME {
                cname: domain(target_name),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn ns_record(superdomain_name: &str, nameserver_name: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(superdomain_name),
            rtype_with_data: RecordTypeWithData::NS {
                nsdname: domain(nameserver_name),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn mx_record(name: &str, preference: u16, exchange_name: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::MX {
                preference,
                exchange: domain(exchange_name),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn soa_record(name: &str, mname: &str, rname: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::SOA {
                mname: domain(mname),
                rname: domain(rname),
                serial: 1,
                refresh: 7200,
                retry: 3600,
                expire: 1_209_600,
                minimum: 300,
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn txt_record(name: &str, text: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::TXT {
                strings: vec![text.as_bytes().to_vec()],
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn unknown_record(name: &str, octets: &[u8]) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::Unknown {
                tag: RecordTypeUnknown(100),
                octets: octets.into(),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }
}
