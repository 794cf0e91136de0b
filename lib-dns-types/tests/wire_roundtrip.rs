use fake::{Fake, Faker};

use dns_types::protocol::deserialise::ConsumableBuffer;
use dns_types::protocol::serialise::WritableBuffer;
use dns_types::protocol::types::*;

#[test]
fn roundtrip_message_compressed() {
    for _ in 0..100 {
        let original = arbitrary_message();
        let deserialised = Message::from_octets(&original.to_octets().unwrap());

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_message_uncompressed() {
    for _ in 0..100 {
        let original = arbitrary_message();

        let mut buffer = WritableBuffer::uncompressed();
        original.serialise(&mut buffer).unwrap();
        let deserialised = Message::from_octets(&buffer.octets);

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn compressed_and_uncompressed_forms_decode_identically() {
    for _ in 0..100 {
        let original = arbitrary_message();

        let compressed = original.to_octets().unwrap();
        let mut buffer = WritableBuffer::uncompressed();
        original.serialise(&mut buffer).unwrap();

        assert!(compressed.len() <= buffer.octets.len());
        assert_eq!(
            Message::from_octets(&compressed),
            Message::from_octets(&buffer.octets)
        );
    }
}

#[test]
fn roundtrip_header() {
    for _ in 0..100 {
        let original = arbitrary_wire_header();

        let mut buffer = WritableBuffer::default();
        original.header.serialise(&mut buffer);
        buffer.write_u16(original.qdcount);
        buffer.write_u16(original.ancount);
        buffer.write_u16(original.nscount);
        buffer.write_u16(original.arcount);
        let deserialised = WireHeader::deserialise(&mut ConsumableBuffer::new(&buffer.octets));

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_question() {
    for _ in 0..100 {
        let original = arbitrary_question();

        let mut buffer = WritableBuffer::default();
        original.serialise(&mut buffer);
        let deserialised = Question::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets));

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_resourcerecord() {
    for _ in 0..100 {
        let original = arbitrary_resourcerecord();

        let mut buffer = WritableBuffer::default();
        original.serialise(&mut buffer).unwrap();
        let deserialised =
            ResourceRecord::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets));

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_domainname() {
    for _ in 0..100 {
        let original = arbitrary_domainname();

        let mut buffer = WritableBuffer::default();
        original.serialise(&mut buffer);
        let deserialised = DomainName::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets));

        assert_eq!(Ok(original), deserialised);
    }
}

fn arbitrary_message() -> Message {
    let qdcount = (0..4).fake::<usize>();
    let ancount = (0..8).fake::<usize>();
    let nscount = (0..8).fake::<usize>();
    let arcount = (0..8).fake::<usize>();

    let mut questions = Vec::with_capacity(qdcount);
    let mut answers = Vec::with_capacity(ancount);
    let mut authority = Vec::with_capacity(nscount);
    let mut additional = Vec::with_capacity(arcount);

    for _ in 0..qdcount {
        questions.push(arbitrary_question());
    }
    for _ in 0..ancount {
        answers.push(arbitrary_resourcerecord());
    }
    for _ in 0..nscount {
        authority.push(arbitrary_resourcerecord());
    }
    for _ in 0..arcount {
        additional.push(arbitrary_resourcerecord());
    }

    Message {
        header: arbitrary_header(),
        questions,
        answers,
        authority,
        additional,
    }
}

fn arbitrary_header() -> Header {
    Header {
        id: Faker.fake(),
        is_response: Faker.fake(),
        opcode: arbitrary_opcode(),
        is_authoritative: Faker.fake(),
        is_truncated: Faker.fake(),
        recursion_desired: Faker.fake(),
        recursion_available: Faker.fake(),
        rcode: arbitrary_rcode(),
    }
}

fn arbitrary_wire_header() -> WireHeader {
    WireHeader {
        header: arbitrary_header(),
        qdcount: Faker.fake(),
        ancount: Faker.fake(),
        nscount: Faker.fake(),
        arcount: Faker.fake(),
    }
}

fn arbitrary_question() -> Question {
    Question {
        name: arbitrary_domainname(),
        qtype: Faker.fake::<u16>().into(),
        qclass: Faker.fake::<u16>().into(),
    }
}

fn arbitrary_resourcerecord() -> ResourceRecord {
    ResourceRecord {
        name: arbitrary_domainname(),
        rtype_with_data: arbitrary_recordtypewithdata(),
        rclass: Faker.fake::<u16>().into(),
        ttl: Faker.fake(),
    }
}

fn arbitrary_recordtypewithdata() -> RecordTypeWithData {
    // this should match the `RecordTypeWithData` deserialisation
    match Faker.fake::<u16>().into() {
        RecordType::A => RecordTypeWithData::A {
            address: std::net::Ipv4Addr::new(
                Faker.fake(),
                Faker.fake(),
                Faker.fake(),
                Faker.fake(),
            ),
        },
        RecordType::NS => RecordTypeWithData::NS {
            nsdname: arbitrary_domainname(),
        },
        RecordType::CNAME => RecordTypeWithData::CNAME {
            cname: arbitrary_domainname(),
        },
        RecordType::SOA => RecordTypeWithData::SOA {
            mname: arbitrary_domainname(),
            rname: arbitrary_domainname(),
            serial: Faker.fake(),
            refresh: Faker.fake(),
            retry: Faker.fake(),
            expire: Faker.fake(),
            minimum: Faker.fake(),
        },
        RecordType::PTR => RecordTypeWithData::PTR {
            ptrdname: arbitrary_domainname(),
        },
        RecordType::MX => RecordTypeWithData::MX {
            preference: Faker.fake(),
            exchange: arbitrary_domainname(),
        },
        RecordType::TXT => RecordTypeWithData::TXT {
            strings: arbitrary_txt_strings(),
        },
        RecordType::AAAA => RecordTypeWithData::AAAA {
            address: std::net::Ipv6Addr::new(
                Faker.fake(),
                Faker.fake(),
                Faker.fake(),
                Faker.fake(),
                Faker.fake(),
                Faker.fake(),
                Faker.fake(),
                Faker.fake(),
            ),
        },
        RecordType::Unknown(tag) => RecordTypeWithData::Unknown {
            tag,
            octets: arbitrary_octets((1..64).fake()),
        },
    }
}

fn arbitrary_domainname() -> DomainName {
    let num_labels = (1..5).fake::<usize>();
    let mut labels = Vec::<Vec<u8>>::new();

    for _ in 0..num_labels {
        let label_len = (1..20).fake::<usize>();
        let mut label = Vec::with_capacity(label_len);

        for _ in 0..label_len {
            let octet = (b'a'..b'z').fake::<u8>();
            label.push(octet);
        }

        labels.push(label);
    }

    labels.push(Vec::new());

    DomainName::from_labels(labels).unwrap()
}

fn arbitrary_opcode() -> Opcode {
    // opcode is a 4-bit field
    (Faker.fake::<u8>() & 0b0000_1111).into()
}

fn arbitrary_rcode() -> Rcode {
    // rcode is a 4-bit field
    (Faker.fake::<u8>() & 0b0000_1111).into()
}

fn arbitrary_txt_strings() -> Vec<Vec<u8>> {
    // a TXT record always carries at least one string: a zero-string
    // TXT has a zero-length rdata, which decodes back to no strings.
    let num = (1..3).fake::<usize>();
    let mut out = Vec::with_capacity(num);
    for _ in 0..num {
        out.push(arbitrary_octets((1..32).fake()));
    }
    out
}

fn arbitrary_octets(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(Faker.fake());
    }
    out
}
