use crate::shared::dns::*;
use std::net::Ipv4Addr;

fn sample_query() -> Vec<u8> {
    // id 0x1234, flags RD, one question: www.example.com A IN.
    let mut wire = vec![0x12, 0x34, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0];
    wire.extend_from_slice(b"\x03www\x07example\x03com\x00");
    wire.extend_from_slice(&[0, 1, 0, 1]);
    wire
}

#[test]
fn test_decode_query() {
    let query = Message::decode(&sample_query()).unwrap();
    assert_eq!(query.id(), 0x1234);
    assert!(!query.header.response);
    assert!(query.header.recursion_desired);
    assert_eq!(query.header.resp_code, RespCode::NoError);
    assert_eq!(query.questions.len(), 1);
    assert_eq!(query.questions[0].name.as_ref(), "www.example.com");
    assert_eq!(query.questions[0].qtype, RecordType::A);
    assert!(query.answers.is_empty());
}

#[test]
fn test_decode_mixed_case_name() {
    let mut wire = sample_query();
    wire[12..16].copy_from_slice(b"\x03wWw");
    let query = Message::decode(&wire).unwrap();
    assert_eq!(query.questions[0].name.as_ref(), "www.example.com");
}

#[test]
fn test_decode_truncated_datagram() {
    let wire = sample_query();
    assert!(matches!(Message::decode(&wire[..7]), Err(WireErr::BytesEnd)));
    assert!(matches!(Message::decode(&wire[..wire.len() - 2]), Err(WireErr::BytesEnd)));
}

#[test]
fn test_decode_compressed_answer() {
    // Response to the sample query with one A record whose name is a
    // pointer to the question name at offset 12.
    let mut wire = sample_query();
    wire[2] = 0x81; // response + rd
    wire[7] = 1; // one answer
    wire.extend_from_slice(&[0xC0, 12]); // pointer
    wire.extend_from_slice(&[0, 1, 0, 1]); // A IN
    wire.extend_from_slice(&[0, 0, 1, 0x2C]); // ttl 300
    wire.extend_from_slice(&[0, 4, 17, 0, 0, 1]); // rdata 17.0.0.1

    let response = Message::decode(&wire).unwrap();
    assert!(response.header.response);
    assert_eq!(response.answers.len(), 1);
    assert_eq!(response.answers[0].name.as_ref(), "www.example.com");
    assert_eq!(response.answers[0].ttl, 300);
    assert_eq!(response.a_records(), vec![Ipv4Addr::new(17, 0, 0, 1)]);
}

#[test]
fn test_pointer_loop_rejected() {
    let mut wire = vec![0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
    wire.extend_from_slice(&[0xC0, 12]); // name pointing at itself
    wire.extend_from_slice(&[0, 1, 0, 1]);
    assert!(matches!(Message::decode(&wire), Err(WireErr::MaxRedirections)));
}

#[test]
fn test_synthesized_response_roundtrip() {
    let query = Message::decode(&sample_query()).unwrap();
    let nx = Message::response_to(&query, RespCode::NxDomain);
    let decoded = Message::decode(&nx.encode()).unwrap();
    assert_eq!(decoded.id(), 0x1234);
    assert!(decoded.header.response);
    assert_eq!(decoded.header.resp_code, RespCode::NxDomain);
    assert_eq!(decoded.questions[0].name.as_ref(), "www.example.com");
    assert!(decoded.answers.is_empty());
}

#[test]
fn test_static_answer_roundtrip() {
    let name = Name::from_text("router.my.");
    let msg = Message::static_answer(&name, Ipv4Addr::new(192, 168, 1, 1), 3600);
    let decoded = Message::decode(&msg.encode()).unwrap();
    assert_eq!(decoded.questions[0].name.as_ref(), "router.my");
    assert_eq!(decoded.a_records(), vec![Ipv4Addr::new(192, 168, 1, 1)]);
    assert_eq!(decoded.answers[0].ttl, 3600);
}

#[test]
fn test_patch_id() {
    let mut wire = sample_query();
    patch_id(&mut wire, 0xBEEF);
    assert_eq!(Message::decode(&wire).unwrap().id(), 0xBEEF);
}

#[test]
fn test_max_a_ttl_uses_maximum() {
    let name = Name::from_text("example.com");
    let mut msg = Message::static_answer(&name, Ipv4Addr::new(1, 2, 3, 4), 60);
    msg.answers.push(Record {
        name: name.clone(),
        rtype: RecordType::A,
        class: CLASS_IN,
        ttl: 300,
        rdata: RData::A(Ipv4Addr::new(5, 6, 7, 8)),
    });
    assert_eq!(msg.max_a_ttl(), Some(300));

    let empty = Message::response_to(&msg, RespCode::NoError);
    assert_eq!(empty.max_a_ttl(), None);
}

#[test]
fn test_validate_domain() {
    assert!(validate_domain("apple.com", false).is_ok());
    assert!(validate_domain("a-b.c0.net", false).is_ok());
    assert!(validate_domain("*.example.com", true).is_ok());

    assert_eq!(validate_domain("", false), Err(DomainErr::Empty));
    assert_eq!(validate_domain("*.example.com", false), Err(DomainErr::BadChar('*')));
    assert_eq!(validate_domain("foo..com", false), Err(DomainErr::EmptyLabel));
    assert_eq!(validate_domain("-foo.com", false), Err(DomainErr::EdgeHyphen));
    assert_eq!(validate_domain("foo-.com", false), Err(DomainErr::EdgeHyphen));
    assert_eq!(validate_domain("fo_o.com", false), Err(DomainErr::BadChar('_')));
    assert_eq!(validate_domain(&"a".repeat(64), false), Err(DomainErr::LongLabel));
    assert_eq!(
        validate_domain(&["abcdefgh"; 32].join("."), false),
        Err(DomainErr::TooLong)
    );
}
