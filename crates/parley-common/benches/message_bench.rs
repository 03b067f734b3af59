use criterion::{black_box, criterion_group, criterion_main, Criterion};
use parley_common::init_data::{sign, InitDataVerifier};
use parley_common::message::{ClientMessage, ServerMessage};
use parley_common::types::{Participant, ParticipantId, Profile};

const OFFER: &str = r#"{"type":"offer","data":{"target_id":2,"offer":{"type":"offer","sdp":"v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=group:BUNDLE 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n"}}}"#;

fn bench_offer_parse(c: &mut Criterion) {
    c.bench_function("offer_parse", |b| {
        b.iter(|| black_box(ClientMessage::parse(black_box(OFFER)).unwrap()));
    });
}

fn bench_offer_relay(c: &mut Criterion) {
    let ClientMessage::Offer(signal) = ClientMessage::parse(OFFER).unwrap() else {
        unreachable!()
    };
    c.bench_function("offer_stamp_encode", |b| {
        b.iter(|| {
            let mut s = signal.clone();
            s.stamp(ParticipantId(1));
            black_box(ServerMessage::Offer(s).encode().unwrap())
        });
    });
}

fn bench_roster_encode(c: &mut Criterion) {
    let roster: Vec<Participant> = (0..50i64)
        .map(|i| {
            Participant::new(
                Profile::new(i)
                    .with_field("first_name", format!("User {i}"))
                    .with_field("username", format!("user{i}")),
            )
        })
        .collect();
    let msg = ServerMessage::UserList(roster);

    c.bench_function("roster_encode_50", |b| {
        b.iter(|| black_box(msg.encode().unwrap()));
    });
}

fn bench_verify(c: &mut Criterion) {
    let token = "123456:BENCH";
    let data = sign(
        token,
        &[
            ("query_id", "AAHdF6IQAAAAAN0XohDhrOrc"),
            ("user", r#"{"id":279058397,"first_name":"Bench"}"#),
            ("auth_date", "1662771648"),
        ],
    )
    .unwrap();
    let verifier = InitDataVerifier::new(Some(token));

    c.bench_function("init_data_verify", |b| {
        b.iter(|| black_box(verifier.verify(black_box(&data)).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_offer_parse,
    bench_offer_relay,
    bench_roster_encode,
    bench_verify
);
criterion_main!(benches);
