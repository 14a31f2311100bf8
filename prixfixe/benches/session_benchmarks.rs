//! Benchmarks for the hot paths of a session: command parsing, FSM
//! transitions, response serialization, and line framing.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use prixfixe::reader::LineReader;
use prixfixe::Connection;
use prixfixe_proto::{Command, Fsm, FsmConfig, Response};
use tokio::io::duplex;
use tokio::runtime::Runtime;

fn bench_command_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_parsing");

    let commands = [
        ("QUIT", "quit"),
        ("DATA", "data"),
        ("EHLO mail.example.com", "ehlo"),
        ("MAIL FROM:<user@example.com> SIZE=12345", "mail_from"),
        ("RCPT TO:<recipient@example.com>", "rcpt_to"),
    ];

    for (line, desc) in commands {
        group.throughput(Throughput::Bytes(line.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(desc), &line, |b, &line| {
            b.iter(|| black_box(Command::parse(black_box(line))));
        });
    }

    group.finish();
}

fn bench_fsm_full_transaction(c: &mut Criterion) {
    c.bench_function("fsm_full_transaction", |b| {
        b.iter(|| {
            let mut fsm = Fsm::new(FsmConfig {
                domain: "mail.example.com".to_string(),
                max_message_size: 10_485_760,
                tls_available: false,
                max_recipients: None,
            });
            fsm.step(Command::parse("EHLO client.test"));
            fsm.step(Command::parse("MAIL FROM:<a@x>"));
            fsm.step(Command::parse("RCPT TO:<b@y>"));
            fsm.step(Command::parse("DATA"));
            black_box(fsm.complete_data(true));
        });
    });
}

fn bench_response_serialization(c: &mut Criterion) {
    let response = Response::ehlo(
        "mail.example.com",
        &["SIZE 10485760".to_string(), "8BITMIME".to_string(), "STARTTLS".to_string()],
    );

    c.bench_function("response_to_bytes", |b| {
        b.iter(|| black_box(response.to_bytes()));
    });
}

fn bench_line_reader(c: &mut Criterion) {
    let runtime = Runtime::new().expect("failed to build benchmark runtime");

    c.bench_function("line_reader_pipelined_commands", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let (mut client, server) = duplex(8192);
                let mut conn = Connection::plain(server);
                let mut reader = LineReader::new();

                client
                    .write_buf(b"EHLO client.test\r\nMAIL FROM:<a@x>\r\nRCPT TO:<b@y>\r\n")
                    .await;

                for _ in 0..3 {
                    black_box(reader.read_line(&mut conn, 512).await.unwrap());
                }
            });
        });
    });
}

trait WriteBuf {
    async fn write_buf(&mut self, bytes: &[u8]);
}

impl<T: tokio::io::AsyncWrite + Unpin> WriteBuf for T {
    async fn write_buf(&mut self, bytes: &[u8]) {
        use tokio::io::AsyncWriteExt;
        self.write_all(bytes).await.expect("benchmark write failed");
    }
}

criterion_group!(
    benches,
    bench_command_parsing,
    bench_fsm_full_transaction,
    bench_response_serialization,
    bench_line_reader,
);
criterion_main!(benches);
