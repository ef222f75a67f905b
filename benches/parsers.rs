//! Benchmarks for the text parsers run on every status and monitor tick.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

use warp_nextdns::network::{parse_ping_times, parse_proc_net_dev, parse_trace};
use warp_nextdns::wgcf::patch_profile_dns;

/// A wgcf profile with `peers` extra peer sections
fn generate_profile(peers: usize) -> String {
    let mut profile = String::from(
        "[Interface]\nPrivateKey = aGVsbG8gd29ybGQgaGVsbG8gd29ybGQgaGVsbG8=\n\
         Address = 172.16.0.2/32\nAddress = 2606:4700:110:8a36::2/128\n\
         DNS = 1.1.1.1, 1.0.0.1, 2606:4700:4700::1111\nMTU = 1280\n",
    );
    for i in 0..peers {
        profile.push_str(&format!(
            "\n[Peer]\nPublicKey = peer{}key=\nAllowedIPs = 0.0.0.0/0\nEndpoint = engage.cloudflareclient.com:2408\n",
            i
        ));
    }
    profile
}

fn generate_ping_output(replies: usize) -> String {
    let mut out = String::from("PING 1.1.1.1 (1.1.1.1) 56(84) bytes of data.\n");
    for i in 0..replies {
        out.push_str(&format!(
            "64 bytes from 1.1.1.1: icmp_seq={} ttl=57 time={}.{} ms\n",
            i + 1,
            10 + i % 20,
            i % 10
        ));
    }
    out.push_str("\n--- 1.1.1.1 ping statistics ---\n");
    out
}

fn generate_proc_net_dev(interfaces: usize) -> String {
    let mut out = String::from(
        "Inter-|   Receive                                                |  Transmit\n \
         face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n    \
         lo: 1234 10 0 0 0 0 0 0 1234 10 0 0 0 0 0 0\n",
    );
    for i in 0..interfaces {
        out.push_str(&format!(
            "  eth{}: {} 900 0 0 0 0 0 0 {} 800 0 0 0 0 0 0\n",
            i,
            1_000_000 + i,
            500_000 + i
        ));
    }
    out
}

fn bench_patch_profile(c: &mut Criterion) {
    let mut group = c.benchmark_group("patch_profile_dns");
    for peers in [1, 10, 100] {
        let profile = generate_profile(peers);
        group.bench_with_input(BenchmarkId::new("fresh", peers), &profile, |b, p| {
            b.iter(|| patch_profile_dns(black_box(p)))
        });
        let patched = patch_profile_dns(&profile);
        group.bench_with_input(BenchmarkId::new("already_patched", peers), &patched, |b, p| {
            b.iter(|| patch_profile_dns(black_box(p)))
        });
    }
    group.finish();
}

fn bench_ping(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_ping_times");
    for replies in [3, 100, 1000] {
        let output = generate_ping_output(replies);
        group.bench_with_input(BenchmarkId::from_parameter(replies), &output, |b, o| {
            b.iter(|| parse_ping_times(black_box(o)))
        });
    }
    group.finish();
}

fn bench_proc_net_dev(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_proc_net_dev");
    for interfaces in [2, 16, 128] {
        let content = generate_proc_net_dev(interfaces);
        group.bench_with_input(BenchmarkId::from_parameter(interfaces), &content, |b, c| {
            b.iter(|| parse_proc_net_dev(black_box(c)))
        });
    }
    group.finish();
}

fn bench_trace(c: &mut Criterion) {
    let body = "fl=29f1\nh=www.cloudflare.com\nip=104.28.1.1\nts=1700000000.123\n\
                visit_scheme=https\nuag=warp-nextdns/1.0.0\ncolo=FRA\nsliver=none\n\
                http=http/2\nloc=DE\ntls=TLSv1.3\nsni=plaintext\nwarp=on\ngateway=off\n\
                rbi=off\nkex=X25519\n";
    c.bench_function("parse_trace", |b| b.iter(|| parse_trace(black_box(body))));
}

criterion_group!(benches, bench_patch_profile, bench_ping, bench_proc_net_dev, bench_trace);
criterion_main!(benches);
