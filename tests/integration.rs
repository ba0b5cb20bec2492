mod common;

use std::path::Path;
use std::process::{Command, Output};

use common::*;
use rdpcarve::recording::{read_events, EventKind};

fn rdpcarve() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_rdpcarve"));
    cmd.env_remove("SSLKEYLOGFILE").env("NO_COLOR", "1");
    cmd
}

fn run(args: &[&str]) -> Output {
    rdpcarve().args(args).output().unwrap()
}

fn keyed() -> Session {
    Session {
        client: ([10, 0, 0, 1], 50000),
        server: ([10, 0, 0, 2], 3389),
        client_random: [0xA1; 32],
        server_random: [0xB2; 32],
        master: [0xC3; 48],
    }
}

fn unkeyed() -> Session {
    Session {
        client: ([10, 0, 0, 3], 50001),
        server: ([10, 0, 0, 2], 3389),
        client_random: [0xD4; 32],
        server_random: [0xE5; 32],
        master: [0xF6; 48],
    }
}

/// Capture with two TLS connections and a key log holding only the first's
/// master secret. Flow starts: 2023-11-14 22:13:20 and 22:13:30 UTC.
fn two_flow_capture(dir: &Path) -> (String, String) {
    let mut frames = keyed().frames(1_700_000_000);
    frames.extend(unkeyed().frames(1_700_000_010));
    let pcap = dir.join("two.pcap");
    write_pcap(&pcap, LINKTYPE_ETHERNET, &frames);

    let keylog = dir.join("keys.log");
    let contents = format!(
        "# SSL/TLS secrets log file\n{}\nCLIENT_RANDOM tooshort\n",
        keyed().keylog_line()
    );
    std::fs::write(&keylog, contents).unwrap();
    (
        pcap.to_str().unwrap().to_string(),
        keylog.to_str().unwrap().to_string(),
    )
}

fn files_in(dir: &Path, extension: &str) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(extension))
        .collect();
    names.sort();
    names
}

#[test]
fn help_succeeds() {
    let output = run(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Rebuild RDP session recordings"));
}

#[test]
fn version_succeeds() {
    let output = run(&["--version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("rdpcarve"));
}

#[test]
fn unsupported_extension_rejected() {
    let output = run(&["capture.txt"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown file extension"), "stderr: {}", stderr);
}

#[test]
fn nonexistent_input_file_fails() {
    let output = run(&["/nonexistent/path/file.pcap", "-l"]);
    assert!(!output.status.success());
}

#[test]
fn empty_pcap_lists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.pcap");
    write_pcap(&path, LINKTYPE_ETHERNET, &[]);

    let output = run(&[path.to_str().unwrap(), "-l"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).trim().is_empty());
}

#[test]
fn list_reports_key_availability() {
    let dir = tempfile::tempdir().unwrap();
    let (pcap, keylog) = two_flow_capture(dir.path());

    let output = run(&[pcap.as_str(), "-l", "-s", keylog.as_str()]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2, "stdout: {}", stdout);
    assert!(lines[0].contains("10.0.0.1 -> 10.0.0.2: key available"));
    assert!(lines[1].contains("10.0.0.3 -> 10.0.0.2: key unavailable"));
    // List mode converts nothing
    assert!(files_in(dir.path(), ".rdpreplay").is_empty());
}

#[test]
fn convert_writes_one_recording_per_keyed_flow() {
    let dir = tempfile::tempdir().unwrap();
    let (pcap, keylog) = two_flow_capture(dir.path());
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let output = run(&[
        pcap.as_str(),
        "-s",
        keylog.as_str(),
        "-o",
        out.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{:?}", output);
    assert_eq!(
        files_in(&out, ".rdpreplay"),
        vec!["20231114221320_10.0.0.1-10.0.0.2.rdpreplay".to_string()]
    );

    let file =
        std::fs::File::open(out.join("20231114221320_10.0.0.1-10.0.0.2.rdpreplay")).unwrap();
    let events = read_events(file).unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::ClientPdu, EventKind::ServerPdu, EventKind::ConnectionClose]
    );
    assert_eq!(events[0].payload, client_pdu());
    assert_eq!(events[1].payload, server_pdu());
    // The split record carries the time of its first segment (7th packet)
    assert_eq!(events[0].timestamp_ms, 1_700_000_006_000);
    assert_eq!(events[1].timestamp_ms, 1_700_000_008_000);
}

#[test]
fn keylog_taken_from_environment() {
    let dir = tempfile::tempdir().unwrap();
    let (pcap, keylog) = two_flow_capture(dir.path());

    let output = rdpcarve()
        .env("SSLKEYLOGFILE", &keylog)
        .args([pcap.as_str(), "-l"])
        .output()
        .unwrap();
    assert!(String::from_utf8_lossy(&output.stdout).contains("key available"));
}

#[test]
fn file_output_used_as_prefix_and_json_format() {
    let dir = tempfile::tempdir().unwrap();
    let (pcap, keylog) = two_flow_capture(dir.path());
    let prefix = dir.path().join("case7.jsonl");

    let output = run(&[
        pcap.as_str(),
        "-s",
        keylog.as_str(),
        "-f",
        "json",
        "-o",
        prefix.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{:?}", output);
    let names = files_in(dir.path(), ".jsonl");
    assert_eq!(
        names,
        vec!["case7-20231114221320_10.0.0.1-10.0.0.2.jsonl".to_string()]
    );

    let text = std::fs::read_to_string(dir.path().join(&names[0])).unwrap();
    let kinds: Vec<String> = text
        .lines()
        .map(|l| {
            let v: serde_json::Value = serde_json::from_str(l).unwrap();
            v["kind"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(kinds, vec!["client_pdu", "server_pdu", "connection_close"]);
}

#[test]
fn src_filter_skips_other_initiators() {
    let dir = tempfile::tempdir().unwrap();
    let (pcap, keylog) = two_flow_capture(dir.path());
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let output = run(&[
        pcap.as_str(),
        "-s",
        keylog.as_str(),
        "--src",
        "10.0.0.9",
        "-o",
        out.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    assert!(files_in(&out, ".rdpreplay").is_empty());
}

#[test]
fn wrong_master_secret_fails_flow_but_not_run() {
    let dir = tempfile::tempdir().unwrap();
    let (pcap, _) = two_flow_capture(dir.path());
    let keylog = dir.path().join("wrong.log");
    std::fs::write(
        &keylog,
        format!("CLIENT_RANDOM {} {}\n", hex(&[0xA1; 32]), hex(&[0u8; 48])),
    )
    .unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let output = run(&[
        pcap.as_str(),
        "-s",
        keylog.to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("decryption failed"), "stderr: {}", stderr);
    assert!(stderr.contains("10.0.0.1:50000"));
}

#[test]
fn exported_pdu_capture_converted_as_plaintext() {
    let dir = tempfile::tempdir().unwrap();
    let client = [192, 168, 56, 10];
    let server = [192, 168, 56, 20];
    let frames = vec![
        (exported_pdu(client, server, &client_pdu()), 1_700_000_000, 0),
        (exported_pdu(server, client, &server_pdu()), 1_700_000_000, 500_000),
    ];
    let pcap = dir.path().join("export.pcap");
    write_pcap(&pcap, LINKTYPE_WIRESHARK_UPPER_PDU, &frames);

    let listing = run(&[pcap.to_str().unwrap(), "-l"]);
    let stdout = String::from_utf8_lossy(&listing.stdout);
    assert!(
        stdout.contains("192.168.56.10 -> 192.168.56.20: plaintext"),
        "stdout: {}",
        stdout
    );

    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();
    let output = run(&[pcap.to_str().unwrap(), "-o", out.to_str().unwrap()]);
    assert!(output.status.success(), "{:?}", output);

    let names = files_in(&out, ".rdpreplay");
    assert_eq!(names.len(), 1);
    let events = read_events(std::fs::File::open(out.join(&names[0])).unwrap()).unwrap();
    assert_eq!(events[0].kind, EventKind::ClientPdu);
    assert_eq!(events[1].kind, EventKind::ServerPdu);
    assert_eq!(events[1].timestamp_ms, 1_700_000_000_500);
}

#[test]
fn replay_input_reemitted_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let (pcap, keylog) = two_flow_capture(dir.path());
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();
    let converted = run(&[
        pcap.as_str(),
        "-s",
        keylog.as_str(),
        "-o",
        out.to_str().unwrap(),
    ]);
    assert!(converted.status.success());
    let replay = out.join("20231114221320_10.0.0.1-10.0.0.2.rdpreplay");

    let output = run(&[replay.to_str().unwrap()]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 3);
    assert!(stdout.lines().last().unwrap().contains("connection_close"));
}
