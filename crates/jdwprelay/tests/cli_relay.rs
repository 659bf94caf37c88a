#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use jdwprelay::transport::JDWP_HANDSHAKE;

struct Running(Child);

impl Drop for Running {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn jdwprelay() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_jdwprelay"));
    command
        .arg("--log-level")
        .arg("error")
        .env_remove("JDWPRELAY_ID")
        .env_remove("JDWPRELAY_HUB");
    command
}

fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("ephemeral bind should work");
    listener
        .local_addr()
        .expect("bound listener has an address")
        .to_string()
}

fn connect_with_retry(addr: &str, timeout: Duration) -> TcpStream {
    let deadline = Instant::now() + timeout;
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => return stream,
            Err(err) => {
                assert!(Instant::now() < deadline, "connect to {addr} timed out: {err}");
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

fn spawn_hub(addr: &str) -> (Running, String) {
    let mut child = jdwprelay()
        .arg("--format")
        .arg("json")
        .arg("hub")
        .arg(addr)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("hub should start");

    let stdout = child.stdout.take().expect("piped stdout");
    let mut first = String::new();
    BufReader::new(stdout)
        .read_line(&mut first)
        .expect("hub should announce itself");
    (Running(child), first)
}

#[test]
fn version_prints_package_version() {
    let output = jdwprelay()
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("jdwprelay {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn hub_announces_its_address_as_json() {
    let addr = free_addr();
    let (_hub, line) = spawn_hub(&addr);

    let event: serde_json::Value = serde_json::from_str(&line).expect("json event line");
    assert_eq!(event["event"], "hub_listening");
    assert_eq!(event["address"], addr.as_str());
}

#[test]
fn attach_to_missing_jvm_fails_unavailable() {
    let hub = free_addr();
    let jvm = free_addr();

    let output = jdwprelay()
        .arg("attach")
        .arg("--id")
        .arg("jvm")
        .arg("--hub")
        .arg(&hub)
        .arg("--jvm")
        .arg(&jvm)
        .arg("--attach-timeout")
        .arg("1s")
        .output()
        .expect("attach should run");

    assert_eq!(output.status.code(), Some(69));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("attach failed"));
}

#[test]
fn debugger_packet_reaches_the_jvm_through_the_hub() {
    let hub_addr = free_addr();
    let (_hub, _) = spawn_hub(&hub_addr);

    // Fake debuggee: answer the JDWP handshake, then hand back the first packet.
    let jvm = TcpListener::bind("127.0.0.1:0").expect("fake jvm bind");
    let jvm_addr = jvm.local_addr().expect("fake jvm address").to_string();
    let debuggee = thread::spawn(move || {
        let (mut stream, _) = jvm.accept().expect("relay should attach");
        stream
            .set_read_timeout(Some(Duration::from_secs(15)))
            .expect("set timeout");
        let mut hello = [0u8; 14];
        stream.read_exact(&mut hello).expect("handshake from relay");
        assert_eq!(&hello, JDWP_HANDSHAKE);
        stream.write_all(JDWP_HANDSHAKE).expect("handshake reply");

        let mut packet = [0u8; 11];
        stream.read_exact(&mut packet).expect("tunneled packet");
        packet
    });

    let listen_addr = free_addr();
    let _ide_side = Running(
        jdwprelay()
            .args(["--format", "json", "listen", "--id", "ide", "--peer", "jvm"])
            .args(["--hub", &hub_addr, "--address", &listen_addr])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("listen side should start"),
    );
    let _jvm_side = Running(
        jdwprelay()
            .args(["--format", "json", "attach", "--id", "jvm"])
            .args(["--hub", &hub_addr, "--jvm", &jvm_addr])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("attach side should start"),
    );

    let mut debugger = connect_with_retry(&listen_addr, Duration::from_secs(10));
    debugger
        .set_read_timeout(Some(Duration::from_secs(15)))
        .expect("set timeout");
    debugger.write_all(JDWP_HANDSHAKE).expect("debugger handshake");
    let mut reply = [0u8; 14];
    debugger.read_exact(&mut reply).expect("handshake reply");
    assert_eq!(&reply, JDWP_HANDSHAKE);

    // VirtualMachine.Version command, id 1.
    let version_cmd: [u8; 11] = [0, 0, 0, 11, 0, 0, 0, 1, 0, 1, 1];
    debugger.write_all(&version_cmd).expect("send command");

    let received = debuggee.join().expect("fake jvm thread");
    assert_eq!(received, version_cmd);
}
