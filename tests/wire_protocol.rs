use minipg::session::{protocol, Server, SessionConfig};
use minipg::storage::{StorageConfig, StorageEngine};
use std::io::{BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn cstr(s: &str) -> Vec<u8> {
    let mut v = s.as_bytes().to_vec();
    v.push(0);
    v
}

fn frontend_frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut msg = vec![tag];
    msg.extend_from_slice(&((payload.len() + 4) as u32).to_be_bytes());
    msg.extend_from_slice(payload);
    msg
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

// Exercises the full startup/auth/query/terminate flow over a real TCP
// socket, byte for byte, against a live `Server`.
#[test]
fn startup_auth_query_and_terminate_round_trip() {
    let dir = tempdir().unwrap();
    let storage_config = StorageConfig { data_dir: dir.into_path(), migrate_on_open: true, fsync: true };
    let storage = Arc::new(StorageEngine::open(&storage_config).unwrap());
    let session_config = SessionConfig {
        expected_user: "tester".to_string(),
        expected_password: "secret".to_string(),
        statement_log: false,
    };
    let server = Server::new(storage, session_config);

    let bind_addr = format!("127.0.0.1:{}", free_port());
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_for_server = Arc::clone(&shutdown);
    let bind_addr_for_server = bind_addr.clone();
    let server_thread = thread::spawn(move || server.run(&bind_addr_for_server, &shutdown_for_server));

    thread::sleep(Duration::from_millis(100));
    let mut stream = TcpStream::connect(&bind_addr).unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());

    // SSLRequest should be refused with a single 'N' byte, then the real
    // startup packet proceeds on the same connection.
    let mut ssl_probe = Vec::new();
    ssl_probe.extend_from_slice(&8u32.to_be_bytes());
    ssl_probe.extend_from_slice(&80_877_103u32.to_be_bytes());
    stream.write_all(&ssl_probe).unwrap();
    let mut refusal = [0u8; 1];
    reader.read_exact(&mut refusal).unwrap();
    assert_eq!(&refusal, b"N");

    let mut startup_body = Vec::new();
    startup_body.extend_from_slice(&196_608u32.to_be_bytes());
    startup_body.extend_from_slice(b"user\0tester\0\0");
    let mut startup = Vec::new();
    startup.extend_from_slice(&((startup_body.len() + 4) as u32).to_be_bytes());
    startup.extend_from_slice(&startup_body);
    stream.write_all(&startup).unwrap();

    let (tag, payload) = protocol::read_frame(&mut reader).unwrap();
    assert_eq!(tag, b'R');
    assert_eq!(i32::from_be_bytes(payload[..4].try_into().unwrap()), 3);

    stream.write_all(&frontend_frame(b'p', &cstr("secret"))).unwrap();

    let mut saw_auth_ok = false;
    let mut param_status_count = 0;
    let mut saw_backend_key_data = false;
    loop {
        let (tag, payload) = protocol::read_frame(&mut reader).unwrap();
        match tag {
            b'R' => saw_auth_ok = i32::from_be_bytes(payload[..4].try_into().unwrap()) == 0,
            b'S' => param_status_count += 1,
            b'K' => saw_backend_key_data = true,
            b'Z' => break,
            other => panic!("unexpected message tag {other:#x} during auth burst"),
        }
    }
    assert!(saw_auth_ok);
    assert_eq!(param_status_count, 5);
    assert!(saw_backend_key_data);

    stream.write_all(&frontend_frame(b'Q', &cstr("SELECT 1 AS one"))).unwrap();

    let mut got_row_description = false;
    let mut got_data_row = false;
    let mut got_command_complete = false;
    loop {
        let (tag, payload) = protocol::read_frame(&mut reader).unwrap();
        match tag {
            b'T' => got_row_description = true,
            b'D' => got_data_row = true,
            b'C' => {
                got_command_complete = true;
                assert_eq!(protocol::read_cstr_payload(&payload).unwrap(), "SELECT 1");
            }
            b'Z' => break,
            other => panic!("unexpected message tag {other:#x} during query response"),
        }
    }
    assert!(got_row_description && got_data_row && got_command_complete);

    stream.write_all(&frontend_frame(b'X', &[])).unwrap();
    drop(stream);

    shutdown.store(true, Ordering::Relaxed);
    server_thread.join().unwrap().unwrap();
}

#[test]
fn unknown_user_is_rejected_with_fatal_error() {
    let dir = tempdir().unwrap();
    let storage_config = StorageConfig { data_dir: dir.into_path(), migrate_on_open: true, fsync: true };
    let storage = Arc::new(StorageEngine::open(&storage_config).unwrap());
    let session_config = SessionConfig {
        expected_user: "tester".to_string(),
        expected_password: "secret".to_string(),
        statement_log: false,
    };
    let server = Server::new(storage, session_config);

    let bind_addr = format!("127.0.0.1:{}", free_port());
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_for_server = Arc::clone(&shutdown);
    let bind_addr_for_server = bind_addr.clone();
    let server_thread = thread::spawn(move || server.run(&bind_addr_for_server, &shutdown_for_server));
    thread::sleep(Duration::from_millis(100));

    let mut stream = TcpStream::connect(&bind_addr).unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());

    let mut body = Vec::new();
    body.extend_from_slice(&196_608u32.to_be_bytes());
    body.extend_from_slice(b"user\0stranger\0\0");
    let mut startup = Vec::new();
    startup.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
    startup.extend_from_slice(&body);
    stream.write_all(&startup).unwrap();

    let (tag, payload) = protocol::read_frame(&mut reader).unwrap();
    assert_eq!(tag, b'E');
    let text = String::from_utf8_lossy(&payload);
    assert!(text.contains("28000"));

    shutdown.store(true, Ordering::Relaxed);
    server_thread.join().unwrap().unwrap();
}
