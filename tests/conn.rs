//! Handshake and records over real loopback sockets.

use std::{
    io::Write,
    net::{TcpListener, TcpStream},
    thread,
};

use peerwire::{Error, ErrorKind, HandshakeStage, MachineConfig, ReadBufferPool, SecureStream};
use secp256k1::{PublicKey, Secp256k1, SecretKey};

fn key(byte: u8) -> SecretKey {
    SecretKey::from_slice(&[byte; 32]).unwrap()
}

fn public(byte: u8) -> PublicKey {
    PublicKey::from_secret_key(&Secp256k1::new(), &key(byte))
}

fn listener() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").unwrap()
}

#[test]
fn echo_over_loopback() {
    let listener = listener();
    let addr = listener.local_addr().unwrap();
    let pool = ReadBufferPool::new();

    let server_pool = pool.clone();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let config = MachineConfig::responder(key(0x21)).with_read_buffer_pool(server_pool);
        let mut conn = SecureStream::accept(stream, config).unwrap();
        for _ in 0..3 {
            let msg = conn.recv().unwrap();
            conn.send(&msg).unwrap();
        }
        let remote = conn.remote_static();
        conn.close().unwrap();
        remote
    });

    let config = MachineConfig::initiator(key(0x11), public(0x21)).with_read_buffer_pool(pool.clone());
    let mut conn = SecureStream::connect(addr, config).unwrap();
    assert_eq!(conn.remote_static(), Some(public(0x21)));
    assert_eq!(conn.peer_addr().unwrap(), addr);

    for msg in [&b"one"[..], &b""[..], &[0xab; 4096][..]] {
        conn.send(msg).unwrap();
        assert_eq!(&conn.recv().unwrap()[..], msg);
    }

    assert_eq!(server.join().unwrap(), Some(public(0x11)));
    conn.close().unwrap();
    assert_eq!(pool.idle_count(), 2);
}

#[test]
fn responder_rejects_unknown_key() {
    let listener = listener();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        SecureStream::accept(stream, MachineConfig::responder(key(0x21))).map(|_| ())
    });

    // dialing with the wrong idea of the responder's key
    let config = MachineConfig::initiator(key(0x11), public(0x33));
    let err = SecureStream::connect(addr, config).map(|_| ()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);

    let err = server.join().unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[test]
fn garbage_first_act_rejected() {
    let listener = listener();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        SecureStream::accept(stream, MachineConfig::responder(key(0x21))).map(|_| ())
    });

    let mut client = TcpStream::connect(addr).unwrap();
    let mut act_one = [0u8; peerwire::ACT_ONE_SIZE];
    act_one[0] = 7;
    client.write_all(&act_one).unwrap();

    let err = server.join().unwrap().unwrap_err();
    assert!(matches!(err, Error::InvalidVersion { version: 7, .. }));
}

#[test]
fn stalled_initiator_times_out() {
    let listener = listener();
    let addr = listener.local_addr().unwrap();

    // connects, then never sends act one
    let client = TcpStream::connect(addr).unwrap();
    let (stream, _) = listener.accept().unwrap();

    let err = SecureStream::accept(stream, MachineConfig::responder(key(0x21)))
        .map(|_| ())
        .unwrap_err();
    assert!(matches!(
        &err,
        Error::Io(io) if matches!(io.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
    ));
    drop(client);
}

#[test]
fn role_mismatch_rejected_before_dialing() {
    let listener = listener();
    let addr = listener.local_addr().unwrap();

    let err = SecureStream::connect(addr, MachineConfig::responder(key(0x21)))
        .map(|_| ())
        .unwrap_err();
    assert!(matches!(
        err,
        Error::WrongState { operation: "connect", stage: HandshakeStage::Created }
    ));

    let client = TcpStream::connect(addr).unwrap();
    let (stream, _) = listener.accept().unwrap();
    let err = SecureStream::accept(stream, MachineConfig::initiator(key(0x11), public(0x21)))
        .map(|_| ())
        .unwrap_err();
    assert!(matches!(err, Error::WrongState { operation: "accept", .. }));
    drop(client);
}
