//! Metadata client against a daemon on the other end of a Unix socket.

#![cfg(unix)]

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::thread;

use pfs_ipc::{
    FileStat, IpcError, MetadataClient, MetadataService, RangeMapping, ReadPlan, RequestHeader,
    ResponseHeader, OP_READPLAN, OP_STAT,
};

/// Answer `n` requests on `stream`, returning the headers received.
fn answer(mut stream: UnixStream, n: usize) -> Vec<RequestHeader> {
    let mut seen = Vec::new();
    for _ in 0..n {
        let mut buf = [0u8; RequestHeader::SIZE];
        stream.read_exact(&mut buf).unwrap();
        let req = RequestHeader::from_bytes(&buf);
        seen.push(req);

        let payload = match req.op {
            OP_READPLAN => ReadPlan {
                inode: req.inode,
                file_size: 1 << 20,
                covered_size: req.length,
                ranges: vec![
                    RangeMapping {
                        object_path: "/v1/AUTH_t/c/0000000000000001".into(),
                        object_offset: 512,
                        logical_offset: req.offset,
                        size: req.length / 2,
                    },
                    RangeMapping {
                        object_path: String::new(),
                        object_offset: 0,
                        logical_offset: req.offset + req.length / 2,
                        size: req.length - req.length / 2,
                    },
                ],
            }
            .encode(),
            OP_STAT => FileStat {
                size: 1 << 20,
                mtime: 7,
                mode: 0o100600,
            }
            .to_bytes()
            .to_vec(),
            _ => {
                stream
                    .write_all(&ResponseHeader::err(22).to_bytes())
                    .unwrap();
                continue;
            }
        };
        stream
            .write_all(&ResponseHeader::ok(payload.len() as u64).to_bytes())
            .unwrap();
        stream.write_all(&payload).unwrap();
    }
    seen
}

#[test]
fn test_calls_share_one_connection() {
    let (client_end, daemon_end) = UnixStream::pair().unwrap();
    let daemon = thread::spawn(move || answer(daemon_end, 3));

    let mut client = MetadataClient::new(client_end, 9);
    let plan = client.read_plan(77, 4096, 1000).unwrap();
    assert_eq!(plan.inode, 77);
    assert_eq!(plan.ranges.len(), 2);
    assert_eq!(plan.ranges[0].logical_offset, 4096);
    assert_eq!(plan.ranges[1].logical_offset, 4596);
    assert!(plan.ranges[1].is_hole());
    assert_eq!(plan.logical_end(), Some(5096));

    let stat = client.stat(77).unwrap();
    assert_eq!(stat.size, 1 << 20);
    assert_eq!(stat.mode, 0o100600);

    let again = client.read_plan(77, 4096, 1000).unwrap();
    assert_eq!(again, plan);

    let seen = daemon.join().unwrap();
    assert!(seen.iter().all(|h| h.mount_id == 9));
    assert_eq!(seen[1].op, OP_STAT);
}

#[test]
fn test_daemon_gone_is_fatal() {
    let (client_end, daemon_end) = UnixStream::pair().unwrap();
    drop(daemon_end);

    let mut client = MetadataClient::new(client_end, 0);
    let err = client.read_plan(1, 0, 10).unwrap_err();
    assert!(err.is_fatal(), "{err}");
    assert!(!client.is_connected());
}

#[test]
fn test_connect_unix_reconnects_to_restarted_daemon() {
    let temp = tempfile::tempdir().unwrap();
    let socket = temp.path().join("proxyfsd.sock");
    let listener = UnixListener::bind(&socket).unwrap();

    let daemon = thread::spawn(move || {
        // First connection: hang up without answering.
        let (first, _) = listener.accept().unwrap();
        drop(first);
        let (second, _) = listener.accept().unwrap();
        answer(second, 1)
    });

    let mut client = MetadataClient::connect_unix(&socket, 3, 1).unwrap();
    let stat = client.stat(5).unwrap();
    assert_eq!(stat.mtime, 7);
    assert_eq!(daemon.join().unwrap().len(), 1);
}

#[test]
fn test_connect_unix_without_daemon() {
    let temp = tempfile::tempdir().unwrap();
    let err = MetadataClient::connect_unix(temp.path().join("missing.sock"), 0, 1)
        .err()
        .unwrap();
    assert!(matches!(err, IpcError::Transport { .. }));
}
