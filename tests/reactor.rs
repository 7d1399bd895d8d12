use std::io::{Read, Write};
use std::net::TcpStream as StdTcpStream;
use std::os::fd::AsRawFd;
use std::thread;
use std::time::{Duration, Instant};

use libnio::net::{
    Channel, Inet6Address, InetAddress, InetSocketAddress, ReadOutcome, ReadableByteChannel, ServerSocketChannel,
    SocketChannel, WritableByteChannel,
};
use libnio::selector::{OP_READ, OP_WRITE};
use libnio::{ByteBuffer, EPollSelector, Error};

const DEADLINE: Duration = Duration::from_secs(10);

fn selector() -> EPollSelector {
    let mut selector = EPollSelector::new().expect("create selector");
    selector.start().expect("start selector");
    selector
}

fn listener(blocking: bool) -> ServerSocketChannel {
    let mut server = ServerSocketChannel::new();
    server.configure_blocking(blocking).expect("configure listener");
    server
        .bind_addr(&InetSocketAddress::loopback(0), ServerSocketChannel::DEFAULT_BACKLOG)
        .expect("bind listener");
    server
}

/// Drive a non-blocking connect and accept through the selector, returning both ends.
fn connected_pair(
    selector: &mut EPollSelector,
    server: &mut ServerSocketChannel,
) -> (SocketChannel, SocketChannel) {
    let port = server.local_addr().expect("local addr").port();
    selector.interest(server.fd().unwrap(), OP_READ).unwrap();

    let mut client = SocketChannel::new();
    client.configure_blocking(false).unwrap();
    let mut connected = client.connect(&InetSocketAddress::loopback(port)).expect("connect");
    let client_fd = client.fd().unwrap();
    selector.interest(client_fd, OP_WRITE).unwrap();

    let mut accepted = None;
    let start = Instant::now();
    while !(connected && accepted.is_some()) {
        assert!(start.elapsed() < DEADLINE, "connection never completed");
        selector.wait(1000).unwrap();

        if accepted.is_none() && selector.is_selected(server.as_raw_fd()) {
            accepted = server.accept().expect("accept");
        }
        if !connected && selector.is_selected(client_fd) {
            connected = client.finish_connect().expect("finish connect");
        }
    }

    selector.cancel(server.as_raw_fd()).unwrap();
    selector.cancel(client_fd).unwrap();
    (client, accepted.unwrap())
}

#[test]
fn transfers_payload_between_non_blocking_channels() {
    let mut selector = selector();
    let mut server = listener(false);
    let (mut client, mut conn) = connected_pair(&mut selector, &mut server);

    assert!(!conn.is_blocking());
    assert_eq!(client.local_addr().unwrap(), conn.peer_addr().unwrap());
    assert_eq!(client.peer_addr().unwrap().port(), server.local_addr().unwrap().port());

    let payload: Vec<u8> = (0..4096).map(|i| (i % 251) as u8).collect();
    let mut outgoing = ByteBuffer::allocate_direct(payload.len()).unwrap();
    outgoing.put_slice(&payload).unwrap();
    outgoing.flip();

    let mut incoming = ByteBuffer::allocate(payload.len());

    selector.interest(client.fd().unwrap(), OP_WRITE).unwrap();
    selector.interest(conn.fd().unwrap(), OP_READ).unwrap();

    let start = Instant::now();
    while incoming.has_remaining() {
        assert!(start.elapsed() < DEADLINE, "transfer never completed");
        selector.wait(1000).unwrap();

        if outgoing.has_remaining() && selector.is_selected(client.fd().unwrap()) {
            client.write(&mut outgoing).unwrap();
            if !outgoing.has_remaining() {
                selector.cancel(client.fd().unwrap()).unwrap();
            }
        }

        if selector.is_selected(conn.fd().unwrap()) {
            match conn.read(&mut incoming).unwrap() {
                ReadOutcome::Read(n) => assert!(n > 0),
                ReadOutcome::WouldBlock => {}
                ReadOutcome::EndOfStream => panic!("unexpected end of stream"),
            }
        }
    }

    assert_eq!(incoming.array().unwrap(), &payload[..]);
    assert!(server.accept().unwrap().is_none());
}

#[test]
fn read_would_block_then_end_of_stream() {
    let mut selector = selector();
    let mut server = listener(false);
    let (mut client, mut conn) = connected_pair(&mut selector, &mut server);

    let mut buf = ByteBuffer::allocate_direct(64).unwrap();
    let outcome = conn.read(&mut buf).unwrap();
    assert_eq!(outcome, ReadOutcome::WouldBlock);
    assert_eq!(outcome.as_count(), 0);
    assert_eq!(buf.position(), 0);

    client.close();
    assert!(!client.is_open());

    selector.interest(conn.fd().unwrap(), OP_READ).unwrap();
    assert!(selector.wait(5000).unwrap() >= 1);
    assert!(selector.is_selected(conn.fd().unwrap()));

    let outcome = conn.read(&mut buf).unwrap();
    assert_eq!(outcome, ReadOutcome::EndOfStream);
    assert_eq!(outcome.as_count(), -1);
}

#[test]
fn cancelled_connection_is_never_selected_again() {
    let mut selector = selector();
    let mut server = listener(false);
    let (mut client, conn) = connected_pair(&mut selector, &mut server);
    let fd = conn.fd().unwrap();

    selector.interest(fd, OP_READ).unwrap();

    let mut buf = ByteBuffer::allocate(4);
    buf.put_slice(b"ping").unwrap();
    buf.flip();
    assert_eq!(client.write(&mut buf).unwrap(), 4);

    assert_eq!(selector.wait(5000).unwrap(), 1);
    let ready: Vec<_> = selector.selected().collect();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].fd(), fd);
    assert!(ready[0].is_readable());

    selector.cancel(fd).unwrap();
    assert!(!selector.is_selected(fd));

    buf.rewind();
    assert_eq!(client.write(&mut buf).unwrap(), 4);
    assert_eq!(selector.wait(100).unwrap(), 0);
    assert!(selector.selected().next().is_none());
}

#[test]
fn blocking_listener_serves_std_client() {
    let mut server = listener(true);
    let port = server.local_addr().unwrap().port();

    let client = thread::spawn(move || {
        let mut stream = StdTcpStream::connect(("127.0.0.1", port)).expect("connect");
        stream.write_all(b"ping").expect("write");
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).expect("read_exact");
        buf
    });

    let mut conn = server.accept().unwrap().expect("blocking accept");
    assert!(conn.is_blocking());

    let mut buf = ByteBuffer::allocate_direct(4).unwrap();
    while buf.has_remaining() {
        match conn.read(&mut buf).unwrap() {
            ReadOutcome::Read(_) => {}
            other => panic!("unexpected read outcome {:?}", other),
        }
    }
    buf.flip();
    assert_eq!(buf.remaining_slice().unwrap(), b"ping");

    let mut reply = ByteBuffer::allocate(4);
    reply.put_slice(b"pong").unwrap();
    reply.flip();
    assert_eq!(conn.write(&mut reply).unwrap(), 4);

    assert_eq!(&client.join().unwrap(), b"pong");
    conn.close();
    server.close();
    assert!(!server.is_open());
}

#[test]
fn connect_to_closed_port_reports_refusal() {
    let port = {
        let mut server = listener(false);
        let port = server.local_addr().unwrap().port();
        server.close();
        port
    };

    let mut selector = selector();
    let mut client = SocketChannel::new();
    client.configure_blocking(false).unwrap();

    let result = match client.connect(&InetSocketAddress::loopback(port)) {
        Ok(true) => panic!("connected to a closed port"),
        Err(e) => Err(e),
        Ok(false) => {
            selector.interest(client.fd().unwrap(), OP_WRITE).unwrap();
            let start = Instant::now();
            loop {
                assert!(start.elapsed() < DEADLINE, "connect never resolved");
                selector.wait(1000).unwrap();
                match client.finish_connect() {
                    Ok(false) => continue,
                    other => break other,
                }
            }
        }
    };

    match result {
        Err(Error::SystemCall { call, .. }) => assert_eq!(call, "connect"),
        other => panic!("expected a refused connect, got {:?}", other),
    }
}

#[test]
fn wait_times_out_and_wakes_from_other_thread() {
    let mut selector = selector();
    let server = listener(false);
    selector.interest(server.fd().unwrap(), OP_READ).unwrap();

    assert_eq!(selector.wait(20).unwrap(), 0);

    let waker = selector.waker().unwrap();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        waker.wake().expect("wake");
    });

    let start = Instant::now();
    selector.wait(-1).unwrap();
    assert!(start.elapsed() < DEADLINE);
    assert!(selector.selected().next().is_none());
    handle.join().unwrap();
}

#[test]
fn resolves_localhost_and_connects() {
    let mut server = listener(true);
    let port = server.local_addr().unwrap().port();

    let address = InetSocketAddress::resolve("127.0.0.1", port).unwrap();
    assert!(address.is_ipv4());
    assert_eq!(address.to_string(), format!("127.0.0.1:{}", port));

    let mut client = SocketChannel::new();
    assert!(client.connect(&address).unwrap());
    let conn = server.accept().unwrap().expect("accept");
    assert_eq!(conn.local_addr().unwrap().port(), port);
}

#[test]
fn ipv6_listener_transfers_and_reports_ipv6_addresses() {
    let loopback = InetSocketAddress::new(InetAddress::V6(Inet6Address::new(Inet6Address::LOOPBACK)), 0);

    let mut server = ServerSocketChannel::new();
    server.bind_addr(&loopback, 16).expect("bind [::1]:0");
    let local = server.local_addr().unwrap();
    assert!(local.address().is_ipv6());
    assert_eq!(local.address(), loopback.address());
    assert_ne!(local.port(), 0);
    assert!(local.to_string().starts_with("[::1]:"));

    let mut client = SocketChannel::new();
    assert!(client.connect(&local).unwrap());
    let mut conn = server.accept().unwrap().expect("accept");

    let client_local = client.local_addr().unwrap();
    assert!(!client_local.is_ipv4());
    assert_eq!(conn.peer_addr().unwrap(), client_local);
    assert_eq!(client.peer_addr().unwrap(), local);

    let mut outgoing = ByteBuffer::allocate(3);
    outgoing.put_slice(b"v6!").unwrap();
    outgoing.flip();
    assert_eq!(client.write(&mut outgoing).unwrap(), 3);

    let mut incoming = ByteBuffer::allocate_direct(3).unwrap();
    let mut total = 0;
    while incoming.has_remaining() {
        match conn.read(&mut incoming).unwrap() {
            ReadOutcome::Read(n) => total += n,
            other => panic!("unexpected read outcome {:?}", other),
        }
    }
    assert_eq!(total, 3);
    incoming.flip();
    assert_eq!(incoming.remaining_slice().unwrap(), b"v6!");
}
