use std::{
    collections::HashSet,
    env, io,
    os::fd::{AsRawFd, RawFd},
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use libnio::{
    net::{
        Channel, InetSocketAddress, ReadOutcome, ReadableByteChannel, ServerSocketChannel,
        SocketChannel, WritableByteChannel,
    },
    selector::{OP_READ, OP_WRITE},
    ByteBuffer, EPollSelector,
};

const BUFFER_SIZE: usize = 4096;
const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-=_+!@#$%^&*;:";

type Selector = EPollSelector<Connection>;

struct Connection {
    channel: SocketChannel,
    buffer: ByteBuffer,
    writing: bool,
}

impl Connection {
    fn new(channel: SocketChannel) -> libnio::Result<Connection> {
        Ok(Connection {
            channel,
            buffer: ByteBuffer::allocate_direct(BUFFER_SIZE)?,
            writing: false,
        })
    }

    fn close(mut self) {
        self.buffer.close();
        self.channel.close();
    }
}

/// What to do with a connection after it has been serviced.
enum Step {
    Keep,
    Interest(u32),
    Close,
}

#[derive(Clone, Copy)]
enum Mode {
    Echo,
    Generate,
}

/// Tiny xorshift generator, good enough to pick characters and offsets.
struct Rng(u64);

impl Rng {
    fn seeded() -> Rng {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e37_79b9_7f4a_7c15);
        Rng(nanos | 1)
    }

    fn below(&mut self, n: usize) -> usize {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        (self.0 % n.max(1) as u64) as usize
    }
}

struct Behaviour {
    mode: Mode,
    rng: Rng,
    connections: HashSet<RawFd>,
}

impl Behaviour {
    fn new(mode: Mode) -> Behaviour {
        Behaviour {
            mode,
            rng: Rng::seeded(),
            connections: HashSet::new(),
        }
    }

    fn started(&mut self, selector: &mut Selector, channel: SocketChannel) -> libnio::Result<()> {
        let fd = channel.fd()?;
        let mut conn = Connection::new(channel)?;

        let ops = match self.mode {
            Mode::Echo => OP_READ,
            Mode::Generate => {
                while conn.buffer.has_remaining() {
                    conn.buffer.put(CHARSET[self.rng.below(CHARSET.len())])?;
                }
                OP_WRITE
            }
        };

        selector.interest(fd, ops)?.attach(conn);
        self.connections.insert(fd);
        info!(fd, "connection started");
        Ok(())
    }

    fn poll(&mut self, selector: &mut Selector) -> libnio::Result<bool> {
        for fd in selector.selected_fds() {
            let conn = match selector.key_mut(fd).and_then(|key| key.attachment_mut()) {
                Some(conn) => conn,
                None => continue,
            };

            let step = match self.mode {
                Mode::Echo => echo(conn),
                Mode::Generate => generate(conn, &mut self.rng),
            };
            match step {
                Step::Keep => {}
                Step::Interest(ops) => {
                    selector.interest(fd, ops)?;
                }
                Step::Close => self.finish(selector, fd)?,
            }
        }

        Ok(!self.connections.is_empty())
    }

    fn finish(&mut self, selector: &mut Selector, fd: RawFd) -> libnio::Result<()> {
        self.connections.remove(&fd);
        if let Some(conn) = selector.cancel(fd)?.and_then(|key| key.into_attachment()) {
            conn.close();
        }
        info!(fd, "connection finished");
        Ok(())
    }

    fn close(&mut self, selector: &mut Selector) -> libnio::Result<()> {
        let fds: Vec<_> = self.connections.iter().copied().collect();
        for fd in fds {
            self.finish(selector, fd)?;
        }
        Ok(())
    }
}

fn echo(conn: &mut Connection) -> Step {
    if !conn.writing {
        return match conn.channel.read(&mut conn.buffer) {
            Ok(ReadOutcome::EndOfStream) => Step::Close,
            Ok(ReadOutcome::Read(n)) if n > 0 => {
                conn.buffer.flip();
                conn.writing = true;
                Step::Interest(OP_WRITE)
            }
            Ok(_) => Step::Keep,
            Err(e) => {
                warn!(error = %e, "read failed");
                Step::Close
            }
        };
    }

    match conn.channel.write(&mut conn.buffer) {
        Ok(n) if n > 0 && !conn.buffer.has_remaining() => {
            conn.buffer.clear();
            conn.writing = false;
            Step::Interest(OP_READ)
        }
        Ok(_) => Step::Keep,
        Err(e) => {
            warn!(error = %e, "write failed");
            Step::Close
        }
    }
}

fn generate(conn: &mut Connection, rng: &mut Rng) -> Step {
    conn.buffer.clear();
    let start = rng.below(conn.buffer.limit() - 1);
    if let Err(e) = conn.buffer.set_position(start) {
        warn!(error = %e, "failed to position buffer");
        return Step::Close;
    }

    while conn.buffer.has_remaining() {
        match conn.channel.write(&mut conn.buffer) {
            Ok(0) => break,
            Ok(n) => debug!(n, "generated"),
            Err(e) => {
                warn!(error = %e, "write failed");
                return Step::Close;
            }
        }
    }
    Step::Keep
}

enum Connector {
    Server(ServerSocketChannel),
    Client(Option<SocketChannel>, RawFd),
}

impl Connector {
    fn setup(
        kind: &str,
        port: u16,
        selector: &mut Selector,
        behaviour: &mut Behaviour,
    ) -> libnio::Result<Option<Connector>> {
        match kind {
            "server" => {
                let mut server = ServerSocketChannel::new();
                server.configure_blocking(false)?;
                server.bind(port)?;
                selector.interest(server.fd()?, OP_READ)?;
                let address = server.local_addr()?;
                info!(%address, "bound on port {}", port);
                Ok(Some(Connector::Server(server)))
            }
            "client" => {
                let mut client = SocketChannel::new();
                client.configure_blocking(false)?;
                let connected = client.connect(&InetSocketAddress::loopback(port))?;
                let fd = client.fd()?;
                if connected {
                    behaviour.started(selector, client)?;
                    return Ok(Some(Connector::Client(None, fd)));
                }
                selector.interest(fd, OP_WRITE)?;
                Ok(Some(Connector::Client(Some(client), fd)))
            }
            _ => Ok(None),
        }
    }

    fn poll(&mut self, selector: &mut Selector, behaviour: &mut Behaviour) -> libnio::Result<bool> {
        match self {
            Connector::Server(server) => {
                if selector.is_selected(server.as_raw_fd()) {
                    while let Some(mut client) = server.accept()? {
                        client.configure_blocking(false)?;
                        behaviour.started(selector, client)?;
                    }
                }
                Ok(true)
            }
            Connector::Client(pending, fd) => {
                if let Some(client) = pending {
                    if selector.is_selected(*fd) && client.finish_connect()? {
                        let peer = client.peer_addr()?;
                        info!(%peer, "connected");
                        if let Some(client) = pending.take() {
                            behaviour.started(selector, client)?;
                        }
                    }
                }
                Ok(pending.is_some())
            }
        }
    }

    fn close(self, selector: &mut Selector) -> libnio::Result<()> {
        match self {
            Connector::Server(mut server) => {
                selector.cancel(server.fd()?)?;
                server.close();
            }
            Connector::Client(Some(mut client), fd) => {
                selector.cancel(fd)?;
                client.close();
            }
            Connector::Client(None, _) => {}
        }
        Ok(())
    }
}

fn run(kind: &str, mode: Mode, port: u16) -> libnio::Result<()> {
    let mut selector = Selector::new()?;
    selector.start()?;

    let mut behaviour = Behaviour::new(mode);
    let mut connector = match Connector::setup(kind, port, &mut selector, &mut behaviour)? {
        Some(connector) => connector,
        None => {
            println!("Wrong connector {}, should be client or server", kind);
            return Ok(());
        }
    };

    let result = drive(&mut selector, &mut connector, &mut behaviour);

    behaviour.close(&mut selector)?;
    connector.close(&mut selector)?;
    selector.close();
    result
}

fn drive(
    selector: &mut Selector,
    connector: &mut Connector,
    behaviour: &mut Behaviour,
) -> libnio::Result<()> {
    loop {
        selector.wait(-1)?;

        let connecting = connector.poll(selector, behaviour)?;
        let active = behaviour.poll(selector)?;
        if !(connecting || active) {
            return Ok(());
        }
    }
}

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() < 3 {
        println!("Usage: nio (client | server) (echo | generate) port");
        return Ok(());
    }

    let port: u16 = match args[2].parse() {
        Ok(port) => port,
        Err(e) => {
            println!("Invalid port {}: {}", args[2], e);
            return Ok(());
        }
    };

    let mode = match args[1].as_str() {
        "echo" => Mode::Echo,
        "generate" => Mode::Generate,
        other => {
            println!("Wrong behaviour {}, should be echo or generate", other);
            return Ok(());
        }
    };

    run(&args[0], mode, port)?;
    Ok(())
}
