use async_trait::async_trait;
use bytes::BytesMut;
use rand::Rng;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout_at;

use dns_types::protocol::deserialise;
use dns_types::protocol::types::{Message, Question, Rcode};

use crate::util::types::Outcome;

pub const DNS_PORT: u16 = 53;

const LOCK_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] query id table lock poisoned, cannot recover from this - aborting";

/// A datagram as sent or received: where, what, and when.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub addr: SocketAddr,
    pub message: Message,
    pub at: SystemTime,
}

/// Why a single attempt did not produce a usable reply.
#[derive(Debug, Clone)]
pub enum QueryError {
    /// No matching reply arrived in time.
    Timeout,
    /// A reply arrived for this query id but could not be decoded.
    Malformed(deserialise::Error),
    /// The datagram could not be sent at all.
    Io(String),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            QueryError::Timeout => write!(f, "timeout"),
            QueryError::Malformed(error) => write!(f, "malformed reply: {error:?}"),
            QueryError::Io(error) => write!(f, "io: {error}"),
        }
    }
}

/// One request/reply attempt against one server.  Retries produce a
/// list of these, which ends up attached to the transcript leaf.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub sent: Envelope,
    pub received: Option<Envelope>,
    pub error: Option<QueryError>,
    pub start: Instant,
    pub end: Instant,
}

/// The overall result of querying one server, every attempt
/// included.
#[derive(Debug, Clone)]
pub struct Response {
    pub attempts: Vec<Exchange>,
    pub result: Result<Message, Outcome>,
}

/// The one operation a resolution task needs from the network: send
/// a question to a server, get back the matching reply (or how it
/// failed), with the full attempt history.
#[async_trait]
pub trait Exchanger: Send + Sync {
    async fn exchange(&self, server: SocketAddr, question: Question) -> Response;
}

/// Retry tuning for the UDP client.
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    /// Per-attempt reply deadline.
    pub timeout: Duration,
    /// Total attempts per exchange, each with a fresh query id.
    pub attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            attempts: 3,
        }
    }
}

/// The process-wide UDP query client: one socket bound to an
/// ephemeral port, shared by every concurrent resolution.
///
/// A background task reads the socket and routes each datagram to
/// the attempt owning its query id; datagrams carrying no
/// outstanding id are dropped silently.  Ids count up from a random
/// start and are reserved until their attempt finishes, so they are
/// unique across everything currently in flight.
pub struct Client {
    socket: Arc<UdpSocket>,
    pending: Arc<Mutex<Pending>>,
    config: ClientConfig,
}

type Datagram = (SocketAddr, Vec<u8>);

#[derive(Debug)]
struct Pending {
    next_id: u16,
    slots: HashMap<u16, mpsc::Sender<Datagram>>,
}

impl Pending {
    fn register(&mut self, tx: mpsc::Sender<Datagram>) -> Option<u16> {
        for _ in 0..=u32::from(u16::MAX) {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if let Entry::Vacant(slot) = self.slots.entry(id) {
                slot.insert(tx);
                return Some(id);
            }
        }
        None
    }
}

impl Client {
    pub async fn new(config: ClientConfig) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(("0.0.0.0", 0)).await?);
        let pending = Arc::new(Mutex::new(Pending {
            next_id: rand::thread_rng().gen(),
            slots: HashMap::new(),
        }));

        tokio::spawn(read_loop(Arc::clone(&socket), Arc::clone(&pending)));

        Ok(Self {
            socket,
            pending,
            config,
        })
    }

    fn unregister(&self, id: u16) {
        self.pending
            .lock()
            .expect(LOCK_POISON_MESSAGE)
            .slots
            .remove(&id);
    }

    async fn attempt(&self, server: SocketAddr, question: &Question) -> Exchange {
        let start = Instant::now();
        let (tx, mut rx) = mpsc::channel(8);

        let Some(id) = self
            .pending
            .lock()
            .expect(LOCK_POISON_MESSAGE)
            .register(tx)
        else {
            let request = Message::from_question(0, question.clone());
            return Exchange {
                sent: Envelope {
                    addr: server,
                    message: request,
                    at: SystemTime::now(),
                },
                received: None,
                error: Some(QueryError::Io("no free query ids".to_string())),
                start,
                end: Instant::now(),
            };
        };

        let request = Message::from_question(id, question.clone());
        let sent = Envelope {
            addr: server,
            message: request.clone(),
            at: SystemTime::now(),
        };

        let octets = match request.to_octets() {
            Ok(octets) => octets,
            Err(error) => {
                self.unregister(id);
                return Exchange {
                    sent,
                    received: None,
                    error: Some(QueryError::Io(error.to_string())),
                    start,
                    end: Instant::now(),
                };
            }
        };

        if let Err(error) = self.socket.send_to(&octets, server).await {
            self.unregister(id);
            return Exchange {
                sent,
                received: None,
                error: Some(QueryError::Io(error.to_string())),
                start,
                end: Instant::now(),
            };
        }

        let deadline = tokio::time::Instant::now() + self.config.timeout;
        let exchange = loop {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some((addr, octets))) => {
                    if addr != server {
                        tracing::trace!(%addr, %server, id, "reply from wrong address dropped");
                        continue;
                    }
                    match Message::from_octets(&octets) {
                        Ok(message) => {
                            if reply_matches(&message, question) {
                                break Exchange {
                                    sent,
                                    received: Some(Envelope {
                                        addr,
                                        message,
                                        at: SystemTime::now(),
                                    }),
                                    error: None,
                                    start,
                                    end: Instant::now(),
                                };
                            }
                            tracing::trace!(%addr, id, "reply not matching the question dropped");
                        }
                        Err(error) => {
                            break Exchange {
                                sent,
                                received: None,
                                error: Some(QueryError::Malformed(error)),
                                start,
                                end: Instant::now(),
                            };
                        }
                    }
                }
                Ok(None) | Err(_) => {
                    break Exchange {
                        sent,
                        received: None,
                        error: Some(QueryError::Timeout),
                        start,
                        end: Instant::now(),
                    };
                }
            }
        };

        self.unregister(id);
        exchange
    }
}

#[async_trait]
impl Exchanger for Client {
    async fn exchange(&self, server: SocketAddr, question: Question) -> Response {
        let mut attempts = Vec::with_capacity(self.config.attempts as usize);

        for _ in 0..self.config.attempts {
            let exchange = self.attempt(server, &question).await;

            if let Some(received) = &exchange.received {
                let message = received.message.clone();
                attempts.push(exchange);
                let result = match message.header.rcode {
                    Rcode::Refused | Rcode::NotImplemented => Err(Outcome::Refused),
                    _ => Ok(message),
                };
                return Response { attempts, result };
            }

            let malformed = matches!(exchange.error, Some(QueryError::Malformed(_)));
            attempts.push(exchange);
            if malformed {
                return Response {
                    attempts,
                    result: Err(Outcome::Malformed),
                };
            }
            // timeouts and send failures roll over into the next
            // attempt, with a fresh id
        }

        Response {
            attempts,
            result: Err(Outcome::Unreachable),
        }
    }
}

/// A reply is only delivered to a task when the response bit is set
/// and the echoed question is the one asked.  The id and source
/// address have already been checked at this point.
fn reply_matches(reply: &Message, question: &Question) -> bool {
    reply.header.is_response && reply.questions.len() == 1 && reply.questions[0] == *question
}

async fn read_loop(socket: Arc<UdpSocket>, pending: Arc<Mutex<Pending>>) {
    let mut buf = BytesMut::zeroed(4096);
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, addr)) => {
                if len < 2 {
                    tracing::trace!(%addr, len, "runt datagram dropped");
                    continue;
                }
                let id = u16::from_be_bytes([buf[0], buf[1]]);
                let slot = pending
                    .lock()
                    .expect(LOCK_POISON_MESSAGE)
                    .slots
                    .get(&id)
                    .cloned();
                match slot {
                    Some(tx) => {
                        // the attempt may have just finished; a full
                        // or closed channel is the same as no slot
                        let _ = tx.try_send((addr, buf[..len].to_vec()));
                    }
                    None => {
                        tracing::trace!(%addr, id, "datagram with no outstanding id dropped");
                    }
                }
            }
            Err(error) => {
                tracing::warn!(?error, "udp receive failed");
            }
        }
    }
}
