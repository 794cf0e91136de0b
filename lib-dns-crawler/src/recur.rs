use async_trait::async_trait;
use std::net::SocketAddr;

use dns_types::protocol::types::*;

use crate::client::DNS_PORT;
use crate::term::{Cursor, Task};
use crate::util::types::{Outcome, TermError};
use crate::zone::{extract_servers, root_zone, ZoneServers};

/// How many zones one descent may traverse before giving up.
pub const MAX_ZONE_DEPTH: usize = 32;

/// The iterative delegation walk: starting from the root servers (or
/// a given zone), follow referrals downwards until some server gives
/// an authoritative answer for `(domain, qtype)` - or until the walk
/// can make no further progress.
///
/// This is a one-shot task: construct, run, then read the outputs.
pub struct Recur {
    pub domain: DomainName,
    pub qtype: RecordType,
    pub start_with: Option<ZoneServers>,
    pub headless: bool,

    /// How the descent finished.
    pub outcome: Outcome,
    /// The final packet, when one was received.
    pub packet: Option<Message>,
    /// The zone that produced the final packet.
    pub end_with: Option<ZoneServers>,
    /// Every zone traversed, in descent order.
    pub zones: Vec<ZoneServers>,
    /// Answer-section records restricted to `qtype` and CNAME.
    pub answers: Vec<ResourceRecord>,
}

impl Recur {
    pub fn new(domain: DomainName) -> Self {
        Self::with_qtype(domain, RecordType::A)
    }

    pub fn with_qtype(domain: DomainName, qtype: RecordType) -> Self {
        Self {
            domain,
            qtype,
            start_with: None,
            headless: false,
            outcome: Outcome::Okay,
            packet: None,
            end_with: None,
            zones: Vec::new(),
            answers: Vec::new(),
        }
    }

    async fn descend(&mut self, c: &mut Cursor<'_>) -> Result<(), TermError> {
        let mut zone = match self.start_with.clone() {
            Some(zone) => zone,
            None => c.cache().closest(&self.domain).unwrap_or_else(root_zone),
        };

        loop {
            if self.zones.len() >= MAX_ZONE_DEPTH {
                self.outcome = Outcome::TooDeep;
                return Ok(());
            }
            self.zones.push(zone.clone());

            // a delegation without glue gets one inline resolution
            // for its first server before the zone counts as empty
            if !zone.has_glue() {
                if let Some(host) = zone.unresolved().first().cloned() {
                    c.print(format!("// resolving glueless server {host}"));
                    let mut sub = Recur::new(host.clone());
                    c.t(&mut sub).await?;
                    if sub.outcome.is_okay() {
                        for rr in &sub.answers {
                            if let RecordTypeWithData::A { address } = rr.rtype_with_data {
                                zone.add_server(host.clone(), address);
                            }
                        }
                    }
                }
                if zone.has_glue() {
                    c.cache().update(&zone);
                } else {
                    self.outcome = Outcome::Lame;
                    self.end_with = Some(zone);
                    return Ok(());
                }
            }

            let question = Question {
                name: self.domain.clone(),
                qtype: QueryType::Record(self.qtype),
                qclass: QueryClass::Record(RecordClass::IN),
            };

            // servers are tried in insertion order; the first one
            // that answers wins
            let mut reply = None;
            let mut failure = Outcome::Unreachable;
            for ns in zone.servers() {
                let Some(ip) = ns.ip else { continue };
                let server = SocketAddr::from((ip, DNS_PORT));
                let response = c.q(server, question.clone()).await;
                match response.result {
                    Ok(message) => {
                        reply = Some(message);
                        break;
                    }
                    Err(outcome) => {
                        failure = outcome;
                        if outcome == Outcome::Refused || outcome == Outcome::Malformed {
                            break;
                        }
                    }
                }
            }

            let Some(reply) = reply else {
                self.outcome = failure;
                self.end_with = Some(zone);
                return Ok(());
            };

            if reply.header.rcode == Rcode::NameError {
                self.outcome = Outcome::NotExist;
                self.packet = Some(reply);
                self.end_with = Some(zone);
                return Ok(());
            }

            let qtype = self.qtype;
            let wanted =
                |rr: &ResourceRecord| rr.rtype() == qtype || rr.rtype() == RecordType::CNAME;

            let authoritative = reply.header.is_authoritative && !reply.answers.is_empty();
            let answered = reply.answers.iter().any(|rr| wanted(rr));
            if authoritative || answered {
                self.answers = reply.answers.iter().filter(|rr| wanted(rr)).cloned().collect();
                self.outcome = Outcome::Okay;
                self.packet = Some(reply);
                self.end_with = Some(zone);
                return Ok(());
            }

            match extract_servers(&reply, &self.domain) {
                Some(next) => {
                    // a zone showing up twice is a referral loop;
                    // check that before delegation-depth sanity so a
                    // self-delegation is reported as the loop it is
                    if self.zones.iter().any(|z| z.zone() == next.zone()) {
                        self.outcome = Outcome::CircularZone;
                        self.packet = Some(reply);
                        self.end_with = Some(zone);
                        return Ok(());
                    }
                    if !next.zone().is_strict_subdomain_of(zone.zone()) {
                        self.outcome = Outcome::Lame;
                        self.packet = Some(reply);
                        self.end_with = Some(zone);
                        return Ok(());
                    }

                    c.print(format!("// delegation {} -> {}", zone.zone(), next.zone()));
                    c.cache().update(&next);
                    zone = next;
                }
                None => {
                    self.outcome = Outcome::Lame;
                    self.packet = Some(reply);
                    self.end_with = Some(zone);
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl Task for Recur {
    fn name(&self) -> String {
        format!("recur {} {}", self.domain, self.qtype)
    }

    async fn run(&mut self, c: &mut Cursor<'_>) -> Result<(), TermError> {
        if !self.headless {
            c.print(format!("recur {} {} {{", self.domain, self.qtype));
            c.shift_in();
        }

        let result = self.descend(c).await;

        if result.is_ok() && !self.outcome.is_okay() {
            c.print(format!("// {}", self.outcome));
        }
        if !self.headless {
            c.shift_out("}");
        }
        result
    }
}
