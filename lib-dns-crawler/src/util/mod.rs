pub mod types;

#[cfg(test)]
pub mod test_util {
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::{Instant, SystemTime};

    use dns_types::protocol::types::*;

    use crate::client::{Envelope, Exchange, Exchanger, QueryError, Response};
    use crate::util::types::Outcome;

    pub fn reply(
        rcode: Rcode,
        authoritative: bool,
        answers: &[ResourceRecord],
        authority: &[ResourceRecord],
        additional: &[ResourceRecord],
    ) -> Message {
        Message {
            header: Header {
                id: 0,
                is_response: true,
                opcode: Opcode::Standard,
                is_authoritative: authoritative,
                is_truncated: false,
                recursion_desired: false,
                recursion_available: false,
                rcode,
            },
            questions: Vec::new(),
            answers: answers.into(),
            authority: authority.into(),
            additional: additional.into(),
        }
    }

    /// An authoritative answer.
    pub fn answer_reply(answers: &[ResourceRecord]) -> Message {
        reply(Rcode::NoError, true, answers, &[], &[])
    }

    /// A referral downwards: NS in authority, glue in additional.
    pub fn delegation_reply(
        authority: &[ResourceRecord],
        additional: &[ResourceRecord],
    ) -> Message {
        reply(Rcode::NoError, false, &[], authority, additional)
    }

    /// An authoritative name error.
    pub fn nxdomain_reply() -> Message {
        reply(Rcode::NameError, true, &[], &[], &[])
    }

    /// Scripted replacement for the UDP client: replies are selected
    /// by `(server, qname, qtype)`, and anything unscripted times
    /// out, three attempts and all.
    #[derive(Default)]
    pub struct ScriptedExchanger {
        scripts: HashMap<(Ipv4Addr, String, RecordType), Message>,
    }

    impl ScriptedExchanger {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(&mut self, server: Ipv4Addr, qname: &str, qtype: RecordType, reply: Message) {
            self.scripts
                .insert((server, qname.to_string(), qtype), reply);
        }
    }

    #[async_trait]
    impl Exchanger for ScriptedExchanger {
        async fn exchange(&self, server: SocketAddr, question: Question) -> Response {
            let start = Instant::now();
            let request = Message::from_question(0, question.clone());
            let sent = Envelope {
                addr: server,
                message: request,
                at: SystemTime::now(),
            };

            let script = match (server.ip(), question.qtype) {
                (IpAddr::V4(ip), QueryType::Record(qtype)) => self
                    .scripts
                    .get(&(ip, question.name.to_dotted_string(), qtype)),
                _ => None,
            };

            match script {
                Some(template) => {
                    let mut message = template.clone();
                    message.questions = vec![question];
                    let exchange = Exchange {
                        sent,
                        received: Some(Envelope {
                            addr: server,
                            message: message.clone(),
                            at: SystemTime::now(),
                        }),
                        error: None,
                        start,
                        end: Instant::now(),
                    };
                    let result = match message.header.rcode {
                        Rcode::Refused | Rcode::NotImplemented => Err(Outcome::Refused),
                        _ => Ok(message),
                    };
                    Response {
                        attempts: vec![exchange],
                        result,
                    }
                }
                None => {
                    let mut attempts = Vec::with_capacity(3);
                    for _ in 0..3 {
                        attempts.push(Exchange {
                            sent: sent.clone(),
                            received: None,
                            error: Some(QueryError::Timeout),
                            start,
                            end: Instant::now(),
                        });
                    }
                    Response {
                        attempts,
                        result: Err(Outcome::Unreachable),
                    }
                }
            }
        }
    }
}
