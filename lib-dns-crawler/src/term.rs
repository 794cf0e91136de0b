use async_trait::async_trait;
use std::net::SocketAddr;

use dns_types::protocol::types::Question;

use crate::cache::SharedZoneCache;
use crate::client::{Exchange, Exchanger, Response, DNS_PORT};
use crate::printer::Printer;
use crate::util::types::TermError;

/// A resolution step.  Tasks nest: a task runs children through its
/// cursor, and the runner assembles the transcript tree as they go.
#[async_trait]
pub trait Task: Send {
    /// The label for this task's transcript node.
    fn name(&self) -> String;

    async fn run(&mut self, c: &mut Cursor<'_>) -> Result<(), TermError>;
}

/// One node of the transcript tree: an internal node per task, a
/// leaf per client exchange.
#[derive(Debug, Clone)]
pub enum Node {
    Internal { name: String, children: Vec<Node> },
    Leaf { attempts: Vec<Exchange> },
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    /// Count the exchange leaves in this subtree.
    pub fn leaf_count(&self) -> usize {
        match self {
            Node::Leaf { .. } => 1,
            Node::Internal { children, .. } => children.iter().map(Node::leaf_count).sum(),
        }
    }
}

/// What running a root task produced: the transcript tree, the
/// transcript text, and the sticky error if the run aborted.
#[derive(Debug)]
pub struct RunReport {
    pub root: Option<Node>,
    pub transcript: String,
    pub error: Option<TermError>,
}

/// The task runner: holds the client handle and the shared zone
/// cache, and runs one root task at a time.  Within a run everything
/// is strictly sequential; parallelism only exists across
/// independent `Term` runs sharing the same client.
pub struct Term<'e> {
    exchanger: &'e dyn Exchanger,
    cache: SharedZoneCache,
}

impl<'e> Term<'e> {
    pub fn new(exchanger: &'e dyn Exchanger, cache: SharedZoneCache) -> Self {
        Self { exchanger, cache }
    }

    pub async fn run(&self, task: &mut dyn Task) -> RunReport {
        let mut cursor = Cursor {
            exchanger: self.exchanger,
            cache: &self.cache,
            printer: Printer::new(),
            nodes: Vec::new(),
            error: None,
        };

        let result = cursor.t(task).await;

        RunReport {
            root: cursor.nodes.pop(),
            transcript: cursor.printer.into_string(),
            error: result.err(),
        }
    }
}

/// A task's execution context: runs children, performs client
/// exchanges, and builds the indented transcript.
pub struct Cursor<'t> {
    exchanger: &'t dyn Exchanger,
    cache: &'t SharedZoneCache,
    printer: Printer,
    nodes: Vec<Node>,
    error: Option<TermError>,
}

impl Cursor<'_> {
    /// Run a child task to completion, linking its transcript node
    /// under the current task.  Once a sticky error is set, further
    /// children refuse to run.
    pub async fn t(&mut self, task: &mut dyn Task) -> Result<(), TermError> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }

        let saved = std::mem::take(&mut self.nodes);
        let result = task.run(self).await;
        let children = std::mem::replace(&mut self.nodes, saved);
        self.nodes.push(Node::Internal {
            name: task.name(),
            children,
        });

        if let Err(error) = &result {
            self.error = Some(error.clone());
        }
        result
    }

    /// Perform one client exchange, printing each attempt and
    /// recording the leaf node.
    pub async fn q(&mut self, server: SocketAddr, question: Question) -> Response {
        let response = self.exchanger.exchange(server, question).await;
        for exchange in &response.attempts {
            self.print_exchange(exchange);
        }
        self.nodes.push(Node::Leaf {
            attempts: response.attempts.clone(),
        });
        response
    }

    pub fn cache(&self) -> &SharedZoneCache {
        self.cache
    }

    pub fn error(&self) -> Option<&TermError> {
        self.error.as_ref()
    }

    pub fn print(&mut self, line: impl AsRef<str>) {
        self.printer.print(line);
    }

    pub fn blank(&mut self) {
        self.printer.blank();
    }

    pub fn shift_in(&mut self) {
        self.printer.shift_in();
    }

    pub fn shift_out(&mut self, closing: &str) {
        self.printer.shift_out(closing);
    }

    fn print_exchange(&mut self, exchange: &Exchange) {
        let Some(question) = exchange.sent.message.questions.first() else {
            return;
        };
        let elapsed = exchange.end.duration_since(exchange.start).as_millis();
        let server = addr_string(exchange.sent.addr);

        match (&exchange.received, &exchange.error) {
            (Some(envelope), _) => {
                let header = &envelope.message.header;
                let aa = if header.is_authoritative { " aa" } else { "" };
                self.printer.print(format!(
                    "@{server} {question} -> {}{aa}, an {}, ns {}, ar {} ({elapsed}ms)",
                    header.rcode,
                    envelope.message.answers.len(),
                    envelope.message.authority.len(),
                    envelope.message.additional.len(),
                ));
            }
            (None, Some(error)) => {
                self.printer
                    .print(format!("@{server} {question} -> {error} ({elapsed}ms)"));
            }
            (None, None) => {}
        }
    }
}

fn addr_string(addr: SocketAddr) -> String {
    if addr.port() == 0 || addr.port() == DNS_PORT {
        addr.ip().to_string()
    } else {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use dns_types::protocol::types::test_util::*;
    use dns_types::protocol::types::RecordType;

    use super::*;
    use crate::util::test_util::*;

    struct Block {
        label: String,
        children: usize,
        fail: bool,
    }

    #[async_trait]
    impl Task for Block {
        fn name(&self) -> String {
            self.label.clone()
        }

        async fn run(&mut self, c: &mut Cursor<'_>) -> Result<(), TermError> {
            c.print(format!("{} {{", self.label));
            c.shift_in();
            if self.fail {
                c.shift_out("}");
                return Err(TermError::Internal("boom".to_string()));
            }
            for i in 0..self.children {
                let mut child = Block {
                    label: format!("{}.{i}", self.label),
                    children: 0,
                    fail: false,
                };
                c.t(&mut child).await?;
            }
            c.shift_out("}");
            Ok(())
        }
    }

    #[tokio::test]
    async fn transcript_nests_blocks() {
        let exchanger = ScriptedExchanger::new();
        let term = Term::new(&exchanger, SharedZoneCache::new());
        let mut root = Block {
            label: "root".to_string(),
            children: 2,
            fail: false,
        };

        let report = term.run(&mut root).await;

        assert!(report.error.is_none());
        assert_eq!(
            "root {\n  root.0 {\n  }\n  root.1 {\n  }\n}\n",
            report.transcript
        );

        match report.root {
            Some(Node::Internal { name, children }) => {
                assert_eq!("root", name);
                assert_eq!(2, children.len());
            }
            other => panic!("expected internal root node, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sticky_error_stops_later_children() {
        let exchanger = ScriptedExchanger::new();
        let term = Term::new(&exchanger, SharedZoneCache::new());

        struct Root;

        #[async_trait]
        impl Task for Root {
            fn name(&self) -> String {
                "root".to_string()
            }

            async fn run(&mut self, c: &mut Cursor<'_>) -> Result<(), TermError> {
                let mut bad = Block {
                    label: "bad".to_string(),
                    children: 0,
                    fail: true,
                };
                let first = c.t(&mut bad).await;
                assert!(first.is_err());

                let mut never = Block {
                    label: "never".to_string(),
                    children: 0,
                    fail: false,
                };
                let second = c.t(&mut never).await;
                assert!(second.is_err());

                first
            }
        }

        let report = term.run(&mut Root).await;
        assert_eq!(
            Some(TermError::Internal("boom".to_string())),
            report.error
        );
        assert!(!report.transcript.contains("never"));
    }

    #[tokio::test]
    async fn q_records_a_leaf_and_prints_attempts() {
        let mut exchanger = ScriptedExchanger::new();
        exchanger.on(
            Ipv4Addr::new(1, 1, 1, 1),
            "www.example.com.",
            RecordType::A,
            answer_reply(&[a_record("www.example.com.", Ipv4Addr::new(1, 2, 3, 4))]),
        );

        struct One;

        #[async_trait]
        impl Task for One {
            fn name(&self) -> String {
                "one".to_string()
            }

            async fn run(&mut self, c: &mut Cursor<'_>) -> Result<(), TermError> {
                let response = c
                    .q(
                        (Ipv4Addr::new(1, 1, 1, 1), DNS_PORT).into(),
                        question("www.example.com.", RecordType::A),
                    )
                    .await;
                assert!(response.result.is_ok());
                Ok(())
            }
        }

        let term = Term::new(&exchanger, SharedZoneCache::new());
        let report = term.run(&mut One).await;

        assert!(report.transcript.contains("@1.1.1.1 www.example.com. IN A"));
        assert_eq!(1, report.root.unwrap().leaf_count());
    }
}
