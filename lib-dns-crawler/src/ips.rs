use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use dns_types::protocol::types::*;

use crate::recur::Recur;
use crate::term::{Cursor, Task};
use crate::util::types::{Outcome, TermError};
use crate::zone::{extract_servers, ZoneServers};

const LOCK_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] cname trace lock poisoned, cannot recover from this - aborting";

/// The CNAME back-trace shared across one whole chase tree: each
/// alias target maps to the name that pointed at it, and the
/// original query domain maps to nothing.  Its only job is cycle
/// prevention - an edge is inserted only when the target is absent -
/// which keeps the graph a forest rooted at the query domain.
pub type CnameTraceBack = Arc<Mutex<HashMap<DomainName, Option<DomainName>>>>;

/// The A-record chase: resolve a domain, follow any CNAMEs inside
/// the authoritative reply, and spawn child chases for alias targets
/// the reply could not resolve.  Children share the parent's
/// trace-back map.
pub struct Ips {
    pub domain: DomainName,
    pub start_with: Option<ZoneServers>,
    pub headless: bool,
    pub hide_result: bool,

    // inherited from the underlying delegation walk
    pub outcome: Outcome,
    pub packet: Option<Message>,
    pub end_with: Option<ZoneServers>,
    pub zones: Vec<ZoneServers>,

    pub cname_trace_back: Option<CnameTraceBack>,

    /// Alias targets with no CNAME of their own in the final packet.
    pub cname_endpoints: Vec<DomainName>,
    /// Child chases for endpoints the packet did not resolve, in
    /// endpoint order.
    pub cname_ips: Vec<(DomainName, Ips)>,

    /// CNAME records accepted into the trace.
    pub cname_records: Vec<ResourceRecord>,
    /// A records found for this chase's names, in packet order.
    pub records: Vec<ResourceRecord>,
}

impl Ips {
    pub fn new(domain: DomainName) -> Self {
        Self {
            domain,
            start_with: None,
            headless: false,
            hide_result: false,
            outcome: Outcome::Okay,
            packet: None,
            end_with: None,
            zones: Vec::new(),
            cname_trace_back: None,
            cname_endpoints: Vec::new(),
            cname_ips: Vec::new(),
            cname_records: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Flatten the CNAME records and A records of the whole chase
    /// tree, pre-order.
    pub fn results(&self) -> (Vec<ResourceRecord>, Vec<ResourceRecord>) {
        let mut cnames = Vec::new();
        let mut records = Vec::new();
        self.collect(&mut cnames, &mut records);
        (cnames, records)
    }

    fn collect(&self, cnames: &mut Vec<ResourceRecord>, records: &mut Vec<ResourceRecord>) {
        cnames.extend_from_slice(&self.cname_records);
        records.extend_from_slice(&self.records);
        for (_, child) in &self.cname_ips {
            child.collect(cnames, records);
        }
    }

    pub fn print_result(&self, c: &mut Cursor<'_>) {
        let (cnames, records) = self.results();
        for rr in &cnames {
            if let RecordTypeWithData::CNAME { cname } = &rr.rtype_with_data {
                c.print(format!("// {} -> {}", rr.name, cname));
            }
        }
        for rr in &records {
            if let RecordTypeWithData::A { address } = &rr.rtype_with_data {
                c.print(format!("// {}({address})", rr.name));
            }
        }
    }

    async fn chase(&mut self, c: &mut Cursor<'_>) -> Result<(), TermError> {
        let mut recur = Recur::new(self.domain.clone());
        recur.headless = true;
        recur.start_with = self.start_with.clone();
        c.t(&mut recur).await?;

        self.outcome = recur.outcome;
        self.packet = recur.packet.take();
        self.end_with = recur.end_with.take();
        self.zones = std::mem::take(&mut recur.zones);

        // a failed walk localises here: this chase has no results,
        // sibling chases are unaffected
        if !self.outcome.is_okay() {
            return Ok(());
        }

        for rr in &recur.answers {
            match rr.rtype() {
                RecordType::A => self.records.push(rr.clone()),
                RecordType::CNAME => {}
                other => {
                    return Err(TermError::Internal(format!(
                        "{other} record in an address answer for {}",
                        self.domain
                    )));
                }
            }
        }

        let trace_back = match &self.cname_trace_back {
            Some(shared) => {
                if !shared
                    .lock()
                    .expect(LOCK_POISON_MESSAGE)
                    .contains_key(&self.domain)
                {
                    return Err(TermError::Internal(format!(
                        "chase target {} missing from the cname trace",
                        self.domain
                    )));
                }
                Arc::clone(shared)
            }
            None => {
                let mut map = HashMap::new();
                map.insert(self.domain.clone(), None);
                let shared = Arc::new(Mutex::new(map));
                self.cname_trace_back = Some(Arc::clone(&shared));
                shared
            }
        };

        let (Some(packet), Some(end_with)) = (self.packet.clone(), self.end_with.clone()) else {
            return Err(TermError::Internal(format!(
                "walk for {} finished okay without a packet",
                self.domain
            )));
        };

        let owner = self.domain.clone();
        if !self.extract_cnames(&packet, &owner, &end_with, &trace_back, c)? {
            return Ok(());
        }

        if self.cname_endpoints.is_empty() {
            return Err(TermError::Internal(format!(
                "cname extraction for {} left no endpoints",
                self.domain
            )));
        }

        // endpoints whose addresses are already in the packet need
        // no further work
        let mut seen: HashSet<String> = self.records.iter().map(ResourceRecord::digest).collect();
        let mut unresolved = Vec::new();
        for endpoint in self.cname_endpoints.clone() {
            let mut found = false;
            for rr in &packet.answers {
                if rr.name == endpoint && rr.rtype() == RecordType::A {
                    found = true;
                    if seen.insert(rr.digest()) {
                        self.records.push(rr.clone());
                    }
                }
            }
            if !found {
                unresolved.push(endpoint);
            }
        }

        for endpoint in unresolved {
            // the most specific starting zone on offer: a deeper
            // referral inside the final packet, the final zone
            // itself, the zone this chase started from, or failing
            // all of those, the root
            let start = extract_servers(&packet, &endpoint)
                .or_else(|| {
                    if end_with.serves(&endpoint) {
                        Some(end_with.clone())
                    } else {
                        None
                    }
                })
                .or_else(|| {
                    self.start_with
                        .as_ref()
                        .filter(|zone| zone.serves(&endpoint))
                        .cloned()
                });

            let mut child = Ips::new(endpoint.clone());
            child.hide_result = true;
            child.start_with = start;
            child.cname_trace_back = Some(Arc::clone(&trace_back));
            c.t(&mut child).await?;
            self.cname_ips.push((endpoint, child));
        }

        Ok(())
    }

    /// Walk the CNAME chain for `owner` inside the final packet,
    /// inserting accepted edges into the trace.  Returns whether any
    /// endpoint was discovered below `owner`.
    fn extract_cnames(
        &mut self,
        packet: &Message,
        owner: &DomainName,
        end_with: &ZoneServers,
        trace_back: &CnameTraceBack,
        c: &mut Cursor<'_>,
    ) -> Result<bool, TermError> {
        if !trace_back
            .lock()
            .expect(LOCK_POISON_MESSAGE)
            .contains_key(owner)
        {
            return Err(TermError::Internal(format!(
                "{owner} missing from the cname trace"
            )));
        }

        // records about names outside the answering zone's authority
        // cannot be trusted
        if !end_with.serves(owner) {
            return Ok(false);
        }

        let rrs: Vec<ResourceRecord> = packet
            .answers
            .iter()
            .filter(|rr| {
                rr.name == *owner && matches!(rr.rtype_with_data, RecordTypeWithData::CNAME { .. })
            })
            .cloned()
            .collect();

        let mut found = false;
        for rr in rrs {
            let RecordTypeWithData::CNAME { cname } = &rr.rtype_with_data else {
                continue;
            };
            let target = cname.clone();

            {
                let mut map = trace_back.lock().expect(LOCK_POISON_MESSAGE);
                if map.contains_key(&target) {
                    // the target is already on the graph; accepting
                    // this edge would close a cycle
                    c.print(format!("// cname edge dropped: {owner} -> {target}"));
                    continue;
                }
                map.insert(target.clone(), Some(owner.clone()));
            }

            c.print(format!("// cname: {owner} -> {target}"));
            self.cname_records.push(rr.clone());

            if self.extract_cnames(packet, &target, end_with, trace_back, c)? {
                found = true;
                continue;
            }

            c.print(format!("// cname endpoint: {target}"));
            self.cname_endpoints.push(target);
            found = true;
        }

        Ok(found)
    }
}

#[async_trait]
impl Task for Ips {
    fn name(&self) -> String {
        format!("ips {}", self.domain)
    }

    async fn run(&mut self, c: &mut Cursor<'_>) -> Result<(), TermError> {
        if !self.headless {
            c.print(format!("ips {} {{", self.domain));
            c.shift_in();
        }

        let result = self.chase(c).await;

        if result.is_ok() && !self.hide_result {
            self.print_result(c);
        }
        if !self.headless {
            c.shift_out("}");
        }
        result
    }
}
