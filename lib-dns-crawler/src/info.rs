use async_trait::async_trait;
use std::collections::HashSet;

use dns_types::protocol::types::*;

use crate::ips::Ips;
use crate::printer::Printer;
use crate::recur::Recur;
use crate::registrar::is_registrar;
use crate::term::{Cursor, Task};
use crate::util::types::TermError;
use crate::zone::{NameServer, ZoneServers};

/// The auxiliary record types harvested from every discovered zone,
/// queried in this order.
pub const INFO_TYPES: [RecordType; 4] = [
    RecordType::NS,
    RecordType::MX,
    RecordType::SOA,
    RecordType::TXT,
];

/// The whole-domain report: chase the addresses, then walk every
/// zone the chase visited and harvest its servers and its NS / MX /
/// SOA / TXT records.  Everything is deduplicated - records by
/// digest, servers by key, zones by name - in first-seen order.
pub struct Info {
    pub domain: DomainName,
    pub start_with: Option<ZoneServers>,
    pub headless: bool,
    /// Skip the zones of child chases.
    pub shallow: bool,
    pub hide_result: bool,

    pub end_with: Option<ZoneServers>,

    pub cnames: Vec<ResourceRecord>,
    pub results: Vec<ResourceRecord>,

    pub records: Vec<ResourceRecord>,
    record_digests: HashSet<String>,

    pub name_servers: Vec<NameServer>,
    server_keys: HashSet<String>,

    pub zones: Vec<ZoneServers>,
    zone_names: HashSet<DomainName>,
}

impl Info {
    pub fn new(domain: DomainName) -> Self {
        Self {
            domain,
            start_with: None,
            headless: false,
            shallow: false,
            hide_result: false,
            end_with: None,
            cnames: Vec::new(),
            results: Vec::new(),
            records: Vec::new(),
            record_digests: HashSet::new(),
            name_servers: Vec::new(),
            server_keys: HashSet::new(),
            zones: Vec::new(),
            zone_names: HashSet::new(),
        }
    }

    fn append_all(&mut self, rrs: &[ResourceRecord]) {
        for rr in rrs {
            if self.record_digests.insert(rr.digest()) {
                self.records.push(rr.clone());
            }
        }
    }

    fn collect_zones(&mut self, ips: &Ips) {
        self.collect_zones_of(ips);

        if self.shallow {
            return;
        }
        for (_, child) in &ips.cname_ips {
            self.collect_zones_of(child);
        }
    }

    fn collect_zones_of(&mut self, ips: &Ips) {
        for zone in &ips.zones {
            if is_registrar(zone.zone()) {
                continue;
            }

            for server in zone.servers() {
                if server.ip.is_none() {
                    continue;
                }
                if self.server_keys.insert(server.key()) {
                    self.name_servers.push(server.clone());
                }
            }

            self.append_all(zone.records());

            if self.zone_names.insert(zone.zone().clone()) {
                self.zones.push(zone.clone());
            }
        }
    }

    async fn query_zone(
        &mut self,
        zone: &ZoneServers,
        c: &mut Cursor<'_>,
    ) -> Result<(), TermError> {
        for qtype in INFO_TYPES {
            let mut recur = Recur::with_qtype(zone.zone().clone(), qtype);
            recur.start_with = Some(zone.clone());
            c.t(&mut recur).await?;
            let answers = std::mem::take(&mut recur.answers);
            self.append_all(&answers);
        }
        Ok(())
    }

    async fn aggregate(&mut self, c: &mut Cursor<'_>) -> Result<Ips, TermError> {
        let mut ips = Ips::new(self.domain.clone());
        ips.start_with = self.start_with.clone();
        ips.hide_result = true;
        c.t(&mut ips).await?;

        self.end_with = ips.end_with.clone();
        let (cnames, results) = ips.results();
        self.cnames = cnames.clone();
        self.results = results.clone();

        self.append_all(&cnames);
        self.append_all(&results);

        self.collect_zones(&ips);

        for zone in self.zones.clone() {
            self.query_zone(&zone, c).await?;
        }

        Ok(ips)
    }

    /// The printed report, exactly what the crawler writes to the
    /// `out/` entry.
    pub fn render(&self) -> String {
        let mut p = Printer::new();
        p.print(format!("// {}", self.domain));
        p.print(format!("info {} {{", self.domain));
        p.shift_in();

        if !self.cnames.is_empty() {
            p.print("cnames {");
            p.shift_in();
            for rr in &self.cnames {
                if let RecordTypeWithData::CNAME { cname } = &rr.rtype_with_data {
                    p.print(format!("{} -> {}", rr.name, cname));
                }
            }
            p.shift_out("}");
        }

        if self.results.is_empty() {
            p.print("(unresolvable)");
        } else {
            p.print("ips {");
            p.shift_in();
            for rr in &self.results {
                if let RecordTypeWithData::A { address } = &rr.rtype_with_data {
                    if rr.name == self.domain {
                        p.print(format!("{address}"));
                    } else {
                        p.print(format!("{address}({})", rr.name));
                    }
                }
            }
            p.shift_out("}");
        }

        if !self.name_servers.is_empty() {
            p.print("servers {");
            p.shift_in();
            for server in &self.name_servers {
                p.print(format!("{server}"));
            }
            p.shift_out("}");
        }

        if !self.records.is_empty() {
            p.print("records {");
            p.shift_in();
            for rr in &self.records {
                p.print(rr.digest());
            }
            p.shift_out("}");
        }

        p.shift_out("}");
        p.into_string()
    }
}

#[async_trait]
impl Task for Info {
    fn name(&self) -> String {
        format!("info {}", self.domain)
    }

    async fn run(&mut self, c: &mut Cursor<'_>) -> Result<(), TermError> {
        if !self.headless {
            c.print(format!("info {} {{", self.domain));
            c.shift_in();
        }

        let result = self.aggregate(c).await;

        match &result {
            Ok(ips) if !self.hide_result => {
                ips.print_result(c);

                if !self.name_servers.is_empty() {
                    c.blank();
                    for server in &self.name_servers {
                        c.print(format!("// {server}"));
                    }
                }
                if !self.records.is_empty() {
                    c.blank();
                    for rr in &self.records {
                        c.print(format!("// {}", rr.digest()));
                    }
                }
            }
            _ => {}
        }

        if !self.headless {
            c.shift_out("}");
        }
        result.map(|_| ())
    }
}
