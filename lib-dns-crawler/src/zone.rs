use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;

use dns_types::protocol::types::*;

/// One authoritative server for a zone.  The IP is absent when the
/// server was named by a delegation without glue and has not been
/// resolved yet.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NameServer {
    pub domain: DomainName,
    pub ip: Option<Ipv4Addr>,
}

impl NameServer {
    /// The deduplication key for harvested servers.
    pub fn key(&self) -> String {
        match self.ip {
            Some(ip) => format!("{}/{ip}", self.domain),
            None => format!("{}/", self.domain),
        }
    }
}

impl fmt::Display for NameServer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.ip {
            Some(ip) => write!(f, "{}({ip})", self.domain),
            None => write!(f, "{}(-)", self.domain),
        }
    }
}

/// An authoritative zone descriptor: the servers known to hold
/// authority over a zone, plus the NS and glue records which
/// established it.
///
/// Server and hostname lists keep insertion order, so server
/// selection is deterministic given the order records arrived in.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ZoneServers {
    zone: DomainName,
    servers: Vec<NameServer>,
    server_ips: HashSet<u32>,
    unresolved: Vec<DomainName>,
    unresolved_names: HashSet<DomainName>,
    records: Vec<ResourceRecord>,
}

impl ZoneServers {
    pub fn new(zone: DomainName) -> Self {
        Self {
            zone,
            servers: Vec::new(),
            server_ips: HashSet::new(),
            unresolved: Vec::new(),
            unresolved_names: HashSet::new(),
            records: Vec::new(),
        }
    }

    pub fn zone(&self) -> &DomainName {
        &self.zone
    }

    /// Whether this zone is authoritative territory for the given
    /// name (the name is equal to or below the zone apex).
    pub fn serves(&self, domain: &DomainName) -> bool {
        domain.is_subdomain_of(&self.zone)
    }

    /// Servers with resolved glue, in insertion order.
    pub fn servers(&self) -> &[NameServer] {
        &self.servers
    }

    /// Server hostnames still lacking glue, in insertion order.
    pub fn unresolved(&self) -> &[DomainName] {
        &self.unresolved
    }

    /// The NS and glue records that established this zone.
    pub fn records(&self) -> &[ResourceRecord] {
        &self.records
    }

    pub fn has_glue(&self) -> bool {
        !self.servers.is_empty()
    }

    /// Add a server with a known address, deduplicated by address.
    /// A hostname previously recorded as unresolved is promoted.
    pub fn add_server(&mut self, domain: DomainName, ip: Ipv4Addr) {
        if self.server_ips.insert(u32::from(ip)) {
            self.servers.push(NameServer {
                domain: domain.clone(),
                ip: Some(ip),
            });
        }
        if self.unresolved_names.remove(&domain) {
            self.unresolved.retain(|d| *d != domain);
        }
    }

    /// Record a server hostname with no glue, unless an address for
    /// it is already known.
    pub fn add_unresolved(&mut self, domain: DomainName) {
        if self.servers.iter().any(|ns| ns.domain == domain) {
            return;
        }
        if self.unresolved_names.insert(domain.clone()) {
            self.unresolved.push(domain);
        }
    }

    pub fn add_record(&mut self, rr: ResourceRecord) {
        self.records.push(rr);
    }
}

/// The 13 root servers, the default starting zone of every descent.
pub fn root_zone() -> ZoneServers {
    const ROOTS: [(&str, [u8; 4]); 13] = [
        ("a.root-servers.net.", [198, 41, 0, 4]),
        ("b.root-servers.net.", [199, 9, 14, 201]),
        ("c.root-servers.net.", [192, 33, 4, 12]),
        ("d.root-servers.net.", [199, 7, 91, 13]),
        ("e.root-servers.net.", [192, 203, 230, 10]),
        ("f.root-servers.net.", [192, 5, 5, 241]),
        ("g.root-servers.net.", [192, 112, 36, 4]),
        ("h.root-servers.net.", [198, 97, 190, 53]),
        ("i.root-servers.net.", [192, 36, 148, 17]),
        ("j.root-servers.net.", [192, 58, 128, 30]),
        ("k.root-servers.net.", [193, 0, 14, 129]),
        ("l.root-servers.net.", [199, 7, 83, 42]),
        ("m.root-servers.net.", [202, 12, 27, 33]),
    ];

    let mut zone = ZoneServers::new(DomainName::root_domain());
    for (name, ip) in ROOTS {
        let domain = DomainName::from_dotted_string(name).expect("hard-coded root server name");
        zone.add_server(domain, Ipv4Addr::from(ip));
    }
    zone
}

/// Build the deepest delegation for `target` out of a packet's
/// authority NS records, resolving glue from the additional section.
/// Ties between equally deep NS owners keep the first one in
/// authority-section order.
pub fn extract_servers(packet: &Message, target: &DomainName) -> Option<ZoneServers> {
    let mut best: Option<DomainName> = None;
    for rr in &packet.authority {
        if let RecordTypeWithData::NS { .. } = rr.rtype_with_data {
            if target.is_subdomain_of(&rr.name) {
                match &best {
                    Some(b) if rr.name.depth() <= b.depth() => {}
                    _ => best = Some(rr.name.clone()),
                }
            }
        }
    }

    let zone_name = best?;
    let mut zone = ZoneServers::new(zone_name.clone());
    for rr in &packet.authority {
        if rr.name != zone_name {
            continue;
        }
        if let RecordTypeWithData::NS { nsdname } = &rr.rtype_with_data {
            zone.add_record(rr.clone());
            let mut glued = false;
            for ar in &packet.additional {
                if ar.name != *nsdname {
                    continue;
                }
                if let RecordTypeWithData::A { address } = &ar.rtype_with_data {
                    zone.add_server(nsdname.clone(), *address);
                    zone.add_record(ar.clone());
                    glued = true;
                }
            }
            if !glued {
                zone.add_unresolved(nsdname.clone());
            }
        }
    }

    Some(zone)
}
