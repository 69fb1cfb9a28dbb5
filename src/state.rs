//! Controller-side bookkeeping. Nothing here locks: the apps own these
//! values behind their own mutexes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::packet::MacAddr;

/// Round-robin cursor over a backend pool, by index.
///
/// `next` is the backend the following client ARP is answered with;
/// `current` is the backend bound to the flows installed for that ARP.
/// Both always index into the pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RoundRobin {
    len: usize,
    next: usize,
    current: usize,
}

/// Backends picked for one client ARP.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Assignment {
    /// Whose MAC answers the ARP.
    pub reply: usize,
    /// Whose address the installed flows rewrite to.
    pub flow: usize,
}

impl RoundRobin {
    /// A cursor over `len` backends starting at `start`. `None` when
    /// `start` is outside the pool.
    pub fn new(len: usize, start: usize) -> Option<RoundRobin> {
        if start < len {
            Some(RoundRobin {
                len: len,
                next: start,
                current: start,
            })
        } else {
            None
        }
    }

    pub fn next(&self) -> usize {
        self.next
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Step once for a client ARP. The flow binding is the one left by the
    /// previous step; `current` then follows the advanced `next`.
    pub fn advance(&mut self) -> Assignment {
        let flow = self.current;
        let reply = self.next;
        self.next = (self.next + 1) % self.len;
        self.current = self.next;
        Assignment {
            reply: reply,
            flow: flow,
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct Learned {
    port: u16,
    at: Instant,
}

/// Per-switch map from source MAC to the port it was last seen on.
///
/// Entries are overwritten unconditionally and, unless a TTL is set, never
/// evicted.
#[derive(Debug, Default)]
pub struct LearningTable {
    ttl: Option<Duration>,
    switches: HashMap<u64, HashMap<MacAddr, Learned>>,
}

impl LearningTable {
    pub fn new(ttl: Option<Duration>) -> LearningTable {
        LearningTable {
            ttl: ttl,
            switches: HashMap::new(),
        }
    }

    fn fresh(&self, entry: &Learned, now: Instant) -> bool {
        match self.ttl {
            None => true,
            Some(ttl) => now.saturating_duration_since(entry.at) < ttl,
        }
    }

    /// Record `mac` behind `port` on switch `sw`. Returns the port previously
    /// learned for it, if it differs.
    pub fn learn(&mut self, sw: u64, mac: MacAddr, port: u16, now: Instant) -> Option<u16> {
        let ttl = self.ttl;
        let hosts = self.switches.entry(sw).or_insert_with(HashMap::new);
        if let Some(ttl) = ttl {
            hosts.retain(|_, e| now.saturating_duration_since(e.at) < ttl);
        }
        let previous = hosts.insert(mac,
                                    Learned {
                                        port: port,
                                        at: now,
                                    });
        previous.map(|e| e.port).filter(|&p| p != port)
    }

    pub fn port_of(&self, sw: u64, mac: MacAddr, now: Instant) -> Option<u16> {
        self.switches
            .get(&sw)
            .and_then(|hosts| hosts.get(&mac))
            .filter(|e| self.fresh(e, now))
            .map(|e| e.port)
    }

    /// Number of MACs held for switch `sw`, stale ones included.
    #[cfg(test)]
    fn len(&self, sw: u64) -> usize {
        self.switches.get(&sw).map_or(0, |hosts| hosts.len())
    }
}
