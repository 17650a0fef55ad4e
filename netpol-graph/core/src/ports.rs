use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// An L4 protocol, as named by a network policy port.
///
/// `Unset` only occurs as part of the global wildcard descriptor; a specific
/// port must always carry a protocol.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
pub enum Protocol {
    #[default]
    Unset,
    Tcp,
    Udp,
    Sctp,
}

/// A (protocol, port) pair.
///
/// `port == 0` means "all ports of the protocol"; the zero descriptor (unset
/// protocol, port 0) means "all ports, all protocols". An unset protocol with
/// a nonzero port is invalid and dropped during normalization.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
pub struct PortDesc {
    pub protocol: Protocol,
    pub port: u16,
}

/// An ordered, subsumption-reduced collection of port descriptors.
///
/// The empty set means "no ports" (an edge carrying it is dropped), which is
/// distinct from the wildcard set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PortSet(Vec<PortDesc>);

// === PortDesc ===

impl PortDesc {
    /// All ports, all protocols.
    pub const ALL: Self = Self {
        protocol: Protocol::Unset,
        port: 0,
    };

    pub fn new(protocol: Protocol, port: u16) -> Self {
        Self { protocol, port }
    }

    fn is_valid(&self) -> bool {
        self.protocol != Protocol::Unset || self.port == 0
    }
}

// === PortSet ===

impl PortSet {
    /// The wildcard set permitting all ports of all protocols.
    pub fn all() -> Self {
        Self(vec![PortDesc::ALL])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_wildcard(&self) -> bool {
        self.0.as_slice() == [PortDesc::ALL]
    }

    pub fn push(&mut self, desc: PortDesc) {
        self.0.push(desc);
    }

    pub fn iter(&self) -> impl Iterator<Item = PortDesc> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[PortDesc] {
        &self.0
    }

    /// Sorts, deduplicates, and subsumption-reduces the set.
    ///
    /// Descriptors made redundant by a more permissive one for the same
    /// protocol are removed; the global wildcard collapses the set to a single
    /// element. Invalid descriptors are dropped. The result is the same for
    /// any input ordering, and normalization is idempotent.
    pub fn normalize(&mut self) {
        let mut descs = std::mem::take(&mut self.0);
        descs.sort_unstable();
        descs.dedup();

        let mut out: Vec<PortDesc> = Vec::with_capacity(descs.len());
        for desc in descs {
            if desc == PortDesc::ALL {
                // The wildcard sorts first; nothing else matters.
                self.0 = vec![PortDesc::ALL];
                return;
            }
            if !desc.is_valid() {
                continue;
            }
            if let Some(last) = out.last() {
                if last.protocol == desc.protocol && last.port == 0 {
                    continue;
                }
            }
            out.push(desc);
        }
        self.0 = out;
    }
}

impl Extend<PortDesc> for PortSet {
    fn extend<T: IntoIterator<Item = PortDesc>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl FromIterator<PortDesc> for PortSet {
    fn from_iter<T: IntoIterator<Item = PortDesc>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Intersects two normalized port sets, producing a normalized set.
///
/// Both inputs must already be normalized. The operation is commutative, and
/// the wildcard set is its identity element.
pub fn intersect_normalized(a: &PortSet, b: &PortSet) -> PortSet {
    if a.is_wildcard() {
        return b.clone();
    }
    if b.is_wildcard() {
        return a.clone();
    }

    let (a, b) = (a.as_slice(), b.as_slice());
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::new();
    while i < a.len() && j < b.len() {
        let (x, y) = (a[i], b[j]);
        match x.protocol.cmp(&y.protocol) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                if x.port == 0 {
                    // `x` covers every port of the protocol, so `y` survives.
                    out.push(y);
                    j += 1;
                    if y.port == 0 {
                        i += 1;
                    }
                } else if y.port == 0 {
                    out.push(x);
                    i += 1;
                } else {
                    match x.port.cmp(&y.port) {
                        Ordering::Less => i += 1,
                        Ordering::Greater => j += 1,
                        Ordering::Equal => {
                            out.push(x);
                            i += 1;
                            j += 1;
                        }
                    }
                }
            }
        }
    }
    PortSet(out)
}
