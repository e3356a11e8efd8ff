//! IPv4 address blocks and subnet carving.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 CIDR block: base address plus prefix length.
///
/// The base address must be the network address of the block (no host bits
/// set), so `10.0.1.0/24` parses and `10.0.1.7/24` does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CidrBlock {
    base: u32,
    prefix: u8,
}

impl CidrBlock {
    /// Creates a block from a base address and prefix length.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the prefix exceeds 32 or the
    /// base address has host bits set.
    pub fn new(base: Ipv4Addr, prefix: u8) -> Result<Self, String> {
        if prefix > 32 {
            return Err(format!("prefix length {prefix} is outside 0..=32"));
        }
        let base = u32::from(base);
        let block = Self { base, prefix };
        if base & !block.mask() != 0 {
            return Err(format!(
                "host bits set; did you mean {}?",
                Self {
                    base: base & block.mask(),
                    prefix
                }
            ));
        }
        Ok(block)
    }

    /// Returns the network address.
    #[must_use]
    pub fn address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base)
    }

    /// Returns the prefix length.
    #[must_use]
    pub const fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Returns the number of addresses in the block.
    #[must_use]
    pub const fn size(&self) -> u64 {
        1u64 << (32 - self.prefix as u32)
    }

    /// First address as an integer.
    #[must_use]
    pub const fn first(&self) -> u64 {
        self.base as u64
    }

    /// One past the last address, as an integer.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.first() + self.size()
    }

    /// Returns true if `other` lies entirely within this block.
    #[must_use]
    pub const fn contains(&self, other: &Self) -> bool {
        other.first() >= self.first() && other.end() <= self.end()
    }

    /// Returns true if the two blocks share any address.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.first() < other.end() && other.first() < self.end()
    }

    const fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix as u32)
        }
    }
}

impl FromStr for CidrBlock {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| String::from("expected <address>/<prefix>"))?;
        let addr: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|_| format!("'{addr}' is not an IPv4 address"))?;
        let prefix: u8 = prefix
            .trim()
            .parse()
            .map_err(|_| format!("'{prefix}' is not a prefix length"))?;
        Self::new(addr, prefix)
    }
}

impl TryFrom<String> for CidrBlock {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<CidrBlock> for String {
    fn from(block: CidrBlock) -> Self {
        block.to_string()
    }
}

impl fmt::Display for CidrBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address(), self.prefix)
    }
}

/// How a subnet asks for its address block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRequest {
    /// A fixed block, taken as declared.
    Explicit(CidrBlock),
    /// A block of the given prefix length, carved automatically.
    Mask(u8),
    /// An even share of whatever space remains.
    Share,
}

/// Carves subnet blocks out of a network block.
///
/// Explicit blocks are taken as declared and are never checked here;
/// containment and overlap are structural checks done on the built graph.
/// Masked requests are carved in declaration order, each aligned to its own
/// size and skipping any explicit block. Share requests then split the free
/// space after the last carved block (explicit blocks excluded) evenly, using
/// the largest power-of-two block that fits.
///
/// # Errors
///
/// Returns the index of the first request that cannot be satisfied and a
/// description of why.
pub fn allocate(
    network: CidrBlock,
    requests: &[BlockRequest],
) -> Result<Vec<CidrBlock>, (usize, String)> {
    let fixed: Vec<CidrBlock> = requests
        .iter()
        .filter_map(|r| match r {
            BlockRequest::Explicit(block) => Some(*block),
            _ => None,
        })
        .collect();

    let mut carver = Carver {
        network,
        cursor: network.first(),
        taken: fixed,
    };
    let mut blocks: Vec<Option<CidrBlock>> = vec![None; requests.len()];

    for (i, request) in requests.iter().enumerate() {
        match request {
            BlockRequest::Explicit(block) => blocks[i] = Some(*block),
            BlockRequest::Mask(prefix) => {
                if *prefix > 32 {
                    return Err((i, format!("cidr_mask {prefix} is outside 0..=32")));
                }
                if *prefix < network.prefix() {
                    return Err((
                        i,
                        format!("a /{prefix} does not fit in network {network}"),
                    ));
                }
                blocks[i] = Some(carver.carve(*prefix).ok_or_else(|| {
                    (i, format!("no room left in {network} for a /{prefix}"))
                })?);
            }
            BlockRequest::Share => {}
        }
    }

    let shared: Vec<usize> = requests
        .iter()
        .enumerate()
        .filter(|(_, r)| matches!(r, BlockRequest::Share))
        .map(|(i, _)| i)
        .collect();

    if let Some(&first_shared) = shared.first() {
        let per_subnet = carver.free_space() / shared.len() as u64;
        let mut prefix = share_prefix(per_subnet).ok_or_else(|| {
            (
                first_shared,
                format!("no room left in {network} to share among {} subnets", shared.len()),
            )
        })?;
        // Alignment around explicit blocks can leave the even share short;
        // step down one prefix at a time until every share fits.
        let carved = loop {
            let mut attempt = carver.clone();
            let carved: Option<Vec<CidrBlock>> =
                shared.iter().map(|_| attempt.carve(prefix)).collect();
            match carved {
                Some(carved) => break carved,
                None if prefix < 32 => prefix += 1,
                None => {
                    return Err((
                        first_shared,
                        format!("no room left in {network} for a /{prefix}"),
                    ));
                }
            }
        };
        for (i, block) in shared.into_iter().zip(carved) {
            blocks[i] = Some(block);
        }
    }

    blocks
        .into_iter()
        .enumerate()
        .map(|(i, b)| b.ok_or_else(|| (i, String::from("no block allocated"))))
        .collect()
}

/// Largest power-of-two block (as a prefix length) not exceeding `size`.
fn share_prefix(size: u64) -> Option<u8> {
    if size == 0 {
        return None;
    }
    let bits = 63 - size.leading_zeros();
    u8::try_from(32u32.saturating_sub(bits)).ok()
}

#[derive(Clone)]
struct Carver {
    network: CidrBlock,
    cursor: u64,
    taken: Vec<CidrBlock>,
}

impl Carver {
    /// Addresses after the cursor not covered by a taken block.
    fn free_space(&self) -> u64 {
        let end = self.network.end();
        let taken: u64 = self
            .taken
            .iter()
            .map(|t| t.end().min(end).saturating_sub(t.first().max(self.cursor)))
            .sum();
        end.saturating_sub(self.cursor).saturating_sub(taken)
    }

    fn carve(&mut self, prefix: u8) -> Option<CidrBlock> {
        let size = 1u64 << (32 - u32::from(prefix));
        let mut start = align_up(self.cursor, size);

        while start + size <= self.network.end() {
            let candidate = CidrBlock {
                base: u32::try_from(start).ok()?,
                prefix,
            };
            match self.taken.iter().find(|t| t.overlaps(&candidate)) {
                Some(blocker) => start = align_up(blocker.end(), size),
                None => {
                    self.cursor = candidate.end();
                    self.taken.push(candidate);
                    return Some(candidate);
                }
            }
        }
        None
    }
}

const fn align_up(value: u64, size: u64) -> u64 {
    value.div_ceil(size) * size
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr(s: &str) -> CidrBlock {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let block = cidr("10.0.0.0/21");
        assert_eq!(block.prefix(), 21);
        assert_eq!(block.size(), 2048);
        assert_eq!(block.to_string(), "10.0.0.0/21");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("10.0.0.0".parse::<CidrBlock>().is_err());
        assert!("10.0.0.0/33".parse::<CidrBlock>().is_err());
        assert!("10.0.0.300/24".parse::<CidrBlock>().is_err());
        assert!("10.0.1.7/24".parse::<CidrBlock>().is_err());
    }

    #[test]
    fn test_contains_and_overlaps() {
        let network = cidr("10.0.0.0/21");
        assert!(network.contains(&cidr("10.0.2.0/28")));
        assert!(!network.contains(&cidr("10.0.8.0/24")));
        assert!(cidr("10.0.0.0/23").overlaps(&cidr("10.0.1.0/24")));
        assert!(!cidr("10.0.0.0/24").overlaps(&cidr("10.0.1.0/24")));
    }

    #[test]
    fn test_allocate_masks_in_order() {
        let blocks = allocate(
            cidr("10.0.0.0/21"),
            &[
                BlockRequest::Mask(24),
                BlockRequest::Mask(24),
                BlockRequest::Mask(28),
            ],
        )
        .unwrap();

        assert_eq!(blocks[0], cidr("10.0.0.0/24"));
        assert_eq!(blocks[1], cidr("10.0.1.0/24"));
        assert_eq!(blocks[2], cidr("10.0.2.0/28"));
    }

    #[test]
    fn test_allocate_aligns_after_small_block() {
        let blocks = allocate(
            cidr("10.0.0.0/16"),
            &[BlockRequest::Mask(28), BlockRequest::Mask(24)],
        )
        .unwrap();

        assert_eq!(blocks[0], cidr("10.0.0.0/28"));
        assert_eq!(blocks[1], cidr("10.0.1.0/24"));
    }

    #[test]
    fn test_allocate_skips_explicit_blocks() {
        let blocks = allocate(
            cidr("10.0.0.0/22"),
            &[
                BlockRequest::Explicit(cidr("10.0.0.0/24")),
                BlockRequest::Mask(24),
            ],
        )
        .unwrap();

        assert_eq!(blocks[1], cidr("10.0.1.0/24"));
    }

    #[test]
    fn test_allocate_shares_remaining_space() {
        let blocks = allocate(
            cidr("10.0.0.0/22"),
            &[
                BlockRequest::Mask(24),
                BlockRequest::Share,
                BlockRequest::Share,
            ],
        )
        .unwrap();

        // 768 addresses left for two subnets: 384 each, rounded down to 256.
        assert_eq!(blocks[1], cidr("10.0.1.0/24"));
        assert_eq!(blocks[2], cidr("10.0.2.0/24"));
    }

    #[test]
    fn test_allocate_share_excludes_explicit_blocks() {
        let blocks = allocate(
            cidr("10.0.0.0/22"),
            &[
                BlockRequest::Explicit(cidr("10.0.2.0/24")),
                BlockRequest::Share,
                BlockRequest::Share,
            ],
        )
        .unwrap();

        assert_eq!(blocks[0], cidr("10.0.2.0/24"));
        assert_eq!(blocks[1], cidr("10.0.0.0/24"));
        assert_eq!(blocks[2], cidr("10.0.1.0/24"));
    }

    #[test]
    fn test_allocate_share_steps_down_around_explicit_blocks() {
        // 128 free addresses, but split into two /26 halves by the explicit
        // blocks, so no aligned /25 exists.
        let blocks = allocate(
            cidr("10.0.0.0/24"),
            &[
                BlockRequest::Explicit(cidr("10.0.0.64/26")),
                BlockRequest::Explicit(cidr("10.0.0.128/26")),
                BlockRequest::Share,
            ],
        )
        .unwrap();

        assert_eq!(blocks[2], cidr("10.0.0.0/26"));
    }

    #[test]
    fn test_allocate_out_of_space() {
        let err = allocate(
            cidr("10.0.0.0/24"),
            &[BlockRequest::Mask(25), BlockRequest::Mask(25), BlockRequest::Mask(25)],
        )
        .unwrap_err();
        assert_eq!(err.0, 2);

        let err = allocate(cidr("10.0.0.0/24"), &[BlockRequest::Mask(16)]).unwrap_err();
        assert_eq!(err.0, 0);
    }
}
