//! Height- and deployment-gated rule resolution.
//!
//! [`block_verification_flags`] maps a chain position to the immutable flag
//! set that is mandatory for validating the block at that position: the early
//! soft forks switch on at fixed times or heights, the later ones when their
//! versionbits deployment reaches `Active`. The contextual header checks that
//! accompany block acceptance live here as well.

use core::fmt;

use bitcoin::block::Header;

use crate::params::{DeploymentPos, Params};
use crate::versionbits::{BlockIndex, ThresholdState, VersionBitsCache};
use crate::{
    VERIFY_CHECKLOCKTIMEVERIFY, VERIFY_CHECKSEQUENCEVERIFY, VERIFY_DERSIG, VERIFY_NONE,
    VERIFY_NULLDUMMY, VERIFY_P2SH, VERIFY_WITNESS,
};

/// Blocks more than this far ahead of adjusted time are rejected outright.
const MAX_FUTURE_BLOCK_TIME: i64 = 2 * 60 * 60;

/// The script flags every transaction in the block at `index` must satisfy.
///
/// Pure over the block's ancestry; the cache only memoizes deployment states
/// already proven correct for these block identities.
pub fn block_verification_flags<B: BlockIndex>(
    index: &B,
    params: &Params,
    cache: &VersionBitsCache,
) -> u32 {
    let mut flags = VERIFY_NONE;

    if index.block_time() >= params.bip16_switch_time {
        flags |= VERIFY_P2SH;
    }
    if index.height() >= params.bip66_height {
        flags |= VERIFY_DERSIG;
    }
    if index.height() >= params.bip65_height {
        flags |= VERIFY_CHECKLOCKTIMEVERIFY;
    }
    if cache.state(index.prev(), params, DeploymentPos::Csv) == ThresholdState::Active {
        flags |= VERIFY_CHECKSEQUENCEVERIFY;
    }
    if cache.state(index.prev(), params, DeploymentPos::Segwit) == ThresholdState::Active {
        flags |= VERIFY_WITNESS | VERIFY_NULLDUMMY;
    }

    flags
}

/// Whether the duplicate-coinbase (BIP30) check applies to the block at
/// `index`.
///
/// Two historical blocks violate the rule and are exempted by identity; once
/// the chain's BIP34 activation block matches the known burial point, new
/// duplicates are impossible and the lookup can be skipped entirely.
pub fn enforce_duplicate_coinbase_check<B: BlockIndex>(index: &B, params: &Params) -> bool {
    let excepted = params
        .bip30_exceptions
        .iter()
        .any(|(height, hash)| index.height() == *height && index.block_hash() == *hash);
    if excepted {
        return false;
    }

    match index.prev().and_then(|prev| prev.ancestor(params.bip34_height)) {
        Some(burial) if burial.block_hash() == params.bip34_hash => false,
        _ => true,
    }
}

/// Reason a block header failed verification.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// The header hash does not satisfy its own difficulty claim.
    HighHash,
    /// Timestamp at or below the predecessor's median-time-past.
    TimeTooOld,
    /// Timestamp too far past the caller's adjusted time.
    TimeTooNew,
    /// Version obsoleted by a buried upgrade at this height.
    ObsoleteVersion,
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            HeaderError::HighHash => "proof of work failed",
            HeaderError::TimeTooOld => "block's timestamp is too early",
            HeaderError::TimeTooNew => "block timestamp too far in the future",
            HeaderError::ObsoleteVersion => "rejected outdated block version",
        };
        f.write_str(text)
    }
}

impl std::error::Error for HeaderError {}

/// Checks that the header hash satisfies the difficulty its own `bits` field
/// claims. Whether that claim is the right one for the chain position is the
/// chain-selection logic's concern, not this engine's.
pub fn check_proof_of_work(header: &Header) -> Result<(), HeaderError> {
    header
        .validate_pow(header.target())
        .map(|_| ())
        .map_err(|_| HeaderError::HighHash)
}

/// Contextual header checks against the predecessor position.
pub fn contextual_check_header<B: BlockIndex>(
    header: &Header,
    params: &Params,
    prev: Option<&B>,
    adjusted_time: i64,
) -> Result<(), HeaderError> {
    let height = prev.map(|p| p.height() + 1).unwrap_or(0);

    if let Some(prev) = prev {
        if i64::from(header.time) <= prev.median_time_past() {
            return Err(HeaderError::TimeTooOld);
        }
    }

    if i64::from(header.time) > adjusted_time + MAX_FUTURE_BLOCK_TIME {
        return Err(HeaderError::TimeTooNew);
    }

    // Reject versions obsoleted by buried upgrades.
    let version = header.version.to_consensus();
    if (version < 2 && height >= params.bip34_height)
        || (version < 3 && height >= params.bip66_height)
        || (version < 4 && height >= params.bip65_height)
    {
        return Err(HeaderError::ObsoleteVersion);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::block::Version;
    use bitcoin::{BlockHash, CompactTarget, TxMerkleNode};

    struct TestIndex {
        height: u32,
        hash: BlockHash,
        mtp: i64,
        prev: Option<Box<TestIndex>>,
    }

    impl BlockIndex for TestIndex {
        fn height(&self) -> u32 {
            self.height
        }
        fn block_hash(&self) -> BlockHash {
            self.hash
        }
        fn version(&self) -> i32 {
            4
        }
        fn median_time_past(&self) -> i64 {
            self.mtp
        }
        fn block_time(&self) -> i64 {
            self.mtp + 1
        }
        fn prev(&self) -> Option<&Self> {
            self.prev.as_deref()
        }
    }

    fn header(version: i32, time: u32) -> Header {
        Header {
            version: Version::from_consensus(version),
            prev_blockhash: BlockHash::from_byte_array([0; 32]),
            merkle_root: TxMerkleNode::from_byte_array([0; 32]),
            time,
            // Trivial difficulty so the hash check passes.
            bits: CompactTarget::from_consensus(0x207f_ffff),
            nonce: 0,
        }
    }

    fn tip(height: u32, mtp: i64) -> TestIndex {
        TestIndex {
            height,
            hash: BlockHash::from_byte_array([height as u8; 32]),
            mtp,
            prev: None,
        }
    }

    #[test]
    fn timestamp_below_median_is_rejected() {
        let params = Params::mainnet();
        let prev = tip(100, 5_000);
        let header = header(4, 4_000);
        assert_eq!(
            contextual_check_header(&header, &params, Some(&prev), 1_000_000).unwrap_err(),
            HeaderError::TimeTooOld
        );
    }

    #[test]
    fn timestamp_too_far_ahead_is_rejected() {
        let params = Params::mainnet();
        let prev = tip(100, 5_000);
        let header = header(4, 1_000_000);
        assert_eq!(
            contextual_check_header(&header, &params, Some(&prev), 10_000).unwrap_err(),
            HeaderError::TimeTooNew
        );
    }

    #[test]
    fn obsolete_versions_gated_by_height() {
        let params = Params::mainnet();

        let early = tip(1_000, 5_000);
        let v1 = header(1, 6_000);
        contextual_check_header(&v1, &params, Some(&early), 10_000).expect("v1 fine early");

        let late = tip(params.bip65_height, 5_000);
        assert_eq!(
            contextual_check_header(&v1, &params, Some(&late), 10_000).unwrap_err(),
            HeaderError::ObsoleteVersion
        );
        let v3 = header(3, 6_000);
        assert_eq!(
            contextual_check_header(&v3, &params, Some(&late), 10_000).unwrap_err(),
            HeaderError::ObsoleteVersion
        );
        let v4 = header(4, 6_000);
        contextual_check_header(&v4, &params, Some(&late), 10_000).expect("v4 accepted");
    }

    #[test]
    fn bip30_exceptions_skip_enforcement() {
        let params = Params::mainnet();
        let (height, hash) = params.bip30_exceptions[0];
        let excepted = TestIndex {
            height,
            hash,
            mtp: 0,
            prev: None,
        };
        assert!(!enforce_duplicate_coinbase_check(&excepted, &params));

        let ordinary = tip(height, 0);
        assert!(enforce_duplicate_coinbase_check(&ordinary, &params));
    }
}
