//! BIP9-style soft-fork deployment state tracking.
//!
//! Each deployment is assigned a version bit; miners signal readiness by
//! setting that bit in block versions carrying the versionbits marker in the
//! top three bits. Signals are tallied over fixed-length windows, and a
//! deployment walks `DEFINED → STARTED → LOCKED_IN → ACTIVE` (or out to
//! `FAILED` at its timeout). State is a pure function of a block's ancestry,
//! so results are memoized by block hash; a reorganized branch simply hashes
//! to different keys.

use std::collections::HashMap;
use std::sync::Mutex;

use bitcoin::BlockHash;

use crate::params::{Deployment, DeploymentPos, Params, MAX_DEPLOYMENTS};

/// Marker value for the top three version bits of a signalling block.
pub const VERSIONBITS_TOP_BITS: i32 = 0x2000_0000;
/// Mask for the marker bits.
pub const VERSIONBITS_TOP_MASK: i32 = 0xe000_0000u32 as i32;
/// Last block version used before versionbits signalling.
pub const VERSIONBITS_LAST_OLD_BLOCK_VERSION: i32 = 4;

/// A position in some header chain.
///
/// The engine never owns chain storage; callers expose whatever index
/// structure they keep through this trait. `prev`/`ancestor` walk toward the
/// genesis block.
pub trait BlockIndex {
    fn height(&self) -> u32;
    fn block_hash(&self) -> BlockHash;
    /// The header's version field.
    fn version(&self) -> i32;
    /// Median of the past 11 block timestamps, the BIP113 clock.
    fn median_time_past(&self) -> i64;
    /// The header's own timestamp.
    fn block_time(&self) -> i64;
    fn prev(&self) -> Option<&Self>;

    fn ancestor(&self, height: u32) -> Option<&Self> {
        if height > self.height() {
            return None;
        }
        let mut cursor = self;
        while cursor.height() > height {
            cursor = cursor.prev()?;
        }
        Some(cursor)
    }
}

/// Activation state of one deployment at one chain position.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ThresholdState {
    /// The deployment exists but its start time has not been reached.
    Defined,
    /// Within the signalling period; windows are being tallied.
    Started,
    /// A window met the threshold; activation is one window away.
    LockedIn,
    /// The deployment's rules are in force. Terminal.
    Active,
    /// The timeout passed without lock-in. Terminal.
    Failed,
}

/// Memoized states for one deployment, keyed by the hash of the last block of
/// the window preceding the one whose state is recorded.
pub type ThresholdConditionCache = HashMap<BlockHash, ThresholdState>;

/// Whether a block signals for `deployment`.
fn condition<B: BlockIndex>(index: &B, deployment: &Deployment) -> bool {
    (index.version() & VERSIONBITS_TOP_MASK) == VERSIONBITS_TOP_BITS
        && index.version() & (1 << deployment.bit) != 0
}

/// The version bit mask for a deployment.
pub fn deployment_mask(params: &Params, pos: DeploymentPos) -> i32 {
    1 << params.deployments[pos as usize].bit
}

/// Computes the state for the block AFTER `prev`.
///
/// State only changes at window boundaries: the result is defined as the
/// state computed at the start of the window containing the block, so `prev`
/// is first replaced by its ancestor at the last pre-window-boundary height.
/// From there the walk goes backwards in whole windows until it hits a cached
/// or by-construction `Defined` ancestor, then rolls the transition table
/// forward, memoizing every boundary on the way.
pub fn threshold_state<B: BlockIndex>(
    prev: Option<&B>,
    params: &Params,
    deployment: &Deployment,
    cache: &mut ThresholdConditionCache,
) -> ThresholdState {
    let window = params.miner_confirmation_window as i64;
    let threshold = params.rule_change_activation_threshold;

    let mut node: Option<&B> = prev.and_then(|p| {
        let boundary = p.height() as i64 - ((p.height() as i64 + 1) % window);
        if boundary < 0 {
            None
        } else {
            p.ancestor(boundary as u32)
        }
    });

    // Walk backwards in window steps to a position whose state is known.
    let mut to_compute: Vec<&B> = Vec::new();
    let mut state = loop {
        let Some(n) = node else {
            // The genesis boundary is by definition defined.
            break ThresholdState::Defined;
        };
        if let Some(cached) = cache.get(&n.block_hash()) {
            break *cached;
        }
        if n.median_time_past() < deployment.start_time {
            // Every earlier ancestor is before the start time too.
            cache.insert(n.block_hash(), ThresholdState::Defined);
            break ThresholdState::Defined;
        }
        to_compute.push(n);
        let earlier = n.height() as i64 - window;
        node = if earlier < 0 {
            None
        } else {
            n.ancestor(earlier as u32)
        };
    };

    // Roll forward over the collected window boundaries.
    while let Some(boundary) = to_compute.pop() {
        let mut next = state;
        match state {
            ThresholdState::Defined => {
                if boundary.median_time_past() >= deployment.timeout {
                    next = ThresholdState::Failed;
                } else if boundary.median_time_past() >= deployment.start_time {
                    next = ThresholdState::Started;
                }
            }
            ThresholdState::Started => {
                if boundary.median_time_past() >= deployment.timeout {
                    next = ThresholdState::Failed;
                } else {
                    // Tally the most recently completed window.
                    let mut count = 0u32;
                    let mut walker: Option<&B> = Some(boundary);
                    for _ in 0..window {
                        let Some(block) = walker else { break };
                        if condition(block, deployment) {
                            count += 1;
                        }
                        walker = block.prev();
                    }
                    if count >= threshold {
                        next = ThresholdState::LockedIn;
                    }
                }
            }
            ThresholdState::LockedIn => {
                next = ThresholdState::Active;
            }
            ThresholdState::Failed | ThresholdState::Active => {}
        }
        cache.insert(boundary.block_hash(), next);
        state = next;
    }

    state
}

/// Shared memoization for every deployment's threshold walk.
///
/// Verification workers query states concurrently, so each deployment's map
/// sits behind its own lock; writers hold it only for the duration of one
/// state computation.
pub struct VersionBitsCache {
    caches: [Mutex<ThresholdConditionCache>; MAX_DEPLOYMENTS],
}

impl Default for VersionBitsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionBitsCache {
    pub fn new() -> Self {
        Self {
            caches: std::array::from_fn(|_| Mutex::new(HashMap::new())),
        }
    }

    /// State of `pos` for the block following `prev`.
    pub fn state<B: BlockIndex>(
        &self,
        prev: Option<&B>,
        params: &Params,
        pos: DeploymentPos,
    ) -> ThresholdState {
        let mut cache = self.caches[pos as usize]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        threshold_state(prev, params, &params.deployments[pos as usize], &mut cache)
    }

    /// Drops every memoized state. Needed when deployment parameters change,
    /// e.g. between test configurations.
    pub fn clear(&self) {
        for cache in &self.caches {
            cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clear();
        }
    }
}

/// Version field a new block should carry: the versionbits marker plus the
/// bit of every deployment currently accepting signals.
pub fn compute_block_version<B: BlockIndex>(
    prev: Option<&B>,
    params: &Params,
    cache: &VersionBitsCache,
) -> i32 {
    let mut version = VERSIONBITS_TOP_BITS;
    for pos in DeploymentPos::ALL {
        let state = cache.state(prev, params, pos);
        if state == ThresholdState::Started || state == ThresholdState::LockedIn {
            version |= deployment_mask(params, pos);
        }
    }
    version
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    #[test]
    fn condition_requires_marker_and_bit() {
        struct One {
            version: i32,
        }
        impl BlockIndex for One {
            fn height(&self) -> u32 {
                0
            }
            fn block_hash(&self) -> BlockHash {
                BlockHash::from_byte_array([0; 32])
            }
            fn version(&self) -> i32 {
                self.version
            }
            fn median_time_past(&self) -> i64 {
                0
            }
            fn block_time(&self) -> i64 {
                0
            }
            fn prev(&self) -> Option<&Self> {
                None
            }
        }

        let deployment = Deployment {
            bit: 1,
            start_time: 0,
            timeout: i64::MAX,
        };
        assert!(condition(
            &One {
                version: VERSIONBITS_TOP_BITS | (1 << 1)
            },
            &deployment
        ));
        // Marker missing.
        assert!(!condition(&One { version: 1 << 1 }, &deployment));
        // Wrong bit.
        assert!(!condition(
            &One {
                version: VERSIONBITS_TOP_BITS | (1 << 2)
            },
            &deployment
        ));
        // Old-style version.
        assert!(!condition(
            &One {
                version: VERSIONBITS_LAST_OLD_BLOCK_VERSION
            },
            &deployment
        ));
    }
}
