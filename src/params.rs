//! Consensus parameters and the soft-fork deployment registry.
//!
//! Everything here is static configuration: any two implementations must
//! agree on these tables bit-for-bit to stay consensus-compatible. The BIP30
//! exception pairs are data, deliberately kept away from the validation
//! logic that consumes them.

use bitcoin::BlockHash;

/// Index of a versionbits deployment in [`Params::deployments`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeploymentPos {
    TestDummy = 0,
    Csv = 1,
    Segwit = 2,
}

impl DeploymentPos {
    pub const ALL: [DeploymentPos; MAX_DEPLOYMENTS] =
        [DeploymentPos::TestDummy, DeploymentPos::Csv, DeploymentPos::Segwit];
}

pub const MAX_DEPLOYMENTS: usize = 3;

/// Per-network parameters of one versionbits deployment.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Deployment {
    /// Signalling bit position, 0 through 28.
    pub bit: u8,
    /// Median-time-past from which signals are counted.
    pub start_time: i64,
    /// Median-time-past at which an unactivated deployment fails.
    pub timeout: i64,
}

/// Wire-visible description of a deployment.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeploymentInfo {
    pub name: &'static str,
    /// Whether mining templates may treat the rule as advisory and include
    /// signalling blocks without enforcing it.
    pub advisory: bool,
}

/// The deployment registry, indexed by [`DeploymentPos`].
pub const DEPLOYMENT_INFO: [DeploymentInfo; MAX_DEPLOYMENTS] = [
    DeploymentInfo {
        name: "testdummy",
        advisory: true,
    },
    DeploymentInfo {
        name: "csv",
        advisory: true,
    },
    DeploymentInfo {
        name: "segwit",
        advisory: false,
    },
];

/// Parameters that influence chain consensus.
#[derive(Debug, Clone)]
pub struct Params {
    /// Block time from which P2SH evaluation is mandatory.
    pub bip16_switch_time: i64,
    /// Height from which coinbases commit to the block height.
    pub bip34_height: u32,
    /// Hash of the block that buried BIP34 on the main chain.
    pub bip34_hash: BlockHash,
    /// Height from which CHECKLOCKTIMEVERIFY is mandatory.
    pub bip65_height: u32,
    /// Height from which strict DER signatures are mandatory.
    pub bip66_height: u32,
    /// The two historical blocks exempt from the duplicate-coinbase check.
    pub bip30_exceptions: [(u32, BlockHash); 2],
    /// Signalling blocks required within one window to lock a deployment in.
    pub rule_change_activation_threshold: u32,
    /// Window length, in blocks, for deployment signal tallies.
    pub miner_confirmation_window: u32,
    pub deployments: [Deployment; MAX_DEPLOYMENTS],
}

impl Params {
    /// The production network's parameter set.
    pub fn mainnet() -> Self {
        Self {
            // April 1 2012
            bip16_switch_time: 1_333_238_400,
            bip34_height: 227_931,
            bip34_hash: parse_hash(
                "000000000000024b89b42a942fe0d9fea3bb44ab7bd1b19115dd6a759c0808b8",
            ),
            bip65_height: 388_381,
            bip66_height: 363_725,
            bip30_exceptions: [
                (
                    91_842,
                    parse_hash(
                        "00000000000a4d0a398161ffc163c503763b1f4360639393e0e4c8e300e0caec",
                    ),
                ),
                (
                    91_880,
                    parse_hash(
                        "00000000000743f190a18c5577a3c2d2a1f610ae9601ac046a38084ccb7cd721",
                    ),
                ),
            ],
            // 95% of a two-week retarget period.
            rule_change_activation_threshold: 1916,
            miner_confirmation_window: 2016,
            deployments: [
                Deployment {
                    bit: 28,
                    start_time: 1_199_145_601,
                    timeout: 1_230_767_999,
                },
                Deployment {
                    bit: 0,
                    start_time: 1_462_060_800,
                    timeout: 1_493_596_800,
                },
                Deployment {
                    bit: 1,
                    start_time: 1_479_168_000,
                    timeout: 1_510_704_000,
                },
            ],
        }
    }
}

fn parse_hash(hex: &str) -> BlockHash {
    hex.parse().expect("statically known block hash")
}
