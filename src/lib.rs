//! Transaction script validation and soft-fork activation engine.
//!
//! The goal of this crate is to reproduce the consensus-critical verdicts of a
//! proof-of-work full node in pure Rust: whether a transaction input is allowed
//! to spend a given output under a chosen set of verification flags, and which
//! soft-fork rules are mandatory at a given chain position.
//!
//! The building blocks are deliberately independent so that embedders (light
//! clients, alternative implementations, signing services) can consume them
//! without constructing a full node:
//!
//! - [`script`] — the stack-machine interpreter and the script verifier
//!   orchestrating scriptSig/scriptPubKey/P2SH/witness evaluation;
//! - [`sighash`] — the legacy signature-hash pre-image algorithm, including
//!   the historical `SIGHASH_SINGLE` sentinel behaviour;
//! - [`checker`] — the signature-checker capability that binds the
//!   interpreter to one transaction input;
//! - [`standard`] — the output-script template classifier and the local
//!   standardness (relay) policy;
//! - [`sign`] — combination of partial unlocking scripts produced by
//!   independent signers;
//! - [`versionbits`] — the BIP9-style threshold state machine;
//! - [`softforks`] — the mapping from a chain position to the flag set that
//!   is mandatory for blocks at that position.
//!
//! Everything operates on immutable inputs and returns typed errors; malformed
//! data is always a local failure, never a panic.

pub mod checker;
pub mod params;
pub mod script;
pub mod sighash;
pub mod sign;
pub mod softforks;
pub mod standard;
pub mod tx;
pub mod versionbits;

use core::fmt;

use bitcoin::block::Header;
use bitcoin::consensus;

pub use crate::checker::{BaseSignatureChecker, SignatureChecker, TransactionSignatureChecker};
pub use crate::params::{Deployment, DeploymentInfo, DeploymentPos, Params, DEPLOYMENT_INFO};
pub use crate::script::{eval_script, verify_script, ScriptError, SigVersion, Stack, VerifyFlags};
pub use crate::sighash::{
    legacy_signature_hash, SIGHASH_ALL, SIGHASH_ANYONECANPAY, SIGHASH_NONE, SIGHASH_SINGLE,
};
pub use crate::sign::combine_signatures;
pub use crate::softforks::{
    block_verification_flags, check_proof_of_work, contextual_check_header,
    enforce_duplicate_coinbase_check, HeaderError,
};
pub use crate::standard::{
    classify, ScriptTemplate, StandardPolicy, TemplateKind, STANDARD_VERIFY_FLAGS,
};
pub use crate::tx::TransactionContext;
pub use crate::versionbits::{BlockIndex, ThresholdState, VersionBitsCache};

/// Do not enable any verification.
pub const VERIFY_NONE: u32 = 0;
/// Evaluate P2SH (BIP16) subscripts.
pub const VERIFY_P2SH: u32 = 1 << 0;
/// Enforce strict ECDSA encoding (BIP62).
pub const VERIFY_STRICTENC: u32 = 1 << 1;
/// Enforce strict DER (BIP66) compliance.
pub const VERIFY_DERSIG: u32 = 1 << 2;
/// Require signatures to use low-S form (BIP62).
pub const VERIFY_LOW_S: u32 = 1 << 3;
/// Enforce NULLDUMMY (BIP147).
pub const VERIFY_NULLDUMMY: u32 = 1 << 4;
/// Require scriptSig to be push only.
pub const VERIFY_SIGPUSHONLY: u32 = 1 << 5;
/// Require minimal data encodings (BIP62).
pub const VERIFY_MINIMALDATA: u32 = 1 << 6;
/// Discourage use of upgradable NOP opcodes.
pub const VERIFY_DISCOURAGE_UPGRADABLE_NOPS: u32 = 1 << 7;
/// Require a clean stack after evaluation.
pub const VERIFY_CLEANSTACK: u32 = 1 << 8;
/// Enable CHECKLOCKTIMEVERIFY (BIP65).
pub const VERIFY_CHECKLOCKTIMEVERIFY: u32 = 1 << 9;
/// Enable CHECKSEQUENCEVERIFY (BIP112).
pub const VERIFY_CHECKSEQUENCEVERIFY: u32 = 1 << 10;
/// Enable WITNESS (BIP141).
pub const VERIFY_WITNESS: u32 = 1 << 11;
/// Discourage unknown witness program versions.
pub const VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM: u32 = 1 << 12;
/// Require minimal encodings for IF/NOTIF conditions in witness scripts.
pub const VERIFY_MINIMALIF: u32 = 1 << 13;
/// Enforce NULLFAIL behaviour (BIP146).
pub const VERIFY_NULLFAIL: u32 = 1 << 14;
/// Require compressed pubkeys in segwit v0 contexts.
pub const VERIFY_WITNESS_PUBKEYTYPE: u32 = 1 << 15;

/// Flags whose violation invalidates an already-mined block.
///
/// Everything in [`STANDARD_VERIFY_FLAGS`] but not in this set is local relay
/// policy only.
pub const MANDATORY_VERIFY_FLAGS: u32 = VERIFY_P2SH;

/// Errors returned by the byte-level verification entry points.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The script evaluation itself failed; the payload says why.
    Script(ScriptError),
    /// An invalid input index for the spending transaction.
    TxIndex,
    /// An error deserializing the spending transaction.
    TxDeserialize,
    /// The byte length of the transaction did not match its serialized form.
    TxSizeMismatch,
    /// Script verification flags are invalid.
    InvalidFlags,
    /// An error deserializing the block header.
    HeaderDeserialize,
    /// The byte length of the header did not match its serialized form.
    HeaderSizeMismatch,
    /// A contextual block-header check failed.
    Header(HeaderError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Script(err) => write!(f, "script verification failed: {err}"),
            Error::TxIndex => f.write_str("input index out of range for the spending transaction"),
            Error::TxDeserialize => f.write_str("error deserializing the spending transaction"),
            Error::TxSizeMismatch => {
                f.write_str("transaction byte length does not match its serialized size")
            }
            Error::InvalidFlags => f.write_str("script verification flags are invalid"),
            Error::HeaderDeserialize => f.write_str("error deserializing the block header"),
            Error::HeaderSizeMismatch => {
                f.write_str("header byte length does not match its serialized size")
            }
            Error::Header(err) => write!(f, "header verification failed: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ScriptError> for Error {
    fn from(err: ScriptError) -> Self {
        Error::Script(err)
    }
}

/// Verifies a single spend (input) of a transaction under explicit flags.
///
/// Takes only serialized bytes and explicit parameters so that it remains
/// callable without constructing a full node. `amount` is the value of the
/// spent output; it only participates in witness-v0 digests.
pub fn verify_spend(
    spent_output_script: &[u8],
    amount: u64,
    spending_transaction: &[u8],
    input_index: usize,
    flags: u32,
) -> Result<(), Error> {
    let tx_ctx = TransactionContext::parse(spending_transaction)?;
    tx_ctx.ensure_input_index(input_index)?;
    let flags = VerifyFlags::from_bits(flags).map_err(|_| Error::InvalidFlags)?;

    let checker = TransactionSignatureChecker::new(tx_ctx.tx(), input_index, amount);
    let txin = &tx_ctx.tx().input[input_index];
    verify_script(
        &txin.script_sig,
        bitcoin::Script::from_bytes(spent_output_script),
        &txin.witness,
        flags,
        &checker,
    )
    .map_err(Error::Script)
}

/// Same as [`verify_spend`] with the full standardness flag set.
pub fn verify_spend_standard(
    spent_output_script: &[u8],
    amount: u64,
    spending_transaction: &[u8],
    input_index: usize,
) -> Result<(), Error> {
    verify_spend(
        spent_output_script,
        amount,
        spending_transaction,
        input_index,
        STANDARD_VERIFY_FLAGS,
    )
}

/// Verifies a serialized block header against its chain position.
///
/// Checks the proof-of-work claim, the timestamp bounds and the
/// version-obsolescence gates. `prev` is the header's predecessor (or `None`
/// for the genesis position); `adjusted_time` is the caller's network-adjusted
/// current time.
pub fn verify_block_header<B: BlockIndex>(
    header_bytes: &[u8],
    params: &Params,
    prev: Option<&B>,
    adjusted_time: i64,
) -> Result<(), Error> {
    let header: Header =
        consensus::deserialize(header_bytes).map_err(|_| Error::HeaderDeserialize)?;
    if consensus::serialize(&header).len() != header_bytes.len() {
        return Err(Error::HeaderSizeMismatch);
    }

    check_proof_of_work(&header).map_err(Error::Header)?;
    contextual_check_header(&header, params, prev, adjusted_time).map_err(Error::Header)
}
