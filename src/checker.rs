//! The signature-checker capability.
//!
//! The interpreter never looks at a transaction directly; everything that
//! depends on the spending context — signature digests, lock times, relative
//! sequences — goes through [`SignatureChecker`]. The set of behaviours is
//! closed: [`BaseSignatureChecker`] for context-free evaluation (classifying,
//! combining, pure data scripts) and [`TransactionSignatureChecker`] bound to
//! one transaction input for spend validation.

use std::cell::RefCell;
use std::sync::OnceLock;

use bitcoin::absolute::LOCK_TIME_THRESHOLD;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{
    ecdsa::Signature as EcdsaSignature, Message, PublicKey, Secp256k1, VerifyOnly,
};
use bitcoin::sighash::{EcdsaSighashType, SegwitV0Sighash, SighashCache};
use bitcoin::{Amount, Script, ScriptBuf, Sequence, Transaction};

use crate::script::SigVersion;
use crate::sighash::legacy_signature_hash;

const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;
const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;

static SECP: OnceLock<Secp256k1<VerifyOnly>> = OnceLock::new();

fn secp() -> &'static Secp256k1<VerifyOnly> {
    SECP.get_or_init(Secp256k1::verification_only)
}

/// Capability consulted by the interpreter for everything transaction-bound.
///
/// Implementations return plain booleans: a failed signature is a routine
/// outcome, not an error. Encoding policy (DER, low-S, hash-type bytes) is
/// enforced by the interpreter before the checker is consulted.
pub trait SignatureChecker {
    /// Verifies `sig` (with its trailing hash-type byte) by `pubkey` over
    /// `script_code`.
    fn check_ecdsa_signature(
        &self,
        _sig: &[u8],
        _pubkey: &[u8],
        _script_code: &Script,
        _sig_version: SigVersion,
    ) -> bool {
        false
    }

    /// Whether an `OP_CHECKLOCKTIMEVERIFY` operand is satisfied.
    fn check_lock_time(&self, _lock_time: i64) -> bool {
        false
    }

    /// Whether an `OP_CHECKSEQUENCEVERIFY` operand is satisfied.
    fn check_sequence(&self, _sequence: i64) -> bool {
        false
    }
}

/// A checker with no transaction context; every check fails.
pub struct BaseSignatureChecker;

impl SignatureChecker for BaseSignatureChecker {}

/// Checker bound to one input of one transaction.
pub struct TransactionSignatureChecker<'a> {
    tx: &'a Transaction,
    input_index: usize,
    amount: u64,
    segwit_cache: RefCell<SighashCache<&'a Transaction>>,
}

impl<'a> TransactionSignatureChecker<'a> {
    /// `amount` is the value of the output being spent; it only participates
    /// in witness-v0 digests.
    pub fn new(tx: &'a Transaction, input_index: usize, amount: u64) -> Self {
        Self {
            tx,
            input_index,
            amount,
            segwit_cache: RefCell::new(SighashCache::new(tx)),
        }
    }

    fn witness_v0_sighash(&self, script_code: &Script, hash_type: u32) -> Option<SegwitV0Sighash> {
        let sighash_type = EcdsaSighashType::from_consensus(hash_type);
        let script_buf = ScriptBuf::from_bytes(script_code.as_bytes().to_vec());
        let mut engine = SegwitV0Sighash::engine();
        self.segwit_cache
            .borrow_mut()
            .segwit_v0_encode_signing_data_to(
                &mut engine,
                self.input_index,
                &script_buf,
                Amount::from_sat(self.amount),
                sighash_type,
            )
            .ok()?;
        Some(SegwitV0Sighash::from_engine(engine))
    }
}

impl<'a> SignatureChecker for TransactionSignatureChecker<'a> {
    fn check_ecdsa_signature(
        &self,
        sig: &[u8],
        pubkey: &[u8],
        script_code: &Script,
        sig_version: SigVersion,
    ) -> bool {
        if sig.is_empty() {
            return false;
        }
        let Ok(pubkey) = PublicKey::from_slice(pubkey) else {
            return false;
        };

        // Hash type is one byte tacked onto the end of the signature.
        let hash_type = sig[sig.len() - 1] as u32;
        let sig_bytes = &sig[..sig.len() - 1];
        let Ok(parsed) = EcdsaSignature::from_der_lax(sig_bytes) else {
            return false;
        };
        let mut signature = parsed;
        signature.normalize_s();

        let digest = match sig_version {
            SigVersion::Base => legacy_signature_hash(
                self.tx,
                self.input_index,
                script_code,
                hash_type,
            )
            .to_byte_array(),
            SigVersion::WitnessV0 => match self.witness_v0_sighash(script_code, hash_type) {
                Some(sighash) => sighash.to_byte_array(),
                None => return false,
            },
        };

        let message = Message::from_digest(digest);
        secp().verify_ecdsa(&message, &signature, &pubkey).is_ok()
    }

    fn check_lock_time(&self, lock_time: i64) -> bool {
        if !(0..=u32::MAX as i64).contains(&lock_time) {
            return false;
        }
        let lock_time = lock_time as u32;
        let tx_lock = self.tx.lock_time.to_consensus_u32();

        // Height locks and time locks live in disjoint ranges and cannot
        // satisfy each other.
        if (tx_lock < LOCK_TIME_THRESHOLD) != (lock_time < LOCK_TIME_THRESHOLD) {
            return false;
        }
        if tx_lock < lock_time {
            return false;
        }

        // A final input would make nLockTime unenforceable.
        self.tx.input[self.input_index].sequence != Sequence::MAX
    }

    fn check_sequence(&self, sequence: i64) -> bool {
        if !(0..=u32::MAX as i64).contains(&sequence) {
            return false;
        }
        let sequence = sequence as u32;

        // Relative lock times are only available from version-2 transactions.
        if self.tx.version.0 < 2 {
            return false;
        }

        let tx_sequence = self.tx.input[self.input_index].sequence.to_consensus_u32();
        if tx_sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            return false;
        }

        let mask = SEQUENCE_LOCKTIME_TYPE_FLAG | SEQUENCE_LOCKTIME_MASK;
        let tx_masked = tx_sequence & mask;
        let op_masked = sequence & mask;

        let tx_is_time = tx_masked >= SEQUENCE_LOCKTIME_TYPE_FLAG;
        let op_is_time = op_masked >= SEQUENCE_LOCKTIME_TYPE_FLAG;
        if tx_is_time != op_is_time {
            return false;
        }

        op_masked <= tx_masked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::SigVersion;
    use bitcoin::absolute::LockTime;
    use bitcoin::blockdata::script::{Builder, ScriptBuf};
    use bitcoin::opcodes::all;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, Sequence, Transaction, TxIn, TxOut, Witness};

    fn locked_tx(lock_time: u32, sequence: u32, version: i32) -> Transaction {
        Transaction {
            version: Version(version),
            lock_time: LockTime::from_consensus(lock_time),
            input: vec![TxIn {
                previous_output: OutPoint::default(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence(sequence),
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(0),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    #[test]
    fn base_checker_rejects_everything() {
        let checker = BaseSignatureChecker;
        let script = Builder::new().push_opcode(all::OP_CHECKSIG).into_script();
        assert!(!checker.check_ecdsa_signature(&[1], &[2], &script, SigVersion::Base));
        assert!(!checker.check_lock_time(0));
        assert!(!checker.check_sequence(0));
    }

    #[test]
    fn lock_time_requires_same_domain() {
        // Height-locked transaction against a time-style operand.
        let tx = locked_tx(100, 0, 1);
        let checker = TransactionSignatureChecker::new(&tx, 0, 0);
        assert!(checker.check_lock_time(100));
        assert!(checker.check_lock_time(99));
        assert!(!checker.check_lock_time(101));
        assert!(!checker.check_lock_time(LOCK_TIME_THRESHOLD as i64));
    }

    #[test]
    fn final_sequence_disables_lock_time() {
        let tx = locked_tx(100, u32::MAX, 1);
        let checker = TransactionSignatureChecker::new(&tx, 0, 0);
        assert!(!checker.check_lock_time(100));
    }

    #[test]
    fn sequence_requires_v2_transaction() {
        let tx = locked_tx(0, 5, 1);
        let checker = TransactionSignatureChecker::new(&tx, 0, 0);
        assert!(!checker.check_sequence(5));

        let tx = locked_tx(0, 5, 2);
        let checker = TransactionSignatureChecker::new(&tx, 0, 0);
        assert!(checker.check_sequence(5));
        assert!(!checker.check_sequence(6));
    }

    #[test]
    fn sequence_disable_flag_fails_the_check() {
        let tx = locked_tx(0, SEQUENCE_LOCKTIME_DISABLE_FLAG | 5, 2);
        let checker = TransactionSignatureChecker::new(&tx, 0, 0);
        assert!(!checker.check_sequence(5));
    }

    #[test]
    fn malformed_signature_is_false_not_error() {
        let tx = locked_tx(0, 0, 1);
        let checker = TransactionSignatureChecker::new(&tx, 0, 0);
        let script = Builder::new().push_opcode(all::OP_CHECKSIG).into_script();
        assert!(!checker.check_ecdsa_signature(&[0xff, 0x01], &[0x02; 33], &script, SigVersion::Base));
    }
}
