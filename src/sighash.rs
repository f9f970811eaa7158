//! Legacy signature-hash computation.
//!
//! A signature commits to a modified serialization of the spending
//! transaction; which fields are blanked, zeroed or omitted is selected by the
//! hash type carried in the signature's trailing byte. The serializer here
//! reproduces the original wire form exactly, including the historical
//! `SIGHASH_SINGLE` out-of-range behaviour, which yields a fixed sentinel
//! digest instead of an error — signing code has relied on that since the
//! beginning, so it is part of consensus.

use bitcoin::consensus;
use bitcoin::consensus::encode::VarInt;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::{Script, Transaction};

/// Commit to all outputs.
pub const SIGHASH_ALL: u32 = 1;
/// Commit to no outputs.
pub const SIGHASH_NONE: u32 = 2;
/// Commit only to the output paired with the signed input.
pub const SIGHASH_SINGLE: u32 = 3;
/// Commit only to the signed input, letting others be added freely.
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// The digest returned for the out-of-range `SIGHASH_SINGLE` case (and for an
/// out-of-range input index): the number one, in digest byte order.
pub fn sighash_single_bug_digest() -> sha256d::Hash {
    let mut one = [0u8; 32];
    one[0] = 1;
    sha256d::Hash::from_byte_array(one)
}

/// Computes the digest a legacy (pre-segwit) signature must cover.
///
/// `script_code` is the locking script being satisfied (or the P2SH redeem
/// script), already cut at the last executed `OP_CODESEPARATOR`; remaining
/// separator bytes are stripped during serialization. The function is pure
/// and never fails: historical out-of-range cases produce
/// [`sighash_single_bug_digest`].
pub fn legacy_signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    hash_type: u32,
) -> sha256d::Hash {
    if input_index >= tx.input.len() {
        return sighash_single_bug_digest();
    }

    let anyone_can_pay = hash_type & SIGHASH_ANYONECANPAY != 0;
    let base_type = hash_type & 0x1f;
    let hash_single = base_type == SIGHASH_SINGLE;
    let hash_none = base_type == SIGHASH_NONE;

    if hash_single && input_index >= tx.output.len() {
        return sighash_single_bug_digest();
    }

    let mut preimage = Vec::with_capacity(256);
    preimage.extend_from_slice(&consensus::serialize(&tx.version));

    // Inputs: under ANYONECANPAY only the signed one is committed.
    let input_count = if anyone_can_pay { 1 } else { tx.input.len() };
    preimage.extend_from_slice(&consensus::serialize(&VarInt(input_count as u64)));
    for n in 0..input_count {
        let i = if anyone_can_pay { input_index } else { n };
        let txin = &tx.input[i];
        preimage.extend_from_slice(&consensus::serialize(&txin.previous_output));
        if i != input_index {
            // Other inputs' unlocking scripts are blanked out.
            preimage.extend_from_slice(&consensus::serialize(&VarInt(0)));
        } else {
            serialize_script_code(&mut preimage, script_code);
        }
        if i != input_index && (hash_single || hash_none) {
            // Other inputs may update their sequence at will.
            preimage.extend_from_slice(&0u32.to_le_bytes());
        } else {
            preimage.extend_from_slice(&consensus::serialize(&txin.sequence));
        }
    }

    // Outputs: all, none, or the slots up to and including the paired index
    // (the earlier slots as blank placeholder outputs).
    let output_count = if hash_none {
        0
    } else if hash_single {
        input_index + 1
    } else {
        tx.output.len()
    };
    preimage.extend_from_slice(&consensus::serialize(&VarInt(output_count as u64)));
    for n in 0..output_count {
        if hash_single && n != input_index {
            serialize_blank_output(&mut preimage);
        } else {
            preimage.extend_from_slice(&consensus::serialize(&tx.output[n]));
        }
    }

    preimage.extend_from_slice(&consensus::serialize(&tx.lock_time));
    preimage.extend_from_slice(&hash_type.to_le_bytes());

    sha256d::Hash::hash(&preimage)
}

/// Serializes `script_code` with its length prefix, skipping every
/// `OP_CODESEPARATOR` byte.
fn serialize_script_code(out: &mut Vec<u8>, script_code: &Script) {
    const OP_CODESEPARATOR: u8 = 0xab;

    let bytes = script_code.as_bytes();
    let mut stripped = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        let next = crate::script::next_op(bytes, i);
        if !(bytes[i] == OP_CODESEPARATOR && next == i + 1) {
            stripped.extend_from_slice(&bytes[i..next]);
        }
        i = next;
    }

    out.extend_from_slice(&consensus::serialize(&VarInt(stripped.len() as u64)));
    out.extend_from_slice(&stripped);
}

/// The default-constructed output of the original implementation: value -1,
/// empty script.
fn serialize_blank_output(out: &mut Vec<u8>) {
    out.extend_from_slice(&(-1i64).to_le_bytes());
    out.push(0x00);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::blockdata::script::{Builder, ScriptBuf};
    use bitcoin::opcodes::all;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, Sequence, Transaction, TxIn, TxOut, Txid, Witness};

    fn sample_tx(inputs: usize, outputs: usize) -> Transaction {
        Transaction {
            version: Version(1),
            lock_time: LockTime::ZERO,
            input: (0..inputs)
                .map(|n| TxIn {
                    previous_output: OutPoint {
                        txid: Txid::from_byte_array([n as u8 + 1; 32]),
                        vout: n as u32,
                    },
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: (0..outputs)
                .map(|n| TxOut {
                    value: Amount::from_sat(1000 * (n as u64 + 1)),
                    script_pubkey: Builder::new().push_opcode(all::OP_PUSHNUM_1).into_script(),
                })
                .collect(),
        }
    }

    fn p2pk_like_script() -> ScriptBuf {
        Builder::new().push_opcode(all::OP_CHECKSIG).into_script()
    }

    #[test]
    fn single_out_of_range_is_sentinel_not_error() {
        let tx = sample_tx(3, 1);
        let digest = legacy_signature_hash(&tx, 2, &p2pk_like_script(), SIGHASH_SINGLE);
        assert_eq!(digest, sighash_single_bug_digest());
    }

    #[test]
    fn input_index_out_of_range_is_sentinel() {
        let tx = sample_tx(1, 1);
        let digest = legacy_signature_hash(&tx, 7, &p2pk_like_script(), SIGHASH_ALL);
        assert_eq!(digest, sighash_single_bug_digest());
    }

    #[test]
    fn all_mode_ignores_other_inputs_script_sig() {
        let mut tx = sample_tx(2, 2);
        let script = p2pk_like_script();
        let before = legacy_signature_hash(&tx, 0, &script, SIGHASH_ALL);
        // Mutating the other input's unlocking script must not move the digest:
        // that field is blanked during serialization.
        tx.input[1].script_sig = Builder::new().push_opcode(all::OP_PUSHNUM_16).into_script();
        let after = legacy_signature_hash(&tx, 0, &script, SIGHASH_ALL);
        assert_eq!(before, after);
    }

    #[test]
    fn all_mode_commits_to_outputs() {
        let mut tx = sample_tx(1, 2);
        let script = p2pk_like_script();
        let before = legacy_signature_hash(&tx, 0, &script, SIGHASH_ALL);
        tx.output[1].value = Amount::from_sat(9);
        let after = legacy_signature_hash(&tx, 0, &script, SIGHASH_ALL);
        assert_ne!(before, after);
    }

    #[test]
    fn none_mode_ignores_outputs() {
        let mut tx = sample_tx(1, 2);
        let script = p2pk_like_script();
        let before = legacy_signature_hash(&tx, 0, &script, SIGHASH_NONE);
        tx.output[1].value = Amount::from_sat(9);
        tx.output[0].value = Amount::from_sat(10);
        let after = legacy_signature_hash(&tx, 0, &script, SIGHASH_NONE);
        assert_eq!(before, after);
    }

    #[test]
    fn single_mode_ignores_later_outputs() {
        let mut tx = sample_tx(2, 3);
        let script = p2pk_like_script();
        let before = legacy_signature_hash(&tx, 1, &script, SIGHASH_SINGLE);
        tx.output[2].value = Amount::from_sat(9);
        let after = legacy_signature_hash(&tx, 1, &script, SIGHASH_SINGLE);
        assert_eq!(before, after);

        // ... but commits to the paired one.
        tx.output[1].value = Amount::from_sat(9);
        let moved = legacy_signature_hash(&tx, 1, &script, SIGHASH_SINGLE);
        assert_ne!(before, moved);
    }

    #[test]
    fn anyone_can_pay_ignores_other_inputs_entirely() {
        let tx = sample_tx(3, 1);
        let script = p2pk_like_script();
        let digest = legacy_signature_hash(&tx, 1, &script, SIGHASH_ALL | SIGHASH_ANYONECANPAY);

        let mut fewer = tx.clone();
        fewer.input.remove(2);
        let digest_fewer =
            legacy_signature_hash(&fewer, 1, &script, SIGHASH_ALL | SIGHASH_ANYONECANPAY);
        assert_eq!(digest, digest_fewer);
    }

    #[test]
    fn code_separators_are_stripped() {
        let tx = sample_tx(1, 1);
        let with_separator = Builder::new()
            .push_opcode(all::OP_CODESEPARATOR)
            .push_opcode(all::OP_CHECKSIG)
            .into_script();
        let without = p2pk_like_script();
        assert_eq!(
            legacy_signature_hash(&tx, 0, &with_separator, SIGHASH_ALL),
            legacy_signature_hash(&tx, 0, &without, SIGHASH_ALL)
        );
    }
}
