//! Output-script templates and local standardness policy.
//!
//! [`classify`] pattern-matches a locking script into one of the known
//! spending templates; it is total and deterministic — anything it does not
//! recognize is [`TemplateKind::NonStandard`], never an error.
//! [`StandardPolicy`] holds the relay-acceptance rules that are stricter than
//! consensus: they decide what the local node forwards and mines, and their
//! violation is never grounds for rejecting a block or banning a peer.

use core::fmt;

use bitcoin::blockdata::script::{Builder, Instruction, PushBytesBuf, Script, ScriptBuf};
use bitcoin::opcodes::all;
use bitcoin::{consensus, Transaction, TxOut};

use crate::checker::BaseSignatureChecker;
use crate::script::{self, SigVersion, Stack, VerifyFlags};
use crate::{
    MANDATORY_VERIFY_FLAGS, VERIFY_CHECKLOCKTIMEVERIFY, VERIFY_CHECKSEQUENCEVERIFY,
    VERIFY_CLEANSTACK, VERIFY_DERSIG, VERIFY_DISCOURAGE_UPGRADABLE_NOPS,
    VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM, VERIFY_LOW_S, VERIFY_MINIMALDATA,
    VERIFY_MINIMALIF, VERIFY_NULLDUMMY, VERIFY_NULLFAIL, VERIFY_STRICTENC, VERIFY_WITNESS,
    VERIFY_WITNESS_PUBKEYTYPE,
};

/// The flag superset enforced on relay-pool candidates.
pub const STANDARD_VERIFY_FLAGS: u32 = MANDATORY_VERIFY_FLAGS
    | VERIFY_DERSIG
    | VERIFY_STRICTENC
    | VERIFY_LOW_S
    | VERIFY_NULLDUMMY
    | VERIFY_MINIMALDATA
    | VERIFY_DISCOURAGE_UPGRADABLE_NOPS
    | VERIFY_CLEANSTACK
    | VERIFY_CHECKLOCKTIMEVERIFY
    | VERIFY_CHECKSEQUENCEVERIFY
    | VERIFY_WITNESS
    | VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM
    | VERIFY_MINIMALIF
    | VERIFY_NULLFAIL
    | VERIFY_WITNESS_PUBKEYTYPE;

/// The biggest 'standard' txin: a 15-of-15 P2SH multisig with compressed
/// keys, rounded up for future-proofing.
pub const MAX_STANDARD_SCRIPT_SIG_SIZE: usize = 1650;
/// Upper bound on relayed transaction weight in bytes.
pub const MAX_STANDARD_TX_SIZE: usize = 100_000;
/// Sigop allowance for an unrecognized P2SH redeem script.
pub const MAX_P2SH_SIGOPS: u32 = 15;
/// Default relay fee floor, in satoshis per 1000 serialized bytes.
pub const DEFAULT_MIN_RELAY_FEE_RATE: u64 = 1000;

/// Semantic shape of a locking script.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TemplateKind {
    PubKey,
    PubKeyHash,
    ScriptHash,
    MultiSig,
    NullData,
    NonStandard,
}

/// A classified locking script: the template tag plus the parameters
/// extracted from it, in script order.
///
/// For [`TemplateKind::MultiSig`] the parameters are the required-count byte,
/// the public keys, and the total-count byte, exactly as the script encodes
/// them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptTemplate {
    pub kind: TemplateKind,
    pub data: Vec<Vec<u8>>,
}

impl ScriptTemplate {
    fn non_standard() -> Self {
        Self {
            kind: TemplateKind::NonStandard,
            data: Vec::new(),
        }
    }

    /// `(required, total)` signer counts for a multisignature template.
    pub fn multisig_counts(&self) -> Option<(u8, u8)> {
        if self.kind != TemplateKind::MultiSig {
            return None;
        }
        let required = *self.data.first()?.first()?;
        let total = *self.data.last()?.first()?;
        Some((required, total))
    }

    /// Public keys of a multisignature template, in script order.
    pub fn multisig_pubkeys(&self) -> &[Vec<u8>] {
        if self.kind == TemplateKind::MultiSig && self.data.len() >= 2 {
            &self.data[1..self.data.len() - 1]
        } else {
            &[]
        }
    }
}

/// Matches a locking script against the known templates, most specific first.
///
/// Total: never fails, returns [`TemplateKind::NonStandard`] for anything
/// unrecognized (including superficially multisig-shaped scripts whose counts
/// or key pushes do not hold up).
pub fn classify(script: &Script) -> ScriptTemplate {
    let bytes = script.as_bytes();

    // Pay-to-key-hash: DUP HASH160 <20 bytes> EQUALVERIFY CHECKSIG
    if bytes.len() == 25
        && bytes[0] == all::OP_DUP.to_u8()
        && bytes[1] == all::OP_HASH160.to_u8()
        && bytes[2] == 0x14
        && bytes[23] == all::OP_EQUALVERIFY.to_u8()
        && bytes[24] == all::OP_CHECKSIG.to_u8()
    {
        return ScriptTemplate {
            kind: TemplateKind::PubKeyHash,
            data: vec![bytes[3..23].to_vec()],
        };
    }

    // Pay-to-key: <pubkey> CHECKSIG
    if bytes.len() >= 2
        && bytes[bytes.len() - 1] == all::OP_CHECKSIG.to_u8()
        && bytes[0] as usize == bytes.len() - 2
        && is_plausible_pubkey(&bytes[1..bytes.len() - 1])
    {
        return ScriptTemplate {
            kind: TemplateKind::PubKey,
            data: vec![bytes[1..bytes.len() - 1].to_vec()],
        };
    }

    // Pay-to-script-hash: HASH160 <20 bytes> EQUAL
    if bytes.len() == 23
        && bytes[0] == all::OP_HASH160.to_u8()
        && bytes[1] == 0x14
        && bytes[22] == all::OP_EQUAL.to_u8()
    {
        return ScriptTemplate {
            kind: TemplateKind::ScriptHash,
            data: vec![bytes[2..22].to_vec()],
        };
    }

    if let Some(template) = match_multisig(script) {
        return template;
    }

    // Provably unspendable data carrier: OP_RETURN followed by pushes only.
    if !bytes.is_empty()
        && bytes[0] == all::OP_RETURN.to_u8()
        && Script::from_bytes(&bytes[1..]).is_push_only()
    {
        return ScriptTemplate {
            kind: TemplateKind::NullData,
            data: Vec::new(),
        };
    }

    ScriptTemplate::non_standard()
}

fn match_multisig(script: &Script) -> Option<ScriptTemplate> {
    let mut instructions = Vec::new();
    for instruction in script.instructions() {
        instructions.push(instruction.ok()?);
    }
    if instructions.len() < 4 {
        return None;
    }

    let required = small_int(&instructions[0])?;
    let total = small_int(&instructions[instructions.len() - 2])?;
    match instructions[instructions.len() - 1] {
        Instruction::Op(op) if op == all::OP_CHECKMULTISIG => {}
        _ => return None,
    }

    let key_instructions = &instructions[1..instructions.len() - 2];
    // The shape only counts as multisig when there are exactly `total`
    // plausible key pushes between the count opcodes and the counts are sane.
    if !(1..=16).contains(&required) || !(1..=16).contains(&total) || required > total {
        return None;
    }
    if key_instructions.len() != total as usize {
        return None;
    }

    let mut data = Vec::with_capacity(total as usize + 2);
    data.push(vec![required]);
    for instruction in key_instructions {
        match instruction {
            Instruction::PushBytes(push) if is_plausible_pubkey(push.as_bytes()) => {
                data.push(push.as_bytes().to_vec());
            }
            _ => return None,
        }
    }
    data.push(vec![total]);

    Some(ScriptTemplate {
        kind: TemplateKind::MultiSig,
        data,
    })
}

fn small_int(instruction: &Instruction<'_>) -> Option<u8> {
    match instruction {
        Instruction::Op(op) => {
            let value = op.to_u8();
            if value >= all::OP_PUSHNUM_1.to_u8() && value <= all::OP_PUSHNUM_16.to_u8() {
                Some(value - all::OP_PUSHNUM_1.to_u8() + 1)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn is_plausible_pubkey(data: &[u8]) -> bool {
    match data.first() {
        Some(0x02 | 0x03) => data.len() == 33,
        Some(0x04 | 0x06 | 0x07) => data.len() == 65,
        _ => false,
    }
}

/// How many stack elements an unlocking script for this template pushes.
pub fn script_sig_args_expected(template: &ScriptTemplate) -> Option<usize> {
    match template.kind {
        TemplateKind::NonStandard | TemplateKind::NullData => None,
        TemplateKind::PubKey => Some(1),
        // Signature plus the public key revealing the hash.
        TemplateKind::PubKeyHash => Some(2),
        // The serialized redeem script; its own arguments are counted by the
        // caller once the redeem script is known.
        TemplateKind::ScriptHash => Some(1),
        // One per required signature plus the consumed dummy element.
        TemplateKind::MultiSig => {
            let (required, _) = template.multisig_counts()?;
            Some(required as usize + 1)
        }
    }
}

/// Builds a pay-to-key locking script.
pub fn pay_to_pubkey(pubkey: &[u8]) -> Option<ScriptBuf> {
    if !is_plausible_pubkey(pubkey) {
        return None;
    }
    let push = PushBytesBuf::try_from(pubkey.to_vec()).ok()?;
    Some(
        Builder::new()
            .push_slice(push)
            .push_opcode(all::OP_CHECKSIG)
            .into_script(),
    )
}

/// Builds a pay-to-key-hash locking script.
pub fn pay_to_pubkey_hash(hash: &[u8; 20]) -> ScriptBuf {
    Builder::new()
        .push_opcode(all::OP_DUP)
        .push_opcode(all::OP_HASH160)
        .push_slice(hash)
        .push_opcode(all::OP_EQUALVERIFY)
        .push_opcode(all::OP_CHECKSIG)
        .into_script()
}

/// Builds a pay-to-script-hash locking script.
pub fn pay_to_script_hash(hash: &[u8; 20]) -> ScriptBuf {
    Builder::new()
        .push_opcode(all::OP_HASH160)
        .push_slice(hash)
        .push_opcode(all::OP_EQUAL)
        .into_script()
}

/// Builds an m-of-n multisignature locking script.
pub fn multisig_script(required: u8, pubkeys: &[Vec<u8>]) -> Option<ScriptBuf> {
    if !(1..=16).contains(&required)
        || pubkeys.is_empty()
        || pubkeys.len() > 16
        || required as usize > pubkeys.len()
    {
        return None;
    }
    let mut builder = Builder::new().push_int(required as i64);
    for pubkey in pubkeys {
        if !is_plausible_pubkey(pubkey) {
            return None;
        }
        let push = PushBytesBuf::try_from(pubkey.clone()).ok()?;
        builder = builder.push_slice(push);
    }
    Some(
        builder
            .push_int(pubkeys.len() as i64)
            .push_opcode(all::OP_CHECKMULTISIG)
            .into_script(),
    )
}

/// Builds a provably unspendable data-carrier script.
pub fn null_data_script(data: &[u8]) -> Option<ScriptBuf> {
    let push = PushBytesBuf::try_from(data.to_vec()).ok()?;
    Some(
        Builder::new()
            .push_opcode(all::OP_RETURN)
            .push_slice(push)
            .into_script(),
    )
}

/// Reason a transaction failed the local standardness rules.
///
/// These are relay decisions: a transaction violating them is dropped from
/// the local pool but the violation says nothing about block validity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PolicyError {
    Version,
    TxSize,
    ScriptSigSize,
    ScriptSigNotPushOnly,
    ScriptPubkey,
    BareMultisig,
    Dust,
    MultiOpReturn,
    NonStandardInput,
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            PolicyError::Version => "version",
            PolicyError::TxSize => "tx-size",
            PolicyError::ScriptSigSize => "scriptsig-size",
            PolicyError::ScriptSigNotPushOnly => "scriptsig-not-pushonly",
            PolicyError::ScriptPubkey => "scriptpubkey",
            PolicyError::BareMultisig => "bare-multisig",
            PolicyError::Dust => "dust",
            PolicyError::MultiOpReturn => "multi-op-return",
            PolicyError::NonStandardInput => "bad-txns-nonstandard-inputs",
        };
        f.write_str(token)
    }
}

impl std::error::Error for PolicyError {}

/// The local relay/mining acceptance rules.
///
/// Owned by the embedder and threaded through calls explicitly; there is no
/// ambient global policy.
#[derive(Debug, Clone)]
pub struct StandardPolicy {
    /// Relay bare (non-P2SH) multisig outputs.
    pub permit_bare_multisig: bool,
    /// Fee floor used for the dust threshold, in satoshis per 1000 bytes.
    pub min_relay_fee_rate: u64,
}

impl Default for StandardPolicy {
    fn default() -> Self {
        Self {
            permit_bare_multisig: true,
            min_relay_fee_rate: DEFAULT_MIN_RELAY_FEE_RATE,
        }
    }
}

impl StandardPolicy {
    /// Accepts a locking script for relay: it must classify into a known
    /// template, and bare multisig is capped at x-of-3.
    pub fn approve_script(&self, script: &Script) -> Result<ScriptTemplate, PolicyError> {
        let template = classify(script);
        if template.kind == TemplateKind::NonStandard {
            return Err(PolicyError::ScriptPubkey);
        }
        if template.kind == TemplateKind::MultiSig {
            let (required, total) = template
                .multisig_counts()
                .ok_or(PolicyError::ScriptPubkey)?;
            if !(1..=3).contains(&total) || required > total {
                return Err(PolicyError::ScriptPubkey);
            }
        }
        Ok(template)
    }

    /// Whether an output is uneconomic to spend at the configured fee floor.
    ///
    /// An output is dust when its value is below three times the fee its
    /// spend would cost (serialized output size plus 148 bytes of spending
    /// input). The boundary value itself is not dust.
    pub fn is_dust(&self, output: &TxOut) -> bool {
        let spend_size = consensus::serialize(output).len() as u64 + 148;
        let fee = self.min_relay_fee_rate.saturating_mul(spend_size) / 1000;
        output.value.to_sat() < fee.saturating_mul(3)
    }

    /// Context-free standardness checks over a whole transaction.
    pub fn approve_tx(&self, tx: &Transaction) -> Result<(), PolicyError> {
        if tx.version.0 > 2 || tx.version.0 < 1 {
            return Err(PolicyError::Version);
        }

        // Signature hashing is O(inputs × size), so huge transactions cost
        // the network nearly as much as they cost their sender.
        if consensus::serialize(tx).len() >= MAX_STANDARD_TX_SIZE {
            return Err(PolicyError::TxSize);
        }

        for input in &tx.input {
            if input.script_sig.len() > MAX_STANDARD_SCRIPT_SIG_SIZE {
                return Err(PolicyError::ScriptSigSize);
            }
            if !input.script_sig.is_push_only() {
                return Err(PolicyError::ScriptSigNotPushOnly);
            }
        }

        let mut data_outputs = 0usize;
        for output in &tx.output {
            let template = self.approve_script(&output.script_pubkey)?;
            if template.kind == TemplateKind::NullData {
                data_outputs += 1;
            } else if template.kind == TemplateKind::MultiSig && !self.permit_bare_multisig {
                return Err(PolicyError::BareMultisig);
            } else if self.is_dust(output) {
                return Err(PolicyError::Dust);
            }
        }

        // Only one data carrier per transaction is relayed.
        if data_outputs > 1 {
            return Err(PolicyError::MultiOpReturn);
        }

        Ok(())
    }

    /// Standardness checks that need the spent outputs: unlocking scripts
    /// must carry exactly the arguments their locking template consumes, and
    /// P2SH redeem scripts may not hide excessive signature operations.
    ///
    /// `prevouts` is indexed in input order.
    pub fn approve_tx_inputs(
        &self,
        tx: &Transaction,
        prevouts: &[TxOut],
    ) -> Result<(), PolicyError> {
        if tx.is_coinbase() {
            return Ok(());
        }
        if prevouts.len() != tx.input.len() {
            return Err(PolicyError::NonStandardInput);
        }

        for (input, prevout) in tx.input.iter().zip(prevouts) {
            let template = classify(&prevout.script_pubkey);
            let mut args_expected =
                script_sig_args_expected(&template).ok_or(PolicyError::NonStandardInput)?;

            // This evaluation is cheap: approve_tx has already rejected
            // anything but data pushes in the unlocking script.
            let mut stack = Stack::new();
            if script::eval_script(
                &mut stack,
                &input.script_sig,
                VerifyFlags::NONE,
                &BaseSignatureChecker,
                SigVersion::Base,
            )
            .is_err()
            {
                return Err(PolicyError::NonStandardInput);
            }

            if template.kind == TemplateKind::ScriptHash {
                let redeem_bytes = match stack.last() {
                    Some(bytes) => bytes.clone(),
                    None => return Err(PolicyError::NonStandardInput),
                };
                let redeem_script = ScriptBuf::from_bytes(redeem_bytes);
                let redeem_template = classify(&redeem_script);
                match script_sig_args_expected(&redeem_template) {
                    Some(redeem_args) => args_expected += redeem_args,
                    None => {
                        // Unrecognized redeem scripts pass on a sigop budget
                        // alone; extra stack data is fine for them.
                        if script::count_sigops(&redeem_script, true) > MAX_P2SH_SIGOPS {
                            return Err(PolicyError::NonStandardInput);
                        }
                        continue;
                    }
                }
            }

            if stack.len() != args_expected {
                return Err(PolicyError::NonStandardInput);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, Sequence, TxIn, Witness};

    fn compressed_key(prefix: u8, fill: u8) -> Vec<u8> {
        let mut key = vec![fill; 33];
        key[0] = prefix;
        key
    }

    #[test]
    fn classifier_is_total_on_garbage() {
        for bytes in [
            vec![],
            vec![0x4c],
            vec![0xff, 0xff, 0xff],
            vec![0x01],
            vec![all::OP_CHECKMULTISIG.to_u8()],
        ] {
            let template = classify(Script::from_bytes(&bytes));
            assert_eq!(template.kind, TemplateKind::NonStandard, "{bytes:02x?}");
        }
    }

    #[test]
    fn template_builders_roundtrip() {
        let key = compressed_key(0x02, 0x11);
        let hash = [0xabu8; 20];

        let script = pay_to_pubkey(&key).unwrap();
        assert_eq!(classify(&script).kind, TemplateKind::PubKey);
        assert_eq!(classify(&script).data, vec![key.clone()]);

        let script = pay_to_pubkey_hash(&hash);
        assert_eq!(classify(&script).kind, TemplateKind::PubKeyHash);
        assert_eq!(classify(&script).data, vec![hash.to_vec()]);

        let script = pay_to_script_hash(&hash);
        assert_eq!(classify(&script).kind, TemplateKind::ScriptHash);

        let keys = vec![compressed_key(0x02, 1), compressed_key(0x03, 2)];
        let script = multisig_script(2, &keys).unwrap();
        let template = classify(&script);
        assert_eq!(template.kind, TemplateKind::MultiSig);
        assert_eq!(template.multisig_counts(), Some((2, 2)));
        assert_eq!(template.multisig_pubkeys(), &keys[..]);

        let script = null_data_script(b"hello").unwrap();
        assert_eq!(classify(&script).kind, TemplateKind::NullData);
    }

    #[test]
    fn multisig_with_wrong_push_count_is_nonstandard() {
        // Claims 3 keys but carries 2.
        let keys = vec![compressed_key(0x02, 1), compressed_key(0x03, 2)];
        let mut builder = Builder::new().push_int(1);
        for key in &keys {
            let push = PushBytesBuf::try_from(key.clone()).unwrap();
            builder = builder.push_slice(push);
        }
        let script = builder
            .push_int(3)
            .push_opcode(all::OP_CHECKMULTISIG)
            .into_script();
        assert_eq!(classify(&script).kind, TemplateKind::NonStandard);
    }

    #[test]
    fn multisig_with_required_above_total_is_nonstandard() {
        let keys = vec![compressed_key(0x02, 1)];
        let push = PushBytesBuf::try_from(keys[0].clone()).unwrap();
        let script = Builder::new()
            .push_int(2)
            .push_slice(push)
            .push_int(1)
            .push_opcode(all::OP_CHECKMULTISIG)
            .into_script();
        assert_eq!(classify(&script).kind, TemplateKind::NonStandard);
    }

    #[test]
    fn dust_boundary_is_not_dust() {
        let policy = StandardPolicy::default();
        let output = TxOut {
            value: Amount::from_sat(0),
            script_pubkey: pay_to_pubkey_hash(&[0u8; 20]),
        };
        // 34-byte serialized output + 148-byte spend at 1000 sat/kB, tripled.
        let spend_size = consensus::serialize(&output).len() as u64 + 148;
        let threshold = 3 * (policy.min_relay_fee_rate * spend_size / 1000);

        let at_threshold = TxOut {
            value: Amount::from_sat(threshold),
            ..output.clone()
        };
        assert!(!policy.is_dust(&at_threshold));

        let below = TxOut {
            value: Amount::from_sat(threshold - 1),
            ..output
        };
        assert!(policy.is_dust(&below));
    }

    #[test]
    fn bare_multisig_gated_by_policy_knob() {
        let keys = vec![compressed_key(0x02, 1), compressed_key(0x03, 2)];
        let tx = Transaction {
            version: Version(1),
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::default(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(100_000),
                script_pubkey: multisig_script(1, &keys).unwrap(),
            }],
        };

        let permissive = StandardPolicy::default();
        permissive.approve_tx(&tx).expect("bare multisig allowed");

        let strict = StandardPolicy {
            permit_bare_multisig: false,
            ..StandardPolicy::default()
        };
        assert_eq!(
            strict.approve_tx(&tx).unwrap_err(),
            PolicyError::BareMultisig
        );
    }

    #[test]
    fn four_key_bare_multisig_is_rejected() {
        let keys: Vec<_> = (1..=4).map(|n| compressed_key(0x02, n)).collect();
        let policy = StandardPolicy::default();
        let script = multisig_script(2, &keys).unwrap();
        assert_eq!(classify(&script).kind, TemplateKind::MultiSig);
        assert_eq!(
            policy.approve_script(&script).unwrap_err(),
            PolicyError::ScriptPubkey
        );
    }

    #[test]
    fn input_arity_enforced() {
        let hash = [0x42u8; 20];
        let prevout = TxOut {
            value: Amount::from_sat(50_000),
            script_pubkey: pay_to_pubkey_hash(&hash),
        };
        // A p2pkh spend pushing three elements instead of two.
        let script_sig = Builder::new()
            .push_slice([0x01, 0x02])
            .push_slice([0x03, 0x04])
            .push_slice([0x05, 0x06])
            .into_script();
        let tx = Transaction {
            version: Version(1),
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: bitcoin::Txid::from_byte_array([9u8; 32]),
                    vout: 0,
                },
                script_sig,
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(40_000),
                script_pubkey: pay_to_pubkey_hash(&hash),
            }],
        };

        let policy = StandardPolicy::default();
        assert_eq!(
            policy.approve_tx_inputs(&tx, &[prevout]).unwrap_err(),
            PolicyError::NonStandardInput
        );
    }
}
