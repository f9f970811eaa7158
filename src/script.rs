//! Script interpreter and verifier.
//!
//! [`eval_script`] runs one script against a stack; [`verify_script`] is the
//! orchestration used for spend validation: unlocking script, locking script,
//! then (flag-gated) the P2SH redeem script and witness-v0 programs. The
//! interpreter itself is transaction-agnostic — everything that depends on the
//! spending transaction goes through the [`SignatureChecker`] capability.

use bitcoin::blockdata::script::{Builder, PushBytesBuf, Script, ScriptBuf};
use bitcoin::hashes::{hash160, ripemd160, sha1, sha256, sha256d, Hash};
use bitcoin::opcodes::{all, Opcode};
use bitcoin::secp256k1::ecdsa::Signature as EcdsaSignature;
use bitcoin::Witness;

use core::fmt;

use crate::checker::SignatureChecker;
use crate::{
    VERIFY_CHECKLOCKTIMEVERIFY, VERIFY_CHECKSEQUENCEVERIFY, VERIFY_CLEANSTACK, VERIFY_DERSIG,
    VERIFY_DISCOURAGE_UPGRADABLE_NOPS, VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM, VERIFY_LOW_S,
    VERIFY_MINIMALDATA, VERIFY_MINIMALIF, VERIFY_NULLDUMMY, VERIFY_NULLFAIL, VERIFY_P2SH,
    VERIFY_SIGPUSHONLY, VERIFY_STRICTENC, VERIFY_WITNESS, VERIFY_WITNESS_PUBKEYTYPE,
};

pub(crate) const MAX_STACK_SIZE: usize = 1000;
pub(crate) const MAX_SCRIPT_SIZE: usize = 10_000;
pub(crate) const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
pub(crate) const MAX_OPS_PER_SCRIPT: usize = 201;
pub(crate) const MAX_PUBKEYS_PER_MULTISIG: usize = 20;
const SCRIPTNUM_MAX_LEN: usize = 4;
const SCRIPTNUM_MAX_LEN_EXTENDED: usize = 5;

const SUPPORTED_FLAGS: u32 = VERIFY_P2SH
    | VERIFY_STRICTENC
    | VERIFY_DERSIG
    | VERIFY_LOW_S
    | VERIFY_NULLDUMMY
    | VERIFY_SIGPUSHONLY
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

/// Reason a script failed to verify.
///
/// The variants mirror the failure taxonomy of the original C++ interpreter so
/// that callers can distinguish malformed data from rule violations.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScriptError {
    Unknown,
    EvalFalse,
    OpReturn,
    ScriptSize,
    PushSize,
    OpCount,
    StackSize,
    SigCount,
    PubkeyCount,
    Verify,
    EqualVerify,
    CheckSigVerify,
    CheckMultiSigVerify,
    NumEqualVerify,
    BadOpcode,
    DisabledOpcode,
    InvalidStackOperation,
    InvalidAltstackOperation,
    UnbalancedConditional,
    NegativeLockTime,
    UnsatisfiedLockTime,
    SigHashType,
    SigDer,
    MinimalData,
    SigPushOnly,
    SigHighS,
    SigNullDummy,
    PubkeyType,
    CleanStack,
    MinimalIf,
    NullFail,
    DiscourageUpgradableNops,
    DiscourageUpgradableWitnessProgram,
    WitnessProgramWrongLength,
    WitnessProgramWitnessEmpty,
    WitnessProgramMismatch,
    WitnessMalleated,
    WitnessMalleatedP2SH,
    WitnessUnexpected,
    WitnessPubkeyType,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ScriptError::Unknown => "unknown error",
            ScriptError::EvalFalse => "script evaluated without error but finished with a false/empty top stack element",
            ScriptError::OpReturn => "OP_RETURN was encountered",
            ScriptError::ScriptSize => "script is too big",
            ScriptError::PushSize => "push value size limit exceeded",
            ScriptError::OpCount => "operation limit exceeded",
            ScriptError::StackSize => "stack size limit exceeded",
            ScriptError::SigCount => "signature count negative or greater than pubkey count",
            ScriptError::PubkeyCount => "pubkey count negative or limit exceeded",
            ScriptError::Verify => "script failed an OP_VERIFY operation",
            ScriptError::EqualVerify => "script failed an OP_EQUALVERIFY operation",
            ScriptError::CheckSigVerify => "script failed an OP_CHECKSIGVERIFY operation",
            ScriptError::CheckMultiSigVerify => "script failed an OP_CHECKMULTISIGVERIFY operation",
            ScriptError::NumEqualVerify => "script failed an OP_NUMEQUALVERIFY operation",
            ScriptError::BadOpcode => "opcode missing or not understood",
            ScriptError::DisabledOpcode => "attempted to use a disabled opcode",
            ScriptError::InvalidStackOperation => "operation not valid with the current stack size",
            ScriptError::InvalidAltstackOperation => "operation not valid with the current altstack size",
            ScriptError::UnbalancedConditional => "invalid OP_IF construction",
            ScriptError::NegativeLockTime => "negative locktime",
            ScriptError::UnsatisfiedLockTime => "locktime requirement not satisfied",
            ScriptError::SigHashType => "signature hash type missing or not understood",
            ScriptError::SigDer => "non-canonical DER signature",
            ScriptError::MinimalData => "data push larger than necessary",
            ScriptError::SigPushOnly => "only push operators allowed in signatures",
            ScriptError::SigHighS => "non-canonical signature: S value is unnecessarily high",
            ScriptError::SigNullDummy => "dummy CHECKMULTISIG argument must be zero",
            ScriptError::PubkeyType => "public key is neither compressed or uncompressed",
            ScriptError::CleanStack => "extra items left on stack after execution",
            ScriptError::MinimalIf => "OP_IF/NOTIF argument must be minimal",
            ScriptError::NullFail => "signature must be zero for failed CHECK(MULTI)SIG operation",
            ScriptError::DiscourageUpgradableNops => "NOPx reserved for soft-fork upgrades",
            ScriptError::DiscourageUpgradableWitnessProgram => "witness version reserved for soft-fork upgrades",
            ScriptError::WitnessProgramWrongLength => "witness program has incorrect length",
            ScriptError::WitnessProgramWitnessEmpty => "witness program was passed an empty witness",
            ScriptError::WitnessProgramMismatch => "witness program hash mismatch",
            ScriptError::WitnessMalleated => "witness requires empty scriptSig",
            ScriptError::WitnessMalleatedP2SH => "witness requires only-redeemscript scriptSig",
            ScriptError::WitnessUnexpected => "witness provided for non-witness script",
            ScriptError::WitnessPubkeyType => "using non-compressed keys in segwit",
        };
        f.write_str(text)
    }
}

impl std::error::Error for ScriptError {}

/// Error returned by [`VerifyFlags::from_bits`] for unassigned bits.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InvalidFlagsError;

/// Validated wrapper for script verification flags.
///
/// Construction rejects unassigned bits and applies the implied bits
/// (WITNESS requires P2SH), so the interpreter never has to re-check.
#[derive(Debug, Clone, Copy)]
pub struct VerifyFlags(u32);

impl VerifyFlags {
    /// The empty flag set.
    pub const NONE: VerifyFlags = VerifyFlags(0);

    pub fn from_bits(bits: u32) -> Result<Self, InvalidFlagsError> {
        if bits & !SUPPORTED_FLAGS != 0 {
            return Err(InvalidFlagsError);
        }
        Ok(Self(Self::apply_implied_bits(bits)))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn has(self, mask: u32) -> bool {
        self.0 & mask != 0
    }

    fn apply_implied_bits(mut bits: u32) -> u32 {
        if bits & VERIFY_WITNESS != 0 {
            bits |= VERIFY_P2SH;
        }
        bits
    }
}

/// Which signature-hashing scheme a script executes under.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SigVersion {
    /// Pre-segwit scripts (scriptSig/scriptPubKey/redeem script).
    Base,
    /// Version-0 witness programs (BIP143 digests).
    WitnessV0,
}

/// The interpreter's data stack: byte vectors, LIFO, bounded element size.
#[derive(Debug, Default, Clone)]
pub struct Stack {
    items: Vec<Vec<u8>>,
}

impl Stack {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn from_items(items: Vec<Vec<u8>>) -> Result<Self, ScriptError> {
        if items.len() > MAX_STACK_SIZE {
            return Err(ScriptError::StackSize);
        }
        for item in &items {
            if item.len() > MAX_SCRIPT_ELEMENT_SIZE {
                return Err(ScriptError::PushSize);
            }
        }
        Ok(Self { items })
    }

    pub fn from_witness(witness: &Witness) -> Result<Self, ScriptError> {
        let items = witness.iter().map(|elem| elem.to_vec()).collect();
        Self::from_items(items)
    }

    pub fn push(&mut self, data: Vec<u8>) -> Result<(), ScriptError> {
        if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
            return Err(ScriptError::PushSize);
        }
        self.items.push(data);
        Ok(())
    }

    pub fn push_bool(&mut self, value: bool) -> Result<(), ScriptError> {
        if value {
            self.push(vec![1])
        } else {
            self.push(Vec::new())
        }
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.items.pop()
    }

    pub fn last(&self) -> Option<&Vec<u8>> {
        self.items.last()
    }

    pub fn items(&self) -> &[Vec<u8>] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Vec<u8>> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Evaluates a single script against `stack` under `flags`.
///
/// Signature and locktime opcodes are delegated to `checker`; with
/// [`crate::BaseSignatureChecker`] this evaluates pure data scripts.
pub fn eval_script<C: SignatureChecker>(
    stack: &mut Stack,
    script: &Script,
    flags: VerifyFlags,
    checker: &C,
    sig_version: SigVersion,
) -> Result<(), ScriptError> {
    let mut machine = Machine {
        flags,
        checker,
        sig_version,
        exec_stack: Vec::new(),
        altstack: Vec::new(),
        op_count: 0,
    };
    machine.run(stack, script.as_bytes())
}

/// Verifies that `script_sig` (+ witness) satisfies `script_pubkey`.
///
/// This is the full spend-validation orchestration: unlocking script, locking
/// script, then — when the respective flags are set and the locking script has
/// the right shape — the P2SH redeem script and witness-v0 programs.
pub fn verify_script<C: SignatureChecker>(
    script_sig: &Script,
    script_pubkey: &Script,
    witness: &Witness,
    flags: VerifyFlags,
    checker: &C,
) -> Result<(), ScriptError> {
    if flags.has(VERIFY_SIGPUSHONLY) && !script_sig.is_push_only() {
        return Err(ScriptError::SigPushOnly);
    }

    let mut stack = Stack::new();
    eval_script(&mut stack, script_sig, flags, checker, SigVersion::Base)?;
    let saved_stack = if flags.has(VERIFY_P2SH) && script_pubkey.is_p2sh() {
        Some(stack.clone())
    } else {
        None
    };
    eval_script(&mut stack, script_pubkey, flags, checker, SigVersion::Base)?;
    match stack.last() {
        Some(top) if cast_to_bool(top) => {}
        _ => return Err(ScriptError::EvalFalse),
    }

    let mut had_witness = false;
    if flags.has(VERIFY_WITNESS) {
        if let Some((version, program)) = witness_program(script_pubkey.as_bytes()) {
            had_witness = true;
            if !script_sig.is_empty() {
                // A scriptSig alongside a native witness program is malleable.
                return Err(ScriptError::WitnessMalleated);
            }
            execute_witness_program(version, program, witness, flags, checker)?;
            stack = Stack::new();
            stack.push(vec![1])?;
        }
    }

    if let Some(mut p2sh_stack) = saved_stack {
        if !script_sig.is_push_only() {
            return Err(ScriptError::SigPushOnly);
        }
        let redeem_bytes = match p2sh_stack.pop() {
            Some(bytes) => bytes,
            None => return Err(ScriptError::EvalFalse),
        };
        let redeem_script = ScriptBuf::from_bytes(redeem_bytes);
        eval_script(&mut p2sh_stack, &redeem_script, flags, checker, SigVersion::Base)?;
        match p2sh_stack.last() {
            Some(top) if cast_to_bool(top) => {}
            _ => return Err(ScriptError::EvalFalse),
        }

        if flags.has(VERIFY_WITNESS) {
            if let Some((version, program)) = witness_program(redeem_script.as_bytes()) {
                had_witness = true;
                let expected = single_push_script(redeem_script.as_bytes())
                    .map_err(|_| ScriptError::WitnessMalleatedP2SH)?;
                if script_sig.as_bytes() != expected.as_bytes() {
                    return Err(ScriptError::WitnessMalleatedP2SH);
                }
                execute_witness_program(version, program, witness, flags, checker)?;
                p2sh_stack = Stack::new();
                p2sh_stack.push(vec![1])?;
            }
        }

        stack = p2sh_stack;
    }

    if flags.has(VERIFY_CLEANSTACK) && stack.len() != 1 {
        return Err(ScriptError::CleanStack);
    }

    if flags.has(VERIFY_WITNESS) && !had_witness && !witness.is_empty() {
        return Err(ScriptError::WitnessUnexpected);
    }

    Ok(())
}

fn execute_witness_program<C: SignatureChecker>(
    version: u8,
    program: &[u8],
    witness: &Witness,
    flags: VerifyFlags,
    checker: &C,
) -> Result<(), ScriptError> {
    if version != 0 {
        if flags.has(VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM) {
            return Err(ScriptError::DiscourageUpgradableWitnessProgram);
        }
        // Unknown versions succeed without evaluation to keep them soft-forkable.
        return Ok(());
    }

    match program.len() {
        20 => {
            // P2WPKH: the witness is exactly <signature> <pubkey>, run against
            // the implied pay-to-pubkey-hash script.
            if witness.len() != 2 {
                return Err(ScriptError::WitnessProgramMismatch);
            }
            let mut stack = Stack::from_witness(witness)?;
            let program_push = PushBytesBuf::try_from(program.to_vec())
                .map_err(|_| ScriptError::WitnessProgramMismatch)?;
            let script = Builder::new()
                .push_opcode(all::OP_DUP)
                .push_opcode(all::OP_HASH160)
                .push_slice(program_push)
                .push_opcode(all::OP_EQUALVERIFY)
                .push_opcode(all::OP_CHECKSIG)
                .into_script();
            eval_script(&mut stack, &script, flags, checker, SigVersion::WitnessV0)?;
            ensure_witness_success(&stack)
        }
        32 => {
            // P2WSH: the last witness element is the script, the rest seed the stack.
            if witness.is_empty() {
                return Err(ScriptError::WitnessProgramWitnessEmpty);
            }
            let witness_script_bytes = witness[witness.len() - 1].to_vec();
            let script_hash = sha256::Hash::hash(&witness_script_bytes);
            if script_hash.as_byte_array().as_slice() != program {
                return Err(ScriptError::WitnessProgramMismatch);
            }
            let items = witness
                .iter()
                .take(witness.len() - 1)
                .map(|elem| elem.to_vec())
                .collect();
            let mut stack = Stack::from_items(items)?;
            let witness_script = ScriptBuf::from_bytes(witness_script_bytes);
            eval_script(&mut stack, &witness_script, flags, checker, SigVersion::WitnessV0)?;
            ensure_witness_success(&stack)
        }
        _ => Err(ScriptError::WitnessProgramWrongLength),
    }
}

fn ensure_witness_success(stack: &Stack) -> Result<(), ScriptError> {
    // Witness scripts implicitly require clean-stack behaviour.
    if stack.len() != 1 {
        return Err(ScriptError::CleanStack);
    }
    if !cast_to_bool(stack.last().expect("stack length checked")) {
        return Err(ScriptError::EvalFalse);
    }
    Ok(())
}

struct Machine<'a, C: SignatureChecker> {
    flags: VerifyFlags,
    checker: &'a C,
    sig_version: SigVersion,
    exec_stack: Vec<bool>,
    altstack: Vec<Vec<u8>>,
    op_count: usize,
}

impl<'a, C: SignatureChecker> Machine<'a, C> {
    fn run(&mut self, stack: &mut Stack, bytes: &[u8]) -> Result<(), ScriptError> {
        if bytes.is_empty() {
            return Ok(());
        }
        if bytes.len() > MAX_SCRIPT_SIZE {
            return Err(ScriptError::ScriptSize);
        }

        let mut cursor = 0usize;
        let mut code_separator = 0usize;
        let script_len = bytes.len();

        while cursor < script_len {
            let opcode = bytes[cursor];
            cursor += 1;
            let should_execute = self.exec_stack.iter().all(|&cond| cond);

            if (0x01..=0x4b).contains(&opcode) {
                let push_len = opcode as usize;
                if cursor + push_len > script_len {
                    return Err(ScriptError::BadOpcode);
                }
                if should_execute {
                    if self.flags.has(VERIFY_MINIMALDATA)
                        && !is_minimal_push(opcode, &bytes[cursor..cursor + push_len])
                    {
                        return Err(ScriptError::MinimalData);
                    }
                    stack.push(bytes[cursor..cursor + push_len].to_vec())?;
                }
                cursor += push_len;
            } else if opcode == all::OP_PUSHDATA1.to_u8()
                || opcode == all::OP_PUSHDATA2.to_u8()
                || opcode == all::OP_PUSHDATA4.to_u8()
            {
                let width = match opcode {
                    x if x == all::OP_PUSHDATA1.to_u8() => 1,
                    x if x == all::OP_PUSHDATA2.to_u8() => 2,
                    _ => 4,
                };
                let push_len = read_push_length(bytes, &mut cursor, width)?;
                if push_len > MAX_SCRIPT_ELEMENT_SIZE {
                    return Err(ScriptError::PushSize);
                }
                if cursor + push_len > script_len {
                    return Err(ScriptError::BadOpcode);
                }
                if should_execute {
                    if self.flags.has(VERIFY_MINIMALDATA)
                        && !is_minimal_push(opcode, &bytes[cursor..cursor + push_len])
                    {
                        return Err(ScriptError::MinimalData);
                    }
                    stack.push(bytes[cursor..cursor + push_len].to_vec())?;
                }
                cursor += push_len;
            } else {
                let op = Opcode::from(opcode);

                // The operation budget is spent even inside a skipped branch.
                if opcode > all::OP_PUSHNUM_16.to_u8() {
                    self.add_ops(1)?;
                }
                if is_disabled_opcode(op) {
                    return Err(ScriptError::DisabledOpcode);
                }
                // OP_VERIF/OP_VERNOTIF invalidate the script whether or not
                // their branch executes.
                if matches!(op, all::OP_VERIF | all::OP_VERNOTIF) {
                    return Err(ScriptError::BadOpcode);
                }

                if is_control_flow(op) {
                    self.handle_control_flow(stack, op, should_execute)?;
                } else if should_execute {
                    if op == all::OP_CODESEPARATOR {
                        code_separator = cursor;
                    } else {
                        self.execute_opcode(stack, op, bytes, code_separator)?;
                    }
                }
            }

            if stack.len() + self.altstack.len() > MAX_STACK_SIZE {
                return Err(ScriptError::StackSize);
            }
        }

        if !self.exec_stack.is_empty() {
            return Err(ScriptError::UnbalancedConditional);
        }

        Ok(())
    }

    fn add_ops(&mut self, count: usize) -> Result<(), ScriptError> {
        self.op_count += count;
        if self.op_count > MAX_OPS_PER_SCRIPT {
            Err(ScriptError::OpCount)
        } else {
            Ok(())
        }
    }

    fn handle_control_flow(
        &mut self,
        stack: &mut Stack,
        op: Opcode,
        should_execute: bool,
    ) -> Result<(), ScriptError> {
        use all::*;

        match op {
            OP_IF | OP_NOTIF => {
                let mut value = false;
                if should_execute {
                    let condition = stack
                        .pop()
                        .ok_or(ScriptError::UnbalancedConditional)?;
                    let enforce_minimal_if = self.sig_version == SigVersion::WitnessV0
                        && self.flags.has(VERIFY_MINIMALIF);
                    if enforce_minimal_if
                        && !condition.is_empty()
                        && !(condition.len() == 1 && condition[0] == 1)
                    {
                        return Err(ScriptError::MinimalIf);
                    }
                    value = cast_to_bool(&condition);
                    if op == OP_NOTIF {
                        value = !value;
                    }
                }
                self.exec_stack.push(value);
            }
            OP_ELSE => {
                let top = self
                    .exec_stack
                    .last_mut()
                    .ok_or(ScriptError::UnbalancedConditional)?;
                *top = !*top;
            }
            OP_ENDIF => {
                if self.exec_stack.pop().is_none() {
                    return Err(ScriptError::UnbalancedConditional);
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn execute_opcode(
        &mut self,
        stack: &mut Stack,
        op: Opcode,
        script_bytes: &[u8],
        code_separator: usize,
    ) -> Result<(), ScriptError> {
        use all::*;

        let opcode = op.to_u8();
        let require_minimal = self.flags.has(VERIFY_MINIMALDATA);

        if matches!(
            op,
            OP_RESERVED | OP_RESERVED1 | OP_RESERVED2 | OP_VER | OP_INVALIDOPCODE
        ) {
            return Err(ScriptError::BadOpcode);
        }

        if opcode == OP_PUSHBYTES_0.to_u8() {
            return stack.push(Vec::new());
        }
        if opcode >= OP_PUSHNUM_1.to_u8() && opcode <= OP_PUSHNUM_16.to_u8() {
            let value = (opcode - OP_PUSHNUM_1.to_u8() + 1) as i64;
            return stack.push(encode_num(value));
        }

        match op {
            OP_PUSHNUM_NEG1 => {
                stack.push(encode_num(-1))?;
            }
            OP_NOP => {}
            OP_NOP1 | OP_NOP4 | OP_NOP5 | OP_NOP6 | OP_NOP7 | OP_NOP8 | OP_NOP9 | OP_NOP10 => {
                if self.flags.has(VERIFY_DISCOURAGE_UPGRADABLE_NOPS) {
                    return Err(ScriptError::DiscourageUpgradableNops);
                }
            }
            OP_CLTV => {
                if !self.flags.has(VERIFY_CHECKLOCKTIMEVERIFY) {
                    if self.flags.has(VERIFY_DISCOURAGE_UPGRADABLE_NOPS) {
                        return Err(ScriptError::DiscourageUpgradableNops);
                    }
                } else {
                    let lock_time =
                        self.peek_scriptnum(stack, require_minimal, SCRIPTNUM_MAX_LEN_EXTENDED)?;
                    if lock_time < 0 {
                        return Err(ScriptError::NegativeLockTime);
                    }
                    if !self.checker.check_lock_time(lock_time) {
                        return Err(ScriptError::UnsatisfiedLockTime);
                    }
                }
            }
            OP_CSV => {
                if !self.flags.has(VERIFY_CHECKSEQUENCEVERIFY) {
                    if self.flags.has(VERIFY_DISCOURAGE_UPGRADABLE_NOPS) {
                        return Err(ScriptError::DiscourageUpgradableNops);
                    }
                } else {
                    let sequence =
                        self.peek_scriptnum(stack, require_minimal, SCRIPTNUM_MAX_LEN_EXTENDED)?;
                    if sequence < 0 {
                        return Err(ScriptError::NegativeLockTime);
                    }
                    // Bit 31 set means the operand does not constrain this input.
                    if sequence & (1 << 31) == 0 && !self.checker.check_sequence(sequence) {
                        return Err(ScriptError::UnsatisfiedLockTime);
                    }
                }
            }
            OP_TOALTSTACK => {
                let value = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
                self.altstack.push(value);
            }
            OP_FROMALTSTACK => {
                let value = self
                    .altstack
                    .pop()
                    .ok_or(ScriptError::InvalidAltstackOperation)?;
                stack.push(value)?;
            }
            OP_IFDUP => {
                let value = stack
                    .last()
                    .ok_or(ScriptError::InvalidStackOperation)?
                    .clone();
                if cast_to_bool(&value) {
                    stack.push(value)?;
                }
            }
            OP_DEPTH => {
                let depth = encode_num(stack.len() as i64);
                stack.push(depth)?;
            }
            OP_DUP => {
                let value = stack
                    .last()
                    .ok_or(ScriptError::InvalidStackOperation)?
                    .clone();
                stack.push(value)?;
            }
            OP_DROP => {
                stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
            }
            OP_NIP => {
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let idx = stack.len() - 2;
                stack.items.remove(idx);
            }
            OP_OVER => {
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let value = stack.items[stack.len() - 2].clone();
                stack.push(value)?;
            }
            OP_PICK | OP_ROLL => {
                let depth = self.pop_scriptnum(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
                if depth < 0 || depth as usize >= stack.len() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let idx = stack.len() - 1 - depth as usize;
                let value = if op == OP_ROLL {
                    stack.items.remove(idx)
                } else {
                    stack.items[idx].clone()
                };
                stack.push(value)?;
            }
            OP_ROT => {
                if stack.len() < 3 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let len = stack.len();
                stack.items.swap(len - 3, len - 2);
                stack.items.swap(len - 2, len - 1);
            }
            OP_SWAP => {
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let len = stack.len();
                stack.items.swap(len - 2, len - 1);
            }
            OP_TUCK => {
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let len = stack.len();
                let value = stack.items[len - 1].clone();
                stack.items.insert(len - 2, value);
            }
            OP_2DROP => {
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                stack.pop();
                stack.pop();
            }
            OP_2DUP => {
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let len = stack.len();
                let first = stack.items[len - 2].clone();
                let second = stack.items[len - 1].clone();
                stack.push(first)?;
                stack.push(second)?;
            }
            OP_3DUP => {
                if stack.len() < 3 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let len = stack.len();
                let first = stack.items[len - 3].clone();
                let second = stack.items[len - 2].clone();
                let third = stack.items[len - 1].clone();
                stack.push(first)?;
                stack.push(second)?;
                stack.push(third)?;
            }
            OP_2OVER => {
                if stack.len() < 4 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let len = stack.len();
                let first = stack.items[len - 4].clone();
                let second = stack.items[len - 3].clone();
                stack.push(first)?;
                stack.push(second)?;
            }
            OP_2ROT => {
                if stack.len() < 6 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let len = stack.len();
                let first = stack.items[len - 6].clone();
                let second = stack.items[len - 5].clone();
                stack.items.drain(len - 6..len - 4);
                stack.push(first)?;
                stack.push(second)?;
            }
            OP_2SWAP => {
                if stack.len() < 4 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let len = stack.len();
                stack.items.swap(len - 4, len - 2);
                stack.items.swap(len - 3, len - 1);
            }
            OP_SIZE => {
                let size = {
                    let value = stack.last().ok_or(ScriptError::InvalidStackOperation)?;
                    encode_num(value.len() as i64)
                };
                stack.push(size)?;
            }
            OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                let mut num = self.pop_scriptnum(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
                match op {
                    OP_1ADD => num += 1,
                    OP_1SUB => num -= 1,
                    OP_NEGATE => num = -num,
                    OP_ABS => {
                        if num < 0 {
                            num = -num;
                        }
                    }
                    OP_NOT => num = i64::from(num == 0),
                    OP_0NOTEQUAL => num = i64::from(num != 0),
                    _ => {}
                }
                stack.push(encode_num(num))?;
            }
            OP_ADD
            | OP_SUB
            | OP_BOOLAND
            | OP_BOOLOR
            | OP_NUMEQUAL
            | OP_NUMEQUALVERIFY
            | OP_NUMNOTEQUAL
            | OP_LESSTHAN
            | OP_GREATERTHAN
            | OP_LESSTHANOREQUAL
            | OP_GREATERTHANOREQUAL
            | OP_MIN
            | OP_MAX => {
                let b = self.pop_scriptnum(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
                let a = self.pop_scriptnum(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
                let result = match op {
                    // Operands fit in 4 bytes, so 64-bit arithmetic cannot wrap.
                    OP_ADD => a + b,
                    OP_SUB => a - b,
                    OP_BOOLAND => i64::from(a != 0 && b != 0),
                    OP_BOOLOR => i64::from(a != 0 || b != 0),
                    OP_NUMEQUAL | OP_NUMEQUALVERIFY => i64::from(a == b),
                    OP_NUMNOTEQUAL => i64::from(a != b),
                    OP_LESSTHAN => i64::from(a < b),
                    OP_GREATERTHAN => i64::from(a > b),
                    OP_LESSTHANOREQUAL => i64::from(a <= b),
                    OP_GREATERTHANOREQUAL => i64::from(a >= b),
                    OP_MIN => a.min(b),
                    OP_MAX => a.max(b),
                    _ => 0,
                };
                stack.push(encode_num(result))?;
                if op == OP_NUMEQUALVERIFY {
                    self.op_verify_with_code(stack, ScriptError::NumEqualVerify)?;
                }
            }
            OP_WITHIN => {
                let max = self.pop_scriptnum(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
                let min = self.pop_scriptnum(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
                let value = self.pop_scriptnum(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
                stack.push_bool(value >= min && value < max)?;
            }
            OP_RIPEMD160 => {
                let data = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
                let hash = ripemd160::Hash::hash(&data);
                stack.push(hash.to_byte_array().to_vec())?;
            }
            OP_SHA1 => {
                let data = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
                let hash = sha1::Hash::hash(&data);
                stack.push(hash.to_byte_array().to_vec())?;
            }
            OP_SHA256 => {
                let data = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
                let hash = sha256::Hash::hash(&data);
                stack.push(hash.to_byte_array().to_vec())?;
            }
            OP_HASH160 => {
                let data = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
                let hash = hash160::Hash::hash(&data);
                stack.push(hash.to_byte_array().to_vec())?;
            }
            OP_HASH256 => {
                let data = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
                let hash = sha256d::Hash::hash(&data);
                stack.push(hash.to_byte_array().to_vec())?;
            }
            OP_EQUAL => self.op_equal(stack)?,
            OP_EQUALVERIFY => {
                self.op_equal(stack)?;
                self.op_verify_with_code(stack, ScriptError::EqualVerify)?;
            }
            OP_VERIFY => self.op_verify_with_code(stack, ScriptError::Verify)?,
            OP_RETURN => return Err(ScriptError::OpReturn),
            OP_CHECKSIG => {
                self.op_checksig(stack, script_bytes, code_separator)?;
            }
            OP_CHECKSIGVERIFY => {
                self.op_checksig(stack, script_bytes, code_separator)?;
                self.op_verify_with_code(stack, ScriptError::CheckSigVerify)?;
            }
            OP_CHECKMULTISIG => {
                self.op_checkmultisig(stack, script_bytes, code_separator)?;
            }
            OP_CHECKMULTISIGVERIFY => {
                self.op_checkmultisig(stack, script_bytes, code_separator)?;
                self.op_verify_with_code(stack, ScriptError::CheckMultiSigVerify)?;
            }
            _ => return Err(ScriptError::BadOpcode),
        }

        Ok(())
    }

    fn op_equal(&mut self, stack: &mut Stack) -> Result<(), ScriptError> {
        let a = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
        let b = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
        stack.push_bool(a == b)
    }

    fn op_verify_with_code(
        &mut self,
        stack: &mut Stack,
        error: ScriptError,
    ) -> Result<(), ScriptError> {
        let value = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
        if !cast_to_bool(&value) {
            return Err(error);
        }
        Ok(())
    }

    fn op_checksig(
        &mut self,
        stack: &mut Stack,
        script_bytes: &[u8],
        code_separator: usize,
    ) -> Result<(), ScriptError> {
        let pubkey = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
        let sig = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;

        let mut subscript = script_bytes[code_separator..].to_vec();
        if self.sig_version == SigVersion::Base {
            // A signature cannot commit to itself: strip its own push.
            let sig_push =
                single_push_script(&sig).map_err(|_| ScriptError::Unknown)?;
            subscript = find_and_delete(&subscript, sig_push.as_bytes()).0;
        }

        self.check_signature_encoding(&sig)?;
        self.check_pubkey_encoding(&pubkey)?;
        let success = self.checker.check_ecdsa_signature(
            &sig,
            &pubkey,
            Script::from_bytes(&subscript),
            self.sig_version,
        );
        if !success && self.flags.has(VERIFY_NULLFAIL) && !sig.is_empty() {
            return Err(ScriptError::NullFail);
        }
        stack.push_bool(success)
    }

    fn op_checkmultisig(
        &mut self,
        stack: &mut Stack,
        script_bytes: &[u8],
        code_separator: usize,
    ) -> Result<(), ScriptError> {
        let require_minimal = self.flags.has(VERIFY_MINIMALDATA);
        let n_keys = self.pop_scriptnum(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
        if n_keys < 0 || n_keys as usize > MAX_PUBKEYS_PER_MULTISIG {
            return Err(ScriptError::PubkeyCount);
        }
        let n_keys = n_keys as usize;
        self.add_ops(n_keys)?;
        if stack.len() < n_keys {
            return Err(ScriptError::InvalidStackOperation);
        }
        let mut pubkeys = Vec::with_capacity(n_keys);
        for _ in 0..n_keys {
            pubkeys.push(stack.pop().ok_or(ScriptError::InvalidStackOperation)?);
        }

        let n_sigs = self.pop_scriptnum(stack, require_minimal, SCRIPTNUM_MAX_LEN)?;
        if n_sigs < 0 || n_sigs as usize > n_keys {
            return Err(ScriptError::SigCount);
        }
        let n_sigs = n_sigs as usize;
        if stack.len() < n_sigs + 1 {
            return Err(ScriptError::InvalidStackOperation);
        }
        let mut sigs = Vec::with_capacity(n_sigs);
        for _ in 0..n_sigs {
            sigs.push(stack.pop().ok_or(ScriptError::InvalidStackOperation)?);
        }

        // The historical off-by-one consumes one extra element.
        let dummy = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
        if self.flags.has(VERIFY_NULLDUMMY) && !dummy.is_empty() {
            return Err(ScriptError::SigNullDummy);
        }

        let mut subscript = script_bytes[code_separator..].to_vec();
        if self.sig_version == SigVersion::Base {
            for sig in &sigs {
                let sig_push =
                    single_push_script(sig).map_err(|_| ScriptError::Unknown)?;
                subscript = find_and_delete(&subscript, sig_push.as_bytes()).0;
            }
        }
        let subscript = Script::from_bytes(&subscript);

        // Signatures must appear in the same relative order as the keys they
        // match; a key is discarded once it fails against the current
        // signature.
        let mut success = true;
        let mut sig_index = 0usize;
        let mut key_index = 0usize;
        while success && sig_index < sigs.len() {
            if pubkeys.len() - key_index < sigs.len() - sig_index {
                success = false;
                break;
            }
            self.check_signature_encoding(&sigs[sig_index])?;
            self.check_pubkey_encoding(&pubkeys[key_index])?;
            let sig_valid = self.checker.check_ecdsa_signature(
                &sigs[sig_index],
                &pubkeys[key_index],
                subscript,
                self.sig_version,
            );
            if sig_valid {
                sig_index += 1;
            }
            key_index += 1;
        }

        if !success && self.flags.has(VERIFY_NULLFAIL) && sigs.iter().any(|sig| !sig.is_empty()) {
            return Err(ScriptError::NullFail);
        }

        stack.push_bool(success)
    }

    fn check_signature_encoding(&self, sig: &[u8]) -> Result<(), ScriptError> {
        if sig.is_empty() {
            return Ok(());
        }
        let flags = self.flags;
        if flags.has(VERIFY_DERSIG | VERIFY_LOW_S | VERIFY_STRICTENC)
            && !is_valid_signature_encoding(sig)
        {
            return Err(ScriptError::SigDer);
        }
        if flags.has(VERIFY_LOW_S) && !is_low_der_signature(sig) {
            return Err(ScriptError::SigHighS);
        }
        if flags.has(VERIFY_STRICTENC) && !is_defined_hashtype_signature(sig) {
            return Err(ScriptError::SigHashType);
        }
        Ok(())
    }

    fn check_pubkey_encoding(&self, pubkey: &[u8]) -> Result<(), ScriptError> {
        if self.flags.has(VERIFY_STRICTENC) && !is_valid_pubkey_encoding(pubkey) {
            return Err(ScriptError::PubkeyType);
        }
        if self.sig_version == SigVersion::WitnessV0
            && self.flags.has(VERIFY_WITNESS_PUBKEYTYPE)
            && !is_compressed_pubkey(pubkey)
        {
            return Err(ScriptError::WitnessPubkeyType);
        }
        Ok(())
    }

    fn pop_scriptnum(
        &mut self,
        stack: &mut Stack,
        minimal: bool,
        max_len: usize,
    ) -> Result<i64, ScriptError> {
        let bytes = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
        parse_scriptnum(&bytes, minimal, max_len)
    }

    fn peek_scriptnum(
        &mut self,
        stack: &Stack,
        minimal: bool,
        max_len: usize,
    ) -> Result<i64, ScriptError> {
        let bytes = stack.last().ok_or(ScriptError::InvalidStackOperation)?;
        parse_scriptnum(bytes, minimal, max_len)
    }
}

/// Truth value of a stack element: any non-zero byte, except that a bare sign
/// bit (negative zero) is still false.
pub fn cast_to_bool(data: &[u8]) -> bool {
    for (i, &byte) in data.iter().enumerate() {
        if byte != 0 {
            if i == data.len() - 1 && byte == 0x80 {
                return false;
            }
            return true;
        }
    }
    false
}

/// Encodes an integer in the interpreter's variable-length number format.
pub fn encode_num(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }

    let mut result = Vec::new();
    let mut abs_value = value.unsigned_abs();
    while abs_value > 0 {
        result.push((abs_value & 0xff) as u8);
        abs_value >>= 8;
    }

    // The most significant byte carries the sign bit; if it is already in use
    // for magnitude a padding byte is needed.
    if let Some(last) = result.last_mut() {
        if *last & 0x80 != 0 {
            result.push(if value < 0 { 0x80 } else { 0x00 });
        } else if value < 0 {
            *last |= 0x80;
        }
    }

    result
}

pub(crate) fn parse_scriptnum(
    bytes: &[u8],
    minimal: bool,
    max_len: usize,
) -> Result<i64, ScriptError> {
    if bytes.len() > max_len {
        return Err(ScriptError::Unknown);
    }
    if minimal && !is_minimally_encoded(bytes, max_len) {
        return Err(ScriptError::Unknown);
    }
    Ok(decode_num(bytes))
}

fn decode_num(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }

    let mut result: i64 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        result |= (byte as i64) << (8 * i);
    }

    let last = bytes[bytes.len() - 1];
    if last & 0x80 != 0 {
        let mask = !(0x80i64 << (8 * (bytes.len() - 1)));
        -(result & mask)
    } else {
        result
    }
}

fn is_minimally_encoded(bytes: &[u8], max_len: usize) -> bool {
    if bytes.len() > max_len {
        return false;
    }
    if bytes.is_empty() {
        return true;
    }

    let last = bytes[bytes.len() - 1];
    if (last & 0x7f) == 0 {
        if bytes.len() == 1 {
            return false;
        }
        if bytes[bytes.len() - 2] & 0x80 == 0 {
            return false;
        }
    }

    true
}

fn is_disabled_opcode(op: Opcode) -> bool {
    use all::*;

    matches!(
        op,
        OP_CAT
            | OP_SUBSTR
            | OP_LEFT
            | OP_RIGHT
            | OP_INVERT
            | OP_AND
            | OP_OR
            | OP_XOR
            | OP_2MUL
            | OP_2DIV
            | OP_MUL
            | OP_DIV
            | OP_MOD
            | OP_LSHIFT
            | OP_RSHIFT
    )
}

fn is_control_flow(op: Opcode) -> bool {
    use all::*;

    matches!(op, OP_IF | OP_NOTIF | OP_ELSE | OP_ENDIF)
}

fn is_minimal_push(opcode: u8, data: &[u8]) -> bool {
    use all::*;

    if data.is_empty() {
        return opcode == OP_PUSHBYTES_0.to_u8();
    }

    if data.len() == 1 {
        let value = data[0];
        if value == 0x81 {
            return opcode == OP_PUSHNUM_NEG1.to_u8();
        }
        if (1..=16).contains(&value) {
            return opcode == OP_PUSHNUM_1.to_u8() + value - 1;
        }
    }

    if data.len() <= 75 {
        return opcode as usize == data.len();
    }
    if data.len() <= 0xff {
        return opcode == OP_PUSHDATA1.to_u8();
    }
    if data.len() <= 0xffff {
        return opcode == OP_PUSHDATA2.to_u8();
    }
    opcode == OP_PUSHDATA4.to_u8()
}

fn read_push_length(
    bytes: &[u8],
    cursor: &mut usize,
    width: usize,
) -> Result<usize, ScriptError> {
    if bytes.len() < *cursor + width {
        return Err(ScriptError::BadOpcode);
    }
    let mut len: usize = 0;
    for i in 0..width {
        len |= (bytes[*cursor + i] as usize) << (8 * i);
    }
    *cursor += width;
    Ok(len)
}

/// Index of the opcode following the one at `i`, or the script length when the
/// script ends (or is truncated mid-push).
pub(crate) fn next_op(script: &[u8], i: usize) -> usize {
    if i >= script.len() {
        return script.len();
    }
    let advance = match script[i] {
        len @ 0x01..=0x4b => 1 + len as usize,
        0x4c => {
            if i + 2 > script.len() {
                return script.len();
            }
            2 + script[i + 1] as usize
        }
        0x4d => {
            if i + 3 > script.len() {
                return script.len();
            }
            3 + u16::from_le_bytes([script[i + 1], script[i + 2]]) as usize
        }
        0x4e => {
            if i + 5 > script.len() {
                return script.len();
            }
            5 + u32::from_le_bytes([
                script[i + 1],
                script[i + 2],
                script[i + 3],
                script[i + 4],
            ]) as usize
        }
        _ => 1,
    };
    (i + advance).min(script.len())
}

/// Removes every occurrence of `pattern` (a serialized push) from `script`.
///
/// Deletions only happen at opcode boundaries, so a pattern embedded inside a
/// larger push is left alone. Returns the filtered script and the number of
/// occurrences removed.
pub(crate) fn find_and_delete(script: &[u8], pattern: &[u8]) -> (Vec<u8>, usize) {
    if pattern.is_empty() || script.len() < pattern.len() {
        return (script.to_vec(), 0);
    }
    let mut result = Vec::with_capacity(script.len());
    let mut removed = 0usize;
    let mut i = 0usize;
    while i < script.len() {
        while script[i..].starts_with(pattern) {
            removed += 1;
            i += pattern.len();
            if i >= script.len() {
                return (result, removed);
            }
        }
        let next = next_op(script, i);
        result.extend_from_slice(&script[i..next]);
        i = next;
    }
    (result, removed)
}

/// Builds a script consisting of a single canonical push of `data`.
pub(crate) fn single_push_script(
    data: &[u8],
) -> Result<ScriptBuf, bitcoin::blockdata::script::PushBytesError> {
    let push = PushBytesBuf::try_from(data.to_vec())?;
    Ok(Builder::new().push_slice(push).into_script())
}

/// Decomposes a witness-program locking script into (version, program).
pub(crate) fn witness_program(script_bytes: &[u8]) -> Option<(u8, &[u8])> {
    let script = Script::from_bytes(script_bytes);
    let version = script.witness_version()?;
    if script_bytes.len() < 4 {
        return None;
    }
    Some((version.to_num(), &script_bytes[2..]))
}

/// Counts signature operations in a script.
///
/// With `accurate`, CHECKMULTISIG preceded by a small-integer key count is
/// charged that count; otherwise (and for unparsable counts) the worst case of
/// [`MAX_PUBKEYS_PER_MULTISIG`] is charged.
pub(crate) fn count_sigops(script: &Script, accurate: bool) -> u32 {
    use all::*;
    use bitcoin::blockdata::script::Instruction;

    let mut total: u32 = 0;
    let mut last_op: Option<Opcode> = None;
    for instruction in script.instructions() {
        let instruction = match instruction {
            Ok(instruction) => instruction,
            // Counting stops at the first malformed push, like the original.
            Err(_) => break,
        };
        match instruction {
            Instruction::Op(opcode) => {
                match opcode {
                    OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                        total = total.saturating_add(1);
                    }
                    OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                        let add = if accurate {
                            decode_op_n(last_op).unwrap_or(MAX_PUBKEYS_PER_MULTISIG as u32)
                        } else {
                            MAX_PUBKEYS_PER_MULTISIG as u32
                        };
                        total = total.saturating_add(add);
                    }
                    _ => {}
                }
                last_op = Some(opcode);
            }
            Instruction::PushBytes(_) => {
                last_op = None;
            }
        }
    }

    total
}

fn decode_op_n(opcode: Option<Opcode>) -> Option<u32> {
    use all::*;

    let value = opcode?.to_u8();
    if value >= OP_PUSHNUM_1.to_u8() && value <= OP_PUSHNUM_16.to_u8() {
        Some((value - OP_PUSHNUM_1.to_u8() + 1) as u32)
    } else {
        None
    }
}

/// BIP66 strict-DER check, operating on a signature with its trailing
/// hash-type byte.
pub(crate) fn is_valid_signature_encoding(sig: &[u8]) -> bool {
    if sig.len() < 9 || sig.len() > 73 {
        return false;
    }
    if sig[0] != 0x30 {
        return false;
    }
    if sig[1] as usize != sig.len() - 3 {
        return false;
    }

    let len_r = sig[3] as usize;
    if 5 + len_r >= sig.len() {
        return false;
    }
    let len_s = sig[5 + len_r] as usize;

    if sig[2] != 0x02 {
        return false;
    }
    if len_r == 0 {
        return false;
    }
    if sig[4] & 0x80 != 0 {
        return false;
    }
    if len_r > 1 && sig[4] == 0x00 && (sig[5] & 0x80) == 0 {
        return false;
    }

    if sig[len_r + 4] != 0x02 {
        return false;
    }
    if len_s == 0 {
        return false;
    }
    if len_r + len_s + 7 != sig.len() {
        return false;
    }
    if sig[len_r + 6] & 0x80 != 0 {
        return false;
    }
    if len_s > 1 && sig[len_r + 6] == 0x00 && (sig[len_r + 7] & 0x80) == 0 {
        return false;
    }
    true
}

fn is_defined_hashtype_signature(sig: &[u8]) -> bool {
    if sig.is_empty() {
        return false;
    }
    let base = sig[sig.len() - 1] & 0x1f;
    matches!(base, 0x01..=0x03)
}

fn is_low_der_signature(sig: &[u8]) -> bool {
    if !is_valid_signature_encoding(sig) || sig.len() < 2 {
        return false;
    }

    let sig_bytes = &sig[..sig.len() - 1];
    let Ok(signature) = EcdsaSignature::from_der(sig_bytes) else {
        return false;
    };
    let mut normalized = signature;
    normalized.normalize_s();
    normalized == signature
}

fn is_valid_pubkey_encoding(pubkey: &[u8]) -> bool {
    if pubkey.len() == 33 {
        matches!(pubkey[0], 0x02 | 0x03)
    } else if pubkey.len() == 65 {
        pubkey[0] == 0x04
    } else {
        false
    }
}

fn is_compressed_pubkey(pubkey: &[u8]) -> bool {
    pubkey.len() == 33 && matches!(pubkey[0], 0x02 | 0x03)
}
